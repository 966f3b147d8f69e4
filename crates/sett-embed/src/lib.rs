//! Embedding providers for semantic code search

pub mod providers;


pub use providers::create_embedder;
pub use providers::local::LocalEmbedder;
pub use providers::openai::OpenAiEmbedder;
