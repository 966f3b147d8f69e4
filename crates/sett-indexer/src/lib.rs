//! File parsing, change detection and changeset construction

pub mod builder;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod languages;
pub mod scanner;

#[cfg(test)]
mod tests;

pub use builder::{Build, BuildInput, ExternalSymbols};
pub use config::{EmbeddingConfig, EmbeddingProvider, SettConfig, ServerConfig};
pub use coordinator::{Indexer, PassReport, PassScope, Phase};
pub use error::{IndexError, ParseError};
pub use extractor::{Capabilities, Entity, LanguageParser, ParsedFile, ParserRegistry};
pub use scanner::FileFilter;
