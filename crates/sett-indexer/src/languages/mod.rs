//! Per-language parsers

pub mod c;
pub mod python;

pub use c::CFamilyParser;
pub use python::PythonParser;
