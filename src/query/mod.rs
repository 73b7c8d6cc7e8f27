//! Lakehouse Query Layer
//!
//! - **spec**: Structured dataset requests (`QuerySpec`, `Filters`)
//! - **compiler**: Latest-revision-per-key SQL rendering
//! - **shaper**: Key-indexed result tables
//! - **value**: Scalars shared by parameters and result cells
//!
//! # Pipeline
//!
//! ```text
//! QuerySpec → SchemaCatalog::validate → QueryCompiler::compile
//!           → ConnectionManager::execute → ResultShaper::shape → ResultTable
//! ```

mod compiler;
mod shaper;
mod spec;
mod value;

pub use compiler::{CompiledQuery, Dialect, QueryCompiler, Versioning};
pub use shaper::{KeyTuple, ResultShaper, ResultTable};
pub use spec::{Filters, QuerySpec};
pub use value::{parse_timestamp, SqlValue, TIMESTAMP_FORMAT};
