//! Knowledge indexing: source parsing, chunk building and the incremental
//! sync pipeline keeping the vector index and code graph in step with a
//! working copy.

pub mod chunks;
pub mod parser;
pub mod sync;

pub use chunks::{build_description, chunk_payload};
pub use parser::{JavaParser, ParsedFile, ParsedRelation, SourceParser};
pub use sync::KnowledgeIndexer;
