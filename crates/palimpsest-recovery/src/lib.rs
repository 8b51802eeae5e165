//! Annotation and connection recovery for reprocessed documents.
//!
//! When a document is re-extracted its chunks are rebuilt from scratch and
//! every stored offset goes stale. This crate relocates annotations in the
//! new text through a cascade of matching strategies, and re-resolves
//! validated cross-document connections by embedding similarity. All of it is
//! pure computation; persistence lives in `palimpsest-db`.

pub mod annotations;
pub mod remap;
pub mod similarity;
pub mod strategies;
pub mod text;
pub mod trigram;

pub use annotations::recover_annotations;
pub use remap::{remap_connection, remap_connections, resolve_endpoint, EndpointContext};
pub use similarity::{cosine_similarity, SimilarityIndex};
pub use strategies::{default_cascade, recover_annotation, MatchCorpus, MatchStrategy};
pub use text::assemble_text;
