//! Typed operations over the vault schema.
//!
//! Functions take a `&Connection` (plus the content cipher where message or note text
//! is involved) so callers decide transaction boundaries.

pub mod context;
pub mod embeddings;
pub mod facts;
pub mod identity;
pub mod messages;
pub mod notes;
pub mod preferences;
pub mod sessions;
pub mod stats;
pub mod types;
