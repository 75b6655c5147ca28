//! External stores: image blobs and the document history table.
//!
//! Both are reached over HTTP and hidden behind traits
//! ([`blob::BlobStore`], [`records::DocumentStore`]) so the pipeline can run
//! against in-memory fakes.

pub mod blob;
pub mod records;

pub use blob::{object_key, sanitize_source_name, BlobStore, SupabaseBlobStore};
pub use records::{DocumentStore, HistoryEntry, NewDocumentRecord, SupabaseDocumentStore};
