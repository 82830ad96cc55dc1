//! Versioned row store for Tessera
//!
//! A per-partition key→slot map where every slot holds a committed value
//! and at most one staged (uncommitted) write. Writers stage under an
//! exclusive lock and see their own staging; everyone else reads the
//! committed value. Commit promotes staged values; rollback discards them.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod slot;
pub mod store;

pub use store::RowStore;
