//! In-memory value store

pub mod cache;
pub mod codec;
pub mod entry;
pub mod memory;

pub use cache::{CacheStore, ExpireSink, NullSink, StoreError, TrimReport};
pub use codec::{CodecError, GzipCodec, PlainCodec, ValueCodec};
pub use entry::{CacheEntry, ExpirationPolicy};
pub use memory::{ceiling_bytes, entry_cost, total_system_bytes};
