//! In-process backends. They are the defaults of a freshly built store and
//! the test doubles of the integration tests.

mod audit;
mod cache;
mod relational;
mod search;
mod sequence;

pub use audit::MemoryAuditStore;
pub use cache::MemoryCache;
pub use relational::MemoryRelationalStore;
pub use search::MemorySearchIndex;
pub use sequence::MemorySequenceStore;
