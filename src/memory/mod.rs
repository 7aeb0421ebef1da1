//! Tiered memory: short-term conversation buffer, session working set, and
//! long-term semantic store, fronted by [`MemoryManager`].

pub mod embeddings;
pub mod long_term;
pub mod manager;
pub mod short_term;
pub mod working;

pub use embeddings::{CachedEmbeddings, EmbeddingProvider, HashEmbeddingProvider};
pub use long_term::{InMemoryLongTerm, LongTermEntry, LongTermMemory, MemoryKind};
pub use manager::{ConsolidationStats, MemoryContext, MemoryManager};
pub use short_term::{SessionKey, ShortTermBuffer, ShortTermEntry};
pub use working::WorkingSet;
