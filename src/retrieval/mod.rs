//! Hybrid retrieval subsystem.
//!
//! Chunking, dense vectors, BM25 lexical scoring, rank fusion, and the
//! per-session cache lifecycle.

pub mod cache;
pub mod chunk;
pub mod index;
pub mod lexical;
pub mod vector;

pub use cache::{CacheEntry, CacheManager, kb_collection, user_docs_collection};
pub use chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, split_default, split_text};
pub use index::{DEFAULT_FUSION_K, HybridMode, RetrievalIndex, reciprocal_rank_fusion};
pub use lexical::{Bm25Index, tokenize};
pub use vector::{ChunkRecord, MemoryVectorStore, VectorBackend, cosine_similarity};
