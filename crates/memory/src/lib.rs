//! Session memory for CoFinance: the durable SQLite store, entity
//! extraction, and semantic retrieval with graceful degradation.

pub mod embedding;
pub mod entities;
pub mod recall;
pub mod retrieval;
pub mod store;
pub mod vector;

pub use embedding::{Embedder, HashingEmbedder, ProviderEmbedder};
pub use entities::{Extracted, extract_entities};
pub use recall::{ContextRecall, RecalledContext};
pub use retrieval::{ItemKind, RetrievalStatus, Retriever, VectorItem};
pub use store::{Artifact, Entity, Fact, MemoryStore, PINNED_FACT};
pub use vector::{FlatIpIndex, VectorIndex, cosine_similarity};
