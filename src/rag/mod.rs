//! 检索增强（RAG）：分块、向量存储与上下文拼接

pub mod augmentor;
pub mod chunker;
pub mod store;

pub use augmentor::{assemble_context, Retrieval, RetrievalAugmentor, Source};
pub use chunker::{Chunk, Chunker};
pub use store::{cosine_similarity, InMemoryVectorStore, MetadataFilter, RetrievedChunk, VectorStore};
