pub mod arbiter;
pub mod branch;
pub mod chunker;
pub mod decoder;
pub mod embedder;
pub mod export;
pub mod hierarchical;
pub mod history_index;
pub mod llm;
pub mod orchestrator;
pub mod retriever;
pub mod vector_store;
