pub mod chunking;
pub mod database;
pub mod memory;
pub mod qdrant;
pub mod rag;
pub mod splitter;
pub mod store;
