pub mod classify;
pub mod coref;
pub mod embeddings;
pub mod explain;
pub mod factcheck;
pub mod llm;
pub mod ner;
pub mod ollama;
pub mod pipeline;
pub mod vector;
