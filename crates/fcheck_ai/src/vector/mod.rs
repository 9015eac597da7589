pub mod index;
pub mod ingest;
pub mod similarity;
pub mod store;

pub use index::{AnnIndex, FlatIndex, IndexSpec, IndexStructure, IvfFlatIndex, Metric, Neighbor, EMPTY_SLOT};
pub use ingest::{index_corpus, IngestReport};
pub use store::{Metadata, SearchHit, VectorStore, METADATA_ENTITIES_KEY, METADATA_TEXT_KEY};
