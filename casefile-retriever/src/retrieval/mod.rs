pub mod chunking_strategy;
pub mod citation;
pub mod extraction;
pub mod generation;
pub mod ingestion;
pub mod ranking;
pub mod retriever;
pub mod similarity;
