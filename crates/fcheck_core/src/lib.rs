pub mod config;
pub mod corpus;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod normalize;
pub mod segment;
