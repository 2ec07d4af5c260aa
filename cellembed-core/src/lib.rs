pub mod adapter;
pub mod app_config;
pub mod dataset;
pub mod embedding;
pub mod environment;
pub mod pipeline;
pub mod preprocess;
pub mod provenance;
pub mod record;
pub mod runner;
pub mod writer;

// Re-export key initialization functions
pub use environment::{init_ort, init_embedding, init_model_resource_directory};
