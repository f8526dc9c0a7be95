pub mod ingest;
pub mod subscription;
pub mod types;
