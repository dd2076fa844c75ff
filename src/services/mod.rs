pub mod content;
pub mod error;
pub mod fetcher;
pub mod keys;
pub mod orchestrator;
pub mod presign;
pub mod storage;
pub mod upload_service;
pub mod zip_walker;
