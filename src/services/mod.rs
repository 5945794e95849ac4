pub mod client_factory;
pub mod connection;
pub mod destination;
pub mod metadata;
pub mod multipart;
pub mod pending;
pub mod region;
pub mod storage;
pub mod storage_cache;
pub mod worker;
