pub mod client;
pub mod fetcher;
pub mod models;
pub mod retry;
pub mod transform;
