pub mod enrich;
pub mod events;
pub mod feed;
pub mod filter;
pub mod jobs;
pub mod refresh;
pub mod scheduler;
pub mod storage;
