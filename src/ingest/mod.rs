pub mod decoder;
pub mod fetcher;
pub mod pubsub;
