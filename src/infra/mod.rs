// Adapters for external services

pub mod discogs_client;

pub use discogs_client::DiscogsClient;
