use thiserror::Error;

pub mod client;
pub mod jobs;
pub mod types;

pub use client::CatalogClient;
pub use jobs::JobWaitOutcome;
pub use types::*;

/// Errors from the catalog server
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The request never produced a usable response.
    #[error("catalog transport error during {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a GraphQL errors array; logically the
    /// operation did not happen.
    #[error("catalog rejected {operation}: {messages}")]
    Api {
        operation: &'static str,
        messages: String,
    },

    #[error("catalog returned no data for {operation}")]
    MissingData { operation: &'static str },

    #[error("catalog response for {operation} did not parse: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
