//! Typed boundary to the Quo backend: client, wire types, error taxonomy.

mod client;
mod error;
pub mod types;

pub use client::QuoClient;
pub use error::ApiError;
