//! Shared domain value types.
//!
//! - [`PersistedTokens`] - durable token set written by the token store

pub mod tokens;

pub use tokens::PersistedTokens;
