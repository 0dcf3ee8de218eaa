//! Basket client - commerce state for a storefront client.
//!
//! Holds the state a shopper's client needs between and across visits:
//!
//! - [`session`] - authentication, token refresh and the persisted session
//! - [`cart`] - the cart reducer, its write-through store and upstream sync
//! - [`sync`] - the offline mutation queue and its background worker
//! - [`fetch`] - the authenticated API client
//! - [`offline`] - versioned response caches for offline browsing
//! - [`persistence`] - the ranked local storage chain everything is saved to
//!
//! [`ClientContext`] wires these together from a [`ClientConfig`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod offline;
pub mod persistence;
pub mod session;
pub mod sync;

pub use config::{ClientConfig, ConfigError};
pub use context::ClientContext;
pub use error::{ClientError, Result};
