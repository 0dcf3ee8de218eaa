//! Basket Core - Shared types library.
//!
//! This crate provides the domain types used across all Basket components:
//! - `client` - Client-side commerce state (cart, session, offline queue)
//! - `cli` - Command-line driver for the client state layer
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no storage access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere,
//! including inside a browser or a background worker.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, prices, emails, credentials and roles

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
