//! REST session source for the Jules API.
//!
//! Provides:
//! - `RestClient` - [`jules_core::SessionSource`] over HTTP
//! - Wire DTOs and their conversion into core types

pub mod rest;
pub mod wire;

pub use rest::RestClient;
