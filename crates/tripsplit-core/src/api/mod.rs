//! Remote data access.
//!
//! `Remote` is the seam between the cache layer and the backend; `ApiClient`
//! implements it over the REST API with bearer-token authentication.

pub mod client;
pub mod error;
pub mod remote;

pub use client::ApiClient;
pub use error::ApiError;
pub use remote::Remote;
