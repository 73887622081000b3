//! Kong Admin API integration module.
//!
//! This module provides the REST capability the reconcilers are written
//! against, its `reqwest` implementation, and the Admin API wire types.

mod client;
mod types;

pub use client::{
    DEFAULT_TIMEOUT_SECS, DEFAULT_TOKEN_HEADER, HttpMethod, KongClient, RestClient, RestRequest,
    RestResponse,
};
#[cfg(test)]
pub use client::MockRestClient;
pub use types::{Target, TargetList, TargetRequest, Upstream};
