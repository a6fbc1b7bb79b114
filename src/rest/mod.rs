//! Signed REST calls against the platform.
//!
//! A call goes through these steps:
//! - resolve the [`RequestSpec`] registered for the method code
//! - resolve the client's [`Config`] from its [`ConfigRegistry`]
//! - sign the canonical parameters plus body and spawn the HTTP exchange
//! - hand back a [`PendingCall`] that resolves to a [`Reply`](crate::reply::Reply)
//!
//! Per-call timeouts ride on the individual request; the shared HTTP client
//! is never reconfigured.

mod client;
mod config;
mod policy;
mod types;

pub use client::{PAYLOAD, PendingCall, RestClient, SIGN, SignedRequest, X_REQUEST_ID};
pub use config::{Config, ConfigRegistry, RawConfig};
pub use policy::{RequestIpPolicy, TIMESTAMP_FORMAT};
pub use types::{
    CallOptions, DEFAULT_TIMEOUT, HttpVerb, PayloadMode, RequestIdentity, RequestSpec,
    RequestSpecs,
};
