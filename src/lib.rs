#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod cache;
pub mod error;
pub mod reply;
pub mod rest;
pub mod sign;

use std::result::Result as StdResult;

pub use cache::TtlCache;
pub use error::{Error, Kind};
pub use reply::Reply;
pub use rest::{CallOptions, Config, ConfigRegistry, RestClient};

pub type Result<T> = StdResult<T, Error>;
