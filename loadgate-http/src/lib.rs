#![forbid(unsafe_code)]

mod client;
mod error;
mod estimate;
mod util;

pub use client::{DEFAULT_CONNECT_TIMEOUT, HttpClient};
pub use error::{Error, Result};
pub use estimate::estimate_request_bytes;
