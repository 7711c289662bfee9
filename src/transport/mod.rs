//! HTTP transport to provider endpoints.

pub mod http;

pub use http::{HttpTransport, WireBody};
