//! HTTP transport shared by the concrete backend drivers.

pub mod http;

pub use http::{HttpTransport, TransportError};
