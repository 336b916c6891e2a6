// Middleware module - response decoration

pub mod cors;

pub use cors::{set_response_headers, CorsConfig};
