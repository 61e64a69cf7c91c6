//! axum integration: admission middleware, client identity and JSON errors.

pub mod admission;
pub mod client_ip;
pub mod logging;
pub mod response;

pub use admission::{enforce_admission, insert_rate_limit_headers, AdmissionState};
pub use client_ip::{ClientIpSource, UnknownClientIpSource};
pub use logging::log_requests;
pub use response::ApiError;
