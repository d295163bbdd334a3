//! HTTP front end.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs   (request id, trace span, timeout, body limit)
//!     → rate limit  (security/rate_limit.rs)
//!     → request.rs  (client IP, JSON body, query parsing)
//!     → handlers.rs (call the trust engine)
//!     → response.rs (engine errors → status codes)
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use response::ApiError;
pub use server::{AppState, HttpServer};
