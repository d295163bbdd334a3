//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs    (resolve client IP through trusted proxies)
//!     → rate_limit.rs (per-IP token bucket; throttling counts as a strike)
//!     → handlers
//!           → ban.rs  (fail2ban window shared by detection and throttling)
//! Outgoing response:
//!     → headers.rs    (hardening headers)
//! ```

pub mod ban;
pub mod headers;
pub mod rate_limit;

pub use ban::{BanCounter, CounterSnapshot, Strike};
pub use headers::{client_ip, security_header_layers};
pub use rate_limit::{rate_limit_middleware, RateLimiter};
