//! Client-side collaborators of the pool: transport clients, their cache,
//! and the rate limiter.

mod cache;
mod http;
mod rate_limiter;

pub use cache::*;
pub use http::*;
pub use rate_limiter::*;
