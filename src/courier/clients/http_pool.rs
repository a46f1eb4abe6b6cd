//! Shared HTTP client for all provider wire calls.
//!
//! One `reqwest::Client` serves the whole process so TLS sessions and DNS
//! lookups stay warm across the LLM, Twilio and SendGrid calls a single
//! pipeline invocation makes. Timeouts are bounded well below any handler
//! wall-clock limit; the LLM polling budget is enforced separately by the
//! caller.

use lazy_static::lazy_static;
use std::time::Duration;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
///
/// The returned reference can be cloned and reused by individual provider
/// clients.
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}
