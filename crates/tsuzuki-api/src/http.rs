use std::time::Duration;

use reqwest::Client;

/// Upper bound on a single request, body included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client shared by every service call. A stalled server fails the
/// request instead of hanging it.
pub(crate) fn client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not configure HTTP client, using defaults");
            Client::new()
        })
}
