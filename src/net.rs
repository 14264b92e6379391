//! Shared HTTP client configuration.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};

/// Default user agent for outbound calls.
pub const USER_AGENT: &str = concat!("sonargate/", env!("CARGO_PKG_VERSION"));

/// Default connection timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout. Generous enough that the streaming decoder's own
/// deadline always fires first.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Build a reqwest client with the standard configuration (User-Agent,
/// timeouts) shared by the upstream client and the ledger gateway.
pub fn build_client() -> Client {
    let builder: ClientBuilder = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT);

    match builder.build() {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to build HTTP client with custom config; using defaults");
            Client::default()
        }
    }
}
