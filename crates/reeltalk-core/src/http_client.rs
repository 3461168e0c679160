use std::time::Duration;

use reqwest::Client;
use tracing::warn;

const DISABLE_SYSTEM_PROXY_ENV: &str = "REELTALK_DISABLE_SYSTEM_PROXY";

/// Connecting to Telegram, the knowledge base or the model endpoint.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const USER_AGENT: &str = concat!("reeltalk/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client for the outbound adapters.
///
/// Only the connect phase is bounded here. Whole-request limits are set by
/// the callers.
pub(crate) fn build_http_client() -> Client {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT);

    // Wiremock servers on localhost must be reached directly.
    if should_disable_system_proxy() {
        builder = builder.no_proxy();
    }

    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Falling back to a default HTTP client");
        Client::new()
    })
}

fn should_disable_system_proxy() -> bool {
    std::env::var_os(DISABLE_SYSTEM_PROXY_ENV).is_some() || cfg!(test)
}
