use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

/// Timeout for availability probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Shared HTTP client with connection pooling and keep-alive.
///
/// Per-call deadlines are set on each request by the adapters, so the client
/// itself only bounds connection setup.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .pool_max_idle_per_host(16)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(30))
        .user_agent(concat!("commcoach/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        })
});

/// Get the shared HTTP client.
pub fn client() -> &'static Client {
    &HTTP_CLIENT
}

/// Read an error body for inclusion in a provider error, capped so a huge
/// HTML error page doesn't end up in logs.
pub async fn error_body(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    super::preview(text.trim(), 500)
}
