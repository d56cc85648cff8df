//! Current-IP probing against a small list of external echo services.
//!
//! Queried sequentially with a short per-call timeout; the first successful
//! response wins. Callers are expected to cache the result themselves (see
//! [`super::VpnController`]) to protect these services from repeated queries
//! by concurrent workers.

use std::time::Duration;

use tracing::{instrument, warn};

/// Echo services queried in order. Any endpoint that returns the caller's IP
/// as a bare text body is usable here.
const ECHO_SERVICES: &[&str] = &[
    "https://api.ipify.org",
    "https://ifconfig.me/ip",
    "https://icanhazip.com",
];

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Queries the echo services in order, returning the first non-empty response.
/// Returns `None` if every service is unreachable or times out.
#[instrument]
pub async fn probe_current_ip() -> Option<String> {
    let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build().ok()?;

    for &service in ECHO_SERVICES {
        match client.get(service).send().await {
            Ok(response) if response.status().is_success() => {
                if let Ok(body) = response.text().await {
                    let ip = body.trim().to_string();
                    if !ip.is_empty() {
                        return Some(ip);
                    }
                }
            }
            Ok(response) => {
                warn!(service, status = %response.status(), "ip probe returned non-success");
            }
            Err(err) => {
                warn!(service, %err, "ip probe request failed");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_services_list_is_non_empty() {
        assert!(!ECHO_SERVICES.is_empty());
    }
}
