//! Health probe: is the upstream API reachable from this process?

use async_trait::async_trait;
use common::api::HealthProbe;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct UpstreamProbe {
    client: Option<reqwest::Client>,
    url: String,
}

impl UpstreamProbe {
    /// In mock mode no upstream exists, so the probe always reports
    /// healthy.
    pub fn new(base_url: &str, mock: bool) -> Self {
        let client = if mock {
            None
        } else {
            reqwest::Client::builder()
                .timeout(PROBE_TIMEOUT)
                .build()
                .ok()
        };
        Self {
            client,
            url: base_url.to_string(),
        }
    }
}

#[async_trait]
impl HealthProbe for UpstreamProbe {
    async fn healthy(&self) -> bool {
        match &self.client {
            None => true,
            // Any HTTP answer counts as reachable; only transport-level
            // failures mark the process degraded.
            Some(client) => client.get(&self.url).send().await.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_mode_always_healthy() {
        let probe = UpstreamProbe::new("https://api.invalid", true);
        assert!(probe.healthy().await);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_degraded() {
        let probe = UpstreamProbe::new("http://127.0.0.1:1", false);
        assert!(!probe.healthy().await);
    }
}
