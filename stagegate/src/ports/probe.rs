//! Endpoint probes and the readiness checks built on them.

use super::container::ContainerService;
use crate::pipeline::Probe;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Checks endpoints.
///
/// Both checks answer a yes/no question; transport errors count as "no".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns true if `url` answers with a success status.
    async fn check(&self, url: &str) -> bool;

    /// Returns true if `url` answers with a success status and a body
    /// containing `expected`.
    async fn check_content(&self, url: &str, expected: &str) -> bool;
}

/// [`Prober`] over HTTP.
#[cfg(feature = "http-probe")]
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

#[cfg(feature = "http-probe")]
impl HttpProber {
    /// Creates a prober whose requests give up after `request_timeout`.
    pub fn new(request_timeout: std::time::Duration) -> Result<Self, crate::errors::PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| crate::errors::PipelineError::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    async fn fetch(&self, url: &str) -> Option<String> {
        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => resp.text().await.ok(),
            Ok(resp) => {
                debug!(url, status = %resp.status(), "Probe got non-success status");
                None
            }
            Err(err) => {
                debug!(url, error = %err, "Probe request failed");
                None
            }
        }
    }
}

#[cfg(feature = "http-probe")]
#[async_trait]
impl Prober for HttpProber {
    async fn check(&self, url: &str) -> bool {
        self.fetch(url).await.is_some()
    }

    async fn check_content(&self, url: &str, expected: &str) -> bool {
        self.fetch(url)
            .await
            .is_some_and(|body| body.contains(expected))
    }
}

/// Ready when an endpoint answers.
#[derive(Clone)]
pub struct EndpointReachable {
    prober: Arc<dyn Prober>,
    url: String,
}

impl EndpointReachable {
    /// Creates the check.
    pub fn new(prober: Arc<dyn Prober>, url: impl Into<String>) -> Self {
        Self {
            prober,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Probe for EndpointReachable {
    async fn check(&self) -> bool {
        self.prober.check(&self.url).await
    }

    fn describe(&self) -> String {
        format!("{} reachable", self.url)
    }
}

/// Ready when an endpoint's body contains the expected text.
#[derive(Clone)]
pub struct ContentMatches {
    prober: Arc<dyn Prober>,
    url: String,
    expected: String,
}

impl ContentMatches {
    /// Creates the check.
    pub fn new(prober: Arc<dyn Prober>, url: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            prober,
            url: url.into(),
            expected: expected.into(),
        }
    }
}

#[async_trait]
impl Probe for ContentMatches {
    async fn check(&self) -> bool {
        self.prober.check_content(&self.url, &self.expected).await
    }

    fn describe(&self) -> String {
        format!("{} contains {:?}", self.url, self.expected)
    }
}

/// Ready when a command inside a service exits with status 0.
#[derive(Clone)]
pub struct CommandProbe {
    containers: Arc<dyn ContainerService>,
    service: String,
    command: String,
}

impl CommandProbe {
    /// Creates the check.
    pub fn new(
        containers: Arc<dyn ContainerService>,
        service: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            containers,
            service: service.into(),
            command: command.into(),
        }
    }
}

#[async_trait]
impl Probe for CommandProbe {
    async fn check(&self) -> bool {
        match self.containers.exec(&self.service, &self.command).await {
            Ok(output) => output.success(),
            Err(err) => {
                debug!(service = %self.service, error = %err, "Readiness command could not run");
                false
            }
        }
    }

    fn describe(&self) -> String {
        format!("{}: {}", self.service, self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::CommandOutput;
    use crate::testing::FakeContainerService;

    #[tokio::test]
    async fn test_endpoint_checks_delegate_to_prober() {
        let mut prober = MockProber::new();
        prober.expect_check().returning(|url| url.ends_with("/health"));
        prober
            .expect_check_content()
            .returning(|_, expected| expected.contains("Welcome"));
        let prober: Arc<dyn Prober> = Arc::new(prober);

        assert!(EndpointReachable::new(prober.clone(), "http://web/health").check().await);
        assert!(!EndpointReachable::new(prober.clone(), "http://web/").check().await);
        assert!(ContentMatches::new(prober.clone(), "http://web/", "Welcome").check().await);
        assert!(!ContentMatches::new(prober, "http://web/", "Error").check().await);
    }

    #[tokio::test]
    async fn test_command_probe_uses_exit_code() {
        let containers = Arc::new(FakeContainerService::new());
        containers.script_exec(vec![CommandOutput::failed(2, "no"), CommandOutput::ok("accepting")]);
        let probe = CommandProbe::new(containers.clone(), "db", "pg_isready");

        assert!(!probe.check().await);
        assert!(probe.check().await);
        assert_eq!(probe.describe(), "db: pg_isready");
    }

    #[cfg(feature = "http-probe")]
    #[tokio::test]
    async fn test_http_prober_unreachable_is_false() {
        let prober = HttpProber::new(std::time::Duration::from_millis(200)).unwrap();
        assert!(!prober.check("http://127.0.0.1:1/").await);
    }
}
