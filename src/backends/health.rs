use crate::ports::PortFuture;
use std::time::Duration;
use tracing::trace;

/// `true` when `url` answers with a success status.
pub trait HealthProbe: Send + Sync {
    fn check<'a>(&'a self, url: &'a str) -> PortFuture<'a, bool>;
}

pub struct HttpHealthProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpHealthProbe {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: timeout.min(Duration::from_secs(10)),
        }
    }
}

impl HealthProbe for HttpHealthProbe {
    fn check<'a>(&'a self, url: &'a str) -> PortFuture<'a, bool> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .header(reqwest::header::USER_AGENT, concat!("erpswarm/", env!("CARGO_PKG_VERSION")))
                .timeout(self.timeout)
                .send()
                .await;
            let healthy = response.is_ok_and(|response| response.status().is_success());
            trace!(url, healthy, "Health probe");
            Ok(healthy)
        })
    }
}
