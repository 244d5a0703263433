use std::time::{Duration, Instant};

use async_trait::async_trait;
use hydrix_core::{ExecTask, Result, ScanEngine, ScanError};
use hydrix_model::status::EngineEvent;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Built-in engine that probes each target with a plain HTTP GET and
/// reports the response status and latency as the scan result.
#[derive(Debug)]
pub struct ProbeEngine {
    client: reqwest::Client,
}

impl ProbeEngine {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| ScanError::Transport(format!("http client setup failed: {err}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ScanEngine for ProbeEngine {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        task: &ExecTask,
        results: &mpsc::Sender<EngineEvent>,
    ) -> Result<()> {
        let url = task.target.url.clone();
        let started = Instant::now();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            outcome = self.client.get(&url).send() => outcome,
        };

        match outcome {
            Ok(response) => {
                let event = EngineEvent::new(
                    task.plugin.name.clone(),
                    json!({
                        "url": url,
                        "status": response.status().as_u16(),
                        "https": task.target.is_https,
                        "latency_ms": started.elapsed().as_millis() as u64,
                        "kind": task.plugin.kind.as_str(),
                    }),
                );
                let _ = results.send(event).await;
                Ok(())
            }
            Err(err) => Err(ScanError::Transport(format!("probe {url} failed: {err}"))),
        }
    }
}
