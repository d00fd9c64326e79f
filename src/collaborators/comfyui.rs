//! Sprite synthesis through a node-graph image service (ComfyUI HTTP API).
//!
//! A run posts the workflow graph together with the runtime inputs to
//! `/prompt`, then polls `/history/{prompt_id}` until the service reports
//! the prompt, or the wait limit passes.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::CollaboratorError;

use super::{short_id, CallStatus, SpriteOutput, SpriteRequest, SpriteSynthesizer};

/// Default service address.
pub const DEFAULT_COMFYUI_URL: &str = "http://127.0.0.1:8188";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_WAIT_LIMIT: Duration = Duration::from_secs(300);

/// HTTP client for the image-synthesis service.
#[derive(Debug, Clone)]
pub struct ComfyUiClient {
    base_url: String,
    http_client: Client,
    workflow: Value,
    output_root: PathBuf,
    poll_interval: Duration,
    wait_limit: Duration,
}

impl ComfyUiClient {
    /// Creates a client with an empty workflow graph.
    pub fn new(
        base_url: impl Into<String>,
        output_root: impl Into<PathBuf>,
    ) -> Result<Self, CollaboratorError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CollaboratorError::Request(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            workflow: json!({}),
            output_root: output_root.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_limit: DEFAULT_WAIT_LIMIT,
        })
    }

    /// Sets the workflow graph.
    pub fn with_workflow(mut self, workflow: Value) -> Self {
        self.workflow = workflow;
        self
    }

    /// Loads the workflow graph from a JSON file. A missing file keeps the
    /// empty graph.
    pub fn with_workflow_file(self, path: &Path) -> Result<Self, CollaboratorError> {
        if !path.is_file() {
            warn!(path = %path.display(), "Sprite workflow not found, using empty graph");
            return Ok(self);
        }
        let content = std::fs::read_to_string(path)?;
        let workflow = serde_json::from_str(&content)?;
        Ok(self.with_workflow(workflow))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_wait_limit(mut self, limit: Duration) -> Self {
        self.wait_limit = limit;
        self
    }

    /// Body posted to `/prompt`.
    pub fn prompt_payload(&self, inputs: &Value) -> Value {
        json!({
            "prompt": self.workflow,
            "extra_data": inputs,
        })
    }

    /// Queues the workflow and returns the service's prompt id.
    pub async fn trigger(&self, inputs: &Value) -> Result<String, CollaboratorError> {
        let url = format!("{}/prompt", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(&self.prompt_payload(inputs))
            .send()
            .await
            .map_err(|e| CollaboratorError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(CollaboratorError::Service {
                code: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Request(format!("Failed to parse response: {}", e)))?;

        body.get("prompt_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CollaboratorError::Request("response has no prompt_id".to_string()))
    }

    /// Polls the history endpoint until the prompt shows up.
    ///
    /// Transient request errors are ignored. Returns `None` when the wait
    /// limit passes.
    pub async fn wait_for_result(&self, prompt_id: &str) -> Option<Value> {
        let url = format!("{}/history/{}", self.base_url, prompt_id);
        let start = Instant::now();

        while start.elapsed() < self.wait_limit {
            match self.http_client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    if let Ok(mut history) = response.json::<Value>().await {
                        if let Some(entry) = history.get_mut(prompt_id) {
                            return Some(entry.take());
                        }
                    }
                }
                Ok(response) => {
                    debug!(prompt_id = %prompt_id, status = %response.status(), "History not ready");
                }
                Err(e) => {
                    debug!(prompt_id = %prompt_id, error = %e, "History request failed");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        None
    }
}

#[async_trait]
impl SpriteSynthesizer for ComfyUiClient {
    async fn synthesize(&self, request: &SpriteRequest) -> Result<SpriteOutput, CollaboratorError> {
        let run_id = short_id();
        let output_dir = self.output_root.join(&request.character).join(&run_id);
        tokio::fs::create_dir_all(&output_dir).await?;

        info!(run_id = %run_id, character = %request.character, "Starting sprite workflow");

        let inputs = json!({
            "run_id": run_id,
            "frames_dir": request.frames_dir,
            "character": request.character,
            "style": request.style,
            "output_dir": output_dir,
        });

        let failed = |run_id: String, prompt_id: Option<String>, message: &str| SpriteOutput {
            status: CallStatus::Error,
            run_id,
            output_dir: None,
            prompt_id,
            message: Some(message.to_string()),
        };

        let prompt_id = match self.trigger(&inputs).await {
            Ok(id) => id,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Failed to trigger workflow");
                return Ok(failed(run_id, None, "failed to trigger workflow"));
            }
        };

        if self.wait_for_result(&prompt_id).await.is_none() {
            warn!(run_id = %run_id, prompt_id = %prompt_id, "Sprite workflow timed out");
            return Ok(failed(run_id, Some(prompt_id), "workflow timed out"));
        }

        info!(run_id = %run_id, prompt_id = %prompt_id, "Sprite workflow complete");

        Ok(SpriteOutput {
            status: CallStatus::Success,
            run_id,
            output_dir: Some(output_dir),
            prompt_id: Some(prompt_id),
            message: None,
        })
    }
}
