//! Telling the serving side to adopt a newly promoted champion

use crate::error::NotifyError;
use crate::serving::http::ReloadResponse;
use crate::serving::InferenceService;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

/// Acknowledgement from a successful reload
#[derive(Debug, Clone, PartialEq)]
pub struct ReloadAck {
    pub model_version: Option<String>,
    pub model_f1_score: f64,
}

#[async_trait]
pub trait ReloadNotifier: Send + Sync {
    async fn notify_reload(&self) -> Result<ReloadAck, NotifyError>;

    fn describe(&self) -> String;
}

/// In-process service: reload it directly
#[async_trait]
impl ReloadNotifier for InferenceService {
    async fn notify_reload(&self) -> Result<ReloadAck, NotifyError> {
        let summary = self.reload().await?;
        Ok(ReloadAck {
            model_version: Some(summary.version),
            model_f1_score: summary.quality_score,
        })
    }

    fn describe(&self) -> String {
        "in-process inference service".to_string()
    }
}

/// Out-of-process service: `POST {base_url}/reload`
#[derive(Debug, Clone)]
pub struct HttpReloadNotifier {
    client: Client,
    reload_url: String,
}

impl HttpReloadNotifier {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            reload_url: format!("{}/reload", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ReloadNotifier for HttpReloadNotifier {
    async fn notify_reload(&self) -> Result<ReloadAck, NotifyError> {
        let response = self
            .client
            .post(&self.reload_url)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: ReloadResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::Transport(format!("malformed reload response: {}", e)))?;

        info!(
            url = %self.reload_url,
            status = %body.status,
            model_f1_score = body.model_f1_score,
            "Inference service reloaded"
        );

        Ok(ReloadAck {
            model_version: body.model_version,
            model_f1_score: body.model_f1_score,
        })
    }

    fn describe(&self) -> String {
        self.reload_url.clone()
    }
}
