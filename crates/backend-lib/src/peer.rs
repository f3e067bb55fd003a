//! Link to the secondary instance.
//!
//! Failover is a best-effort health probe, not leader election. If both
//! instances probe each other while shutting down, both notify their
//! subscribers; that double notification is accepted.
use std::time::Duration;

use async_trait::async_trait;
use meetwatch_common::RawUpdate;
use tracing::{debug, warn};

use crate::error::AppError;

/// Path of the health probe target, relative to the base URL
pub const HEALTH_PATH: &str = "/health";
/// Path of the synchronization target, relative to the base URL
pub const SYNC_PATH: &str = "/sync";

#[async_trait]
pub trait PeerLink: Send + Sync {
    /// `true` only if the peer answered healthy within the probe timeout
    async fn is_healthy(&self) -> bool;

    /// Replay `update` on the peer as a silent update
    async fn forward(&self, update: &RawUpdate) -> Result<(), AppError>;
}

/// Used when no peer is configured
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPeer;

#[async_trait]
impl PeerLink for NoPeer {
    async fn is_healthy(&self) -> bool {
        false
    }

    async fn forward(&self, _update: &RawUpdate) -> Result<(), AppError> {
        Ok(())
    }
}

/// HTTP link to the peer instance
#[derive(Clone, Debug)]
pub struct HttpPeer {
    client: reqwest::Client,
    base: String,
    health_timeout: Duration,
    forward_timeout: Duration,
}

impl HttpPeer {
    /// `address` is the peer origin, `base_url` the shared route prefix
    pub fn new(address: &str, base_url: &str, health_timeout: Duration, forward_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: format!("{}{}", address.trim_end_matches('/'), base_url.trim_end_matches('/')),
            health_timeout,
            forward_timeout,
        }
    }

    pub fn health_url(&self) -> String {
        format!("{}{HEALTH_PATH}", self.base)
    }

    pub fn sync_url(&self) -> String {
        format!("{}{SYNC_PATH}", self.base)
    }
}

#[async_trait]
impl PeerLink for HttpPeer {
    async fn is_healthy(&self) -> bool {
        let result = self
            .client
            .get(self.health_url())
            .timeout(self.health_timeout)
            .send()
            .await;

        match result {
            Ok(resp) => {
                let healthy = resp.status() == reqwest::StatusCode::OK;
                debug!(status = %resp.status(), healthy, "peer health probe answered");
                healthy
            },
            Err(e) => {
                warn!(error = %e, "peer health probe failed, assuming unhealthy");
                false
            },
        }
    }

    async fn forward(&self, update: &RawUpdate) -> Result<(), AppError> {
        let body = update.clone().silenced();
        self.client
            .post(self.sync_url())
            .timeout(self.forward_timeout)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
