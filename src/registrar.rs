use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    dns::normalise_name,
    error::{ProviderError, Result},
    model::RegistrarRecord,
};

/// Id handed back for records "created" in dry-run mode.
pub const DRY_RUN_ID: &str = "dry-run";

// ─────────────────────────────────────────────────────────────────────────────
// Registrar API seam
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a single registrar request, before any retry decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("rejected with {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl ApiError {
    /// Everything but an explicit rejection may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ApiError::Rejected { .. })
    }
}

/// One-shot registrar calls. Implementations make exactly one request per
/// call; retries and serialization live in [`RegistrarClient`].
#[async_trait]
pub trait RegistrarApi: Send + Sync {
    /// Domains in the account.
    async fn list_zones(&self) -> std::result::Result<Vec<String>, ApiError>;

    async fn list_records(&self, zone: &str) -> std::result::Result<Vec<RegistrarRecord>, ApiError>;

    /// Returns the registrar-assigned id.
    async fn create_record(
        &self,
        zone: &str,
        record: &RegistrarRecord,
    ) -> std::result::Result<String, ApiError>;

    async fn update_record(
        &self,
        zone: &str,
        id: &str,
        record: &RegistrarRecord,
    ) -> std::result::Result<(), ApiError>;

    async fn delete_record(&self, zone: &str, id: &str) -> std::result::Result<(), ApiError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry policy
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
            max_delay: Duration::from_millis(cfg.retry_max_delay_ms),
        }
    }

    /// Backoff before attempt `attempt + 1`: `base * 2^(attempt-1)`, capped,
    /// never zero.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
            .max(Duration::from_millis(1))
    }
}

/// Where the client waits between attempts. Tests swap in a recorder.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Registrar access as the reconciliation engine sees it: bounded retries
/// with exponential backoff, FIFO serialization per zone, and dry-run.
pub struct RegistrarClient {
    api: Arc<dyn RegistrarApi>,
    retry: RetryPolicy,
    dry_run: bool,
    sleeper: Arc<dyn Sleeper>,
    queues: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RegistrarClient {
    pub fn new(api: Arc<dyn RegistrarApi>, cfg: &Config) -> Self {
        Self {
            api,
            retry: RetryPolicy::from_config(cfg),
            dry_run: cfg.dry_run,
            sleeper: Arc::new(TokioSleeper),
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The zone's FIFO queue. tokio's mutex hands out the lock in request
    /// order; the map lock itself is never held across an await.
    fn queue(&self, zone: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues.entry(normalise_name(zone)).or_default().clone()
    }

    /// Wait for the zone's turn. Every call made through the returned job
    /// runs before any other caller touches the zone, so a read, the plan
    /// built on it and the writes that follow form one unit.
    pub async fn zone_job(&self, zone: &str) -> ZoneJob<'_> {
        let turn = self.queue(zone).lock_owned().await;
        ZoneJob {
            client: self,
            zone: zone.to_string(),
            _turn: turn,
        }
    }

    async fn with_retries<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(ApiError::Rejected { status, message }) => {
                    warn!(operation, status, "Porkbun rejected request: {message}");
                    return Err(ProviderError::RegistrarRejected {
                        operation: operation.to_string(),
                        message: format!("HTTP {status}: {message}"),
                    });
                }
                Err(e) if attempt >= self.retry.max_attempts => {
                    error!(operation, attempt, "giving up: {e}");
                    return Err(ProviderError::UpstreamUnavailable {
                        operation: operation.to_string(),
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(operation, attempt, ?delay, "transient failure, backing off: {e}");
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }

    // ── one-shot calls, each taking its own turn on the zone ────────────────

    pub async fn list_zones(&self) -> Result<Vec<String>> {
        self.with_retries("listAll", || self.api.list_zones()).await
    }

    pub async fn list_records(&self, zone: &str) -> Result<Vec<RegistrarRecord>> {
        self.zone_job(zone).await.list_records().await
    }

    pub async fn create_record(&self, zone: &str, record: &RegistrarRecord) -> Result<String> {
        self.zone_job(zone).await.create_record(record).await
    }

    pub async fn update_record(&self, zone: &str, id: &str, record: &RegistrarRecord) -> Result<()> {
        self.zone_job(zone).await.update_record(id, record).await
    }

    pub async fn delete_record(&self, zone: &str, id: &str) -> Result<()> {
        self.zone_job(zone).await.delete_record(id).await
    }
}

/// Exclusive access to one zone. The turn is released on drop.
pub struct ZoneJob<'a> {
    client: &'a RegistrarClient,
    zone: String,
    _turn: tokio::sync::OwnedMutexGuard<()>,
}

impl ZoneJob<'_> {
    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub async fn list_records(&self) -> Result<Vec<RegistrarRecord>> {
        let (client, zone) = (self.client, self.zone.as_str());
        let op = format!("retrieve {zone}");
        client.with_retries(&op, || client.api.list_records(zone)).await
    }

    pub async fn create_record(&self, record: &RegistrarRecord) -> Result<String> {
        let (client, zone) = (self.client, self.zone.as_str());
        if client.dry_run {
            info!(
                "[dry-run] CREATE {} {} → {} (ttl {})",
                record.record_type,
                record.fqdn(zone),
                record.content,
                record.ttl
            );
            return Ok(DRY_RUN_ID.to_string());
        }
        let op = format!("create {} {}", record.record_type, record.fqdn(zone));
        client.with_retries(&op, || client.api.create_record(zone, record)).await
    }

    pub async fn update_record(&self, id: &str, record: &RegistrarRecord) -> Result<()> {
        let (client, zone) = (self.client, self.zone.as_str());
        if client.dry_run {
            info!(
                "[dry-run] UPDATE #{id} {} {} → {} (ttl {})",
                record.record_type,
                record.fqdn(zone),
                record.content,
                record.ttl
            );
            return Ok(());
        }
        let op = format!("edit #{id} {} {}", record.record_type, record.fqdn(zone));
        client.with_retries(&op, || client.api.update_record(zone, id, record)).await
    }

    pub async fn delete_record(&self, id: &str) -> Result<()> {
        let (client, zone) = (self.client, self.zone.as_str());
        if client.dry_run {
            info!("[dry-run] DELETE #{id} in {zone}");
            return Ok(());
        }
        let op = format!("delete #{id} in {zone}");
        client.with_retries(&op, || client.api.delete_record(zone, id)).await
    }
}
