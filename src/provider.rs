use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    dns::{normalise_name, Changes, DomainFilter, Endpoint},
    error::{ProviderError, Result},
    model::{is_supported, normalise_endpoint, to_endpoints},
    plan::{self, Operation},
    registrar::{RegistrarClient, ZoneJob},
};

// ─────────────────────────────────────────────────────────────────────────────
// Apply report
// ─────────────────────────────────────────────────────────────────────────────

/// What happened in one zone. Operations after the first failure are
/// skipped, never rolled back.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneReport {
    pub zone: String,
    pub applied: Vec<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<Operation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderError>,
}

impl ZoneReport {
    fn new(zone: String) -> Self {
        Self {
            zone,
            applied: vec![],
            failed: None,
            skipped: vec![],
            error: None,
        }
    }

    fn aborted(zone: String, error: ProviderError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(zone)
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// The batch after filtering and normalisation.
    pub accepted: Changes,
    pub zones: Vec<ZoneReport>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.zones.iter().all(ZoneReport::is_success)
    }

    pub fn first_error(&self) -> Option<&ProviderError> {
        self.zones.iter().find_map(|z| z.error.as_ref())
    }

    pub fn applied(&self) -> usize {
        self.zones.iter().map(|z| z.applied.len()).sum()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// The reconciliation engine behind the webhook. Holds no record state;
/// every call reads Porkbun afresh.
pub struct Provider {
    filter: DomainFilter,
    default_ttl: u32,
    deadline: Duration,
    client: Arc<RegistrarClient>,
}

impl Provider {
    pub fn new(cfg: &Config, client: RegistrarClient) -> Self {
        Self {
            filter: DomainFilter::new(cfg.domain_filter_list()),
            default_ttl: cfg.default_ttl,
            deadline: cfg.request_timeout(),
            client: Arc::new(client),
        }
    }

    pub fn domain_filter(&self) -> &DomainFilter {
        &self.filter
    }

    pub fn is_dry_run(&self) -> bool {
        self.client.is_dry_run()
    }

    /// Account domains that overlap the domain filter, sorted.
    pub async fn managed_zones(&self) -> Result<Vec<String>> {
        let mut zones: Vec<String> = self
            .client
            .list_zones()
            .await?
            .iter()
            .map(|z| normalise_name(z))
            .filter(|z| self.filter.overlaps_zone(z))
            .collect();
        zones.sort();
        zones.dedup();
        debug!("managed zones: {zones:?}");
        Ok(zones)
    }

    // ── records ──────────────────────────────────────────────────────────────

    pub async fn records(&self) -> Result<Vec<Endpoint>> {
        self.records_within(self.deadline).await
    }

    /// Every endpoint inside the domain filter. One failing zone fails the
    /// whole listing.
    pub async fn records_within(&self, deadline: Duration) -> Result<Vec<Endpoint>> {
        tokio::time::timeout(deadline, self.fetch_records())
            .await
            .map_err(|_| ProviderError::Timeout(deadline))?
    }

    async fn fetch_records(&self) -> Result<Vec<Endpoint>> {
        let zones = self.managed_zones().await?;

        let mut tasks = JoinSet::new();
        for (idx, zone) in zones.into_iter().enumerate() {
            let client = Arc::clone(&self.client);
            tasks.spawn(async move {
                let records = client.list_records(&zone).await;
                (idx, zone, records)
            });
        }

        let mut per_zone = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (idx, zone, records) = joined.map_err(|e| ProviderError::Internal(e.to_string()))?;
            let records = records.map_err(|e| {
                error!("listing {zone} failed: {e}");
                e
            })?;
            per_zone.push((idx, to_endpoints(&zone, &records)));
        }
        per_zone.sort_by_key(|(idx, _)| *idx);

        Ok(per_zone
            .into_iter()
            .flat_map(|(_, eps)| eps)
            .filter(|ep| self.filter.matches(&ep.dns_name))
            .collect())
    }

    // ── adjust ───────────────────────────────────────────────────────────────

    /// Proposed endpoints as this provider would store them. Names outside
    /// the domain filter and types Porkbun cannot hold are dropped, so the
    /// controller never plans them into a change batch.
    pub fn adjust_endpoints(&self, endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
        endpoints
            .into_iter()
            .filter(|ep| {
                if !self.filter.matches(&ep.dns_name) {
                    debug!("adjust: dropping {} outside the domain filter", ep.dns_name);
                    return false;
                }
                if !is_supported(&ep.record_type) {
                    warn!(
                        "adjust: dropping {} {}, record type not supported",
                        ep.record_type, ep.dns_name
                    );
                    return false;
                }
                true
            })
            .map(|ep| normalise_endpoint(ep, self.default_ttl))
            .collect()
    }

    // ── apply ────────────────────────────────────────────────────────────────

    pub async fn apply_changes(&self, changes: Changes) -> Result<ApplyReport> {
        self.apply_changes_within(changes, self.deadline).await
    }

    /// Validate → Filter → Plan → Apply.
    ///
    /// Zone tasks are detached: when the deadline passes, the call returns
    /// `Timeout` while mutations already dispatched run to completion.
    pub async fn apply_changes_within(&self, changes: Changes, deadline: Duration) -> Result<ApplyReport> {
        plan::validate(&changes)?;

        let accepted = plan::filter(&changes, &self.filter);
        if accepted.is_empty() {
            info!("nothing to apply inside the domain filter");
            return Ok(ApplyReport {
                accepted,
                zones: vec![],
            });
        }

        tokio::time::timeout(deadline, self.apply_accepted(accepted))
            .await
            .map_err(|_| ProviderError::Timeout(deadline))?
    }

    async fn apply_accepted(&self, accepted: Changes) -> Result<ApplyReport> {
        let zones = self.managed_zones().await?;
        let by_zone = plan::split_by_zone(&accepted, &zones)?;
        for (zone, zone_changes) in &by_zone {
            plan::check_mappable(zone, zone_changes, self.default_ttl)?;
        }

        let handles: Vec<_> = by_zone
            .into_iter()
            .map(|(zone, zone_changes)| {
                let client = Arc::clone(&self.client);
                let ttl = self.default_ttl;
                let handle = tokio::spawn(apply_zone(client, zone.clone(), zone_changes, ttl));
                (zone, handle)
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (zone, handle) in handles {
            let report = handle.await.unwrap_or_else(|e| {
                error!("zone {zone}: task died: {e}");
                ZoneReport::aborted(zone, ProviderError::Internal(e.to_string()))
            });
            reports.push(report);
        }

        let report = ApplyReport {
            accepted,
            zones: reports,
        };
        if report.is_success() {
            info!("applied {} operation(s)", report.applied());
        } else {
            warn!("applied {} operation(s) before failing", report.applied());
        }
        Ok(report)
    }
}

/// Read, plan and write one zone while holding its turn, so a concurrent
/// batch for the same zone plans against what this one left behind.
async fn apply_zone(client: Arc<RegistrarClient>, zone: String, changes: Changes, default_ttl: u32) -> ZoneReport {
    let job = client.zone_job(&zone).await;

    let current = match job.list_records().await {
        Ok(records) => records,
        Err(e) => {
            error!("zone {zone}: cannot read current records: {e}");
            return ZoneReport::aborted(zone, e);
        }
    };

    let zone_plan = match plan::plan_zone(&zone, &changes, &current, default_ttl) {
        Ok(p) => p,
        Err(e) => return ZoneReport::aborted(zone, e),
    };
    info!("zone {zone}: {} operation(s) planned", zone_plan.operations.len());

    let mut report = ZoneReport::new(zone);
    let mut ops = zone_plan.operations.into_iter();
    while let Some(op) = ops.next() {
        info!("zone {}: {op}", report.zone);
        match execute(&job, &op).await {
            Ok(()) => report.applied.push(op),
            Err(e) => {
                error!("zone {}: {op} failed: {e}", report.zone);
                report.failed = Some(op);
                report.error = Some(e);
                report.skipped = ops.collect();
                break;
            }
        }
    }
    report
}

async fn execute(job: &ZoneJob<'_>, op: &Operation) -> Result<()> {
    match op {
        Operation::Create { record } => {
            let id = job.create_record(record).await?;
            debug!("created #{id} in {}", job.zone());
            Ok(())
        }
        Operation::Update { id, to, .. } => job.update_record(id, to).await,
        Operation::Delete { record } => {
            let Some(id) = record.id.as_deref() else {
                return Err(ProviderError::Internal(format!("delete without id: {op}")));
            };
            job.delete_record(id).await
        }
    }
}
