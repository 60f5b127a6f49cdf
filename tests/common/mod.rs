//! In-memory stand-in for the Porkbun API, shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use porkbun_webhook::{
    config::Config,
    model::RegistrarRecord,
    provider::Provider,
    registrar::{ApiError, RegistrarApi, RegistrarClient, Sleeper},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    ListZones,
    List,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListZones,
    List(String),
    Create(String, RegistrarRecord),
    Update(String, String, RegistrarRecord),
    Delete(String, String),
}

impl Call {
    pub fn kind(&self) -> Kind {
        match self {
            Call::ListZones => Kind::ListZones,
            Call::List(_) => Kind::List,
            Call::Create(..) => Kind::Create,
            Call::Update(..) => Kind::Update,
            Call::Delete(..) => Kind::Delete,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self.kind(), Kind::Create | Kind::Update | Kind::Delete)
    }
}

struct Failure {
    kind: Kind,
    zone: Option<String>,
    error: ApiError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Default)]
struct State {
    zones: BTreeMap<String, Vec<RegistrarRecord>>,
    next_id: u64,
    calls: Vec<Call>,
    failures: Vec<Failure>,
    list_delay: Option<Duration>,
    panic_listing: Option<String>,
}

/// Keeps zones and records in memory, logs every call, and fails on cue.
#[derive(Default)]
pub struct FakeRegistrar {
    state: Mutex<State>,
}

impl FakeRegistrar {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_zone(&self, zone: &str) {
        self.state.lock().unwrap().zones.entry(zone.to_string()).or_default();
    }

    /// Seed a record; returns its id.
    pub fn seed(&self, zone: &str, name: &str, rtype: &str, content: &str, ttl: u32) -> String {
        let mut st = self.state.lock().unwrap();
        st.next_id += 1;
        let id = format!("{}", 1000 + st.next_id);
        let priority = matches!(rtype, "MX" | "SRV").then_some(10);
        st.zones.entry(zone.to_string()).or_default().push(RegistrarRecord {
            id: Some(id.clone()),
            name: name.to_string(),
            record_type: rtype.to_string(),
            content: content.to_string(),
            ttl,
            priority,
        });
        id
    }

    pub fn records(&self, zone: &str) -> Vec<RegistrarRecord> {
        self.state.lock().unwrap().zones.get(zone).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Fail the next `times` calls of `kind` (in `zone`, when given).
    pub fn fail(&self, kind: Kind, zone: Option<&str>, error: ApiError, times: Option<u32>) {
        self.state.lock().unwrap().failures.push(Failure {
            kind,
            zone: zone.map(str::to_string),
            error,
            remaining: times,
        });
    }

    pub fn delay_listing(&self, delay: Duration) {
        self.state.lock().unwrap().list_delay = Some(delay);
    }

    /// Panic inside `list_records` for `zone`.
    pub fn panic_listing(&self, zone: &str) {
        self.state.lock().unwrap().panic_listing = Some(zone.to_string());
    }

    /// Log the call and return a scripted failure if one matches.
    fn enter(&self, call: Call, zone: Option<&str>) -> Result<(), ApiError> {
        let mut st = self.state.lock().unwrap();
        let kind = call.kind();
        st.calls.push(call);
        for f in st.failures.iter_mut() {
            let zone_matches = f.zone.is_none() || f.zone.as_deref() == zone;
            if f.kind == kind && zone_matches && f.remaining != Some(0) {
                if let Some(n) = f.remaining.as_mut() {
                    *n -= 1;
                }
                return Err(f.error.clone());
            }
        }
        Ok(())
    }

    fn missing_zone(zone: &str) -> ApiError {
        ApiError::Rejected {
            status: 400,
            message: format!("Invalid domain {zone}."),
        }
    }
}

#[async_trait]
impl RegistrarApi for FakeRegistrar {
    async fn list_zones(&self) -> Result<Vec<String>, ApiError> {
        self.enter(Call::ListZones, None)?;
        Ok(self.state.lock().unwrap().zones.keys().cloned().collect())
    }

    async fn list_records(&self, zone: &str) -> Result<Vec<RegistrarRecord>, ApiError> {
        self.enter(Call::List(zone.to_string()), Some(zone))?;
        let (delay, panics) = {
            let st = self.state.lock().unwrap();
            (st.list_delay, st.panic_listing.as_deref() == Some(zone))
        };
        if panics {
            panic!("listing {zone} blew up");
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state
            .lock()
            .unwrap()
            .zones
            .get(zone)
            .cloned()
            .ok_or_else(|| Self::missing_zone(zone))
    }

    async fn create_record(&self, zone: &str, record: &RegistrarRecord) -> Result<String, ApiError> {
        self.enter(Call::Create(zone.to_string(), record.clone()), Some(zone))?;
        let mut st = self.state.lock().unwrap();
        st.next_id += 1;
        let id = format!("{}", 1000 + st.next_id);
        let records = st.zones.get_mut(zone).ok_or_else(|| Self::missing_zone(zone))?;
        records.push(RegistrarRecord {
            id: Some(id.clone()),
            ..record.clone()
        });
        Ok(id)
    }

    async fn update_record(&self, zone: &str, id: &str, record: &RegistrarRecord) -> Result<(), ApiError> {
        self.enter(Call::Update(zone.to_string(), id.to_string(), record.clone()), Some(zone))?;
        let mut st = self.state.lock().unwrap();
        let records = st.zones.get_mut(zone).ok_or_else(|| Self::missing_zone(zone))?;
        let existing = records
            .iter_mut()
            .find(|r| r.id.as_deref() == Some(id))
            .ok_or_else(|| ApiError::Rejected {
                status: 400,
                message: "Invalid record ID.".into(),
            })?;
        *existing = RegistrarRecord {
            id: Some(id.to_string()),
            ..record.clone()
        };
        Ok(())
    }

    async fn delete_record(&self, zone: &str, id: &str) -> Result<(), ApiError> {
        self.enter(Call::Delete(zone.to_string(), id.to_string()), Some(zone))?;
        let mut st = self.state.lock().unwrap();
        let records = st.zones.get_mut(zone).ok_or_else(|| Self::missing_zone(zone))?;
        records.retain(|r| r.id.as_deref() != Some(id));
        Ok(())
    }
}

/// Records backoff requests without waiting.
#[derive(Default)]
pub struct RecordingSleeper {
    pub slept: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

pub fn config(domain_filter: &[&str]) -> Config {
    let mut cfg = Config::new("pk1_test", "sk1_test", domain_filter);
    cfg.max_attempts = 3;
    cfg.retry_base_delay_ms = 50;
    cfg
}

pub fn provider_with(cfg: &Config, fake: &Arc<FakeRegistrar>) -> (Provider, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let client = RegistrarClient::new(fake.clone(), cfg).with_sleeper(sleeper.clone());
    (Provider::new(cfg, client), sleeper)
}

pub fn provider(domain_filter: &[&str], fake: &Arc<FakeRegistrar>) -> Provider {
    provider_with(&config(domain_filter), fake).0
}
