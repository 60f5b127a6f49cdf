use std::fmt;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    config::Config,
    model::{relative_name, RegistrarRecord},
    registrar::{ApiError, RegistrarApi},
};

/// `domain/listAll` returns at most this many domains per page.
const LIST_ALL_PAGE_SIZE: usize = 1000;

// ─────────────────────────────────────────────────────────────────────────────
// Porkbun API shapes (partial – only what we need)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// A record as `dns/retrieve` returns it. Names are fully qualified,
/// numbers arrive as strings.
#[derive(Debug, Deserialize)]
pub struct PorkbunRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub rrtype: String,
    pub content: String,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub ttl: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub prio: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    records: Vec<PorkbunRecord>,
}

#[derive(Debug, Deserialize)]
struct DomainStub {
    domain: String,
}

#[derive(Debug, Deserialize)]
struct ListAllResponse {
    #[serde(default)]
    domains: Vec<DomainStub>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct PingResponse {
    #[serde(default, rename = "yourIp")]
    your_ip: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Porkbun JSON API v3. One HTTP request per call; credentials travel in
/// every request body.
#[derive(Clone)]
pub struct PorkbunApi {
    http: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
}

impl fmt::Debug for PorkbunApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PorkbunApi")
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .field("secret_key", &"<REDACTED>")
            .finish()
    }
}

impl PorkbunApi {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(cfg.http_timeout())
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            http,
            base_url: cfg.api_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            secret_key: cfg.secret_key.clone(),
        })
    }

    /// Check the credentials. Returns the caller IP Porkbun saw.
    pub async fn ping(&self) -> Result<String, ApiError> {
        let resp: PingResponse = self.post("ping", json!({})).await?;
        Ok(resp.your_ip.unwrap_or_default())
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, mut body: Value) -> Result<T, ApiError> {
        let url = format!("{}/{}", self.base_url, path);
        if let Value::Object(ref mut map) = body {
            map.insert("apikey".into(), Value::String(self.api_key.clone()));
            map.insert("secretapikey".into(), Value::String(self.secret_key.clone()));
        }

        debug!("POST {url}");
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("POST /{path}: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Transport(format!("reading /{path} response: {e}")))?;

        classify(status, &text)?;
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(format!("/{path}: {e}")))
    }
}

#[async_trait]
impl RegistrarApi for PorkbunApi {
    async fn list_zones(&self) -> Result<Vec<String>, ApiError> {
        let mut zones = Vec::new();
        let mut start = 0usize;
        loop {
            let page: ListAllResponse = self
                .post("domain/listAll", json!({ "start": start.to_string() }))
                .await?;
            let count = page.domains.len();
            zones.extend(page.domains.into_iter().map(|d| d.domain.to_ascii_lowercase()));
            if count < LIST_ALL_PAGE_SIZE {
                break;
            }
            start += count;
        }
        debug!("listAll → {} domain(s)", zones.len());
        Ok(zones)
    }

    async fn list_records(&self, zone: &str) -> Result<Vec<RegistrarRecord>, ApiError> {
        let resp: RetrieveResponse = self.post(&format!("dns/retrieve/{zone}"), json!({})).await?;
        let records = resp
            .records
            .into_iter()
            .filter_map(|r| match relative_name(&r.name, zone) {
                Some(name) => Some(from_wire(r, name)),
                None => {
                    warn!("record {} ({}) is not inside zone {zone}; ignoring", r.id, r.name);
                    None
                }
            })
            .collect::<Vec<_>>();
        debug!("retrieve {zone} → {} record(s)", records.len());
        Ok(records)
    }

    async fn create_record(&self, zone: &str, record: &RegistrarRecord) -> Result<String, ApiError> {
        let resp: CreateResponse = self
            .post(&format!("dns/create/{zone}"), record_body(record))
            .await?;
        Ok(resp.id)
    }

    async fn update_record(&self, zone: &str, id: &str, record: &RegistrarRecord) -> Result<(), ApiError> {
        let _: Envelope = self
            .post(&format!("dns/edit/{zone}/{id}"), record_body(record))
            .await?;
        Ok(())
    }

    async fn delete_record(&self, zone: &str, id: &str) -> Result<(), ApiError> {
        let _: Envelope = self.post(&format!("dns/delete/{zone}/{id}"), json!({})).await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Sort one response into success or one of the [`ApiError`] classes.
///
/// Porkbun answers errors with `{"status":"ERROR","message":…}`, sometimes
/// with a 200. Rate limiting shows up as 429/503 or as an ERROR message.
fn classify(status: StatusCode, body: &str) -> Result<(), ApiError> {
    let envelope = serde_json::from_str::<Envelope>(body).ok();
    let message = envelope
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| snippet(body));

    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        return Err(ApiError::RateLimited(message));
    }
    if status.is_server_error() {
        return Err(ApiError::Server { status: status.as_u16(), message });
    }
    if status.is_client_error() {
        if mentions_rate_limit(&message) {
            return Err(ApiError::RateLimited(message));
        }
        return Err(ApiError::Rejected { status: status.as_u16(), message });
    }

    match envelope {
        None => Err(ApiError::Decode(format!("HTTP {status}: {}", snippet(body)))),
        Some(e) if e.status.eq_ignore_ascii_case("SUCCESS") => Ok(()),
        Some(_) if mentions_rate_limit(&message) => Err(ApiError::RateLimited(message)),
        Some(_) => Err(ApiError::Rejected { status: status.as_u16(), message }),
    }
}

fn mentions_rate_limit(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("rate limit") || m.contains("too many requests")
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

fn from_wire(r: PorkbunRecord, name: String) -> RegistrarRecord {
    let record_type = r.rrtype.to_ascii_uppercase();
    let priority = match record_type.as_str() {
        "MX" | "SRV" => Some(r.prio.unwrap_or(0)),
        _ => None,
    };
    RegistrarRecord {
        id: Some(r.id),
        name,
        record_type,
        content: r.content,
        ttl: r.ttl.unwrap_or(0),
        priority,
    }
}

fn record_body(record: &RegistrarRecord) -> Value {
    let mut body = json!({
        "name": record.name,
        "type": record.record_type,
        "content": record.content,
        "ttl": record.ttl.to_string(),
    });
    if let Some(prio) = record.priority {
        body["prio"] = Value::String(prio.to_string());
    }
    body
}

fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    match Value::deserialize(de)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {other}"))),
    }
}

/// Accepts `"600"`, `600`, `""` and `null`.
fn lenient_u32<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u32>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => None,
    })
}
