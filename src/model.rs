//! Mapping between Porkbun's one-value-per-record model and external-dns
//! endpoints, which carry a list of targets.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::dns::{is_within, normalise_name, Endpoint};

/// Record types this webhook reads and writes.
pub const SUPPORTED_TYPES: &[&str] = &["A", "AAAA", "CNAME", "TXT", "MX", "NS", "SRV", "CAA"];

/// Porkbun silently raises anything lower to this.
pub const MIN_TTL: u32 = 600;

/// A single DNS record as Porkbun stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrarRecord {
    /// Registrar-assigned id; `None` for records not created yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Relative to the zone apex, empty for the apex itself.
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub content: String,
    pub ttl: u32,
    /// MX and SRV only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

impl RegistrarRecord {
    /// Whether both records denote the same target under the same name/type.
    /// TTL and id are not compared.
    pub fn same_value(&self, other: &RegistrarRecord) -> bool {
        self.record_type.eq_ignore_ascii_case(&other.record_type)
            && self.name.eq_ignore_ascii_case(&other.name)
            && self.priority == other.priority
            && if is_host_valued(&self.record_type) {
                self.content.eq_ignore_ascii_case(&other.content)
            } else {
                self.content == other.content
            }
    }

    pub fn fqdn(&self, zone: &str) -> String {
        absolute_name(&self.name, zone)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("unsupported record type {record_type} for {name}")]
    UnsupportedType { name: String, record_type: String },

    #[error("{record_type} target {target:?} for {name} is malformed: {reason}")]
    MalformedTarget {
        name: String,
        record_type: String,
        target: String,
        reason: &'static str,
    },

    #[error("{name} is not inside zone {zone}")]
    OutsideZone { name: String, zone: String },
}

pub fn is_supported(record_type: &str) -> bool {
    SUPPORTED_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(record_type))
}

/// Types whose content (or its last field) is a host name.
fn is_host_valued(record_type: &str) -> bool {
    matches!(
        record_type.to_ascii_uppercase().as_str(),
        "CNAME" | "NS" | "MX" | "SRV"
    )
}

/// Name relative to `zone`, or `None` when `fqdn` is not inside it.
pub fn relative_name(fqdn: &str, zone: &str) -> Option<String> {
    let fqdn = normalise_name(fqdn);
    let zone = normalise_name(zone);
    if fqdn == zone {
        return Some(String::new());
    }
    if is_within(&fqdn, &zone) {
        return Some(fqdn[..fqdn.len() - zone.len() - 1].to_string());
    }
    None
}

pub fn absolute_name(name: &str, zone: &str) -> String {
    let zone = normalise_name(zone);
    let name = normalise_name(name);
    if name.is_empty() {
        zone
    } else {
        format!("{name}.{zone}")
    }
}

fn strip_dot(host: &str) -> &str {
    host.trim().trim_end_matches('.')
}

// ─────────────────────────────────────────────────────────────────────────────
// Registrar → endpoints
// ─────────────────────────────────────────────────────────────────────────────

/// Group a zone's records into endpoints, one per (name, type).
///
/// Targets keep registrar order. Records that cannot be represented are
/// logged and skipped so one odd record never blocks the rest of the zone.
pub fn to_endpoints(zone: &str, records: &[RegistrarRecord]) -> Vec<Endpoint> {
    let mut groups: BTreeMap<(String, String), Endpoint> = BTreeMap::new();

    for rec in records {
        let dns_name = rec.fqdn(zone);
        let target = match endpoint_target(&dns_name, rec) {
            Ok(t) => t,
            Err(e) => {
                warn!(zone, record_id = ?rec.id, "skipping record: {e}");
                continue;
            }
        };

        let record_type = rec.record_type.to_ascii_uppercase();
        let ep = groups
            .entry((dns_name.clone(), record_type.clone()))
            .or_insert_with(|| Endpoint {
                dns_name,
                record_type,
                record_ttl: rec.ttl,
                ..Default::default()
            });
        // Mixed TTLs report the smallest so the controller sees the drift.
        if rec.ttl != ep.record_ttl {
            warn!(
                zone,
                "{} {} has records with TTLs {} and {}",
                ep.record_type, ep.dns_name, ep.record_ttl, rec.ttl
            );
            ep.record_ttl = ep.record_ttl.min(rec.ttl);
        }
        ep.targets.push(target);
    }

    groups.into_values().collect()
}

fn endpoint_target(dns_name: &str, rec: &RegistrarRecord) -> Result<String, MappingError> {
    if !is_supported(&rec.record_type) {
        return Err(MappingError::UnsupportedType {
            name: dns_name.to_string(),
            record_type: rec.record_type.clone(),
        });
    }

    let malformed = |reason| MappingError::MalformedTarget {
        name: dns_name.to_string(),
        record_type: rec.record_type.clone(),
        target: rec.content.clone(),
        reason,
    };

    match rec.record_type.to_ascii_uppercase().as_str() {
        "MX" => Ok(format!("{} {}", rec.priority.unwrap_or(0), strip_dot(&rec.content))),
        "SRV" => {
            let fields: Vec<&str> = rec.content.split_whitespace().collect();
            match fields.as_slice() {
                [weight, port, host] => Ok(format!(
                    "{} {weight} {port} {}",
                    rec.priority.unwrap_or(0),
                    strip_dot(host)
                )),
                _ => Err(malformed("expected \"<weight> <port> <target>\"")),
            }
        }
        "CNAME" | "NS" => Ok(strip_dot(&rec.content).to_string()),
        _ => Ok(rec.content.clone()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Endpoint → registrar
// ─────────────────────────────────────────────────────────────────────────────

/// Explode an endpoint into one registrar record per target.
pub fn to_registrar_records(
    zone: &str,
    ep: &Endpoint,
    default_ttl: u32,
) -> Result<Vec<RegistrarRecord>, MappingError> {
    if !is_supported(&ep.record_type) {
        return Err(MappingError::UnsupportedType {
            name: ep.dns_name.clone(),
            record_type: ep.record_type.clone(),
        });
    }
    let name = relative_name(&ep.dns_name, zone).ok_or_else(|| MappingError::OutsideZone {
        name: ep.dns_name.clone(),
        zone: zone.to_string(),
    })?;
    let record_type = ep.record_type.to_ascii_uppercase();
    let ttl = if ep.record_ttl > 0 { ep.record_ttl } else { default_ttl };

    ep.targets
        .iter()
        .map(|target| {
            let (content, priority) = record_value(&ep.dns_name, &record_type, target)?;
            Ok(RegistrarRecord {
                id: None,
                name: name.clone(),
                record_type: record_type.clone(),
                content,
                ttl,
                priority,
            })
        })
        .collect()
}

/// Split an endpoint target into Porkbun's content and priority fields.
fn record_value(
    dns_name: &str,
    record_type: &str,
    target: &str,
) -> Result<(String, Option<u32>), MappingError> {
    let malformed = |reason| MappingError::MalformedTarget {
        name: dns_name.to_string(),
        record_type: record_type.to_string(),
        target: target.to_string(),
        reason,
    };

    if target.trim().is_empty() {
        return Err(malformed("empty target"));
    }

    match record_type {
        "MX" => {
            let fields: Vec<&str> = target.split_whitespace().collect();
            match fields.as_slice() {
                [prio, host] => {
                    let prio = prio
                        .parse::<u32>()
                        .map_err(|_| malformed("priority is not a number"))?;
                    Ok((strip_dot(host).to_string(), Some(prio)))
                }
                _ => Err(malformed("expected \"<priority> <host>\"")),
            }
        }
        "SRV" => {
            let fields: Vec<&str> = target.split_whitespace().collect();
            match fields.as_slice() {
                [prio, weight, port, host] => {
                    let prio = prio
                        .parse::<u32>()
                        .map_err(|_| malformed("priority is not a number"))?;
                    if weight.parse::<u16>().is_err() || port.parse::<u16>().is_err() {
                        return Err(malformed("weight and port must be numbers"));
                    }
                    Ok((format!("{weight} {port} {}", strip_dot(host)), Some(prio)))
                }
                _ => Err(malformed("expected \"<priority> <weight> <port> <target>\"")),
            }
        }
        "CNAME" | "NS" => Ok((strip_dot(target).to_string(), None)),
        "A" | "AAAA" => Ok((target.trim().to_string(), None)),
        _ => Ok((target.to_string(), None)),
    }
}

/// Canonical form of a proposed endpoint: lowercased name without trailing
/// dot, uppercase type, TTL defaulted and raised to [`MIN_TTL`], host
/// targets without trailing dot.
pub fn normalise_endpoint(mut ep: Endpoint, default_ttl: u32) -> Endpoint {
    ep.dns_name = normalise_name(&ep.dns_name);
    ep.record_type = ep.record_type.to_ascii_uppercase();
    if ep.record_ttl == 0 {
        ep.record_ttl = default_ttl;
    }
    ep.record_ttl = ep.record_ttl.max(MIN_TTL);
    if is_host_valued(&ep.record_type) {
        ep.targets = ep
            .targets
            .iter()
            .map(|t| strip_dot(t).to_string())
            .collect();
    }
    ep
}
