//! Turning a change batch into registrar operations, zone by zone.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fmt,
};

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    dns::{is_within, normalise_name, Changes, DomainFilter, Endpoint, EndpointKey},
    error::{ProviderError, Result},
    model::{to_registrar_records, RegistrarRecord},
};

/// One registrar call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Create { record: RegistrarRecord },
    /// Edit in place; keeps the record id so the name never disappears.
    Update {
        id: String,
        from: RegistrarRecord,
        to: RegistrarRecord,
    },
    Delete { record: RegistrarRecord },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create { record: r } => {
                write!(f, "CREATE {} {:?} {} ttl={}", r.record_type, r.name, r.content, r.ttl)
            }
            Operation::Update { id, from, to } => write!(
                f,
                "UPDATE #{id} {} {:?} {} ttl={} → {} ttl={}",
                to.record_type, to.name, from.content, from.ttl, to.content, to.ttl
            ),
            Operation::Delete { record: r } => write!(
                f,
                "DELETE #{} {} {:?} {}",
                r.id.as_deref().unwrap_or("?"),
                r.record_type,
                r.name,
                r.content
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZonePlan {
    pub zone: String,
    /// Creates and updates first, deletes last.
    pub operations: Vec<Operation>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Validate / Filter
// ─────────────────────────────────────────────────────────────────────────────

/// Reject batches whose intent is ambiguous.
pub fn validate(changes: &Changes) -> Result<()> {
    fn unique(set: &str, eps: &[Endpoint]) -> Result<HashSet<EndpointKey>> {
        let mut seen = HashSet::new();
        for ep in eps {
            if !seen.insert(ep.key()) {
                return Err(ProviderError::invalid(format!(
                    "{set} lists {} {} more than once",
                    ep.record_type, ep.dns_name
                )));
            }
        }
        Ok(seen)
    }

    let creates = unique("create", &changes.create)?;
    unique("updateNew", &changes.update_new)?;
    if let Some(ep) = changes.delete.iter().find(|ep| creates.contains(&ep.key())) {
        return Err(ProviderError::invalid(format!(
            "{} {} is both created and deleted",
            ep.record_type, ep.dns_name
        )));
    }
    Ok(())
}

/// Drop endpoints outside the domain filter.
pub fn filter(changes: &Changes, domain_filter: &DomainFilter) -> Changes {
    let accepted = changes.retain(|ep| domain_filter.matches(&ep.dns_name));
    let dropped = changes.len() - accepted.len();
    if dropped > 0 {
        info!("dropped {dropped} endpoint(s) outside the domain filter");
    }
    accepted
}

/// The longest managed zone containing `name`.
pub fn zone_for<'a>(name: &str, zones: &'a [String]) -> Option<&'a str> {
    let name = normalise_name(name);
    zones
        .iter()
        .filter(|z| is_within(&name, z))
        .max_by_key(|z| z.len())
        .map(String::as_str)
}

/// Split a batch into per-zone batches. Every endpoint must land in a zone.
pub fn split_by_zone(changes: &Changes, zones: &[String]) -> Result<BTreeMap<String, Changes>> {
    if let Some(ep) = changes.endpoints().find(|ep| zone_for(&ep.dns_name, zones).is_none()) {
        return Err(ProviderError::invalid(format!(
            "{} is not inside any Porkbun zone of this account",
            ep.dns_name
        )));
    }

    let zone_of = |ep: &Endpoint| zone_for(&ep.dns_name, zones).unwrap_or_default().to_string();
    let mut out: BTreeMap<String, Changes> = BTreeMap::new();
    for ep in &changes.create {
        out.entry(zone_of(ep)).or_default().create.push(ep.clone());
    }
    for ep in &changes.update_old {
        out.entry(zone_of(ep)).or_default().update_old.push(ep.clone());
    }
    for ep in &changes.update_new {
        out.entry(zone_of(ep)).or_default().update_new.push(ep.clone());
    }
    for ep in &changes.delete {
        out.entry(zone_of(ep)).or_default().delete.push(ep.clone());
    }
    Ok(out)
}

fn explode(zone: &str, eps: &[Endpoint], default_ttl: u32) -> Result<Vec<RegistrarRecord>> {
    let mut out = Vec::new();
    for ep in eps {
        out.extend(
            to_registrar_records(zone, ep, default_ttl)
                .map_err(|e| ProviderError::invalid(e.to_string()))?,
        );
    }
    Ok(out)
}

/// Fail early when any endpoint of a zone batch cannot be expressed as
/// registrar records.
pub fn check_mappable(zone: &str, changes: &Changes, default_ttl: u32) -> Result<()> {
    explode(zone, &changes.create, default_ttl)?;
    explode(zone, &changes.update_old, default_ttl)?;
    explode(zone, &changes.update_new, default_ttl)?;
    explode(zone, &changes.delete, default_ttl)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Plan
// ─────────────────────────────────────────────────────────────────────────────

type RecordKey = (String, String);

fn key_of(r: &RegistrarRecord) -> RecordKey {
    (r.name.to_ascii_lowercase(), r.record_type.to_ascii_uppercase())
}

/// Diff one zone's batch against its current records, per target value.
///
/// Added values already present stay untouched (or get a TTL edit). New
/// values reuse a record whose value is being removed under the same
/// name/type before falling back to a create. Whatever removed value is
/// left over is deleted, after all creates and updates.
pub fn plan_zone(
    zone: &str,
    changes: &Changes,
    current: &[RegistrarRecord],
    default_ttl: u32,
) -> Result<ZonePlan> {
    let mut added = explode(zone, &changes.create, default_ttl)?;
    added.extend(explode(zone, &changes.update_new, default_ttl)?);
    let mut removed = explode(zone, &changes.update_old, default_ttl)?;
    removed.extend(explode(zone, &changes.delete, default_ttl)?);

    let keys: BTreeSet<RecordKey> = added.iter().chain(&removed).map(key_of).collect();

    let mut writes = Vec::new();
    let mut deletes = Vec::new();

    for key in keys {
        let existing: Vec<&RegistrarRecord> = current
            .iter()
            .filter(|r| r.id.is_some() && key_of(r) == key)
            .collect();
        let mut used = vec![false; existing.len()];

        let mut adds: Vec<&RegistrarRecord> = Vec::new();
        for a in added.iter().filter(|r| key_of(r) == key) {
            if !adds.iter().any(|x| x.same_value(a)) {
                adds.push(a);
            }
        }
        let rems: Vec<&RegistrarRecord> = removed.iter().filter(|r| key_of(r) == key).collect();
        let is_removed = |r: &RegistrarRecord| rems.iter().any(|x| x.same_value(r));

        // Values that already exist.
        let mut pending = Vec::new();
        for a in adds {
            match (0..existing.len()).find(|&i| !used[i] && existing[i].same_value(a)) {
                Some(i) => {
                    used[i] = true;
                    if existing[i].ttl != a.ttl {
                        writes.push(update(existing[i], a));
                    }
                }
                None => pending.push(a),
            }
        }

        // New values: recycle a record on its way out, else create.
        for a in pending {
            match (0..existing.len()).find(|&i| !used[i] && is_removed(existing[i])) {
                Some(i) => {
                    used[i] = true;
                    writes.push(update(existing[i], a));
                }
                None => writes.push(Operation::Create { record: a.clone() }),
            }
        }

        for (i, e) in existing.iter().enumerate() {
            if !used[i] && is_removed(*e) {
                deletes.push(Operation::Delete { record: (*e).clone() });
            }
        }
    }

    let mut operations = writes;
    operations.extend(deletes);
    debug!(zone, operations = operations.len(), "planned");
    Ok(ZonePlan {
        zone: zone.to_string(),
        operations,
    })
}

fn update(existing: &RegistrarRecord, desired: &RegistrarRecord) -> Operation {
    let id = existing.id.clone().unwrap_or_default();
    Operation::Update {
        id: id.clone(),
        from: existing.clone(),
        to: RegistrarRecord {
            id: Some(id),
            ..desired.clone()
        },
    }
}
