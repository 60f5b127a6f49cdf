use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// external-dns webhook contract types
// ─────────────────────────────────────────────────────────────────────────────

/// A provider-specific property attached to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpecific {
    pub name: String,
    pub value: String,
}

/// One DNS endpoint as external-dns understands it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub dns_name: String,
    pub record_type: String,
    #[serde(default)]
    pub targets: Vec<String>,
    /// 0 means "not set"; the provider default applies.
    #[serde(default, rename = "recordTTL", alias = "recordTtl")]
    pub record_ttl: u32,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_specific: Vec<ProviderSpecific>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub set_identifier: String,
}

/// Identity of an endpoint inside a change batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    pub name: String,
    pub record_type: String,
    pub set_identifier: String,
}

impl Endpoint {
    pub fn new(dns_name: &str, record_type: &str, targets: &[&str]) -> Self {
        Self {
            dns_name: dns_name.to_string(),
            record_type: record_type.to_string(),
            targets: targets.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.record_ttl = ttl;
        self
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey {
            name: normalise_name(&self.dns_name),
            record_type: self.record_type.to_ascii_uppercase(),
            set_identifier: self.set_identifier.clone(),
        }
    }
}

/// The payload sent by external-dns to POST /records.
///
/// external-dns serialises the field names in PascalCase; camelCase is
/// accepted as well.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changes {
    #[serde(default, alias = "Create")]
    pub create: Vec<Endpoint>,
    #[serde(default, alias = "UpdateOld")]
    pub update_old: Vec<Endpoint>,
    #[serde(default, alias = "UpdateNew")]
    pub update_new: Vec<Endpoint>,
    #[serde(default, alias = "Delete")]
    pub delete: Vec<Endpoint>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty()
            && self.update_old.is_empty()
            && self.update_new.is_empty()
            && self.delete.is_empty()
    }

    pub fn len(&self) -> usize {
        self.create.len() + self.update_old.len() + self.update_new.len() + self.delete.len()
    }

    /// Keep only the endpoints `keep` accepts, in every set.
    pub fn retain(&self, mut keep: impl FnMut(&Endpoint) -> bool) -> Changes {
        let mut pick = |eps: &[Endpoint]| -> Vec<Endpoint> {
            eps.iter().filter(|ep| keep(ep)).cloned().collect()
        };
        Changes {
            create: pick(&self.create),
            update_old: pick(&self.update_old),
            update_new: pick(&self.update_new),
            delete: pick(&self.delete),
        }
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.create
            .iter()
            .chain(&self.update_old)
            .chain(&self.update_new)
            .chain(&self.delete)
    }
}

/// Domain-filter response for GET /
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainFilter {
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl DomainFilter {
    pub fn new(include: Vec<String>) -> Self {
        Self {
            include: include.iter().map(|d| normalise_name(d)).collect(),
            exclude: vec![],
        }
    }

    /// True when `name` is one of the included suffixes or lies below one.
    pub fn matches(&self, name: &str) -> bool {
        let name = normalise_name(name);
        self.include.iter().any(|d| is_within(&name, d))
            && !self.exclude.iter().any(|d| is_within(&name, d))
    }

    /// True when some name inside `zone` could pass the filter.
    pub fn overlaps_zone(&self, zone: &str) -> bool {
        let zone = normalise_name(zone);
        self.include
            .iter()
            .any(|d| is_within(&zone, d) || is_within(d, &zone))
    }
}

/// Lowercase a DNS name and drop the trailing dot.
pub fn normalise_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// `name` equals `suffix` or sits below it on a label boundary.
/// Both sides must already be normalised.
pub fn is_within(name: &str, suffix: &str) -> bool {
    name == suffix
        || (name.len() > suffix.len()
            && name.ends_with(suffix)
            && name.as_bytes()[name.len() - suffix.len() - 1] == b'.')
}
