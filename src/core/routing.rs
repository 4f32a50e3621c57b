//! Virtual-host routing tables.
//!
//! A [`HostRoutingTable`] maps a normalized host name to the ordered list of
//! [`LocationRule`]s declared for it. Tables are built once when the gateway
//! starts and are read-only afterwards, so lookups need no locking.
use std::{collections::HashMap, fmt, path::PathBuf, sync::Arc, time::Duration};

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::validation::{ValidationError, ValidationResult};

/// Stable identity of a location rule, used as the handler cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub usize);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// What a matched rule hands the request to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleTarget {
    Upstream(String),
    Static { root: PathBuf, index: Vec<String> },
}

/// Headers set on a message, replacing any existing value of the same name.
#[derive(Debug, Clone, Default)]
pub struct HeaderInjection(Vec<(HeaderName, HeaderValue)>);

impl HeaderInjection {
    pub fn from_map(headers: &HashMap<String, String>) -> ValidationResult<Self> {
        let mut pairs = headers
            .iter()
            .map(|(name, value)| {
                let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    ValidationError::InvalidField {
                        field: format!("header '{name}'"),
                        message: "Invalid header name".to_string(),
                    }
                })?;
                let header_value =
                    HeaderValue::from_str(value).map_err(|_| ValidationError::InvalidField {
                        field: format!("header '{name}'"),
                        message: "Invalid header value".to_string(),
                    })?;
                Ok((header_name, header_value))
            })
            .collect::<ValidationResult<Vec<_>>>()?;
        pairs.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        Ok(Self(pairs))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.0 {
            headers.insert(name.clone(), value.clone());
        }
    }
}

/// A (pattern, target) binding under a virtual host.
#[derive(Debug, Clone)]
pub struct LocationRule {
    pub id: RuleId,
    pub pattern: String,
    pub target: RuleTarget,
    /// Per-rule forwarding deadline, overrides the upstream's
    pub timeout: Option<Duration>,
    pub request_headers: HeaderInjection,
    pub response_headers: HeaderInjection,
}

impl LocationRule {
    pub fn upstream_id(&self) -> Option<&str> {
        match &self.target {
            RuleTarget::Upstream(id) => Some(id),
            RuleTarget::Static { .. } => None,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self.target, RuleTarget::Static { .. })
    }
}

#[derive(Debug, Default)]
pub struct HostRoutingTable {
    hosts: HashMap<String, Vec<Arc<LocationRule>>>,
}

impl HostRoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule after every rule already declared for `host`.
    pub fn push_rule(&mut self, host: &str, rule: Arc<LocationRule>) {
        self.hosts
            .entry(normalize_host(host))
            .or_default()
            .push(rule);
    }

    /// Ordered rules for the raw `Host` header value, if the host is known.
    pub fn rules_for(&self, host: &str) -> Option<&[Arc<LocationRule>]> {
        self.hosts.get(&normalize_host(host)).map(Vec::as_slice)
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn rules(&self) -> impl Iterator<Item = &Arc<LocationRule>> {
        self.hosts.values().flatten()
    }
}

/// Lower-case a host and strip any `:port` suffix, keeping IPv6 brackets.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let bare = if host.starts_with('[') {
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            // a second colon means an unbracketed IPv6 literal, leave it alone
            Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
                name
            }
            _ => host,
        }
    };
    bare.to_ascii_lowercase()
}
