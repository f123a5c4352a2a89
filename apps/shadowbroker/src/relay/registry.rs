//! Upstream proxy registry.

use super::errors::{RelayError, Result};
use crate::config::{Config, UpstreamEntry};
use std::collections::BTreeMap;

/// Outcome of classifying a routing label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub label: String,
    pub direct: bool,
}

/// Label -> upstream endpoint map, fixed at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct UpstreamRegistry {
    upstreams: BTreeMap<String, UpstreamEntry>,
    direct_labels: Vec<String>,
}

impl UpstreamRegistry {
    pub fn new(upstreams: BTreeMap<String, UpstreamEntry>, direct_labels: Vec<String>) -> Self {
        Self {
            upstreams,
            direct_labels,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.upstreams.clone(), cfg.direct_labels.clone())
    }

    pub fn decide(&self, label: &str) -> RoutingDecision {
        RoutingDecision {
            label: label.to_string(),
            direct: self.direct_labels.iter().any(|d| d == label),
        }
    }

    pub fn lookup(&self, label: &str) -> Result<&UpstreamEntry> {
        self.upstreams
            .get(label)
            .ok_or_else(|| RelayError::UnknownUpstream {
                label: label.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }
}
