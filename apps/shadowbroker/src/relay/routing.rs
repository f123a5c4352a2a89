//! Routing policy: maps a destination host to a routing label.

use crate::config::{RouteRule, RoutingConfig};

/// Decides how a destination host is reached. The returned label is either
/// a direct sentinel or the name of an upstream registry entry.
pub trait RouteResolver: Send + Sync {
    fn resolve(&self, host: &str) -> String;
}

impl<F> RouteResolver for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn resolve(&self, host: &str) -> String {
        self(host)
    }
}

/// Domain-suffix rules; the longest matching suffix wins.
#[derive(Debug, Clone)]
pub struct SuffixResolver {
    default: String,
    rules: Vec<RouteRule>,
}

impl SuffixResolver {
    pub fn new(default: impl Into<String>, rules: Vec<RouteRule>) -> Self {
        let mut rules: Vec<RouteRule> = rules
            .into_iter()
            .map(|r| RouteRule {
                suffix: normalize(&r.suffix),
                label: r.label,
            })
            .collect();
        rules.sort_by(|a, b| b.suffix.len().cmp(&a.suffix.len()));
        Self {
            default: default.into(),
            rules,
        }
    }

    pub fn from_config(cfg: &RoutingConfig) -> Self {
        Self::new(cfg.default.clone(), cfg.rules.clone())
    }
}

impl RouteResolver for SuffixResolver {
    fn resolve(&self, host: &str) -> String {
        let host = normalize(host);
        self.rules
            .iter()
            .find(|r| matches_suffix(&host, &r.suffix))
            .map(|r| r.label.clone())
            .unwrap_or_else(|| self.default.clone())
    }
}

fn normalize(s: &str) -> String {
    s.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn matches_suffix(host: &str, suffix: &str) -> bool {
    if host == suffix {
        return true;
    }
    host.len() > suffix.len()
        && host.ends_with(suffix)
        && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
}
