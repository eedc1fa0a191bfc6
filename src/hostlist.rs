//! The set of hosts that route through the encrypted backend path.
//!
//! Loaded once at startup and attached to [`crate::config::TunnelConfig`];
//! unlike the tunnel this relay is descended from, there is no process-wide
//! global here, so tests can build independent host lists side by side.

use std::collections::HashSet;
use std::fs;

use crate::error::ConfigError;

#[derive(Debug)]
pub struct HostList {
    entries: HashSet<String>,
}

impl HostList {
    /// Loads one host pattern per line from `path`. Blank lines are
    /// skipped; duplicates are tolerated silently. Order never matters
    /// since membership is a set lookup.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::HostList {
            path: path.to_string(),
            source,
        })?;

        let entries = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        Ok(HostList { entries })
    }

    /// An empty list that classifies nothing as on-list by membership alone
    /// (the empty-host rule in [`HostList::classify`] still applies).
    pub fn empty() -> Self {
        HostList {
            entries: HashSet::new(),
        }
    }

    /// Builds a host list directly from a set of entries, bypassing file
    /// I/O. Used by tests that need a populated list without a temp file.
    pub fn load_from_set(entries: HashSet<String>) -> Self {
        HostList { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, host: &str) -> bool {
        self.entries.contains(host)
    }

    /// `true` when the registered-domain-normalized `host` should route
    /// through the encrypted backend path. An empty host (the inspector
    /// failed to parse one) defaults to on-list, the safer path.
    pub fn classify(&self, host: &str) -> bool {
        host.is_empty() || self.contains(host)
    }
}

/// Heuristic from the original tunnel: a host looks like a bare IPv4
/// address if, after stripping the dots, what remains parses as an
/// integer. This misclassifies a handful of all-digit DNS labels as IPs,
/// but so did the system this relay replaces, and the cost of a false
/// positive here is just skipping domain-suffix reduction.
pub fn is_ipv4_literal(host: &str) -> bool {
    let stripped: String = host.chars().filter(|c| *c != '.').collect();
    !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit())
}

/// Reduces `host` to its last two dot-separated labels ("registered
/// domain"), unless it looks like an IPv4 literal. Hosts with fewer than
/// two labels are returned unchanged.
pub fn normalize_host(host: &str) -> String {
    if is_ipv4_literal(host) {
        return host.to_string();
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 2 {
        format!("{}.{}", labels[labels.len() - 2], labels[labels.len() - 1])
    } else {
        host.to_string()
    }
}
