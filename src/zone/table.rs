use super::Zone;
use crate::dns::name;
use crate::error::ConfigError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Name-indexed collection of published zones.
///
/// The lock guards the map only. Zones are immutable and handed out as
/// `Arc<Zone>`, so a reader keeps a consistent snapshot after the lock is
/// released and a replaced zone is freed once its last reader is done.
pub struct ZoneTable {
    zones: RwLock<HashMap<String, Arc<Zone>>>,
    /// Coarse list of names this server claims authority under
    origins: RwLock<Vec<String>>,
}

impl ZoneTable {
    /// Create an empty table serving under `origins`.
    ///
    /// Origins are normalised to FQDNs; duplicates are rejected so that
    /// longest-suffix matching never ties.
    pub fn new<I, S>(origins: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for origin in origins {
            let origin = name::fqdn(origin.as_ref());
            if !name::is_valid_fqdn(&origin) {
                return Err(ConfigError::InvalidOrigin(origin));
            }
            if normalized.contains(&origin) {
                return Err(ConfigError::DuplicateOrigin(origin));
            }
            normalized.push(origin);
        }

        Ok(Self {
            zones: RwLock::new(HashMap::new()),
            origins: RwLock::new(normalized),
        })
    }

    /// Current zone for exactly `zone_name`
    pub fn lookup(&self, zone_name: &str) -> Option<Arc<Zone>> {
        self.zones.read().get(zone_name).cloned()
    }

    /// Insert or overwrite one zone, returning the one it supersedes
    pub fn replace(&self, zone_name: &str, zone: Arc<Zone>) -> Option<Arc<Zone>> {
        let previous = self.zones.write().insert(zone_name.to_string(), zone);
        match &previous {
            Some(old) => debug!("Replaced zone {} (serial {})", zone_name, old.serial),
            None => info!("Added zone {}", zone_name),
        }
        previous
    }

    pub fn remove(&self, zone_name: &str) -> Option<Arc<Zone>> {
        let removed = self.zones.write().remove(zone_name);
        if removed.is_some() {
            info!("Removed zone {}", zone_name);
        }
        removed
    }

    /// Snapshot of the zone names currently served
    pub fn names(&self) -> Vec<String> {
        self.zones.read().keys().cloned().collect()
    }

    /// Snapshot of the configured origins
    pub fn origins(&self) -> Vec<String> {
        self.origins.read().clone()
    }

    pub fn len(&self) -> usize {
        self.zones.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.read().is_empty()
    }

    /// Zone serving `qname` by longest-suffix match over the served names
    pub fn find_zone(&self, qname: &str) -> Option<Arc<Zone>> {
        let names = self.names();
        let zone_name = name::longest_match(&names, &name::fqdn(qname))?;
        self.lookup(zone_name)
    }

    /// Whether some configured origin covers `qname`
    pub fn covers(&self, qname: &str) -> bool {
        let origins = self.origins();
        name::longest_match(&origins, &name::fqdn(qname)).is_some()
    }
}
