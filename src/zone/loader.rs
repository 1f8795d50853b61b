//! Directory-driven zone loading.
//!
//! Every file in the zone directory whose name matches the configured
//! pattern becomes one zone, named by expanding the template with the
//! pattern's captures. A pass rebuilds files whose modification time or
//! size changed since their last successful build, publishes each rebuilt
//! zone on its own and withdraws zones whose file disappeared. A file that
//! fails to build leaves the previously published version of its zone in
//! place and is tried again on the next pass.

use super::{Zone, ZoneError, ZoneNotifier, ZoneParser, ZoneTable, zone::serial_gt};
use crate::config::AutoConfig;
use crate::dns::name;
use crate::dns::resource::DNSResource;
use crate::error::{ConfigError, LoaderError};
use crate::metrics::AutoMetrics;
use crate::resolver::NameResolver;
use futures::future::join_all;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Outcome of one pass over the zone directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Zones built and published in this pass
    pub loaded: Vec<String>,
    /// Zones whose file did not change
    pub unchanged: Vec<String>,
    /// Zones withdrawn because their file is gone
    pub removed: Vec<String>,
    /// Files that could not be turned into a zone, with the reason
    pub failed: Vec<(String, String)>,
}

/// Requests an immediate rescan of the zone directory
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    tx: mpsc::Sender<()>,
}

impl ReloadHandle {
    /// Handle plus the receiver to pass to [`ZoneLoader::run`]
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        // One pending request is enough, further triggers coalesce
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Ask for a rescan; returns false if one is already pending or the
    /// loader has stopped
    pub fn trigger(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// What a file looked like when it last built successfully
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileState {
    modified: Option<SystemTime>,
    len: u64,
    zone_name: String,
}

/// A zone file admitted by the name pattern
struct Candidate {
    file_name: String,
    path: PathBuf,
    modified: Option<SystemTime>,
    len: u64,
}

pub struct ZoneLoader {
    table: Arc<ZoneTable>,
    directory: PathBuf,
    pattern: Regex,
    template: String,
    interval: Option<Duration>,
    max_file_size: u64,
    resolver: Option<Arc<dyn NameResolver>>,
    notifier: Option<Arc<ZoneNotifier>>,
    metrics: Option<Arc<AutoMetrics>>,
    files: HashMap<PathBuf, FileState>,
    /// Zones this loader has published
    published: HashSet<String>,
}

impl ZoneLoader {
    pub fn new(table: Arc<ZoneTable>, config: &AutoConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            table,
            directory: config.directory.clone(),
            pattern: config.compiled_pattern()?,
            template: config.name_template.clone(),
            interval: config.effective_reload_interval(),
            max_file_size: config.max_zone_file_size,
            resolver: None,
            notifier: None,
            metrics: None,
            files: HashMap::new(),
            published: HashSet::new(),
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<ZoneNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<AutoMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Zone name for a file name, if the pattern admits it
    pub fn zone_name_for(&self, file_name: &str) -> Option<String> {
        let captures = self.pattern.captures(file_name)?;
        let mut expanded = String::new();
        captures.expand(&self.template, &mut expanded);
        Some(name::fqdn(&expanded))
    }

    /// Scan the directory once and publish what changed
    pub async fn reload(&mut self) -> Result<ReloadReport, LoaderError> {
        let candidates = match self.scan().await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("{}", e);
                self.record_reload("failure");
                return Err(e);
            }
        };

        let mut report = ReloadReport::default();
        let mut current: HashSet<String> = HashSet::new();
        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut seen_paths: HashSet<PathBuf> = HashSet::new();

        for candidate in candidates {
            seen_paths.insert(candidate.path.clone());

            let Some(zone_name) = self.zone_name_for(&candidate.file_name) else {
                trace!("Skipping {}: name does not match", candidate.file_name);
                continue;
            };

            if !name::is_valid_fqdn(&zone_name) {
                warn!(
                    "File {} yields invalid zone name {}",
                    candidate.file_name, zone_name
                );
                report.failed.push((
                    candidate.file_name,
                    ZoneError::InvalidDomainName(zone_name).to_string(),
                ));
                continue;
            }

            if let Some(first) = claimed.get(&zone_name) {
                warn!(
                    "File {} also defines zone {}, keeping {}",
                    candidate.file_name, zone_name, first
                );
                report.failed.push((
                    candidate.file_name,
                    format!("zone {} already loaded from {}", zone_name, first),
                ));
                continue;
            }
            claimed.insert(zone_name.clone(), candidate.file_name.clone());

            if !self.table.covers(&zone_name) {
                debug!(
                    "Skipping zone {} from {}: outside the configured origins",
                    zone_name, candidate.file_name
                );
                continue;
            }
            current.insert(zone_name.clone());

            let state = FileState {
                modified: candidate.modified,
                len: candidate.len,
                zone_name: zone_name.clone(),
            };
            if self.files.get(&candidate.path) == Some(&state) {
                trace!("Zone file {} unchanged", candidate.file_name);
                report.unchanged.push(zone_name);
                continue;
            }

            match self.build(&candidate, &zone_name).await {
                Ok(zone) => {
                    // Only a successful build counts, failures retry every pass
                    self.files.insert(candidate.path.clone(), state);
                    self.publish(&zone_name, zone);
                    self.record_build("success");
                    report.loaded.push(zone_name);
                }
                Err(e) => {
                    error!(
                        "Failed to load zone {} from {}: {}",
                        zone_name,
                        candidate.path.display(),
                        e
                    );
                    self.record_build("failure");
                    report.failed.push((candidate.file_name, e.to_string()));
                }
            }
        }

        self.files.retain(|path, _| seen_paths.contains(path));

        let gone: Vec<String> = self
            .published
            .iter()
            .filter(|zone_name| !current.contains(*zone_name))
            .cloned()
            .collect();
        for zone_name in gone {
            self.table.remove(&zone_name);
            self.published.remove(&zone_name);
            report.removed.push(zone_name);
        }

        self.record_reload("success");
        if let Some(metrics) = &self.metrics {
            metrics.set_zones_loaded(self.table.len());
        }

        if report.loaded.is_empty() && report.removed.is_empty() && report.failed.is_empty() {
            debug!(
                "Reload of {}: {} zones unchanged",
                self.directory.display(),
                report.unchanged.len()
            );
        } else {
            info!(
                "Reload of {}: {} loaded, {} unchanged, {} removed, {} failed",
                self.directory.display(),
                report.loaded.len(),
                report.unchanged.len(),
                report.removed.len(),
                report.failed.len()
            );
        }

        Ok(report)
    }

    /// Regular files in the directory, sorted by name
    async fn scan(&self) -> Result<Vec<Candidate>, LoaderError> {
        let scan_error = |e: std::io::Error| LoaderError::Scan {
            path: self.directory.display().to_string(),
            reason: e.to_string(),
        };

        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(scan_error)?;
        let mut candidates = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(scan_error)? {
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };
            let path = entry.path();
            // Follows symlinks
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!("Cannot stat {}: {}", path.display(), e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            candidates.push(Candidate {
                file_name,
                path,
                modified: metadata.modified().ok(),
                len: metadata.len(),
            });
        }

        candidates.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(candidates)
    }

    async fn build(&self, candidate: &Candidate, zone_name: &str) -> Result<Zone, ZoneError> {
        if candidate.len > self.max_file_size {
            return Err(ZoneError::FileTooLarge {
                size: candidate.len,
                limit: self.max_file_size,
            });
        }

        let contents = tokio::fs::read_to_string(&candidate.path).await?;
        if contents.len() as u64 > self.max_file_size {
            return Err(ZoneError::FileTooLarge {
                size: contents.len() as u64,
                limit: self.max_file_size,
            });
        }

        let base_dir = candidate.path.parent().unwrap_or(&self.directory);
        let mut parser = ZoneParser::with_base_dir(base_dir);
        let records = parser.parse_zone(&contents, zone_name)?;
        let zone = Zone::from_records(zone_name, records, None)?.with_source(candidate.path.clone());

        let glue = self.resolve_glue(&zone).await;
        Ok(zone.with_glue(glue))
    }

    /// Addresses of out-of-zone name servers; failed lookups are left out
    async fn resolve_glue(&self, zone: &Zone) -> HashMap<String, Vec<DNSResource>> {
        let Some(resolver) = &self.resolver else {
            return HashMap::new();
        };

        let targets = zone.external_targets();
        let lookups = targets.iter().map(|target| resolver.resolve(target));
        let results = join_all(lookups).await;

        targets
            .into_iter()
            .zip(results)
            .filter_map(|(target, result)| match result {
                Ok(records) if !records.is_empty() => Some((target, records)),
                Ok(_) => None,
                Err(e) => {
                    debug!("No glue for {} in zone {}: {}", target, zone.origin, e);
                    None
                }
            })
            .collect()
    }

    fn publish(&mut self, zone_name: &str, zone: Zone) {
        let previous = self.table.lookup(zone_name);
        let zone = match &previous {
            Some(previous) => zone.with_history(previous),
            None => zone,
        };
        let serial_increased = previous
            .as_ref()
            .is_some_and(|previous| serial_gt(zone.serial, previous.serial));

        info!(
            "Publishing zone {} serial {} ({} records)",
            zone_name,
            zone.serial,
            zone.record_count()
        );
        let zone = Arc::new(zone);
        self.table.replace(zone_name, zone.clone());
        self.published.insert(zone_name.to_string());

        if serial_increased
            && let Some(notifier) = &self.notifier
            && notifier.has_targets()
        {
            let notifier = notifier.clone();
            tokio::spawn(async move {
                notifier.notify(&zone).await;
            });
        }
    }

    /// Load once, then rescan on every tick or trigger until shutdown.
    ///
    /// With reloading disabled only the first pass runs. A pass in
    /// progress always completes before shutdown is observed.
    pub async fn run(
        mut self,
        mut shutdown: broadcast::Receiver<()>,
        mut trigger: mpsc::Receiver<()>,
    ) {
        if let Err(e) = self.reload().await {
            warn!("Initial zone load failed: {}", e);
        }

        let Some(interval) = self.interval else {
            info!("Zone reloading disabled, serving the initial load");
            return;
        };

        info!(
            "Reloading zones from {} every {:?}",
            self.directory.display(),
            interval
        );
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Zone loader shutting down");
                    break;
                }
                _ = ticker.tick() => {}
                Some(()) = trigger.recv() => {
                    debug!("Reload requested");
                }
            }

            if let Err(e) = self.reload().await {
                warn!("Zone reload failed, retrying on next tick: {}", e);
            }
        }
    }

    fn record_reload(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_reload(result);
        }
    }

    fn record_build(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_zone_build(result);
        }
    }
}

/// Trigger a reload whenever something in `directory` changes.
///
/// The returned watcher must be kept alive for events to flow.
pub fn watch_directory(
    directory: &Path,
    handle: ReloadHandle,
) -> Result<RecommendedWatcher, notify::Error> {
    let mut watcher: RecommendedWatcher = Watcher::new(
        move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    trace!("Zone directory changed: {:?}", event.paths);
                    handle.trigger();
                }
            }
            Err(e) => error!("Zone directory watch error: {}", e),
        },
        notify::Config::default(),
    )?;

    watcher.watch(directory, RecursiveMode::NonRecursive)?;
    info!("Watching {} for zone changes", directory.display());
    Ok(watcher)
}

/// Trigger a reload on every SIGHUP
pub fn reload_on_sighup(handle: ReloadHandle) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sighup = match signal(SignalKind::hangup()) {
                Ok(sighup) => sighup,
                Err(e) => {
                    warn!("Cannot install SIGHUP handler: {}", e);
                    return;
                }
            };

            while sighup.recv().await.is_some() {
                info!("Received SIGHUP, reloading zones");
                handle.trigger();
            }
        }

        #[cfg(not(unix))]
        {
            let _ = handle;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::enums::DNSResourceType;
    use crate::resolver::ResolveError;
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn zone_text(serial: u32, extra: &str) -> String {
        format!(
            "@ IN SOA ns1 admin {} 3600 900 604800 300\n@ IN NS ns1\nns1 IN A 192.0.2.53\n{}",
            serial, extra
        )
    }

    fn loader(dir: &TempDir, origins: &[&str]) -> (ZoneLoader, Arc<ZoneTable>) {
        let table = Arc::new(ZoneTable::new(origins.iter().copied()).unwrap());
        let config = AutoConfig {
            directory: dir.path().to_path_buf(),
            ..Default::default()
        };
        (ZoneLoader::new(table.clone(), &config).unwrap(), table)
    }

    #[test]
    fn test_zone_name_for() {
        let dir = TempDir::new().unwrap();
        let (loader, _) = loader(&dir, &["."]);
        assert_eq!(
            loader.zone_name_for("db.Example.com"),
            Some("example.com.".to_string())
        );
        assert_eq!(loader.zone_name_for("example.com.zone"), None);
        assert_eq!(loader.zone_name_for("notdb.example.com"), None);
    }

    #[tokio::test]
    async fn test_reload_skips_unchanged_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("db.example.com"), zone_text(1, "")).unwrap();
        let (mut loader, table) = loader(&dir, &["."]);

        let first = loader.reload().await.unwrap();
        assert_eq!(first.loaded, vec!["example.com."]);
        let before = table.lookup("example.com.").unwrap();

        let second = loader.reload().await.unwrap();
        assert!(second.loaded.is_empty());
        assert_eq!(second.unchanged, vec!["example.com."]);
        assert!(Arc::ptr_eq(&before, &table.lookup("example.com.").unwrap()));
    }

    #[tokio::test]
    async fn test_collision_keeps_first_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("db.example.com"), zone_text(1, "")).unwrap();
        std::fs::write(dir.path().join("db.example.com."), zone_text(2, "")).unwrap();
        let (mut loader, table) = loader(&dir, &["."]);

        let report = loader.reload().await.unwrap();
        assert_eq!(report.loaded, vec!["example.com."]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "db.example.com.");
        assert_eq!(table.lookup("example.com.").unwrap().serial, 1);
    }

    #[tokio::test]
    async fn test_uncovered_zones_are_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("db.example.com"), zone_text(1, "")).unwrap();
        std::fs::write(dir.path().join("db.example.org"), zone_text(1, "")).unwrap();
        let (mut loader, table) = loader(&dir, &["com."]);

        let report = loader.reload().await.unwrap();
        assert_eq!(report.loaded, vec!["example.com."]);
        assert!(table.lookup("example.org.").is_none());
    }

    #[tokio::test]
    async fn test_oversized_file_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("db.example.com"), zone_text(1, "")).unwrap();
        let table = Arc::new(ZoneTable::new(["."]).unwrap());
        let config = AutoConfig {
            directory: dir.path().to_path_buf(),
            max_zone_file_size: 16,
            ..Default::default()
        };
        let mut loader = ZoneLoader::new(table.clone(), &config).unwrap();

        let report = loader.reload().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_is_a_scan_error() {
        let dir = TempDir::new().unwrap();
        let table = Arc::new(ZoneTable::new(["."]).unwrap());
        let config = AutoConfig {
            directory: dir.path().join("missing"),
            ..Default::default()
        };
        let mut loader = ZoneLoader::new(table, &config).unwrap();
        assert!(matches!(
            loader.reload().await,
            Err(LoaderError::Scan { .. })
        ));
    }

    struct StaticResolver;

    #[async_trait]
    impl NameResolver for StaticResolver {
        async fn resolve(&self, target: &str) -> Result<Vec<DNSResource>, ResolveError> {
            if target == "ns.example.net." {
                Ok(vec![DNSResource::new(
                    target,
                    DNSResourceType::A,
                    crate::dns::enums::DNSResourceClass::IN,
                    300,
                    vec![198, 51, 100, 1],
                )])
            } else {
                Err(ResolveError::Timeout)
            }
        }
    }

    #[tokio::test]
    async fn test_external_glue_is_resolved() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("db.example.com"),
            zone_text(1, "@ IN NS ns.example.net.\n@ IN NS ns.broken.net.\n"),
        )
        .unwrap();
        let (loader, table) = loader(&dir, &["."]);
        let mut loader = loader.with_resolver(Arc::new(StaticResolver));

        let report = loader.reload().await.unwrap();
        assert_eq!(report.loaded.len(), 1);

        let zone = table.lookup("example.com.").unwrap();
        let lookup = zone.lookup("example.com.", DNSResourceType::NS);
        assert!(
            lookup
                .additional
                .iter()
                .any(|r| r.owner() == "ns.example.net." && r.rdata_text() == "198.51.100.1")
        );
    }

    #[tokio::test]
    async fn test_reload_handle_coalesces() {
        let (handle, mut rx) = ReloadHandle::channel();
        assert!(handle.trigger());
        assert!(!handle.trigger());
        assert_eq!(rx.recv().await, Some(()));
        assert!(handle.trigger());
    }
}
