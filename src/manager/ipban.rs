//! IP ban tracking with disk persistence
//!
//! Tracks consecutive authentication failures per client IP and bans an IP
//! once it crosses the configured threshold. Ban state survives restarts
//! through a JSON file; a background sweeper removes expired bans.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// How often the sweeper scans for expired bans
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A single persisted ban record
///
/// Records for banned IPs carry both timestamps; records for IPs that only
/// accumulated failures carry a count and no timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRecord {
    /// Client IP, port stripped
    pub ip: String,

    /// When the ban fired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banned_at: Option<DateTime<Utc>>,

    /// When the ban lapses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// The failure count behind this record
    #[serde(default)]
    pub fail_count: u32,
}

#[derive(Debug, Default)]
struct BanState {
    /// IP -> current consecutive failure count
    failure_counts: HashMap<String, u32>,
    /// IP -> ban expiry; an expired entry reads as absent
    banned_until: HashMap<String, DateTime<Utc>>,
    /// IP -> the failure count that triggered the ban
    ban_fail_count: HashMap<String, u32>,
}

/// Manages IP banning based on authentication failures
pub struct IpBanManager {
    state: Arc<RwLock<BanState>>,
    whitelist: HashSet<String>,
    max_failures: u32,
    ban_duration: ChronoDuration,
    persist_path: PathBuf,
    persist_tx: mpsc::Sender<()>,
    shutdown_tx: broadcast::Sender<()>,
}

impl IpBanManager {
    /// Create a manager, restore persisted state and start the background
    /// sweeper and persistence tasks
    pub async fn new(
        max_failures: u32,
        ban_duration: Duration,
        whitelist: Vec<String>,
        persist_path: impl Into<PathBuf>,
    ) -> Self {
        let (persist_tx, persist_rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(1);

        let manager = IpBanManager {
            state: Arc::new(RwLock::new(BanState::default())),
            whitelist: whitelist.into_iter().collect(),
            max_failures,
            ban_duration: ChronoDuration::milliseconds(ban_duration.as_millis() as i64),
            persist_path: persist_path.into(),
            persist_tx,
            shutdown_tx,
        };

        // A missing file on first run is not an error
        if let Err(e) = manager.load_from_disk().await {
            warn!("Failed to load ban state: {:#}", e);
        }

        manager.spawn_persist_task(persist_rx);
        manager.spawn_sweeper();

        manager
    }

    /// Check whether an IP is currently banned
    pub fn is_banned(&self, ip: &str) -> bool {
        // Whitelisted IPs are never banned
        if self.whitelist.contains(ip) {
            return false;
        }

        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match state.banned_until.get(ip) {
            Some(expiry) => *expiry > Utc::now(),
            None => false,
        }
    }

    /// Record an authentication failure for an IP
    ///
    /// When the consecutive failure count reaches the threshold the IP is
    /// banned, its counter cleared, and a persistence write scheduled.
    pub fn record_failure(&self, ip: &str) {
        // Whitelisted IPs are not tracked
        if self.whitelist.contains(ip) {
            return;
        }

        let banned = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let count = state.failure_counts.entry(ip.to_string()).or_insert(0);
            *count += 1;
            let count = *count;

            if count >= self.max_failures {
                state.ban_fail_count.insert(ip.to_string(), count);
                state
                    .banned_until
                    .insert(ip.to_string(), Utc::now() + self.ban_duration);
                state.failure_counts.remove(ip);
                true
            } else {
                false
            }
        };

        if banned {
            info!("IP banned after repeated auth failures: {}", ip);
            self.schedule_persist();
        }
    }

    /// Record a successful authentication, clearing the failure counter
    ///
    /// An existing ban is not affected.
    pub fn record_success(&self, ip: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.failure_counts.remove(ip);
    }

    /// Manually remove an IP from all tracking
    pub fn unban(&self, ip: &str) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.banned_until.remove(ip);
            state.ban_fail_count.remove(ip);
            state.failure_counts.remove(ip);
        }
        self.schedule_persist();
    }

    /// Snapshot of currently banned IPs
    pub fn list_banned(&self) -> Vec<String> {
        let now = Utc::now();
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .banned_until
            .iter()
            .filter(|(_, expiry)| **expiry > now)
            .map(|(ip, _)| ip.clone())
            .collect()
    }

    /// Current consecutive failure count for an IP
    pub fn failure_count(&self, ip: &str) -> u32 {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.failure_counts.get(ip).copied().unwrap_or(0)
    }

    /// Stop the background tasks and write the final state to disk
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.save_now().await {
            warn!("Failed to persist ban state on shutdown: {:#}", e);
        }
    }

    /// Write the current state to disk immediately
    pub async fn save_now(&self) -> Result<()> {
        let records = snapshot_records(&self.state, self.ban_duration);
        write_records(&self.persist_path, &records).await
    }

    fn schedule_persist(&self) {
        // A queued write already covers this change
        let _ = self.persist_tx.try_send(());
    }

    fn spawn_persist_task(&self, mut persist_rx: mpsc::Receiver<()>) {
        let state = Arc::clone(&self.state);
        let path = self.persist_path.clone();
        let ban_duration = self.ban_duration;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = persist_rx.recv() => match msg {
                        Some(()) => {
                            let records = snapshot_records(&state, ban_duration);
                            if let Err(e) = write_records(&path, &records).await {
                                warn!("Failed to persist ban state: {:#}", e);
                            }
                        }
                        None => break,
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    fn spawn_sweeper(&self) {
        let state = Arc::clone(&self.state);
        let persist_tx = self.persist_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = {
                            let now = Utc::now();
                            let mut state =
                                state.write().unwrap_or_else(PoisonError::into_inner);
                            let before = state.banned_until.len();
                            state.banned_until.retain(|_, expiry| *expiry > now);
                            before - state.banned_until.len()
                        };

                        if removed > 0 {
                            debug!("Sweeper removed {} expired ban(s)", removed);
                            let _ = persist_tx.try_send(());
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    async fn load_from_disk(&self) -> Result<()> {
        let data = match tokio::fs::read(&self.persist_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read ban file: {:?}", self.persist_path)
                })
            }
        };

        let records: Vec<BanRecord> =
            serde_json::from_slice(&data).with_context(|| "failed to parse ban file")?;

        let now = Utc::now();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        for record in records {
            match record.expires_at {
                Some(expires_at) if expires_at > now => {
                    state.banned_until.insert(record.ip.clone(), expires_at);
                    if record.fail_count > 0 {
                        state.ban_fail_count.insert(record.ip, record.fail_count);
                    }
                }
                // Expired (or never-banned) entries keep only their counter
                _ if record.fail_count > 0 => {
                    state.failure_counts.insert(record.ip, record.fail_count);
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Build the persistable view of the current state
///
/// Only non-expired bans are emitted, plus IPs that have accumulated
/// failures without yet being banned.
fn snapshot_records(
    state: &Arc<RwLock<BanState>>,
    ban_duration: ChronoDuration,
) -> Vec<BanRecord> {
    let now = Utc::now();
    let state = state.read().unwrap_or_else(PoisonError::into_inner);

    let mut records: Vec<BanRecord> = state
        .banned_until
        .iter()
        .filter(|(_, expiry)| **expiry > now)
        .map(|(ip, expiry)| BanRecord {
            ip: ip.clone(),
            banned_at: Some(*expiry - ban_duration),
            expires_at: Some(*expiry),
            fail_count: state.ban_fail_count.get(ip).copied().unwrap_or(0),
        })
        .collect();

    for (ip, count) in &state.failure_counts {
        if *count > 0 && !records.iter().any(|r| &r.ip == ip) {
            records.push(BanRecord {
                ip: ip.clone(),
                banned_at: None,
                expires_at: None,
                fail_count: *count,
            });
        }
    }

    records
}

async fn write_records(path: &Path, records: &[BanRecord]) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create data directory: {:?}", dir))?;
            set_mode(dir, 0o755).await;
        }
    }

    let data = serde_json::to_vec_pretty(records)
        .with_context(|| "failed to serialize ban records")?;
    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("failed to write ban file: {:?}", path))?;
    set_mode(path, 0o644).await;

    Ok(())
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await;
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) {}
