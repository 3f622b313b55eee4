//! Best-effort preset swapping around a diary session.
//!
//! Writing a diary reads better under a dedicated generation preset, so a
//! session swaps it in on start and back on stop.  Nothing here is a hard
//! dependency: an unconfirmed switch degrades to "proceed without it", and
//! only a failing preset capability itself surfaces as an error.

use std::sync::Arc;
use std::time::Instant;

use diarist_config::{DeviceProfile, PresetConfig};
use diarist_host::PresetHost;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// The preset capability itself failed.  Distinct from a switch the host
/// accepted but never applied, which is not an error.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct PresetError(#[from] anyhow::Error);

/// What one `prepare` did, kept for the matching `restore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetSwapRecord {
    pub switched: bool,
    pub previous: Option<String>,
}

impl PresetSwapRecord {
    pub fn unswapped() -> Self {
        Self { switched: false, previous: None }
    }
}

#[derive(Debug, Default)]
struct PresetCache {
    names: Vec<String>,
    refreshed_at: Option<Instant>,
}

impl PresetCache {
    fn remember(&mut self, name: &str) {
        if !self.names.iter().any(|known| known == name) {
            self.names.push(name.to_string());
        }
    }
}

/// Swaps the host's generation preset in and out around a session.
pub struct PresetCoordinator {
    host: Arc<dyn PresetHost>,
    config: PresetConfig,
    profile: DeviceProfile,
    cache: Mutex<PresetCache>,
    /// Held across an in-flight `prepare`; a second caller is turned away.
    preparing: Mutex<()>,
}

impl PresetCoordinator {
    pub fn new(host: Arc<dyn PresetHost>, config: PresetConfig, profile: DeviceProfile) -> Self {
        Self {
            host,
            config,
            profile,
            cache: Mutex::new(PresetCache::default()),
            preparing: Mutex::new(()),
        }
    }

    /// Swaps in the configured diary preset, remembering what to restore.
    ///
    /// No preset configured, the target already active, or a switch the
    /// host would not confirm all come back as an unswapped record so the
    /// session proceeds either way.  A concurrent `prepare` is turned away
    /// as unswapped rather than queued.
    pub async fn prepare(&self) -> Result<PresetSwapRecord, PresetError> {
        let Ok(_busy) = self.preparing.try_lock() else {
            warn!("preset preparation already in progress, skipping");
            return Ok(PresetSwapRecord::unswapped());
        };
        let Some(target) = self.config.diary_preset() else {
            debug!("no diary preset configured, skipping swap");
            return Ok(PresetSwapRecord::unswapped());
        };

        let current = self.host.current().await?;
        if current.as_deref() == Some(target) {
            debug!(preset = target, "diary preset already active");
            return Ok(PresetSwapRecord { switched: false, previous: current });
        }

        if self.switch_attempt(target).await? {
            info!(preset = target, previous = current.as_deref(), "diary preset active");
            Ok(PresetSwapRecord { switched: true, previous: current })
        } else {
            warn!(preset = target, "could not confirm preset switch, proceeding without it");
            Ok(PresetSwapRecord::unswapped())
        }
    }

    /// Puts the previous preset back after a session.  Never raises; a
    /// diary that already saved must not fail on cleanup.
    pub async fn restore(&self, record: &PresetSwapRecord) {
        if !record.switched {
            return;
        }
        let Some(previous) = record.previous.as_deref() else {
            return;
        };
        match self.switch_attempt(previous).await {
            Ok(true) => info!(preset = previous, "previous preset restored"),
            Ok(false) => warn!(preset = previous, "could not confirm preset restore"),
            Err(error) => warn!(%error, preset = previous, "preset restore failed"),
        }
    }

    /// Known presets: the remembered list topped up from the host when the
    /// cache has gone stale, with the active preset always merged in.
    /// Never fails; a dead enumeration just means the remembered list.
    pub async fn list_available(&self) -> Vec<String> {
        let mut cache = self.cache.lock().await;
        let stale = cache
            .refreshed_at
            .is_none_or(|at| at.elapsed() > self.config.cache_ttl());
        if stale {
            match self.host.list_available().await {
                Ok(names) => {
                    for name in names {
                        cache.remember(&name);
                    }
                    cache.refreshed_at = Some(Instant::now());
                }
                Err(error) => warn!(%error, "preset enumeration failed, using remembered list"),
            }
        }
        let mut names = cache.names.clone();
        drop(cache);

        if let Ok(Some(current)) = self.host.current().await {
            if !names.contains(&current) {
                names.push(current);
            }
        }
        names
    }

    /// Forced host enumeration for the explicit refresh action; unlike
    /// [`list_available`](Self::list_available) a dead host is surfaced.
    pub async fn refresh(&self) -> Result<Vec<String>, PresetError> {
        let names = self.host.list_available().await?;
        let mut cache = self.cache.lock().await;
        for name in names {
            cache.remember(&name);
        }
        cache.refreshed_at = Some(Instant::now());
        Ok(cache.names.clone())
    }

    /// One switch with settle delay and confirm-by-re-read.  `false` means
    /// the host did not land on the requested preset.
    async fn switch_attempt(&self, name: &str) -> Result<bool, PresetError> {
        if name.trim().is_empty() {
            return Ok(false);
        }
        let known = self.list_available().await;
        if !known.iter().any(|preset| preset == name) {
            debug!(preset = name, "preset not in discovered list, trying anyway");
        }

        if !self.host.switch_to(name).await? {
            return Ok(false);
        }

        // The host applies switches asynchronously with no completion
        // signal, so confirmation has to wait out the settle delay.
        tokio::time::sleep(self.config.settle_delay(self.profile)).await;

        let confirmed = self.host.current().await?.as_deref() == Some(name);
        if confirmed {
            self.cache.lock().await.remember(name);
        }
        Ok(confirmed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
