use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Device profile ────────────────────────────────────────────────────────────

/// Where the plugin is running, which controls how patient the coordinator is
/// with the host.
///
/// | Profile   | Behaviour                                                      |
/// |-----------|----------------------------------------------------------------|
/// | `desktop` | 1s preset settle delay; preset preparation failure aborts.     |
/// | `mobile`  | 2s preset settle delay; proceeds without preset on failure.    |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceProfile {
    #[default]
    Desktop,
    Mobile,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeviceConfig {
    pub profile: DeviceProfile,
}

// ── Listener config ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Delete the prompt turn and the reply turn after a successful save.
    pub auto_delete_messages: bool,
    /// How many times a failed persist is retried before the session goes
    /// terminal.  `0` disables retries entirely.
    pub max_retries: u32,
    /// Fixed delay between a failed attempt and the next one.  Not a backoff
    /// curve; the host is either back or it is not.
    pub retry_backoff_secs: u64,
    /// How long to wait for a qualifying reply before giving up.
    pub reply_timeout_secs: u64,
    /// Pause between a successful save and the chat-cleanup request, giving
    /// the host time to finish rendering the reply it is about to lose.
    pub pre_deletion_delay_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            auto_delete_messages: true,
            max_retries: 3,
            retry_backoff_secs: 5,
            reply_timeout_secs: 180,
            pre_deletion_delay_ms: 1000,
        }
    }
}

impl ListenerConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    pub fn pre_deletion_delay(&self) -> Duration {
        Duration::from_millis(self.pre_deletion_delay_ms)
    }
}

// ── Preset config ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetConfig {
    /// Name of the generation preset to swap in before writing a diary.
    /// Empty means the swap step is skipped entirely.
    /// Can also be set via the `DIARIST_PRESET` env var (env takes precedence).
    pub diary_preset: String,
    /// Settle delay after `switch_to` before re-reading the current preset to
    /// confirm the switch.  The host applies switches asynchronously with no
    /// completion signal.
    pub settle_delay_ms: u64,
    /// Settle delay used instead of `settle_delay_ms` on mobile.
    pub mobile_settle_delay_ms: u64,
    /// How long a fetched preset list stays fresh before the next
    /// `list_available` asks the host again.
    pub cache_ttl_secs: u64,
}

impl Default for PresetConfig {
    fn default() -> Self {
        Self {
            diary_preset: String::new(),
            settle_delay_ms: 1000,
            mobile_settle_delay_ms: 2000,
            cache_ttl_secs: 300,
        }
    }
}

impl PresetConfig {
    /// Configured diary preset, with the empty string normalised to `None`.
    pub fn diary_preset(&self) -> Option<&str> {
        let name = self.diary_preset.trim();
        if name.is_empty() { None } else { Some(name) }
    }

    pub fn settle_delay(&self, profile: DeviceProfile) -> Duration {
        match profile {
            DeviceProfile::Desktop => Duration::from_millis(self.settle_delay_ms),
            DeviceProfile::Mobile => Duration::from_millis(self.mobile_settle_delay_ms),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

// ── Store config ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Worldbook to write diary entries into when the host cannot name a
    /// chat-bound one.  Can also be set via `DIARIST_WORLDBOOK` (env takes
    /// precedence).
    pub worldbook_name: String,
    /// Grace period before the first worldbook access, giving a freshly
    /// loaded host time to register its stores.
    pub ready_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            worldbook_name: "日记本".to_string(),
            ready_delay_ms: 1000,
        }
    }
}

impl StoreConfig {
    pub fn ready_delay(&self) -> Duration {
        Duration::from_millis(self.ready_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub listener: ListenerConfig,
    pub preset: PresetConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        // Env overrides take precedence over the config file.
        if let Ok(name) = env::var("DIARIST_WORLDBOOK") {
            if !name.is_empty() {
                config.store.worldbook_name = name;
            }
        }

        if let Ok(name) = env::var("DIARIST_PRESET") {
            if !name.is_empty() {
                config.preset.diary_preset = name;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn is_mobile(&self) -> bool {
        self.device.profile == DeviceProfile::Mobile
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
