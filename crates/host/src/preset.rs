use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Generation-preset operations exposed by the host.
///
/// `switch_to` returning `true` only means the host accepted the request;
/// the switch is applied asynchronously, so callers confirm by re-reading
/// [`current`](PresetHost::current) after a settle delay.
#[async_trait]
pub trait PresetHost: Send + Sync {
    async fn current(&self) -> Result<Option<String>>;

    async fn list_available(&self) -> Result<Vec<String>>;

    async fn switch_to(&self, name: &str) -> Result<bool>;
}

// ── Static adapter ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PresetState {
    current: Option<String>,
    available: Vec<String>,
    switches: Vec<String>,
    list_calls: usize,
    accept_without_applying: bool,
}

/// In-process [`PresetHost`] over a fixed preset list.  Switches to a known
/// preset are applied immediately; the `accept_without_applying` knob models
/// a host that acknowledges a switch it never performs.
#[derive(Debug, Default)]
pub struct StaticPresets {
    state: Mutex<PresetState>,
}

impl StaticPresets {
    pub fn new(available: Vec<String>, current: Option<String>) -> Self {
        Self {
            state: Mutex::new(PresetState {
                current,
                available,
                ..PresetState::default()
            }),
        }
    }

    /// Acknowledge switches without changing the current preset, so a
    /// follow-up confirmation read sees the old name.
    pub async fn accept_without_applying(&self) {
        self.state.lock().await.accept_without_applying = true;
    }

    /// Names passed to `switch_to`, in call order.
    pub async fn switches(&self) -> Vec<String> {
        self.state.lock().await.switches.clone()
    }

    /// How many times `list_available` hit this host.
    pub async fn list_calls(&self) -> usize {
        self.state.lock().await.list_calls
    }
}

#[async_trait]
impl PresetHost for StaticPresets {
    async fn current(&self) -> Result<Option<String>> {
        Ok(self.state.lock().await.current.clone())
    }

    async fn list_available(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.list_calls += 1;
        Ok(state.available.clone())
    }

    async fn switch_to(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.switches.push(name.to_string());
        if !state.available.iter().any(|preset| preset == name) {
            return Ok(false);
        }
        if !state.accept_without_applying {
            state.current = Some(name.to_string());
        }
        Ok(true)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn presets() -> StaticPresets {
        StaticPresets::new(
            vec!["Default".to_string(), "日记预设".to_string()],
            Some("Default".to_string()),
        )
    }

    #[tokio::test]
    async fn switch_to_known_preset_applies() {
        let host = presets();
        assert!(host.switch_to("日记预设").await.unwrap());
        assert_eq!(host.current().await.unwrap(), Some("日记预设".to_string()));
        assert_eq!(host.switches().await, vec!["日记预设".to_string()]);
    }

    #[tokio::test]
    async fn switch_to_unknown_preset_is_refused() {
        let host = presets();
        assert!(!host.switch_to("missing").await.unwrap());
        assert_eq!(host.current().await.unwrap(), Some("Default".to_string()));
    }

    #[tokio::test]
    async fn acknowledged_but_unapplied_switch_keeps_old_current() {
        let host = presets();
        host.accept_without_applying().await;
        assert!(host.switch_to("日记预设").await.unwrap());
        assert_eq!(host.current().await.unwrap(), Some("Default".to_string()));
    }

    #[tokio::test]
    async fn list_calls_are_counted() {
        let host = presets();
        host.list_available().await.unwrap();
        host.list_available().await.unwrap();
        assert_eq!(host.list_calls().await, 2);
    }
}
