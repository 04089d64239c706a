use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::platform::{load_platform_catalog, PlatformCatalog};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    pub runtime: RuntimeSection,
    pub storage: StorageSection,
    pub browser: BrowserSection,
    pub pacing: PacingSection,
    pub limits: LimitsSection,
    pub observability: ObservabilitySection,
}

impl BridgeConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.storage.data_dir).join(path)
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.resolve_path(&self.storage.state_file)
    }

    pub fn send_log(&self) -> PathBuf {
        self.resolve_path(&self.observability.send_log)
    }

    pub fn telemetry_db(&self) -> PathBuf {
        self.resolve_path(&self.observability.telemetry_db)
    }

    pub fn cookies_dir(&self) -> PathBuf {
        self.resolve_path(&self.storage.cookies_dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSection {
    pub instance_name: String,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub data_dir: String,
    pub state_file: String,
    pub cookies_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub user_agent: Option<String>,
    pub viewport: [u32; 2],
    pub nav_timeout_seconds: u64,
    pub typing_delay_ms: [u32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct PacingSection {
    pub post_navigation_ms: [u32; 2],
    pub inter_step_ms: [u32; 2],
    pub after_typing_ms: [u32; 2],
    pub between_sends_minutes: [u32; 2],
}

impl PacingSection {
    /// Zeroed pacing, used by tests and dry runs.
    pub fn disabled() -> Self {
        Self {
            post_navigation_ms: [0, 0],
            inter_step_ms: [0, 0],
            after_typing_ms: [0, 0],
            between_sends_minutes: [0, 0],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_per_hour: u32,
    pub max_per_day: u32,
    /// A rest is scheduled after every this many sends in one session;
    /// 0 disables resting.
    pub rest_after_sends: u32,
    pub rest_minutes: [u32; 2],
    pub cooldown_hours: u32,
    /// Local-hour window sends are allowed in, half-open: `[8, 22]` means
    /// 08:00 through 21:59.
    pub send_window_hours: [u32; 2],
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_per_hour: 3,
            max_per_day: 20,
            rest_after_sends: 3,
            rest_minutes: [30, 60],
            cooldown_hours: 24,
            send_window_hours: [8, 22],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilitySection {
    pub send_log: String,
    pub telemetry_db: String,
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub bridge: BridgeConfig,
    pub platforms: PlatformCatalog,
}

impl ConfigBundle {
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let bridge = load_bridge_config(dir.join("bridge.toml"))?;
        let platforms = load_platform_catalog(dir.join("platforms.toml"))?;
        Ok(Self { bridge, platforms })
    }
}

pub fn load_bridge_config<P: AsRef<Path>>(path: P) -> Result<BridgeConfig> {
    load_toml(path)
}

pub(crate) fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_configs() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs");
        let bundle = ConfigBundle::from_directory(dir).expect("configs should parse");
        assert_eq!(bundle.bridge.runtime.instance_name, "unibridge-primary");
        assert_eq!(bundle.bridge.limits.max_per_hour, 3);
        assert_eq!(bundle.bridge.limits.send_window_hours, [8, 22]);
        assert!(bundle.platforms.get("tiktok").is_some());
        assert!(bundle.platforms.get("instagram").is_some());
        assert!(bundle.platforms.get("linkedin").is_some());
    }

    #[test]
    fn relative_paths_anchor_at_data_dir() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs");
        let config = load_bridge_config(dir.join("bridge.toml")).expect("bridge config");
        let state = config.state_file();
        assert!(state.starts_with(&config.storage.data_dir));
        assert!(config.resolve_path("/tmp/absolute.json").is_absolute());
    }
}
