use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::action::LocatorCandidate;
use crate::config::load_toml;
use crate::error::{ConfigError, Result};

/// Catalog of per-platform interaction data. Everything in here is
/// configuration, not logic: URLs, ordered selector chains, marker phrases.
/// Selector order inside a chain encodes preference and is preserved
/// verbatim from the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformCatalog {
    platforms: BTreeMap<String, PlatformProfile>,
}

impl PlatformCatalog {
    pub fn get(&self, id: &str) -> Option<&PlatformProfile> {
        self.platforms.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.platforms.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PlatformProfile)> {
        self.platforms
            .iter()
            .map(|(id, profile)| (id.as_str(), profile))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformProfile {
    pub display_name: String,
    pub base_url: String,
    /// Profile URL template; `{username}` is substituted at send time.
    pub profile_url: String,
    /// URL fragments that mean the session landed on an auth wall.
    #[serde(default)]
    pub login_wall_markers: Vec<String>,
    /// Page-text phrases that indicate a platform restriction. Matched
    /// case-insensitively; kept verbatim including non-English entries.
    #[serde(default)]
    pub restriction_phrases: Vec<String>,
    pub actions: PlatformActions,
    #[serde(default)]
    pub verification: VerificationSection,
}

impl PlatformProfile {
    pub fn profile_url_for(&self, username: &str) -> String {
        self.profile_url
            .replace("{username}", username.trim_start_matches('@'))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformActions {
    /// Consent banners, notification prompts and similar overlays that are
    /// dismissed best-effort before the real work starts.
    pub dismiss_overlays: Option<ActionSelectors>,
    pub follow: Option<ActionSelectors>,
    /// Button-text fragments that mean the account is already followed.
    #[serde(default)]
    pub already_following_markers: Vec<String>,
    pub open_composer: ActionSelectors,
    pub message_input: ActionSelectors,
    pub send_button: Option<ActionSelectors>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionSelectors {
    pub selectors: Vec<String>,
    #[serde(default = "default_locate_timeout_ms")]
    pub timeout_ms: u64,
}

impl ActionSelectors {
    pub fn candidates(&self) -> Vec<LocatorCandidate> {
        self.selectors
            .iter()
            .map(|selector| LocatorCandidate::new(selector.clone(), self.timeout_ms))
            .collect()
    }
}

fn default_locate_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationSection {
    /// Regexes matched against the post-send URL; any hit verifies the send.
    #[serde(default)]
    pub success_url_patterns: Vec<String>,
    /// How many leading characters of the message the text probe looks for.
    #[serde(default = "default_text_probe_chars")]
    pub text_probe_chars: usize,
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self {
            success_url_patterns: Vec::new(),
            text_probe_chars: default_text_probe_chars(),
        }
    }
}

fn default_text_probe_chars() -> usize {
    30
}

pub fn load_platform_catalog<P: AsRef<Path>>(path: P) -> Result<PlatformCatalog> {
    let path = path.as_ref();
    let catalog: PlatformCatalog = load_toml(path)?;
    for (id, profile) in catalog.iter() {
        url::Url::parse(&profile.base_url).map_err(|err| ConfigError::Invalid {
            message: format!("platform {id} has invalid base_url: {err}"),
            path: path.to_path_buf(),
        })?;
        if profile.actions.open_composer.selectors.is_empty() {
            return Err(ConfigError::Invalid {
                message: format!("platform {id} has an empty open_composer selector chain"),
                path: path.to_path_buf(),
            });
        }
        if profile.actions.message_input.selectors.is_empty() {
            return Err(ConfigError::Invalid {
                message: format!("platform {id} has an empty message_input selector chain"),
                path: path.to_path_buf(),
            });
        }
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_catalog_keeps_selector_order() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/platforms.toml");
        let catalog = load_platform_catalog(path).expect("catalog should parse");

        let tiktok = catalog.get("tiktok").expect("tiktok profile");
        assert_eq!(
            tiktok.actions.follow.as_ref().unwrap().selectors[0],
            "button[data-e2e=\"follow-button\"]"
        );
        assert_eq!(
            tiktok.actions.open_composer.selectors[0],
            "button[data-e2e=\"message-button\"]"
        );
        assert_eq!(
            tiktok.actions.message_input.selectors[0],
            "div[contenteditable=\"true\"][data-e2e=\"message-input\"]"
        );

        let candidates = tiktok.actions.message_input.candidates();
        assert_eq!(candidates.len(), tiktok.actions.message_input.selectors.len());
        assert_eq!(candidates[0].timeout_ms, 5000);
    }

    #[test]
    fn profile_url_substitutes_username() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/platforms.toml");
        let catalog = load_platform_catalog(path).expect("catalog should parse");
        let tiktok = catalog.get("tiktok").expect("tiktok profile");
        assert_eq!(
            tiktok.profile_url_for("@garyvee"),
            "https://www.tiktok.com/@garyvee"
        );
        assert_eq!(
            tiktok.profile_url_for("garyvee"),
            "https://www.tiktok.com/@garyvee"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("platforms.toml");
        std::fs::write(
            &path,
            r#"
[platforms.broken]
display_name = "Broken"
base_url = "not a url"
profile_url = "https://example.com/{username}"

[platforms.broken.actions.open_composer]
selectors = ["button"]

[platforms.broken.actions.message_input]
selectors = ["input"]
"#,
        )
        .unwrap();
        let err = load_platform_catalog(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
