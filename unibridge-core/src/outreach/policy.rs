use tracing::warn;

/// Scans page text for the platform's restriction phrases. A hit means the
/// account tripped moderation and every further send this session would
/// dig the hole deeper, so callers treat it as fatal.
pub struct ViolationScanner;

impl ViolationScanner {
    /// Case-insensitive containment scan; first matching phrase wins.
    /// Phrase lists come from the platform profile verbatim, localized
    /// entries included.
    pub fn scan(body: &str, phrases: &[String]) -> Option<String> {
        if body.is_empty() || phrases.is_empty() {
            return None;
        }
        let lowered = body.to_lowercase();
        for phrase in phrases {
            if lowered.contains(&phrase.to_lowercase()) {
                warn!(phrase = %phrase, "Restriction phrase found in page text");
                return Some(phrase.clone());
            }
        }
        None
    }
}

/// Some platforms bounce anonymous visitors to an auth wall instead of the
/// profile. Detected from URL substrings.
pub fn is_login_wall(url: &str, markers: &[String]) -> bool {
    markers.iter().any(|marker| url.contains(marker.as_str()))
}
