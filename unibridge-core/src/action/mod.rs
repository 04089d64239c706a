pub mod executor;
pub mod verifier;

use std::fmt;
use std::time::Duration;

pub use executor::ActionExecutor;
pub use verifier::{
    OutcomeVerifier, SignalKind, SignalReport, SignalSpec, Verdict, VerificationOutcome,
};

/// One prioritized strategy for locating a UI element. Candidates for an
/// action are tried strictly in list order; the order comes verbatim from
/// the platform catalog and encodes preference, so it is never re-sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorCandidate {
    pub selector: String,
    pub timeout_ms: u64,
}

impl LocatorCandidate {
    pub fn new(selector: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            selector: selector.into(),
            timeout_ms,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What to do with the element once a candidate matches. Payloads live in
/// the variants, so a fill without text cannot be expressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Click,
    Fill { text: String },
    PressKey { key: String },
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActionKind::Click => "click",
            ActionKind::Fill { .. } => "fill",
            ActionKind::PressKey { .. } => "press_key",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub candidates: Vec<LocatorCandidate>,
    pub kind: ActionKind,
}

impl ActionRequest {
    pub fn click(candidates: Vec<LocatorCandidate>) -> Self {
        Self {
            candidates,
            kind: ActionKind::Click,
        }
    }

    pub fn fill(candidates: Vec<LocatorCandidate>, text: impl Into<String>) -> Self {
        Self {
            candidates,
            kind: ActionKind::Fill { text: text.into() },
        }
    }

    pub fn press_key(candidates: Vec<LocatorCandidate>, key: impl Into<String>) -> Self {
        Self {
            candidates,
            kind: ActionKind::PressKey { key: key.into() },
        }
    }
}

/// Why an action request failed after exhausting its candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionErrorKind {
    /// No candidate ever produced a visible element.
    NoMatchFound,
    /// At least one attempt raised inside the engine or the action itself.
    ActionThrew,
    /// A session-level deadline expired during a lookup.
    Timeout,
}

impl fmt::Display for ActionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActionErrorKind::NoMatchFound => "no_match_found",
            ActionErrorKind::ActionThrew => "action_threw",
            ActionErrorKind::Timeout => "timeout",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub succeeded: bool,
    /// Index into the candidate list of the selector that won.
    pub matched_candidate: Option<usize>,
    pub error: Option<ActionErrorKind>,
}

impl ActionResult {
    pub(crate) fn matched(index: usize) -> Self {
        Self {
            succeeded: true,
            matched_candidate: Some(index),
            error: None,
        }
    }

    pub(crate) fn failed(kind: ActionErrorKind) -> Self {
        Self {
            succeeded: false,
            matched_candidate: None,
            error: Some(kind),
        }
    }
}
