use std::fmt;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::session::{PageSession, SessionError, SessionResult};

use super::LocatorCandidate;

/// The composer may be gone entirely after a successful send, so each
/// candidate is probed briefly instead of honoring its full locate timeout.
const INPUT_PROBE_TIMEOUT: Duration = Duration::from_millis(1000);

/// One heuristic signal that a send actually happened. Signals are
/// individually unreliable; the verifier treats their union as the answer.
#[derive(Debug, Clone)]
pub enum SignalSpec {
    /// The composer input emptied itself after the send action.
    InputCleared { candidates: Vec<LocatorCandidate> },
    /// A fragment of the sent message shows up in the page text.
    TextAppeared { fragment: String },
    /// The URL moved to a pattern that only exists post-send.
    UrlMatched { pattern: String },
}

impl SignalSpec {
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalSpec::InputCleared { .. } => SignalKind::InputCleared,
            SignalSpec::TextAppeared { .. } => SignalKind::TextAppeared,
            SignalSpec::UrlMatched { .. } => SignalKind::UrlMatched,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    InputCleared,
    TextAppeared,
    UrlMatched,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SignalKind::InputCleared => "input_cleared",
            SignalKind::TextAppeared => "text_appeared",
            SignalKind::UrlMatched => "url_matched",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalReport {
    pub kind: SignalKind,
    pub observed: bool,
}

/// `Unverified` is a real outcome, not a failure: the send action went
/// through but no signal confirmed delivery. Callers must keep it distinct
/// from both success and error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Verified,
    Unverified,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Verdict::Verified => "verified",
            Verdict::Unverified => "unverified",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub verdict: Verdict,
    pub signals: Vec<SignalReport>,
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        self.verdict == Verdict::Verified
    }
}

pub struct OutcomeVerifier;

impl OutcomeVerifier {
    /// Evaluates every signal independently and ORs the observations.
    /// A signal that errors counts as not observed; verification never
    /// propagates engine faults.
    pub async fn verify(session: &dyn PageSession, signals: &[SignalSpec]) -> VerificationOutcome {
        let mut reports = Vec::with_capacity(signals.len());
        for spec in signals {
            let observed = match Self::evaluate(session, spec).await {
                Ok(observed) => observed,
                Err(err) => {
                    debug!(signal = %spec.kind(), error = %err, "Verification signal errored");
                    false
                }
            };
            reports.push(SignalReport {
                kind: spec.kind(),
                observed,
            });
        }

        let verdict = if reports.iter().any(|report| report.observed) {
            Verdict::Verified
        } else {
            Verdict::Unverified
        };
        VerificationOutcome {
            verdict,
            signals: reports,
        }
    }

    async fn evaluate(session: &dyn PageSession, spec: &SignalSpec) -> SessionResult<bool> {
        match spec {
            SignalSpec::InputCleared { candidates } => {
                for candidate in candidates {
                    let timeout = candidate.timeout().min(INPUT_PROBE_TIMEOUT);
                    match session.find(&candidate.selector, timeout).await? {
                        Some(element) => {
                            let text = element.text().await?;
                            return Ok(text.trim().is_empty());
                        }
                        None => continue,
                    }
                }
                Ok(false)
            }
            SignalSpec::TextAppeared { fragment } => {
                if fragment.is_empty() {
                    return Ok(false);
                }
                let body = session.read_text().await?;
                Ok(body.contains(fragment))
            }
            SignalSpec::UrlMatched { pattern } => {
                let url = match session.current_url().await? {
                    Some(url) => url,
                    None => return Ok(false),
                };
                let regex = Regex::new(pattern).map_err(|err| {
                    SessionError::Configuration(format!("invalid url pattern {pattern:?}: {err}"))
                })?;
                Ok(regex.is_match(&url))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::session::PageElement;

    use super::*;

    struct ProbeSession {
        body: Result<String, ()>,
        url: Option<String>,
        input_text: Option<String>,
    }

    impl ProbeSession {
        fn new() -> Self {
            Self {
                body: Ok(String::new()),
                url: None,
                input_text: None,
            }
        }
    }

    #[async_trait(?Send)]
    impl PageSession for ProbeSession {
        async fn navigate(&self, _url: &str, _timeout: Duration) -> SessionResult<()> {
            Ok(())
        }

        async fn find(
            &self,
            _selector: &str,
            _timeout: Duration,
        ) -> SessionResult<Option<Box<dyn PageElement>>> {
            match &self.input_text {
                Some(text) => Ok(Some(Box::new(StaticElement { text: text.clone() }))),
                None => Ok(None),
            }
        }

        async fn read_text(&self) -> SessionResult<String> {
            self.body
                .clone()
                .map_err(|_| SessionError::Unexpected("page text unavailable".into()))
        }

        async fn current_url(&self) -> SessionResult<Option<String>> {
            Ok(self.url.clone())
        }
    }

    struct StaticElement {
        text: String,
    }

    #[async_trait(?Send)]
    impl PageElement for StaticElement {
        async fn click(&self) -> SessionResult<()> {
            Ok(())
        }

        async fn fill(&self, _text: &str) -> SessionResult<()> {
            Ok(())
        }

        async fn press_key(&self, _key: &str) -> SessionResult<()> {
            Ok(())
        }

        async fn is_visible(&self) -> SessionResult<bool> {
            Ok(true)
        }

        async fn text(&self) -> SessionResult<String> {
            Ok(self.text.clone())
        }
    }

    fn input_cleared() -> SignalSpec {
        SignalSpec::InputCleared {
            candidates: vec![LocatorCandidate::new("div[contenteditable=\"true\"]", 5000)],
        }
    }

    #[tokio::test]
    async fn one_observed_signal_verifies() {
        let mut session = ProbeSession::new();
        session.body = Ok("thanks for reaching out".to_string());

        let signals = [
            input_cleared(),
            SignalSpec::TextAppeared {
                fragment: "thanks for".to_string(),
            },
        ];
        let outcome = OutcomeVerifier::verify(&session, &signals).await;

        assert_eq!(outcome.verdict, Verdict::Verified);
        assert_eq!(
            outcome.signals,
            vec![
                SignalReport {
                    kind: SignalKind::InputCleared,
                    observed: false,
                },
                SignalReport {
                    kind: SignalKind::TextAppeared,
                    observed: true,
                },
            ]
        );
    }

    #[tokio::test]
    async fn erroring_and_false_signals_yield_unverified() {
        let mut session = ProbeSession::new();
        session.body = Err(());
        session.url = Some("https://example.com/inbox".to_string());

        let signals = [
            SignalSpec::TextAppeared {
                fragment: "hello".to_string(),
            },
            SignalSpec::UrlMatched {
                pattern: "/messages/".to_string(),
            },
        ];
        let outcome = OutcomeVerifier::verify(&session, &signals).await;

        assert_eq!(outcome.verdict, Verdict::Unverified);
        assert!(outcome.signals.iter().all(|report| !report.observed));
    }

    #[tokio::test]
    async fn input_cleared_requires_empty_composer_text() {
        let mut session = ProbeSession::new();
        session.input_text = Some("still drafting".to_string());
        let outcome = OutcomeVerifier::verify(&session, &[input_cleared()]).await;
        assert_eq!(outcome.verdict, Verdict::Unverified);

        session.input_text = Some("  \n".to_string());
        let outcome = OutcomeVerifier::verify(&session, &[input_cleared()]).await;
        assert_eq!(outcome.verdict, Verdict::Verified);
    }

    #[tokio::test]
    async fn url_pattern_is_a_regex() {
        let mut session = ProbeSession::new();
        session.url = Some("https://example.com/messages/1234".to_string());

        let matched = OutcomeVerifier::verify(
            &session,
            &[SignalSpec::UrlMatched {
                pattern: r"/messages/\d+".to_string(),
            }],
        )
        .await;
        assert_eq!(matched.verdict, Verdict::Verified);

        let invalid = OutcomeVerifier::verify(
            &session,
            &[SignalSpec::UrlMatched {
                pattern: "[unclosed".to_string(),
            }],
        )
        .await;
        assert_eq!(invalid.verdict, Verdict::Unverified);
    }
}
