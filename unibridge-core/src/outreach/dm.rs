use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::action::{
    ActionErrorKind, ActionExecutor, ActionRequest, OutcomeVerifier, SignalSpec, Verdict,
    VerificationOutcome,
};
use crate::limits::{DenialReason, LimitResult, Permission, RateLimiter};
use crate::platform::PlatformProfile;
use crate::session::{PageSession, Pacer, SessionError};
use crate::telemetry::{AttemptRecord, OutreachTelemetry};

use super::policy::{is_login_wall, ViolationScanner};

#[derive(Debug, Clone)]
pub struct DmRequest {
    pub username: String,
    /// Message template; `{{name}}` is replaced with the username.
    pub message: String,
    pub follow_first: bool,
}

/// Workflow stage names, used for logs and for tagging failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStage {
    OpenProfile,
    Follow,
    OpenComposer,
    ComposeMessage,
    Send,
    Verify,
}

impl fmt::Display for SendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SendStage::OpenProfile => "open_profile",
            SendStage::Follow => "follow",
            SendStage::OpenComposer => "open_composer",
            SendStage::ComposeMessage => "compose_message",
            SendStage::Send => "send",
            SendStage::Verify => "verify",
        };
        f.write_str(label)
    }
}

/// Terminal result of one send attempt. Only limiter persistence failures
/// surface as errors; everything the platform can do to us is a variant
/// here, including the deliberately ambiguous `Unconfirmed`.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Sent and at least one verification signal confirmed it.
    Delivered { verification: VerificationOutcome },
    /// The send action went through but nothing confirmed delivery.
    /// Not a success and not a failure; counted against the caps anyway.
    Unconfirmed { verification: VerificationOutcome },
    /// The limiter said no. Expected, routine, retry later.
    Skipped(DenialReason),
    /// The platform bounced us to an auth wall; the session needs fresh
    /// cookies before anything else will work.
    LoginRequired { url: String },
    /// A restriction phrase was found; cooldown has already been entered.
    Blocked { phrase: String },
    /// A stage exhausted its selector candidates.
    Failed {
        stage: SendStage,
        error: ActionErrorKind,
    },
}

impl SendOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SendOutcome::Delivered { .. } => "delivered",
            SendOutcome::Unconfirmed { .. } => "unconfirmed",
            SendOutcome::Skipped(_) => "skipped",
            SendOutcome::LoginRequired { .. } => "login_required",
            SendOutcome::Blocked { .. } => "blocked",
            SendOutcome::Failed { .. } => "failed",
        }
    }
}

/// `{{name}}` substitution. The handle's `@` prefix is dropped so the
/// greeting reads naturally.
pub fn render_message(template: &str, username: &str) -> String {
    template.replace("{{name}}", username.trim_start_matches('@'))
}

/// Drives one direct message end to end: profile, optional follow,
/// composer, typing, send, verification. Strictly sequential with paced
/// gaps between stages; the pacing is part of the product, not overhead.
pub struct DmSender<'a> {
    platform: &'a str,
    profile: &'a PlatformProfile,
    pacer: Pacer,
    nav_timeout: Duration,
    telemetry: Option<&'a OutreachTelemetry>,
    sent_via: Option<usize>,
}

impl<'a> DmSender<'a> {
    pub fn new(
        platform: &'a str,
        profile: &'a PlatformProfile,
        pacer: Pacer,
        nav_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            profile,
            pacer,
            nav_timeout,
            telemetry: None,
            sent_via: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: &'a OutreachTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub async fn send(
        &mut self,
        session: &dyn PageSession,
        limiter: &mut RateLimiter,
        request: &DmRequest,
    ) -> LimitResult<SendOutcome> {
        let started = Instant::now();
        self.sent_via = None;
        let result = self.run_stages(session, limiter, request).await;

        if let (Some(telemetry), Ok(outcome)) = (self.telemetry, &result) {
            let record = self.attempt_record(request, outcome, started.elapsed());
            if let Err(err) = telemetry.record_attempt(&record) {
                warn!(error = %err, "Failed to record attempt telemetry");
            }
        }
        result
    }

    async fn run_stages(
        &mut self,
        session: &dyn PageSession,
        limiter: &mut RateLimiter,
        request: &DmRequest,
    ) -> LimitResult<SendOutcome> {
        let profile = self.profile;

        match limiter.check_permission() {
            Permission::Granted => {}
            Permission::Denied(reason) => {
                info!(
                    platform = self.platform,
                    username = %request.username,
                    reason = %reason,
                    "Send skipped"
                );
                self.record_limiter_event("denied", &reason.to_string());
                return Ok(SendOutcome::Skipped(reason));
            }
        }

        let url = profile.profile_url_for(&request.username);
        info!(
            platform = self.platform,
            username = %request.username,
            url = %url,
            stage = %SendStage::OpenProfile,
            "Opening profile"
        );
        if let Err(err) = session.navigate(&url, self.nav_timeout).await {
            warn!(url = %url, error = %err, "Profile navigation failed");
            let error = match err {
                SessionError::Timeout(_) => ActionErrorKind::Timeout,
                _ => ActionErrorKind::ActionThrew,
            };
            return Ok(SendOutcome::Failed {
                stage: SendStage::OpenProfile,
                error,
            });
        }
        self.pacer.after_navigation().await;

        if let Some(current) = read_current_url(session).await {
            if is_login_wall(&current, &profile.login_wall_markers) {
                warn!(url = %current, "Login wall detected, session cookies are stale");
                return Ok(SendOutcome::LoginRequired { url: current });
            }
        }

        if let Some(blocked) = self.scan_for_violation(session, limiter).await? {
            return Ok(blocked);
        }

        self.dismiss_overlays(session).await;

        if request.follow_first {
            self.try_follow(session).await;
        }

        debug!(stage = %SendStage::OpenComposer, "Opening message composer");
        let composer = ActionExecutor::execute(
            session,
            &ActionRequest::click(profile.actions.open_composer.candidates()),
        )
        .await;
        if !composer.succeeded {
            return Ok(SendOutcome::Failed {
                stage: SendStage::OpenComposer,
                error: composer.error.unwrap_or(ActionErrorKind::NoMatchFound),
            });
        }
        self.pacer.between_steps().await;

        // Some composers open with their own prompt on top.
        self.dismiss_overlays(session).await;

        let message = render_message(&request.message, &request.username);
        debug!(stage = %SendStage::ComposeMessage, chars = message.chars().count(), "Typing message");
        let typed = ActionExecutor::execute(
            session,
            &ActionRequest::fill(profile.actions.message_input.candidates(), message.clone()),
        )
        .await;
        if !typed.succeeded {
            return Ok(SendOutcome::Failed {
                stage: SendStage::ComposeMessage,
                error: typed.error.unwrap_or(ActionErrorKind::NoMatchFound),
            });
        }
        self.pacer.after_typing().await;

        debug!(stage = %SendStage::Send, "Sending");
        let sent = match &profile.actions.send_button {
            Some(button) => {
                let clicked =
                    ActionExecutor::execute(session, &ActionRequest::click(button.candidates()))
                        .await;
                if clicked.succeeded {
                    clicked
                } else {
                    debug!("Send button chain exhausted, falling back to Enter");
                    ActionExecutor::execute(
                        session,
                        &ActionRequest::press_key(
                            profile.actions.message_input.candidates(),
                            "Enter",
                        ),
                    )
                    .await
                }
            }
            None => {
                ActionExecutor::execute(
                    session,
                    &ActionRequest::press_key(profile.actions.message_input.candidates(), "Enter"),
                )
                .await
            }
        };
        if !sent.succeeded {
            return Ok(SendOutcome::Failed {
                stage: SendStage::Send,
                error: sent.error.unwrap_or(ActionErrorKind::NoMatchFound),
            });
        }
        self.sent_via = sent.matched_candidate;
        self.pacer.between_steps().await;

        if let Some(blocked) = self.scan_for_violation(session, limiter).await? {
            return Ok(blocked);
        }

        debug!(stage = %SendStage::Verify, "Verifying delivery");
        let signals = self.verification_signals(&message);
        let verification = OutcomeVerifier::verify(session, &signals).await;

        // Both verified and unverified sends count against the caps; the
        // platform saw the send action either way.
        limiter.record_send()?;

        match verification.verdict {
            Verdict::Verified => {
                info!(
                    platform = self.platform,
                    username = %request.username,
                    "Message delivered"
                );
                Ok(SendOutcome::Delivered { verification })
            }
            Verdict::Unverified => {
                warn!(
                    platform = self.platform,
                    username = %request.username,
                    "Send completed but no signal confirmed delivery"
                );
                Ok(SendOutcome::Unconfirmed { verification })
            }
        }
    }

    async fn dismiss_overlays(&mut self, session: &dyn PageSession) {
        let Some(dismiss) = &self.profile.actions.dismiss_overlays else {
            return;
        };
        let result =
            ActionExecutor::execute(session, &ActionRequest::click(dismiss.candidates())).await;
        if result.succeeded {
            debug!("Dismissed an overlay");
            self.pacer.between_steps().await;
        }
    }

    /// Follow failures never abort the send; the message matters more
    /// than the follow.
    async fn try_follow(&mut self, session: &dyn PageSession) {
        let profile = self.profile;
        let Some(follow) = &profile.actions.follow else {
            debug!(platform = self.platform, "No follow action configured");
            return;
        };

        if !profile.actions.already_following_markers.is_empty() {
            if let Ok(body) = session.read_text().await {
                if profile
                    .actions
                    .already_following_markers
                    .iter()
                    .any(|marker| body.contains(marker.as_str()))
                {
                    debug!("Already following, skipping follow");
                    return;
                }
            }
        }

        debug!(stage = %SendStage::Follow, "Following the account");
        let result =
            ActionExecutor::execute(session, &ActionRequest::click(follow.candidates())).await;
        if result.succeeded {
            info!(platform = self.platform, "Followed the account");
            self.pacer.between_steps().await;
        } else {
            debug!(
                stage = %SendStage::Follow,
                error = ?result.error,
                "Follow did not land, continuing"
            );
        }
    }

    /// A match is fatal for the session: cooldown is entered before the
    /// outcome is returned. Read failures are tolerated; an unreadable
    /// page is not evidence of a restriction.
    async fn scan_for_violation(
        &self,
        session: &dyn PageSession,
        limiter: &mut RateLimiter,
    ) -> LimitResult<Option<SendOutcome>> {
        let body = match session.read_text().await {
            Ok(body) => body,
            Err(err) => {
                debug!(error = %err, "Page text unavailable for violation scan");
                return Ok(None);
            }
        };
        if let Some(phrase) = ViolationScanner::scan(&body, &self.profile.restriction_phrases) {
            limiter.enter_cooldown(&format!("restriction phrase: {phrase}"))?;
            self.record_limiter_event("cooldown", &phrase);
            return Ok(Some(SendOutcome::Blocked { phrase }));
        }
        Ok(None)
    }

    fn verification_signals(&self, message: &str) -> Vec<SignalSpec> {
        let profile = self.profile;
        let mut signals = vec![SignalSpec::InputCleared {
            candidates: profile.actions.message_input.candidates(),
        }];
        let probe: String = message
            .chars()
            .take(profile.verification.text_probe_chars)
            .collect();
        if !probe.is_empty() {
            signals.push(SignalSpec::TextAppeared { fragment: probe });
        }
        for pattern in &profile.verification.success_url_patterns {
            signals.push(SignalSpec::UrlMatched {
                pattern: pattern.clone(),
            });
        }
        signals
    }

    fn attempt_record(
        &self,
        request: &DmRequest,
        outcome: &SendOutcome,
        elapsed: Duration,
    ) -> AttemptRecord {
        let mut record = AttemptRecord::new(
            self.platform,
            &request.username,
            outcome.label(),
            elapsed.as_millis() as i64,
        );
        match outcome {
            SendOutcome::Delivered { verification } | SendOutcome::Unconfirmed { verification } => {
                record.matched_candidate = self.sent_via;
                record.verification = Some(verification.verdict.to_string());
            }
            SendOutcome::Skipped(reason) => {
                record.error = Some(reason.to_string());
            }
            SendOutcome::LoginRequired { url } => {
                record.error = Some(url.clone());
            }
            SendOutcome::Blocked { phrase } => {
                record.error = Some(phrase.clone());
            }
            SendOutcome::Failed { stage, error } => {
                record.stage = Some(stage.to_string());
                record.error = Some(error.to_string());
            }
        }
        record
    }

    fn record_limiter_event(&self, kind: &str, detail: &str) {
        if let Some(telemetry) = self.telemetry {
            if let Err(err) = telemetry.record_limiter_event(kind, detail) {
                warn!(error = %err, "Failed to record limiter event");
            }
        }
    }
}

async fn read_current_url(session: &dyn PageSession) -> Option<String> {
    match session.current_url().await {
        Ok(url) => url,
        Err(err) => {
            debug!(error = %err, "Current URL unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitutes_the_name() {
        assert_eq!(
            render_message("Hi {{name}}, loved your last video!", "@garyvee"),
            "Hi garyvee, loved your last video!"
        );
        assert_eq!(
            render_message("Hi {{name}}! ({{name}})", "ada"),
            "Hi ada! (ada)"
        );
        assert_eq!(render_message("No placeholder here.", "ada"), "No placeholder here.");
    }

    #[test]
    fn stage_and_outcome_labels_are_stable() {
        assert_eq!(SendStage::OpenComposer.to_string(), "open_composer");
        assert_eq!(SendStage::ComposeMessage.to_string(), "compose_message");
        let outcome = SendOutcome::Failed {
            stage: SendStage::Send,
            error: ActionErrorKind::NoMatchFound,
        };
        assert_eq!(outcome.label(), "failed");
    }
}
