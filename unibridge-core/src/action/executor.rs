use tracing::{debug, trace, warn};

use crate::session::{PageElement, PageSession, SessionError, SessionResult};

use super::{ActionErrorKind, ActionKind, ActionRequest, ActionResult};

/// Walks an ordered candidate chain and performs the action on the first
/// visible match. Every per-candidate failure is swallowed so one bad
/// selector never aborts the request; raw engine errors stop here.
pub struct ActionExecutor;

impl ActionExecutor {
    pub async fn execute(session: &dyn PageSession, request: &ActionRequest) -> ActionResult {
        if request.candidates.is_empty() {
            warn!(action = %request.kind, "No locator candidates configured");
            return ActionResult::failed(ActionErrorKind::NoMatchFound);
        }

        let mut saw_throw = false;
        let mut saw_timeout = false;

        for (index, candidate) in request.candidates.iter().enumerate() {
            let element = match session.find(&candidate.selector, candidate.timeout()).await {
                Ok(Some(element)) => element,
                Ok(None) => {
                    trace!(selector = %candidate.selector, "Candidate never matched");
                    continue;
                }
                Err(SessionError::Timeout(what)) => {
                    debug!(selector = %candidate.selector, %what, "Candidate lookup timed out");
                    saw_timeout = true;
                    continue;
                }
                Err(err) => {
                    debug!(selector = %candidate.selector, error = %err, "Candidate lookup failed");
                    saw_throw = true;
                    continue;
                }
            };

            match element.is_visible().await {
                Ok(true) => {}
                Ok(false) => {
                    trace!(selector = %candidate.selector, "Candidate matched but is not visible");
                    continue;
                }
                Err(err) => {
                    debug!(selector = %candidate.selector, error = %err, "Visibility probe failed");
                    saw_throw = true;
                    continue;
                }
            }

            if let Err(err) = Self::perform(element.as_ref(), &request.kind).await {
                debug!(
                    selector = %candidate.selector,
                    action = %request.kind,
                    error = %err,
                    "Action failed on matched element"
                );
                saw_throw = true;
                continue;
            }

            debug!(selector = %candidate.selector, index, action = %request.kind, "Action succeeded");
            return ActionResult::matched(index);
        }

        let kind = if saw_throw {
            ActionErrorKind::ActionThrew
        } else if saw_timeout {
            ActionErrorKind::Timeout
        } else {
            ActionErrorKind::NoMatchFound
        };
        warn!(
            action = %request.kind,
            error = %kind,
            tried = request.candidates.len(),
            "All locator candidates exhausted"
        );
        ActionResult::failed(kind)
    }

    async fn perform(element: &dyn PageElement, kind: &ActionKind) -> SessionResult<()> {
        match kind {
            ActionKind::Click => element.click().await,
            ActionKind::Fill { text } => element.fill(text).await,
            ActionKind::PressKey { key } => element.press_key(key).await,
        }
    }
}
