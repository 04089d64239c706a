pub mod chromium;
pub mod error;
pub mod pacing;

use std::time::Duration;

use async_trait::async_trait;

pub use chromium::ChromiumSession;
pub use error::{SessionError, SessionResult};
pub use pacing::Pacer;

/// One interactable element on the current page.
#[async_trait(?Send)]
pub trait PageElement {
    async fn click(&self) -> SessionResult<()>;
    async fn fill(&self, text: &str) -> SessionResult<()>;
    async fn press_key(&self, key: &str) -> SessionResult<()>;
    async fn is_visible(&self) -> SessionResult<bool>;
    async fn text(&self) -> SessionResult<String>;
}

/// Capability surface the outreach workflow needs from a browser page.
/// Any engine that can satisfy it is substitutable; the workflow never
/// talks to an engine type directly.
#[async_trait(?Send)]
pub trait PageSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> SessionResult<()>;

    /// Bounded-wait lookup. `Ok(None)` means the selector never matched
    /// before the deadline, which is an expected outcome, not an error.
    async fn find(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> SessionResult<Option<Box<dyn PageElement>>>;

    /// Visible text of the whole document.
    async fn read_text(&self) -> SessionResult<String>;

    async fn current_url(&self) -> SessionResult<Option<String>>;
}
