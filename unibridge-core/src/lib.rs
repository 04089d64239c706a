pub mod action;
pub mod config;
pub mod error;
pub mod limits;
pub mod outreach;
pub mod platform;
pub mod session;
pub mod telemetry;

pub use action::{
    ActionErrorKind, ActionExecutor, ActionKind, ActionRequest, ActionResult, LocatorCandidate,
    OutcomeVerifier, SignalKind, SignalReport, SignalSpec, Verdict, VerificationOutcome,
};
pub use config::{
    load_bridge_config, BridgeConfig, BrowserSection, ConfigBundle, LimitsSection, PacingSection,
};
pub use error::{ConfigError, Result};
pub use limits::{
    Clock, DenialReason, LimitError, LimitResult, LimiterSnapshot, LimiterState, Permission, Phase,
    RateLimiter, SystemClock,
};
pub use outreach::{render_message, DmRequest, DmSender, SendOutcome, SendStage};
pub use platform::{load_platform_catalog, ActionSelectors, PlatformCatalog, PlatformProfile};
pub use session::{ChromiumSession, PageElement, PageSession, Pacer, SessionError, SessionResult};
pub use telemetry::{AttemptRecord, OutreachTelemetry, TelemetryError};
