use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("cookie injection failed: {0}")]
    Cookies(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}
