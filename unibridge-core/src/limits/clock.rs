use chrono::{DateTime, Local, Timelike, Utc};

/// Time source for the limiter, injectable so tests can replay exact
/// boundary conditions.
pub trait Clock: Send {
    fn now_utc(&self) -> DateTime<Utc>;

    /// Hour of day in the operator's local timezone, 0..=23. The send
    /// window is expressed in local time on purpose: it models when a
    /// human at this machine would plausibly be active.
    fn local_hour(&self) -> u32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_hour(&self) -> u32 {
        Local::now().hour()
    }
}
