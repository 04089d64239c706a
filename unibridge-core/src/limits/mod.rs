pub mod clock;
pub mod state;

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use rand::{thread_rng, Rng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::LimitsSection;

pub use clock::{Clock, SystemClock};
pub use state::{LimitError, LimitResult, LimiterState, StateLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied(DenialReason),
}

impl Permission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Permission::Granted)
    }
}

/// Why a send was refused. Every reason is an expected operating state,
/// not an error; callers skip the send and report the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    CoolingDown { remaining: Duration },
    OutsideSendWindow { window: [u32; 2], hour: u32 },
    HourlyCapReached { cap: u32 },
    DailyCapReached { cap: u32 },
    Resting { remaining: Duration },
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::CoolingDown { remaining } => {
                write!(f, "in cooldown for another {}", format_remaining(*remaining))
            }
            DenialReason::OutsideSendWindow { window, hour } => write!(
                f,
                "local hour {hour} is outside the send window {:02}:00-{:02}:00",
                window[0], window[1]
            ),
            DenialReason::HourlyCapReached { cap } => write!(f, "hourly cap of {cap} reached"),
            DenialReason::DailyCapReached { cap } => write!(f, "daily cap of {cap} reached"),
            DenialReason::Resting { remaining } => write!(
                f,
                "resting between batches for another {}",
                format_remaining(*remaining)
            ),
        }
    }
}

fn format_remaining(remaining: Duration) -> String {
    let seconds = remaining.num_seconds().max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {}s", seconds % 60)
    } else {
        format!("{seconds}s")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Phase {
    Active,
    Resting { until: DateTime<Utc> },
    Cooldown { until: DateTime<Utc> },
}

/// Point-in-time report for operators; see `unibridgectl status`.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterSnapshot {
    pub phase: Phase,
    pub sent_last_hour: u32,
    pub sent_last_day: u32,
    pub max_per_hour: u32,
    pub max_per_day: u32,
    pub total_sent: u64,
    pub session_sent: u32,
}

/// Persistent send throttle. All durable state lives in a JSON file next
/// to a `.lock` lease; the lease is held for this value's whole lifetime,
/// so one process owns check-then-record end to end.
pub struct RateLimiter {
    config: LimitsSection,
    state: LimiterState,
    state_path: PathBuf,
    clock: Box<dyn Clock>,
    session_sent: u32,
    resting_until: Option<DateTime<Utc>>,
    _lease: StateLock,
}

impl RateLimiter {
    pub fn open(config: LimitsSection, state_path: impl Into<PathBuf>) -> LimitResult<Self> {
        Self::open_with_clock(config, state_path, Box::new(SystemClock))
    }

    pub fn open_with_clock(
        config: LimitsSection,
        state_path: impl Into<PathBuf>,
        clock: Box<dyn Clock>,
    ) -> LimitResult<Self> {
        let state_path = state_path.into();
        let lease = StateLock::acquire(&state_path)?;
        let state = LimiterState::load(&state_path);
        debug!(
            path = %state_path.display(),
            total_sent = state.total_sent,
            "Opened limiter state"
        );
        Ok(Self {
            config,
            state,
            state_path,
            clock,
            session_sent: 0,
            resting_until: None,
            _lease: lease,
        })
    }

    /// Decides whether a send may happen right now. Checks run in a fixed
    /// order: cooldown, send window, caps, batch rest. Never touches the
    /// state file; pruning only trims the in-memory timestamp lists.
    pub fn check_permission(&mut self) -> Permission {
        let now = self.clock.now_utc();

        if let Some(until) = self.cooldown_until() {
            if now < until {
                return Permission::Denied(DenialReason::CoolingDown {
                    remaining: until - now,
                });
            }
        }

        let hour = self.clock.local_hour();
        let [start, end] = self.config.send_window_hours;
        if !(start..end).contains(&hour) {
            return Permission::Denied(DenialReason::OutsideSendWindow {
                window: [start, end],
                hour,
            });
        }

        self.prune(now);

        if self.state.hourly.len() >= self.config.max_per_hour as usize {
            return Permission::Denied(DenialReason::HourlyCapReached {
                cap: self.config.max_per_hour,
            });
        }
        if self.state.daily.len() >= self.config.max_per_day as usize {
            return Permission::Denied(DenialReason::DailyCapReached {
                cap: self.config.max_per_day,
            });
        }

        if let Some(until) = self.resting_until {
            if now < until {
                return Permission::Denied(DenialReason::Resting {
                    remaining: until - now,
                });
            }
            self.resting_until = None;
        }

        Permission::Granted
    }

    /// Books one send and persists synchronously before returning. The
    /// counters must hit disk before anything else happens; losing a
    /// recorded send is how accounts get banned.
    pub fn record_send(&mut self) -> LimitResult<()> {
        let now = self.clock.now_utc();
        self.state.hourly.push(now);
        self.state.daily.push(now);
        self.state.total_sent += 1;
        self.session_sent += 1;

        if self.config.rest_after_sends > 0 && self.session_sent % self.config.rest_after_sends == 0
        {
            let [a, b] = self.config.rest_minutes;
            let minutes = thread_rng().gen_range(a.min(b)..=a.max(b));
            self.resting_until = Some(now + Duration::minutes(minutes as i64));
            info!(
                minutes,
                session_sent = self.session_sent,
                "Batch finished, resting between batches"
            );
        }

        self.state.save(&self.state_path)?;
        debug!(
            total_sent = self.state.total_sent,
            last_hour = self.state.hourly.len(),
            last_day = self.state.daily.len(),
            "Recorded send"
        );
        Ok(())
    }

    /// Stamps the cooldown start and persists immediately. The stamp stays
    /// in the state file as a durable record; expiry is computed on read.
    pub fn enter_cooldown(&mut self, reason: &str) -> LimitResult<()> {
        let now = self.clock.now_utc();
        warn!(
            reason,
            hours = self.config.cooldown_hours,
            "Entering cooldown"
        );
        self.state.cooldown_started_at = Some(now);
        self.state.save(&self.state_path)
    }

    pub fn phase(&self) -> Phase {
        let now = self.clock.now_utc();
        if let Some(until) = self.cooldown_until() {
            if now < until {
                return Phase::Cooldown { until };
            }
        }
        if let Some(until) = self.resting_until {
            if now < until {
                return Phase::Resting { until };
            }
        }
        Phase::Active
    }

    pub fn snapshot(&mut self) -> LimiterSnapshot {
        let now = self.clock.now_utc();
        self.prune(now);
        LimiterSnapshot {
            phase: self.phase(),
            sent_last_hour: self.state.hourly.len() as u32,
            sent_last_day: self.state.daily.len() as u32,
            max_per_hour: self.config.max_per_hour,
            max_per_day: self.config.max_per_day,
            total_sent: self.state.total_sent,
            session_sent: self.session_sent,
        }
    }

    fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.state
            .cooldown_started_at
            .map(|started| started + Duration::hours(self.config.cooldown_hours as i64))
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::hours(24);
        self.state.hourly.retain(|ts| *ts > hour_ago);
        self.state.daily.retain(|ts| *ts > day_ago);
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use chrono::TimeZone;

    use super::*;

    #[derive(Clone)]
    struct ManualClock {
        now: Arc<Mutex<DateTime<Utc>>>,
        hour: Arc<Mutex<u32>>,
    }

    impl ManualClock {
        fn at_noon() -> Self {
            Self {
                now: Arc::new(Mutex::new(
                    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
                )),
                hour: Arc::new(Mutex::new(12)),
            }
        }

        fn advance(&self, delta: Duration) {
            *self.now.lock().unwrap() += delta;
        }

        fn set_hour(&self, hour: u32) {
            *self.hour.lock().unwrap() = hour;
        }
    }

    impl Clock for ManualClock {
        fn now_utc(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }

        fn local_hour(&self) -> u32 {
            *self.hour.lock().unwrap()
        }
    }

    fn open(
        config: LimitsSection,
        path: &Path,
        clock: &ManualClock,
    ) -> RateLimiter {
        RateLimiter::open_with_clock(config, path, Box::new(clock.clone())).unwrap()
    }

    fn no_rest(max_per_hour: u32, max_per_day: u32) -> LimitsSection {
        LimitsSection {
            max_per_hour,
            max_per_day,
            rest_after_sends: 0,
            send_window_hours: [0, 24],
            ..LimitsSection::default()
        }
    }

    #[test]
    fn hourly_cap_denies_then_reopens_after_an_hour() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limiter.json");
        let clock = ManualClock::at_noon();
        let mut limiter = open(no_rest(3, 20), &path, &clock);

        for _ in 0..3 {
            assert!(limiter.check_permission().is_granted());
            limiter.record_send().unwrap();
        }
        assert_eq!(
            limiter.check_permission(),
            Permission::Denied(DenialReason::HourlyCapReached { cap: 3 })
        );

        clock.advance(Duration::minutes(61));
        assert!(limiter.check_permission().is_granted());
    }

    #[test]
    fn daily_cap_outlives_the_hourly_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limiter.json");
        let clock = ManualClock::at_noon();
        let mut limiter = open(no_rest(100, 5), &path, &clock);

        for _ in 0..5 {
            limiter.record_send().unwrap();
        }
        assert_eq!(
            limiter.check_permission(),
            Permission::Denied(DenialReason::DailyCapReached { cap: 5 })
        );

        clock.advance(Duration::hours(2));
        assert_eq!(
            limiter.check_permission(),
            Permission::Denied(DenialReason::DailyCapReached { cap: 5 })
        );

        clock.advance(Duration::hours(23));
        assert!(limiter.check_permission().is_granted());
    }

    #[test]
    fn batch_rest_kicks_in_before_the_caps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limiter.json");
        let clock = ManualClock::at_noon();
        let config = LimitsSection {
            max_per_hour: 5,
            max_per_day: 20,
            rest_after_sends: 3,
            rest_minutes: [30, 60],
            send_window_hours: [0, 24],
            ..LimitsSection::default()
        };
        let mut limiter = open(config, &path, &clock);

        for _ in 0..3 {
            assert!(limiter.check_permission().is_granted());
            limiter.record_send().unwrap();
        }

        // Under the hourly cap, so the denial must be the batch rest.
        match limiter.check_permission() {
            Permission::Denied(DenialReason::Resting { remaining }) => {
                assert!(remaining <= Duration::minutes(60));
            }
            other => panic!("expected a resting denial, got {other:?}"),
        }
        assert!(matches!(limiter.phase(), Phase::Resting { .. }));

        clock.advance(Duration::minutes(61));
        assert!(limiter.check_permission().is_granted());
    }

    #[test]
    fn cooldown_boundary_is_sharp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limiter.json");
        let clock = ManualClock::at_noon();
        let mut limiter = open(no_rest(3, 20), &path, &clock);

        limiter.enter_cooldown("account restricted").unwrap();
        assert!(matches!(limiter.phase(), Phase::Cooldown { .. }));

        clock.advance(Duration::hours(24) - Duration::seconds(1));
        assert!(matches!(
            limiter.check_permission(),
            Permission::Denied(DenialReason::CoolingDown { .. })
        ));

        clock.advance(Duration::seconds(2));
        assert!(limiter.check_permission().is_granted());
        assert_eq!(limiter.phase(), Phase::Active);
    }

    #[test]
    fn cooldown_outranks_the_send_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limiter.json");
        let clock = ManualClock::at_noon();
        let mut limiter = open(
            LimitsSection {
                rest_after_sends: 0,
                ..LimitsSection::default()
            },
            &path,
            &clock,
        );

        limiter.enter_cooldown("test").unwrap();
        clock.set_hour(3);
        assert!(matches!(
            limiter.check_permission(),
            Permission::Denied(DenialReason::CoolingDown { .. })
        ));
    }

    #[test]
    fn send_window_is_half_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limiter.json");
        let clock = ManualClock::at_noon();
        let config = LimitsSection {
            rest_after_sends: 0,
            send_window_hours: [8, 22],
            ..LimitsSection::default()
        };
        let mut limiter = open(config, &path, &clock);

        clock.set_hour(7);
        assert_eq!(
            limiter.check_permission(),
            Permission::Denied(DenialReason::OutsideSendWindow {
                window: [8, 22],
                hour: 7,
            })
        );
        clock.set_hour(8);
        assert!(limiter.check_permission().is_granted());
        clock.set_hour(21);
        assert!(limiter.check_permission().is_granted());
        clock.set_hour(22);
        assert!(matches!(
            limiter.check_permission(),
            Permission::Denied(DenialReason::OutsideSendWindow { .. })
        ));
    }

    #[test]
    fn recorded_sends_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limiter.json");
        let clock = ManualClock::at_noon();

        let mut limiter = open(no_rest(3, 20), &path, &clock);
        limiter.record_send().unwrap();
        limiter.record_send().unwrap();
        drop(limiter);

        let mut limiter = open(no_rest(3, 20), &path, &clock);
        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.sent_last_hour, 2);
        assert_eq!(snapshot.sent_last_day, 2);
        assert_eq!(snapshot.total_sent, 2);
        assert_eq!(snapshot.session_sent, 0);
    }

    #[test]
    fn second_open_fails_while_the_lease_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limiter.json");
        let clock = ManualClock::at_noon();

        let limiter = open(no_rest(3, 20), &path, &clock);
        let contender =
            RateLimiter::open_with_clock(no_rest(3, 20), &path, Box::new(clock.clone()));
        assert!(matches!(contender, Err(LimitError::LockHeld { .. })));

        drop(limiter);
        RateLimiter::open_with_clock(no_rest(3, 20), &path, Box::new(clock.clone())).unwrap();
    }

    #[test]
    fn corrupt_state_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limiter.json");
        std::fs::write(&path, "definitely not json").unwrap();
        let clock = ManualClock::at_noon();

        let mut limiter = open(no_rest(3, 20), &path, &clock);
        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.total_sent, 0);
        assert!(limiter.check_permission().is_granted());
    }

    // Mirrors a real operating hour: batch of three, forced rest, resume.
    #[test]
    fn batch_of_three_rests_then_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limiter.json");
        let clock = ManualClock::at_noon();
        let config = LimitsSection {
            max_per_hour: 5,
            max_per_day: 20,
            rest_after_sends: 3,
            rest_minutes: [30, 60],
            send_window_hours: [0, 24],
            ..LimitsSection::default()
        };
        let mut limiter = open(config, &path, &clock);

        for send in 1..=3 {
            let permission = limiter.check_permission();
            assert!(permission.is_granted(), "send {send} was denied");
            limiter.record_send().unwrap();
            clock.advance(Duration::minutes(2));
        }

        let denial = limiter.check_permission();
        assert!(
            matches!(denial, Permission::Denied(DenialReason::Resting { .. })),
            "expected resting, got {denial:?}"
        );

        clock.advance(Duration::minutes(60));
        assert!(limiter.check_permission().is_granted());
        limiter.record_send().unwrap();

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.total_sent, 4);
        assert_eq!(snapshot.session_sent, 4);
    }
}
