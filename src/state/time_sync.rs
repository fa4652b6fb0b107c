//! Mapping of device and host timestamps onto the local wall clock.

use std::{collections::VecDeque, time::Duration};

use time::OffsetDateTime;

/// Values at or above this are 100ns ticks since 0001-01-01.
const TICKS_THRESHOLD: i64 = 1_000_000_000_000_000;
/// Values at or above this (and below [`TICKS_THRESHOLD`]) are Unix milliseconds.
const MILLIS_THRESHOLD: i64 = 10_000_000_000;
const TICKS_PER_MILLI: i64 = 10_000;
/// Tick count of 1970-01-01T00:00:00Z.
const TICKS_AT_UNIX_EPOCH: i64 = 621_355_968_000_000_000;

/// Default number of offsets kept in the window.
pub const DEFAULT_OFFSET_WINDOW: usize = 20;

/// Convert a source timestamp of unknown unit into Unix milliseconds.
pub fn source_time_to_unix_ms(raw: i64) -> i64 {
    if raw >= TICKS_THRESHOLD {
        (raw - TICKS_AT_UNIX_EPOCH) / TICKS_PER_MILLI
    } else if raw >= MILLIS_THRESHOLD {
        raw
    } else {
        raw.saturating_mul(1_000)
    }
}

/// Interpret a source timestamp, falling back to `now` when out of range.
pub fn parse_source_timestamp(raw: i64, now: OffsetDateTime) -> OffsetDateTime {
    unix_ms_to_instant(source_time_to_unix_ms(raw)).unwrap_or(now)
}

fn unix_ms_to_instant(ms: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
}

fn instant_to_unix_ms(instant: OffsetDateTime) -> i64 {
    (instant.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Why the synchronizer dropped its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReset {
    /// The device uptime went backwards (reboot).
    ClockRegression {
        /// Uptime seen before.
        previous_ms: u64,
        /// Uptime just received.
        current_ms: u64,
    },
    /// Nothing was received for longer than the session timeout.
    SessionTimeout {
        /// Silence that triggered the reset.
        idle: Duration,
    },
    /// The device switched between uptime and timestamp references.
    ReferenceChanged,
}

/// Result of [`TimeSync::normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalized {
    /// Source time expressed on the local timeline.
    pub instant: OffsetDateTime,
    /// Set when this sample started a fresh sync session.
    pub reset: Option<SyncReset>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reference {
    Uptime,
    Timestamp,
}

/// Offset estimator between the prop clock and the local wall clock.
///
/// Keeps the last offsets (`local receipt - source time`) and applies the
/// largest one, so a converted prop time never lands ahead of the sample
/// that arrived with the least delay.
#[derive(Debug, Clone)]
pub struct TimeSync {
    offsets: VecDeque<i64>,
    capacity: usize,
    session_timeout: Duration,
    offset_ms: i64,
    reference: Option<Reference>,
    last_uptime_ms: Option<u64>,
    last_sample_at: Option<OffsetDateTime>,
}

impl TimeSync {
    /// Create a synchronizer with the given window size and silence timeout.
    pub fn new(capacity: usize, session_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            offsets: VecDeque::with_capacity(capacity),
            capacity,
            session_timeout,
            offset_ms: 0,
            reference: None,
            last_uptime_ms: None,
            last_sample_at: None,
        }
    }

    /// Offset currently applied, in milliseconds.
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// Forget every observation.
    pub fn reset(&mut self) {
        self.offsets.clear();
        self.offset_ms = 0;
        self.reference = None;
        self.last_uptime_ms = None;
        self.last_sample_at = None;
    }

    /// Convert a prop timestamp (or uptime, when present) to a local instant.
    pub fn normalize(
        &mut self,
        timestamp: i64,
        uptime_ms: Option<u64>,
        now: OffsetDateTime,
    ) -> Normalized {
        let reset = self.detect_reset(uptime_ms, now);
        if reset.is_some() {
            self.reset();
        }

        let input_ms = match uptime_ms {
            Some(uptime) => {
                self.reference = Some(Reference::Uptime);
                self.last_uptime_ms = Some(uptime);
                i64::try_from(uptime).unwrap_or(i64::MAX)
            }
            None => {
                self.reference = Some(Reference::Timestamp);
                source_time_to_unix_ms(timestamp)
            }
        };

        self.offsets
            .push_back(instant_to_unix_ms(now).saturating_sub(input_ms));
        while self.offsets.len() > self.capacity {
            self.offsets.pop_front();
        }
        self.offset_ms = self.offsets.iter().copied().max().unwrap_or(0);
        self.last_sample_at = Some(now);

        let instant = unix_ms_to_instant(input_ms.saturating_add(self.offset_ms)).unwrap_or(now);
        Normalized { instant, reset }
    }

    fn detect_reset(&self, uptime_ms: Option<u64>, now: OffsetDateTime) -> Option<SyncReset> {
        if let Some(last) = self.last_sample_at {
            let idle = Duration::try_from(now - last).unwrap_or(Duration::ZERO);
            if idle > self.session_timeout {
                return Some(SyncReset::SessionTimeout { idle });
            }
        }

        match (uptime_ms, self.last_uptime_ms) {
            (Some(current_ms), Some(previous_ms)) if current_ms < previous_ms => {
                return Some(SyncReset::ClockRegression {
                    previous_ms,
                    current_ms,
                });
            }
            _ => {}
        }

        let reference = if uptime_ms.is_some() {
            Reference::Uptime
        } else {
            Reference::Timestamp
        };
        match self.reference {
            Some(previous) if previous != reference => Some(SyncReset::ReferenceChanged),
            _ => None,
        }
    }
}
