use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::{Timestamp, Uuid};

/// Error returned when the time-UUID generator cannot produce an ID.
#[derive(Debug, thiserror::Error)]
pub enum TimeUuidError {
    /// The system clock jumped backward by more than the maximum tolerable drift.
    #[error(
        "system clock jumped backward by {drift_ms}ms (>{max_drift_ms}ms max) — check NTP configuration"
    )]
    ClockDriftExceeded { drift_ms: i64, max_drift_ms: i64 },
}

/// 100ns ticks between the RFC 4122 epoch (1582-10-15) and the Unix epoch.
const GREGORIAN_UNIX_OFFSET_TICKS: u64 = 0x01B2_1DD2_1381_4000;

/// Maximum tolerable backward clock drift before refusing to mint IDs.
/// Below this the generator keeps issuing `last + 1` until the clock catches up.
const MAX_CLOCK_DRIFT_MS: i64 = 5_000;

const TICKS_PER_MS: u64 = 10_000;

/// A version-1 (time-based) UUID ordered by its embedded timestamp.
///
/// Message rows and shard pivots are both identified by time-UUIDs; routing
/// compares them the way the wide-column store clusters them: embedded
/// 60-bit timestamp first, raw bytes as the tiebreak. A `queueMessageId`
/// identifies one delivery attempt; redelivery mints a fresh one.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimeUuid(Uuid);

impl TimeUuid {
    /// Wrap an existing UUID. Ordering interprets the leading bytes using the
    /// version-1 field layout, so only wrap IDs minted by a v1 source.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The boundary UUID for a wall-clock instant: the smallest time-UUID a
    /// well-formed v1 source can mint at `unix_ms` (zero clock sequence and
    /// node). Used for shard pivots and "now" comparisons.
    pub fn start_of(unix_ms: i64) -> Self {
        let ticks = GREGORIAN_UNIX_OFFSET_TICKS.saturating_add_signed(unix_ms * TICKS_PER_MS as i64);
        Self(Uuid::new_v1(Timestamp::from_rfc4122(ticks, 0), &[0u8; 6]))
    }

    /// Smallest possible value.
    pub fn min() -> Self {
        Self(Uuid::nil())
    }

    /// Largest possible value. Range-scan upper bound, never minted.
    pub fn max() -> Self {
        Self(Uuid::max())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// The embedded 60-bit timestamp in 100ns ticks since the RFC 4122 epoch.
    pub fn ticks(&self) -> u64 {
        let b = self.0.as_bytes();
        let time_low = u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64;
        let time_mid = u16::from_be_bytes([b[4], b[5]]) as u64;
        let time_hi = (u16::from_be_bytes([b[6], b[7]]) & 0x0FFF) as u64;
        (time_hi << 48) | (time_mid << 32) | time_low
    }

    /// The embedded timestamp as Unix milliseconds.
    pub fn unix_ts_ms(&self) -> i64 {
        (self.ticks() as i64 - GREGORIAN_UNIX_OFFSET_TICKS as i64) / TICKS_PER_MS as i64
    }
}

impl Ord for TimeUuid {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.ticks(), self.0.as_bytes()).cmp(&(other.ticks(), other.0.as_bytes()))
    }
}

impl PartialOrd for TimeUuid {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TimeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lock-free time-UUID generator.
///
/// A single `AtomicU64` holds the last issued tick count; each mint CASes in
/// `max(now, last + 1)`, so IDs are unique and strictly increasing within the
/// process even when many tasks mint in the same 100ns tick. A backward clock
/// jump under [`MAX_CLOCK_DRIFT_MS`] keeps issuing `last + 1` until the clock
/// catches up; a larger jump is refused.
pub struct TimeUuidGenerator {
    node_id: [u8; 6],
    clock_seq: u16,
    last_ticks: AtomicU64,
    /// Disambiguates IDs minted for the same future instant by `at_unix_ms`.
    delay_seq: AtomicU64,
}

impl TimeUuidGenerator {
    /// Create a generator with a node id derived from the process id.
    pub fn new() -> Self {
        let pid = std::process::id();
        let p = pid.to_be_bytes();
        Self::with_node_id([0x51, 0x6b, p[0], p[1], p[2], p[3]])
    }

    /// Create a generator with an explicit node id (stable per host/process).
    pub fn with_node_id(node_id: [u8; 6]) -> Self {
        Self {
            node_id,
            clock_seq: (std::process::id() & 0x3FFF) as u16,
            last_ticks: AtomicU64::new(0),
            delay_seq: AtomicU64::new(0),
        }
    }

    fn now_ticks() -> u64 {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch");
        GREGORIAN_UNIX_OFFSET_TICKS + (since_epoch.as_nanos() / 100) as u64
    }

    fn build(&self, ticks: u64) -> TimeUuid {
        TimeUuid(Uuid::new_v1(
            Timestamp::from_rfc4122(ticks, self.clock_seq),
            &self.node_id,
        ))
    }

    /// Mint the next unique time-UUID. Lock-free.
    ///
    /// Returns `Err(TimeUuidError::ClockDriftExceeded)` if the system clock
    /// has jumped backward by more than 5 seconds.
    pub fn next(&self) -> Result<TimeUuid, TimeUuidError> {
        loop {
            let now = Self::now_ticks();
            let last = self.last_ticks.load(Ordering::Acquire);

            let candidate = if now > last {
                now
            } else {
                let drift_ms = ((last - now) / TICKS_PER_MS) as i64;
                if drift_ms > MAX_CLOCK_DRIFT_MS {
                    return Err(TimeUuidError::ClockDriftExceeded {
                        drift_ms,
                        max_drift_ms: MAX_CLOCK_DRIFT_MS,
                    });
                }
                if drift_ms > 100 {
                    tracing::warn!(
                        drift_ms,
                        "time-uuid: system clock behind last issued ID, issuing sequential ticks"
                    );
                }
                last + 1
            };

            if self
                .last_ticks
                .compare_exchange(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(self.build(candidate));
            }
        }
    }

    /// Mint a time-UUID for an instant, usually in the future (delayed sends).
    ///
    /// Does not advance the generator clock: a delayed ID must not drag
    /// subsequent [`next`](Self::next) IDs into the future, or fresh messages
    /// would route into not-yet-open shards.
    pub fn at_unix_ms(&self, unix_ms: i64) -> TimeUuid {
        let base = GREGORIAN_UNIX_OFFSET_TICKS.saturating_add_signed(unix_ms * TICKS_PER_MS as i64);
        let seq = self.delay_seq.fetch_add(1, Ordering::Relaxed) % TICKS_PER_MS;
        self.build(base + seq)
    }
}

impl Default for TimeUuidGenerator {
    fn default() -> Self {
        Self::new()
    }
}
