//! Per-device rate limiting of status output, and human duration parsing.
//!
//! Devices advertise many times per second. The throttle lets at most one
//! status line per device through per interval, measured on the reception
//! clock of the observations rather than on wall time when printing.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// A throttle that limits the rate of events per device id.
///
/// Each device is tracked independently, allowing at most one event per `interval`.
/// The first event for a device is always allowed.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last_emitted: HashMap<String, SystemTime>,
}

impl Throttle {
    /// Create a new throttle with the specified minimum interval between events.
    ///
    /// # Example
    /// ```
    /// use std::time::{Duration, SystemTime};
    /// use continuity_listener::throttle::Throttle;
    ///
    /// let mut throttle = Throttle::new(Duration::from_secs(3));
    /// let now = SystemTime::now();
    /// assert!(throttle.should_emit("AA:BB:CC:DD:EE:FF", now));
    /// assert!(!throttle.should_emit("AA:BB:CC:DD:EE:FF", now));
    /// ```
    pub fn new(interval: Duration) -> Self {
        Throttle {
            interval,
            last_emitted: HashMap::new(),
        }
    }

    /// Check whether an event for `id` at time `now` should be let through.
    ///
    /// Only emitted events restart the interval. A clock that went backwards
    /// counts as no time having passed.
    pub fn should_emit(&mut self, id: &str, now: SystemTime) -> bool {
        let throttled = self.last_emitted.get(id).is_some_and(|last| {
            now.duration_since(*last)
                .map_or(true, |elapsed| elapsed < self.interval)
        });
        if !throttled {
            self.last_emitted.insert(id.to_string(), now);
        }
        !throttled
    }

    /// Drop the state kept for `id`, e.g. once the device is evicted.
    pub fn forget(&mut self, id: &str) {
        self.last_emitted.remove(id);
    }
}

const UNITS: [(&str, Duration); 4] = [
    ("ms", Duration::from_millis(1)),
    ("h", Duration::from_secs(3600)),
    ("m", Duration::from_secs(60)),
    ("s", Duration::from_secs(1)),
];

/// Parse a duration from a human-readable string.
///
/// Accepts `ms`, `s`, `m` and `h` suffixes; a bare number is seconds.
///
/// # Examples
/// ```
/// use continuity_listener::throttle::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (number, unit) = UNITS
        .iter()
        .find_map(|(suffix, unit)| src.strip_suffix(suffix).map(|n| (n.trim(), *unit)))
        .unwrap_or((src, Duration::from_secs(1)));

    let count: u32 = number
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;
    unit.checked_mul(count)
        .ok_or_else(|| format!("duration out of range: {src}"))
}
