use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::{Clock, MonotonicClock};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub max_consecutive_failures: u32,
    pub ban_ttl: Duration,
    pub tracked_codes: HashSet<u16>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            ban_ttl: Duration::from_secs(300),
            tracked_codes: [401, 403, 500].into_iter().collect(),
        }
    }
}

/// Per-key breaker state. A key is either counting failures or banned
/// until an instant; an untracked status resets it to healthy.
#[derive(Debug, Default)]
struct CircuitRecord {
    consecutive: u32,
    banned_until: Option<Instant>,
    codes: HashMap<u16, u64>,
}

/// Key is (credential, model); the bare credential is tracked under
/// `model = None` and receives every status recorded for the credential.
type BreakerKey = (String, Option<String>);

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<BreakerKey, CircuitRecord>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock))
    }

    pub fn with_clock(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, cred: &str, model: &str, status: u16) {
        let now = self.clock.now();
        let mut records = self.records.lock().expect("breaker lock");
        for key in [
            (cred.to_string(), Some(model.to_string())),
            (cred.to_string(), None),
        ] {
            let record = records.entry(key).or_default();
            self.apply(record, status, now);
        }
    }

    fn apply(&self, record: &mut CircuitRecord, status: u16, now: Instant) {
        if !self.config.tracked_codes.contains(&status) {
            record.consecutive = 0;
            record.banned_until = None;
            return;
        }
        record.consecutive += 1;
        if record.consecutive >= self.config.max_consecutive_failures {
            record.banned_until = Some(now + self.config.ban_ttl);
            *record.codes.entry(status).or_insert(0) += 1;
        }
    }

    pub fn is_banned(&self, cred: &str, model: &str) -> bool {
        self.check(&(cred.to_string(), Some(model.to_string())))
    }

    pub fn is_banned_credential(&self, cred: &str) -> bool {
        self.check(&(cred.to_string(), None))
    }

    fn check(&self, key: &BreakerKey) -> bool {
        let now = self.clock.now();
        let mut records = self.records.lock().expect("breaker lock");
        let Some(record) = records.get_mut(key) else {
            return false;
        };
        match record.banned_until {
            Some(until) if now >= until => {
                record.banned_until = None;
                record.consecutive = 0;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Currently banned keys with their error-code histograms.
    pub fn banned(&self) -> Vec<BannedRecord> {
        let now = self.clock.now();
        let records = self.records.lock().expect("breaker lock");
        let mut out = Vec::new();
        for ((cred, model), record) in records.iter() {
            let Some(until) = record.banned_until else {
                continue;
            };
            if now >= until {
                continue;
            }
            out.push(BannedRecord {
                credential: cred.clone(),
                model: model.clone(),
                remaining: until - now,
                codes: record.codes.clone(),
            });
        }
        out.sort_by(|a, b| (&a.credential, &a.model).cmp(&(&b.credential, &b.model)));
        out
    }
}

#[derive(Debug, Clone)]
pub struct BannedRecord {
    pub credential: String,
    pub model: Option<String>,
    pub remaining: Duration,
    pub codes: HashMap<u16, u64>,
}

#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;

    use super::*;

    fn breaker() -> (Arc<ManualClock>, CircuitBreaker) {
        let clock = Arc::new(ManualClock::new());
        let config = BreakerConfig {
            max_consecutive_failures: 3,
            ban_ttl: Duration::from_secs(60),
            tracked_codes: [500].into_iter().collect(),
        };
        (clock.clone(), CircuitBreaker::with_clock(config, clock))
    }

    #[test]
    fn bans_after_threshold_and_recovers_after_ttl() {
        let (clock, breaker) = breaker();
        breaker.record("a", "m", 500);
        breaker.record("a", "m", 500);
        assert!(!breaker.is_banned("a", "m"));
        breaker.record("a", "m", 500);
        assert!(breaker.is_banned("a", "m"));
        assert!(breaker.is_banned_credential("a"));

        clock.advance(Duration::from_secs(60));
        assert!(!breaker.is_banned("a", "m"));
        assert!(!breaker.is_banned_credential("a"));
    }

    #[test]
    fn success_before_threshold_resets_the_counter() {
        let (_, breaker) = breaker();
        breaker.record("a", "m", 500);
        breaker.record("a", "m", 500);
        breaker.record("a", "m", 200);
        breaker.record("a", "m", 500);
        breaker.record("a", "m", 500);
        assert!(!breaker.is_banned("a", "m"));
    }

    #[test]
    fn untracked_error_codes_do_not_count() {
        let (_, breaker) = breaker();
        for _ in 0..5 {
            breaker.record("a", "m", 404);
        }
        assert!(!breaker.is_banned("a", "m"));
    }

    #[test]
    fn histogram_records_banned_codes() {
        let (_, breaker) = breaker();
        for _ in 0..3 {
            breaker.record("a", "m", 500);
        }
        let banned = breaker.banned();
        let pair = banned
            .iter()
            .find(|record| record.model.as_deref() == Some("m"))
            .unwrap();
        assert_eq!(pair.codes.get(&500), Some(&1));
    }

    #[test]
    fn models_are_tracked_independently() {
        let (_, breaker) = breaker();
        for _ in 0..3 {
            breaker.record("a", "m1", 500);
        }
        assert!(breaker.is_banned("a", "m1"));
        assert!(!breaker.is_banned("a", "m2"));
        // The bare credential saw the same streak.
        assert!(breaker.is_banned_credential("a"));
    }
}
