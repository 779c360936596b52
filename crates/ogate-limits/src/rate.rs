use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use ogate_common::{UNLIMITED, normalize_limit};

use crate::clock::{Clock, MonotonicClock};

const WINDOW_SECS: u64 = 60;

/// Sliding one-minute counter: per-second buckets, pruned on every read.
/// The invariant is that `total` equals the sum of contributions whose
/// timestamps lie within the trailing 60 seconds.
#[derive(Debug, Default)]
struct Window {
    buckets: VecDeque<(u64, i64)>,
}

impl Window {
    fn add(&mut self, second: u64, count: i64) {
        match self.buckets.back_mut() {
            Some((last, total)) if *last == second => *total += count,
            _ => self.buckets.push_back((second, count)),
        }
    }

    fn prune(&mut self, second: u64) {
        let floor = second.saturating_sub(WINDOW_SECS - 1);
        while let Some((first, _)) = self.buckets.front() {
            if *first < floor {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn total(&mut self, second: u64) -> i64 {
        self.prune(second);
        self.buckets.iter().map(|(_, count)| count).sum()
    }

    /// Replace history with a single synthetic bucket (mirror-sync).
    fn overwrite(&mut self, second: u64, count: i64) {
        self.buckets.clear();
        if count > 0 {
            self.buckets.push_back((second, count));
        }
    }
}

#[derive(Debug)]
struct KeyState {
    rpm_limit: i64,
    tpm_limit: i64,
    requests: Window,
    tokens: Window,
}

impl KeyState {
    fn new(rpm_limit: i64, tpm_limit: i64) -> Self {
        Self {
            rpm_limit,
            tpm_limit,
            requests: Window::default(),
            tokens: Window::default(),
        }
    }

    fn allows(&mut self, second: u64) -> bool {
        if self.rpm_limit != UNLIMITED && self.requests.total(second) >= self.rpm_limit {
            return false;
        }
        if self.tpm_limit != UNLIMITED && self.tokens.total(second) >= self.tpm_limit {
            return false;
        }
        true
    }
}

type Entry = Arc<Mutex<KeyState>>;

/// Request/token rate limiter over per-credential and per-(credential,
/// model) keys. Each key carries its own lock so independent credentials
/// never serialize on each other.
#[derive(Debug)]
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    epoch: Instant,
    creds: RwLock<HashMap<String, Entry>>,
    models: RwLock<HashMap<(String, String), Entry>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Arc::new(MonotonicClock))
    }
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        Self {
            clock,
            epoch,
            creds: RwLock::new(HashMap::new()),
            models: RwLock::new(HashMap::new()),
        }
    }

    fn second(&self) -> u64 {
        self.clock.now().duration_since(self.epoch).as_secs()
    }

    pub fn add_credential(&self, name: impl Into<String>, rpm: i64) {
        self.add_credential_with_tpm(name, rpm, UNLIMITED);
    }

    /// Registers or re-limits a credential key. Wire 0 means unlimited and
    /// is stored as -1; existing windows are kept.
    pub fn add_credential_with_tpm(&self, name: impl Into<String>, rpm: i64, tpm: i64) {
        let rpm = normalize_limit(rpm);
        let tpm = normalize_limit(tpm);
        let name = name.into();
        let mut creds = self.creds.write().expect("limiter lock");
        match creds.get(&name) {
            Some(entry) => {
                let mut state = entry.lock().expect("key lock");
                state.rpm_limit = rpm;
                state.tpm_limit = tpm;
            }
            None => {
                creds.insert(name, Arc::new(Mutex::new(KeyState::new(rpm, tpm))));
            }
        }
    }

    pub fn add_model(&self, cred: impl Into<String>, model: impl Into<String>, rpm: i64) {
        self.add_model_with_tpm(cred, model, rpm, UNLIMITED);
    }

    pub fn add_model_with_tpm(
        &self,
        cred: impl Into<String>,
        model: impl Into<String>,
        rpm: i64,
        tpm: i64,
    ) {
        let rpm = normalize_limit(rpm);
        let tpm = normalize_limit(tpm);
        let key = (cred.into(), model.into());
        let mut models = self.models.write().expect("limiter lock");
        match models.get(&key) {
            Some(entry) => {
                let mut state = entry.lock().expect("key lock");
                state.rpm_limit = rpm;
                state.tpm_limit = tpm;
            }
            None => {
                models.insert(key, Arc::new(Mutex::new(KeyState::new(rpm, tpm))));
            }
        }
    }

    fn cred_entry(&self, name: &str) -> Entry {
        if let Some(entry) = self.creds.read().expect("limiter lock").get(name) {
            return entry.clone();
        }
        let mut creds = self.creds.write().expect("limiter lock");
        creds
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(KeyState::new(UNLIMITED, UNLIMITED))))
            .clone()
    }

    fn model_entry(&self, cred: &str, model: &str) -> Entry {
        let key = (cred.to_string(), model.to_string());
        if let Some(entry) = self.models.read().expect("limiter lock").get(&key) {
            return entry.clone();
        }
        let mut models = self.models.write().expect("limiter lock");
        models
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(KeyState::new(UNLIMITED, UNLIMITED))))
            .clone()
    }

    pub fn allow_credential(&self, name: &str) -> bool {
        let second = self.second();
        self.cred_entry(name).lock().expect("key lock").allows(second)
    }

    pub fn allow_model(&self, cred: &str, model: &str) -> bool {
        let second = self.second();
        self.model_entry(cred, model)
            .lock()
            .expect("key lock")
            .allows(second)
    }

    /// Admission: check both keys and, when both allow, record one request
    /// against each. The increment is eager; an admitted request that later
    /// aborts still occupies its slot.
    pub fn try_admit(&self, cred: &str, model: &str) -> bool {
        let second = self.second();
        let cred_entry = self.cred_entry(cred);
        let model_entry = self.model_entry(cred, model);
        let mut cred_state = cred_entry.lock().expect("key lock");
        let mut model_state = model_entry.lock().expect("key lock");
        if !cred_state.allows(second) || !model_state.allows(second) {
            return false;
        }
        cred_state.requests.add(second, 1);
        model_state.requests.add(second, 1);
        true
    }

    /// Record token usage after the response (or last stream chunk) is
    /// delivered. Negative counts clamp to zero.
    pub fn consume(&self, cred: &str, tokens: i64) {
        let tokens = tokens.max(0);
        if tokens == 0 {
            return;
        }
        let second = self.second();
        self.cred_entry(cred)
            .lock()
            .expect("key lock")
            .tokens
            .add(second, tokens);
    }

    pub fn consume_model(&self, cred: &str, model: &str, tokens: i64) {
        let tokens = tokens.max(0);
        if tokens == 0 {
            return;
        }
        let second = self.second();
        self.model_entry(cred, model)
            .lock()
            .expect("key lock")
            .tokens
            .add(second, tokens);
    }

    /// Overwrite our view of a credential's current usage (peer mirror).
    pub fn set_current_usage(&self, cred: &str, requests: i64, tokens: i64) {
        let second = self.second();
        let entry = self.cred_entry(cred);
        let mut state = entry.lock().expect("key lock");
        state.requests.overwrite(second, requests.max(0));
        state.tokens.overwrite(second, tokens.max(0));
    }

    pub fn set_model_current_usage(&self, cred: &str, model: &str, requests: i64, tokens: i64) {
        let second = self.second();
        let entry = self.model_entry(cred, model);
        let mut state = entry.lock().expect("key lock");
        state.requests.overwrite(second, requests.max(0));
        state.tokens.overwrite(second, tokens.max(0));
    }

    pub fn snapshot(&self) -> Vec<RateRow> {
        let second = self.second();
        let mut rows = Vec::new();
        for (name, entry) in self.creds.read().expect("limiter lock").iter() {
            let mut state = entry.lock().expect("key lock");
            rows.push(RateRow {
                credential: name.clone(),
                model: None,
                rpm_limit: state.rpm_limit,
                rpm_used: state.requests.total(second),
                tpm_limit: state.tpm_limit,
                tpm_used: state.tokens.total(second),
            });
        }
        for ((cred, model), entry) in self.models.read().expect("limiter lock").iter() {
            let mut state = entry.lock().expect("key lock");
            rows.push(RateRow {
                credential: cred.clone(),
                model: Some(model.clone()),
                rpm_limit: state.rpm_limit,
                rpm_used: state.requests.total(second),
                tpm_limit: state.tpm_limit,
                tpm_used: state.tokens.total(second),
            });
        }
        rows.sort_by(|a, b| (&a.credential, &a.model).cmp(&(&b.credential, &b.model)));
        rows
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateRow {
    pub credential: String,
    pub model: Option<String>,
    pub rpm_limit: i64,
    pub rpm_used: i64,
    pub tpm_limit: i64,
    pub tpm_used: i64,
}
