//! Per-key sliding-window request limiter.
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Key count at which idle keys are first swept out.
const SWEEP_MIN_KEYS: usize = 256;

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    requests: Mutex<Requests>,
}

#[derive(Debug)]
struct Requests {
    logs: HashMap<String, VecDeque<Instant>>,
    sweep_at: usize,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(Requests {
                logs: HashMap::new(),
                sweep_at: SWEEP_MIN_KEYS,
            }),
        }
    }

    /// Per-minute limiter as configured for bot users.
    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Admits and records the request when fewer than `max_requests` were
    /// recorded for `key` inside the window.
    pub fn check_limit(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let log = requests.logs.entry(key.to_string()).or_default();
        self.evict(log, now);
        let admitted = log.len() < self.max_requests;
        if admitted {
            log.push_back(now);
        }
        if requests.logs.len() >= requests.sweep_at {
            self.sweep(&mut requests, now);
        }
        admitted
    }

    /// Forgets keys with no requests left inside the window.
    pub fn cleanup(&self) {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        self.sweep(&mut requests, Instant::now());
    }

    pub fn tracked_keys(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .logs
            .len()
    }

    fn sweep(&self, requests: &mut Requests, now: Instant) {
        requests.logs.retain(|_, log| {
            self.evict(log, now);
            !log.is_empty()
        });
        requests.sweep_at = (requests.logs.len() * 2).max(SWEEP_MIN_KEYS);
    }

    pub fn remaining(&self, key: &str) -> usize {
        let now = Instant::now();
        let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let recent = requests.logs.get(key).map_or(0, |log| {
            log.iter()
                .filter(|t| now.duration_since(**t) < self.window)
                .count()
        });
        self.max_requests.saturating_sub(recent)
    }

    /// When the oldest recorded request leaves the window.
    pub fn reset_time(&self, key: &str) -> Option<Instant> {
        let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        requests.logs.get(key)?.iter().min().map(|t| *t + self.window)
    }

    fn evict(&self, log: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = log.front() {
            if now.duration_since(*front) >= self.window {
                log.pop_front();
            } else {
                break;
            }
        }
    }
}
