//! Fail2ban-style repeated-offense banning.
//!
//! # Responsibilities
//! - Count failures per key (source IP or device id) over a sliding window
//! - Ban a key for `ban_time` once `max_retry` failures land in the window
//! - Expire bans and idle windows
//!
//! # Design Decisions
//! - Each key is one logical counter: the whole read-modify-write happens
//!   under its `dashmap` entry guard, so two simultaneous failures can never
//!   both observe a count below the threshold
//! - A ban, once set, outlives any `reset` until it elapses
//! - Thresholds come from the caller's policy snapshot, so a reload applies
//!   to the next failure without touching stored counters

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::clock::SharedClock;
use crate::config::Fail2BanConfig;

#[derive(Debug, Default)]
struct CounterEntry {
    failures: VecDeque<DateTime<Utc>>,
    ban_until: Option<DateTime<Utc>>,
}

impl CounterEntry {
    fn banned_at(&self, now: DateTime<Utc>) -> bool {
        self.ban_until.is_some_and(|until| until > now)
    }

    fn prune(&mut self, now: DateTime<Utc>, policy: &Fail2BanConfig) {
        let window = policy.window();
        while self.failures.front().is_some_and(|f| *f + window <= now) {
            self.failures.pop_front();
        }
        if self.ban_until.is_some_and(|until| until <= now) {
            self.ban_until = None;
        }
    }
}

/// Outcome of recording one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strike {
    /// Failures in the window, including this one.
    pub count: u32,
    /// The key is banned after this failure.
    pub banned: bool,
    /// This failure is the one that set the ban.
    pub newly_banned: bool,
}

/// Point-in-time view of one counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub count: usize,
    pub window_start: Option<DateTime<Utc>>,
    pub ban_until: Option<DateTime<Utc>>,
}

/// Shared failure counters.
pub struct BanCounter {
    entries: DashMap<String, CounterEntry>,
    clock: SharedClock,
}

impl BanCounter {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Atomically record a failure for `key`.
    pub fn record_failure(&self, key: &str, policy: &Fail2BanConfig) -> Strike {
        if !policy.enabled {
            return Strike {
                count: 0,
                banned: false,
                newly_banned: false,
            };
        }

        let now = self.clock.now();
        let max_retry = policy.max_retry.max(1) as usize;
        let mut entry = self.entries.entry(key.to_string()).or_default();
        entry.prune(now, policy);

        entry.failures.push_back(now);
        while entry.failures.len() > max_retry {
            entry.failures.pop_front();
        }
        let count = entry.failures.len();

        let already_banned = entry.banned_at(now);
        let newly_banned = !already_banned && count >= max_retry;
        if newly_banned {
            entry.ban_until = Some(now + policy.ban_duration());
            // A fresh window starts once the ban is served.
            entry.failures.clear();
            tracing::warn!(
                key,
                failures = count,
                ban_secs = policy.ban_time,
                "ban threshold reached"
            );
        }

        Strike {
            count: count as u32,
            banned: already_banned || newly_banned,
            newly_banned,
        }
    }

    pub fn is_banned(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries.get(key).is_some_and(|e| e.banned_at(now))
    }

    /// Clear the failure window for `key`. An active ban is kept.
    pub fn reset(&self, key: &str) {
        let now = self.clock.now();
        if let Entry::Occupied(mut entry) = self.entries.entry(key.to_string()) {
            if entry.get().banned_at(now) {
                entry.get_mut().failures.clear();
            } else {
                entry.remove();
            }
        }
    }

    pub fn snapshot(&self, key: &str) -> Option<CounterSnapshot> {
        self.entries.get(key).map(|e| CounterSnapshot {
            count: e.failures.len(),
            window_start: e.failures.front().copied(),
            ban_until: e.ban_until,
        })
    }

    /// Drop counters whose window and ban have both lapsed. Returns how many
    /// keys were removed.
    pub fn purge_expired(&self, policy: &Fail2BanConfig) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry.prune(now, policy);
            !entry.failures.is_empty() || entry.ban_until.is_some()
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn banned_count(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| e.banned_at(now)).count()
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}
