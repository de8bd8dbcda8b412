//! Debounced session refresh
//!
//! Periodic polling, the host's refresh signal and focus regain all end up as
//! requests here; a burst of requests yields a single refresh.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Startup,
    Poll,
    HostSignal,
    FocusRegained,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    reason: RefreshReason,
    first: DateTime<Utc>,
    last: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SessionRefresher {
    poll_interval: Duration,
    debounce: Duration,
    /// Upper bound on how long a steady stream of requests can delay a refresh
    max_wait: Duration,
    next_poll: DateTime<Utc>,
    pending: Option<Pending>,
}

impl SessionRefresher {
    pub fn new(poll_interval: Duration, debounce: Duration, now: DateTime<Utc>) -> Self {
        Self {
            poll_interval,
            debounce,
            max_wait: debounce * 4,
            next_poll: now + poll_interval,
            pending: None,
        }
    }

    #[allow(dead_code)]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Ask for a refresh; merges with any request already waiting
    pub fn request(&mut self, reason: RefreshReason, now: DateTime<Utc>) {
        match &mut self.pending {
            Some(pending) => {
                pending.last = now;
                // An explicit trigger says more than a poll
                if reason != RefreshReason::Poll {
                    pending.reason = reason;
                }
            }
            None => {
                self.pending = Some(Pending {
                    reason,
                    first: now,
                    last: now,
                })
            }
        }
    }

    /// Returns the reason when a refresh should run now
    pub fn due(&mut self, now: DateTime<Utc>) -> Option<RefreshReason> {
        if now >= self.next_poll {
            self.request(RefreshReason::Poll, now);
            self.next_poll = now + self.poll_interval;
        }

        let pending = self.pending?;
        let quiet = now - pending.last >= self.debounce;
        let overdue = now - pending.first >= self.max_wait;
        if !(quiet || overdue) {
            return None;
        }

        self.pending = None;
        // Any refresh restarts the polling clock
        self.next_poll = now + self.poll_interval;
        Some(pending.reason)
    }
}
