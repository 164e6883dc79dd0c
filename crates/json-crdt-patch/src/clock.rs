//! Logical clocks that mint operation ids.
//!
//! A clock is single-writer state: `tick` reserves a run of consecutive ids
//! in the clock's session and is not synchronized, so a clock must never be
//! shared across threads without external serialization.

use crate::op::Timestamp;
use crate::SESSION_SERVER;

/// Session-scoped source of monotonically increasing operation ids.
pub trait Clock {
    /// Session id of every timestamp this clock issues. Fixed for the
    /// clock's lifetime.
    fn sid(&self) -> u64;

    /// Next unissued logical time.
    fn time(&self) -> u64;

    /// Reserves `span` consecutive ids and returns the first of them.
    fn tick(&mut self, span: u64) -> Timestamp;
}

/// Peer-local clock with an arbitrary session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalClock {
    sid: u64,
    time: u64,
}

impl LogicalClock {
    pub fn new(sid: u64, time: u64) -> Self {
        Self { sid, time }
    }
}

impl Clock for LogicalClock {
    fn sid(&self) -> u64 {
        self.sid
    }

    fn time(&self) -> u64 {
        self.time
    }

    fn tick(&mut self, span: u64) -> Timestamp {
        let ts = Timestamp {
            sid: self.sid,
            time: self.time,
        };
        self.time += span;
        ts
    }
}

/// Authority clock bound to the reserved server session. Used once a patch
/// has been accepted and needs globally agreed ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerClock {
    time: u64,
}

impl ServerClock {
    pub fn new(time: u64) -> Self {
        Self { time }
    }
}

impl Clock for ServerClock {
    fn sid(&self) -> u64 {
        SESSION_SERVER
    }

    fn time(&self) -> u64 {
        self.time
    }

    fn tick(&mut self, span: u64) -> Timestamp {
        let ts = Timestamp {
            sid: SESSION_SERVER,
            time: self.time,
        };
        self.time += span;
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_returns_first_reserved_id() {
        let mut clock = LogicalClock::new(5, 25);
        assert_eq!(clock.tick(3), Timestamp { sid: 5, time: 25 });
        assert_eq!(clock.time(), 28);
        assert_eq!(clock.tick(1), Timestamp { sid: 5, time: 28 });
    }

    #[test]
    fn server_clock_uses_reserved_session() {
        let mut clock = ServerClock::new(5);
        let ts = clock.tick(1);
        assert_eq!(ts.sid, SESSION_SERVER);
        assert_eq!(ts.time, 5);
        assert_eq!(clock.time(), 6);
    }
}
