//! Keepalive state machine.
//!
//! Pure timing logic for detecting a silently dead socket. The connection
//! task feeds it inbound activity and timer expiries and performs the
//! returned actions.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeepaliveState {
    Idle,
    PingSent,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeepaliveAction {
    SendPing,
    Close,
}

#[derive(Debug)]
pub(crate) struct Keepalive {
    state: KeepaliveState,
    inactivity_timeout: Duration,
    pong_timeout: Duration,
    last_activity: Instant,
    deadline: Instant,
}

impl Keepalive {
    pub fn new(inactivity_timeout: Duration, pong_timeout: Duration, now: Instant) -> Self {
        Self {
            state: KeepaliveState::Idle,
            inactivity_timeout,
            pong_timeout,
            last_activity: now,
            deadline: now + inactivity_timeout,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> KeepaliveState {
        self.state
    }

    /// When the timer should next fire.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Any inbound data, ping or pong.
    pub fn on_activity(&mut self, now: Instant) {
        if self.state == KeepaliveState::Closed {
            return;
        }
        self.state = KeepaliveState::Idle;
        self.last_activity = now;
        self.deadline = now + self.inactivity_timeout;
    }

    /// Change the inactivity period. An idle timer is re-armed from the last
    /// activity; a pending pong window is left alone.
    pub fn set_inactivity_timeout(&mut self, timeout: Duration) {
        self.inactivity_timeout = timeout;
        if self.state == KeepaliveState::Idle {
            self.deadline = self.last_activity + timeout;
        }
    }

    /// The deadline elapsed.
    ///
    /// The pong window is measured from `now`, not from the original
    /// inactivity deadline.
    pub fn on_timeout(&mut self, now: Instant) -> Option<KeepaliveAction> {
        match self.state {
            KeepaliveState::Idle => {
                self.state = KeepaliveState::PingSent;
                self.deadline = now + self.pong_timeout;
                Some(KeepaliveAction::SendPing)
            }
            KeepaliveState::PingSent => {
                self.state = KeepaliveState::Closed;
                Some(KeepaliveAction::Close)
            }
            KeepaliveState::Closed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INACTIVITY: Duration = Duration::from_secs(100);
    const PONG: Duration = Duration::from_secs(5);

    #[test]
    fn pings_once_then_closes() {
        let start = Instant::now();
        let mut keepalive = Keepalive::new(INACTIVITY, PONG, start);
        assert_eq!(keepalive.deadline(), start + INACTIVITY);

        let fired = start + INACTIVITY;
        assert_eq!(keepalive.on_timeout(fired), Some(KeepaliveAction::SendPing));
        assert_eq!(keepalive.state(), KeepaliveState::PingSent);
        assert_eq!(keepalive.deadline(), fired + PONG);

        assert_eq!(keepalive.on_timeout(fired + PONG), Some(KeepaliveAction::Close));
        assert_eq!(keepalive.state(), KeepaliveState::Closed);
        assert_eq!(keepalive.on_timeout(fired + PONG * 2), None);
    }

    #[test]
    fn shorter_inactivity_rearms_from_last_activity() {
        let start = Instant::now();
        let mut keepalive = Keepalive::new(INACTIVITY, PONG, start);

        keepalive.on_activity(start + Duration::from_secs(10));
        keepalive.set_inactivity_timeout(Duration::from_secs(30));
        assert_eq!(keepalive.deadline(), start + Duration::from_secs(40));

        // An outstanding ping keeps its pong window.
        let fired = start + Duration::from_secs(40);
        keepalive.on_timeout(fired);
        keepalive.set_inactivity_timeout(Duration::from_secs(20));
        assert_eq!(keepalive.deadline(), fired + PONG);
    }

    #[test]
    fn pong_window_starts_when_timer_fires() {
        let start = Instant::now();
        let mut keepalive = Keepalive::new(INACTIVITY, PONG, start);

        // The timer can fire late; the pong window is still a full PONG.
        let late = start + INACTIVITY + Duration::from_secs(3);
        keepalive.on_timeout(late);
        assert_eq!(keepalive.deadline(), late + PONG);
    }

    #[test]
    fn activity_while_awaiting_pong_returns_to_idle() {
        let start = Instant::now();
        let mut keepalive = Keepalive::new(INACTIVITY, PONG, start);

        keepalive.on_timeout(start + INACTIVITY);
        let pong_at = start + INACTIVITY + Duration::from_secs(1);
        keepalive.on_activity(pong_at);

        assert_eq!(keepalive.state(), KeepaliveState::Idle);
        assert_eq!(keepalive.last_activity(), pong_at);
        assert_eq!(keepalive.deadline(), pong_at + INACTIVITY);
        assert_eq!(
            keepalive.on_timeout(pong_at + INACTIVITY),
            Some(KeepaliveAction::SendPing)
        );
    }

    #[test]
    fn activity_rearms_idle_timer() {
        let start = Instant::now();
        let mut keepalive = Keepalive::new(INACTIVITY, PONG, start);

        let later = start + Duration::from_secs(40);
        keepalive.on_activity(later);
        assert_eq!(keepalive.deadline(), later + INACTIVITY);
        assert_eq!(keepalive.state(), KeepaliveState::Idle);
    }

    #[test]
    fn closed_is_terminal() {
        let start = Instant::now();
        let mut keepalive = Keepalive::new(INACTIVITY, PONG, start);
        keepalive.on_timeout(start);
        keepalive.on_timeout(start);

        keepalive.on_activity(start + Duration::from_secs(1));
        assert_eq!(keepalive.state(), KeepaliveState::Closed);
    }
}
