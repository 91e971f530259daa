//! Per-peer session record and the reconnection schedule.

use std::time::Duration;

use serde::Serialize;

use quintet_shared::constants::{
    CONNECT_TIMEOUT_SECS, RECONNECT_BASE_MS, RECONNECT_MAX_ATTEMPTS, RECONNECT_MAX_MS,
};
use quintet_shared::types::{Activity, PeerId, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    /// Reconnection gave up; the peer stays listed as unreachable.
    Abandoned,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Abandoned => "abandoned",
        }
    }
}

/// Exponential backoff for re-establishing a lost channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Failed attempts tolerated before the session is abandoned
    pub max_attempts: u32,
    /// An attempt that neither opens nor fails within this window fails
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(RECONNECT_BASE_MS),
            max: Duration::from_millis(RECONNECT_MAX_MS),
            max_attempts: RECONNECT_MAX_ATTEMPTS,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^attempts, max)`
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// What the local participant knows about one remote participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSession {
    pub peer: PeerId,
    /// Role at creation. Reconnection attempts are always made as initiator.
    pub role: Role,
    /// Unknown until the first `identity` envelope arrives
    pub display_name: Option<String>,
    pub state: ConnectionState,
    pub activity: Activity,
    pub typing: bool,
    pub attempts: u32,
}

impl PeerSession {
    pub fn new(peer: PeerId, role: Role) -> Self {
        Self {
            peer,
            role,
            display_name: None,
            state: ConnectionState::Connecting,
            activity: Activity::Active,
            typing: false,
            attempts: 0,
        }
    }

    pub fn label(&self) -> String {
        match &self.display_name {
            Some(name) => format!("{name} ({})", self.peer.short()),
            None => self.peer.short().to_string(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.attempts = 0;
    }

    /// Record a failed or closed channel.
    ///
    /// Returns the delay before the next attempt, or `None` once the
    /// attempt budget is spent and the session is abandoned.
    pub fn mark_link_lost(&mut self, policy: &ReconnectPolicy) -> Option<Duration> {
        self.state = ConnectionState::Disconnected;
        self.typing = false;

        if self.attempts >= policy.max_attempts {
            self.state = ConnectionState::Abandoned;
            return None;
        }

        let delay = policy.delay(self.attempts);
        self.attempts += 1;
        self.state = ConnectionState::Reconnecting;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u128> = (0..7).map(|n| policy.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
        assert_eq!(policy.delay(40), Duration::from_millis(30_000));
    }

    #[test]
    fn test_backoff_schedule_then_abandon() {
        let policy = ReconnectPolicy::default();
        let mut session = PeerSession::new(PeerId::from("peer"), Role::Initiator);

        let mut delays = Vec::new();
        while let Some(delay) = session.mark_link_lost(&policy) {
            assert_eq!(session.state, ConnectionState::Reconnecting);
            delays.push(delay.as_millis());
        }

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(session.state, ConnectionState::Abandoned);
        assert_eq!(session.attempts, 5);
    }

    #[test]
    fn test_connect_resets_attempts() {
        let policy = ReconnectPolicy::default();
        let mut session = PeerSession::new(PeerId::from("peer"), Role::Responder);
        session.mark_link_lost(&policy);
        session.mark_link_lost(&policy);
        assert_eq!(session.attempts, 2);

        session.mark_connected();
        assert!(session.is_connected());
        assert_eq!(session.attempts, 0);
        assert_eq!(session.mark_link_lost(&policy), Some(Duration::from_secs(1)));
        assert_eq!(session.role, Role::Responder);
    }
}
