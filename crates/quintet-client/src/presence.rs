//! Presence and heartbeat: round-trip latency, the local typing indicator,
//! and the periodic ping driver.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use quintet_shared::constants::SLOW_LATENCY_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latency {
    pub millis: i64,
    /// Above the slow threshold. Informational only.
    pub slow: bool,
}

/// Latency of a `pong` echoing `sent_ms`, observed at `now_ms`.
pub fn measure_latency(sent_ms: i64, now_ms: i64) -> Latency {
    let millis = now_ms.saturating_sub(sent_ms).max(0);
    Latency {
        millis,
        slow: millis > SLOW_LATENCY_MS,
    }
}

/// Local typing state.
///
/// Each method returns `Some(value)` when a `typing` envelope carrying
/// `value` must be broadcast.
#[derive(Debug, Clone)]
pub struct TypingIndicator {
    idle: Duration,
    typing: bool,
    deadline: Option<Instant>,
}

impl TypingIndicator {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            typing: false,
            deadline: None,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Input changed: (re)arm the idle timer.
    pub fn on_input(&mut self, now: Instant) -> Option<bool> {
        self.deadline = Some(now + self.idle);
        if self.typing {
            return None;
        }
        self.typing = true;
        Some(true)
    }

    /// A message was sent.
    pub fn on_send(&mut self) -> Option<bool> {
        self.deadline = None;
        if !self.typing {
            return None;
        }
        self.typing = false;
        Some(false)
    }

    /// Idle timer check.
    pub fn on_tick(&mut self, now: Instant) -> Option<bool> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.typing = false;
                Some(false)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypingInput {
    Input,
    Sent,
}

/// Drive a [`TypingIndicator`] from input notifications, calling
/// `broadcast` on every transition. Ends when the input channel closes.
pub(crate) async fn run_typing(
    mut indicator: TypingIndicator,
    mut inputs: mpsc::UnboundedReceiver<TypingInput>,
    mut broadcast: impl FnMut(bool),
) {
    loop {
        let deadline = indicator.deadline();
        tokio::select! {
            input = inputs.recv() => {
                let change = match input {
                    Some(TypingInput::Input) => indicator.on_input(Instant::now()),
                    Some(TypingInput::Sent) => indicator.on_send(),
                    None => break,
                };
                if let Some(typing) = change {
                    broadcast(typing);
                }
            }
            _ = sleep_until_opt(deadline) => {
                if let Some(typing) = indicator.on_tick(Instant::now()) {
                    broadcast(typing);
                }
            }
        }
    }
    debug!("Typing indicator stopped");
}

/// Call `tick` every `period`, starting one period from now, until it
/// returns `false`.
pub(crate) async fn run_heartbeat(period: Duration, mut tick: impl FnMut() -> bool) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if !tick() {
            break;
        }
    }
    debug!("Heartbeat stopped");
}

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
