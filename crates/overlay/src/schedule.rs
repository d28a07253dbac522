//! Render debouncing: at most one paint per interval.

use std::time::Duration;

use monitor_core::limits::RENDER_DEBOUNCE_MS;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Enough time has passed; paint immediately
    RenderNow,
    /// A single deferred paint is scheduled for this instant
    Deferred(Instant),
}

/// Coalesces render requests using time since the last render.
#[derive(Debug, Clone)]
pub struct RenderScheduler {
    interval: Duration,
    last_render: Option<Instant>,
    pending: Option<Instant>,
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(RENDER_DEBOUNCE_MS))
    }
}

impl RenderScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_render: None,
            pending: None,
        }
    }

    /// Records a render request. Repeated requests inside the window share
    /// the one deferred paint.
    pub fn request(&mut self, now: Instant) -> ScheduleDecision {
        if let Some(at) = self.pending {
            return ScheduleDecision::Deferred(at);
        }
        match self.last_render {
            Some(last) if now.duration_since(last) < self.interval => {
                let at = last + self.interval;
                self.pending = Some(at);
                ScheduleDecision::Deferred(at)
            }
            _ => ScheduleDecision::RenderNow,
        }
    }

    /// Deadline of the scheduled paint, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending
    }

    /// Whether a scheduled paint is due at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.pending.map(|at| at <= now).unwrap_or(false)
    }

    pub fn mark_rendered(&mut self, now: Instant) {
        self.last_render = Some(now);
        self.pending = None;
    }

    /// Forgets any scheduled paint.
    pub fn cancel(&mut self) {
        self.pending = None;
    }
}
