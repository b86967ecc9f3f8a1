//! Countdown used to gate OTP resends.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::debug;

use crate::state::StateCell;

pub const DEFAULT_COUNTDOWN_SECS: u32 = 60;
const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    pub seconds_remaining: u32,
    pub enabled: bool,
}

impl TimerState {
    pub fn counting(seconds_remaining: u32) -> Self {
        Self {
            seconds_remaining,
            enabled: false,
        }
    }

    pub fn ready() -> Self {
        Self {
            seconds_remaining: 0,
            enabled: true,
        }
    }

    /// `MM:SS`
    pub fn formatted_time(&self) -> String {
        format!(
            "{:02}:{:02}",
            self.seconds_remaining / 60,
            self.seconds_remaining % 60
        )
    }
}

impl Default for TimerState {
    fn default() -> Self {
        Self::counting(DEFAULT_COUNTDOWN_SECS)
    }
}

/// At most one countdown runs per service. Each `start` bumps a generation
/// counter; a countdown only publishes while its generation is current, and
/// the check happens under the state lock, so nothing leaks past `stop`.
pub struct TimerService {
    state: StateCell<TimerState>,
    ticks: broadcast::Sender<TimerState>,
    generation: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    pub fn new() -> Self {
        let (ticks, _) = broadcast::channel(128);
        Self {
            state: StateCell::default(),
            ticks,
            generation: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> TimerState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerState> {
        self.state.subscribe()
    }

    /// Every emission of every countdown, in order. Unlike [`Self::subscribe`]
    /// nothing is coalesced.
    pub fn subscribe_ticks(&self) -> broadcast::Receiver<TimerState> {
        self.ticks.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn start(&self, duration_secs: u32) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let mut generation = 0;
        self.state.update(|state| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = TimerState::counting(duration_secs);
        });
        debug!(duration_secs, generation, "timer: countdown started");

        *task = Some(tokio::spawn(run_countdown(
            Countdown {
                state: self.state.clone(),
                ticks: self.ticks.clone(),
                generation: Arc::clone(&self.generation),
                owned: generation,
            },
            duration_secs,
        )));
    }

    /// Idempotent. Leaves the last published state in place.
    pub fn stop(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        self.state.update_if(|_| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            false
        });
        if let Some(previous) = task.take() {
            previous.abort();
            debug!("timer: countdown stopped");
        }
    }

    /// Stops and restores the default state.
    pub fn reset(&self) {
        self.stop();
        self.state.set(TimerState::default());
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Countdown {
    state: StateCell<TimerState>,
    ticks: broadcast::Sender<TimerState>,
    generation: Arc<AtomicU64>,
    owned: u64,
}

impl Countdown {
    fn publish(&self, next: TimerState) -> bool {
        self.state.update_if(|state| {
            if self.generation.load(Ordering::SeqCst) != self.owned {
                return false;
            }
            *state = next;
            // Still under the state lock: a concurrent stop lands before or
            // after both publications, never between them.
            let _ = self.ticks.send(next);
            true
        })
    }
}

async fn run_countdown(countdown: Countdown, duration_secs: u32) {
    let mut interval = interval_at(Instant::now() + TICK, TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for remaining in (0..duration_secs).rev() {
        interval.tick().await;
        if !countdown.publish(TimerState::counting(remaining)) {
            return;
        }
    }
    countdown.publish(TimerState::ready());
}

#[cfg(test)]
#[path = "tests/timer_tests.rs"]
mod tests;
