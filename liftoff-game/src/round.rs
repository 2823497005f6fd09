//! Server-authoritative round lifecycle.
//!
//! ```text
//!            request_start (≥1 player)          tick reaches 0
//!  Waiting ───────────────────────────▶ Countdown ───────────────▶ Playing
//!     ▲  ▲                                  │                         │
//!     │  └───── last player leaves ─────────┘                         │ report_round_end
//!     │                                                               ▼
//!     └──────────────── round-wait timer reaches 0 ─────────────── RoundEnd
//!                       (re-enters Countdown if players remain)
//! ```
//!
//! All mutations happen under one async mutex that stays held while the
//! resulting events are fanned out, so every client observes transitions in
//! the same order. Ticks come from one timer task per armed timer; each tick
//! re-checks under the lock that its timer is still the armed one before it
//! acts, so a tick racing a cancellation is dropped.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;

use crate::broadcast::Broadcaster;
use crate::protocol::{ConnectionId, RoundState, ServerEvent};
use crate::registry::ConnectionRegistry;

/// Reason carried by `gameCancelled` when a countdown loses its last player.
pub const NOT_ENOUGH_PLAYERS: &str = "Not enough players";

/// Round timing and crash distance parameters.
#[derive(Debug, Clone)]
pub struct RoundConfig {
    /// Countdown length in ticks (broadcast as N, N-1, ..., 0)
    pub countdown_ticks: u32,
    /// Pause between rounds in ticks (broadcast as N, N-1, ..., 0)
    pub round_wait_ticks: u32,
    /// Wall-clock length of one tick
    pub tick_interval: Duration,
    /// Crash distances are drawn uniformly from this half-open range
    pub crash_range: Range<u32>,
    /// Fixed RNG seed (None = seeded from OS entropy)
    pub seed: Option<u64>,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            countdown_ticks: 5,
            round_wait_ticks: 20,
            tick_interval: Duration::from_secs(1),
            crash_range: 600..1200,
            seed: None,
        }
    }
}

/// What a start request led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new countdown was armed.
    CountdownStarted,
    /// A round is already under way; the requester was told the state.
    InProgress(RoundState),
    /// Nobody is registered; the requester was told the count.
    WaitingForPlayers(usize),
}

/// An armed periodic timer.
///
/// `epoch` identifies the arming; a tick whose epoch no longer matches the
/// armed timer belongs to a cancelled run and must not act.
struct Timer {
    epoch: u64,
    handle: AbortHandle,
}

impl Timer {
    fn cancel(self) {
        self.handle.abort();
    }

    fn is_current(slot: &Option<Timer>, epoch: u64) -> bool {
        slot.as_ref().is_some_and(|t| t.epoch == epoch)
    }
}

struct RoundInner {
    state: RoundState,
    countdown: Option<Timer>,
    round_wait: Option<Timer>,
    epoch: u64,
    /// Distance of the current round, set when Playing begins
    crash_point: Option<u32>,
    rounds_started: u64,
    rng: StdRng,
}

impl RoundInner {
    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }
}

/// The process-wide round state machine.
///
/// Cloning is cheap and every clone drives the same round.
#[derive(Clone)]
pub struct RoundStateMachine {
    inner: Arc<Mutex<RoundInner>>,
    registry: Arc<RwLock<ConnectionRegistry>>,
    broadcaster: Arc<Broadcaster>,
    config: Arc<RoundConfig>,
}

impl RoundStateMachine {
    pub fn new(
        config: RoundConfig,
        registry: Arc<RwLock<ConnectionRegistry>>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Arc::new(Mutex::new(RoundInner {
                state: RoundState::Waiting,
                countdown: None,
                round_wait: None,
                epoch: 0,
                crash_point: None,
                rounds_started: 0,
                rng,
            })),
            registry,
            broadcaster,
            config: Arc::new(config),
        }
    }

    /// Ask for a round to begin on behalf of `requester`.
    ///
    /// Starts a countdown when the round is idle and somebody is registered;
    /// otherwise the requester alone is told why nothing happened.
    pub async fn request_start(&self, requester: &ConnectionId) -> StartOutcome {
        let mut inner = self.inner.lock().await;

        if inner.state != RoundState::Waiting || inner.countdown.is_some() {
            let state = inner.state;
            self.broadcaster
                .send_to(requester, &ServerEvent::GameInProgress { state })
                .await;
            return StartOutcome::InProgress(state);
        }

        let count = self.registry.read().await.count();
        if count == 0 {
            self.broadcaster
                .send_to(requester, &ServerEvent::WaitingForPlayers { count })
                .await;
            return StartOutcome::WaitingForPlayers(count);
        }

        self.arm_countdown(&mut inner).await;
        StartOutcome::CountdownStarted
    }

    /// A client saw the rocket reach the crash distance.
    ///
    /// Moves to RoundEnd from any state and arms the round-wait timer.
    /// Returns false (and tells the reporter the current state) when the
    /// round already ended.
    pub async fn report_round_end(&self, reporter: &ConnectionId) -> bool {
        let mut inner = self.inner.lock().await;

        if inner.state == RoundState::RoundEnd || inner.round_wait.is_some() {
            let state = inner.state;
            self.broadcaster
                .send_to(reporter, &ServerEvent::GameInProgress { state })
                .await;
            return false;
        }

        if let Some(timer) = inner.countdown.take() {
            timer.cancel();
        }

        log::info!("Round ended (was {}), crash point {:?}", inner.state, inner.crash_point);
        inner.state = RoundState::RoundEnd;

        let ticks = self.config.round_wait_ticks.max(1);
        let epoch = inner.next_epoch();
        self.broadcaster
            .send_all(&ServerEvent::RoundWait { seconds_left: ticks })
            .await;

        let machine = self.clone();
        let task = tokio::spawn(async move { machine.run_round_wait(epoch, ticks).await });
        inner.round_wait = Some(Timer {
            epoch,
            handle: task.abort_handle(),
        });
        true
    }

    /// A player left.
    ///
    /// Cancels a countdown that has nobody left to play. The player count is
    /// read under the round lock, so a join that lands between the departure
    /// and this call keeps the countdown alive. Returns whether the countdown
    /// was cancelled.
    pub async fn on_player_departure(&self) -> bool {
        let mut inner = self.inner.lock().await;

        if inner.state != RoundState::Countdown {
            return false;
        }
        let remaining = self.registry.read().await.count();
        if remaining > 0 {
            log::debug!("Countdown kept, {remaining} players remain");
            return false;
        }

        if let Some(timer) = inner.countdown.take() {
            timer.cancel();
        }
        self.broadcaster
            .send_all(&ServerEvent::GameCancelled {
                reason: NOT_ENOUGH_PLAYERS.to_string(),
            })
            .await;
        inner.state = RoundState::Waiting;
        log::info!("Countdown cancelled: no players left");
        true
    }

    /// Tell a new connection the current state.
    ///
    /// Sent under the round lock so no transition can slip in between
    /// reading the state and queueing the frame.
    pub async fn send_connection_setup(&self, connection_id: &ConnectionId) -> RoundState {
        let inner = self.inner.lock().await;
        let state = inner.state;
        self.broadcaster
            .send_to(connection_id, &ServerEvent::ConnectionSetup { state })
            .await;
        state
    }

    pub async fn state(&self) -> RoundState {
        self.inner.lock().await.state
    }

    /// Crash distance of the round in progress, if one was drawn.
    pub async fn crash_point(&self) -> Option<u32> {
        self.inner.lock().await.crash_point
    }

    pub async fn rounds_started(&self) -> u64 {
        self.inner.lock().await.rounds_started
    }

    pub async fn is_countdown_armed(&self) -> bool {
        self.inner.lock().await.countdown.is_some()
    }

    pub async fn is_round_wait_armed(&self) -> bool {
        self.inner.lock().await.round_wait.is_some()
    }

    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Enter Countdown and arm its timer. No-op unless idle and unarmed.
    async fn arm_countdown(&self, inner: &mut RoundInner) -> bool {
        if inner.state != RoundState::Waiting || inner.countdown.is_some() {
            return false;
        }

        inner.state = RoundState::Countdown;
        let ticks = self.config.countdown_ticks.max(1);
        let epoch = inner.next_epoch();
        log::info!("Countdown started ({ticks} ticks)");
        self.broadcaster.send_all(&ServerEvent::Countdown { n: ticks }).await;

        let machine = self.clone();
        let task = tokio::spawn(async move { machine.run_countdown(epoch, ticks).await });
        inner.countdown = Some(Timer {
            epoch,
            handle: task.abort_handle(),
        });
        true
    }

    async fn run_countdown(self, epoch: u64, ticks: u32) {
        let mut remaining = ticks;
        loop {
            tokio::time::sleep(self.config.tick_interval).await;

            let mut inner = self.inner.lock().await;
            if inner.state != RoundState::Countdown || !Timer::is_current(&inner.countdown, epoch) {
                log::debug!("Dropping stale countdown tick (epoch {epoch})");
                return;
            }

            remaining -= 1;
            self.broadcaster.send_all(&ServerEvent::Countdown { n: remaining }).await;

            if remaining == 0 {
                // Finished on its own; clearing the slot is enough.
                inner.countdown = None;
                self.begin_playing(&mut inner).await;
                return;
            }
        }
    }

    async fn run_round_wait(self, epoch: u64, ticks: u32) {
        let mut remaining = ticks;
        loop {
            tokio::time::sleep(self.config.tick_interval).await;

            let mut inner = self.inner.lock().await;
            if inner.state != RoundState::RoundEnd || !Timer::is_current(&inner.round_wait, epoch) {
                log::debug!("Dropping stale round-wait tick (epoch {epoch})");
                return;
            }

            remaining -= 1;
            self.broadcaster
                .send_all(&ServerEvent::RoundWait {
                    seconds_left: remaining,
                })
                .await;

            if remaining == 0 {
                inner.round_wait = None;
                inner.state = RoundState::Waiting;
                inner.crash_point = None;

                let count = self.registry.read().await.count();
                if count > 0 {
                    self.arm_countdown(&mut inner).await;
                } else {
                    log::info!("Round over, waiting for players");
                }
                return;
            }
        }
    }

    async fn begin_playing(&self, inner: &mut RoundInner) {
        let crash_point = draw_crash_point(&mut inner.rng, &self.config.crash_range);
        inner.state = RoundState::Playing;
        inner.crash_point = Some(crash_point);
        inner.rounds_started += 1;
        log::info!("Round {} started, crash point {crash_point}", inner.rounds_started);
        self.broadcaster.send_all(&ServerEvent::GameStart { crash_point }).await;
    }
}

/// Uniform draw from a half-open range; an empty range yields its start.
fn draw_crash_point(rng: &mut impl Rng, range: &Range<u32>) -> u32 {
    if range.is_empty() {
        range.start
    } else {
        rng.gen_range(range.clone())
    }
}
