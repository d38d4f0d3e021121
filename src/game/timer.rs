//! Round Timer
//!
//! One countdown per room. Ticks every `tick_interval` with the seconds
//! left, and on reaching zero announces the stop, waits the grace period and
//! runs the expiry task. Starting a countdown replaces whatever countdown the
//! room had; a superseded countdown notices on its next tick and exits.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, info};

use crate::game::events::{EngineEvent, EventHub};
use crate::game::runtime::RoomRuntimes;
use crate::game::state::{RoomId, RoundId};

/// Work run once a countdown has expired and the grace period elapsed.
pub type ExpiryTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Seconds left until `deadline`, rounded up.
pub fn remaining_secs(deadline: Instant, now: Instant) -> u32 {
    let left = deadline.saturating_duration_since(now);
    let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
    secs as u32
}

/// Drives per-room countdowns.
pub struct RoundTimer {
    runtimes: Arc<RoomRuntimes>,
    events: EventHub,
    tick_interval: Duration,
    grace: Duration,
}

impl RoundTimer {
    /// Create a timer.
    pub fn new(
        runtimes: Arc<RoomRuntimes>,
        events: EventHub,
        tick_interval: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            runtimes,
            events,
            tick_interval,
            grace,
        }
    }

    /// Grace period between "stopping" and scoring.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Start the countdown of a round, replacing the room's current one.
    pub async fn start(
        &self,
        room_id: RoomId,
        round_id: RoundId,
        duration: Duration,
        on_expire: ExpiryTask,
    ) {
        let runtimes = self.runtimes.clone();
        let events = self.events.clone();
        let tick = self.tick_interval;
        let grace = self.grace;

        self.runtimes
            .install_timer(room_id, round_id, duration, move |deadline| {
                tokio::spawn(async move {
                    let mut ticker = interval_at(Instant::now() + tick, tick);
                    loop {
                        ticker.tick().await;
                        if !runtimes.timer_matches(room_id, round_id).await {
                            debug!(room = %room_id.short(), round = %round_id.short(), "Stale countdown exiting");
                            return;
                        }
                        let remaining = remaining_secs(deadline, Instant::now());
                        if remaining == 0 {
                            break;
                        }
                        events.to_room(
                            room_id,
                            EngineEvent::RoundTick {
                                round_id,
                                remaining_secs: remaining,
                            },
                        );
                    }

                    if !runtimes.release_timer(room_id, round_id).await {
                        debug!(room = %room_id.short(), "Countdown superseded at expiry");
                        return;
                    }

                    info!(room = %room_id.short(), round = %round_id.short(), "Round time expired");
                    events.to_room(room_id, EngineEvent::RoundStopping { round_id, by: None });
                    sleep(grace).await;
                    on_expire.await;
                })
            })
            .await;

        debug!(
            room = %room_id.short(),
            round = %round_id.short(),
            secs = duration.as_secs(),
            "Countdown started"
        );
    }

    /// Stop a round on a player's request. `true` if this call is the first
    /// to announce the stop, so the caller should broadcast it.
    pub async fn begin_stop(&self, room_id: RoomId, round_id: RoundId) -> bool {
        self.runtimes.begin_stop(room_id, round_id).await
    }

    /// Stop the countdown of a round. `false` if it was not running.
    pub async fn cancel(&self, room_id: RoomId, round_id: RoundId) -> bool {
        self.runtimes.cancel_timer(room_id, round_id).await
    }

    /// Seconds left on a round's countdown, without touching it.
    pub async fn remaining(&self, room_id: RoomId, round_id: RoundId) -> Option<u32> {
        self.runtimes
            .timer_deadline(room_id, round_id)
            .await
            .map(|deadline| remaining_secs(deadline, Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (Arc<RoomRuntimes>, EventHub, RoundTimer) {
        let runtimes = Arc::new(RoomRuntimes::new());
        let events = EventHub::default();
        let timer = RoundTimer::new(
            runtimes.clone(),
            events.clone(),
            Duration::from_secs(1),
            Duration::from_secs(3),
        );
        (runtimes, events, timer)
    }

    fn counter_task(counter: &Arc<AtomicUsize>) -> ExpiryTask {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_remaining_secs_rounds_up() {
        let now = Instant::now();
        assert_eq!(remaining_secs(now + Duration::from_millis(1500), now), 2);
        assert_eq!(remaining_secs(now + Duration::from_secs(3), now), 3);
        assert_eq!(remaining_secs(now, now + Duration::from_secs(1)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_ticks_then_expires() {
        let (_, events, timer) = setup();
        let mut rx = events.subscribe();
        let fired = Arc::new(AtomicUsize::new(0));
        let room = RoomId::new([1; 16]);
        let round = RoundId::new([2; 16]);

        timer
            .start(room, round, Duration::from_secs(3), counter_task(&fired))
            .await;

        let mut ticks = Vec::new();
        loop {
            match rx.recv().await.unwrap().event {
                EngineEvent::RoundTick { remaining_secs, .. } => ticks.push(remaining_secs),
                EngineEvent::RoundStopping { by, .. } => {
                    assert!(by.is_none());
                    break;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(ticks, vec![2, 1]);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_supersedes_previous_countdown() {
        let (runtimes, _, timer) = setup();
        let fired = Arc::new(AtomicUsize::new(0));
        let room = RoomId::new([1; 16]);
        let old = RoundId::new([2; 16]);
        let new = RoundId::new([3; 16]);

        timer.start(room, old, Duration::from_secs(2), counter_task(&fired)).await;
        timer.start(room, new, Duration::from_secs(5), counter_task(&fired)).await;

        sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!runtimes.timer_matches(room, new).await);

        sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_does_not_reset() {
        let (_, _, timer) = setup();
        let room = RoomId::new([1; 16]);
        let round = RoundId::new([2; 16]);
        let fired = Arc::new(AtomicUsize::new(0));

        timer.start(room, round, Duration::from_secs(20), counter_task(&fired)).await;
        sleep(Duration::from_millis(5500)).await;

        assert_eq!(timer.remaining(room, round).await, Some(15));
        assert_eq!(timer.remaining(room, round).await, Some(15));
        assert_eq!(timer.remaining(room, RoundId::new([9; 16])).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_expiry() {
        let (_, _, timer) = setup();
        let room = RoomId::new([1; 16]);
        let round = RoundId::new([2; 16]);
        let fired = Arc::new(AtomicUsize::new(0));

        timer.start(room, round, Duration::from_secs(2), counter_task(&fired)).await;
        assert!(timer.cancel(room, round).await);
        assert!(!timer.cancel(room, round).await);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
