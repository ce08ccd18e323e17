use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::coordinator::PotCoordinator;
use crate::ledger::LedgerClient;
use crate::retry::with_retry;
use crate::store::PotStore;

/// Periodic rollover of every configured game.
pub struct RolloverScheduler;

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops ticking and waits for the loop to exit. Rollovers already
    /// spawned run to completion on their own.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            warn!(error = %err, "rollover scheduler task failed");
        }
    }
}

impl RolloverScheduler {
    /// Starts ticking immediately, then every `rollover_interval`.
    pub fn spawn<L: LedgerClient, S: PotStore>(
        coordinator: Arc<PotCoordinator<L, S>>,
    ) -> SchedulerHandle {
        let (tx, mut rx) = watch::channel(false);
        let in_flight: Arc<DashSet<String>> = Arc::new(DashSet::new());

        let join = tokio::spawn(async move {
            let period = coordinator.config().rollover_interval();
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period_secs = period.as_secs(), games = ?coordinator.config().games, "rollover scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for game_id in &coordinator.config().games {
                            spawn_rollover(&coordinator, &in_flight, game_id);
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("rollover scheduler stopped");
        });

        SchedulerHandle { shutdown: tx, join }
    }
}

fn spawn_rollover<L: LedgerClient, S: PotStore>(
    coordinator: &Arc<PotCoordinator<L, S>>,
    in_flight: &Arc<DashSet<String>>,
    game_id: &str,
) {
    if !in_flight.insert(game_id.to_string()) {
        debug!(game_id, "previous rollover still running, tick skipped");
        return;
    }

    let coordinator = Arc::clone(coordinator);
    let slot = InFlightSlot {
        games: Arc::clone(in_flight),
        game_id: game_id.to_string(),
    };

    tokio::spawn(async move {
        let c = &*coordinator;
        let game = slot.game_id.as_str();
        let res = with_retry(&c.config().retry, "rollover_game", move || c.rollover_game(game)).await;
        if let Err(err) = res {
            warn!(game_id = game, error = %err, "rollover failed, next tick retries");
        }
    });
}

/// Marks a game's rollover as running; released on drop, so a panicking
/// rollover task does not block the game's later ticks.
struct InFlightSlot {
    games: Arc<DashSet<String>>,
    game_id: String,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.games.remove(&self.game_id);
    }
}
