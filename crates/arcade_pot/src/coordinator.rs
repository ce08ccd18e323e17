use std::future::Future;
use std::sync::Arc;

use anchor_lang::prelude::*;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::config::CoordinatorConfig;
use crate::errors::PotError;
use crate::instructions::distribute::rank_entries;
use crate::ledger::{LedgerClient, LedgerPotView};
use crate::state::{Entry, Pot, PotKey, PotPhase};
use crate::store::PotStore;
use crate::utils::pot_address;

/// Store record plus the authoritative ledger view, when the ledger answered.
#[derive(Clone, Debug)]
pub struct PotSnapshot {
    pub pot: Pot,
    pub phase: PotPhase,
    pub ledger: Option<LedgerPotView>,
}

/// Owns every pot status transition and the reconciliation between store and ledger.
///
/// Mutations of one pot are serialized by a per-pot lock, creation and
/// rollover by a per-game lock. Reads never take either lock.
pub struct PotCoordinator<L, S> {
    pub(crate) config: CoordinatorConfig,
    pub(crate) ledger: Arc<L>,
    pub(crate) store: Arc<S>,
    pot_locks: DashMap<PotKey, Arc<Mutex<()>>>,
    game_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<L: LedgerClient, S: PotStore> PotCoordinator<L, S> {
    pub fn new(config: CoordinatorConfig, ledger: Arc<L>, store: Arc<S>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ledger,
            store,
            pot_locks: DashMap::new(),
            game_locks: DashMap::new(),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn pot_address(&self, key: &PotKey) -> Pubkey {
        pot_address(&self.config.program_id, key)
    }

    // -----------------
    // Locking
    // -----------------

    pub(crate) async fn lock_pot(&self, key: &PotKey) -> OwnedMutexGuard<()> {
        // Clone the Arc out so no map shard guard is held across the await.
        let lock = self.pot_locks.entry(key.clone()).or_default().clone();
        lock.lock_owned().await
    }

    pub(crate) async fn lock_game(&self, game_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .game_locks
            .entry(game_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Bounds a ledger round trip; an elapsed call is reported as `LedgerUnavailable`.
    pub(crate) async fn ledger_call<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.ledger_timeout(), fut).await {
            Ok(res) => res,
            Err(_) => {
                warn!(op, timeout_ms = self.config.ledger_timeout_ms, "ledger call timed out");
                Err(error!(PotError::LedgerUnavailable))
            }
        }
    }

    pub(crate) async fn require_pot(&self, key: &PotKey) -> Result<Pot> {
        self.store
            .get_pot(key)
            .await?
            .ok_or_else(|| error!(PotError::PotNotFound))
    }

    // -----------------
    // Reads (lock-free)
    // -----------------

    pub async fn pot(&self, key: &PotKey) -> Result<Option<Pot>> {
        self.store.get_pot(key).await
    }

    pub async fn latest_pot(&self, game_id: &str) -> Result<Option<Pot>> {
        self.store.latest_pot(game_id).await
    }

    pub async fn active_pot(&self, game_id: &str) -> Result<Option<Pot>> {
        self.store.find_active_pot(game_id).await
    }

    pub async fn pots_for_game(&self, game_id: &str) -> Result<Vec<Pot>> {
        self.store.pots_for_game(game_id).await
    }

    pub async fn phase(&self, key: &PotKey) -> Result<PotPhase> {
        let pot = self.store.get_pot(key).await?;
        let distribution = self.store.get_distribution(key).await?;
        Ok(PotPhase::of(pot.as_ref(), distribution.as_ref()))
    }

    /// Store record with the live ledger balance. A ledger outage degrades to
    /// the store view instead of failing the read.
    pub async fn pot_status(&self, key: &PotKey) -> Result<PotSnapshot> {
        let pot = self.require_pot(key).await?;
        let phase = self.phase(key).await?;
        let ledger = match self
            .ledger_call("get_pot_account", self.ledger.get_pot_account(pot.address))
            .await
        {
            Ok(view) => view,
            Err(err) => {
                warn!(pot = %key, error = %err, "ledger view unavailable for status read");
                None
            }
        };
        Ok(PotSnapshot { pot, phase, ledger })
    }

    pub async fn entries(&self, key: &PotKey) -> Result<Vec<Entry>> {
        self.store.entries_for_pot(key).await
    }

    pub async fn participants(&self, key: &PotKey) -> Result<Vec<Pubkey>> {
        self.store.distinct_players(key).await
    }

    /// Played entries ranked the same way distribution ranks them, one row per player.
    pub async fn leaderboard(&self, key: &PotKey) -> Result<Vec<Entry>> {
        self.require_pot(key).await?;
        let entries = self.store.entries_for_pot(key).await?;
        Ok(rank_entries(entries, self.config.tie_break))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::errors::is_pot_error;
    use crate::mock::LedgerOp;
    use crate::state::LedgerPotStatus;

    #[tokio::test]
    async fn rejects_invalid_config() {
        let mut config = CoordinatorConfig::default();
        config.winner_count = 0;
        let res = PotCoordinator::new(
            config,
            Arc::new(crate::mock::MockLedger::default()),
            Arc::new(crate::store::MemoryStore::new()),
        );
        assert!(is_pot_error(&res.err().unwrap(), PotError::InvalidConfig));
    }

    #[tokio::test]
    async fn status_read_merges_ledger_view() {
        let c = coordinator(CoordinatorConfig::default());
        let key = PotKey::new("flappy_bird", 1);
        c.create_pot("flappy_bird", 1).await.unwrap();
        paid_entry(&c, &key, Pubkey::new_unique(), 700).await;

        let snap = c.pot_status(&key).await.unwrap();
        assert_eq!(snap.phase, PotPhase::Active);
        let view = snap.ledger.unwrap();
        assert_eq!(view.balance, 700);
        assert_eq!(view.status, LedgerPotStatus::Active);
        assert_eq!(snap.pot.total_amount, 700);
    }

    #[tokio::test]
    async fn status_read_survives_ledger_outage() {
        let c = coordinator(CoordinatorConfig::default());
        let key = PotKey::new("flappy_bird", 1);
        c.create_pot("flappy_bird", 1).await.unwrap();

        c.ledger.fail_next(LedgerOp::Get).await;
        let snap = c.pot_status(&key).await.unwrap();
        assert!(snap.ledger.is_none());
        assert_eq!(snap.pot.key, key);

        let missing = c.pot_status(&PotKey::new("flappy_bird", 9)).await.unwrap_err();
        assert!(is_pot_error(&missing, PotError::PotNotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ledger_calls_time_out() {
        let mut config = CoordinatorConfig::default();
        config.ledger_timeout_ms = 50;
        let c = coordinator(config);
        c.ledger.set_latency(std::time::Duration::from_millis(500)).await;

        let err = c.create_pot("flappy_bird", 1).await.unwrap_err();
        assert!(is_pot_error(&err, PotError::LedgerUnavailable));
        assert!(c.pot(&PotKey::new("flappy_bird", 1)).await.unwrap().is_none());
    }
}
