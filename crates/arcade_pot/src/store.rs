use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};

use anchor_lang::prelude::*;
use tokio::sync::RwLock;

use crate::errors::PotError;
use crate::state::{DistributionRecord, Entry, Pot, PotKey, PotStatus};

/// Durable mirror of ledger state plus off-chain metadata.
///
/// Every method is a single atomic step with read-your-writes consistency per
/// record. Multi-record invariants (one Active pot per game, one entry per
/// payment) are enforced inside the store, not left to callers.
pub trait PotStore: Send + Sync + 'static {
    /// `AlreadyExists` on a duplicate key, `ActivePotConflict` if the game
    /// already has an Active pot.
    fn insert_pot(&self, pot: Pot) -> impl Future<Output = Result<()>> + Send;

    fn get_pot(&self, key: &PotKey) -> impl Future<Output = Result<Option<Pot>>> + Send;

    fn find_active_pot(&self, game_id: &str) -> impl Future<Output = Result<Option<Pot>>> + Send;

    /// Pot with the highest number for the game, whatever its status.
    fn latest_pot(&self, game_id: &str) -> impl Future<Output = Result<Option<Pot>>> + Send;

    fn pots_for_game(&self, game_id: &str) -> impl Future<Output = Result<Vec<Pot>>> + Send;

    /// Active -> Ended, stamping `closed_at` once.
    fn mark_ended(
        &self,
        key: &PotKey,
        closed_at: i64,
        ledger_balance: Option<u64>,
    ) -> impl Future<Output = Result<Pot>> + Send;

    /// Inserts the entry and credits the pot in one step. Rejects duplicate
    /// payment references and pots that are no longer Active.
    fn insert_entry(&self, entry: Entry) -> impl Future<Output = Result<Entry>> + Send;

    fn get_entry(&self, payment_ref: &str) -> impl Future<Output = Result<Option<Entry>>> + Send;

    /// Sets the score once; `AlreadyScored` afterwards.
    fn set_score(
        &self,
        payment_ref: &str,
        score: u64,
        scored_at: i64,
    ) -> impl Future<Output = Result<Entry>> + Send;

    /// Entries of a pot in insertion order.
    fn entries_for_pot(&self, key: &PotKey) -> impl Future<Output = Result<Vec<Entry>>> + Send;

    /// Distinct players of a pot, in order of first entry.
    fn distinct_players(&self, key: &PotKey) -> impl Future<Output = Result<Vec<Pubkey>>> + Send;

    fn get_distribution(
        &self,
        key: &PotKey,
    ) -> impl Future<Output = Result<Option<DistributionRecord>>> + Send;

    /// Saves the payee list ahead of the ledger payout, unfinalized. Replaces
    /// an earlier pending record; rejects a finalized one.
    fn save_pending_distribution(
        &self,
        record: DistributionRecord,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Only for Ended pots, at most once per pot.
    fn finalize_distribution(
        &self,
        record: DistributionRecord,
    ) -> impl Future<Output = Result<()>> + Send;
}

// -----------------
// In-process store
// -----------------

#[derive(Default)]
struct Inner {
    pots: BTreeMap<PotKey, Pot>,
    entries: HashMap<String, Entry>,
    entries_by_pot: HashMap<PotKey, Vec<String>>,
    distributions: HashMap<PotKey, DistributionRecord>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    pending_write_failures: AtomicU32,
    writes_before_failure: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` writes fail with `StoreUnavailable` before touching state.
    #[cfg(any(test, feature = "mock-ledger"))]
    pub fn fail_next_writes(&self, n: u32) {
        self.writes_before_failure.store(0, Ordering::SeqCst);
        self.pending_write_failures.store(n, Ordering::SeqCst);
    }

    /// Lets `ok_writes` writes through, then fails the one after.
    #[cfg(any(test, feature = "mock-ledger"))]
    pub fn fail_write_after(&self, ok_writes: u32) {
        self.writes_before_failure.store(ok_writes, Ordering::SeqCst);
        self.pending_write_failures.store(1, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<()> {
        if self.pending_write_failures.load(Ordering::SeqCst) == 0 {
            return Ok(());
        }
        let passes = self
            .writes_before_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if passes {
            return Ok(());
        }
        let injected = self
            .pending_write_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        require!(!injected, PotError::StoreUnavailable);
        Ok(())
    }
}

impl PotStore for MemoryStore {
    async fn insert_pot(&self, pot: Pot) -> Result<()> {
        self.check_write()?;
        let mut inner = self.inner.write().await;

        require!(!inner.pots.contains_key(&pot.key), PotError::AlreadyExists);
        if pot.is_active() {
            let conflict = inner
                .pots
                .values()
                .any(|p| p.key.game_id == pot.key.game_id && p.is_active());
            require!(!conflict, PotError::ActivePotConflict);
        }

        inner.pots.insert(pot.key.clone(), pot);
        Ok(())
    }

    async fn get_pot(&self, key: &PotKey) -> Result<Option<Pot>> {
        Ok(self.inner.read().await.pots.get(key).cloned())
    }

    async fn find_active_pot(&self, game_id: &str) -> Result<Option<Pot>> {
        let inner = self.inner.read().await;
        Ok(inner
            .pots
            .values()
            .find(|p| p.key.game_id == game_id && p.is_active())
            .cloned())
    }

    async fn latest_pot(&self, game_id: &str) -> Result<Option<Pot>> {
        let inner = self.inner.read().await;
        Ok(inner
            .pots
            .values()
            .filter(|p| p.key.game_id == game_id)
            .max_by_key(|p| p.key.pot_number)
            .cloned())
    }

    async fn pots_for_game(&self, game_id: &str) -> Result<Vec<Pot>> {
        let inner = self.inner.read().await;
        // BTreeMap order is (game_id, pot_number).
        Ok(inner
            .pots
            .values()
            .filter(|p| p.key.game_id == game_id)
            .cloned()
            .collect())
    }

    async fn mark_ended(
        &self,
        key: &PotKey,
        closed_at: i64,
        ledger_balance: Option<u64>,
    ) -> Result<Pot> {
        self.check_write()?;
        let mut inner = self.inner.write().await;

        let pot = inner.pots.get_mut(key).ok_or(PotError::PotNotFound)?;
        require!(pot.is_active(), PotError::PotNotActive);

        pot.status = PotStatus::Ended;
        pot.closed_at = Some(closed_at);
        pot.ledger_balance_at_close = ledger_balance;
        Ok(pot.clone())
    }

    async fn insert_entry(&self, mut entry: Entry) -> Result<Entry> {
        self.check_write()?;
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        require!(
            !inner.entries.contains_key(&entry.payment_ref),
            PotError::DuplicatePayment
        );

        let pot = inner.pots.get_mut(&entry.pot).ok_or(PotError::PotNotFound)?;
        require!(pot.is_active(), PotError::PotNotActive);
        let new_total = pot
            .total_amount
            .checked_add(entry.amount)
            .ok_or(PotError::MathOverflow)?;

        // All checks passed: both writes land together.
        pot.total_amount = new_total;
        entry.seq = inner.next_seq;
        inner.next_seq += 1;
        inner
            .entries_by_pot
            .entry(entry.pot.clone())
            .or_default()
            .push(entry.payment_ref.clone());
        inner.entries.insert(entry.payment_ref.clone(), entry.clone());

        Ok(entry)
    }

    async fn get_entry(&self, payment_ref: &str) -> Result<Option<Entry>> {
        Ok(self.inner.read().await.entries.get(payment_ref).cloned())
    }

    async fn set_score(&self, payment_ref: &str, score: u64, scored_at: i64) -> Result<Entry> {
        self.check_write()?;
        let mut inner = self.inner.write().await;

        let entry = inner
            .entries
            .get_mut(payment_ref)
            .ok_or(PotError::EntryNotFound)?;
        require!(!entry.played, PotError::AlreadyScored);

        entry.score = score;
        entry.played = true;
        entry.scored_at = Some(scored_at);
        Ok(entry.clone())
    }

    async fn entries_for_pot(&self, key: &PotKey) -> Result<Vec<Entry>> {
        let inner = self.inner.read().await;
        let refs = match inner.entries_by_pot.get(key) {
            Some(refs) => refs,
            None => return Ok(Vec::new()),
        };
        Ok(refs
            .iter()
            .filter_map(|r| inner.entries.get(r).cloned())
            .collect())
    }

    async fn distinct_players(&self, key: &PotKey) -> Result<Vec<Pubkey>> {
        let entries = self.entries_for_pot(key).await?;
        let mut players: Vec<Pubkey> = Vec::new();
        for e in entries {
            if !players.contains(&e.player) {
                players.push(e.player);
            }
        }
        Ok(players)
    }

    async fn get_distribution(&self, key: &PotKey) -> Result<Option<DistributionRecord>> {
        Ok(self.inner.read().await.distributions.get(key).cloned())
    }

    async fn save_pending_distribution(&self, mut record: DistributionRecord) -> Result<()> {
        self.check_write()?;
        let mut inner = self.inner.write().await;

        let pot = inner.pots.get(&record.pot).ok_or(PotError::PotNotFound)?;
        require!(pot.status == PotStatus::Ended, PotError::PotNotEnded);
        let finalized = inner
            .distributions
            .get(&record.pot)
            .map(|d| d.finalized)
            .unwrap_or(false);
        require!(!finalized, PotError::AlreadyDistributed);

        record.finalized = false;
        inner.distributions.insert(record.pot.clone(), record);
        Ok(())
    }

    async fn finalize_distribution(&self, record: DistributionRecord) -> Result<()> {
        self.check_write()?;
        let mut inner = self.inner.write().await;

        let pot = inner.pots.get(&record.pot).ok_or(PotError::PotNotFound)?;
        require!(pot.status == PotStatus::Ended, PotError::PotNotEnded);
        let already = inner
            .distributions
            .get(&record.pot)
            .map(|d| d.finalized)
            .unwrap_or(false);
        require!(!already, PotError::AlreadyDistributed);

        inner.distributions.insert(record.pot.clone(), record);
        Ok(())
    }
}
