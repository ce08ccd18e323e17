use anchor_lang::prelude::*;
use tracing::info;

use crate::coordinator::PotCoordinator;
use crate::errors::PotError;
use crate::ledger::LedgerClient;
use crate::state::{Entry, PotKey};
use crate::store::PotStore;
use crate::utils::now_ms;

impl<L: LedgerClient, S: PotStore> PotCoordinator<L, S> {
    /// Records a verified payment into an Active pot and credits its total.
    ///
    /// Runs under the pot lock, so it is ordered against `close_pot`: once the
    /// close has been mirrored, no entry lands in the pot.
    pub async fn record_entry(
        &self,
        key: &PotKey,
        player: Pubkey,
        payment_ref: &str,
        amount: u64,
    ) -> Result<Entry> {
        require!(amount > 0, PotError::InvalidAmount);
        require!(!payment_ref.is_empty(), PotError::InvalidRequest);

        let _pot = self.lock_pot(key).await;

        let pot = self.require_pot(key).await?;
        require!(pot.is_active(), PotError::PotNotActive);

        // The store re-checks atomically; this only keeps the common case cheap.
        require!(
            self.store.get_entry(payment_ref).await?.is_none(),
            PotError::DuplicatePayment
        );

        let entry = self
            .store
            .insert_entry(Entry {
                player,
                pot: key.clone(),
                payment_ref: payment_ref.to_string(),
                amount,
                score: 0,
                played: false,
                created_at: now_ms(),
                scored_at: None,
                seq: 0,
            })
            .await?;

        info!(pot = %key, %player, payment_ref, amount, "entry recorded");
        Ok(entry)
    }

    /// Sets the score of an entry exactly once.
    pub async fn record_score(&self, payment_ref: &str, score: u64) -> Result<Entry> {
        let entry = self
            .store
            .get_entry(payment_ref)
            .await?
            .ok_or(PotError::EntryNotFound)?;

        let _pot = self.lock_pot(&entry.pot).await;

        // Scores still count after close; once paid out the ranking is frozen.
        let distributed = self
            .store
            .get_distribution(&entry.pot)
            .await?
            .map(|d| d.finalized)
            .unwrap_or(false);
        require!(!distributed, PotError::AlreadyDistributed);

        let scored = self.store.set_score(payment_ref, score, now_ms()).await?;
        info!(pot = %scored.pot, player = %scored.player, score, "score recorded");
        Ok(scored)
    }
}
