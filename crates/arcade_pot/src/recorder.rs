use std::sync::Arc;

use anchor_lang::prelude::*;
use tracing::warn;

use crate::coordinator::PotCoordinator;
use crate::errors::PotError;
use crate::ledger::LedgerClient;
use crate::retry::with_retry;
use crate::state::{Entry, PotKey};
use crate::store::PotStore;

/// Front door for players: verifies payments on the ledger before anything
/// reaches the coordinator, which trusts what it is given.
pub struct EntryRecorder<L, S> {
    coordinator: Arc<PotCoordinator<L, S>>,
}

impl<L, S> Clone for EntryRecorder<L, S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<L: LedgerClient, S: PotStore> EntryRecorder<L, S> {
    pub fn new(coordinator: Arc<PotCoordinator<L, S>>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<PotCoordinator<L, S>> {
        &self.coordinator
    }

    /// Verifies the entry-fee transaction `signature` and records the entry.
    pub async fn pay_entry_fee(
        &self,
        game_id: &str,
        pot_number: u64,
        player: Pubkey,
        signature: &str,
    ) -> Result<Entry> {
        require!(!signature.is_empty(), PotError::InvalidRequest);
        let c = &*self.coordinator;
        let key = &PotKey::new(game_id, pot_number);
        let policy = &c.config().retry;

        // 1) Fetch the payment
        let tx = with_retry(policy, "get_transaction", move || {
            c.ledger_call("get_transaction", c.ledger().get_transaction(signature))
        })
        .await?
        .ok_or(PotError::PaymentNotFound)?;

        // 2) Verify it paid this pot, from this player, enough
        require!(tx.success, PotError::PaymentFailed);
        require_keys_eq!(tx.program_id, c.config().program_id, PotError::PaymentProgramMismatch);
        require_keys_eq!(tx.payer, player, PotError::PaymentPayerMismatch);
        let expected_pot = c.pot_address(key);
        if tx.pot != expected_pot {
            warn!(pot = %key, paid_to = %tx.pot, %expected_pot, payment_ref = signature, "payment went to another account");
            return Err(error!(PotError::PaymentPotMismatch));
        }
        require!(
            tx.amount >= c.config().entry_fee_lamports,
            PotError::InsufficientEntryFee
        );

        // 3) Record
        let amount = tx.amount;
        with_retry(policy, "record_entry", move || {
            c.record_entry(key, player, signature, amount)
        })
        .await
    }

    pub async fn submit_score(&self, payment_ref: &str, score: u64) -> Result<Entry> {
        let c = &*self.coordinator;
        with_retry(&c.config().retry, "record_score", move || {
            c.record_score(payment_ref, score)
        })
        .await
    }
}
