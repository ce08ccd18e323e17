use std::cmp::Ordering;
use std::collections::HashSet;

use anchor_lang::prelude::*;
use tracing::{info, warn};

use crate::config::TieBreak;
use crate::coordinator::PotCoordinator;
use crate::errors::PotError;
use crate::ledger::{LedgerClient, Payee};
use crate::state::{DistributionRecord, Entry, LedgerPotStatus, Payout, PotKey, PotPhase};
use crate::store::PotStore;
use crate::utils::{now_ms, split_by_shares};

// -----------------
// Ranking
// -----------------

fn compare(a: &Entry, b: &Entry, tie_break: TieBreak) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| match tie_break {
            TieBreak::EarliestScore => a
                .scored_at
                .unwrap_or(i64::MAX)
                .cmp(&b.scored_at.unwrap_or(i64::MAX)),
            TieBreak::EarliestEntry => a.created_at.cmp(&b.created_at),
        })
        .then_with(|| a.seq.cmp(&b.seq))
}

/// Played entries, best first, one row per player (their best entry).
///
/// Total order: score desc, then the tie-break timestamp, then record order.
pub fn rank_entries(entries: Vec<Entry>, tie_break: TieBreak) -> Vec<Entry> {
    let mut played: Vec<Entry> = entries.into_iter().filter(|e| e.played).collect();
    played.sort_by(|a, b| compare(a, b, tie_break));

    let mut seen = HashSet::new();
    played.retain(|e| seen.insert(e.player));
    played
}

fn check_winners(key: &PotKey, expected: &[Pubkey], winners: &[Pubkey]) -> Result<()> {
    if expected != winners {
        warn!(pot = %key, ?expected, submitted = ?winners, "winner list does not match ranking");
        return Err(error!(PotError::WinnerMismatch));
    }
    Ok(())
}

fn distribution_record(
    key: &PotKey,
    payees: &[Payee],
    payout_ref: &str,
    finalized: bool,
) -> DistributionRecord {
    DistributionRecord {
        pot: key.clone(),
        payouts: payees
            .iter()
            .map(|p| Payout {
                player: p.player,
                rank: p.rank,
                amount: p.amount,
                payout_ref: payout_ref.to_string(),
            })
            .collect(),
        finalized,
        finalized_at: if finalized { now_ms() } else { 0 },
    }
}

impl<L: LedgerClient, S: PotStore> PotCoordinator<L, S> {
    /// Pays out an Ended pot to its top players, exactly once.
    ///
    /// `winners` must equal the ranking computed here, in order. The payee list
    /// is saved before the ledger call; a payout that already landed is
    /// finalized from that saved list, never re-ranked or re-sent.
    pub async fn distribute_winners(
        &self,
        key: &PotKey,
        winners: &[Pubkey],
    ) -> Result<DistributionRecord> {
        let _pot = self.lock_pot(key).await;

        // 1) Phase: only Ended -> Distributed
        let pot = self.require_pot(key).await?;
        let existing = self.store.get_distribution(key).await?;
        PotPhase::of(Some(&pot), existing.as_ref()).advance_to(PotPhase::Distributed)?;

        let winner_count = self.config.winner_count;
        require!(winners.len() == winner_count, PotError::InvalidWinnerList);

        // 2) Ledger state decides between a fresh payout and recovery
        let view = self
            .ledger_call("get_pot_account", self.ledger.get_pot_account(pot.address))
            .await?
            .ok_or(PotError::LedgerAccountMissing)?;
        let pending = existing.filter(|d| !d.finalized);

        let (payees, signature) = match (view.status, pending) {
            (LedgerPotStatus::Active, _) => return Err(error!(PotError::PotNotEnded)),
            (LedgerPotStatus::Distributed, Some(pending)) => {
                // The saved list is what the ledger paid, whatever the ranking says now.
                let payees: Vec<Payee> = pending
                    .payouts
                    .iter()
                    .map(|p| Payee {
                        player: p.player,
                        rank: p.rank,
                        amount: p.amount,
                    })
                    .collect();
                let paid: Vec<Pubkey> = payees.iter().map(|p| p.player).collect();
                check_winners(key, &paid, winners)?;

                let signature = self.recover_distribution_signature(key, pot.address).await?;
                (payees, signature)
            }
            (LedgerPotStatus::Distributed, None) => {
                let base = pot.ledger_balance_at_close.unwrap_or(view.balance);
                let payees = self.ranked_payees(key, base, winners).await?;
                warn!(pot = %key, "payout on ledger without a saved payee list, recording current ranking");
                let signature = self.recover_distribution_signature(key, pot.address).await?;
                (payees, signature)
            }
            (LedgerPotStatus::Ended, _) => {
                // Amounts from the balance captured at close, so a retry computes the same split
                let base = pot.ledger_balance_at_close.unwrap_or(view.balance);
                let payees = self.ranked_payees(key, base, winners).await?;

                // 3) Save the list before paying; a retry after a landed payout finalizes it as-is
                self.store
                    .save_pending_distribution(distribution_record(key, &payees, "", false))
                    .await?;
                let signature = self
                    .ledger_call("distribute", self.ledger.distribute(pot.address, &payees))
                    .await?;
                (payees, signature)
            }
        };

        // 4) Finalize the store record. If this fails, the retry takes the recovery branch.
        let record = distribution_record(key, &payees, &signature, true);
        self.store.finalize_distribution(record.clone()).await?;

        let total: u64 = payees.iter().map(|p| p.amount).sum();
        info!(pot = %key, %signature, total, winners = winner_count, "pot distributed");
        Ok(record)
    }

    /// Top `winner_count` players with their share of `base`, after checking
    /// `winners` against the ranking.
    async fn ranked_payees(&self, key: &PotKey, base: u64, winners: &[Pubkey]) -> Result<Vec<Payee>> {
        let winner_count = self.config.winner_count;
        let ranked = rank_entries(self.store.entries_for_pot(key).await?, self.config.tie_break);
        require!(ranked.len() >= winner_count, PotError::InvalidWinnerList);

        let expected: Vec<Pubkey> = ranked.iter().take(winner_count).map(|e| e.player).collect();
        check_winners(key, &expected, winners)?;

        let amounts = split_by_shares(base, &self.config.payout_shares_bps)?;
        expected
            .iter()
            .zip(amounts)
            .enumerate()
            .map(|(i, (player, amount))| {
                let rank = u8::try_from(i + 1).map_err(|_| error!(PotError::MathOverflow))?;
                Ok(Payee {
                    player: *player,
                    rank,
                    amount,
                })
            })
            .collect()
    }

    async fn recover_distribution_signature(&self, key: &PotKey, address: Pubkey) -> Result<String> {
        let signature = self
            .ledger_call(
                "distribution_signature",
                self.ledger.distribution_signature(address),
            )
            .await?
            .ok_or(PotError::LedgerAccountMissing)?;
        warn!(pot = %key, %signature, "payout already on ledger, finalizing store only");
        Ok(signature)
    }
}
