use anchor_lang::prelude::*;
use tracing::{info, warn};

use crate::constants::MAX_GAME_ID_LEN;
use crate::coordinator::PotCoordinator;
use crate::errors::{is_pot_error, PotError};
use crate::ledger::LedgerClient;
use crate::state::{LedgerPotStatus, Pot, PotKey, PotPhase, PotStatus};
use crate::store::PotStore;
use crate::utils::now_ms;

#[derive(Clone, Debug)]
pub struct RolloverOutcome {
    /// Pot that was Active before the rollover, now Ended.
    pub closed: Option<Pot>,
    pub opened: Pot,
}

pub(crate) fn validate_game_id(game_id: &str) -> Result<()> {
    require!(
        !game_id.is_empty() && game_id.len() <= MAX_GAME_ID_LEN,
        PotError::InvalidRequest
    );
    Ok(())
}

impl<L: LedgerClient, S: PotStore> PotCoordinator<L, S> {
    pub async fn create_pot(&self, game_id: &str, pot_number: u64) -> Result<Pot> {
        validate_game_id(game_id)?;
        require!(pot_number > 0, PotError::InvalidRequest);

        let _game = self.lock_game(game_id).await;
        self.create_pot_locked(PotKey::new(game_id, pot_number)).await
    }

    /// Caller holds the game lock.
    pub(crate) async fn create_pot_locked(&self, key: PotKey) -> Result<Pot> {
        // 1) Store-side preconditions
        require!(
            self.store.get_pot(&key).await?.is_none(),
            PotError::AlreadyExists
        );
        if let Some(active) = self.store.find_active_pot(&key.game_id).await? {
            warn!(pot = %key, active = %active.key, "create rejected, game already has an active pot");
            return Err(error!(PotError::ActivePotConflict));
        }

        // 2) Reconcile with the ledger before creating anything. An account that
        //    exists here without a store record comes from an earlier attempt
        //    whose store write failed.
        let address = self.pot_address(&key);
        let existing = self
            .ledger_call("get_pot_account", self.ledger.get_pot_account(address))
            .await?;

        if let Some(view) = existing {
            let now = now_ms();
            if view.status == LedgerPotStatus::Active {
                let pot = Pot {
                    key,
                    address,
                    status: PotStatus::Active,
                    total_amount: view.balance,
                    created_at: now,
                    closed_at: None,
                    ledger_balance_at_close: None,
                };
                self.store.insert_pot(pot.clone()).await?;
                warn!(pot = %pot.key, %address, balance = view.balance, "adopted ledger pot missing from store");
                return Ok(pot);
            }

            // Closed on the ledger: keep an Ended mirror so numbering moves past it.
            let mirror = Pot {
                key: key.clone(),
                address,
                status: PotStatus::Ended,
                total_amount: view.balance,
                created_at: now,
                closed_at: Some(now),
                ledger_balance_at_close: Some(view.balance),
            };
            self.store.insert_pot(mirror).await?;
            warn!(pot = %key, %address, "ledger pot already closed, mirrored as ended");
            return Err(error!(PotError::AlreadyExists));
        }

        // 3) Create on the ledger
        let created = self
            .ledger_call(
                "create_pot_account",
                self.ledger.create_pot_account(&key.game_id, key.pot_number),
            )
            .await?;
        require_keys_eq!(created, address, PotError::InvalidConfig);

        // 4) Mirror in the store. If this fails, the retry adopts the account in step 2.
        let pot = Pot {
            key,
            address,
            status: PotStatus::Active,
            total_amount: 0,
            created_at: now_ms(),
            closed_at: None,
            ledger_balance_at_close: None,
        };
        self.store.insert_pot(pot.clone()).await?;

        info!(pot = %pot.key, %address, "pot created");
        Ok(pot)
    }

    pub async fn close_pot(&self, key: &PotKey) -> Result<Pot> {
        let _pot = self.lock_pot(key).await;

        let pot = self.require_pot(key).await?;
        let distribution = self.store.get_distribution(key).await?;
        PotPhase::of(Some(&pot), distribution.as_ref()).advance_to(PotPhase::Ended)?;

        // 1) Read the ledger first; a close that already landed is not re-issued.
        let view = self
            .ledger_call("get_pot_account", self.ledger.get_pot_account(pot.address))
            .await?
            .ok_or(PotError::LedgerAccountMissing)?;

        if view.status.is_closed() {
            warn!(pot = %key, "ledger pot already closed, repairing store");
        } else {
            match self
                .ledger_call("close_pot_account", self.ledger.close_pot_account(pot.address))
                .await
            {
                Ok(signature) => info!(pot = %key, %signature, "ledger pot closed"),
                Err(err) if is_pot_error(&err, PotError::PotNotActive) => {
                    warn!(pot = %key, "ledger pot closed concurrently, repairing store");
                }
                Err(err) => return Err(err),
            }
        }

        // 2) Final authoritative balance. The close already landed, so a failed
        //    read only falls back to the pre-close view.
        let balance = match self
            .ledger_call("get_pot_account", self.ledger.get_pot_account(pot.address))
            .await
        {
            Ok(Some(after)) => after.balance,
            Ok(None) | Err(_) => view.balance,
        };
        if balance != pot.total_amount {
            warn!(
                pot = %key,
                ledger_balance = balance,
                store_total = pot.total_amount,
                "pot balance drift between ledger and store"
            );
        }

        // 3) Mirror in the store
        let ended = self.store.mark_ended(key, now_ms(), Some(balance)).await?;
        info!(pot = %key, balance, "pot ended");
        Ok(ended)
    }

    /// Closes the game's Active pot (if any) and opens the next one.
    pub async fn rollover_game(&self, game_id: &str) -> Result<RolloverOutcome> {
        validate_game_id(game_id)?;
        let _game = self.lock_game(game_id).await;

        let closed = match self.store.find_active_pot(game_id).await? {
            Some(active) => Some(self.close_pot(&active.key).await?),
            None => None,
        };

        // Numbering follows the latest pot in any status, so a rollover that
        // closed but failed to open resumes at the right number.
        let next = match self.store.latest_pot(game_id).await? {
            Some(latest) => latest.key.next(),
            None => PotKey::new(game_id, self.config.first_pot_number),
        };
        let opened = self.create_pot_locked(next).await?;

        info!(
            game_id,
            closed = ?closed.as_ref().map(|p| p.key.pot_number),
            opened = opened.key.pot_number,
            "rollover complete"
        );
        Ok(RolloverOutcome { closed, opened })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::coordinator::test_support::*;
    use crate::mock::LedgerOp;

    #[tokio::test]
    async fn create_twice_fails_and_keeps_one_record() {
        let c = coordinator(CoordinatorConfig::default());
        let pot = c.create_pot("flappy_bird", 1).await.unwrap();
        assert_eq!(pot.status, PotStatus::Active);
        assert_eq!(pot.address, c.pot_address(&pot.key));

        let err = c.create_pot("flappy_bird", 1).await.unwrap_err();
        assert!(is_pot_error(&err, PotError::AlreadyExists));
        assert_eq!(c.pots_for_game("flappy_bird").await.unwrap().len(), 1);
        assert_eq!(c.ledger.calls(LedgerOp::Create).await, 1);
    }

    #[tokio::test]
    async fn second_active_pot_for_game_conflicts() {
        let c = coordinator(CoordinatorConfig::default());
        c.create_pot("flappy_bird", 1).await.unwrap();

        let err = c.create_pot("flappy_bird", 2).await.unwrap_err();
        assert!(is_pot_error(&err, PotError::ActivePotConflict));

        c.create_pot("pacman", 1).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_bad_identity() {
        let c = coordinator(CoordinatorConfig::default());
        let empty = c.create_pot("", 1).await.unwrap_err();
        assert!(is_pot_error(&empty, PotError::InvalidRequest));
        let zero = c.create_pot("flappy_bird", 0).await.unwrap_err();
        assert!(is_pot_error(&zero, PotError::InvalidRequest));
        let long = c.create_pot(&"g".repeat(33), 1).await.unwrap_err();
        assert!(is_pot_error(&long, PotError::InvalidRequest));
    }

    #[tokio::test]
    async fn retry_after_store_failure_adopts_ledger_account() {
        let c = coordinator(CoordinatorConfig::default());
        let key = PotKey::new("flappy_bird", 1);

        c.store.fail_next_writes(1);
        let err = c.create_pot("flappy_bird", 1).await.unwrap_err();
        assert!(is_pot_error(&err, PotError::StoreUnavailable));
        assert!(c.pot(&key).await.unwrap().is_none());

        let pot = c.create_pot("flappy_bird", 1).await.unwrap();
        assert_eq!(pot.status, PotStatus::Active);
        // The ledger account was created once and adopted, never re-created.
        assert_eq!(c.ledger.calls(LedgerOp::Create).await, 1);
    }

    #[tokio::test]
    async fn retry_after_timed_out_create_adopts_ledger_account() {
        let c = coordinator(CoordinatorConfig::default());
        c.ledger.fail_after_effect(LedgerOp::Create).await;

        let err = c.create_pot("flappy_bird", 1).await.unwrap_err();
        assert!(is_pot_error(&err, PotError::LedgerUnavailable));

        c.create_pot("flappy_bird", 1).await.unwrap();
        assert_eq!(c.ledger.calls(LedgerOp::Create).await, 1);
    }

    #[tokio::test]
    async fn closed_ledger_orphan_is_mirrored_as_ended() {
        let c = coordinator(CoordinatorConfig::default());
        let address = c.ledger.create_pot_account("flappy_bird", 1).await.unwrap();
        c.ledger.close_pot_account(address).await.unwrap();

        let err = c.create_pot("flappy_bird", 1).await.unwrap_err();
        assert!(is_pot_error(&err, PotError::AlreadyExists));

        let mirror = c.pot(&PotKey::new("flappy_bird", 1)).await.unwrap().unwrap();
        assert_eq!(mirror.status, PotStatus::Ended);

        // The next rollover moves past the orphan.
        let outcome = c.rollover_game("flappy_bird").await.unwrap();
        assert!(outcome.closed.is_none());
        assert_eq!(outcome.opened.key.pot_number, 2);
    }

    #[tokio::test]
    async fn close_sets_closed_at_once_and_rejects_second_close() {
        let c = coordinator(CoordinatorConfig::default());
        let key = PotKey::new("flappy_bird", 1);
        c.create_pot("flappy_bird", 1).await.unwrap();
        paid_entry(&c, &key, Pubkey::new_unique(), 250).await;

        let ended = c.close_pot(&key).await.unwrap();
        assert_eq!(ended.status, PotStatus::Ended);
        assert!(ended.closed_at.is_some());
        assert_eq!(ended.ledger_balance_at_close, Some(250));

        let err = c.close_pot(&key).await.unwrap_err();
        assert!(is_pot_error(&err, PotError::PotNotActive));
        assert_eq!(c.pot(&key).await.unwrap().unwrap().closed_at, ended.closed_at);
        assert_eq!(c.ledger.calls(LedgerOp::Close).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_racing_an_outside_close_still_ends_the_pot() {
        let c = coordinator(CoordinatorConfig::default());
        let key = PotKey::new("flappy_bird", 1);
        let address = c.create_pot("flappy_bird", 1).await.unwrap().address;
        c.ledger.set_latency(Duration::from_millis(100)).await;

        // The coordinator reads Active at 100ms, the outside close lands at
        // 150ms, and the coordinator's own close is refused at 200ms.
        let (ours, outside) = tokio::join!(c.close_pot(&key), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            c.ledger.close_pot_account(address).await
        });
        outside.unwrap();
        let ended = ours.unwrap();

        assert_eq!(ended.status, PotStatus::Ended);
        assert_eq!(ended.ledger_balance_at_close, Some(0));
        assert_eq!(c.ledger.calls(LedgerOp::Close).await, 2);
        assert_eq!(c.pot(&key).await.unwrap().unwrap().status, PotStatus::Ended);
    }

    #[tokio::test]
    async fn close_retry_repairs_store_without_second_ledger_close() {
        let c = coordinator(CoordinatorConfig::default());
        let key = PotKey::new("flappy_bird", 1);
        c.create_pot("flappy_bird", 1).await.unwrap();

        // Ledger close lands, store write fails.
        c.store.fail_next_writes(1);
        let err = c.close_pot(&key).await.unwrap_err();
        assert!(is_pot_error(&err, PotError::StoreUnavailable));
        assert!(c.pot(&key).await.unwrap().unwrap().is_active());

        let ended = c.close_pot(&key).await.unwrap();
        assert_eq!(ended.status, PotStatus::Ended);
        assert_eq!(c.ledger.calls(LedgerOp::Close).await, 1);
    }

    #[tokio::test]
    async fn close_after_timed_out_ledger_close_is_repaired() {
        let c = coordinator(CoordinatorConfig::default());
        let key = PotKey::new("flappy_bird", 1);
        c.create_pot("flappy_bird", 1).await.unwrap();

        c.ledger.fail_after_effect(LedgerOp::Close).await;
        let err = c.close_pot(&key).await.unwrap_err();
        assert!(is_pot_error(&err, PotError::LedgerUnavailable));

        c.close_pot(&key).await.unwrap();
        assert_eq!(c.ledger.calls(LedgerOp::Close).await, 1);
    }

    #[tokio::test]
    async fn close_of_unknown_pot_fails() {
        let c = coordinator(CoordinatorConfig::default());
        let err = c.close_pot(&PotKey::new("flappy_bird", 4)).await.unwrap_err();
        assert!(is_pot_error(&err, PotError::PotNotFound));
    }

    #[tokio::test]
    async fn rollover_opens_first_pot_then_rolls_forward() {
        let c = coordinator(CoordinatorConfig::default());

        let first = c.rollover_game("flappy_bird").await.unwrap();
        assert!(first.closed.is_none());
        assert_eq!(first.opened.key.pot_number, 1);

        let second = c.rollover_game("flappy_bird").await.unwrap();
        assert_eq!(second.closed.unwrap().key.pot_number, 1);
        assert_eq!(second.opened.key.pot_number, 2);

        let active = c.active_pot("flappy_bird").await.unwrap().unwrap();
        assert_eq!(active.key.pot_number, 2);
    }

    #[tokio::test]
    async fn rollover_resumes_after_failed_open() {
        let c = coordinator(CoordinatorConfig::default());
        c.rollover_game("flappy_bird").await.unwrap();

        // Close succeeds, the ledger is down when opening #2.
        c.ledger.fail_next(LedgerOp::Create).await;
        let err = c.rollover_game("flappy_bird").await.unwrap_err();
        assert!(is_pot_error(&err, PotError::LedgerUnavailable));
        assert!(c.active_pot("flappy_bird").await.unwrap().is_none());

        let outcome = c.rollover_game("flappy_bird").await.unwrap();
        assert_eq!(outcome.opened.key.pot_number, 2);
        let pots = c.pots_for_game("flappy_bird").await.unwrap();
        assert_eq!(pots.iter().filter(|p| p.is_active()).count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_rollovers_keep_one_active_pot() {
        let c = coordinator(CoordinatorConfig::default());
        let rounds = 8;

        let observer = {
            let c = Arc::clone(&c);
            tokio::spawn(async move {
                for _ in 0..200 {
                    let pots = c.pots_for_game("flappy_bird").await.unwrap();
                    assert!(pots.iter().filter(|p| p.is_active()).count() <= 1);
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut tasks = Vec::new();
        for i in 0..rounds {
            let c = Arc::clone(&c);
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    c.rollover_game("flappy_bird").await.map(|_| ())
                } else {
                    // Competing explicit creates lose to the per-game serialization.
                    c.create_pot("flappy_bird", 1).await.map(|_| ())
                }
            }));
        }
        for t in tasks {
            let _ = t.await.unwrap();
        }
        observer.await.unwrap();

        let pots = c.pots_for_game("flappy_bird").await.unwrap();
        assert_eq!(pots.iter().filter(|p| p.is_active()).count(), 1);
        let mut numbers: Vec<u64> = pots.iter().map(|p| p.key.pot_number).collect();
        numbers.dedup();
        assert_eq!(numbers.len(), pots.len());
    }
}
