//! In-memory stand-in for the arcade program, used by tests and local runs
//! (`mock-ledger` feature).
//!
//! Pot accounts are kept as raw account data (discriminator + borsh) and
//! decoded through the same `GamePot` layout a real RPC client would use.
//! Faults can be injected per operation either before the effect (the call
//! never landed) or after it (the call landed but the caller saw a timeout).

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use anchor_lang::prelude::*;
use tokio::sync::Mutex;

use crate::errors::PotError;
use crate::ledger::{LedgerClient, LedgerPotView, LedgerTransaction, Payee};
use crate::state::{GamePot, LedgerPotStatus, PotKey};
use crate::utils::pot_address;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    Create,
    Get,
    Close,
    PayEntryFee,
    Distribute,
    GetTransaction,
    DistributionSignature,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fault {
    BeforeEffect,
    AfterEffect,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<Pubkey, Vec<u8>>,
    transactions: HashMap<String, LedgerTransaction>,
    distributions: HashMap<Pubkey, String>,
    expected_order: HashMap<Pubkey, Vec<Pubkey>>,
    faults: HashMap<LedgerOp, VecDeque<Fault>>,
    calls: HashMap<LedgerOp, u32>,
    latency: Duration,
    next_sig: u64,
}

impl Inner {
    fn load(&self, address: &Pubkey) -> Result<Option<GamePot>> {
        match self.accounts.get(address) {
            Some(data) => Ok(Some(GamePot::try_deserialize(&mut data.as_slice())?)),
            None => Ok(None),
        }
    }

    fn save(&mut self, address: Pubkey, pot: &GamePot) -> Result<()> {
        let mut data = Vec::new();
        pot.try_serialize(&mut data)?;
        self.accounts.insert(address, data);
        Ok(())
    }

    fn signature(&mut self, tag: &str) -> String {
        self.next_sig += 1;
        format!("mock-{}-{}", tag, self.next_sig)
    }
}

pub struct MockLedger {
    program_id: Pubkey,
    authority: Pubkey,
    inner: Mutex<Inner>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new(crate::ID)
    }
}

impl MockLedger {
    pub fn new(program_id: Pubkey) -> Self {
        Self {
            program_id,
            authority: Pubkey::new_unique(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    /// Next call of `op` fails with `LedgerUnavailable` without any effect.
    pub async fn fail_next(&self, op: LedgerOp) {
        self.push_fault(op, Fault::BeforeEffect).await;
    }

    /// Next call of `op` takes effect, then reports `LedgerUnavailable`.
    pub async fn fail_after_effect(&self, op: LedgerOp) {
        self.push_fault(op, Fault::AfterEffect).await;
    }

    async fn push_fault(&self, op: LedgerOp, fault: Fault) {
        self.inner
            .lock()
            .await
            .faults
            .entry(op)
            .or_default()
            .push_back(fault);
    }

    pub async fn set_latency(&self, latency: Duration) {
        self.inner.lock().await.latency = latency;
    }

    /// Winner order the simulated program computes on its own for `address`.
    pub async fn set_expected_order(&self, address: Pubkey, order: Vec<Pubkey>) {
        self.inner.lock().await.expected_order.insert(address, order);
    }

    /// Registers an arbitrary transaction, e.g. a failed or foreign payment.
    pub async fn insert_transaction(&self, tx: LedgerTransaction) {
        self.inner
            .lock()
            .await
            .transactions
            .insert(tx.signature.clone(), tx);
    }

    pub async fn calls(&self, op: LedgerOp) -> u32 {
        self.inner.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    pub async fn account(&self, address: Pubkey) -> Option<GamePot> {
        self.inner.lock().await.load(&address).ok().flatten()
    }

    async fn run<T, F>(&self, op: LedgerOp, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut Inner) -> Result<T> + Send,
    {
        let latency = self.inner.lock().await.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.inner.lock().await;
        *inner.calls.entry(op).or_default() += 1;
        let fault = inner.faults.get_mut(&op).and_then(|q| q.pop_front());

        require!(fault != Some(Fault::BeforeEffect), PotError::LedgerUnavailable);
        let out = f(&mut *inner)?;
        require!(fault != Some(Fault::AfterEffect), PotError::LedgerUnavailable);
        Ok(out)
    }
}

impl LedgerClient for MockLedger {
    async fn create_pot_account(&self, game_id: &str, pot_number: u64) -> Result<Pubkey> {
        let key = PotKey::new(game_id, pot_number);
        let address = pot_address(&self.program_id, &key);
        let authority = self.authority;

        self.run(LedgerOp::Create, move |inner| {
            require!(!inner.accounts.contains_key(&address), PotError::AlreadyExists);
            let pot = GamePot {
                game_id: key.game_id,
                pot_number: key.pot_number,
                total_lamports: 0,
                status: LedgerPotStatus::Active,
                authority,
                bump: 255,
            };
            inner.save(address, &pot)?;
            Ok(address)
        })
        .await
    }

    async fn get_pot_account(&self, address: Pubkey) -> Result<Option<LedgerPotView>> {
        self.run(LedgerOp::Get, move |inner| {
            Ok(inner.load(&address)?.map(|pot| LedgerPotView {
                address,
                balance: pot.total_lamports,
                status: pot.status,
            }))
        })
        .await
    }

    async fn close_pot_account(&self, address: Pubkey) -> Result<String> {
        self.run(LedgerOp::Close, move |inner| {
            let mut pot = inner.load(&address)?.ok_or(PotError::LedgerAccountMissing)?;
            require!(pot.status == LedgerPotStatus::Active, PotError::PotNotActive);
            pot.status = LedgerPotStatus::Ended;
            inner.save(address, &pot)?;
            Ok(inner.signature("close"))
        })
        .await
    }

    async fn pay_entry_fee(&self, address: Pubkey, payer: Pubkey, amount: u64) -> Result<String> {
        let program_id = self.program_id;
        self.run(LedgerOp::PayEntryFee, move |inner| {
            let mut pot = inner.load(&address)?.ok_or(PotError::LedgerAccountMissing)?;
            require!(pot.status == LedgerPotStatus::Active, PotError::PotNotActive);
            require!(amount > 0, PotError::InvalidAmount);

            pot.total_lamports = pot
                .total_lamports
                .checked_add(amount)
                .ok_or(PotError::MathOverflow)?;
            inner.save(address, &pot)?;

            let signature = inner.signature("pay");
            inner.transactions.insert(
                signature.clone(),
                LedgerTransaction {
                    signature: signature.clone(),
                    success: true,
                    program_id,
                    payer,
                    pot: address,
                    amount,
                },
            );
            Ok(signature)
        })
        .await
    }

    async fn distribute(&self, address: Pubkey, payees: &[Payee]) -> Result<String> {
        let payees = payees.to_vec();
        self.run(LedgerOp::Distribute, move |inner| {
            let mut pot = inner.load(&address)?.ok_or(PotError::LedgerAccountMissing)?;
            require!(pot.status == LedgerPotStatus::Ended, PotError::PotNotActive);
            require!(!payees.is_empty(), PotError::InvalidWinnerList);

            if let Some(expected) = inner.expected_order.get(&address) {
                let submitted: Vec<Pubkey> = payees.iter().map(|p| p.player).collect();
                require!(*expected == submitted, PotError::WinnerMismatch);
            }

            let total = payees
                .iter()
                .try_fold(0u64, |acc, p| acc.checked_add(p.amount))
                .ok_or(PotError::MathOverflow)?;
            require!(total <= pot.total_lamports, PotError::InvalidWinnerList);

            pot.total_lamports -= total;
            pot.status = LedgerPotStatus::Distributed;
            inner.save(address, &pot)?;

            let signature = inner.signature("distribute");
            inner.distributions.insert(address, signature.clone());
            Ok(signature)
        })
        .await
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<LedgerTransaction>> {
        let signature = signature.to_string();
        self.run(LedgerOp::GetTransaction, move |inner| {
            Ok(inner.transactions.get(&signature).cloned())
        })
        .await
    }

    async fn distribution_signature(&self, address: Pubkey) -> Result<Option<String>> {
        self.run(LedgerOp::DistributionSignature, move |inner| {
            Ok(inner.distributions.get(&address).cloned())
        })
        .await
    }
}
