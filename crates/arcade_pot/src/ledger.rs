//! Boundary to the on-chain arcade program.
//!
//! The program itself is opaque here: the coordinator only relies on the
//! contract below. Every call is remote, may be slow and may fail on its own,
//! independently of the pot store.

use std::future::Future;

use anchor_lang::prelude::*;

use crate::state::LedgerPotStatus;

/// Authoritative view of a pot account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerPotView {
    pub address: Pubkey,
    pub balance: u64,
    pub status: LedgerPotStatus,
}

/// A confirmed transaction as reported by the ledger, reduced to what payment
/// verification needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub signature: String,
    pub success: bool,
    pub program_id: Pubkey,
    pub payer: Pubkey,
    pub pot: Pubkey,
    pub amount: u64,
}

/// One ranked recipient of a distribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payee {
    pub player: Pubkey,
    pub rank: u8,
    pub amount: u64,
}

pub trait LedgerClient: Send + Sync + 'static {
    /// Creates the pot PDA. `AlreadyExists` if the account is already in use.
    fn create_pot_account(
        &self,
        game_id: &str,
        pot_number: u64,
    ) -> impl Future<Output = Result<Pubkey>> + Send;

    /// `None` when no account lives at `address`.
    fn get_pot_account(
        &self,
        address: Pubkey,
    ) -> impl Future<Output = Result<Option<LedgerPotView>>> + Send;

    /// `PotNotActive` if the account is already closed.
    fn close_pot_account(&self, address: Pubkey) -> impl Future<Output = Result<String>> + Send;

    /// `PotNotActive` if the pot no longer accepts entries.
    fn pay_entry_fee(
        &self,
        address: Pubkey,
        payer: Pubkey,
        amount: u64,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Pays out ranked winners. May fail with `PotNotActive`, `InvalidWinnerList`
    /// or `WinnerMismatch`.
    fn distribute(
        &self,
        address: Pubkey,
        payees: &[Payee],
    ) -> impl Future<Output = Result<String>> + Send;

    fn get_transaction(
        &self,
        signature: &str,
    ) -> impl Future<Output = Result<Option<LedgerTransaction>>> + Send;

    /// Signature of the distribution already executed for `address`, if any.
    fn distribution_signature(
        &self,
        address: Pubkey,
    ) -> impl Future<Output = Result<Option<String>>> + Send;
}
