use std::fmt;

use anchor_lang::prelude::*;

use crate::errors::PotError;

// -----------------
// On-chain mirror
// -----------------

/// Layout of the arcade program's pot account. Decoded from raw ledger data.
#[account]
pub struct GamePot {
    pub game_id: String,
    pub pot_number: u64,
    pub total_lamports: u64,
    pub status: LedgerPotStatus,
    pub authority: Pubkey,
    pub bump: u8,
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerPotStatus {
    Active,
    Ended,
    Distributed,
}

impl LedgerPotStatus {
    pub fn is_closed(self) -> bool {
        !matches!(self, LedgerPotStatus::Active)
    }
}

// -----------------
// Store records
// -----------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PotKey {
    pub game_id: String,
    pub pot_number: u64,
}

impl PotKey {
    pub fn new(game_id: impl Into<String>, pot_number: u64) -> Self {
        Self {
            game_id: game_id.into(),
            pot_number,
        }
    }

    pub fn next(&self) -> Self {
        Self::new(self.game_id.clone(), self.pot_number + 1)
    }
}

impl fmt::Display for PotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.game_id, self.pot_number)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PotStatus {
    Active,
    Ended,
}

impl PotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PotStatus::Active => "active",
            PotStatus::Ended => "ended",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pot {
    pub key: PotKey,
    pub address: Pubkey,
    pub status: PotStatus,
    /// Sum of recorded entry fees (lamports). Only grows while Active.
    pub total_amount: u64,
    pub created_at: i64,
    /// Set exactly once, on Active -> Ended.
    pub closed_at: Option<i64>,
    pub ledger_balance_at_close: Option<u64>,
}

impl Pot {
    pub fn is_active(&self) -> bool {
        self.status == PotStatus::Active
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub player: Pubkey,
    pub pot: PotKey,
    /// Ledger signature of the entry fee payment; doubles as the entry reference.
    pub payment_ref: String,
    pub amount: u64,
    pub score: u64,
    /// Separate from `score` so that a real 0 differs from "not played yet".
    pub played: bool,
    pub created_at: i64,
    pub scored_at: Option<i64>,
    /// Insertion order, assigned by the store.
    pub seq: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payout {
    pub player: Pubkey,
    pub rank: u8,
    pub amount: u64,
    pub payout_ref: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DistributionRecord {
    pub pot: PotKey,
    pub payouts: Vec<Payout>,
    pub finalized: bool,
    pub finalized_at: i64,
}

// -----------------
// Lifecycle
// -----------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PotPhase {
    Uninitialized,
    Active,
    Ended,
    Distributed,
}

impl PotPhase {
    pub fn of(pot: Option<&Pot>, distribution: Option<&DistributionRecord>) -> Self {
        match (pot, distribution) {
            (None, _) => PotPhase::Uninitialized,
            (Some(p), _) if p.is_active() => PotPhase::Active,
            (Some(_), Some(d)) if d.finalized => PotPhase::Distributed,
            (Some(_), _) => PotPhase::Ended,
        }
    }

    fn successor(self) -> Option<Self> {
        match self {
            PotPhase::Uninitialized => Some(PotPhase::Active),
            PotPhase::Active => Some(PotPhase::Ended),
            PotPhase::Ended => Some(PotPhase::Distributed),
            PotPhase::Distributed => None,
        }
    }

    /// Transitions are one step forward only. The error names what blocked the
    /// attempted transition (create, close or distribute).
    pub fn advance_to(self, next: PotPhase) -> Result<PotPhase> {
        if self.successor() == Some(next) {
            return Ok(next);
        }
        let err = match (self, next) {
            (_, PotPhase::Uninitialized) => PotError::InvalidRequest,
            (_, PotPhase::Active) => PotError::AlreadyExists,
            (PotPhase::Uninitialized, _) => PotError::PotNotFound,
            (_, PotPhase::Ended) => PotError::PotNotActive,
            (PotPhase::Active, PotPhase::Distributed) => PotError::PotNotEnded,
            (_, PotPhase::Distributed) => PotError::AlreadyDistributed,
        };
        Err(err.into())
    }
}
