use anchor_lang::prelude::*;

pub mod api;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod errors;
pub mod instructions;
pub mod ledger;
#[cfg(any(test, feature = "mock-ledger"))]
pub mod mock;
pub mod recorder;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod utils;

pub use constants::*;
pub use errors::*;
pub use state::*;
pub use utils::*;

pub use config::{CoordinatorConfig, RetryPolicy, TieBreak};
pub use coordinator::{PotCoordinator, PotSnapshot};
pub use instructions::{rank_entries, RolloverOutcome};
pub use ledger::{LedgerClient, LedgerPotView, LedgerTransaction, Payee};
pub use recorder::EntryRecorder;
pub use scheduler::{RolloverScheduler, SchedulerHandle};
pub use store::{MemoryStore, PotStore};

// Arcade pot program on the ledger; owner of every `GamePot` account.
declare_id!("uqF9WXM1GkHE2nKFAPUVX1BSiWys59yzuWZW9GR9Fky");
