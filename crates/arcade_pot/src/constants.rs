// Centralized Coordinator Constants

// Ledger Seeds
// ============

/// Seed prefix of the on-chain pot PDA: ["pot", game_id, pot_number LE].
pub const POT_SEED: &[u8] = b"pot";

/// A single PDA seed may not exceed 32 bytes, which bounds the game id.
pub const MAX_GAME_ID_LEN: usize = 32;

// Distribution
// ============

/// Number of ranked winners paid out per pot.
pub const DEFAULT_WINNER_COUNT: usize = 5;

/// Payout share per rank (basis points, rank 1 first). Must sum to `BPS_DENOMINATOR`.
pub const DEFAULT_PAYOUT_SHARES_BPS: [u16; DEFAULT_WINNER_COUNT] = [4_000, 2_500, 1_500, 1_200, 800];

pub const BPS_DENOMINATOR: u64 = 10_000;

// Entries
// =======

/// Default entry fee in lamports (0.01 SOL).
pub const DEFAULT_ENTRY_FEE_LAMPORTS: u64 = 10_000_000;

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

// Rollover & Ledger Timing
// ========================

/// Rollover period: one pot per game per minute.
pub const DEFAULT_ROLLOVER_INTERVAL_SECS: u64 = 60;

/// Upper bound for a single ledger round trip before it is reported as unavailable.
pub const DEFAULT_LEDGER_TIMEOUT_MS: u64 = 10_000;

/// Pot number used the very first time a game is rolled over.
pub const INITIAL_POT_NUMBER: u64 = 1;

pub const DEFAULT_GAME_ID: &str = "flappy_bird";

// Retry
// =====

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;
