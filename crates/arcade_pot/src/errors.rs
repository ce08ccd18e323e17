use anchor_lang::error::Error;
use anchor_lang::prelude::*;

#[error_code]
pub enum PotError {
    // -----------------
    // Lifecycle
    // -----------------
    #[msg("Pot already exists")]
    AlreadyExists,
    #[msg("Another pot is already active for this game")]
    ActivePotConflict,
    #[msg("Pot is not active")]
    PotNotActive,
    #[msg("Pot not found")]
    PotNotFound,
    #[msg("Pot has not ended yet")]
    PotNotEnded,
    #[msg("Ledger account for pot is missing")]
    LedgerAccountMissing,

    // -----------------
    // Entries & scores
    // -----------------
    #[msg("Payment already backs an entry")]
    DuplicatePayment,
    #[msg("Entry not found")]
    EntryNotFound,
    #[msg("Entry already scored")]
    AlreadyScored,
    #[msg("Invalid amount")]
    InvalidAmount,
    #[msg("Math overflow")]
    MathOverflow,

    // -----------------
    // Distribution
    // -----------------
    #[msg("Invalid winner list")]
    InvalidWinnerList,
    #[msg("Winner order does not match ranking")]
    WinnerMismatch,
    #[msg("Pot already distributed")]
    AlreadyDistributed,

    // -----------------
    // Transient (retryable)
    // -----------------
    #[msg("Ledger unavailable")]
    LedgerUnavailable,
    #[msg("Store unavailable")]
    StoreUnavailable,

    // -----------------
    // Payment verification
    // -----------------
    #[msg("Payment transaction not found")]
    PaymentNotFound,
    #[msg("Payment transaction failed on ledger")]
    PaymentFailed,
    #[msg("Payment does not involve the pot program")]
    PaymentProgramMismatch,
    #[msg("Payment payer does not match player")]
    PaymentPayerMismatch,
    #[msg("Payment destination does not match pot")]
    PaymentPotMismatch,
    #[msg("Payment below entry fee")]
    InsufficientEntryFee,

    // -----------------
    // Boundary
    // -----------------
    #[msg("Invalid request")]
    InvalidRequest,
    #[msg("Invalid configuration")]
    InvalidConfig,
}

/// Numeric code of a custom error, `None` for plain program errors.
pub fn error_code(err: &Error) -> Option<u32> {
    match err {
        Error::AnchorError(e) => Some(e.error_code_number),
        Error::ProgramError(_) => None,
    }
}

pub fn is_pot_error(err: &Error, expected: PotError) -> bool {
    error_code(err) == Some(u32::from(expected))
}

/// Only ledger/store outages are worth retrying; everything else is a business rejection.
pub fn is_transient(err: &Error) -> bool {
    is_pot_error(err, PotError::LedgerUnavailable) || is_pot_error(err, PotError::StoreUnavailable)
}
