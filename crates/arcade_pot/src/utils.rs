use anchor_lang::prelude::*;

use crate::constants::{BPS_DENOMINATOR, POT_SEED};
use crate::errors::PotError;
use crate::state::PotKey;

// -----------------
// PDA derivation
// -----------------

pub fn pot_seeds<'a>(game_id: &'a str, pot_number_le: &'a [u8; 8]) -> [&'a [u8]; 3] {
    [POT_SEED, game_id.as_bytes(), pot_number_le.as_ref()]
}

/// Address of the on-chain pot account: ["pot", game_id, pot_number LE].
pub fn pot_address(program_id: &Pubkey, key: &PotKey) -> Pubkey {
    let pot_le = key.pot_number.to_le_bytes();
    let (pda, _bump) = Pubkey::find_program_address(&pot_seeds(&key.game_id, &pot_le), program_id);
    pda
}

// -----------------
// Time
// -----------------

/// Wall clock in unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// -----------------
// Payout math
// -----------------

/// `amount * bps / 10_000`, rounded down.
pub fn apply_bps(amount: u64, bps: u16) -> Result<u64> {
    let v = (amount as u128)
        .checked_mul(bps as u128)
        .ok_or(PotError::MathOverflow)?
        / BPS_DENOMINATOR as u128;
    u64::try_from(v).map_err(|_| error!(PotError::MathOverflow))
}

/// Split `total` across ranks by share; rounding dust goes to rank 1.
pub fn split_by_shares(total: u64, shares_bps: &[u16]) -> Result<Vec<u64>> {
    let mut amounts = shares_bps
        .iter()
        .map(|bps| apply_bps(total, *bps))
        .collect::<Result<Vec<_>>>()?;

    let paid: u64 = amounts.iter().sum();
    let dust = total.checked_sub(paid).ok_or(PotError::MathOverflow)?;
    if let Some(first) = amounts.first_mut() {
        *first = first.checked_add(dust).ok_or(PotError::MathOverflow)?;
    }
    Ok(amounts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pot_address_is_deterministic_per_key() {
        let program = crate::ID;
        let a = pot_address(&program, &PotKey::new("flappy_bird", 1));
        let b = pot_address(&program, &PotKey::new("flappy_bird", 1));
        let c = pot_address(&program, &PotKey::new("flappy_bird", 2));
        let d = pot_address(&program, &PotKey::new("pacman", 1));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn pot_address_matches_manual_derivation() {
        let program = crate::ID;
        let key = PotKey::new("flappy_bird", 3);
        let (expected, _) = Pubkey::find_program_address(
            &[b"pot", b"flappy_bird", &3u64.to_le_bytes()],
            &program,
        );
        assert_eq!(pot_address(&program, &key), expected);
    }

    #[test]
    fn split_assigns_dust_to_first_rank() {
        let amounts = split_by_shares(1_001, &[5_000, 3_000, 2_000]).unwrap();
        assert_eq!(amounts, vec![501, 300, 200]);
        assert_eq!(amounts.iter().sum::<u64>(), 1_001);
    }

    #[test]
    fn split_of_large_balance_does_not_overflow() {
        let amounts = split_by_shares(u64::MAX, &[10_000]).unwrap();
        assert_eq!(amounts, vec![u64::MAX]);
    }
}
