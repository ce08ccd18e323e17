use std::env;
use std::str::FromStr;
use std::time::Duration;

use anchor_lang::prelude::*;

use crate::constants::*;
use crate::errors::PotError;

/// How equal scores are ordered when ranking a pot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TieBreak {
    /// First player to reach the score wins the tie.
    EarliestScore,
    /// First player to pay the entry fee wins the tie.
    EarliestEntry,
}

impl FromStr for TieBreak {
    type Err = anchor_lang::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "earliest_score" => Ok(TieBreak::EarliestScore),
            "earliest_entry" => Ok(TieBreak::EarliestEntry),
            _ => Err(error!(PotError::InvalidConfig)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given (1-based) attempt, capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Everything the coordinator, recorder and scheduler need, handed over at construction.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub program_id: Pubkey,
    pub games: Vec<String>,
    pub winner_count: usize,
    pub payout_shares_bps: Vec<u16>,
    pub tie_break: TieBreak,
    pub entry_fee_lamports: u64,
    pub first_pot_number: u64,
    pub ledger_timeout_ms: u64,
    pub rollover_interval_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            program_id: crate::ID,
            games: vec![DEFAULT_GAME_ID.to_string()],
            winner_count: DEFAULT_WINNER_COUNT,
            payout_shares_bps: DEFAULT_PAYOUT_SHARES_BPS.to_vec(),
            tie_break: TieBreak::EarliestScore,
            entry_fee_lamports: DEFAULT_ENTRY_FEE_LAMPORTS,
            first_pot_number: INITIAL_POT_NUMBER,
            ledger_timeout_ms: DEFAULT_LEDGER_TIMEOUT_MS,
            rollover_interval_secs: DEFAULT_ROLLOVER_INTERVAL_SECS,
            retry: RetryPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Defaults overridden by `POT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = env_var("POT_PROGRAM_ID") {
            cfg.program_id = Pubkey::from_str(&v).map_err(|_| error!(PotError::InvalidConfig))?;
        }
        if let Some(v) = env_var("POT_GAMES") {
            cfg.games = v
                .split(',')
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
                .collect();
        }
        if let Some(v) = env_var("POT_WINNER_COUNT") {
            cfg.winner_count = parse(&v)?;
        }
        if let Some(v) = env_var("POT_PAYOUT_SHARES_BPS") {
            cfg.payout_shares_bps = v
                .split(',')
                .map(|s| parse::<u16>(s.trim()))
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(v) = env_var("POT_TIE_BREAK") {
            cfg.tie_break = v.parse()?;
        }
        if let Some(v) = env_var("POT_ENTRY_FEE_LAMPORTS") {
            cfg.entry_fee_lamports = parse(&v)?;
        }
        if let Some(v) = env_var("POT_LEDGER_TIMEOUT_MS") {
            cfg.ledger_timeout_ms = parse(&v)?;
        }
        if let Some(v) = env_var("POT_ROLLOVER_INTERVAL_SECS") {
            cfg.rollover_interval_secs = parse(&v)?;
        }
        if let Some(v) = env_var("POT_RETRY_ATTEMPTS") {
            cfg.retry.max_attempts = parse(&v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        // Ranks are u8 on the ledger.
        require!(
            self.winner_count > 0 && self.winner_count <= u8::MAX as usize,
            PotError::InvalidConfig
        );
        require!(
            self.payout_shares_bps.len() == self.winner_count,
            PotError::InvalidConfig
        );
        let total_bps: u64 = self.payout_shares_bps.iter().map(|b| *b as u64).sum();
        require!(total_bps == BPS_DENOMINATOR, PotError::InvalidConfig);

        require!(!self.games.is_empty(), PotError::InvalidConfig);
        for game in &self.games {
            require!(
                !game.is_empty() && game.len() <= MAX_GAME_ID_LEN,
                PotError::InvalidConfig
            );
        }

        require!(self.ledger_timeout_ms > 0, PotError::InvalidConfig);
        require!(self.rollover_interval_secs > 0, PotError::InvalidConfig);
        require!(self.retry.max_attempts > 0, PotError::InvalidConfig);
        Ok(())
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }

    pub fn rollover_interval(&self) -> Duration {
        Duration::from_secs(self.rollover_interval_secs)
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse<T: FromStr>(v: &str) -> Result<T> {
    v.trim().parse().map_err(|_| error!(PotError::InvalidConfig))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::is_pot_error;

    #[test]
    fn default_config_is_valid() {
        let cfg = CoordinatorConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.winner_count, 5);
        assert_eq!(cfg.games, vec!["flappy_bird".to_string()]);
        assert_eq!(cfg.program_id, crate::ID);
    }

    #[test]
    fn shares_must_cover_every_winner_and_sum_to_one() {
        let mut cfg = CoordinatorConfig::default();
        cfg.winner_count = 3;
        let err = cfg.validate().unwrap_err();
        assert!(is_pot_error(&err, PotError::InvalidConfig));

        cfg.payout_shares_bps = vec![5_000, 3_000, 1_000];
        assert!(cfg.validate().is_err());

        cfg.payout_shares_bps = vec![5_000, 3_000, 2_000];
        cfg.validate().unwrap();
    }

    #[test]
    fn game_ids_respect_seed_limit() {
        let mut cfg = CoordinatorConfig::default();
        cfg.games = vec!["x".repeat(MAX_GAME_ID_LEN + 1)];
        assert!(cfg.validate().is_err());
        cfg.games = vec![String::new()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn tie_break_parses() {
        assert_eq!("earliest_entry".parse::<TieBreak>().unwrap(), TieBreak::EarliestEntry);
        assert!("coin_flip".parse::<TieBreak>().is_err());
    }
}
