//! Typed request/response surface for an HTTP front end.
//!
//! Field names are camelCase on the wire. Wallets travel as base58 strings
//! and amounts as lamports, with a SOL convenience figure on reads.

use std::str::FromStr;
use std::sync::Arc;

use anchor_lang::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::{LAMPORTS_PER_SOL, MAX_GAME_ID_LEN};
use crate::coordinator::{PotCoordinator, PotSnapshot};
use crate::errors::{is_pot_error, PotError};
use crate::ledger::LedgerClient;
use crate::recorder::EntryRecorder;
use crate::state::{DistributionRecord, Entry, Pot, PotKey, PotPhase};
use crate::store::PotStore;

// -----------------
// Requests
// -----------------

fn validate_pot_ref(game_id: &str, pot_number: u64) -> Result<PotKey> {
    require!(
        !game_id.is_empty() && game_id.len() <= MAX_GAME_ID_LEN,
        PotError::InvalidRequest
    );
    require!(pot_number >= 1, PotError::InvalidRequest);
    Ok(PotKey::new(game_id, pot_number))
}

fn parse_wallet(wallet: &str) -> Result<Pubkey> {
    Pubkey::from_str(wallet).map_err(|_| error!(PotError::InvalidRequest))
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializePotRequest {
    pub game_id: String,
    pub pot_number: u64,
}

impl InitializePotRequest {
    pub fn validate(&self) -> Result<PotKey> {
        validate_pot_ref(&self.game_id, self.pot_number)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePotRequest {
    pub game_id: String,
    pub pot_number: u64,
}

impl ClosePotRequest {
    pub fn validate(&self) -> Result<PotKey> {
        validate_pot_ref(&self.game_id, self.pot_number)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributeWinnersRequest {
    pub game_id: String,
    pub pot_number: u64,
    /// Ranked wallets, rank 1 first.
    pub winners: Vec<String>,
}

impl DistributeWinnersRequest {
    pub fn validate(&self) -> Result<(PotKey, Vec<Pubkey>)> {
        let key = validate_pot_ref(&self.game_id, self.pot_number)?;
        require!(!self.winners.is_empty(), PotError::InvalidWinnerList);
        let winners = self
            .winners
            .iter()
            .map(|w| parse_wallet(w))
            .collect::<Result<Vec<_>>>()?;
        Ok((key, winners))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayEntryFeeRequest {
    pub game_id: String,
    pub pot_number: u64,
    pub wallet: String,
    /// Signature of the entry-fee transfer, also the entry reference.
    pub signature: String,
}

impl PayEntryFeeRequest {
    pub fn validate(&self) -> Result<(PotKey, Pubkey)> {
        let key = validate_pot_ref(&self.game_id, self.pot_number)?;
        require!(!self.signature.is_empty(), PotError::InvalidRequest);
        Ok((key, parse_wallet(&self.wallet)?))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateScoreRequest {
    pub entry_ref: String,
    pub score: u64,
}

impl UpdateScoreRequest {
    pub fn validate(&self) -> Result<()> {
        require!(!self.entry_ref.is_empty(), PotError::InvalidRequest);
        Ok(())
    }
}

// -----------------
// Responses
// -----------------

fn to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

fn phase_str(phase: PotPhase) -> &'static str {
    match phase {
        PotPhase::Uninitialized => "uninitialized",
        PotPhase::Active => "active",
        PotPhase::Ended => "ended",
        PotPhase::Distributed => "distributed",
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PotResponse {
    pub game_id: String,
    pub pot_number: u64,
    pub address: String,
    pub status: &'static str,
    pub total_amount: u64,
    pub balance_sol: f64,
    pub created_at: i64,
    pub closed_at: Option<i64>,
}

impl From<&Pot> for PotResponse {
    fn from(pot: &Pot) -> Self {
        Self {
            game_id: pot.key.game_id.clone(),
            pot_number: pot.key.pot_number,
            address: pot.address.to_string(),
            status: pot.status.as_str(),
            total_amount: pot.total_amount,
            balance_sol: to_sol(pot.total_amount),
            created_at: pot.created_at,
            closed_at: pot.closed_at,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PotStatusResponse {
    pub game_id: String,
    pub pot_number: u64,
    pub address: String,
    pub phase: &'static str,
    pub total_amount: u64,
    /// Live ledger balance; absent when the ledger did not answer.
    pub ledger_balance: Option<u64>,
    pub balance_sol: Option<f64>,
}

impl From<&PotSnapshot> for PotStatusResponse {
    fn from(snap: &PotSnapshot) -> Self {
        let ledger_balance = snap.ledger.as_ref().map(|v| v.balance);
        Self {
            game_id: snap.pot.key.game_id.clone(),
            pot_number: snap.pot.key.pot_number,
            address: snap.pot.address.to_string(),
            phase: phase_str(snap.phase),
            total_amount: snap.pot.total_amount,
            ledger_balance,
            balance_sol: ledger_balance.map(to_sol),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryResponse {
    pub entry_ref: String,
    pub player: String,
    pub game_id: String,
    pub pot_number: u64,
    pub amount: u64,
    pub score: u64,
    pub played: bool,
}

impl From<&Entry> for EntryResponse {
    fn from(e: &Entry) -> Self {
        Self {
            entry_ref: e.payment_ref.clone(),
            player: e.player.to_string(),
            game_id: e.pot.game_id.clone(),
            pot_number: e.pot.pot_number,
            amount: e.amount,
            score: e.score,
            played: e.played,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutResponse {
    pub rank: u8,
    pub player: String,
    pub amount: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionResponse {
    pub game_id: String,
    pub pot_number: u64,
    pub transaction: String,
    pub payouts: Vec<PayoutResponse>,
}

impl From<&DistributionRecord> for DistributionResponse {
    fn from(d: &DistributionRecord) -> Self {
        Self {
            game_id: d.pot.game_id.clone(),
            pot_number: d.pot.pot_number,
            transaction: d
                .payouts
                .first()
                .map(|p| p.payout_ref.clone())
                .unwrap_or_default(),
            payouts: d
                .payouts
                .iter()
                .map(|p| PayoutResponse {
                    rank: p.rank,
                    player: p.player.to_string(),
                    amount: p.amount,
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRow {
    pub rank: usize,
    pub player: String,
    pub score: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    pub game_id: String,
    pub pot_number: u64,
    pub rows: Vec<LeaderboardRow>,
}

// -----------------
// Errors
// -----------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: u16,
    pub code: Option<u32>,
    pub name: String,
    pub message: String,
}

fn http_status(err: &Error) -> u16 {
    let any = |codes: &[PotError]| codes.iter().any(|c| is_pot_error(err, *c));

    if any(&[PotError::AlreadyExists, PotError::ActivePotConflict, PotError::DuplicatePayment]) {
        409
    } else if any(&[PotError::PotNotFound, PotError::EntryNotFound, PotError::PaymentNotFound, PotError::LedgerAccountMissing]) {
        404
    } else if any(&[PotError::LedgerUnavailable, PotError::StoreUnavailable]) {
        503
    } else if any(&[PotError::MathOverflow, PotError::InvalidConfig]) {
        500
    } else if any(&[PotError::PotNotActive, PotError::PotNotEnded, PotError::AlreadyScored, PotError::AlreadyDistributed]) {
        409
    } else if any(&[
        PotError::PaymentFailed,
        PotError::PaymentProgramMismatch,
        PotError::PaymentPayerMismatch,
        PotError::PaymentPotMismatch,
        PotError::InsufficientEntryFee,
    ]) {
        402
    } else if matches!(err, Error::AnchorError(_)) {
        400
    } else {
        500
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = http_status(&err);
        match err {
            Error::AnchorError(e) => Self {
                status,
                code: Some(e.error_code_number),
                name: e.error_name,
                message: e.error_msg,
            },
            Error::ProgramError(e) => Self {
                status,
                code: None,
                name: "ProgramError".to_string(),
                message: e.program_error.to_string(),
            },
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

// -----------------
// Handlers
// -----------------

/// One method per route; binding them to a server is left to the embedder.
pub struct PotService<L, S> {
    coordinator: Arc<PotCoordinator<L, S>>,
    recorder: EntryRecorder<L, S>,
}

impl<L: LedgerClient, S: PotStore> PotService<L, S> {
    pub fn new(coordinator: Arc<PotCoordinator<L, S>>) -> Self {
        let recorder = EntryRecorder::new(Arc::clone(&coordinator));
        Self {
            coordinator,
            recorder,
        }
    }

    pub async fn initialize_pot(&self, req: InitializePotRequest) -> ApiResult<PotResponse> {
        let key = req.validate()?;
        let pot = self
            .coordinator
            .create_pot(&key.game_id, key.pot_number)
            .await?;
        Ok(PotResponse::from(&pot))
    }

    pub async fn close_pot(&self, req: ClosePotRequest) -> ApiResult<PotResponse> {
        let key = req.validate()?;
        let pot = self.coordinator.close_pot(&key).await?;
        Ok(PotResponse::from(&pot))
    }

    pub async fn distribute_winners(
        &self,
        req: DistributeWinnersRequest,
    ) -> ApiResult<DistributionResponse> {
        let (key, winners) = req.validate()?;
        let record = self.coordinator.distribute_winners(&key, &winners).await?;
        Ok(DistributionResponse::from(&record))
    }

    pub async fn pay_entry_fee(&self, req: PayEntryFeeRequest) -> ApiResult<EntryResponse> {
        let (key, player) = req.validate()?;
        let entry = self
            .recorder
            .pay_entry_fee(&key.game_id, key.pot_number, player, &req.signature)
            .await?;
        Ok(EntryResponse::from(&entry))
    }

    pub async fn update_score(&self, req: UpdateScoreRequest) -> ApiResult<EntryResponse> {
        req.validate()?;
        let entry = self.recorder.submit_score(&req.entry_ref, req.score).await?;
        Ok(EntryResponse::from(&entry))
    }

    pub async fn latest_pot(&self, game_id: &str) -> ApiResult<PotResponse> {
        let pot = self
            .coordinator
            .latest_pot(game_id)
            .await?
            .ok_or_else(|| error!(PotError::PotNotFound))?;
        Ok(PotResponse::from(&pot))
    }

    pub async fn pots(&self, game_id: &str) -> ApiResult<Vec<PotResponse>> {
        let pots = self.coordinator.pots_for_game(game_id).await?;
        Ok(pots.iter().map(PotResponse::from).collect())
    }

    pub async fn pot_status(&self, game_id: &str, pot_number: u64) -> ApiResult<PotStatusResponse> {
        let key = validate_pot_ref(game_id, pot_number)?;
        let snap = self.coordinator.pot_status(&key).await?;
        Ok(PotStatusResponse::from(&snap))
    }

    pub async fn leaderboard(&self, game_id: &str, pot_number: u64) -> ApiResult<LeaderboardResponse> {
        let key = validate_pot_ref(game_id, pot_number)?;
        let ranked = self.coordinator.leaderboard(&key).await?;
        Ok(LeaderboardResponse {
            game_id: key.game_id,
            pot_number: key.pot_number,
            rows: ranked
                .iter()
                .enumerate()
                .map(|(i, e)| LeaderboardRow {
                    rank: i + 1,
                    player: e.player.to_string(),
                    score: e.score,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::coordinator::test_support::*;
    use crate::mock::MockLedger;
    use crate::store::MemoryStore;

    fn service() -> PotService<MockLedger, MemoryStore> {
        PotService::new(coordinator(config_with_winners(&[7_000, 3_000])))
    }

    #[test]
    fn requests_use_camel_case_and_validate() {
        let req: InitializePotRequest =
            serde_json::from_value(json!({ "gameId": "flappy_bird", "potNumber": 3 })).unwrap();
        assert_eq!(req.validate().unwrap(), PotKey::new("flappy_bird", 3));

        let bad: InitializePotRequest =
            serde_json::from_value(json!({ "gameId": "", "potNumber": 3 })).unwrap();
        assert!(is_pot_error(&bad.validate().unwrap_err(), PotError::InvalidRequest));

        let wallet = Pubkey::new_unique().to_string();
        let pay: PayEntryFeeRequest = serde_json::from_value(json!({
            "gameId": "flappy_bird",
            "potNumber": 1,
            "wallet": wallet,
            "signature": "abc",
        }))
        .unwrap();
        assert_eq!(pay.validate().unwrap().1.to_string(), wallet);

        let garbled = PayEntryFeeRequest {
            wallet: "not-a-key".to_string(),
            ..pay
        };
        assert!(is_pot_error(&garbled.validate().unwrap_err(), PotError::InvalidRequest));
    }

    #[test]
    fn errors_map_to_http_statuses() {
        let cases = [
            (PotError::AlreadyExists, 409),
            (PotError::ActivePotConflict, 409),
            (PotError::PotNotFound, 404),
            (PotError::EntryNotFound, 404),
            (PotError::LedgerUnavailable, 503),
            (PotError::StoreUnavailable, 503),
            (PotError::InsufficientEntryFee, 402),
            (PotError::WinnerMismatch, 400),
            (PotError::InvalidRequest, 400),
        ];
        for (code, status) in cases {
            let api = ApiError::from(error!(code));
            assert_eq!(api.status, status, "{}", api.name);
        }

        let api = ApiError::from(error!(PotError::AlreadyExists));
        let body = serde_json::to_value(&api).unwrap();
        assert_eq!(body["code"], 6000);
        assert_eq!(body["name"], "AlreadyExists");
        assert!(body.get("status").is_none());
    }

    #[tokio::test]
    async fn handlers_drive_a_full_round() {
        let svc = service();
        let c = Arc::clone(&svc.coordinator);

        let pot = svc
            .initialize_pot(InitializePotRequest { game_id: "flappy_bird".into(), pot_number: 1 })
            .await
            .unwrap();
        assert_eq!(pot.status, "active");

        let dup = svc
            .initialize_pot(InitializePotRequest { game_id: "flappy_bird".into(), pot_number: 1 })
            .await
            .unwrap_err();
        assert_eq!(dup.status, 409);

        let key = PotKey::new("flappy_bird", 1);
        let fee = c.config().entry_fee_lamports;
        let mut players = Vec::new();
        for score in [5, 9] {
            let player = Pubkey::new_unique();
            let sig = c.ledger.pay_entry_fee(c.pot_address(&key), player, fee).await.unwrap();
            let entry = svc
                .pay_entry_fee(PayEntryFeeRequest {
                    game_id: "flappy_bird".into(),
                    pot_number: 1,
                    wallet: player.to_string(),
                    signature: sig.clone(),
                })
                .await
                .unwrap();
            assert!(!entry.played);
            svc.update_score(UpdateScoreRequest { entry_ref: sig, score })
                .await
                .unwrap();
            players.push(player);
        }

        let board = svc.leaderboard("flappy_bird", 1).await.unwrap();
        assert_eq!(board.rows[0].player, players[1].to_string());
        assert_eq!(board.rows[0].rank, 1);

        svc.close_pot(ClosePotRequest { game_id: "flappy_bird".into(), pot_number: 1 })
            .await
            .unwrap();
        let dist = svc
            .distribute_winners(DistributeWinnersRequest {
                game_id: "flappy_bird".into(),
                pot_number: 1,
                winners: vec![players[1].to_string(), players[0].to_string()],
            })
            .await
            .unwrap();
        let amounts: Vec<u64> = dist.payouts.iter().map(|p| p.amount).collect();
        assert_eq!(amounts, vec![fee * 2 * 7 / 10, fee * 2 * 3 / 10]);
        assert!(!dist.transaction.is_empty());

        let status = svc.pot_status("flappy_bird", 1).await.unwrap();
        assert_eq!(status.phase, "distributed");
        assert_eq!(status.ledger_balance, Some(0));

        let latest = svc.latest_pot("flappy_bird").await.unwrap();
        assert_eq!(latest.pot_number, 1);
        assert_eq!(svc.pots("flappy_bird").await.unwrap().len(), 1);

        let none = svc.latest_pot("pacman").await.unwrap_err();
        assert_eq!(none.status, 404);
    }
}
