//! Match Rewards
//!
//! Currency credited at match end. Each credit carries an idempotency key
//! derived from (room, player); ledgers must treat a repeated key as already
//! applied.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::RewardConfig;
use crate::core::hash::reward_key;
use crate::game::scoring::MatchOutcome;
use crate::game::state::{PlayerId, RoomId};

/// Ledger errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// Ledger unreachable or refused the call.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Why a player is credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardReason {
    /// Sole winner.
    Win,
    /// Shared the top total.
    Tie,
    /// Took part.
    Participation,
}

/// A single credit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardCredit {
    /// Idempotency key.
    pub key: String,
    /// Room the match was played in.
    pub room_id: RoomId,
    /// Player credited.
    pub player_id: PlayerId,
    /// Currency amount.
    pub amount: u64,
    /// Reason.
    pub reason: RewardReason,
}

/// External currency ledger.
#[async_trait]
pub trait RewardLedger: Send + Sync {
    /// Apply a credit. Returns `false` if the key was already applied.
    async fn credit(&self, credit: &RewardCredit) -> Result<bool, LedgerError>;
}

/// Credits for every player with a final total.
pub fn plan_rewards(
    room_id: RoomId,
    totals: &BTreeMap<PlayerId, u32>,
    outcome: &MatchOutcome,
    config: &RewardConfig,
) -> Vec<RewardCredit> {
    totals
        .keys()
        .map(|player_id| {
            let (reason, amount) = match outcome {
                MatchOutcome::Winner { player_id: w, .. } if w == player_id => {
                    (RewardReason::Win, config.win)
                }
                MatchOutcome::Tie { players, .. } if players.contains(player_id) => {
                    (RewardReason::Tie, config.tie)
                }
                _ => (RewardReason::Participation, config.participation),
            };
            RewardCredit {
                key: reward_key(room_id.as_bytes(), player_id.as_bytes()),
                room_id,
                player_id: *player_id,
                amount,
                reason,
            }
        })
        .collect()
}

/// Ledger kept in memory, keyed by idempotency key.
#[derive(Default)]
pub struct MemoryLedger {
    applied: Mutex<BTreeMap<String, RewardCredit>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance of a player.
    pub async fn balance(&self, player_id: PlayerId) -> u64 {
        self.applied
            .lock()
            .await
            .values()
            .filter(|c| c.player_id == player_id)
            .map(|c| c.amount)
            .sum()
    }

    /// Number of credits applied.
    pub async fn credit_count(&self) -> usize {
        self.applied.lock().await.len()
    }
}

#[async_trait]
impl RewardLedger for MemoryLedger {
    async fn credit(&self, credit: &RewardCredit) -> Result<bool, LedgerError> {
        let mut applied = self.applied.lock().await;
        if applied.contains_key(&credit.key) {
            return Ok(false);
        }
        applied.insert(credit.key.clone(), credit.clone());
        Ok(true)
    }
}
