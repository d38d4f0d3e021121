//! Engine Configuration
//!
//! Timings, round shape and reward amounts. Every field has a default and
//! can be overridden from the environment (`STOP_*` variables).

use std::time::Duration;

/// Credits issued at match end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardConfig {
    /// Credit for the sole winner.
    pub win: u64,
    /// Credit for each player sharing the top score.
    pub tie: u64,
    /// Credit for everyone else who took part.
    pub participation: u64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            win: 50,
            tie: 30,
            participation: 10,
        }
    }
}

/// Configuration for the match engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rounds per match.
    pub round_count: usize,
    /// Categories per round.
    pub categories_per_round: usize,
    /// Minimum members needed to start.
    pub min_players: usize,
    /// Answer window of each round.
    pub round_duration: Duration,
    /// Countdown tick period.
    pub tick_interval: Duration,
    /// Wait between "stopping" and scoring, for in-flight submissions.
    pub grace_period: Duration,
    /// Pause between a round's result and the next round.
    pub inter_round_delay: Duration,
    /// How long a caller that lost the scoring lock waits for the winner to
    /// commit before reading back points.
    pub scoring_wait: Duration,
    /// Poll period while waiting on another scoring pass.
    pub scoring_poll: Duration,
    /// Failed scoring passes of a round that are retried automatically
    /// after a grace-length countdown. Later retries wait for a stop.
    pub scoring_retries: u32,
    /// Display length of the blur effect, in seconds.
    pub blur_secs: u32,
    /// Match-end credits.
    pub rewards: RewardConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            round_count: 5,
            categories_per_round: 4,
            min_players: 2,
            round_duration: Duration::from_secs(20),
            tick_interval: Duration::from_secs(1),
            grace_period: Duration::from_secs(3),
            inter_round_delay: Duration::from_secs(10),
            scoring_wait: Duration::from_secs(5),
            scoring_poll: Duration::from_millis(50),
            scoring_retries: 3,
            blur_secs: 5,
            rewards: RewardConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            round_count: env_parse("STOP_ROUND_COUNT").unwrap_or(defaults.round_count),
            categories_per_round: env_parse("STOP_CATEGORIES_PER_ROUND")
                .unwrap_or(defaults.categories_per_round),
            min_players: env_parse("STOP_MIN_PLAYERS").unwrap_or(defaults.min_players),
            round_duration: env_secs("STOP_ROUND_SECS").unwrap_or(defaults.round_duration),
            tick_interval: defaults.tick_interval,
            grace_period: env_secs("STOP_GRACE_SECS").unwrap_or(defaults.grace_period),
            inter_round_delay: env_secs("STOP_INTER_ROUND_SECS")
                .unwrap_or(defaults.inter_round_delay),
            scoring_wait: env_secs("STOP_SCORING_WAIT_SECS").unwrap_or(defaults.scoring_wait),
            scoring_poll: defaults.scoring_poll,
            scoring_retries: env_parse("STOP_SCORING_RETRIES").unwrap_or(defaults.scoring_retries),
            blur_secs: env_parse("STOP_BLUR_SECS").unwrap_or(defaults.blur_secs),
            rewards: RewardConfig {
                win: env_parse("STOP_REWARD_WIN").unwrap_or(defaults.rewards.win),
                tie: env_parse("STOP_REWARD_TIE").unwrap_or(defaults.rewards.tie),
                participation: env_parse("STOP_REWARD_PARTICIPATION")
                    .unwrap_or(defaults.rewards.participation),
            },
        }
    }

    /// Round duration in whole seconds, as announced to clients.
    pub fn round_duration_secs(&self) -> u32 {
        self.round_duration.as_secs() as u32
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
