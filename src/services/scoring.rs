//! Ranking-point arithmetic for raid attempts.
//!
//! An attempt scores `time_score + hp_percent_score + default_clear_score`.
//! The time score rewards finishing under an hour and is scaled by
//! difficulty. It is deliberately unclamped: attempts longer than the
//! reference hour contribute a negative time score.

use serde::{Deserialize, Serialize};

use crate::services::account::RaidProgress;
use crate::services::catalog::StageDefinition;
use crate::state::Difficulty;

/// Reference clear time in seconds; the time score is zero here.
pub const REFERENCE_CLEAR_SECS: f32 = 3600.0;

/// Longest attempt accepted from a client, in seconds.
pub const MAX_ELAPSED_SECS: f64 = 86_400.0;

/// Points per second saved, indexed by difficulty tier.
pub const TIME_SCORE_MULTIPLIERS: [i64; 7] = [120, 240, 480, 960, 1440, 1920, 2400];

/// Time score for an attempt, truncated toward zero.
///
/// Computed in single precision so fractional durations truncate the same
/// way game clients report them.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn time_score(elapsed_secs: f64, difficulty: Difficulty) -> i64 {
    let multiplier = TIME_SCORE_MULTIPLIERS[difficulty.tier()] as f32;
    ((REFERENCE_CLEAR_SECS - elapsed_secs as f32) * multiplier) as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub time_score: i64,
    pub hp_percent_score: i64,
    pub default_clear_score: i64,
    pub ranking_point: i64,
}

impl ScoreBreakdown {
    #[must_use]
    pub fn compute(elapsed_secs: f64, difficulty: Difficulty, stage: &StageDefinition) -> Self {
        let time_score = time_score(elapsed_secs, difficulty);
        Self {
            time_score,
            hp_percent_score: stage.hp_percent_score,
            default_clear_score: stage.default_clear_score,
            ranking_point: time_score
                .saturating_add(stage.hp_percent_score)
                .saturating_add(stage.default_clear_score),
        }
    }
}

/// Fold one attempt into the account's running scores.
pub fn record_attempt(progress: &mut RaidProgress, ranking_point: i64) {
    progress.best_ranking_point = progress.best_ranking_point.max(ranking_point);
    progress.total_ranking_point = progress.total_ranking_point.saturating_add(ranking_point);
}

#[cfg(test)]
#[path = "scoring_test.rs"]
mod tests;
