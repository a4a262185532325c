//! Raid controller: lobby, raid/battle creation, entry, attempts, give-up.
//!
//! DESIGN
//! ======
//! One raid exists per server and every account plays against it. Each
//! public operation resolves catalog rows first, then locks `AppState::raid`
//! exactly once, runs a synchronous transition on the `RaidState` triple,
//! and releases the lock before writing the account's raid progress.
//!
//! LIFECYCLE
//! =========
//! 1. `raid:create_battle` opens the raid and its battle (or re-targets the
//!    live one without resetting boss HP)
//! 2. `raid:enter_battle` binds the caller's raid echelon to the raid
//! 3. `raid:end_battle` scores the attempt and applies damage; a defeated
//!    boss tears the raid down
//! 4. `raid:give_up` tears the raid down without scoring
//!
//! ERROR HANDLING
//! ==============
//! Catalog misses, unconfigured echelons, and summaries carrying negative
//! damage or an impossible duration are ordinary request errors.
//! Ending an attempt without a live battle or without battle membership is
//! a sequencing bug upstream; it is logged at error level and rejected
//! before anything is scored or mutated.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, error, info};

use crate::frame::ErrorCode;
use crate::services::account::{Account, AccountError, EchelonType, RaidProgress};
use crate::services::catalog::{BossStatDefinition, CatalogError, SeasonDefinition, StageDefinition};
use crate::services::scoring::{self, ScoreBreakdown};
use crate::state::{
    AppState, BattleSession, Difficulty, LobbySnapshot, MemberRecord, RaidBoss, RaidOwner, RaidSession, RaidState,
    RaidStatus, SeasonType,
};

/// Raids are hosted on a single logical game server.
const RAID_SERVER_ID: i64 = 1;
/// Public raids carry no join code.
const OPEN_SECRET_CODE: &str = "0";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RaidError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error("no raid echelon configured at slot {0}")]
    EchelonNotFound(i64),
    #[error("no raid is in progress")]
    NoActiveRaid,
    #[error("battle summary carries no boss result")]
    MissingBossResult,
    #[error("invalid battle summary: {0}")]
    InvalidSummary(String),
    #[error("raid invariant violated: no battle is in progress")]
    NoActiveBattle,
    #[error("raid invariant violated: account {0} is not a battle member")]
    NotBattleMember(i64),
}

impl ErrorCode for RaidError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Catalog(e) => e.error_code(),
            Self::Account(e) => e.error_code(),
            Self::EchelonNotFound(_) => "E_ECHELON_NOT_FOUND",
            Self::NoActiveRaid => "E_NO_ACTIVE_RAID",
            Self::MissingBossResult => "E_MISSING_BOSS_RESULT",
            Self::InvalidSummary(_) => "E_INVALID_SUMMARY",
            Self::NoActiveBattle | Self::NotBattleMember(_) => "E_RAID_INVARIANT",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Account(e) => e.retryable(),
            _ => false,
        }
    }
}

/// Assist (borrowed) unit slot. Assists are not offered yet, so this is
/// always empty on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistCharacter {}

/// Raid and battle as returned from create and enter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaidBattleView {
    pub raid: RaidSession,
    pub battle: BattleSession,
    pub assist_character: AssistCharacter,
}

/// Outcome of one boss in a finished attempt, as reported by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BossResult {
    pub given_damage: i64,
    #[serde(default)]
    pub given_groggy: i64,
    #[serde(default)]
    pub ai_phase: i64,
    #[serde(default)]
    pub sub_parts_hp: Vec<i64>,
}

/// End-of-attempt payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleSummary {
    /// Wall-clock duration of the attempt in seconds.
    pub elapsed_realtime: f64,
    pub boss_results: Vec<BossResult>,
}

/// Score breakdown reported when an attempt defeats the boss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClearResult {
    pub ranking_point: i64,
    pub best_ranking_point: i64,
    pub time_score: i64,
    pub hp_percent_score: i64,
    pub default_clear_score: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Boss still standing; the raid stays open.
    Ongoing,
    /// Boss defeated; the raid has been torn down.
    Cleared(ClearResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GiveUpResult {
    pub tier: i32,
    pub ranking: i64,
    pub ranking_point: i64,
    pub best_ranking_point: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpponentSummary {
    pub account_id: i64,
    pub nickname: String,
    pub ranking: i64,
    pub best_ranking_point: i64,
}

// =============================================================================
// LOBBY
// =============================================================================

/// Resolve the lobby for an account's season.
///
/// # Errors
///
/// Returns `SeasonNotFound` if the account's season is not in the catalog.
pub async fn get_lobby(state: &AppState, progress: &RaidProgress) -> Result<LobbySnapshot, RaidError> {
    let season = state.catalog.season(progress.season_id)?;
    let mut raid_state = state.raid.lock().await;
    Ok(resolve_lobby(&mut raid_state, progress, season))
}

/// Rebuild the cached lobby on a season change, otherwise refresh its
/// scores and active-raid reference in place.
pub fn resolve_lobby(raid_state: &mut RaidState, progress: &RaidProgress, season: &SeasonDefinition) -> LobbySnapshot {
    let active_raid = raid_state.raid.clone();

    if let Some(lobby) = raid_state
        .lobby
        .as_mut()
        .filter(|lobby| lobby.season_id == progress.season_id)
    {
        lobby.best_ranking_point = progress.best_ranking_point;
        lobby.total_ranking_point = progress.total_ranking_point;
        lobby.active_raid = active_raid;
        return lobby.clone();
    }

    let playable_difficulty_by_boss_group = season
        .open_raid_boss_groups
        .first()
        .map(|group| (group.clone(), Difficulty::HIGHEST))
        .into_iter()
        .collect();

    let lobby = LobbySnapshot {
        season_id: progress.season_id,
        season_type: SeasonType::Open,
        tier: 0,
        ranking: 1,
        best_ranking_point: progress.best_ranking_point,
        total_ranking_point: progress.total_ranking_point,
        claimed_reward_ids: BTreeSet::new(),
        playable_difficulty_by_boss_group,
        active_raid,
    };
    info!(season_id = lobby.season_id, "raid lobby rebuilt for season");
    raid_state.lobby = Some(lobby.clone());
    lobby
}

// =============================================================================
// CREATE
// =============================================================================

/// Select a stage and open (or re-target) the raid and its battle.
///
/// The chosen stage and difficulty are written to the account's progress
/// before the raid is touched.
///
/// # Errors
///
/// Returns a catalog error if the stage or its boss stats are missing, or an
/// account error if the progress write fails.
pub async fn create_raid_and_battle(
    state: &AppState,
    account: &mut Account,
    stage_id: i64,
    difficulty: Difficulty,
    is_practice: bool,
) -> Result<RaidBattleView, RaidError> {
    let (_, boss) = state.catalog.stage_with_boss(stage_id)?;

    account.raid.active_raid_unique_id = stage_id;
    account.raid.difficulty = difficulty;
    state
        .accounts
        .save_raid_progress(account.account_id, &account.raid)
        .await?;

    let now = OffsetDateTime::now_utc().unix_timestamp();
    let mut raid_state = state.raid.lock().await;
    Ok(open_raid(&mut raid_state, account, boss, is_practice, now, state.raid_session_ttl_secs))
}

/// Create the raid and battle if absent. A live raid keeps its owner, timer,
/// and boss HP; only its stage, difficulty, and practice flag follow the
/// caller's selection.
pub fn open_raid(
    raid_state: &mut RaidState,
    account: &Account,
    boss: &BossStatDefinition,
    is_practice: bool,
    now: i64,
    ttl_secs: i64,
) -> RaidBattleView {
    let progress = &account.raid;

    let raid = match raid_state.raid.take() {
        Some(mut raid) => {
            raid.difficulty = progress.difficulty;
            raid.stage_id = progress.active_raid_unique_id;
            raid.is_practice = is_practice;
            info!(
                account_id = account.account_id,
                stage_id = raid.stage_id,
                difficulty = ?raid.difficulty,
                boss_hp = raid.bosses.first().map_or(0, |b| b.current_hp),
                "raid re-targeted; boss progress kept"
            );
            raid
        }
        None => {
            let raid = RaidSession {
                owner: RaidOwner { account_id: account.account_id, account_name: account.nickname.clone() },
                server_id: RAID_SERVER_ID,
                secret_code: OPEN_SECRET_CODE.to_string(),
                stage_id: progress.active_raid_unique_id,
                season_id: progress.season_id,
                started_at: now,
                ends_at: now + ttl_secs,
                player_count: 1,
                status: RaidStatus::Playing,
                is_practice,
                bosses: vec![RaidBoss { current_hp: boss.max_hp, groggy_point: boss.groggy_gauge }],
                owner_level_at_creation: account.level,
                difficulty: progress.difficulty,
                participants: BTreeMap::new(),
            };
            info!(
                account_id = account.account_id,
                stage_id = raid.stage_id,
                difficulty = ?raid.difficulty,
                boss_hp = boss.max_hp,
                is_practice,
                "raid created"
            );
            raid
        }
    };

    let battle = match raid_state.battle.take() {
        Some(mut battle) => {
            battle.stage_id = progress.active_raid_unique_id;
            battle
        }
        None => {
            let lead = raid.bosses.first().copied().unwrap_or(RaidBoss {
                current_hp: boss.max_hp,
                groggy_point: boss.groggy_gauge,
            });
            let mut members = BTreeMap::new();
            members.insert(account.account_id, MemberRecord::new(account.account_id, account.nickname.clone()));
            BattleSession {
                stage_id: progress.active_raid_unique_id,
                current_boss_hp: lead.current_hp,
                current_boss_groggy: lead.groggy_point,
                current_boss_ai_phase: 0,
                sub_parts_hp: Vec::new(),
                members,
            }
        }
    };

    raid_state.raid = Some(raid.clone());
    raid_state.battle = Some(battle.clone());
    RaidBattleView { raid, battle, assist_character: AssistCharacter::default() }
}

// =============================================================================
// ENTER
// =============================================================================

/// Commit the account's raid echelon to the live raid.
///
/// # Errors
///
/// Returns `EchelonNotFound` if the account has no raid echelon at that slot,
/// or `NoActiveRaid` if no raid is open.
pub async fn enter_battle(state: &AppState, account: &Account, echelon_number: i64) -> Result<RaidBattleView, RaidError> {
    let echelon = account
        .echelon(EchelonType::Raid, echelon_number)
        .ok_or(RaidError::EchelonNotFound(echelon_number))?;

    let mut raid_state = state.raid.lock().await;
    bind_participant(&mut raid_state, account.account_id, echelon.unit_ids())
}

/// Record the caller's units on the raid, overwriting any earlier entry.
/// The battle is left untouched.
///
/// # Errors
///
/// Returns `NoActiveRaid` if the raid or battle is absent.
pub fn bind_participant(
    raid_state: &mut RaidState,
    account_id: i64,
    unit_ids: Vec<i64>,
) -> Result<RaidBattleView, RaidError> {
    let (Some(raid), Some(battle)) = (raid_state.raid.as_mut(), raid_state.battle.as_ref()) else {
        return Err(RaidError::NoActiveRaid);
    };

    info!(account_id, units = unit_ids.len(), stage_id = raid.stage_id, "raid battle entered");
    raid.participants.insert(account_id, unit_ids);

    Ok(RaidBattleView { raid: raid.clone(), battle: battle.clone(), assist_character: AssistCharacter::default() })
}

// =============================================================================
// END ATTEMPT
// =============================================================================

/// Score an attempt, persist the score, then apply its damage and tear the
/// raid down if the boss falls. Scores accumulate on every attempt, cleared
/// or not.
///
/// The score is saved before the battle is touched, so a failed save leaves
/// the boss as it was and the same summary can be sent again.
///
/// # Errors
///
/// Returns `InvalidSummary` or `MissingBossResult` for a malformed summary,
/// `StageNotFound` if the account's active stage is unknown, an invariant
/// error if the caller has no battle to end, or an account error if the
/// progress write fails.
pub async fn end_attempt(
    state: &AppState,
    account: &mut Account,
    summary: &BattleSummary,
) -> Result<AttemptOutcome, RaidError> {
    let boss_result = validate_summary(summary)?;
    let stage = state.catalog.stage(account.raid.active_raid_unique_id)?;

    let mut progress = account.raid.clone();
    let score = {
        let raid_state = state.raid.lock().await;
        score_attempt(&raid_state, account.account_id, &mut progress, stage, summary.elapsed_realtime)?
    };

    state
        .accounts
        .save_raid_progress(account.account_id, &progress)
        .await?;
    account.raid = progress;

    let mut raid_state = state.raid.lock().await;
    apply_damage(&mut raid_state, account, stage, &score, boss_result)
}

/// Reject summaries whose numbers cannot come from a real attempt.
///
/// # Errors
///
/// Returns `MissingBossResult` for an empty result list and `InvalidSummary`
/// for a negative, non-finite, or implausibly long duration or for negative
/// damage or groggy.
pub fn validate_summary(summary: &BattleSummary) -> Result<&BossResult, RaidError> {
    let elapsed = summary.elapsed_realtime;
    if !elapsed.is_finite() || !(0.0..=scoring::MAX_ELAPSED_SECS).contains(&elapsed) {
        return Err(RaidError::InvalidSummary(format!("elapsed_realtime out of range: {elapsed}")));
    }

    let boss_result = summary
        .boss_results
        .first()
        .ok_or(RaidError::MissingBossResult)?;
    if boss_result.given_damage < 0 || boss_result.given_groggy < 0 {
        return Err(RaidError::InvalidSummary(format!(
            "negative damage: given_damage={} given_groggy={}",
            boss_result.given_damage, boss_result.given_groggy
        )));
    }
    Ok(boss_result)
}

/// Confirm the caller can end an attempt: a battle is live and the caller
/// is one of its members.
fn ensure_member(raid_state: &RaidState, account_id: i64) -> Result<(), RaidError> {
    let Some(battle) = raid_state.battle.as_ref() else {
        error!(account_id, "raid attempt ended with no battle in progress");
        return Err(RaidError::NoActiveBattle);
    };
    if !battle.members.contains_key(&account_id) {
        error!(account_id, "raid attempt ended by an account that is not a battle member");
        return Err(RaidError::NotBattleMember(account_id));
    }
    Ok(())
}

/// Score an attempt and fold it into `progress`. The raid is only read.
///
/// # Errors
///
/// Returns `NoActiveBattle` or `NotBattleMember`; `progress` is untouched then.
pub fn score_attempt(
    raid_state: &RaidState,
    account_id: i64,
    progress: &mut RaidProgress,
    stage: &StageDefinition,
    elapsed_secs: f64,
) -> Result<ScoreBreakdown, RaidError> {
    ensure_member(raid_state, account_id)?;

    let score = ScoreBreakdown::compute(elapsed_secs, progress.difficulty, stage);
    scoring::record_attempt(progress, score.ranking_point);
    info!(
        account_id,
        ranking_point = score.ranking_point,
        best_ranking_point = progress.best_ranking_point,
        "raid attempt scored"
    );
    Ok(score)
}

/// Apply a scored attempt's damage to the battle, mirror it onto the raid
/// boss, and tear the raid down on defeat.
///
/// # Errors
///
/// Returns `NoActiveBattle` or `NotBattleMember` if the battle ended or was
/// replaced after scoring; nothing is mutated then.
pub fn apply_damage(
    raid_state: &mut RaidState,
    account: &Account,
    stage: &StageDefinition,
    score: &ScoreBreakdown,
    boss_result: &BossResult,
) -> Result<AttemptOutcome, RaidError> {
    let account_id = account.account_id;
    ensure_member(raid_state, account_id)?;
    let Some(battle) = raid_state.battle.as_mut() else {
        return Err(RaidError::NoActiveBattle);
    };

    battle.current_boss_hp = battle.current_boss_hp.saturating_sub(boss_result.given_damage);
    battle.current_boss_groggy = battle
        .current_boss_groggy
        .saturating_sub(boss_result.given_groggy);
    battle.current_boss_ai_phase = boss_result.ai_phase;
    battle.sub_parts_hp.clone_from(&boss_result.sub_parts_hp);

    if let Some(lead) = raid_state
        .raid
        .as_mut()
        .and_then(|raid| raid.bosses.first_mut())
    {
        lead.current_hp = battle.current_boss_hp;
        lead.groggy_point = battle.current_boss_groggy;
    }

    if let Some(member) = battle.members.get_mut(&account_id) {
        let entry = member.record_damage(boss_result.given_damage, boss_result.given_groggy);
        debug!(account_id, index = entry.index, damage = entry.given_damage, "raid damage recorded");
    }

    if !battle.is_boss_defeated() {
        return Ok(AttemptOutcome::Ongoing);
    }

    info!(account_id, stage_id = stage.stage_id, "raid boss defeated");
    finish_raid(raid_state, &account.raid);

    Ok(AttemptOutcome::Cleared(ClearResult {
        ranking_point: score.ranking_point,
        best_ranking_point: account.raid.best_ranking_point,
        time_score: score.time_score,
        hp_percent_score: score.hp_percent_score,
        default_clear_score: score.default_clear_score,
    }))
}

// =============================================================================
// TEARDOWN
// =============================================================================

/// Abandon the live raid without scoring.
pub async fn give_up(state: &AppState, progress: &RaidProgress) -> GiveUpResult {
    let mut raid_state = state.raid.lock().await;
    if !raid_state.is_active() {
        info!("raid give-up with no raid in progress");
    }
    finish_raid(&mut raid_state, progress);
    GiveUpResult { tier: 0, ranking: 0, ranking_point: 0, best_ranking_point: progress.best_ranking_point }
}

/// Copy the account's scores onto the lobby, clear its raid reference, and
/// drop both raid and battle. Safe to call with no raid open.
pub fn finish_raid(raid_state: &mut RaidState, progress: &RaidProgress) {
    if let Some(lobby) = raid_state.lobby.as_mut() {
        lobby.best_ranking_point = progress.best_ranking_point;
        lobby.total_ranking_point = progress.total_ranking_point;
        lobby.active_raid = None;
    }

    raid_state.battle = None;
    if let Some(mut raid) = raid_state.raid.take() {
        raid.status = RaidStatus::Finished;
        info!(stage_id = raid.stage_id, owner = raid.owner.account_id, status = ?raid.status, "raid torn down");
    }
}

// =============================================================================
// OPPONENTS
// =============================================================================

/// Ranked opponents are not tracked yet.
#[must_use]
pub fn list_opponents() -> Vec<OpponentSummary> {
    Vec::new()
}

#[cfg(test)]
#[path = "raid_test.rs"]
mod tests;
