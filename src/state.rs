//! Shared application state and the live raid records.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the account store, the static catalog, and the raid triple
//! (lobby snapshot, raid session, battle session). The raid is global, not
//! per account: every connected account plays against the same boss, so the
//! triple lives behind one mutex and each raid operation holds it for the
//! whole read-modify-write.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::services::account::AccountStore;
use crate::services::catalog::Catalog;

// =============================================================================
// DIFFICULTY
// =============================================================================

/// Raid difficulty tier, ordered from easiest (tier 0) to hardest (tier 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Difficulty {
    #[default]
    Normal,
    Hard,
    VeryHard,
    Hardcore,
    Extreme,
    Insane,
    Torment,
}

impl Difficulty {
    pub const ALL: [Difficulty; 7] = [
        Self::Normal,
        Self::Hard,
        Self::VeryHard,
        Self::Hardcore,
        Self::Extreme,
        Self::Insane,
        Self::Torment,
    ];

    /// Highest tier a lobby offers for an open boss group.
    pub const HIGHEST: Difficulty = Self::Torment;

    /// Zero-based tier index.
    #[must_use]
    pub fn tier(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn from_tier(tier: i64) -> Option<Self> {
        usize::try_from(tier)
            .ok()
            .and_then(|t| Self::ALL.get(t).copied())
    }
}

// =============================================================================
// LOBBY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SeasonType {
    #[default]
    Open,
    Closed,
}

/// Lobby view shown before entering the raid. Rebuilt when the requesting
/// account's season differs from the cached one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbySnapshot {
    pub season_id: i64,
    pub season_type: SeasonType,
    pub tier: i32,
    pub ranking: i64,
    pub best_ranking_point: i64,
    pub total_ranking_point: i64,
    pub claimed_reward_ids: BTreeSet<i64>,
    /// Boss group id -> highest difficulty the account may select.
    pub playable_difficulty_by_boss_group: BTreeMap<String, Difficulty>,
    pub active_raid: Option<RaidSession>,
}

// =============================================================================
// RAID SESSION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaidStatus {
    Playing,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidOwner {
    pub account_id: i64,
    pub account_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidBoss {
    pub current_hp: i64,
    pub groggy_point: i64,
}

/// The one raid currently open on this server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaidSession {
    pub owner: RaidOwner,
    pub server_id: i64,
    pub secret_code: String,
    pub stage_id: i64,
    pub season_id: i64,
    /// Unix seconds.
    pub started_at: i64,
    /// Unix seconds. Advisory; never enforced here.
    pub ends_at: i64,
    pub player_count: u32,
    pub status: RaidStatus,
    pub is_practice: bool,
    pub bosses: Vec<RaidBoss>,
    pub owner_level_at_creation: i64,
    pub difficulty: Difficulty,
    /// Account id -> committed unit ids, main slots before support slots.
    pub participants: BTreeMap<i64, Vec<i64>>,
}

// =============================================================================
// BATTLE SESSION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageEntry {
    pub index: usize,
    pub given_damage: i64,
    pub given_groggy: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub account_id: i64,
    pub account_name: String,
    pub damage_log: Vec<DamageEntry>,
}

impl MemberRecord {
    #[must_use]
    pub fn new(account_id: i64, account_name: impl Into<String>) -> Self {
        Self { account_id, account_name: account_name.into(), damage_log: Vec::new() }
    }

    /// Append one attempt's damage. The entry index is the prior log length.
    pub fn record_damage(&mut self, given_damage: i64, given_groggy: i64) -> DamageEntry {
        let entry = DamageEntry { index: self.damage_log.len(), given_damage, given_groggy };
        self.damage_log.push(entry);
        entry
    }
}

/// Live combat tied 1:1 to the active raid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleSession {
    pub stage_id: i64,
    pub current_boss_hp: i64,
    pub current_boss_groggy: i64,
    pub current_boss_ai_phase: i64,
    pub sub_parts_hp: Vec<i64>,
    pub members: BTreeMap<i64, MemberRecord>,
}

impl BattleSession {
    #[must_use]
    pub fn is_boss_defeated(&self) -> bool {
        self.current_boss_hp <= 0
    }
}

// =============================================================================
// RAID STATE
// =============================================================================

/// The process-wide raid triple. Raid and battle are either both present
/// or both absent outside of a single operation.
#[derive(Debug, Default)]
pub struct RaidState {
    pub lobby: Option<LobbySnapshot>,
    pub raid: Option<RaidSession>,
    pub battle: Option<BattleSession>,
}

impl RaidState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.raid.is_some()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Copy.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<dyn AccountStore>,
    pub catalog: Arc<Catalog>,
    pub raid: Arc<Mutex<RaidState>>,
    /// Lifetime stamped onto new raids as `ends_at - started_at`.
    pub raid_session_ttl_secs: i64,
}

impl AppState {
    #[must_use]
    pub fn new(accounts: Arc<dyn AccountStore>, catalog: Arc<Catalog>, raid_session_ttl_secs: i64) -> Self {
        Self { accounts, catalog, raid: Arc::new(Mutex::new(RaidState::new())), raid_session_ttl_secs }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
