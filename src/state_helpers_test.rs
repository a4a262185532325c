use super::*;
use crate::services::account::{Account, Echelon, EchelonType, MemoryAccountStore, RaidProgress};
use crate::services::catalog::{BossStatDefinition, SeasonDefinition, StageDefinition};

/// Stage whose boss dies to 1000 damage.
pub const STAGE_ID: i64 = 1;
/// Stage with a tougher boss, used for re-targeting a live raid.
pub const OTHER_STAGE_ID: i64 = 2;
/// Stage whose boss has no stat row.
pub const BROKEN_STAGE_ID: i64 = 9;

pub const BOSS_MAX_HP: i64 = 1000;
pub const BOSS_GROGGY: i64 = 500;

/// Small fixture catalog: season 1 opens two boss groups, season 2 none.
#[must_use]
pub fn test_catalog() -> Catalog {
    Catalog::from_parts(
        vec![
            SeasonDefinition { season_id: 1, open_raid_boss_groups: vec!["Binah".into(), "Chesed".into()] },
            SeasonDefinition { season_id: 2, open_raid_boss_groups: vec![] },
        ],
        vec![
            StageDefinition {
                stage_id: STAGE_ID,
                boss_character_id: 7001,
                hp_percent_score: 60_000,
                default_clear_score: 1_000_000,
            },
            StageDefinition {
                stage_id: OTHER_STAGE_ID,
                boss_character_id: 7002,
                hp_percent_score: 80_000,
                default_clear_score: 2_000_000,
            },
            StageDefinition {
                stage_id: BROKEN_STAGE_ID,
                boss_character_id: 7999,
                hp_percent_score: 0,
                default_clear_score: 0,
            },
        ],
        vec![
            BossStatDefinition { character_id: 7001, max_hp: BOSS_MAX_HP, groggy_gauge: BOSS_GROGGY },
            BossStatDefinition { character_id: 7002, max_hp: 5000, groggy_gauge: 800 },
        ],
    )
}

/// Season-1 account with raid echelon 1 (mains 11..=14, supports 21, 22).
#[must_use]
pub fn test_account(account_id: i64) -> Account {
    Account {
        account_id,
        nickname: format!("player-{account_id}"),
        level: 80,
        raid: RaidProgress { season_id: 1, ..RaidProgress::default() },
        echelons: vec![Echelon {
            echelon_type: EchelonType::Raid,
            echelon_number: 1,
            main_slot_ids: vec![11, 12, 13, 14],
            support_slot_ids: vec![21, 22],
        }],
    }
}

/// Session key under which `test_app_state_with_accounts` registers an account.
#[must_use]
pub fn session_key(account_id: i64) -> String {
    format!("session-{account_id}")
}

/// Create a test `AppState` backed by an in-memory store and the fixture
/// catalog. Returns the store too so tests can inspect persisted progress.
#[must_use]
pub fn test_app_state_with_accounts(accounts: Vec<Account>) -> (AppState, Arc<MemoryAccountStore>) {
    let store = Arc::new(MemoryAccountStore::new());
    for account in accounts {
        store.insert(session_key(account.account_id), account);
    }
    let state = AppState::new(store.clone(), Arc::new(test_catalog()), 3600);
    (state, store)
}

/// Create a test `AppState` with accounts 1 and 2.
#[must_use]
pub fn test_app_state() -> (AppState, Arc<MemoryAccountStore>) {
    test_app_state_with_accounts(vec![test_account(1), test_account(2)])
}
