//! Account store for session lookup, raid progress, and raid echelons.
//!
//! ARCHITECTURE
//! ============
//! The raid controller only needs three things from the account layer:
//! resolve an opaque session key to an account, load an account with its
//! raid progress and echelons, and write raid progress back. `AccountStore`
//! captures that contract so the service can run against Postgres in
//! production and an in-memory map in tests and local runs.
//!
//! TRADE-OFFS
//! ==========
//! Only the raid progress row is ever written. Accounts, sessions, and
//! echelons are owned by other services and treated as read-only here.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::warn;

use crate::state::Difficulty;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("unknown or expired session")]
    UnknownSession,
    #[error("account not found: {0}")]
    NotFound(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for AccountError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownSession => "E_UNKNOWN_SESSION",
            Self::NotFound(_) => "E_ACCOUNT_NOT_FOUND",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Per-account raid progress. Mutated by the raid controller and persisted
/// by the caller after the raid lock is released.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidProgress {
    pub season_id: i64,
    /// Stage id of the raid the account most recently created.
    pub active_raid_unique_id: i64,
    pub difficulty: Difficulty,
    pub best_ranking_point: i64,
    pub total_ranking_point: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EchelonType {
    Adventure,
    Raid,
    ArenaAttack,
    ArenaDefence,
}

impl EchelonType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Adventure => "adventure",
            Self::Raid => "raid",
            Self::ArenaAttack => "arena_attack",
            Self::ArenaDefence => "arena_defence",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "adventure" => Some(Self::Adventure),
            "raid" => Some(Self::Raid),
            "arena_attack" => Some(Self::ArenaAttack),
            "arena_defence" => Some(Self::ArenaDefence),
            _ => None,
        }
    }
}

/// A saved team: which units sit in the main and support slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echelon {
    pub echelon_type: EchelonType,
    pub echelon_number: i64,
    pub main_slot_ids: Vec<i64>,
    pub support_slot_ids: Vec<i64>,
}

impl Echelon {
    /// Unit ids in battle order: main slots first, then support slots.
    #[must_use]
    pub fn unit_ids(&self) -> Vec<i64> {
        self.main_slot_ids
            .iter()
            .chain(&self.support_slot_ids)
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: i64,
    pub nickname: String,
    pub level: i64,
    pub raid: RaidProgress,
    pub echelons: Vec<Echelon>,
}

impl Account {
    #[must_use]
    pub fn echelon(&self, echelon_type: EchelonType, echelon_number: i64) -> Option<&Echelon> {
        self.echelons
            .iter()
            .find(|e| e.echelon_type == echelon_type && e.echelon_number == echelon_number)
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Account persistence used by the raid handlers. Enables mocking in tests.
#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    /// Resolve an opaque session key to its account id.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSession` if the key is not valid.
    async fn account_id_for_session(&self, session_key: &str) -> Result<i64, AccountError>;

    /// Load an account with its raid progress and echelons.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the account does not exist.
    async fn load_account(&self, account_id: i64) -> Result<Account, AccountError>;

    /// Persist an account's raid progress.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or a database error.
    async fn save_raid_progress(&self, account_id: i64, progress: &RaidProgress) -> Result<(), AccountError>;
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<String, i64>,
    accounts: HashMap<i64, Account>,
}

/// Map-backed store for tests and database-less local runs.
#[derive(Default)]
pub struct MemoryAccountStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account and the session key that resolves to it.
    pub fn insert(&self, session_key: impl Into<String>, account: Account) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inner.sessions.insert(session_key.into(), account.account_id);
        inner.accounts.insert(account.account_id, account);
    }

    /// Store seeded with a single playable account for local runs.
    #[must_use]
    pub fn with_dev_account(session_key: &str, season_id: i64) -> Self {
        let store = Self::new();
        store.insert(
            session_key,
            Account {
                account_id: 1,
                nickname: "Sensei".into(),
                level: 90,
                raid: RaidProgress { season_id, ..RaidProgress::default() },
                echelons: vec![Echelon {
                    echelon_type: EchelonType::Raid,
                    echelon_number: 1,
                    main_slot_ids: vec![10_001, 10_002, 10_003, 10_004],
                    support_slot_ids: vec![20_001, 20_002],
                }],
            },
        );
        store
    }
}

#[async_trait::async_trait]
impl AccountStore for MemoryAccountStore {
    async fn account_id_for_session(&self, session_key: &str) -> Result<i64, AccountError> {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inner
            .sessions
            .get(session_key)
            .copied()
            .ok_or(AccountError::UnknownSession)
    }

    async fn load_account(&self, account_id: i64) -> Result<Account, AccountError> {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        inner
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or(AccountError::NotFound(account_id))
    }

    async fn save_raid_progress(&self, account_id: i64, progress: &RaidProgress) -> Result<(), AccountError> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let account = inner
            .accounts
            .get_mut(&account_id)
            .ok_or(AccountError::NotFound(account_id))?;
        account.raid = progress.clone();
        Ok(())
    }
}

// =============================================================================
// POSTGRES STORE
// =============================================================================

pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AccountStore for PgAccountStore {
    async fn account_id_for_session(&self, session_key: &str) -> Result<i64, AccountError> {
        let account_id: Option<i64> =
            sqlx::query_scalar("SELECT account_id FROM account_sessions WHERE session_key = $1 AND expires_at > now()")
                .bind(session_key)
                .fetch_optional(&self.pool)
                .await?;
        account_id.ok_or(AccountError::UnknownSession)
    }

    async fn load_account(&self, account_id: i64) -> Result<Account, AccountError> {
        let row = sqlx::query("SELECT id, nickname, level FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AccountError::NotFound(account_id))?;

        let progress = sqlx::query(
            r"SELECT season_id, active_raid_unique_id, difficulty, best_ranking_point, total_ranking_point
              FROM raid_progress
              WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        let raid = match progress {
            Some(r) => {
                let tier: i16 = r.get("difficulty");
                let difficulty = Difficulty::from_tier(i64::from(tier)).unwrap_or_else(|| {
                    warn!(account_id, tier, "raid progress has unknown difficulty tier; using Normal");
                    Difficulty::Normal
                });
                RaidProgress {
                    season_id: r.get("season_id"),
                    active_raid_unique_id: r.get("active_raid_unique_id"),
                    difficulty,
                    best_ranking_point: r.get("best_ranking_point"),
                    total_ranking_point: r.get("total_ranking_point"),
                }
            }
            None => RaidProgress::default(),
        };

        let echelon_rows = sqlx::query(
            r"SELECT echelon_type, echelon_number, main_slot_ids, support_slot_ids
              FROM echelons
              WHERE account_id = $1
              ORDER BY echelon_type, echelon_number",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        let echelons = echelon_rows
            .into_iter()
            .filter_map(|r| {
                let raw_type: String = r.get("echelon_type");
                let Some(echelon_type) = EchelonType::parse(&raw_type) else {
                    warn!(account_id, echelon_type = %raw_type, "skipping echelon with unknown type");
                    return None;
                };
                Some(Echelon {
                    echelon_type,
                    echelon_number: r.get("echelon_number"),
                    main_slot_ids: r.get("main_slot_ids"),
                    support_slot_ids: r.get("support_slot_ids"),
                })
            })
            .collect();

        Ok(Account { account_id, nickname: row.get("nickname"), level: row.get("level"), raid, echelons })
    }

    async fn save_raid_progress(&self, account_id: i64, progress: &RaidProgress) -> Result<(), AccountError> {
        let tier = i16::try_from(progress.difficulty.tier()).unwrap_or(0);
        sqlx::query(
            r"INSERT INTO raid_progress
                  (account_id, season_id, active_raid_unique_id, difficulty, best_ranking_point, total_ranking_point)
              VALUES ($1, $2, $3, $4, $5, $6)
              ON CONFLICT (account_id) DO UPDATE SET
                  season_id = EXCLUDED.season_id,
                  active_raid_unique_id = EXCLUDED.active_raid_unique_id,
                  difficulty = EXCLUDED.difficulty,
                  best_ranking_point = EXCLUDED.best_ranking_point,
                  total_ranking_point = EXCLUDED.total_ranking_point,
                  updated_at = now()",
        )
        .bind(account_id)
        .bind(progress.season_id)
        .bind(progress.active_raid_unique_id)
        .bind(tier)
        .bind(progress.best_ranking_point)
        .bind(progress.total_ranking_point)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "account_test.rs"]
mod tests;
