//! Static raid catalog of season, stage, and boss stat definitions.
//!
//! DESIGN
//! ======
//! Game-design data is read-only and loaded once at startup from a YAML file
//! (`RAID_CATALOG_PATH`). Rows are indexed by identifier; every lookup
//! returns a `Result` so a missing row becomes a typed request error at the
//! call site instead of an absent value travelling further.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("season not found: {0}")]
    SeasonNotFound(i64),
    #[error("raid stage not found: {0}")]
    StageNotFound(i64),
    #[error("boss stats not found for character: {0}")]
    BossStatNotFound(i64),
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl crate::frame::ErrorCode for CatalogError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::SeasonNotFound(_) => "E_SEASON_NOT_FOUND",
            Self::StageNotFound(_) => "E_STAGE_NOT_FOUND",
            Self::BossStatNotFound(_) => "E_BOSS_NOT_FOUND",
            Self::Io(_) | Self::Parse(_) => "E_CATALOG",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonDefinition {
    pub season_id: i64,
    /// Boss groups open this season, in display order.
    #[serde(default)]
    pub open_raid_boss_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub stage_id: i64,
    pub boss_character_id: i64,
    pub hp_percent_score: i64,
    pub default_clear_score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BossStatDefinition {
    pub character_id: i64,
    pub max_hp: i64,
    pub groggy_gauge: i64,
}

/// On-disk layout of the catalog file.
#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    seasons: Vec<SeasonDefinition>,
    #[serde(default)]
    stages: Vec<StageDefinition>,
    #[serde(default)]
    boss_stats: Vec<BossStatDefinition>,
}

// =============================================================================
// CATALOG
// =============================================================================

#[derive(Debug, Default)]
pub struct Catalog {
    seasons: HashMap<i64, SeasonDefinition>,
    stages: HashMap<i64, StageDefinition>,
    boss_stats: HashMap<i64, BossStatDefinition>,
}

impl Catalog {
    /// Index catalog rows by id. Later rows replace earlier rows with the same id.
    #[must_use]
    pub fn from_parts(
        seasons: Vec<SeasonDefinition>,
        stages: Vec<StageDefinition>,
        boss_stats: Vec<BossStatDefinition>,
    ) -> Self {
        Self {
            seasons: seasons.into_iter().map(|s| (s.season_id, s)).collect(),
            stages: stages.into_iter().map(|s| (s.stage_id, s)).collect(),
            boss_stats: boss_stats.into_iter().map(|b| (b.character_id, b)).collect(),
        }
    }

    /// Parse a catalog from YAML text.
    ///
    /// # Errors
    ///
    /// Returns `Parse` if the text is not a valid catalog document.
    pub fn from_yaml_str(text: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_yaml::from_str(text)?;
        Ok(Self::from_parts(file.seasons, file.stages, file.boss_stats))
    }

    /// Load a catalog file from disk.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read or `Parse` if it is malformed.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// # Errors
    ///
    /// Returns `SeasonNotFound` if no season row has this id.
    pub fn season(&self, season_id: i64) -> Result<&SeasonDefinition, CatalogError> {
        self.seasons
            .get(&season_id)
            .ok_or(CatalogError::SeasonNotFound(season_id))
    }

    /// # Errors
    ///
    /// Returns `StageNotFound` if no stage row has this id.
    pub fn stage(&self, stage_id: i64) -> Result<&StageDefinition, CatalogError> {
        self.stages
            .get(&stage_id)
            .ok_or(CatalogError::StageNotFound(stage_id))
    }

    /// # Errors
    ///
    /// Returns `BossStatNotFound` if no stat row exists for the character.
    pub fn boss_stat(&self, character_id: i64) -> Result<&BossStatDefinition, CatalogError> {
        self.boss_stats
            .get(&character_id)
            .ok_or(CatalogError::BossStatNotFound(character_id))
    }

    /// Resolve a stage together with the stats of its boss.
    ///
    /// # Errors
    ///
    /// Returns `StageNotFound` or `BossStatNotFound`.
    pub fn stage_with_boss(&self, stage_id: i64) -> Result<(&StageDefinition, &BossStatDefinition), CatalogError> {
        let stage = self.stage(stage_id)?;
        let boss = self.boss_stat(stage.boss_character_id)?;
        Ok((stage, boss))
    }

    /// Lowest season id in the catalog, if any.
    #[must_use]
    pub fn first_season_id(&self) -> Option<i64> {
        self.seasons.keys().min().copied()
    }

    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.seasons.len(), self.stages.len(), self.boss_stats.len())
    }
}

#[cfg(test)]
#[path = "catalog_test.rs"]
mod tests;
