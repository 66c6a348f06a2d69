//! Content Catalogs
//!
//! Troop cards and tower definitions. Sessions load both at start, so a
//! missing or broken content file fails that match only.

use std::fmt;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::HAND_SIZE;

/// Minimum troops a catalog must hold to deal a full hand.
pub const MIN_CATALOG_TROOPS: usize = HAND_SIZE;

// =============================================================================
// TOWERS
// =============================================================================

/// Tower kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TowerKind {
    /// Win condition. Untargetable until every Guard Tower falls.
    King,
    /// Protects the King Tower.
    Guard,
}

impl fmt::Display for TowerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TowerKind::King => f.write_str("King Tower"),
            TowerKind::Guard => f.write_str("Guard Tower"),
        }
    }
}

/// A defensive tower.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tower {
    /// Tower kind.
    pub kind: TowerKind,
    /// Current hit points. Destroyed at zero or below.
    pub hp: i32,
    /// Attack stat.
    pub attack: i32,
    /// Defense subtracted from incoming damage.
    pub defense: i32,
    /// Critical parameter from the content file. Informational; critical
    /// hits come from the attacker's token pool.
    #[serde(default)]
    pub crit: f32,
    /// Experience value.
    #[serde(default)]
    pub exp: u32,
}

impl Tower {
    /// Has this tower fallen?
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.hp <= 0
    }
}

/// A player's towers for one match: two Guards then the King.
pub type TowerSet = [Tower; 3];

// =============================================================================
// TROOPS
// =============================================================================

/// Special troop abilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TroopAbility {
    /// Restores the owner's weakest standing tower instead of attacking.
    Heal,
}

/// A troop card.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Troop {
    /// Card name.
    pub name: String,
    /// Hit points.
    pub hp: i32,
    /// Attack stat.
    pub attack: i32,
    /// Defense stat.
    pub defense: i32,
    /// Mana spent to play the card.
    pub mana: i32,
    /// Experience value.
    #[serde(default)]
    pub exp: u32,
    /// Special ability, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special: Option<TroopAbility>,
}

impl Troop {
    /// Does playing this troop heal instead of attack?
    pub fn is_healer(&self) -> bool {
        self.special == Some(TroopAbility::Heal)
    }
}

// =============================================================================
// LOADING
// =============================================================================

/// Content errors. Fatal to the session being started, never to the server.
#[derive(Debug, Error)]
pub enum ContentError {
    /// Content file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Content file is not valid JSON for its type.
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// Fewer troops than a hand needs.
    #[error("troop catalog has {found} entries, need at least {}", MIN_CATALOG_TROOPS)]
    TooFewTroops {
        /// Entries present.
        found: usize,
    },
    /// Tower definitions lack a kind.
    #[error("tower definitions missing a {0}")]
    MissingTower(TowerKind),
}

/// Read-only source of game content.
pub trait ContentSource: Send + Sync {
    /// Load the troop catalog. Fails if unavailable or too small.
    fn load_troop_catalog(&self) -> Result<Vec<Troop>, ContentError>;

    /// Load the per-player tower set.
    fn load_tower_template(&self) -> Result<TowerSet, ContentError>;
}

/// Check a troop catalog is large enough to deal a hand.
pub fn validate_troops(troops: Vec<Troop>) -> Result<Vec<Troop>, ContentError> {
    if troops.len() < MIN_CATALOG_TROOPS {
        return Err(ContentError::TooFewTroops { found: troops.len() });
    }
    Ok(troops)
}

/// Build the tower set from definitions: the first Guard (twice) and the
/// first King. Every entry is an owned copy.
pub fn tower_template_from(defs: &[Tower]) -> Result<TowerSet, ContentError> {
    let guard = defs
        .iter()
        .find(|t| t.kind == TowerKind::Guard)
        .ok_or(ContentError::MissingTower(TowerKind::Guard))?;
    let king = defs
        .iter()
        .find(|t| t.kind == TowerKind::King)
        .ok_or(ContentError::MissingTower(TowerKind::King))?;

    Ok([guard.clone(), guard.clone(), king.clone()])
}

/// Content read from JSON files on every load.
#[derive(Clone, Debug)]
pub struct JsonContent {
    troops_path: PathBuf,
    towers_path: PathBuf,
}

impl JsonContent {
    /// Create a loader for the given files.
    pub fn new(troops_path: impl Into<PathBuf>, towers_path: impl Into<PathBuf>) -> Self {
        Self {
            troops_path: troops_path.into(),
            towers_path: towers_path.into(),
        }
    }

    fn read<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ContentError> {
        let text = std::fs::read_to_string(path).map_err(|source| ContentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ContentError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl ContentSource for JsonContent {
    fn load_troop_catalog(&self) -> Result<Vec<Troop>, ContentError> {
        validate_troops(Self::read(&self.troops_path)?)
    }

    fn load_tower_template(&self) -> Result<TowerSet, ContentError> {
        let defs: Vec<Tower> = Self::read(&self.towers_path)?;
        tower_template_from(&defs)
    }
}

/// In-memory content.
#[derive(Clone, Debug, Default)]
pub struct StaticContent {
    /// Troop catalog.
    pub troops: Vec<Troop>,
    /// Tower definitions.
    pub towers: Vec<Tower>,
}

impl StaticContent {
    /// Create from explicit lists.
    pub fn new(troops: Vec<Troop>, towers: Vec<Tower>) -> Self {
        Self { troops, towers }
    }

    /// The stock card set shipped in `data/`.
    pub fn standard() -> Self {
        let troop = |name: &str, hp, attack, defense, mana, exp| Troop {
            name: name.to_string(),
            hp,
            attack,
            defense,
            mana,
            exp,
            special: None,
        };
        let troops = vec![
            troop("Pawn", 50, 150, 100, 3, 5),
            troop("Bishop", 100, 200, 150, 4, 10),
            troop("Rook", 250, 200, 200, 5, 25),
            troop("Knight", 200, 300, 150, 5, 25),
            troop("Prince", 500, 400, 300, 6, 50),
            Troop {
                special: Some(TroopAbility::Heal),
                ..troop("Queen", 0, 0, 0, 5, 30)
            },
        ];
        let towers = vec![
            Tower { kind: TowerKind::King, hp: 2000, attack: 500, defense: 300, crit: 0.1, exp: 200 },
            Tower { kind: TowerKind::Guard, hp: 1000, attack: 300, defense: 100, crit: 0.05, exp: 100 },
        ];
        Self { troops, towers }
    }
}

impl ContentSource for StaticContent {
    fn load_troop_catalog(&self) -> Result<Vec<Troop>, ContentError> {
        validate_troops(self.troops.clone())
    }

    fn load_tower_template(&self) -> Result<TowerSet, ContentError> {
        tower_template_from(&self.towers)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Draw up to `count` distinct troops in random order.
pub fn draw_troops<R: Rng + ?Sized>(catalog: &[Troop], count: usize, rng: &mut R) -> Vec<Troop> {
    catalog.choose_multiple(rng, count).cloned().collect()
}

/// Draw a single random troop.
pub fn draw_troop<R: Rng + ?Sized>(catalog: &[Troop], rng: &mut R) -> Option<Troop> {
    catalog.choose(rng).cloned()
}

/// Find a troop by name (case-insensitive).
pub fn find_troop<'a>(catalog: &'a [Troop], name: &str) -> Option<&'a Troop> {
    catalog.iter().find(|t| t.name.eq_ignore_ascii_case(name))
}
