//! # MCell-Core
//!
//! Shared types for the MCell revival crates.
//!
//! ## History
//!
//! MCell (Monte Carlo Cell) was developed at the Salk Institute and the
//! Pittsburgh Supercomputing Center to simulate cellular microphysiology:
//! individual molecules diffusing in 3D, reacting with each other and
//! with triangulated membrane surfaces. The original is C; this
//! workspace revives its reaction engine in Rust.
//!
//! This crate holds what every subsystem needs to agree on:
//!
//! 1. **Species**: named molecule/surface-class definitions with flags
//! 2. **Registry**: interned species storage, id-based lookup
//! 3. **Molecule**: a runtime reaction participant
//! 4. **Orientation**: signed orientation-class encoding
//! 5. **Sentinels**: `GIGANTIC`, `EPS_C`, `FOREVER`

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Species already defined: {0}")]
    DuplicateSpecies(String),
    #[error("Unknown species: {0}")]
    UnknownSpecies(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================================================
// NUMERIC SENTINELS
// ============================================================================

/// Effectively infinite rate or count.
pub const GIGANTIC: f64 = 1e140;

/// Tolerance below which a probability draw is treated as zero.
pub const EPS_C: f64 = 1e-12;

/// Time at which an event that never happens is scheduled.
pub const FOREVER: f64 = f64::INFINITY;

// ============================================================================
// SPECIES FLAGS
// ============================================================================

/// Grid molecules live on a 2D lattice on top of a wall.
pub const ON_GRID: u32 = 0x02;

/// Surface classes are wall properties, not molecules.
pub const IS_SURFACE: u32 = 0x04;

/// Anything that is not a freely diffusing volume molecule.
pub const NOT_FREE: u32 = ON_GRID | IS_SURFACE;

/// Species that can react at region borders (set during reaction compile).
pub const CAN_REGION_BORDER: u32 = 0x08;

/// Subunit of a multi-subunit molecular complex.
pub const COMPLEX_MEMBER: u32 = 0x10;

/// Reserved species name matched by the absorptive-surface collapse.
pub const ALL_SURFACE_MOLECULES: &str = "ALL_SURFACE_MOLECULES";

// ============================================================================
// SPECIES & REGISTRY
// ============================================================================

/// Index of a species in the [`SpeciesRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpeciesId(pub u32);

impl SpeciesId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SpeciesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A molecule type or surface class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Species {
    pub id: SpeciesId,
    pub name: String,
    pub flags: u32,
}

impl Species {
    pub fn is_surface(&self) -> bool {
        self.flags & IS_SURFACE != 0
    }

    pub fn on_grid(&self) -> bool {
        self.flags & ON_GRID != 0
    }

    pub fn not_free(&self) -> bool {
        self.flags & NOT_FREE != 0
    }
}

/// Owns every declared species; everything else refers to them by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeciesRegistry {
    species: Vec<Species>,
}

impl SpeciesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a new species. Names must be unique.
    pub fn insert(&mut self, name: &str, flags: u32) -> Result<SpeciesId> {
        if self.species.iter().any(|s| s.name == name) {
            return Err(CoreError::DuplicateSpecies(name.to_string()));
        }
        let id = SpeciesId(self.species.len() as u32);
        self.species.push(Species {
            id,
            name: name.to_string(),
            flags,
        });
        Ok(id)
    }

    pub fn get(&self, id: SpeciesId) -> &Species {
        &self.species[id.index()]
    }

    pub fn name(&self, id: SpeciesId) -> &str {
        &self.species[id.index()].name
    }

    pub fn flags(&self, id: SpeciesId) -> u32 {
        self.species[id.index()].flags
    }

    /// Lexicographic species ordering by printable name.
    pub fn compare(&self, a: SpeciesId, b: SpeciesId) -> std::cmp::Ordering {
        self.name(a).cmp(self.name(b))
    }

    pub fn lookup(&self, name: &str) -> Result<SpeciesId> {
        self.species
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.id)
            .ok_or_else(|| CoreError::UnknownSpecies(name.to_string()))
    }

    /// Promote flag bits on an existing species.
    pub fn set_flags(&mut self, id: SpeciesId, bits: u32) {
        self.species[id.index()].flags |= bits;
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Species> {
        self.species.iter()
    }
}

// ============================================================================
// MOLECULES
// ============================================================================

/// A concrete molecule taking part in a reaction encounter.
///
/// `subunit_state` is an opaque index interpreted by cooperative rate
/// tables; it identifies the neighbor-state of a complex subunit and is
/// meaningless unless `COMPLEX_MEMBER` is set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Molecule {
    pub species: SpeciesId,
    pub flags: u32,
    pub subunit_state: u32,
}

impl Molecule {
    pub fn new(species: SpeciesId, flags: u32) -> Self {
        Self {
            species,
            flags,
            subunit_state: 0,
        }
    }

    pub fn subunit(species: SpeciesId, flags: u32, state: u32) -> Self {
        Self {
            species,
            flags: flags | COMPLEX_MEMBER,
            subunit_state: state,
        }
    }

    pub fn is_complex_subunit(&self) -> bool {
        self.flags & COMPLEX_MEMBER != 0
    }
}

// ============================================================================
// ORIENTATION
// ============================================================================

/// Signed orientation: |o| is the orientation class, 0 means unoriented.
pub type Orient = i16;

/// Two participants share a nonzero orientation class.
pub fn same_class(a: Orient, b: Orient) -> bool {
    a != 0 && a.abs() == b.abs()
}

/// Same nonzero class, same side.
pub fn parallel(a: Orient, b: Orient) -> bool {
    a != 0 && a == b
}
