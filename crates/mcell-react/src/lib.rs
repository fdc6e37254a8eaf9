//! # MCell-React: Stochastic Reaction Engine Revival
//!
//! Revival of the reaction subsystem of MCell (Monte Carlo Cell), the
//! particle-based simulator of cellular microphysiology developed at the
//! Salk Institute and the Pittsburgh Supercomputing Center.
//!
//! Users declare reaction pathways over species: volume molecules
//! diffusing in 3D, grid molecules bound to 2D lattices on walls, and
//! surface classes describing the walls themselves. This crate:
//!
//! 1. **Normalizes** each declared pathway (surface last, reactants
//!    alphabetized, special-reaction duplicates rejected)
//! 2. **Splits** pathway lists into reaction sets of equivalent
//!    orientation geometry
//! 3. **Rejects** pathways that duplicate each other up to notation
//! 4. **Compiles** each set into flat player/geometry/probability
//!    tables, loading time-varying rate files and cooperative rates
//! 5. **Selects** reaction outcomes at simulation time, with skipped
//!    reactions accounted for when probability outruns the per-encounter
//!    budget
//!
//! Spatial partitioning, diffusion, mesh geometry, and the MDL parser
//! live elsewhere; this crate consumes parsed pathways and an RNG and
//! produces compiled [`ReactionSet`]s plus selection verdicts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod catalog;
pub mod compile;
pub mod geom;
pub mod pathway;
pub mod rates;
pub mod select;
pub mod update;

pub use catalog::{ReactionCatalog, RxPathRef};
pub use compile::{
    compile_reaction, CompiledReaction, ConstantPbFactor, PathwayInfo, PbFactor, ReactionSet,
};
pub use pathway::{
    normalize_pathways, MacroRate, Pathway, PathwayBuilder, PathwayKind, Product, RateSpec,
    Reactant,
};
pub use rates::{load_rate_file, ClampData, TimedRate};
pub use select::{
    binary_search_double, test_bimolecular, test_intersect, test_many_bimolecular,
    test_many_intersect, test_many_reactions_all_neighbors, test_many_unimol,
    timeof_unimolecular, which_unimolecular, Select, SelectMany, SpecialTag,
};
pub use update::update_probs;

#[derive(Error, Debug)]
pub enum ReactError {
    #[error("More than three reactants in a reaction")]
    TooManyReactants,
    #[error("Invalid catalyst: {0}")]
    CatalystInvalid(&'static str),
    #[error("Reaction surface class must follow at least one molecule")]
    SurfaceWithoutMolecule,
    #[error("Product {0} of an oriented reaction has no orientation")]
    UnorientedProduct(String),
    #[error("Surface product {0} in a reaction with only volume reactants")]
    VolumeOnlySurfaceProduct(String),
    #[error("Orientation specified for product {0} of a volume-only reaction")]
    OrientedVolumeProduct(String),
    #[error("Surface class {0} may not appear as a product")]
    SurfaceProduct(String),
    #[error(
        "Reaction {0} produces more surface molecules than it consumes \
         and VACANCY_SEARCH_DISTANCE is not set"
    )]
    InsufficientGrid(String),
    #[error("Exact duplicates of special reaction for surface {0} are not allowed")]
    DuplicateSpecial(String),
    #[error("Exact duplicates of reaction {0} are not allowed")]
    DuplicateReaction(String),
    #[error("Reaction has no forward rate")]
    RateUnset,
    #[error("Cannot read rate file {path}: {source}")]
    RateFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Negative rate in file {path}, line {line}")]
    RateFileNegative { path: String, line: usize },
    #[error("Reaction probability exceeds 1 for {0}")]
    ProbabilityOverflow(String),
    #[error("Reaction with no reactants")]
    EmptyReaction,
    #[error(transparent)]
    Core(#[from] mcell_core::CoreError),
}

pub type Result<T> = std::result::Result<T, ReactError>;

// ============================================================================
// SPECIAL-REACTION TAGS
// ============================================================================

/// No reaction selected (wire sentinel).
pub const RX_NO_RX: i32 = -1;

/// `n_pathways` tag: transparent surface, molecules pass through.
pub const RX_TRANSP: i32 = -3;

/// `n_pathways` tag: reflective surface.
pub const RX_REFLEC: i32 = -4;

/// `n_pathways` tag: absorptive region border for grid molecules.
pub const RX_ABSORB_REGION_BORDER: i32 = -5;

/// Any `n_pathways` value at or below this marks a special reaction.
pub const RX_SPECIAL: i32 = -3;

// ============================================================================
// POLICIES & ENVIRONMENT
// ============================================================================

/// How to respond to a condition that is survivable but suspicious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarnPolicy {
    /// Carry on silently.
    Cope,
    /// Log a warning and carry on.
    Warn,
    /// Fail the operation.
    Error,
}

/// How much to report about reaction probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyLevel {
    None,
    Brief,
    Full,
}

/// User-facing reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notifications {
    /// Reporting of compiled reaction probabilities.
    pub reaction_probabilities: NotifyLevel,
    /// Reporting of time-varying probability updates.
    pub time_varying_reactions: NotifyLevel,
    /// Only probabilities at or above this are reported.
    pub reaction_prob_notify: f64,
    /// Policy for negative rates in rate files.
    pub neg_reaction: WarnPolicy,
    /// Policy when a total reaction probability exceeds the warn level.
    pub high_reaction_prob: WarnPolicy,
    /// Total-probability level that triggers `high_reaction_prob`.
    pub reaction_prob_warn: f64,
}

impl Default for Notifications {
    fn default() -> Self {
        Self {
            reaction_probabilities: NotifyLevel::Brief,
            time_varying_reactions: NotifyLevel::Brief,
            reaction_prob_notify: 0.0,
            neg_reaction: WarnPolicy::Warn,
            high_reaction_prob: WarnPolicy::Cope,
            reaction_prob_warn: 1.0,
        }
    }
}

/// Global simulation context the reaction engine needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionEnv {
    /// Length of one internal timestep in seconds.
    pub time_unit: f64,
    /// Squared vacancy search distance for surface product placement.
    pub vacancy_search_dist2: f64,
    pub notify: Notifications,
}

impl Default for ReactionEnv {
    fn default() -> Self {
        Self {
            time_unit: 1e-6,
            vacancy_search_dist2: 0.0,
            notify: Notifications::default(),
        }
    }
}
