//! Catalog of compiled reactions.
//!
//! Reaction sets are stored densely and indexed by their sorted
//! reactant tuple; named pathways get a direct (set, pathway) binding
//! for the counting machinery.

use crate::compile::{CompiledReaction, ReactionSet};
use crate::rates::ClampData;
use mcell_core::SpeciesId;
use std::collections::HashMap;

/// Location of a named pathway inside the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxPathRef {
    pub set: usize,
    pub path: usize,
}

/// All compiled reactions of a simulation, plus the clamp registry.
#[derive(Debug, Default)]
pub struct ReactionCatalog {
    sets: Vec<ReactionSet>,
    by_reactants: HashMap<Vec<SpeciesId>, Vec<usize>>,
    by_pathname: HashMap<String, RxPathRef>,
    pub clamps: Vec<ClampData>,
}

impl ReactionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a compiled reaction under its reactant tuple.
    pub fn insert(&mut self, compiled: CompiledReaction) {
        self.clamps.extend(compiled.clamps);
        for rx in compiled.sets {
            let idx = self.sets.len();
            for (path, info) in rx.info.iter().enumerate() {
                if let Some(name) = &info.pathname {
                    self.by_pathname
                        .insert(name.clone(), RxPathRef { set: idx, path });
                }
            }
            self.by_reactants
                .entry(Self::key_of(&rx))
                .or_default()
                .push(idx);
            self.sets.push(rx);
        }
    }

    fn key_of(rx: &ReactionSet) -> Vec<SpeciesId> {
        let mut key: Vec<SpeciesId> = rx.players[..rx.n_reactants]
            .iter()
            .flatten()
            .copied()
            .collect();
        key.sort_unstable();
        key
    }

    /// Indices of every sibling set over the given reactant tuple.
    pub fn lookup(&self, reactants: &[SpeciesId]) -> &[usize] {
        let mut key = reactants.to_vec();
        key.sort_unstable();
        self.by_reactants
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get(&self, idx: usize) -> &ReactionSet {
        &self.sets[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut ReactionSet {
        &mut self.sets[idx]
    }

    pub fn pathname(&self, name: &str) -> Option<RxPathRef> {
        self.by_pathname.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReactionSet> {
        self.sets.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ReactionSet> {
        self.sets.iter_mut()
    }
}
