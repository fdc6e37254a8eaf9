//! Reaction compilation.
//!
//! Takes the declared pathways of one reaction (a shared reactant
//! tuple), splits them into geometry-equivalent sets, rejects
//! duplicates, and flattens each set into the player/geometry/
//! probability tables the runtime selectors read.

use crate::geom::equivalent_geometry;
use crate::pathway::{normalize_pathways, MacroRate, Pathway, PathwayKind, RateSpec};
use crate::rates::{load_rate_file, ClampData, TimedRate};
use crate::{NotifyLevel, ReactError, ReactionEnv, Result, WarnPolicy};
use crate::{RX_ABSORB_REGION_BORDER, RX_REFLEC, RX_SPECIAL, RX_TRANSP};
use mcell_core::{
    Orient, SpeciesId, SpeciesRegistry, ALL_SURFACE_MOLECULES, CAN_REGION_BORDER, GIGANTIC,
    IS_SURFACE, ON_GRID,
};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

// ============================================================================
// COLLABORATOR SEAMS
// ============================================================================

/// Supplies the scalar that converts rate constants into per-timestep
/// probabilities. Computed elsewhere from diffusion constants, timestep,
/// and interaction geometry.
pub trait PbFactor {
    fn pb_factor(
        &self,
        rx: &ReactionSet,
        registry: &SpeciesRegistry,
        max_num_surf_products: usize,
    ) -> f64;
}

/// Fixed conversion factor, mainly for tests and table inspection.
pub struct ConstantPbFactor(pub f64);

impl PbFactor for ConstantPbFactor {
    fn pb_factor(&self, _rx: &ReactionSet, _reg: &SpeciesRegistry, _surf: usize) -> f64 {
        self.0
    }
}

// ============================================================================
// COMPILED REACTIONS
// ============================================================================

/// Per-pathway bookkeeping carried through the simulation.
#[derive(Debug, Clone, Default)]
pub struct PathwayInfo {
    pub count: u64,
    pub pathname: Option<String>,
}

/// A compiled bundle of geometry-equivalent pathways over one reactant
/// tuple: the unit the runtime selects over.
#[derive(Debug, Clone)]
pub struct ReactionSet {
    /// Alphabetized reactant tuple, for diagnostics and cataloging.
    pub name: String,
    pub n_reactants: usize,
    /// Pathway count, or a negative special tag (`RX_TRANSP`,
    /// `RX_REFLEC`, `RX_ABSORB_REGION_BORDER`).
    pub n_pathways: i32,
    /// `product_idx[k]` is where pathway `k`'s player block starts;
    /// the final entry is the total player count.
    pub product_idx: Vec<usize>,
    /// Cumulative per-timestep probabilities, fixed pathways first.
    pub cum_probs: Vec<f64>,
    /// Cooperative rate handles, present when any pathway has one.
    pub rates: Option<Vec<Option<Arc<dyn MacroRate>>>>,
    pub max_fixed_p: f64,
    pub min_noreaction_p: f64,
    pub pb_factor: f64,
    /// Leading reactant block, then per-pathway recycle slots and new
    /// products. `None` marks a reactant slot that is not recycled.
    pub players: Vec<Option<SpeciesId>>,
    /// Orientations for the reactant block; signed geometry codes for
    /// product slots.
    pub geometries: Vec<Orient>,
    pub is_complex: Option<Vec<bool>>,
    pub n_occurred: u64,
    pub n_skipped: f64,
    /// Pending probability changes, sorted by time then pathway.
    pub prob_t: VecDeque<TimedRate>,
    pub info: Vec<PathwayInfo>,
}

impl ReactionSet {
    pub fn is_special(&self) -> bool {
        self.n_pathways <= RX_SPECIAL
    }

    /// Number of pathway blocks laid out (special sets have one).
    pub fn num_pathways(&self) -> usize {
        if self.n_pathways < 0 {
            1
        } else {
            self.n_pathways as usize
        }
    }

    /// Count a selected pathway as having fired.
    pub fn record_occurrence(&mut self, path: usize) {
        self.n_occurred += 1;
        if let Some(info) = self.info.get_mut(path) {
            info.count += 1;
        }
    }

    /// `A[1] + wall[1]` style label of the reactant block.
    pub fn reactants_label(&self, registry: &SpeciesRegistry) -> String {
        self.players[..self.n_reactants]
            .iter()
            .zip(&self.geometries)
            .filter_map(|(p, g)| p.map(|id| format!("{}[{}]", registry.name(id), g)))
            .collect::<Vec<_>>()
            .join(" + ")
    }

    /// Label of pathway `j`'s products, geometry codes included.
    pub fn products_label(&self, j: usize, registry: &SpeciesRegistry) -> String {
        let block = &self.players[self.product_idx[j]..self.product_idx[j + 1]];
        let geoms = &self.geometries[self.product_idx[j]..self.product_idx[j + 1]];
        block
            .iter()
            .zip(geoms)
            .filter_map(|(p, g)| p.map(|id| format!("{}[{}]", registry.name(id), g)))
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

/// Everything one declared reaction compiles into.
#[derive(Debug)]
pub struct CompiledReaction {
    pub sets: Vec<ReactionSet>,
    pub clamps: Vec<ClampData>,
}

// ============================================================================
// DRIVER
// ============================================================================

/// Compile the declared pathways of one reaction.
///
/// The pathways must share a reactant tuple (the parser guarantees
/// this). Normalization, splitting, duplicate rejection, and assembly
/// run in order; sibling sets come back as a vector.
pub fn compile_reaction(
    registry: &mut SpeciesRegistry,
    env: &ReactionEnv,
    mut pathways: Vec<Pathway>,
    pb: &dyn PbFactor,
) -> Result<CompiledReaction> {
    if pathways.is_empty() {
        return Err(ReactError::EmptyReaction);
    }
    let n_reactants = pathways[0].reactants.len();
    debug_assert!(pathways.iter().all(|p| p.reactants.len() == n_reactants));

    normalize_pathways(&mut pathways, registry)?;

    let mut clamps = Vec::new();
    let mut sets = Vec::new();
    for set_paths in split_reaction(pathways, n_reactants) {
        sets.push(assemble(
            registry,
            env,
            set_paths,
            n_reactants,
            pb,
            &mut clamps,
        )?);
    }
    Ok(CompiledReaction { sets, clamps })
}

// ============================================================================
// SPLITTER
// ============================================================================

/// Partition pathways into subsets of pairwise-equivalent geometry.
/// Special pathways always form their own subset.
fn split_reaction(pathways: Vec<Pathway>, n_reactants: usize) -> Vec<Vec<Pathway>> {
    let mut sets: Vec<Vec<Pathway>> = Vec::new();
    for path in pathways {
        if path.kind.is_special() {
            sets.push(vec![path]);
            continue;
        }
        let home = sets
            .iter_mut()
            .find(|s| !s[0].kind.is_special() && equivalent_geometry(&path, &s[0], n_reactants));
        match home {
            Some(set) => set.push(path),
            None => sets.push(vec![path]),
        }
    }
    sets
}

// ============================================================================
// DUPLICATE CHECK
// ============================================================================

/// Sort a set's pathways by product signature and reject duplicates.
///
/// Reactant-side geometry is already equivalent within a set, so two
/// pathways duplicate each other when their signatures match and every
/// reactant-product and product-product orientation pair agrees.
fn check_duplicate_pathways(paths: &mut Vec<Pathway>, registry: &SpeciesRegistry) -> Result<()> {
    let mut nulls: Vec<Pathway> = Vec::new();
    let mut rest: Vec<Pathway> = Vec::new();
    for p in paths.drain(..) {
        if p.prod_signature.is_none() {
            nulls.push(p);
        } else {
            rest.push(p);
        }
    }

    // Two pathways with no products cannot differ at all.
    if nulls.len() > 1 {
        return Err(ReactError::DuplicateReaction(format!(
            "{} -> NULL",
            nulls[0].reaction_name(registry)
        )));
    }

    rest.sort_by(|a, b| a.prod_signature.cmp(&b.prod_signature));

    for pair in rest.windows(2) {
        let (p1, p2) = (&pair[0], &pair[1]);
        if p1.prod_signature == p2.prod_signature && pathways_are_duplicates(p1, p2) {
            return Err(ReactError::DuplicateReaction(format!(
                "{} -> {}",
                p1.reaction_name(registry),
                p1.prod_signature.as_deref().unwrap_or("NULL")
            )));
        }
    }

    rest.append(&mut nulls);
    *paths = rest;
    Ok(())
}

/// Player-level geometry comparison of two equal-signature pathways.
fn pathways_are_duplicates(p1: &Pathway, p2: &Pathway) -> bool {
    use crate::geom::equivalent_geometry_for_two_reactants;

    let nr = p1.reactants.len();
    let o1: Vec<Orient> = p1
        .reactants
        .iter()
        .map(|r| r.orient)
        .chain(p1.products.iter().map(|p| p.orient))
        .collect();
    let o2: Vec<Orient> = p2
        .reactants
        .iter()
        .map(|r| r.orient)
        .chain(p2.products.iter().map(|p| p.orient))
        .collect();
    let np = o1.len();

    // Reactant-reactant pairs were compared by the splitter; check
    // every pair that involves at least one product.
    for i in 0..np {
        let j0 = if i < nr { nr } else { i + 1 };
        for j in j0..np {
            if !equivalent_geometry_for_two_reactants(o1[i], o1[j], o2[i], o2[j]) {
                return false;
            }
        }
    }
    true
}

// ============================================================================
// ASSEMBLER
// ============================================================================

fn assemble(
    registry: &mut SpeciesRegistry,
    env: &ReactionEnv,
    mut paths: Vec<Pathway>,
    n_reactants: usize,
    pb: &dyn PbFactor,
    clamps: &mut Vec<ClampData>,
) -> Result<ReactionSet> {
    check_duplicate_pathways(&mut paths, registry)?;

    // Fixed-rate pathways precede cooperative ones; rate tables load
    // afterwards so prob_t path indices are final.
    paths.sort_by_key(|p| p.rate.is_cooperative());

    let name = paths[0].reaction_name(registry);
    let declared = paths.len();

    // Special collapse, clamp extraction, raw per-pathway rates.
    let mut tag: Option<i32> = None;
    let mut raw_probs = vec![0.0; declared];
    let mut n_prob_t_rxns = 0;
    for (k, path) in paths.iter_mut().enumerate() {
        let r1 = path.reactants[0].species;
        let r1_grid = registry.flags(r1) & ON_GRID != 0;
        let surf2 = path
            .reactants
            .get(1)
            .map_or(false, |r| registry.flags(r.species) & IS_SURFACE != 0);

        match path.kind {
            PathwayKind::ClampConc if surf2 && path.products.is_empty() => {
                if let RateSpec::Constant(conc) = path.rate {
                    if conc >= 0.0 {
                        if conc > 0.0 {
                            let o1 = path.reactants[0].orient;
                            let o2 = path.reactants[1].orient;
                            clamps.push(ClampData {
                                surf_class: path.reactants[1].species,
                                mol: r1,
                                concentration: conc,
                                orient: if o1 == 0 || o2 == 0 {
                                    0
                                } else if o1 == o2 {
                                    1
                                } else {
                                    -1
                                },
                            });
                        }
                        // Always-on: the surface takes every hit.
                        path.rate = RateSpec::Constant(GIGANTIC);
                    }
                }
            }
            PathwayKind::Transparent => {
                tag = Some(RX_TRANSP);
                if surf2 && r1_grid {
                    registry.set_flags(r1, CAN_REGION_BORDER);
                }
            }
            PathwayKind::Reflective => {
                tag = Some(RX_REFLEC);
                if surf2 && r1_grid {
                    registry.set_flags(r1, CAN_REGION_BORDER);
                }
            }
            PathwayKind::Absorbing
                if surf2
                    && path.products.is_empty()
                    && (r1_grid || registry.name(r1) == ALL_SURFACE_MOLECULES) =>
            {
                tag = Some(RX_ABSORB_REGION_BORDER);
                registry.set_flags(r1, CAN_REGION_BORDER);
            }
            _ => {}
        }

        match &path.rate {
            RateSpec::Constant(v) => raw_probs[k] = *v,
            RateSpec::FromFile(_) => {
                raw_probs[k] = 0.0;
                n_prob_t_rxns += 1;
            }
            RateSpec::Cooperative(_) => raw_probs[k] = 0.0,
        }
    }

    // Count non-recycled products and lay out the player blocks.
    let blocks = if tag.is_some() { 1 } else { declared };
    let mut product_idx = vec![0usize; blocks + 1];
    let mut total = n_reactants;
    for (k, path) in paths.iter().enumerate().take(blocks) {
        product_idx[k] = total;
        total += n_reactants + count_new_products(path);
    }
    product_idx[blocks] = total;

    let mut players: Vec<Option<SpeciesId>> = vec![None; total];
    let mut geometries: Vec<Orient> = vec![0; total];
    let has_complex = paths[0].is_complex_slots().iter().any(|&b| b);
    let mut is_complex = if has_complex {
        Some(vec![false; total])
    } else {
        None
    };

    // Triggering block: the head pathway's reactants stay put.
    for (i, r) in paths[0].reactants.iter().enumerate() {
        players[i] = Some(r.species);
        geometries[i] = r.orient;
        if let Some(ic) = is_complex.as_mut() {
            ic[i] = r.is_complex;
        }
    }

    // Merge time-varying rate files and fold pre-simulation entries.
    let mut tv: Vec<TimedRate> = Vec::new();
    if n_prob_t_rxns > 0 {
        for (k, path) in paths.iter().enumerate() {
            if let RateSpec::FromFile(file) = &path.rate {
                load_rate_file(file, k, env, &mut tv)?;
            }
        }
        tv.sort_by(|a, b| {
            a.time
                .partial_cmp(&b.time)
                .unwrap_or(Ordering::Equal)
                .then(a.path.cmp(&b.path))
        });
        let folded = tv.partition_point(|tr| tr.time <= 0.0);
        for tr in tv.drain(..folded) {
            raw_probs[tr.path] = tr.value;
        }
    }

    // Place products and compute their geometry codes.
    let mut max_num_surf_products = 0;
    for (k, path) in paths.iter().enumerate().take(blocks) {
        let base = product_idx[k];
        let mut recycled = [false; 3];
        let mut next_new = base + n_reactants;
        let mut placed: Vec<(usize, Orient)> = Vec::with_capacity(path.products.len());
        let mut num_surf_products = 0;

        for prod in &path.products {
            let mut slot = None;
            for (i, rec) in recycled.iter_mut().enumerate().take(path.reactants.len()) {
                if !*rec && path.reactants[i].species == prod.species {
                    *rec = true;
                    slot = Some(base + i);
                    break;
                }
            }
            let kk = slot.unwrap_or_else(|| {
                let s = next_new;
                next_new += 1;
                s
            });

            if registry.flags(prod.species) & ON_GRID != 0 {
                num_surf_products += 1;
            }
            players[kk] = Some(prod.species);
            if let Some(ic) = is_complex.as_mut() {
                ic[kk] = prod.is_complex;
            }
            geometries[kk] = product_geometry(prod.orient, path, &placed, n_reactants, base);
            placed.push((kk, prod.orient));
        }
        max_num_surf_products = max_num_surf_products.max(num_surf_products);
    }

    let rates: Option<Vec<Option<Arc<dyn MacroRate>>>> =
        if paths.iter().any(|p| p.rate.is_cooperative()) {
            Some(
                paths
                    .iter()
                    .map(|p| match &p.rate {
                        RateSpec::Cooperative(h) => Some(h.clone()),
                        _ => None,
                    })
                    .collect(),
            )
        } else {
            None
        };

    let info: Vec<PathwayInfo> = paths
        .iter()
        .take(blocks)
        .map(|p| PathwayInfo {
            count: 0,
            pathname: p.name.clone(),
        })
        .collect();

    let mut rx = ReactionSet {
        name,
        n_reactants,
        n_pathways: tag.unwrap_or(declared as i32),
        product_idx,
        cum_probs: raw_probs,
        rates,
        max_fixed_p: 0.0,
        min_noreaction_p: 0.0,
        pb_factor: 0.0,
        players,
        geometries,
        is_complex,
        n_occurred: 0,
        n_skipped: 0.0,
        prob_t: VecDeque::new(),
        info,
    };

    let pb_factor = pb.pb_factor(&rx, registry, max_num_surf_products);
    rx.pb_factor = pb_factor;
    scale_probabilities(&mut rx, env)?;
    for tr in &mut tv {
        tr.value *= pb_factor;
    }
    rx.prob_t = tv.into();

    // Cumulative probabilities and the no-reaction bounds.
    for k in 1..rx.cum_probs.len() {
        rx.cum_probs[k] += rx.cum_probs[k - 1];
    }
    if rx.n_pathways > 0 {
        rx.max_fixed_p = rx.cum_probs[rx.n_pathways as usize - 1];
    } else {
        rx.max_fixed_p = 1.0;
    }
    rx.min_noreaction_p = rx.max_fixed_p;
    if let Some(rates) = &rx.rates {
        for rate in rates.iter().flatten() {
            rx.min_noreaction_p += rate.max_rate(pb_factor);
        }
    }

    Ok(rx)
}

/// Products that do not recycle into a reactant slot.
fn count_new_products(path: &Pathway) -> usize {
    let mut recycled = [false; 3];
    let mut new_products = 0;
    for prod in &path.products {
        let mut matched = false;
        for (i, rec) in recycled.iter_mut().enumerate().take(path.reactants.len()) {
            if !*rec && path.reactants[i].species == prod.species {
                *rec = true;
                matched = true;
                break;
            }
        }
        if !matched {
            new_products += 1;
        }
    }
    new_products
}

/// Geometry code of one product.
///
/// ±(i+1) tracks reactant i's orientation class; ±(n_reactants + r + 1)
/// tracks the earlier product at block-relative slot r, so recycled
/// trackers occupy n+1..=2n and new-product trackers start at 2n+1.
/// The sign records orientation agreement; 0 means no participant
/// shares the product's class.
fn product_geometry(
    po: Orient,
    path: &Pathway,
    placed: &[(usize, Orient)],
    n_reactants: usize,
    base: usize,
) -> Orient {
    if po == 0 {
        return 0;
    }
    for (i, r) in path.reactants.iter().enumerate() {
        if r.orient != 0 && r.orient.abs() == po.abs() {
            let code = (i + 1) as Orient;
            return if po == r.orient { code } else { -code };
        }
    }
    for &(slot, orient) in placed {
        if orient != 0 && orient.abs() == po.abs() {
            let code = (n_reactants + (slot - base) + 1) as Orient;
            return if po == orient { code } else { -code };
        }
    }
    0
}

/// Convert raw rate constants into per-timestep probabilities.
fn scale_probabilities(rx: &mut ReactionSet, env: &ReactionEnv) -> Result<()> {
    let cooperative: Vec<bool> = (0..rx.cum_probs.len())
        .map(|k| {
            rx.rates
                .as_ref()
                .map_or(false, |rates| rates.get(k).map_or(false, |r| r.is_some()))
        })
        .collect();

    for k in 0..rx.cum_probs.len() {
        if cooperative[k] {
            continue;
        }
        let raw = rx.cum_probs[k];
        // The clamp sentinel stays out of probability space.
        if raw == GIGANTIC {
            continue;
        }
        let prob = raw * rx.pb_factor;
        rx.cum_probs[k] = prob;

        if env.notify.reaction_probabilities == NotifyLevel::Full
            && prob >= env.notify.reaction_prob_notify
        {
            log::info!("Probability {:.4e} set for {} pathway {}", prob, rx.name, k);
        }
        if prob > env.notify.reaction_prob_warn {
            match env.notify.high_reaction_prob {
                WarnPolicy::Cope => {}
                WarnPolicy::Warn => {
                    log::warn!("High probability {:.4e} for {} pathway {}", prob, rx.name, k);
                }
                WarnPolicy::Error => {
                    return Err(ReactError::ProbabilityOverflow(rx.name.clone()));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathway::PathwayBuilder;
    use mcell_core::{Molecule, SpeciesRegistry, IS_SURFACE, ON_GRID};
    use std::io::Write;

    fn registry() -> SpeciesRegistry {
        let mut reg = SpeciesRegistry::new();
        reg.insert("A", 0).unwrap();
        reg.insert("B", 0).unwrap();
        reg.insert("C", 0).unwrap();
        reg.insert("D", 0).unwrap();
        reg.insert("G", ON_GRID).unwrap();
        reg.insert("wall", IS_SURFACE).unwrap();
        reg
    }

    fn env() -> ReactionEnv {
        let mut e = ReactionEnv::default();
        e.time_unit = 1.0;
        e.vacancy_search_dist2 = 1.0;
        e
    }

    fn unit_pb() -> ConstantPbFactor {
        ConstantPbFactor(1.0)
    }

    #[derive(Debug)]
    struct TableRate(Vec<f64>);

    impl MacroRate for TableRate {
        fn lookup(&self, subunit: &Molecule, pb_factor: f64) -> f64 {
            self.0[subunit.subunit_state as usize] * pb_factor
        }
        fn max_rate(&self, pb_factor: f64) -> f64 {
            self.0.iter().cloned().fold(0.0, f64::max) * pb_factor
        }
    }

    #[test]
    fn test_simple_bimolecular_layout() {
        let mut reg = registry();
        let (a, b, c) = (
            reg.lookup("A").unwrap(),
            reg.lookup("B").unwrap(),
            reg.lookup("C").unwrap(),
        );
        let path = PathwayBuilder::new(&reg)
            .reactant(a, 0)
            .unwrap()
            .reactant(b, 0)
            .unwrap()
            .product(c, None)
            .rate(RateSpec::Constant(1e7))
            .build(&env())
            .unwrap();

        let out = compile_reaction(&mut reg, &env(), vec![path], &ConstantPbFactor(1e-8)).unwrap();
        assert_eq!(out.sets.len(), 1);
        let rx = &out.sets[0];

        assert_eq!(rx.n_pathways, 1);
        assert_eq!(rx.n_reactants, 2);
        assert_eq!(rx.product_idx, vec![2, 5]);
        assert_eq!(
            rx.players,
            vec![Some(a), Some(b), None, None, Some(c)]
        );
        assert_eq!(rx.geometries, vec![0, 0, 0, 0, 0]);
        assert!((rx.cum_probs[0] - 0.1).abs() < 1e-12);
        assert_eq!(rx.max_fixed_p, rx.cum_probs[0]);
        assert_eq!(rx.min_noreaction_p, rx.max_fixed_p);
    }

    #[test]
    fn test_recycling_layout() {
        let mut reg = registry();
        let (a, b, c) = (
            reg.lookup("A").unwrap(),
            reg.lookup("B").unwrap(),
            reg.lookup("C").unwrap(),
        );
        let path = PathwayBuilder::new(&reg)
            .reactant(a, 0)
            .unwrap()
            .reactant(b, 0)
            .unwrap()
            .product(a, None)
            .product(c, None)
            .rate(RateSpec::Constant(1.0))
            .build(&env())
            .unwrap();

        let out = compile_reaction(&mut reg, &env(), vec![path], &unit_pb()).unwrap();
        let rx = &out.sets[0];

        // Slot 0 of the pathway block holds the recycled A; the B slot
        // is empty; C is the one genuinely new player.
        assert_eq!(rx.product_idx, vec![2, 5]);
        assert_eq!(
            rx.players,
            vec![Some(a), Some(b), Some(a), None, Some(c)]
        );

        // Recycle accounting: products = recycled + new.
        let new = rx.product_idx[1] - rx.product_idx[0] - rx.n_reactants;
        assert_eq!(new, 1);
    }

    #[test]
    fn test_split_by_geometry() {
        let mut reg = registry();
        let (a, w) = (reg.lookup("A").unwrap(), reg.lookup("wall").unwrap());
        let make = |reg: &SpeciesRegistry, o1: Orient, o2: Orient, prod: SpeciesId| {
            PathwayBuilder::new(reg)
                .reactant(a, o1)
                .unwrap()
                .surface_class(w, o2)
                .unwrap()
                .product(prod, Some(o1))
                .rate(RateSpec::Constant(1.0))
                .build(&env())
                .unwrap()
        };
        let b = reg.lookup("B").unwrap();
        let c = reg.lookup("C").unwrap();

        // Parallel vs antiparallel reactants: two sibling sets.
        let paths = vec![make(&reg, 1, 1, b), make(&reg, 1, -1, c)];
        let out = compile_reaction(&mut reg, &env(), paths, &unit_pb()).unwrap();
        assert_eq!(out.sets.len(), 2);
        assert_eq!(out.sets[0].n_pathways, 1);
        assert_eq!(out.sets[1].n_pathways, 1);

        // Same geometry: one set, cumulative probabilities.
        let paths = vec![make(&reg, 1, 1, b), make(&reg, 1, 1, c)];
        let out = compile_reaction(&mut reg, &env(), paths, &unit_pb()).unwrap();
        assert_eq!(out.sets.len(), 1);
        let rx = &out.sets[0];
        assert_eq!(rx.n_pathways, 2);
        assert_eq!(rx.cum_probs, vec![1.0, 2.0]);
        assert_eq!(rx.max_fixed_p, 2.0);
    }

    #[test]
    fn test_duplicate_pathways_rejected() {
        let mut reg = registry();
        let (a, b, c) = (
            reg.lookup("A").unwrap(),
            reg.lookup("B").unwrap(),
            reg.lookup("C").unwrap(),
        );
        let make = |reg: &SpeciesRegistry| {
            PathwayBuilder::new(reg)
                .reactant(a, 0)
                .unwrap()
                .reactant(b, 0)
                .unwrap()
                .product(c, None)
                .rate(RateSpec::Constant(1.0))
                .build(&env())
                .unwrap()
        };
        let paths = vec![make(&reg), make(&reg)];
        assert!(matches!(
            compile_reaction(&mut reg, &env(), paths, &unit_pb()),
            Err(ReactError::DuplicateReaction(_))
        ));
    }

    #[test]
    fn test_duplicate_null_product_pathways_rejected() {
        let mut reg = registry();
        let a = reg.lookup("A").unwrap();
        let make = |reg: &SpeciesRegistry| {
            PathwayBuilder::new(reg)
                .reactant(a, 0)
                .unwrap()
                .rate(RateSpec::Constant(1.0))
                .build(&env())
                .unwrap()
        };
        let paths = vec![make(&reg), make(&reg)];
        assert!(matches!(
            compile_reaction(&mut reg, &env(), paths, &unit_pb()),
            Err(ReactError::DuplicateReaction(_))
        ));
    }

    #[test]
    fn test_distinct_signatures_coexist() {
        let mut reg = registry();
        let (a, b, c, d) = (
            reg.lookup("A").unwrap(),
            reg.lookup("B").unwrap(),
            reg.lookup("C").unwrap(),
            reg.lookup("D").unwrap(),
        );
        let make = |reg: &SpeciesRegistry, prod: SpeciesId| {
            PathwayBuilder::new(reg)
                .reactant(a, 0)
                .unwrap()
                .reactant(b, 0)
                .unwrap()
                .product(prod, None)
                .rate(RateSpec::Constant(2.0))
                .build(&env())
                .unwrap()
        };
        let paths = vec![make(&reg, d), make(&reg, c)];
        let out = compile_reaction(&mut reg, &env(), paths, &unit_pb()).unwrap();
        let rx = &out.sets[0];
        assert_eq!(rx.n_pathways, 2);
        // Pathways sort by product signature.
        assert_eq!(rx.players[rx.product_idx[0] + 2], Some(c));
        assert_eq!(rx.players[rx.product_idx[1] + 2], Some(d));
    }

    #[test]
    fn test_transparent_collapse_sets_region_border() {
        let mut reg = registry();
        let (g, w) = (reg.lookup("G").unwrap(), reg.lookup("wall").unwrap());
        let path = PathwayBuilder::new(&reg)
            .reactant(g, 1)
            .unwrap()
            .surface_class(w, 1)
            .unwrap()
            .kind(PathwayKind::Transparent)
            .rate(RateSpec::Constant(0.0))
            .build(&env())
            .unwrap();

        let out = compile_reaction(&mut reg, &env(), vec![path], &unit_pb()).unwrap();
        let rx = &out.sets[0];
        assert_eq!(rx.n_pathways, RX_TRANSP);
        assert!(rx.is_special());
        assert_eq!(rx.max_fixed_p, 1.0);
        assert_ne!(reg.flags(g) & CAN_REGION_BORDER, 0);
    }

    #[test]
    fn test_absorbing_grid_collapse() {
        let mut reg = registry();
        let (g, w) = (reg.lookup("G").unwrap(), reg.lookup("wall").unwrap());
        let path = PathwayBuilder::new(&reg)
            .reactant(g, 1)
            .unwrap()
            .surface_class(w, 1)
            .unwrap()
            .kind(PathwayKind::Absorbing)
            .rate(RateSpec::Constant(0.0))
            .build(&env())
            .unwrap();

        let out = compile_reaction(&mut reg, &env(), vec![path], &unit_pb()).unwrap();
        assert_eq!(out.sets[0].n_pathways, RX_ABSORB_REGION_BORDER);
    }

    #[test]
    fn test_concentration_clamp() {
        let mut reg = registry();
        let (a, w) = (reg.lookup("A").unwrap(), reg.lookup("wall").unwrap());
        let path = PathwayBuilder::new(&reg)
            .reactant(a, 1)
            .unwrap()
            .surface_class(w, -1)
            .unwrap()
            .kind(PathwayKind::ClampConc)
            .rate(RateSpec::Constant(1e-3))
            .build(&env())
            .unwrap();

        let out = compile_reaction(&mut reg, &env(), vec![path], &unit_pb()).unwrap();
        assert_eq!(out.clamps.len(), 1);
        let clamp = &out.clamps[0];
        assert_eq!(clamp.mol, a);
        assert_eq!(clamp.surf_class, w);
        assert_eq!(clamp.concentration, 1e-3);
        assert_eq!(clamp.orient, -1);

        // The pathway itself becomes always-on.
        assert_eq!(out.sets[0].cum_probs[0], GIGANTIC);
    }

    #[test]
    fn test_rate_file_folding() {
        let file = std::env::temp_dir().join(format!("mcell_compile_rates_{}", std::process::id()));
        let mut f = std::fs::File::create(&file).unwrap();
        writeln!(f, "0.0 0.1").unwrap();
        writeln!(f, "1.0 0.5").unwrap();
        writeln!(f, "2.0 1.0").unwrap();
        drop(f);

        let mut reg = registry();
        let (a, b) = (reg.lookup("A").unwrap(), reg.lookup("B").unwrap());
        let path = PathwayBuilder::new(&reg)
            .reactant(a, 0)
            .unwrap()
            .reactant(b, 0)
            .unwrap()
            .rate(RateSpec::FromFile(file.clone()))
            .build(&env())
            .unwrap();

        let out = compile_reaction(&mut reg, &env(), vec![path], &ConstantPbFactor(2.0)).unwrap();
        let rx = &out.sets[0];

        // The t=0 record folded into cum_probs (scaled); later records
        // wait in prob_t, also scaled, in time order.
        assert!((rx.cum_probs[0] - 0.2).abs() < 1e-12);
        assert_eq!(rx.prob_t.len(), 2);
        assert_eq!(rx.prob_t[0].time, 1.0);
        assert!((rx.prob_t[0].value - 1.0).abs() < 1e-12);
        assert_eq!(rx.prob_t[1].time, 2.0);
        assert!(rx.prob_t.iter().all(|tr| tr.time > 0.0));

        let _ = std::fs::remove_file(&file);
    }

    #[test]
    fn test_cooperative_pathway_bounds() {
        let mut reg = registry();
        let (a, b, c, d) = (
            reg.lookup("A").unwrap(),
            reg.lookup("B").unwrap(),
            reg.lookup("C").unwrap(),
            reg.lookup("D").unwrap(),
        );
        // Declare the cooperative pathway first to exercise the
        // fixed-first partition.
        let coop = PathwayBuilder::new(&reg)
            .complex_reactant(a, 0)
            .unwrap()
            .reactant(b, 0)
            .unwrap()
            .product(d, None)
            .rate(RateSpec::Cooperative(Arc::new(TableRate(vec![0.1, 0.3]))))
            .build(&env())
            .unwrap();
        let fixed = PathwayBuilder::new(&reg)
            .complex_reactant(a, 0)
            .unwrap()
            .reactant(b, 0)
            .unwrap()
            .product(c, None)
            .rate(RateSpec::Constant(0.2))
            .build(&env())
            .unwrap();

        let out = compile_reaction(&mut reg, &env(), vec![coop, fixed], &unit_pb()).unwrap();
        let rx = &out.sets[0];

        assert_eq!(rx.n_pathways, 2);
        let rates = rx.rates.as_ref().unwrap();
        assert!(rates[0].is_none());
        assert!(rates[1].is_some());
        assert_eq!(rx.cum_probs, vec![0.2, 0.2]);
        assert_eq!(rx.max_fixed_p, 0.2);
        assert!((rx.min_noreaction_p - 0.5).abs() < 1e-12);
        assert!(rx.is_complex.is_some());
    }

    #[test]
    fn test_product_geometry_codes() {
        let mut reg = registry();
        let (a, b, c, d, w) = (
            reg.lookup("A").unwrap(),
            reg.lookup("B").unwrap(),
            reg.lookup("C").unwrap(),
            reg.lookup("D").unwrap(),
            reg.lookup("wall").unwrap(),
        );
        // A{1} @ wall{1} -> B{-1} + C{2} + D{-2}
        // B tracks reactant A antiparallel; C starts a fresh class;
        // D tracks C antiparallel.
        let path = PathwayBuilder::new(&reg)
            .reactant(a, 1)
            .unwrap()
            .surface_class(w, 1)
            .unwrap()
            .product(b, Some(-1))
            .product(c, Some(2))
            .product(d, Some(-2))
            .rate(RateSpec::Constant(1.0))
            .build(&env())
            .unwrap();

        let out = compile_reaction(&mut reg, &env(), vec![path], &unit_pb()).unwrap();
        let rx = &out.sets[0];
        let base = rx.product_idx[0];

        // Products sorted by name: B, C, D at the three new slots.
        assert_eq!(rx.players[base + 2], Some(b));
        assert_eq!(rx.players[base + 3], Some(c));
        assert_eq!(rx.players[base + 4], Some(d));
        assert_eq!(rx.geometries[base + 2], -1);
        assert_eq!(rx.geometries[base + 3], 0);
        // D tracks the earlier product at block slot 3: 2 + 3 + 1 = 6,
        // antiparallel.
        assert_eq!(rx.geometries[base + 4], -6);
    }

    #[test]
    fn test_geometry_code_roundtrip() {
        // Decoding a code identifies the tracked participant; encoding
        // that relation again yields the same code.
        let mut reg = registry();
        let (a, b, c, w) = (
            reg.lookup("A").unwrap(),
            reg.lookup("B").unwrap(),
            reg.lookup("C").unwrap(),
            reg.lookup("wall").unwrap(),
        );
        let path = PathwayBuilder::new(&reg)
            .reactant(a, 1)
            .unwrap()
            .surface_class(w, -1)
            .unwrap()
            .product(b, Some(1))
            .product(c, Some(-1))
            .rate(RateSpec::Constant(1.0))
            .build(&env())
            .unwrap();

        let out = compile_reaction(&mut reg, &env(), vec![path], &unit_pb()).unwrap();
        let rx = &out.sets[0];
        let base = rx.product_idx[0];
        let n = rx.n_reactants;

        for kk in base + n..rx.product_idx[1] {
            let code = rx.geometries[kk];
            if code == 0 {
                continue;
            }
            let m = code.unsigned_abs() as usize;
            // Codes 1..=n name a reactant slot; larger codes name a
            // block slot, both with the same m - 1 / m - n - 1 decode.
            let tracked = if m <= n {
                rx.geometries[m - 1]
            } else {
                rx.geometries[base + (m - n - 1)]
            };
            assert_ne!(tracked, 0);
        }
        // B is parallel to reactant A; C is antiparallel to A.
        assert_eq!(rx.geometries[base + 2], 1);
        assert_eq!(rx.geometries[base + 3], -1);
    }

    #[test]
    fn test_high_probability_policy() {
        let mut reg = registry();
        let (a, b, c) = (
            reg.lookup("A").unwrap(),
            reg.lookup("B").unwrap(),
            reg.lookup("C").unwrap(),
        );
        let make = |reg: &SpeciesRegistry| {
            PathwayBuilder::new(reg)
                .reactant(a, 0)
                .unwrap()
                .reactant(b, 0)
                .unwrap()
                .product(c, None)
                .rate(RateSpec::Constant(1.5))
                .build(&env())
                .unwrap()
        };

        let mut e = env();
        e.notify.high_reaction_prob = WarnPolicy::Error;
        let pathways1 = vec![make(&reg)];
        assert!(matches!(
            compile_reaction(&mut reg, &e, pathways1, &unit_pb()),
            Err(ReactError::ProbabilityOverflow(_))
        ));

        e.notify.high_reaction_prob = WarnPolicy::Cope;
        let pathways2 = vec![make(&reg)];
        assert!(compile_reaction(&mut reg, &e, pathways2, &unit_pb()).is_ok());
    }

    #[test]
    fn test_record_occurrence() {
        let mut reg = registry();
        let (a, b, c) = (
            reg.lookup("A").unwrap(),
            reg.lookup("B").unwrap(),
            reg.lookup("C").unwrap(),
        );
        let path = PathwayBuilder::new(&reg)
            .reactant(a, 0)
            .unwrap()
            .reactant(b, 0)
            .unwrap()
            .product(c, None)
            .rate(RateSpec::Constant(1.0))
            .named("bind")
            .build(&env())
            .unwrap();
        let mut out = compile_reaction(&mut reg, &env(), vec![path], &unit_pb()).unwrap();
        let rx = &mut out.sets[0];

        rx.record_occurrence(0);
        rx.record_occurrence(0);
        assert_eq!(rx.n_occurred, 2);
        assert_eq!(rx.info[0].count, 2);
        assert_eq!(rx.info[0].pathname.as_deref(), Some("bind"));
    }
}
