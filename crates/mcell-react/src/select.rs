//! Stochastic reaction selection.
//!
//! Every selector consumes exactly one uniform double per call and is
//! deterministic given the RNG state. Selection mutates nothing on a
//! [`ReactionSet`] except the `n_skipped` counter, which absorbs the
//! statistical weight of reactions the per-encounter budget could not
//! accommodate.

use crate::compile::ReactionSet;
use crate::{RX_ABSORB_REGION_BORDER, RX_NO_RX, RX_REFLEC, RX_SPECIAL, RX_TRANSP};
use mcell_core::{Molecule, EPS_C, FOREVER, GIGANTIC};
use rand::Rng;

// ============================================================================
// OUTCOMES
// ============================================================================

/// Special surface interactions carried through from compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialTag {
    Transparent,
    Reflective,
    AbsorbRegionBorder,
}

impl SpecialTag {
    pub fn to_wire(self) -> i32 {
        match self {
            SpecialTag::Transparent => RX_TRANSP,
            SpecialTag::Reflective => RX_REFLEC,
            SpecialTag::AbsorbRegionBorder => RX_ABSORB_REGION_BORDER,
        }
    }

    pub fn from_n_pathways(n: i32) -> Option<Self> {
        match n {
            RX_TRANSP => Some(SpecialTag::Transparent),
            RX_REFLEC => Some(SpecialTag::Reflective),
            RX_ABSORB_REGION_BORDER => Some(SpecialTag::AbsorbRegionBorder),
            _ => None,
        }
    }
}

/// Outcome of a single-reaction selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Select {
    /// Nothing happens this encounter.
    None,
    /// Pathway index within the reaction set.
    Path(usize),
    Special(SpecialTag),
}

impl Select {
    pub fn to_wire(self) -> i32 {
        match self {
            Select::None => RX_NO_RX,
            Select::Path(k) => k as i32,
            Select::Special(tag) => tag.to_wire(),
        }
    }
}

/// Outcome of a selection over competing reactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMany {
    None,
    Hit { rx: usize, path: usize },
    Special { rx: usize, tag: SpecialTag },
}

// ============================================================================
// SEARCH
// ============================================================================

/// Smallest index whose `a[i] * mult` is at least `m`.
pub fn binary_search_double(a: &[f64], m: f64, max_idx: usize, mult: f64) -> usize {
    let mut min_idx = 0;
    let mut max_idx = max_idx;

    while max_idx - min_idx > 1 {
        let mid_idx = (max_idx + min_idx) / 2;
        if m > a[mid_idx] * mult {
            min_idx = mid_idx;
        } else {
            max_idx = mid_idx;
        }
    }

    if m > a[min_idx] * mult {
        max_idx
    } else {
        min_idx
    }
}

/// Cumulative probabilities with cooperative entries evaluated for a
/// specific subunit. Fixed entries match `cum_probs`; the final entry
/// bounds the reacting region of probability space.
fn get_varying_cum_probs(rx: &ReactionSet, subunit: &Molecule) -> Option<Vec<f64>> {
    let rates = rx.rates.as_ref()?;
    let n = rx.num_pathways();
    let mut out = vec![0.0; n];
    let mut accum = 0.0;
    for i in 0..n {
        match &rates[i] {
            None => {
                accum = rx.cum_probs[i];
            }
            Some(rate) => {
                accum += rate.lookup(subunit, rx.pb_factor);
            }
        }
        out[i] = accum;
    }
    Some(out)
}

// ============================================================================
// UNIMOLECULAR
// ============================================================================

/// Timesteps until the molecule's next unimolecular reaction.
pub fn timeof_unimolecular<R: Rng>(rx: &ReactionSet, a: Option<&Molecule>, rng: &mut R) -> f64 {
    let mut k_tot = rx.max_fixed_p;
    if let (Some(rates), Some(a)) = (rx.rates.as_ref(), a) {
        for rate in rates.iter().rev() {
            match rate {
                Some(rate) => k_tot += rate.lookup(a, rx.pb_factor),
                None => break,
            }
        }
    }

    let p: f64 = rng.gen();
    if k_tot <= 0.0 || p < EPS_C {
        return FOREVER;
    }
    -p.ln() / k_tot
}

/// Which unimolecular pathway fires (one must).
pub fn which_unimolecular<R: Rng>(rx: &ReactionSet, a: Option<&Molecule>, rng: &mut R) -> usize {
    let n = rx.num_pathways();
    if n == 1 {
        return 0;
    }

    let max = n - 1;
    let p: f64 = rng.gen();
    match a.and_then(|a| get_varying_cum_probs(rx, a)) {
        None => binary_search_double(&rx.cum_probs, p * rx.cum_probs[max], max, 1.0),
        Some(varying) => binary_search_double(&varying, p * varying[max], max, 1.0),
    }
}

/// Pick among competing unimolecular reactions; `None` only when the
/// array is empty.
pub fn test_many_unimol<R: Rng>(
    rx: &[&ReactionSet],
    a: Option<&Molecule>,
    rng: &mut R,
) -> Option<usize> {
    let n = rx.len();
    if n == 0 {
        return None;
    }
    if n == 1 {
        return Some(0);
    }

    let mut rxp = vec![0.0; n];
    let mut accum = 0.0;
    for (i, rx) in rx.iter().enumerate() {
        accum += rx.max_fixed_p;
        if let (Some(rates), Some(a)) = (rx.rates.as_ref(), a) {
            for rate in rates.iter().rev() {
                match rate {
                    Some(rate) => accum += rate.lookup(a, rx.pb_factor),
                    None => break,
                }
            }
        }
        rxp[i] = accum;
    }

    let p = rng.gen::<f64>() * rxp[n - 1];
    Some(binary_search_double(&rxp, p, n - 1, 1.0))
}

// ============================================================================
// BIMOLECULAR
// ============================================================================

/// Decide the outcome of one bimolecular encounter.
///
/// `scaling` is the per-encounter probability budget (interaction area
/// and multi-timestep correction); `local_prob_factor` is positive only
/// for reactions between two surface molecules. When the available
/// probability mass exceeds the budget, the overflow accumulates in
/// `n_skipped` and a pathway is still returned.
pub fn test_bimolecular<R: Rng>(
    rx: &mut ReactionSet,
    scaling: f64,
    local_prob_factor: f64,
    a1: Option<&Molecule>,
    a2: Option<&Molecule>,
    rng: &mut R,
) -> Select {
    let lp = if local_prob_factor > 0.0 {
        local_prob_factor
    } else {
        1.0
    };
    let min_noreaction_p = rx.min_noreaction_p * lp;
    let max_fixed_p = rx.max_fixed_p * lp;

    // A complex subunit makes the cooperative rates relevant.
    let subunit = if rx.rates.is_some() {
        match (a1, a2) {
            (Some(a), _) if a.is_complex_subunit() => Some(a),
            (_, Some(b)) if b.is_complex_subunit() => Some(b),
            _ => None,
        }
    } else {
        None
    };

    let mut varying: Option<Vec<f64>> = None;
    let p;
    if min_noreaction_p < scaling {
        // The budget definitely suffices; scale the draw instead of the
        // probability table.
        p = rng.gen::<f64>() * scaling;
        if p >= min_noreaction_p {
            return Select::None;
        }
    } else {
        // May or may not fit; pin down the actual upper bound.
        let max_p = match subunit {
            Some(sub) => {
                varying = get_varying_cum_probs(rx, sub);
                match &varying {
                    Some(v) => v[v.len() - 1] * lp,
                    None => rx.cum_probs[rx.num_pathways() - 1] * lp,
                }
            }
            None => rx.cum_probs[rx.num_pathways() - 1] * lp,
        };

        if max_p >= scaling {
            // Cannot scale enough; accrue the missed reactions.
            if scaling == 0.0 {
                rx.n_skipped += GIGANTIC;
            } else {
                rx.n_skipped += max_p / scaling - 1.0;
            }
            p = rng.gen::<f64>() * max_p;
        } else {
            p = rng.gen::<f64>() * scaling;
            if p >= max_p {
                return Select::None;
            }
        }
    }

    let max = rx.num_pathways() - 1;
    if subunit.is_none() || p < max_fixed_p {
        return Select::Path(binary_search_double(&rx.cum_probs, p, max, lp));
    }

    if varying.is_none() {
        varying = subunit.and_then(|sub| get_varying_cum_probs(rx, sub));
    }
    match varying {
        None => Select::Path(binary_search_double(&rx.cum_probs, p, max, lp)),
        Some(varying) => {
            if p > varying[max] * lp {
                return Select::None;
            }
            Select::Path(binary_search_double(&varying, p, max, lp))
        }
    }
}

/// Decide among `n` competing bimolecular reactions with one draw.
///
/// `scaling` holds one budget per reaction. When `all_neighbors` is set
/// (reactions between surface molecules) `local_prob_factor` must be
/// positive and applies to every reaction. `complex_limits[c]` is the
/// exclusive upper reaction index covered by `complexes[c]`.
pub fn test_many_bimolecular<R: Rng>(
    rx: &mut [&mut ReactionSet],
    scaling: &[f64],
    local_prob_factor: f64,
    complexes: &[&Molecule],
    complex_limits: &[usize],
    rng: &mut R,
    all_neighbors: bool,
) -> SelectMany {
    let n = rx.len();
    debug_assert!(!all_neighbors || local_prob_factor > 0.0);

    if n == 1 {
        return match test_bimolecular(
            rx[0],
            scaling[0],
            local_prob_factor,
            complexes.first().copied(),
            None,
            rng,
        ) {
            Select::None => SelectMany::None,
            Select::Path(path) => SelectMany::Hit { rx: 0, path },
            Select::Special(tag) => SelectMany::Special { rx: 0, tag },
        };
    }

    let lp = if all_neighbors && local_prob_factor > 0.0 {
        local_prob_factor
    } else {
        1.0
    };

    let has_coop_rate = rx.iter().any(|rx| rx.rates.is_some());
    let nmax = if has_coop_rate { 2 * n } else { n };

    // Fixed probability mass of each reaction, then (if needed) the
    // maximum cooperative mass, all in budget units.
    let mut rxp = vec![0.0; nmax];
    let mut accum = 0.0;
    for i in 0..n {
        accum += rx[i].max_fixed_p * lp / scaling[i];
        rxp[i] = accum;
    }
    if has_coop_rate {
        for i in 0..n {
            accum += (rx[i].min_noreaction_p - rx[i].max_fixed_p) * lp / scaling[i];
            rxp[n + i] = accum;
        }
    }

    let mut p: f64 = rng.gen();

    if has_coop_rate {
        if p > rxp[nmax - 1] {
            return SelectMany::None;
        }

        if rxp[nmax - 1] > 1.0 {
            // Distribute the overflow over the reactions in proportion
            // to their share of the total mass.
            let f = rxp[nmax - 1] - 1.0;
            for i in 0..n {
                let fixed_span = rxp[i] - if i > 0 { rxp[i - 1] } else { 0.0 };
                let coop_span = rxp[n + i] - rxp[n + i - 1];
                rx[i].n_skipped += f * (fixed_span + coop_span) / rxp[nmax - 1];
            }
            p *= rxp[nmax - 1];

            let i = binary_search_double(&rxp, p, nmax - 1, 1.0);
            if i > 0 {
                p -= rxp[i - 1];
            }
            if i >= n {
                return cooperative_walk(rx, scaling, complexes, complex_limits, i - n, p);
            }
            p *= scaling[i];
            let m = binary_search_double(&rx[i].cum_probs, p, rx[i].num_pathways() - 1, lp);
            return SelectMany::Hit { rx: i, path: m };
        }

        if p <= rxp[n - 1] {
            // Fixed region of probability space.
            let i = binary_search_double(&rxp[..n], p, n - 1, 1.0);
            if i > 0 {
                p -= rxp[i - 1];
            }
            p *= scaling[i];
            let m = binary_search_double(&rx[i].cum_probs, p, rx[i].num_pathways() - 1, lp);
            return SelectMany::Hit { rx: i, path: m };
        }

        // Cooperative region: the bounds are upper bounds, so walk the
        // actual subunit-dependent rates.
        p -= rxp[n - 1];
        let mut cx_no = 0;
        for i in 0..n {
            while i >= complex_limits[cx_no] {
                cx_no += 1;
            }
            let rates = match rx[i].rates.as_ref() {
                Some(rates) => rates,
                None => continue,
            };
            for (n_path, rate) in rates.iter().enumerate() {
                if let Some(rate) = rate {
                    let prob = rate.lookup(complexes[cx_no], rx[i].pb_factor) / scaling[i];
                    if p > prob {
                        p -= prob;
                    } else {
                        return SelectMany::Hit { rx: i, path: n_path };
                    }
                }
            }
        }
        SelectMany::None
    } else {
        if rxp[n - 1] > 1.0 {
            let f = rxp[n - 1] - 1.0;
            for i in 0..n {
                let span = rxp[i] - if i > 0 { rxp[i - 1] } else { 0.0 };
                rx[i].n_skipped += f * span / rxp[n - 1];
            }
            p *= rxp[n - 1];
        } else if p > rxp[n - 1] {
            return SelectMany::None;
        }

        let i = binary_search_double(&rxp, p, n - 1, 1.0);
        if i > 0 {
            p -= rxp[i - 1];
        }
        p *= scaling[i];
        let m = binary_search_double(&rx[i].cum_probs, p, rx[i].num_pathways() - 1, lp);
        SelectMany::Hit { rx: i, path: m }
    }
}

/// Walk reaction `i`'s cooperative pathways with the residual draw.
fn cooperative_walk(
    rx: &[&mut ReactionSet],
    scaling: &[f64],
    complexes: &[&Molecule],
    complex_limits: &[usize],
    i: usize,
    mut p: f64,
) -> SelectMany {
    let mut cx_no = 0;
    while i >= complex_limits[cx_no] {
        cx_no += 1;
    }
    if let Some(rates) = rx[i].rates.as_ref() {
        for (n_path, rate) in rates.iter().enumerate() {
            if let Some(rate) = rate {
                let prob = rate.lookup(complexes[cx_no], rx[i].pb_factor) / scaling[i];
                if p > prob {
                    p -= prob;
                } else {
                    return SelectMany::Hit { rx: i, path: n_path };
                }
            }
        }
    }
    SelectMany::None
}

// ============================================================================
// SURFACE INTERSECTION
// ============================================================================

/// Decide what a ray hitting a reactive surface does.
pub fn test_intersect<R: Rng>(rx: &mut ReactionSet, scaling: f64, rng: &mut R) -> Select {
    if rx.n_pathways <= RX_SPECIAL {
        // Unreachable fallback: tagged sets always carry a known tag.
        return match SpecialTag::from_n_pathways(rx.n_pathways) {
            Some(tag) => Select::Special(tag),
            None => Select::None,
        };
    }

    let max = rx.num_pathways() - 1;
    let total = rx.cum_probs[max];

    let p;
    if total > scaling {
        if scaling <= 0.0 {
            rx.n_skipped += GIGANTIC;
        } else {
            rx.n_skipped += total / scaling - 1.0;
        }
        p = rng.gen::<f64>() * total;
    } else {
        p = rng.gen::<f64>() * scaling;
        if p > total {
            return Select::None;
        }
    }

    Select::Path(binary_search_double(&rx.cum_probs, p, max, 1.0))
}

/// Decide among `n` competing surface reactions with one draw.
pub fn test_many_intersect<R: Rng>(
    rx: &mut [&mut ReactionSet],
    scaling: f64,
    rng: &mut R,
) -> SelectMany {
    let n = rx.len();
    if n == 1 {
        return match test_intersect(rx[0], scaling, rng) {
            Select::None => SelectMany::None,
            Select::Path(path) => SelectMany::Hit { rx: 0, path },
            Select::Special(tag) => SelectMany::Special { rx: 0, tag },
        };
    }

    let mut rxp = vec![0.0; n];
    let mut accum = 0.0;
    for (i, rx) in rx.iter().enumerate() {
        accum += rx.max_fixed_p / scaling;
        rxp[i] = accum;
    }

    let mut p: f64;
    if rxp[n - 1] > 1.0 {
        let f = rxp[n - 1] - 1.0;
        for i in 0..n {
            let span = rxp[i] - if i > 0 { rxp[i - 1] } else { 0.0 };
            rx[i].n_skipped += f * span / rxp[n - 1];
        }
        p = rng.gen::<f64>() * rxp[n - 1];
    } else {
        p = rng.gen();
        if p > rxp[n - 1] {
            return SelectMany::None;
        }
    }

    let i = binary_search_double(&rxp, p, n - 1, 1.0);
    if i > 0 {
        p -= rxp[i - 1];
    }
    p *= scaling;
    let m = binary_search_double(&rx[i].cum_probs, p, rx[i].num_pathways() - 1, 1.0);
    SelectMany::Hit { rx: i, path: m }
}

// ============================================================================
// TRIMOLECULAR (ALL NEIGHBORS)
// ============================================================================

/// Decide among reactions of three surface molecules, each with its own
/// budget and local probability factor.
pub fn test_many_reactions_all_neighbors<R: Rng>(
    rx: &mut [&mut ReactionSet],
    scaling: &[f64],
    local_prob_factor: &[f64],
    rng: &mut R,
) -> SelectMany {
    let n = rx.len();
    if n == 1 {
        return match test_bimolecular(rx[0], scaling[0], local_prob_factor[0], None, None, rng) {
            Select::None => SelectMany::None,
            Select::Path(path) => SelectMany::Hit { rx: 0, path },
            Select::Special(tag) => SelectMany::Special { rx: 0, tag },
        };
    }

    let lp = |i: usize| {
        if local_prob_factor[i] > 0.0 {
            local_prob_factor[i]
        } else {
            1.0
        }
    };

    let mut rxp = vec![0.0; n];
    let mut accum = 0.0;
    for i in 0..n {
        accum += rx[i].max_fixed_p * lp(i) / scaling[i];
        rxp[i] = accum;
    }

    let mut p: f64;
    if rxp[n - 1] > 1.0 {
        let f = rxp[n - 1] - 1.0;
        for i in 0..n {
            let span = rxp[i] - if i > 0 { rxp[i - 1] } else { 0.0 };
            rx[i].n_skipped += f * span / rxp[n - 1];
        }
        p = rng.gen::<f64>() * rxp[n - 1];
    } else {
        p = rng.gen();
        if p > rxp[n - 1] {
            return SelectMany::None;
        }
    }

    let i = binary_search_double(&rxp, p, n - 1, 1.0);
    if i > 0 {
        p -= rxp[i - 1];
    }
    p *= scaling[i];
    let m = binary_search_double(&rx[i].cum_probs, p, rx[i].num_pathways() - 1, lp(i));
    SelectMany::Hit { rx: i, path: m }
}
