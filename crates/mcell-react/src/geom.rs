//! Orientation-class equivalence predicates.
//!
//! These decide when two declared pathways describe the same reactant
//! geometry and therefore belong in the same compiled reaction set. The
//! three-reactant table with identical reactants is preserved
//! case-for-case from the original engine.

use crate::pathway::Pathway;
use mcell_core::Orient;

/// Equivalent geometry for a pair of reactants from each pathway.
///
/// True when both pairs are parallel in a shared class, both are
/// antiparallel in a shared class, or both are independent (different
/// classes, or a pair in the zero class matching a split pair).
pub fn equivalent_geometry_for_two_reactants(
    o1a: Orient,
    o1b: Orient,
    o2a: Orient,
    o2b: Orient,
) -> bool {
    // Same class, parallel in both pathways.
    if o1a == o1b && o2a == o2b {
        return true;
    }
    // Same class, opposite in both pathways.
    if o1a == -o1b && o2a == -o2b {
        return true;
    }
    // Not in the same orientation class.
    if o1a.abs() != o1b.abs() && (o2a.abs() != o2b.abs() || (o2a == 0 && o2b == 0)) {
        return true;
    }
    if o2a.abs() != o2b.abs() && (o1a.abs() != o1b.abs() || (o1a == 0 && o1b == 0)) {
        return true;
    }
    false
}

/// Equivalent geometry between two whole pathways with `n` reactants.
pub fn equivalent_geometry(p1: &Pathway, p2: &Pathway, n: usize) -> bool {
    if p1.is_complex_slots() != p2.is_complex_slots() {
        return false;
    }

    if n < 2 {
        // All one-reactant pathway geometries are equivalent.
        return true;
    }

    let o11 = p1.reactants[0].orient;
    let o12 = p1.reactants[1].orient;
    let o21 = p2.reactants[0].orient;
    let o22 = p2.reactants[1].orient;

    if n < 3 {
        return equivalent_geometry_for_two_reactants(o11, o12, o21, o22);
    }

    let o13 = p1.reactants[2].orient;
    let o23 = p2.reactants[2].orient;

    // Special case: two identical reactants (A + A + surface).
    if p1.reactants[0].species == p1.reactants[1].species
        && p2.reactants[0].species == p2.reactants[1].species
    {
        let mut mols_parallel_1: Option<bool> = None;
        let mut mols_parallel_2: Option<bool> = None;
        let mut mol_surf_parallel_1: Option<bool> = None;
        let mut mol_surf_parallel_2: Option<bool> = None;

        if o11.abs() == o12.abs() && o11.abs() == o13.abs() {
            // Case 1: both molecules and the surface share one class.
            let mp1 = o11 == o12;
            mols_parallel_1 = Some(mp1);
            mol_surf_parallel_1 = Some(if mp1 {
                !(o11 == -o13 || o12 == -o13)
            } else {
                false
            });

            if o21.abs() == o22.abs() && o21.abs() == o23.abs() {
                let mp2 = o21 == o22;
                mols_parallel_2 = Some(mp2);
                mol_surf_parallel_2 = Some(if mp2 {
                    !(o21 == -o23 || o22 == -o23)
                } else {
                    false
                });
            }

            if mols_parallel_1 == mols_parallel_2 && mol_surf_parallel_1 == mol_surf_parallel_2 {
                return true;
            }
        } else if o11.abs() == o13.abs() || o12.abs() == o13.abs() {
            // Case 2: one molecule shares a class with the surface.
            mol_surf_parallel_1 = Some(o11 == o13 || o12 == o13);

            // Pathway 2 must not be in case 1, and must share a
            // molecule-surface class of its own.
            if (o21.abs() != o23.abs() || o22.abs() != o23.abs())
                && (o21.abs() == o23.abs() || o22.abs() == o23.abs())
            {
                mol_surf_parallel_2 = Some(o21 == o23 || o22 == o23);
            }

            if mol_surf_parallel_1 == mol_surf_parallel_2 {
                return true;
            }
        } else if o11.abs() == o12.abs() && o11.abs() != o13.abs() {
            // Case 3: the molecules share a class, the surface does not.
            mols_parallel_1 = Some(o11 == o12);

            if o21.abs() == o22.abs() && o21.abs() != o23.abs() {
                mols_parallel_2 = Some(o21 == o22);
            }

            if mols_parallel_1 == mols_parallel_2 {
                return true;
            }
        } else if o11.abs() != o13.abs() && o12.abs() != o13.abs() && o11.abs() != o12.abs() {
            // Case 4: three independent classes.
            if o21.abs() != o23.abs() && o22.abs() != o23.abs() && o21.abs() != o22.abs() {
                return true;
            }
        }

        false
    } else {
        // Distinct reactants: all three pairings must agree.
        equivalent_geometry_for_two_reactants(o11, o12, o21, o22)
            && equivalent_geometry_for_two_reactants(o12, o13, o22, o23)
            && equivalent_geometry_for_two_reactants(o11, o13, o21, o23)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathway::{Pathway, PathwayKind, RateSpec, Reactant};
    use mcell_core::SpeciesId;

    fn path(orients: &[Orient]) -> Pathway {
        path_of(&[0, 1, 2], orients)
    }

    fn path_of(species: &[u32], orients: &[Orient]) -> Pathway {
        Pathway {
            reactants: orients
                .iter()
                .zip(species)
                .map(|(&o, &s)| Reactant {
                    species: SpeciesId(s),
                    orient: o,
                    is_complex: false,
                })
                .collect(),
            products: vec![],
            kind: PathwayKind::Normal,
            rate: RateSpec::Constant(1.0),
            name: None,
            prod_signature: None,
        }
    }

    #[test]
    fn test_pair_parallel_and_antiparallel() {
        assert!(equivalent_geometry_for_two_reactants(1, 1, 2, 2));
        assert!(equivalent_geometry_for_two_reactants(1, -1, 2, -2));
        assert!(!equivalent_geometry_for_two_reactants(1, 1, 1, -1));
    }

    #[test]
    fn test_pair_independent() {
        // Different classes on both sides.
        assert!(equivalent_geometry_for_two_reactants(1, 2, 3, 4));
        // Independent paired with the double-zero class.
        assert!(equivalent_geometry_for_two_reactants(1, 2, 0, 0));
        assert!(equivalent_geometry_for_two_reactants(0, 0, 1, 2));
        // Same-class pair against an independent pair.
        assert!(!equivalent_geometry_for_two_reactants(1, 1, 1, 2));
    }

    #[test]
    fn test_one_reactant_always_equivalent() {
        assert!(equivalent_geometry(&path(&[1]), &path(&[-1]), 1));
    }

    #[test]
    fn test_two_reactants() {
        assert!(equivalent_geometry(&path(&[1, 1]), &path(&[2, 2]), 2));
        assert!(!equivalent_geometry(&path(&[1, 1]), &path(&[1, -1]), 2));
    }

    #[test]
    fn test_complex_slots_must_match() {
        let p1 = path(&[1, 1]);
        let mut p2 = path(&[1, 1]);
        p2.reactants[0].is_complex = true;
        assert!(!equivalent_geometry(&p1, &p2, 2));
    }

    #[test]
    fn test_three_identical_one_class() {
        // Both molecules parallel, both parallel to the surface.
        let p1 = path_of(&[0, 0, 9], &[1, 1, 1]);
        let p2 = path_of(&[0, 0, 9], &[2, 2, 2]);
        assert!(equivalent_geometry(&p1, &p2, 3));

        // Molecules parallel but surface flipped in one pathway only.
        let p3 = path_of(&[0, 0, 9], &[1, 1, -1]);
        assert!(!equivalent_geometry(&p1, &p3, 3));
        // Flipped surface on both sides.
        let p4 = path_of(&[0, 0, 9], &[2, 2, -2]);
        assert!(equivalent_geometry(&p3, &p4, 3));
    }

    #[test]
    fn test_three_identical_mol_surface_class() {
        // One molecule co-classed with the surface, parallel.
        let p1 = path_of(&[0, 0, 9], &[1, 2, 1]);
        let p2 = path_of(&[0, 0, 9], &[3, 5, 3]);
        assert!(equivalent_geometry(&p1, &p2, 3));

        // Parallel vs antiparallel mol-surface relation.
        let p3 = path_of(&[0, 0, 9], &[-3, 5, 3]);
        assert!(!equivalent_geometry(&p1, &p3, 3));

        // Pathway 2 fully co-classed (case 1) never matches case 2.
        let p4 = path_of(&[0, 0, 9], &[3, 3, 3]);
        assert!(!equivalent_geometry(&p1, &p4, 3));
    }

    #[test]
    fn test_three_identical_mols_only_class() {
        let p1 = path_of(&[0, 0, 9], &[1, -1, 2]);
        let p2 = path_of(&[0, 0, 9], &[4, -4, 7]);
        assert!(equivalent_geometry(&p1, &p2, 3));
        let p3 = path_of(&[0, 0, 9], &[4, 4, 7]);
        assert!(!equivalent_geometry(&p1, &p3, 3));
    }

    #[test]
    fn test_three_identical_all_independent() {
        let p1 = path_of(&[0, 0, 9], &[1, 2, 3]);
        let p2 = path_of(&[0, 0, 9], &[4, 5, 6]);
        assert!(equivalent_geometry(&p1, &p2, 3));
        let p3 = path_of(&[0, 0, 9], &[4, 4, 6]);
        assert!(!equivalent_geometry(&p1, &p3, 3));
    }

    #[test]
    fn test_three_distinct_requires_all_pairings() {
        let p1 = path_of(&[0, 1, 9], &[1, 1, 1]);
        let p2 = path_of(&[0, 1, 9], &[2, 2, 2]);
        assert!(equivalent_geometry(&p1, &p2, 3));
        let p3 = path_of(&[0, 1, 9], &[2, 2, -2]);
        assert!(!equivalent_geometry(&p1, &p3, 3));
    }
}
