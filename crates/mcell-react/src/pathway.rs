//! Declared reaction pathways.
//!
//! A [`Pathway`] is one user-declared reaction rule: up to three
//! oriented reactants, a product list, a forward rate, and an optional
//! name for counting. [`PathwayBuilder`] reproduces the declaration
//! checks of the original engine; [`normalize_pathways`] canonicalizes
//! reactant order before compilation.

use crate::{ReactError, ReactionEnv, Result};
use mcell_core::{Molecule, Orient, SpeciesId, SpeciesRegistry, IS_SURFACE, NOT_FREE, ON_GRID};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

// ============================================================================
// RATES
// ============================================================================

/// Rate of a cooperative (macromolecular) pathway, dependent on the
/// neighbor-subunit state of a complex.
pub trait MacroRate: fmt::Debug + Send + Sync {
    /// Per-timestep probability for the given subunit.
    fn lookup(&self, subunit: &Molecule, pb_factor: f64) -> f64;

    /// Largest probability over all subunit states.
    fn max_rate(&self, pb_factor: f64) -> f64;
}

/// Forward rate of a declared pathway.
#[derive(Debug, Clone)]
pub enum RateSpec {
    /// Fixed rate constant.
    Constant(f64),
    /// Two-column time/rate file, piecewise constant.
    FromFile(PathBuf),
    /// Subunit-state dependent rate.
    Cooperative(Arc<dyn MacroRate>),
}

impl RateSpec {
    pub fn is_cooperative(&self) -> bool {
        matches!(self, RateSpec::Cooperative(_))
    }
}

/// What kind of rule the pathway expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathwayKind {
    Normal,
    /// Molecules pass through the surface.
    Transparent,
    /// Molecules bounce off the surface.
    Reflective,
    /// The surface consumes the molecule.
    Absorbing,
    /// Pseudo-reaction holding a concentration fixed at a surface.
    ClampConc,
}

impl PathwayKind {
    pub fn is_special(self) -> bool {
        self != PathwayKind::Normal
    }
}

// ============================================================================
// PATHWAY
// ============================================================================

#[derive(Debug, Clone)]
pub struct Reactant {
    pub species: SpeciesId,
    pub orient: Orient,
    pub is_complex: bool,
}

#[derive(Debug, Clone)]
pub struct Product {
    pub species: SpeciesId,
    pub orient: Orient,
    pub is_complex: bool,
}

/// One declared reaction rule, ready for compilation.
#[derive(Debug, Clone)]
pub struct Pathway {
    pub reactants: Vec<Reactant>,
    pub products: Vec<Product>,
    pub kind: PathwayKind,
    pub rate: RateSpec,
    pub name: Option<String>,
    /// Sorted product-name signature; `None` for `A -> NULL` pathways.
    pub prod_signature: Option<String>,
}

impl Pathway {
    /// `is_complex` bits of the three reactant slots, padded with false.
    pub fn is_complex_slots(&self) -> [bool; 3] {
        let mut slots = [false; 3];
        for (slot, r) in slots.iter_mut().zip(&self.reactants) {
            *slot = r.is_complex;
        }
        slots
    }

    /// Sort the product list and derive the signature string.
    ///
    /// Products order: complex subunits first, then name ascending,
    /// then orientation descending. The sorted order is what the
    /// compiler later treats as product appearance order.
    pub fn set_product_signature(&mut self, registry: &SpeciesRegistry) {
        if self.products.is_empty() {
            self.prod_signature = None;
            return;
        }
        self.products.sort_by(|a, b| {
            b.is_complex
                .cmp(&a.is_complex)
                .then_with(|| registry.compare(a.species, b.species))
                .then_with(|| b.orient.cmp(&a.orient))
        });
        let names: Vec<&str> = self
            .products
            .iter()
            .map(|p| registry.name(p.species))
            .collect();
        self.prod_signature = Some(names.join("+"));
    }

    /// Alphabetized reactant tuple, e.g. `A+B+wall` or `(A)+B` for a
    /// complex subunit. Used as the catalog key and in diagnostics.
    pub fn reaction_name(&self, registry: &SpeciesRegistry) -> String {
        let mut reagents: Vec<&Reactant> = self.reactants.iter().collect();
        reagents.sort_by(|a, b| {
            b.is_complex
                .cmp(&a.is_complex)
                .then_with(|| registry.compare(a.species, b.species))
        });
        reagents
            .iter()
            .map(|r| {
                if r.is_complex {
                    format!("({})", registry.name(r.species))
                } else {
                    registry.name(r.species).to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("+")
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Assembles a [`Pathway`] from declaration parts, applying the same
/// validity checks the original parser-side extraction performed.
pub struct PathwayBuilder<'a> {
    registry: &'a SpeciesRegistry,
    reactants: Vec<Reactant>,
    products: Vec<(SpeciesId, Option<Orient>, bool)>,
    catalyst: Option<(SpeciesId, Orient)>,
    kind: PathwayKind,
    rate: Option<RateSpec>,
    name: Option<String>,
    num_vol_mols: usize,
    num_grid_mols: usize,
    num_surfaces: usize,
}

impl<'a> PathwayBuilder<'a> {
    pub fn new(registry: &'a SpeciesRegistry) -> Self {
        Self {
            registry,
            reactants: Vec::new(),
            products: Vec::new(),
            catalyst: None,
            kind: PathwayKind::Normal,
            rate: None,
            name: None,
            num_vol_mols: 0,
            num_grid_mols: 0,
            num_surfaces: 0,
        }
    }

    fn push_reactant(&mut self, species: SpeciesId, orient: Orient, is_complex: bool) -> Result<()> {
        if self.reactants.len() >= 3 {
            return Err(ReactError::TooManyReactants);
        }
        let flags = self.registry.flags(species);
        if flags & NOT_FREE == 0 {
            self.num_vol_mols += 1;
        }
        if flags & ON_GRID != 0 {
            self.num_grid_mols += 1;
        }
        self.reactants.push(Reactant {
            species,
            orient,
            is_complex,
        });
        Ok(())
    }

    pub fn reactant(mut self, species: SpeciesId, orient: Orient) -> Result<Self> {
        self.push_reactant(species, orient, false)?;
        Ok(self)
    }

    /// A reactant that is a subunit of a molecular complex.
    pub fn complex_reactant(mut self, species: SpeciesId, orient: Orient) -> Result<Self> {
        self.push_reactant(species, orient, true)?;
        Ok(self)
    }

    /// A catalytic reactant: consumed and re-emitted unchanged.
    pub fn catalyst(mut self, species: SpeciesId, orient: Orient) -> Result<Self> {
        if self.reactants.is_empty() {
            return Err(ReactError::CatalystInvalid(
                "catalyst cannot occupy the first reactant slot",
            ));
        }
        if self.registry.flags(species) & IS_SURFACE != 0 {
            return Err(ReactError::CatalystInvalid(
                "a surface class may not appear inside a catalytic arrow",
            ));
        }
        self.push_reactant(species, orient, false)?;
        self.catalyst = Some((species, orient));
        Ok(self)
    }

    /// The reaction surface class; always becomes the last reactant.
    pub fn surface_class(mut self, species: SpeciesId, orient: Orient) -> Result<Self> {
        if self.reactants.is_empty() {
            return Err(ReactError::SurfaceWithoutMolecule);
        }
        if self.reactants.len() >= 3 {
            return Err(ReactError::TooManyReactants);
        }
        self.num_surfaces += 1;
        self.reactants.push(Reactant {
            species,
            orient,
            is_complex: false,
        });
        Ok(self)
    }

    /// A product; `orient` of `None` means no orientation was declared.
    pub fn product(mut self, species: SpeciesId, orient: Option<Orient>) -> Self {
        self.products.push((species, orient, false));
        self
    }

    pub fn complex_product(mut self, species: SpeciesId, orient: Option<Orient>) -> Self {
        self.products.push((species, orient, true));
        self
    }

    pub fn rate(mut self, rate: RateSpec) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn kind(mut self, kind: PathwayKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Validate and produce the pathway.
    pub fn build(self, env: &ReactionEnv) -> Result<Pathway> {
        let registry = self.registry;
        if self.reactants.is_empty() {
            return Err(ReactError::EmptyReaction);
        }
        let rate = self.rate.ok_or(ReactError::RateUnset)?;

        // A reaction is all-3d when nothing in it can orient it.
        let all_3d = self.num_surfaces == 0
            && self
                .reactants
                .iter()
                .all(|r| registry.flags(r.species) & NOT_FREE == 0);

        let mut products: Vec<Product> = Vec::with_capacity(self.products.len() + 1);
        let mut num_surf_products = 0;
        for &(species, orient, is_complex) in &self.products {
            let flags = registry.flags(species);
            if flags & IS_SURFACE != 0 {
                return Err(ReactError::SurfaceProduct(
                    registry.name(species).to_string(),
                ));
            }
            if all_3d {
                if flags & NOT_FREE != 0 {
                    return Err(ReactError::VolumeOnlySurfaceProduct(
                        registry.name(species).to_string(),
                    ));
                }
                if orient.is_some() {
                    return Err(ReactError::OrientedVolumeProduct(
                        registry.name(species).to_string(),
                    ));
                }
            } else if orient.is_none() {
                return Err(ReactError::UnorientedProduct(
                    registry.name(species).to_string(),
                ));
            }
            if flags & ON_GRID != 0 {
                num_surf_products += 1;
            }
            products.push(Product {
                species,
                orient: orient.unwrap_or(0),
                is_complex,
            });
        }

        // The catalyst reappears on the product side.
        if let Some((species, orient)) = self.catalyst {
            if registry.flags(species) & ON_GRID != 0 {
                num_surf_products += 1;
            }
            products.push(Product {
                species,
                orient: if all_3d { 0 } else { orient },
                is_complex: false,
            });
        }

        let mut path = Pathway {
            reactants: self.reactants,
            products,
            kind: self.kind,
            rate,
            name: self.name,
            prod_signature: None,
        };

        // With no room to search for vacancies, a reaction that nets new
        // grid molecules can never place them. One volume molecule
        // hitting the surface and producing a single grid molecule is
        // the allowed exception.
        if env.vacancy_search_dist2 == 0.0
            && num_surf_products > self.num_grid_mols
            && !(self.num_grid_mols == 0 && self.num_vol_mols == 1 && num_surf_products == 1)
        {
            return Err(ReactError::InsufficientGrid(path.reaction_name(registry)));
        }

        path.set_product_signature(registry);
        Ok(path)
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Canonicalize reactant order across a declared pathway list and
/// reject duplicate special pathways.
///
/// Surface classes move to the last reactant slot; remaining reactants
/// sort by name ascending, breaking name ties by orientation
/// descending. Normalizing an already-normalized list is a no-op.
pub fn normalize_pathways(pathways: &mut [Pathway], registry: &SpeciesRegistry) -> Result<()> {
    check_duplicate_special(pathways, registry)?;

    for path in pathways.iter_mut() {
        let n = path.reactants.len();
        if n < 2 {
            continue;
        }

        // Bubble a surface class into the highest slot.
        if registry.flags(path.reactants[0].species) & IS_SURFACE != 0 {
            path.reactants.swap(0, 1);
        }
        if n > 2 && registry.flags(path.reactants[1].species) & IS_SURFACE != 0 {
            path.reactants.swap(1, 2);
        }

        // Alphabetize the molecule prefix; is_complex bits travel with
        // their reactants.
        let mols = if registry.flags(path.reactants[n - 1].species) & IS_SURFACE != 0 {
            n - 1
        } else {
            n
        };
        path.reactants[..mols].sort_by(|a, b| {
            registry
                .compare(a.species, b.species)
                .then_with(|| b.orient.cmp(&a.orient))
        });
    }
    Ok(())
}

/// Adjacent special pathways of the same kind with matching (or
/// unoriented) surface orientations are exact duplicates.
fn check_duplicate_special(pathways: &[Pathway], registry: &SpeciesRegistry) -> Result<()> {
    for pair in pathways.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.kind == b.kind
            && matches!(
                a.kind,
                PathwayKind::Transparent | PathwayKind::Reflective | PathwayKind::Absorbing
            )
        {
            let oa = a.reactants.get(1).map_or(0, |r| r.orient);
            let ob = b.reactants.get(1).map_or(0, |r| r.orient);
            if oa == ob || oa == 0 || ob == 0 {
                let surf = a.reactants.get(1).unwrap_or(&a.reactants[0]).species;
                return Err(ReactError::DuplicateSpecial(
                    registry.name(surf).to_string(),
                ));
            }
        }
    }
    Ok(())
}
