//! Time-varying probability updates.
//!
//! Reactions with file-driven rates carry a sorted `prob_t` schedule.
//! Before using such a reaction at simulation time `t`, the scheduler
//! calls [`update_probs`] to fold every change that has come due into
//! the cumulative probability table.

use crate::compile::ReactionSet;
use crate::{NotifyLevel, ReactError, ReactionEnv, Result, WarnPolicy};
use mcell_core::SpeciesRegistry;

/// Advance `rx`'s probabilities past time `t` (internal units).
///
/// Returns whether any per-pathway probability exceeded 1.0; the caller
/// owns the latched overflow flag. Not meant for rapidly changing rates
/// on many pathways at once; the schedule is consumed entry by entry.
pub fn update_probs(
    rx: &mut ReactionSet,
    t: f64,
    registry: &SpeciesRegistry,
    env: &ReactionEnv,
) -> Result<bool> {
    let n = rx.num_pathways();
    let mut did_something = false;
    let mut overflow = false;

    while rx.prob_t.front().map_or(false, |tv| tv.time < t) {
        let tv = match rx.prob_t.pop_front() {
            Some(tv) => tv,
            None => break,
        };
        let j = tv.path;

        let dprob = if j == 0 {
            tv.value - rx.cum_probs[0]
        } else {
            tv.value - (rx.cum_probs[j] - rx.cum_probs[j - 1])
        };

        for k in j..n {
            rx.cum_probs[k] += dprob;
        }
        rx.max_fixed_p += dprob;
        rx.min_noreaction_p += dprob;
        did_something = true;

        let new_prob = if j == 0 {
            rx.cum_probs[0]
        } else {
            rx.cum_probs[j] - rx.cum_probs[j - 1]
        };
        if new_prob > 1.0 {
            overflow = true;
        }

        if env.notify.time_varying_reactions == NotifyLevel::Full
            && rx.cum_probs[j] >= env.notify.reaction_prob_notify
        {
            log::info!(
                "Probability {:.4e} set for {} -> {}",
                new_prob,
                rx.reactants_label(registry),
                rx.products_label(j, registry)
            );
        }
    }

    if !did_something {
        return Ok(false);
    }

    if rx.cum_probs[n - 1] > env.notify.reaction_prob_warn {
        match env.notify.high_reaction_prob {
            WarnPolicy::Cope => {}
            WarnPolicy::Warn => {
                log::warn!(
                    "High total probability {:.4e} for {}",
                    rx.cum_probs[n - 1],
                    rx.reactants_label(registry)
                );
            }
            WarnPolicy::Error => {
                return Err(ReactError::ProbabilityOverflow(rx.name.clone()));
            }
        }
    }

    Ok(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{compile_reaction, ConstantPbFactor};
    use crate::pathway::{PathwayBuilder, RateSpec};
    use mcell_core::SpeciesRegistry;
    use std::io::Write;

    fn setup(contents: &str, tag: &str) -> (SpeciesRegistry, ReactionEnv, ReactionSet) {
        let file =
            std::env::temp_dir().join(format!("mcell_update_{}_{}", std::process::id(), tag));
        let mut f = std::fs::File::create(&file).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        drop(f);

        let mut reg = SpeciesRegistry::new();
        let a = reg.insert("A", 0).unwrap();
        let b = reg.insert("B", 0).unwrap();
        let mut env = ReactionEnv::default();
        env.time_unit = 1.0;
        env.vacancy_search_dist2 = 1.0;

        let path = PathwayBuilder::new(&reg)
            .reactant(a, 0)
            .unwrap()
            .reactant(b, 0)
            .unwrap()
            .rate(RateSpec::FromFile(file.clone()))
            .build(&env)
            .unwrap();
        let mut out = compile_reaction(&mut reg, &env, vec![path], &ConstantPbFactor(1.0)).unwrap();
        let _ = std::fs::remove_file(&file);
        (reg, env, out.sets.remove(0))
    }

    #[test]
    fn test_updater_folds_due_entries() {
        // Rates 0.1 / 0.5 / 1.0 taking effect at t = 0 / 1 / 2.
        let (reg, env, mut rx) = setup("0.0 0.1\n1.0 0.5\n2.0 1.0\n", "fold");
        assert!((rx.cum_probs[0] - 0.1).abs() < 1e-12);
        assert_eq!(rx.prob_t.len(), 2);

        // At t = 1.5 the t=1 entry folds, the t=2 entry stays.
        let overflow = update_probs(&mut rx, 1.5, &reg, &env).unwrap();
        assert!(!overflow);
        assert!((rx.cum_probs[0] - 0.5).abs() < 1e-12);
        assert!((rx.max_fixed_p - 0.5).abs() < 1e-12);
        assert!((rx.min_noreaction_p - 0.5).abs() < 1e-12);
        assert_eq!(rx.prob_t.len(), 1);
        assert_eq!(rx.prob_t[0].time, 2.0);

        // Same time again: nothing left to do.
        assert!(!update_probs(&mut rx, 1.5, &reg, &env).unwrap());
        assert_eq!(rx.prob_t.len(), 1);

        // Entries at exactly t do not fold yet.
        assert!(!update_probs(&mut rx, 2.0, &reg, &env).unwrap());
        assert_eq!(rx.prob_t.len(), 1);

        assert!(!update_probs(&mut rx, 2.5, &reg, &env).unwrap());
        assert!((rx.cum_probs[0] - 1.0).abs() < 1e-12);
        assert!(rx.prob_t.is_empty());
    }

    #[test]
    fn test_updater_overflow_latch() {
        let (reg, env, mut rx) = setup("0.0 0.1\n1.0 2.5\n", "latch");
        let overflow = update_probs(&mut rx, 2.0, &reg, &env).unwrap();
        assert!(overflow);
        assert!((rx.cum_probs[0] - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_updater_warn_policy_error() {
        let (reg, mut env, mut rx) = setup("0.0 0.1\n1.0 1.5\n", "policy");
        env.notify.high_reaction_prob = WarnPolicy::Error;
        assert!(matches!(
            update_probs(&mut rx, 2.0, &reg, &env),
            Err(ReactError::ProbabilityOverflow(_))
        ));
    }

    #[test]
    fn test_updater_multiple_pathways_shift_suffix() {
        // Two pathways; the schedule drives pathway 0 only, so the
        // cumulative tail shifts with it.
        let file = std::env::temp_dir().join(format!("mcell_update_multi_{}", std::process::id()));
        let mut f = std::fs::File::create(&file).unwrap();
        f.write_all(b"0.0 0.2\n1.0 0.4\n").unwrap();
        drop(f);

        let mut reg = SpeciesRegistry::new();
        let a = reg.insert("A", 0).unwrap();
        let b = reg.insert("B", 0).unwrap();
        let c = reg.insert("C", 0).unwrap();
        let mut env = ReactionEnv::default();
        env.time_unit = 1.0;
        env.vacancy_search_dist2 = 1.0;

        // File-driven pathway ends up first: its signature C sorts
        // before the constant pathway's D.
        let d = reg.insert("D", 0).unwrap();
        let varying = PathwayBuilder::new(&reg)
            .reactant(a, 0)
            .unwrap()
            .reactant(b, 0)
            .unwrap()
            .product(c, None)
            .rate(RateSpec::FromFile(file.clone()))
            .build(&env)
            .unwrap();
        let fixed = PathwayBuilder::new(&reg)
            .reactant(a, 0)
            .unwrap()
            .reactant(b, 0)
            .unwrap()
            .product(d, None)
            .rate(RateSpec::Constant(0.3))
            .build(&env)
            .unwrap();

        let mut out =
            compile_reaction(&mut reg, &env, vec![varying, fixed], &ConstantPbFactor(1.0))
                .unwrap();
        let rx = &mut out.sets[0];
        let _ = std::fs::remove_file(&file);

        assert_eq!(rx.cum_probs, vec![0.2, 0.5]);

        update_probs(rx, 1.5, &reg, &env).unwrap();
        assert!((rx.cum_probs[0] - 0.4).abs() < 1e-12);
        assert!((rx.cum_probs[1] - 0.7).abs() < 1e-12);
        assert!((rx.max_fixed_p - 0.7).abs() < 1e-12);
    }
}
