//! # MCell-React CLI
//!
//! Compile reaction networks and poke at the stochastic selectors.
//!
//! ## Quick Start
//!
//! ```bash
//! # Interactive mode (bundled demo networks)
//! mcellr
//!
//! # Compile a network and dump the reaction tables
//! mcellr compile network.json
//!
//! # Run sampling trials against a compiled reaction
//! mcellr sample network.json --trials 100000 --scaling 1.0
//!
//! # Inspect a time-varying rate file
//! mcellr rates rates.txt --time-unit 1e-6
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use dialoguer::{theme::ColorfulTheme, Confirm, FuzzySelect};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::path::PathBuf;

use mcell_core::{SpeciesRegistry, IS_SURFACE, ON_GRID};
use mcell_react::{
    compile_reaction, load_rate_file, test_bimolecular, which_unimolecular, ConstantPbFactor,
    PathwayBuilder, PathwayKind, RateSpec, ReactionCatalog, ReactionEnv, Select,
};

static DNA: Emoji<'_, '_> = Emoji("🧬 ", "");
static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
static CHART: Emoji<'_, '_> = Emoji("📈 ", "");
static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR] ");

/// MCell reaction engine revival
#[derive(Parser)]
#[command(name = "mcellr")]
#[command(version = "0.1.0")]
#[command(about = "Compile and sample stochastic reaction networks", long_about = LONG_ABOUT)]
#[command(after_help = AFTER_HELP)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

const LONG_ABOUT: &str = r#"
Revives the reaction subsystem of MCell, the Monte Carlo simulator of
cellular microphysiology. Declares species and reaction pathways from a
JSON network file, compiles them into reaction tables, and runs the
stochastic selectors against them.

Use 'mcellr' without arguments for interactive mode.
"#;

const AFTER_HELP: &str = r#"
EXAMPLES:
    mcellr                              Interactive mode
    mcellr compile network.json         Dump compiled reaction tables
    mcellr sample network.json -n 50000 Sampling trials
    mcellr rates rates.txt              Parse a rate file
"#;

#[derive(Subcommand)]
enum Commands {
    /// Compile a network file and print the reaction tables
    Compile {
        /// JSON network description
        model: PathBuf,
    },
    /// Compile, then draw reaction outcomes and report frequencies
    Sample {
        /// JSON network description
        model: PathBuf,
        /// Reaction to sample (reactant tuple name); default: first
        #[arg(short, long)]
        reaction: Option<String>,
        /// Number of trials
        #[arg(short = 'n', long, default_value_t = 100_000)]
        trials: u64,
        /// Per-encounter probability budget
        #[arg(short, long, default_value_t = 1.0)]
        scaling: f64,
        /// RNG seed
        #[arg(long, default_value_t = 1)]
        seed: u64,
    },
    /// Parse a time-varying rate file and print the schedule
    Rates {
        /// Two-column time/rate file
        file: PathBuf,
        /// Seconds per internal timestep
        #[arg(long, default_value_t = 1.0)]
        time_unit: f64,
    },
}

// ============================================================================
// NETWORK FILE FORMAT
// ============================================================================

#[derive(Debug, Deserialize)]
struct ModelFile {
    #[serde(default = "default_time_unit")]
    time_unit: f64,
    #[serde(default = "default_pb_factor")]
    pb_factor: f64,
    #[serde(default = "default_vacancy")]
    vacancy_search_dist2: f64,
    species: Vec<SpeciesDecl>,
    reactions: Vec<ReactionDecl>,
}

fn default_time_unit() -> f64 {
    1.0
}

fn default_pb_factor() -> f64 {
    1.0
}

fn default_vacancy() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct SpeciesDecl {
    name: String,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReactionDecl {
    reactants: Vec<ParticipantDecl>,
    #[serde(default)]
    surface_class: Option<ParticipantDecl>,
    #[serde(default)]
    products: Vec<ParticipantDecl>,
    #[serde(default)]
    rate: Option<f64>,
    #[serde(default)]
    rate_file: Option<PathBuf>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ParticipantDecl {
    species: String,
    #[serde(default)]
    orient: Option<i16>,
}

fn species_flags(decl: &SpeciesDecl) -> Result<u32> {
    let mut flags = 0;
    for f in &decl.flags {
        match f.as_str() {
            "surface" => flags |= IS_SURFACE,
            "grid" => flags |= ON_GRID,
            other => bail!("unknown species flag '{}' on {}", other, decl.name),
        }
    }
    Ok(flags)
}

fn pathway_kind(kind: &Option<String>) -> Result<PathwayKind> {
    Ok(match kind.as_deref() {
        None | Some("normal") => PathwayKind::Normal,
        Some("transparent") => PathwayKind::Transparent,
        Some("reflective") => PathwayKind::Reflective,
        Some("absorbing") => PathwayKind::Absorbing,
        Some("clamp") => PathwayKind::ClampConc,
        Some(other) => bail!("unknown pathway kind '{}'", other),
    })
}

/// Build the registry, compile every declared reaction, and fill a
/// catalog. Reactions are grouped by their alphabetized reactant tuple
/// so multiple declarations over the same tuple compile together.
fn build_catalog(model: &ModelFile) -> Result<(SpeciesRegistry, ReactionEnv, ReactionCatalog)> {
    let mut registry = SpeciesRegistry::new();
    for decl in &model.species {
        registry.insert(&decl.name, species_flags(decl)?)?;
    }

    let mut env = ReactionEnv::default();
    env.time_unit = model.time_unit;
    env.vacancy_search_dist2 = model.vacancy_search_dist2;

    // Group declarations by reactant tuple.
    let mut groups: Vec<(String, Vec<mcell_react::Pathway>)> = Vec::new();
    for decl in &model.reactions {
        let mut builder = PathwayBuilder::new(&registry);
        for r in &decl.reactants {
            builder = builder.reactant(registry.lookup(&r.species)?, r.orient.unwrap_or(0))?;
        }
        if let Some(s) = &decl.surface_class {
            builder = builder.surface_class(registry.lookup(&s.species)?, s.orient.unwrap_or(0))?;
        }
        for p in &decl.products {
            builder = builder.product(registry.lookup(&p.species)?, p.orient);
        }
        builder = builder.kind(pathway_kind(&decl.kind)?);
        builder = match (&decl.rate, &decl.rate_file) {
            (Some(v), None) => builder.rate(RateSpec::Constant(*v)),
            (None, Some(f)) => builder.rate(RateSpec::FromFile(f.clone())),
            (Some(_), Some(_)) => bail!("reaction declares both rate and rate_file"),
            (None, None) => builder,
        };
        if let Some(name) = &decl.name {
            builder = builder.named(name);
        }
        let path = builder.build(&env)?;

        let key = path.reaction_name(&registry);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, paths)) => paths.push(path),
            None => groups.push((key, vec![path])),
        }
    }

    let pb = ConstantPbFactor(model.pb_factor);
    let mut catalog = ReactionCatalog::new();
    for (_, paths) in groups {
        catalog.insert(compile_reaction(&mut registry, &env, paths, &pb)?);
    }
    Ok((registry, env, catalog))
}

fn load_model(path: &PathBuf) -> Result<ModelFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read model file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("cannot parse {}", path.display()))
}

// ============================================================================
// COMMANDS
// ============================================================================

fn cmd_compile(model_path: &PathBuf) -> Result<()> {
    let model = load_model(model_path)?;
    let (registry, _env, catalog) = build_catalog(&model)?;

    println!(
        "{}{} species, {} compiled reaction set(s)\n",
        DNA,
        registry.len().to_string().bold(),
        catalog.len().to_string().bold()
    );

    for rx in catalog.iter() {
        println!("{}", rx.name.bold().cyan());
        if rx.is_special() {
            println!("  special surface interaction (tag {})", rx.n_pathways);
        }
        println!(
            "  reactants: {}    pb_factor: {:.4e}",
            rx.reactants_label(&registry),
            rx.pb_factor
        );
        for j in 0..rx.num_pathways() {
            let prob = if j == 0 {
                rx.cum_probs[0]
            } else {
                rx.cum_probs[j] - rx.cum_probs[j - 1]
            };
            let products = rx.products_label(j, &registry);
            let label = rx.info[j].pathname.as_deref().unwrap_or("-");
            println!(
                "  [{}] p = {:<12.4e} cum = {:<12.4e} -> {}  ({})",
                j,
                prob,
                rx.cum_probs[j],
                if products.is_empty() {
                    "NULL".to_string()
                } else {
                    products
                },
                label
            );
        }
        println!(
            "  max_fixed_p = {:.4e}   min_noreaction_p = {:.4e}",
            rx.max_fixed_p, rx.min_noreaction_p
        );
        if !rx.prob_t.is_empty() {
            println!("  pending rate changes:");
            for tr in &rx.prob_t {
                println!("    t = {:<10.4} path {} -> {:.4e}", tr.time, tr.path, tr.value);
            }
        }
        println!();
    }

    if !catalog.clamps.is_empty() {
        println!("{}", "concentration clamps".bold());
        for clamp in &catalog.clamps {
            println!(
                "  {} @ {} = {:.4e} (orient {})",
                registry.name(clamp.mol),
                registry.name(clamp.surf_class),
                clamp.concentration,
                clamp.orient
            );
        }
    }

    println!("{}compile finished", CHECK);
    Ok(())
}

fn cmd_sample(
    model_path: &PathBuf,
    reaction: Option<&str>,
    trials: u64,
    scaling: f64,
    seed: u64,
) -> Result<()> {
    let model = load_model(model_path)?;
    let (_registry, _env, mut catalog) = build_catalog(&model)?;
    if catalog.is_empty() {
        bail!("no reactions in the model");
    }

    let idx = match reaction {
        Some(name) => (0..catalog.len())
            .find(|&i| catalog.get(i).name == name)
            .ok_or_else(|| anyhow!("no reaction set named '{}'", name))?,
        None => 0,
    };
    let rx = catalog.get_mut(idx);
    if rx.is_special() {
        bail!("'{}' is a special surface interaction; nothing to sample", rx.name);
    }

    println!(
        "{}sampling {} for {} trials (scaling {}, seed {})",
        CHART,
        rx.name.bold().cyan(),
        trials,
        scaling,
        seed
    );

    let bar = ProgressBar::new(trials);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len}")
            .expect("static template"),
    );

    let mut rng = SmallRng::seed_from_u64(seed);
    let n = rx.num_pathways();
    let mut hits = vec![0u64; n];
    let mut misses = 0u64;
    let unimolecular = rx.n_reactants == 1;

    for _ in 0..trials {
        if unimolecular {
            hits[which_unimolecular(rx, None, &mut rng)] += 1;
        } else {
            match test_bimolecular(rx, scaling, 0.0, None, None, &mut rng) {
                Select::Path(k) => {
                    hits[k] += 1;
                    rx.record_occurrence(k);
                }
                Select::None => misses += 1,
                Select::Special(_) => unreachable!("non-special set"),
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    println!("\n  {:<8} {:>12} {:>12} {:>12}", "pathway", "observed", "expected", "count");
    let total = rx.cum_probs[n - 1];
    for k in 0..n {
        let span = if k == 0 {
            rx.cum_probs[0]
        } else {
            rx.cum_probs[k] - rx.cum_probs[k - 1]
        };
        let expected = if unimolecular {
            span / total
        } else {
            span / scaling.max(total)
        };
        println!(
            "  {:<8} {:>12.5} {:>12.5} {:>12}",
            k,
            hits[k] as f64 / trials as f64,
            expected,
            hits[k]
        );
    }
    if !unimolecular {
        println!(
            "  {:<8} {:>12.5} {:>25}",
            "none",
            misses as f64 / trials as f64,
            ""
        );
        if rx.n_skipped > 0.0 {
            println!("  skipped reaction mass: {:.4}", rx.n_skipped);
        }
    }

    println!("{}sampling finished", CHECK);
    Ok(())
}

fn cmd_rates(file: &PathBuf, time_unit: f64) -> Result<()> {
    let mut env = ReactionEnv::default();
    env.time_unit = time_unit;

    let mut schedule = Vec::new();
    load_rate_file(file, 0, &env, &mut schedule)?;

    println!(
        "{}{} record(s) from {}",
        GEAR,
        schedule.len().to_string().bold(),
        file.display()
    );
    for tr in &schedule {
        println!("  t = {:<14.6} rate = {:.6e}", tr.time, tr.value);
    }
    Ok(())
}

// ============================================================================
// INTERACTIVE MODE
// ============================================================================

const DEMO_BINDING: &str = r#"{
  "species": [{"name": "A"}, {"name": "B"}, {"name": "C"}, {"name": "D"}],
  "reactions": [
    {"reactants": [{"species": "A"}, {"species": "B"}],
     "products": [{"species": "C"}], "rate": 0.2, "name": "make_c"},
    {"reactants": [{"species": "A"}, {"species": "B"}],
     "products": [{"species": "D"}], "rate": 0.3, "name": "make_d"}
  ]
}"#;

const DEMO_SURFACE: &str = r#"{
  "species": [{"name": "L", "flags": []},
              {"name": "R", "flags": ["grid"]},
              {"name": "LR", "flags": ["grid"]},
              {"name": "membrane", "flags": ["surface"]}],
  "reactions": [
    {"reactants": [{"species": "L", "orient": 1}, {"species": "R", "orient": 1}],
     "products": [{"species": "LR", "orient": 1}], "rate": 0.4, "name": "bind"},
    {"reactants": [{"species": "L", "orient": 1}],
     "surface_class": {"species": "membrane", "orient": 1},
     "kind": "transparent", "rate": 0.0}
  ]
}"#;

fn interactive() -> Result<()> {
    println!("{}MCell reaction engine demos\n", DNA);

    let demos = ["binding: A + B -> C | D", "surface: ligand/receptor on a membrane"];
    let choice = FuzzySelect::with_theme(&ColorfulTheme::default())
        .with_prompt("Pick a demo network")
        .items(&demos)
        .default(0)
        .interact()?;

    let text = match choice {
        0 => DEMO_BINDING,
        _ => DEMO_SURFACE,
    };
    let tmp = std::env::temp_dir().join(format!("mcellr_demo_{}.json", std::process::id()));
    std::fs::write(&tmp, text)?;

    let result = (|| -> Result<()> {
        cmd_compile(&tmp)?;
        if Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Run sampling trials?")
            .default(true)
            .interact()?
        {
            cmd_sample(&tmp, None, 100_000, 1.0, 1)?;
        }
        Ok(())
    })();
    let _ = std::fs::remove_file(&tmp);
    result
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let result = match &cli.command {
        None => interactive(),
        Some(Commands::Compile { model }) => cmd_compile(model),
        Some(Commands::Sample {
            model,
            reaction,
            trials,
            scaling,
            seed,
        }) => cmd_sample(model, reaction.as_deref(), *trials, *scaling, *seed),
        Some(Commands::Rates { file, time_unit }) => cmd_rates(file, *time_unit),
    };

    if let Err(err) = &result {
        eprintln!("{}{}", CROSS, err.to_string().red());
    }
    result
}
