//! Time-varying reaction rate schedules.
//!
//! Rate files are plain text, one record per line: a time in seconds
//! and the rate that takes effect at that time. Lines that do not start
//! with a number are ignored, so headers and comments need no special
//! syntax.

use crate::{ReactError, ReactionEnv, Result, WarnPolicy};
use mcell_core::{Orient, SpeciesId};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Accepted column separators.
const RATE_SEPARATORS: &[char] = &[' ', '\t', ',', ';', '\u{c}', '\n', '\r', '\u{b}'];

/// Characters that may begin a numeric record.
const FIRST_DIGIT: &[char] = &['+', '-', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];

/// One pending probability change: at `time` (internal units), pathway
/// `path` switches to `value`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedRate {
    pub time: f64,
    pub path: usize,
    pub value: f64,
}

/// Read a two-column time/rate file for pathway `path`.
///
/// Times convert from seconds to internal units by `env.time_unit`.
/// Negative rates follow the `neg_reaction` policy: clamped to zero
/// (silently or with a warning) or rejected. Parsed records append to
/// `out` unsorted; the assembler merges and sorts across pathways.
pub fn load_rate_file(
    file: &Path,
    path: usize,
    env: &ReactionEnv,
    out: &mut Vec<TimedRate>,
) -> Result<()> {
    let io_err = |source| ReactError::RateFileIo {
        path: file.display().to_string(),
        source,
    };
    let reader = BufReader::new(File::open(file).map_err(io_err)?);

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err)?;
        let mut tokens = line
            .split(|c| RATE_SEPARATORS.contains(&c))
            .filter(|t| !t.is_empty());

        let first = match tokens.next() {
            Some(t) => t,
            None => continue,
        };
        if !first.starts_with(FIRST_DIGIT) {
            continue;
        }
        let t: f64 = match first.parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        let mut rate: f64 = match tokens.next().and_then(|t| t.parse().ok()) {
            Some(v) => v,
            None => continue,
        };

        if rate < 0.0 {
            match env.notify.neg_reaction {
                WarnPolicy::Error => {
                    return Err(ReactError::RateFileNegative {
                        path: file.display().to_string(),
                        line: lineno + 1,
                    });
                }
                WarnPolicy::Warn => {
                    log::warn!(
                        "negative rate {} in {} line {}; setting to zero",
                        rate,
                        file.display(),
                        lineno + 1
                    );
                    rate = 0.0;
                }
                WarnPolicy::Cope => rate = 0.0,
            }
        }

        out.push(TimedRate {
            time: t / env.time_unit,
            path,
            value: rate,
        });
    }

    Ok(())
}

/// A concentration clamp extracted from a `ClampConc` pathway: the
/// surface holds `mol` at `concentration` on the side given by
/// `orient` (0 = both sides).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClampData {
    pub surf_class: SpeciesId,
    pub mol: SpeciesId,
    pub concentration: f64,
    pub orient: Orient,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct TempRateFile(std::path::PathBuf);

    impl TempRateFile {
        fn new(name: &str, contents: &str) -> Self {
            let path = std::env::temp_dir().join(format!("mcell_rates_{}_{}", std::process::id(), name));
            let mut f = File::create(&path).unwrap();
            f.write_all(contents.as_bytes()).unwrap();
            Self(path)
        }
    }

    impl Drop for TempRateFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn test_load_basic_schedule() {
        let f = TempRateFile::new("basic", "0.0 0.1\n1.0 0.5\n2.0 1.0\n");
        let mut env = ReactionEnv::default();
        env.time_unit = 1e-6;

        let mut out = Vec::new();
        load_rate_file(&f.0, 0, &env, &mut out).unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out[0], TimedRate { time: 0.0, path: 0, value: 0.1 });
        assert_eq!(out[1].time, 1.0 / 1e-6);
        assert_eq!(out[2].value, 1.0);
    }

    #[test]
    fn test_separators_and_garbage_lines() {
        let f = TempRateFile::new(
            "mixed",
            "# header line\n\
             time rate\n\
             0.5,2.5\n\
             \t 1.5;3.5\n\
             .25 9.0\n\
             +2.5\t4.5\n\
             3.5 oops\n\
             \n",
        );
        let mut env = ReactionEnv::default();
        env.time_unit = 1.0;

        let mut out = Vec::new();
        load_rate_file(&f.0, 2, &env, &mut out).unwrap();

        // Comma, semicolon, and tab records parse; the header, the
        // dot-led line, the half-parsed line, and the blank do not.
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|tr| tr.path == 2));
        assert_eq!(out[0].value, 2.5);
        assert_eq!(out[1].value, 3.5);
        assert_eq!(out[2].value, 4.5);
    }

    #[test]
    fn test_negative_rate_policies() {
        let f = TempRateFile::new("neg", "1.0 -5.0\n");
        let mut env = ReactionEnv::default();
        env.time_unit = 1.0;

        env.notify.neg_reaction = WarnPolicy::Cope;
        let mut out = Vec::new();
        load_rate_file(&f.0, 0, &env, &mut out).unwrap();
        assert_eq!(out[0].value, 0.0);

        env.notify.neg_reaction = WarnPolicy::Warn;
        let mut out = Vec::new();
        load_rate_file(&f.0, 0, &env, &mut out).unwrap();
        assert_eq!(out[0].value, 0.0);

        env.notify.neg_reaction = WarnPolicy::Error;
        let mut out = Vec::new();
        assert!(matches!(
            load_rate_file(&f.0, 0, &env, &mut out),
            Err(ReactError::RateFileNegative { line: 1, .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let env = ReactionEnv::default();
        let mut out = Vec::new();
        assert!(matches!(
            load_rate_file(Path::new("/nonexistent/rates.txt"), 0, &env, &mut out),
            Err(ReactError::RateFileIo { .. })
        ));
    }
}
