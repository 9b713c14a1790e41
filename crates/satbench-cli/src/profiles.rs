//! Attenuation profile rewriting.
//!
//! The emulation daemon reads per-endpoint channel profiles of the form
//! `<ideal_attenuation link="down" attenuation_value="0"/>`. This
//! collaborator substitutes the attenuation value in place for every
//! configured profile file; the daemon picks the new value up at the
//! next scenario load.

use std::fs;
use std::path::PathBuf;

use satbench_harness::error::{HarnessError, Result};
use satbench_harness::impairment::{AttenuationProfiles, LinkDirection};

const VALUE_KEY: &str = "attenuation_value=\"";

/// Rewrites `attenuation_value` attributes in channel profile files.
#[derive(Debug, Clone)]
pub struct ConfFileProfiles {
    paths: Vec<PathBuf>,
}

impl ConfFileProfiles {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl AttenuationProfiles for ConfFileProfiles {
    fn set_attenuation(&mut self, link: LinkDirection, db: f64) -> Result<()> {
        if self.paths.is_empty() {
            return Err(HarnessError::Config(
                "no attenuation profile paths configured".into(),
            ));
        }
        let marker = match link {
            LinkDirection::Down => "link=\"down\"",
            LinkDirection::Up => "link=\"up\"",
        };
        for path in &self.paths {
            let content = fs::read_to_string(path)?;
            let rewritten: Vec<String> = content
                .lines()
                .map(|line| {
                    if line.contains(marker) {
                        rewrite_value(line, db)
                    } else {
                        line.to_string()
                    }
                })
                .collect();
            fs::write(path, rewritten.join("\n") + "\n")?;
            tracing::debug!(path = %path.display(), db, "attenuation profile updated");
        }
        Ok(())
    }
}

fn rewrite_value(line: &str, db: f64) -> String {
    let Some(start) = line.find(VALUE_KEY) else {
        return line.to_string();
    };
    let value_start = start + VALUE_KEY.len();
    let Some(value_len) = line[value_start..].find('"') else {
        return line.to_string();
    };
    let mut out = String::with_capacity(line.len());
    out.push_str(&line[..value_start]);
    out.push_str(&db.to_string());
    out.push_str(&line[value_start + value_len..]);
    out
}
