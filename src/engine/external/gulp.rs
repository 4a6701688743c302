use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use nalgebra::Vector3;
use tempfile::TempDir;

use crate::core::domain::{Structure, STRESS_COMPONENTS};
use crate::core::potential::{PotentialSpec, SpeciesValue};
use crate::engine::evaluator::{EngineConfig, EngineSession, MechanicsEngine, Prediction};

/// GULP driven through stdin/stdout pipes.
///
/// Each session runs in its own scratch directory so concurrent workers never
/// see each other's auxiliary files.
pub struct GulpEngine {
    config: EngineConfig,
}

impl GulpEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Fails if the configured executable cannot be started.
    pub fn check_available(&self) -> Result<()> {
        Command::new(&self.config.executable)
            .arg("help")
            .stdin(Stdio::null())
            .output()
            .with_context(|| {
                format!(
                    "'{}' executable not found. Install GULP or set engine.executable in the config.",
                    self.config.executable
                )
            })?;
        Ok(())
    }
}

impl MechanicsEngine for GulpEngine {
    fn name(&self) -> &str {
        "GULP (Pipe)"
    }

    fn open_session(&self, structures: &[Structure]) -> Result<Box<dyn EngineSession>> {
        Ok(Box::new(GulpSession::new(self.config.clone(), structures)?))
    }
}

/// Geometry deck of one structure, rendered for a fixed core-shell assignment.
struct GeometryBlock {
    text: String,
    num_atoms: usize,
}

pub struct GulpSession {
    config: EngineConfig,
    scratch: TempDir,
    structures: Vec<Structure>,
    species: BTreeSet<String>,
    /// Geometry decks, cached against the core-shell flags they were rendered with.
    geometry: Option<(BTreeMap<String, bool>, Vec<GeometryBlock>)>,
    potential_block: Option<String>,
}

impl GulpSession {
    fn new(config: EngineConfig, structures: &[Structure]) -> Result<Self> {
        let scratch = match &config.scratch_root {
            Some(root) => tempfile::Builder::new().prefix("gulp-").tempdir_in(root),
            None => tempfile::Builder::new().prefix("gulp-").tempdir(),
        }
        .context("Failed to create GULP scratch directory")?;

        let species = structures
            .iter()
            .flat_map(|s| s.species().iter().cloned())
            .collect::<BTreeSet<_>>();

        debug!("GULP session scratch at {}", scratch.path().display());

        Ok(Self {
            config,
            scratch,
            structures: structures.to_vec(),
            species,
            geometry: None,
            potential_block: None,
        })
    }

    fn render_geometry(&self, core_shell: &BTreeMap<String, bool>) -> Result<Vec<GeometryBlock>> {
        self.structures
            .iter()
            .enumerate()
            .map(|(i, s)| -> Result<GeometryBlock> {
                let mut t = String::with_capacity(64 * s.num_atoms());
                writeln!(t, "title\nstructure {}\nend", i + 1)?;

                // GULP reads vectors as rows
                t.push_str("vectors\n");
                for k in 0..3 {
                    let v = s.lattice().vector(k);
                    writeln!(t, "{:.9} {:.9} {:.9}", v.x, v.y, v.z)?;
                }

                t.push_str("cartesian\n");
                for (label, p) in s.species().iter().zip(s.positions()) {
                    let is_cs = *core_shell
                        .get(label)
                        .ok_or_else(|| anyhow!("Species {} missing from the potential", label))?;
                    writeln!(t, "{:<3} core {:.9} {:.9} {:.9}", label, p.x, p.y, p.z)?;
                    if is_cs {
                        writeln!(t, "{:<3} shel {:.9} {:.9} {:.9}", label, p.x, p.y, p.z)?;
                    }
                }
                Ok(GeometryBlock { text: t, num_atoms: s.num_atoms() })
            })
            .collect()
    }

    /// Renders the `species`, `buckingham` and `spring` blocks.
    fn render_potential(&self, spec: &PotentialSpec) -> Result<String> {
        let mut s = String::with_capacity(512);
        let site = |x: &str| if spec.is_core_shell(x) { "shel" } else { "core" };

        s.push_str("species\n");
        for x in &self.species {
            match spec.charge(x) {
                Some(SpeciesValue::Scalar(q)) => {
                    writeln!(s, "{:<3} core {:.6}", x, q)?;
                }
                Some(SpeciesValue::CoreShell { core, shell }) => {
                    writeln!(s, "{:<3} core {:.6}", x, core)?;
                    writeln!(s, "{:<3} shel {:.6}", x, shell)?;
                }
                None => bail!("No charge given for species {}", x),
            }
        }

        let pairs: Vec<_> = spec
            .pair_potentials
            .iter()
            .filter(|(p, _)| self.species.contains(p.first()) && self.species.contains(p.second()))
            .collect();
        if !pairs.is_empty() {
            s.push_str("buckingham\n");
            for (pair, b) in pairs {
                writeln!(
                    s,
                    "{:<3} {} {:<3} {} {:.6} {:.6} {:.6} 0.0 {:.2}",
                    pair.first(),
                    site(pair.first()),
                    pair.second(),
                    site(pair.second()),
                    b.a,
                    b.rho,
                    b.c,
                    self.config.cutoff
                )?;
            }
        }

        let springs: Vec<_> = spec
            .springs
            .iter()
            .filter(|(p, _)| self.species.contains(p.first()))
            .collect();
        if !springs.is_empty() {
            s.push_str("spring\n");
            for (pair, k) in springs {
                writeln!(s, "{:<3} {:.6} {:.6}", pair.first(), k.k2, k.k4)?;
            }
        }

        Ok(s)
    }

    /// Executes GULP via stdin/stdout piping inside the scratch directory.
    fn run_process(&self, input_data: &str) -> Result<String> {
        let mut child = Command::new(&self.config.executable)
            .current_dir(self.scratch.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn GULP executable")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input_data.as_bytes()).context("Failed to write to GULP stdin")?;
        }

        let output = child.wait_with_output().context("Failed to read GULP output")?;

        if !output.status.success() {
            let err_msg = String::from_utf8_lossy(&output.stderr);
            bail!("GULP exited with error: {}", err_msg);
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl EngineSession for GulpSession {
    fn set_potential(&mut self, spec: &PotentialSpec) -> Result<()> {
        let stale = match &self.geometry {
            Some((flags, _)) => flags != &spec.core_shell,
            None => true,
        };
        if stale {
            let blocks = self.render_geometry(&spec.core_shell)?;
            self.geometry = Some((spec.core_shell.clone(), blocks));
        }
        self.potential_block = Some(self.render_potential(spec)?);
        Ok(())
    }

    fn compute(&mut self, index: usize) -> Result<Prediction> {
        let (_, blocks) = self
            .geometry
            .as_ref()
            .ok_or_else(|| anyhow!("compute called before set_potential"))?;
        let block = blocks
            .get(index)
            .ok_or_else(|| anyhow!("No structure {} in this session", index))?;
        let potential = self
            .potential_block
            .as_deref()
            .ok_or_else(|| anyhow!("compute called before set_potential"))?;

        let mut input = String::with_capacity(block.text.len() + potential.len() + 64);
        input.push_str(self.config.keywords.trim());
        input.push('\n');
        input.push_str(&block.text);
        input.push_str(potential);

        let output = self.run_process(&input)?;
        check_errors(&output)?;

        let forces = parse_forces(&output, block.num_atoms)?;
        let mut stress = parse_stress(&output)?;
        for s in &mut stress {
            *s *= self.config.stress_scale;
        }

        Ok(Prediction { forces, stress })
    }
}

impl Drop for GulpSession {
    fn drop(&mut self) {
        debug!("Removing GULP scratch {}", self.scratch.path().display());
    }
}

// --- Output parsing ---

fn check_errors(output: &str) -> Result<()> {
    if output.contains("Conditions for a minimum have not been satisfied") {
        bail!("Convergence failure");
    }
    if output.contains("Interatomic distance too small") {
        bail!("Geometric collapse");
    }
    if output.contains("Dump of error info") {
        bail!("Internal GULP error");
    }
    if let Some(line) = output.lines().find(|l| l.trim_start().starts_with("!! ERROR")) {
        bail!("GULP reported: {}", line.trim());
    }
    Ok(())
}

/// Reads core forces (negated Cartesian derivatives) from the last
/// "Final Cartesian derivatives" table.
fn parse_forces(output: &str, expected_atoms: usize) -> Result<Vec<Vector3<f64>>> {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines
        .iter()
        .rposition(|l| l.to_ascii_lowercase().contains("final cartesian derivatives"))
        .ok_or_else(|| anyhow!("No Cartesian derivatives found in GULP output"))?;

    let mut forces = Vec::with_capacity(expected_atoms);
    let mut in_table = false;

    for line in &lines[start + 1..] {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let is_row = parts.len() >= 6 && parts[0].parse::<usize>().is_ok();

        if !is_row {
            if in_table && line.contains("-------") {
                break;
            }
            continue;
        }
        in_table = true;

        // Shells carry no reference force
        if parts[2].to_ascii_lowercase().starts_with('s') {
            continue;
        }

        let mut d = [0.0; 3];
        for (k, tok) in parts[3..6].iter().enumerate() {
            d[k] = tok
                .parse::<f64>()
                .with_context(|| format!("Bad derivative '{}' in line: {}", tok, line.trim()))?;
        }
        forces.push(-Vector3::from(d));
    }

    if forces.len() != expected_atoms {
        bail!(
            "GULP atom count mismatch: expected {} core forces, got {}",
            expected_atoms,
            forces.len()
        );
    }
    Ok(forces)
}

/// Reads the six stress components (`xx yy zz xy yz zx`) from the last stress
/// tensor block. Accepts `label value` pairs or a 3x3 matrix.
fn parse_stress(output: &str) -> Result<[f64; STRESS_COMPONENTS]> {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines
        .iter()
        .rposition(|l| l.to_ascii_lowercase().contains("stress tensor"))
        .ok_or_else(|| anyhow!("No stress tensor found in GULP output"))?;

    let mut named: BTreeMap<&'static str, f64> = BTreeMap::new();
    let mut rows: Vec<[f64; 3]> = Vec::new();

    for line in lines[start + 1..].iter().take(12) {
        let parts: Vec<&str> = line.split_whitespace().collect();

        let mut i = 0;
        while i + 1 < parts.len() {
            let key = match parts[i].to_ascii_lowercase().as_str() {
                "xx" => Some("xx"),
                "yy" => Some("yy"),
                "zz" => Some("zz"),
                "xy" | "yx" => Some("xy"),
                "yz" | "zy" => Some("yz"),
                "xz" | "zx" => Some("zx"),
                _ => None,
            };
            match (key, parts[i + 1].parse::<f64>()) {
                (Some(k), Ok(v)) => {
                    named.insert(k, v);
                    i += 2;
                }
                _ => i += 1,
            }
        }

        let numbers: Vec<f64> = parts.iter().filter_map(|t| t.parse::<f64>().ok()).collect();
        if numbers.len() == 3 && named.is_empty() {
            rows.push([numbers[0], numbers[1], numbers[2]]);
        }
    }

    if named.len() == STRESS_COMPONENTS {
        let get = |k: &str| named.get(k).copied().unwrap_or_default();
        return Ok([get("xx"), get("yy"), get("zz"), get("xy"), get("yz"), get("zx")]);
    }
    if rows.len() >= 3 {
        let m = &rows[..3];
        return Ok([m[0][0], m[1][1], m[2][2], m[0][1], m[1][2], m[2][0]]);
    }
    bail!("Could not read six stress components from GULP output")
}
