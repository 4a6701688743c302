use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::error::FitError;

/// Number of independent stress components, ordered `xx, yy, zz, xy, yz, zx`.
pub const STRESS_COMPONENTS: usize = 6;

// --- Cell ---

/// Periodic cell of a structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[[f64; 3]; 3]", into = "[[f64; 3]; 3]")]
pub struct Lattice {
    pub vectors: Matrix3<f64>, // Columns are a, b, c
}

impl Lattice {
    pub fn new(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> Option<Self> {
        let vectors = Matrix3::from_columns(&[a, b, c]);
        if !vectors.is_invertible() {
            return None;
        }
        Some(Self { vectors })
    }

    pub fn orthorhombic(a: f64, b: f64, c: f64) -> Option<Self> {
        Self::new(Vector3::new(a, 0.0, 0.0), Vector3::new(0.0, b, 0.0), Vector3::new(0.0, 0.0, c))
    }

    /// Lattice vector `i` (0 = a, 1 = b, 2 = c).
    pub fn vector(&self, i: usize) -> Vector3<f64> {
        self.vectors.column(i).into_owned()
    }

    /// Returns the cell enlarged by an integer multiple along each vector.
    fn scaled(&self, mult: [usize; 3]) -> Option<Self> {
        Self::new(
            self.vector(0) * mult[0] as f64,
            self.vector(1) * mult[1] as f64,
            self.vector(2) * mult[2] as f64,
        )
    }
}

impl TryFrom<[[f64; 3]; 3]> for Lattice {
    type Error = String;

    fn try_from(rows: [[f64; 3]; 3]) -> Result<Self, Self::Error> {
        let [a, b, c] = rows.map(Vector3::from);
        Lattice::new(a, b, c).ok_or_else(|| "lattice vectors are linearly dependent".to_string())
    }
}

impl From<Lattice> for [[f64; 3]; 3] {
    fn from(lat: Lattice) -> Self {
        [0, 1, 2].map(|i| {
            let v = lat.vector(i);
            [v.x, v.y, v.z]
        })
    }
}

// --- Reference data ---

/// One DFT reference structure: geometry plus the forces and stress it produced.
///
/// Immutable once built; positions are Cartesian (Å), forces eV/Å, stress in the
/// reference code's units (kBar for VASP).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStructure", into = "RawStructure")]
pub struct Structure {
    lattice: Lattice,
    species: Vec<String>,
    positions: Vec<Point3<f64>>,
    reference_forces: Vec<Vector3<f64>>,
    reference_stress: [f64; STRESS_COMPONENTS],
}

impl Structure {
    pub fn new(
        lattice: Lattice,
        species: Vec<String>,
        positions: Vec<Point3<f64>>,
        reference_forces: Vec<Vector3<f64>>,
        reference_stress: [f64; STRESS_COMPONENTS],
    ) -> Result<Self, FitError> {
        if species.is_empty() {
            return Err(FitError::InvalidArgument("structure has no atoms".into()));
        }
        if positions.len() != species.len() || reference_forces.len() != species.len() {
            return Err(FitError::InvalidArgument(format!(
                "structure atom counts disagree: {} species, {} positions, {} forces",
                species.len(),
                positions.len(),
                reference_forces.len()
            )));
        }
        Ok(Self { lattice, species, positions, reference_forces, reference_stress })
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    pub fn species(&self) -> &[String] {
        &self.species
    }

    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    pub fn reference_forces(&self) -> &[Vector3<f64>] {
        &self.reference_forces
    }

    pub fn reference_stress(&self) -> &[f64; STRESS_COMPONENTS] {
        &self.reference_stress
    }

    pub fn num_atoms(&self) -> usize {
        self.species.len()
    }

    /// Distinct species labels, in order of first appearance.
    pub fn distinct_species(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for s in &self.species {
            if !seen.contains(&s.as_str()) {
                seen.push(s);
            }
        }
        seen
    }

    /// Builds a diagonal supercell.
    ///
    /// Atoms are laid out atom-major: every image of atom 0, then every image of
    /// atom 1, and so on. Reference forces are copied to each image; the stress is
    /// intensive and carried over unchanged.
    pub fn supercell(&self, mult: [usize; 3]) -> Result<Structure, FitError> {
        if mult.iter().any(|&m| m == 0) {
            return Err(FitError::InvalidArgument(format!(
                "supercell multipliers must be positive, got {:?}",
                mult
            )));
        }
        if mult == [1, 1, 1] {
            return Ok(self.clone());
        }

        let lattice = self
            .lattice
            .scaled(mult)
            .ok_or_else(|| FitError::InvalidArgument("degenerate supercell lattice".into()))?;

        let mut offsets = Vec::with_capacity(mult[0] * mult[1] * mult[2]);
        for i in 0..mult[0] {
            for j in 0..mult[1] {
                for k in 0..mult[2] {
                    offsets.push(
                        self.lattice.vector(0) * i as f64
                            + self.lattice.vector(1) * j as f64
                            + self.lattice.vector(2) * k as f64,
                    );
                }
            }
        }

        let n = self.num_atoms() * offsets.len();
        let mut species = Vec::with_capacity(n);
        let mut positions = Vec::with_capacity(n);
        let mut forces = Vec::with_capacity(n);

        for atom in 0..self.num_atoms() {
            for off in &offsets {
                species.push(self.species[atom].clone());
                positions.push(self.positions[atom] + *off);
                forces.push(self.reference_forces[atom]);
            }
        }

        Structure::new(lattice, species, positions, forces, self.reference_stress)
    }
}

/// On-disk shape of a structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawStructure {
    lattice: Lattice,
    species: Vec<String>,
    positions: Vec<[f64; 3]>,
    forces: Vec<[f64; 3]>,
    stress: [f64; STRESS_COMPONENTS],
}

impl TryFrom<RawStructure> for Structure {
    type Error = FitError;

    fn try_from(raw: RawStructure) -> Result<Self, Self::Error> {
        Structure::new(
            raw.lattice,
            raw.species,
            raw.positions.into_iter().map(Point3::from).collect(),
            raw.forces.into_iter().map(Vector3::from).collect(),
            raw.stress,
        )
    }
}

impl From<Structure> for RawStructure {
    fn from(s: Structure) -> Self {
        RawStructure {
            lattice: s.lattice,
            species: s.species,
            positions: s.positions.iter().map(|p| [p.x, p.y, p.z]).collect(),
            forces: s.reference_forces.iter().map(|f| [f.x, f.y, f.z]).collect(),
            stress: s.reference_stress,
        }
    }
}

/// The ordered set of reference structures a fit draws from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingPool {
    pub structures: Vec<Structure>,
}

impl TrainingPool {
    pub fn new(structures: Vec<Structure>) -> Self {
        Self { structures }
    }

    pub fn load_json(path: &Path) -> Result<Self, FitError> {
        let text = fs::read_to_string(path)
            .map_err(|source| FitError::Io { path: path.display().to_string(), source })?;
        serde_json::from_str(&text)
            .map_err(|source| FitError::Parse { path: path.display().to_string(), source })
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Structure> {
        self.structures.get(index)
    }
}

/// Destination name for a subset: sorted, 1-indexed structure numbers joined by '-'.
/// `[0, 2, 9]` -> `"1-3-10"`.
pub fn subset_identifier(subset: &[usize]) -> String {
    let mut numbers = subset.to_vec();
    numbers.sort_unstable();
    numbers
        .iter()
        .map(|i| (i + 1).to_string())
        .collect::<Vec<_>>()
        .join("-")
}
