//! Crystal structures and the atomistic routines the structure tools need.
//!
//! A [`Structure`] is a periodic lattice plus a list of sites in fractional
//! coordinates. Structures are persisted as workspace files (CIF, POSCAR or
//! pymatgen-style JSON, see [`io`]) and every operation returns a new
//! structure rather than mutating its input.

mod elements;
mod interface;
pub mod io;
mod linalg;
mod ops;
mod surface;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use elements::{atomic_number, covalent_radius};
pub use interface::{InterfaceMatch, InterfaceParams, build_interface};
pub use io::StructureFormat;
pub use ops::{CloseContact, close_contacts, distance, repetition_matrix, supercell};
pub use surface::surface;

use linalg::Mat3;

/// Errors from structure parsing and manipulation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StructureError {
    /// The file could not be parsed.
    #[error("failed to parse {format} structure: {message}")]
    Parse {
        /// Format being parsed
        format: StructureFormat,
        /// What went wrong
        message: String,
    },
    /// The file extension or format name is not supported.
    #[error("unsupported structure format: {0}")]
    UnsupportedFormat(String),
    /// A site index is out of range.
    #[error("atom index {index} is out of bounds for {num_sites} atoms")]
    IndexOutOfRange {
        /// Requested index
        index: i64,
        /// Number of sites in the structure
        num_sites: usize,
    },
    /// An argument is outside its valid domain.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// No lattice match satisfies the tolerances.
    #[error("no lattice matches found: {0}")]
    NoMatch(String),
}

/// Most sites a derived structure (supercell, slab, interface) may hold.
pub const MAX_ATOMS: usize = 100_000;

/// Site count of `copies` repetitions of `sites`, or `InvalidParameter`
/// when it exceeds [`MAX_ATOMS`].
pub(crate) fn derived_site_count(
    sites: usize,
    copies: u64,
    what: &str,
) -> Result<usize, StructureError> {
    usize::try_from(copies)
        .ok()
        .and_then(|copies| sites.checked_mul(copies))
        .filter(|n| *n <= MAX_ATOMS)
        .ok_or_else(|| {
            StructureError::InvalidParameter(format!(
                "{what} would hold {sites} x {copies} atoms, more than the limit of {MAX_ATOMS}"
            ))
        })
}

/// A periodic lattice, one lattice vector per row, in Å.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    matrix: Mat3,
}

impl Lattice {
    /// Build a lattice from its vectors. Fails if they are coplanar.
    pub fn new(matrix: [[f64; 3]; 3]) -> Result<Self, StructureError> {
        if linalg::inverse(&matrix).is_none() {
            return Err(StructureError::InvalidParameter(
                "lattice vectors are linearly dependent".to_string(),
            ));
        }
        Ok(Self { matrix })
    }

    /// Build a lattice from lengths (Å) and angles (degrees), with `a`
    /// along x and `b` in the xy plane.
    pub fn from_parameters(
        a: f64,
        b: f64,
        c: f64,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> Result<Self, StructureError> {
        let (ca, cb, cg) = (
            alpha.to_radians().cos(),
            beta.to_radians().cos(),
            gamma.to_radians().cos(),
        );
        let sg = gamma.to_radians().sin();
        if a <= 0.0 || b <= 0.0 || c <= 0.0 || sg.abs() < 1e-10 {
            return Err(StructureError::InvalidParameter(format!(
                "invalid lattice parameters a={a} b={b} c={c} alpha={alpha} beta={beta} gamma={gamma}"
            )));
        }
        let cy = (ca - cb * cg) / sg;
        let cz_sq = 1.0 - cb * cb - cy * cy;
        if cz_sq <= 0.0 {
            return Err(StructureError::InvalidParameter(format!(
                "lattice angles alpha={alpha} beta={beta} gamma={gamma} do not form a cell"
            )));
        }
        Self::new([
            [a, 0.0, 0.0],
            [b * cg, b * sg, 0.0],
            [c * cb, c * cy, c * cz_sq.sqrt()],
        ])
    }

    /// Lattice vectors as rows.
    pub fn matrix(&self) -> [[f64; 3]; 3] {
        self.matrix
    }

    /// Lengths `(a, b, c)` in Å.
    pub fn lengths(&self) -> [f64; 3] {
        [
            linalg::norm(self.matrix[0]),
            linalg::norm(self.matrix[1]),
            linalg::norm(self.matrix[2]),
        ]
    }

    /// Angles `(alpha, beta, gamma)` in degrees.
    pub fn angles(&self) -> [f64; 3] {
        let [a, b, c] = self.matrix;
        [
            linalg::angle_deg(b, c),
            linalg::angle_deg(a, c),
            linalg::angle_deg(a, b),
        ]
    }

    /// Cell volume in Å³.
    pub fn volume(&self) -> f64 {
        linalg::det(&self.matrix).abs()
    }

    /// Fractional to Cartesian coordinates.
    pub fn to_cartesian(&self, frac: [f64; 3]) -> [f64; 3] {
        linalg::vec_mat(frac, &self.matrix)
    }

    /// Cartesian to fractional coordinates.
    pub fn to_fractional(&self, cart: [f64; 3]) -> [f64; 3] {
        // new() guarantees invertibility
        let inv = linalg::inverse(&self.matrix).unwrap_or([[0.0; 3]; 3]);
        linalg::vec_mat(cart, &inv)
    }
}

/// One atom: element symbol and fractional coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Element symbol
    pub species: String,
    /// Fractional coordinates
    pub frac: [f64; 3],
}

impl Site {
    /// Create a site.
    pub fn new(species: impl Into<String>, frac: [f64; 3]) -> Self {
        Self {
            species: species.into(),
            frac,
        }
    }
}

/// A crystal structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    /// The periodic cell
    pub lattice: Lattice,
    /// Atoms in the cell
    pub sites: Vec<Site>,
    /// Periodicity along each lattice vector
    pub pbc: [bool; 3],
    /// Free-form provenance such as `material_id`
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Structure {
    /// A fully periodic structure.
    pub fn new(lattice: Lattice, sites: Vec<Site>) -> Self {
        Self {
            lattice,
            sites,
            pbc: [true; 3],
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Number of sites.
    pub fn num_sites(&self) -> usize {
        self.sites.len()
    }

    /// Site at `index`, failing with [`StructureError::IndexOutOfRange`].
    pub fn site(&self, index: i64) -> Result<&Site, StructureError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.sites.get(i))
            .ok_or(StructureError::IndexOutOfRange {
                index,
                num_sites: self.sites.len(),
            })
    }

    /// Cartesian position of every site.
    pub fn cart_coords(&self) -> Vec<[f64; 3]> {
        self.sites
            .iter()
            .map(|s| self.lattice.to_cartesian(s.frac))
            .collect()
    }

    /// Element counts in first-appearance order.
    pub fn composition(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        for site in &self.sites {
            match counts.iter_mut().find(|(s, _)| *s == site.species) {
                Some((_, n)) => *n += 1,
                None => counts.push((site.species.clone(), 1)),
            }
        }
        counts
    }

    /// Chemical formula in Hill order with full counts, e.g. `Cl4Na4`.
    pub fn formula(&self) -> String {
        hill_formula(&self.composition(), 1)
    }

    /// Hill formula divided by the greatest common count, e.g. `ClNa`.
    pub fn reduced_formula(&self) -> String {
        let composition = self.composition();
        let divisor = composition.iter().fold(0, |g, (_, n)| gcd(g, *n)).max(1);
        hill_formula(&composition, divisor)
    }

    /// Return a copy with every fractional coordinate wrapped into [0, 1)
    /// along periodic directions.
    pub fn wrapped(&self) -> Self {
        let mut out = self.clone();
        for site in &mut out.sites {
            for axis in 0..3 {
                if out.pbc[axis] {
                    site.frac[axis] = wrap_unit(site.frac[axis]);
                }
            }
        }
        out
    }
}

/// Wrap into [0, 1), folding values within 1e-8 of 1 back to 0.
pub(crate) fn wrap_unit(x: f64) -> f64 {
    let w = x - x.floor();
    if (1.0 - w).abs() < 1e-8 { 0.0 } else { w }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn hill_formula(composition: &[(String, usize)], divisor: usize) -> String {
    let mut symbols: BTreeMap<&str, usize> = BTreeMap::new();
    for (s, n) in composition {
        *symbols.entry(s.as_str()).or_default() += n / divisor;
    }

    let mut ordered: Vec<(&str, usize)> = Vec::new();
    if let Some(c) = symbols.remove("C") {
        ordered.push(("C", c));
        if let Some(h) = symbols.remove("H") {
            ordered.push(("H", h));
        }
    }
    ordered.extend(symbols);

    ordered
        .into_iter()
        .map(|(s, n)| if n == 1 { s.to_string() } else { format!("{s}{n}") })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    /// Conventional rock-salt NaCl, a = 5.69 Å.
    pub(crate) fn nacl() -> Structure {
        let lattice = Lattice::from_parameters(5.69, 5.69, 5.69, 90.0, 90.0, 90.0).unwrap();
        let mut sites = Vec::new();
        for f in [
            [0.0, 0.0, 0.0],
            [0.0, 0.5, 0.5],
            [0.5, 0.0, 0.5],
            [0.5, 0.5, 0.0],
        ] {
            sites.push(Site::new("Na", f));
        }
        for f in [
            [0.5, 0.0, 0.0],
            [0.5, 0.5, 0.5],
            [0.0, 0.0, 0.5],
            [0.0, 0.5, 0.0],
        ] {
            sites.push(Site::new("Cl", f));
        }
        Structure::new(lattice, sites).with_metadata("material_id", "mp-22862")
    }

    #[test]
    fn test_lattice_parameters_roundtrip() {
        let lattice = Lattice::from_parameters(3.0, 4.0, 5.0, 80.0, 95.0, 105.0).unwrap();
        let [a, b, c] = lattice.lengths();
        let [alpha, beta, gamma] = lattice.angles();
        assert!((a - 3.0).abs() < 1e-9 && (b - 4.0).abs() < 1e-9 && (c - 5.0).abs() < 1e-9);
        assert!((alpha - 80.0).abs() < 1e-9);
        assert!((beta - 95.0).abs() < 1e-9);
        assert!((gamma - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_lattice() {
        assert!(Lattice::from_parameters(1.0, 1.0, 1.0, 90.0, 90.0, 0.0).is_err());
        assert!(Lattice::new([[1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 0.0, 1.0]]).is_err());
    }

    #[test]
    fn test_fractional_cartesian() {
        let s = nacl();
        let cart = s.lattice.to_cartesian([0.5, 0.0, 0.0]);
        assert!((cart[0] - 2.845).abs() < 1e-9);
        let frac = s.lattice.to_fractional(cart);
        assert!((frac[0] - 0.5).abs() < 1e-12);
        assert!((s.lattice.volume() - 5.69f64.powi(3)).abs() < 1e-6);
    }

    #[test]
    fn test_formula() {
        let s = nacl();
        assert_eq!(s.formula(), "Cl4Na4");
        assert_eq!(s.reduced_formula(), "ClNa");

        let lattice = Lattice::from_parameters(5.0, 5.0, 5.0, 90.0, 90.0, 90.0).unwrap();
        let methane = Structure::new(
            lattice,
            vec![
                Site::new("H", [0.1, 0.0, 0.0]),
                Site::new("C", [0.0, 0.0, 0.0]),
                Site::new("H", [0.0, 0.1, 0.0]),
                Site::new("H", [0.0, 0.0, 0.1]),
                Site::new("H", [0.1, 0.1, 0.1]),
            ],
        );
        assert_eq!(methane.formula(), "CH4");
    }

    #[test]
    fn test_site_index_out_of_range() {
        let s = nacl();
        assert!(s.site(7).is_ok());
        assert_eq!(
            s.site(8).unwrap_err(),
            StructureError::IndexOutOfRange {
                index: 8,
                num_sites: 8
            }
        );
        assert!(s.site(-1).is_err());
    }

    #[test]
    fn test_wrapped() {
        let lattice = Lattice::from_parameters(1.0, 1.0, 1.0, 90.0, 90.0, 90.0).unwrap();
        let s = Structure::new(lattice, vec![Site::new("H", [1.25, -0.25, 0.999999999])]);
        let w = s.wrapped();
        assert!((w.sites[0].frac[0] - 0.25).abs() < 1e-12);
        assert!((w.sites[0].frac[1] - 0.75).abs() < 1e-12);
        assert_eq!(w.sites[0].frac[2], 0.0);
    }
}
