//! Distances, close-contact detection and supercells.

use serde::Serialize;

use super::elements::covalent_radius;
use super::linalg::{self, Vec3};
use super::{
    Lattice, MAX_ATOMS, Site, Structure, StructureError, derived_site_count, wrap_unit,
};

/// Upper bound on site positions a supercell expansion may examine.
const MAX_SCANNED_SITES: u64 = 64 * MAX_ATOMS as u64;

/// Shortest Cartesian vector from fractional position `a` to `b`,
/// considering periodic images along periodic axes.
fn min_image_vector(lattice: &Lattice, pbc: [bool; 3], a: Vec3, b: Vec3) -> Vec3 {
    let mut d = linalg::sub(b, a);
    for axis in 0..3 {
        if pbc[axis] {
            d[axis] -= d[axis].round();
        }
    }

    // Rounding alone is exact only for orthogonal cells; check neighbours.
    let range = |axis: usize| if pbc[axis] { -1..=1 } else { 0..=0 };
    let mut best = lattice.to_cartesian(d);
    let mut best_len = linalg::norm(best);
    for i in range(0) {
        for j in range(1) {
            for k in range(2) {
                let shifted = [d[0] + i as f64, d[1] + j as f64, d[2] + k as f64];
                let cart = lattice.to_cartesian(shifted);
                let len = linalg::norm(cart);
                if len < best_len {
                    best = cart;
                    best_len = len;
                }
            }
        }
    }
    best
}

/// Distance in Å between sites `i` and `j`. With `mic`, the nearest
/// periodic image of `j` is used.
pub fn distance(structure: &Structure, i: i64, j: i64, mic: bool) -> Result<f64, StructureError> {
    let a = structure.site(i)?;
    let b = structure.site(j)?;
    let vector = if mic {
        min_image_vector(&structure.lattice, structure.pbc, a.frac, b.frac)
    } else {
        structure
            .lattice
            .to_cartesian(linalg::sub(b.frac, a.frac))
    };
    Ok(linalg::norm(vector))
}

/// A pair of atoms closer than the sum of their covalent radii plus a
/// tolerance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseContact {
    /// First site index
    pub index1: usize,
    /// Second site index
    pub index2: usize,
    /// Species of the first site
    pub symbol1: String,
    /// Species of the second site
    pub symbol2: String,
    /// Minimum-image distance in Å
    pub distance: f64,
    /// Threshold the distance fell below, in Å
    pub min_distance: f64,
}

/// Every pair `i < j` whose minimum-image distance is below
/// `r_i + r_j + tolerance` (covalent radii).
pub fn close_contacts(structure: &Structure, tolerance: f64) -> Vec<CloseContact> {
    let mut contacts = Vec::new();
    for (i, a) in structure.sites.iter().enumerate() {
        for (j, b) in structure.sites.iter().enumerate().skip(i + 1) {
            let d = linalg::norm(min_image_vector(
                &structure.lattice,
                structure.pbc,
                a.frac,
                b.frac,
            ));
            let min_distance = covalent_radius(&a.species) + covalent_radius(&b.species) + tolerance;
            if d < min_distance {
                contacts.push(CloseContact {
                    index1: i,
                    index2: j,
                    symbol1: a.species.clone(),
                    symbol2: b.species.clone(),
                    distance: d,
                    min_distance,
                });
            }
        }
    }
    contacts
}

/// Build the supercell whose lattice vectors are the rows of
/// `transform · lattice`. The transform must have a non-zero determinant.
///
/// The result may hold at most [`MAX_ATOMS`] sites.
pub fn supercell(structure: &Structure, transform: [[i64; 3]; 3]) -> Result<Structure, StructureError> {
    if transform.iter().flatten().any(|v| v.unsigned_abs() > MAX_ATOMS as u64) {
        return Err(StructureError::InvalidParameter(format!(
            "supercell matrix {transform:?} has entries larger than {MAX_ATOMS}"
        )));
    }
    let p = linalg::to_float(&transform);
    let det = linalg::det(&p);
    if det.abs() < 0.5 {
        return Err(StructureError::InvalidParameter(format!(
            "supercell matrix {transform:?} is singular"
        )));
    }
    let p_inv = linalg::inverse(&p).ok_or_else(|| {
        StructureError::InvalidParameter(format!("supercell matrix {transform:?} is singular"))
    })?;
    let expected = derived_site_count(structure.num_sites(), det.abs().round() as u64, "supercell")?;
    let lattice = Lattice::new(linalg::mat_mul(&p, &structure.lattice.matrix()))?;

    // Bounding box of the supercell corners in old fractional coordinates.
    let mut lo = [0i64; 3];
    let mut hi = [0i64; 3];
    for mask in 0..8u8 {
        let mut corner = [0i64; 3];
        for (row, coeffs) in transform.iter().enumerate() {
            if mask & (1 << row) != 0 {
                for k in 0..3 {
                    corner[k] += coeffs[k];
                }
            }
        }
        for k in 0..3 {
            lo[k] = lo[k].min(corner[k]);
            hi[k] = hi[k].max(corner[k]);
        }
    }

    // Every site is tried at every translation in the box.
    let scanned = (0..3)
        .map(|k| (hi[k] - lo[k] + 1).unsigned_abs())
        .try_fold(structure.num_sites() as u64, u64::checked_mul);
    if scanned.is_none_or(|n| n > MAX_SCANNED_SITES) {
        return Err(StructureError::InvalidParameter(format!(
            "supercell matrix {transform:?} is too skewed to expand"
        )));
    }

    let eps = 1e-8;
    let mut sites = Vec::with_capacity(expected);
    for site in &structure.sites {
        for t0 in lo[0]..=hi[0] {
            for t1 in lo[1]..=hi[1] {
                for t2 in lo[2]..=hi[2] {
                    let shifted = [
                        site.frac[0] + t0 as f64,
                        site.frac[1] + t1 as f64,
                        site.frac[2] + t2 as f64,
                    ];
                    let f = linalg::vec_mat(shifted, &p_inv);
                    if f.iter().all(|v| *v >= -eps && *v < 1.0 - eps) {
                        sites.push(Site::new(
                            site.species.clone(),
                            [wrap_unit(f[0]), wrap_unit(f[1]), wrap_unit(f[2])],
                        ));
                    }
                }
            }
        }
    }

    if sites.len() != expected {
        tracing::warn!(
            expected,
            actual = sites.len(),
            "supercell site count differs from |det| * sites"
        );
    }

    Ok(Structure {
        lattice,
        sites,
        pbc: structure.pbc,
        metadata: structure.metadata.clone(),
    })
}

/// Expand 3 repetitions into a diagonal matrix, or read 9 values as a
/// row-major 3×3 matrix.
pub fn repetition_matrix(values: &[i64]) -> Result<[[i64; 3]; 3], StructureError> {
    match values {
        [a, b, c] => Ok([[*a, 0, 0], [0, *b, 0], [0, 0, *c]]),
        [a, b, c, d, e, f, g, h, i] => Ok([[*a, *b, *c], [*d, *e, *f], [*g, *h, *i]]),
        _ => Err(StructureError::InvalidParameter(
            "repetitions must be a list of three integers, or a 3x3 matrix".to_string(),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::structure::tests::nacl;

    #[test]
    fn test_nacl_bond_distance() {
        let s = nacl();
        // Na0 at origin, Cl4 at (0.5, 0, 0).
        let d = distance(&s, 0, 4, true).unwrap();
        assert!((d - 2.845).abs() < 1e-9);
        assert!((distance(&s, 0, 4, false).unwrap() - d).abs() < 1e-12);
    }

    #[test]
    fn test_supercell_rejects_oversized_results() {
        let s = nacl();
        let huge = repetition_matrix(&[100_000, 100_000, 100_000]).unwrap();
        let err = supercell(&s, huge).unwrap_err();
        assert!(matches!(err, StructureError::InvalidParameter(_)));
        assert!(err.to_string().contains("limit"));

        let skewed = [[1, 100_000, 0], [0, 1, 0], [0, 0, 1]];
        assert!(matches!(supercell(&s, skewed), Err(StructureError::InvalidParameter(_))));

        let overflow = [[i64::MAX, 0, 0], [0, i64::MAX, 0], [0, 0, 1]];
        assert!(matches!(supercell(&s, overflow), Err(StructureError::InvalidParameter(_))));
    }

    #[test]
    fn test_supercell_at_atom_limit() {
        // 8 sites x 12500 cells is exactly the limit; one more cell is not.
        let s = nacl();
        let at_limit = repetition_matrix(&[12_500, 1, 1]).unwrap();
        assert_eq!(supercell(&s, at_limit).unwrap().num_sites(), MAX_ATOMS);
        let over = repetition_matrix(&[12_501, 1, 1]).unwrap();
        assert!(supercell(&s, over).is_err());
    }

    #[test]
    fn test_mic_shortens_distance() {
        let lattice = Lattice::from_parameters(10.0, 10.0, 10.0, 90.0, 90.0, 90.0).unwrap();
        let s = Structure::new(
            lattice,
            vec![Site::new("H", [0.05, 0.0, 0.0]), Site::new("H", [0.95, 0.0, 0.0])],
        );
        assert!((distance(&s, 0, 1, false).unwrap() - 9.0).abs() < 1e-9);
        assert!((distance(&s, 0, 1, true).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_mic_non_orthogonal() {
        let lattice = Lattice::from_parameters(3.0, 3.0, 3.0, 60.0, 60.0, 60.0).unwrap();
        let s = Structure::new(
            lattice,
            vec![Site::new("Cu", [0.0, 0.0, 0.0]), Site::new("Cu", [0.5, 0.5, 0.0])],
        );
        // (a + b) / 2 is 2.598 Å; the image (b - a) / 2 is 1.5 Å.
        assert!((distance(&s, 0, 1, false).unwrap() - 2.598_076_211).abs() < 1e-6);
        assert!((distance(&s, 0, 1, true).unwrap() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_distance_index_out_of_range() {
        let s = nacl();
        assert!(matches!(
            distance(&s, 0, 8, true),
            Err(StructureError::IndexOutOfRange { index: 8, .. })
        ));
    }

    #[test]
    fn test_close_contacts() {
        let s = nacl();
        // Na-Cl is 2.845 Å against 1.66 + 1.02 - 0.5 = 2.18 Å.
        assert!(close_contacts(&s, -0.5).is_empty());

        let mut crowded = s.clone();
        crowded.sites.push(Site::new("Na", [0.05, 0.0, 0.0]));
        let contacts = close_contacts(&crowded, -0.5);
        assert!(contacts.iter().any(|c| c.index1 == 0 && c.index2 == 8));
        assert!(contacts.iter().all(|c| c.distance < c.min_distance));
    }

    #[test]
    fn test_supercell_diagonal() {
        let s = nacl();
        let sc = supercell(&s, repetition_matrix(&[2, 1, 1]).unwrap()).unwrap();
        assert_eq!(sc.num_sites(), 16);
        assert!((sc.lattice.lengths()[0] - 11.38).abs() < 1e-9);
        assert_eq!(sc.formula(), "Cl8Na8");
        assert!((sc.lattice.volume() - 2.0 * s.lattice.volume()).abs() < 1e-6);
    }

    #[test]
    fn test_supercell_general_matrix() {
        let s = nacl();
        let sc = supercell(&s, repetition_matrix(&[1, 1, 0, -1, 1, 0, 0, 0, 1]).unwrap()).unwrap();
        assert_eq!(sc.num_sites(), 16);
        for site in &sc.sites {
            assert!(site.frac.iter().all(|v| (0.0..1.0).contains(v)));
        }
    }

    #[test]
    fn test_supercell_rejects_singular() {
        let s = nacl();
        assert!(supercell(&s, [[1, 0, 0], [2, 0, 0], [0, 0, 1]]).is_err());
        assert!(repetition_matrix(&[1, 2]).is_err());
    }
}
