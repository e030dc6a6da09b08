//! Surface slabs cut along a Miller plane.
//!
//! The in-plane basis is chosen from the Miller indices with an extended
//! Euclid step so the two surface vectors are as short and as orthogonal
//! as the lattice allows; the third vector is then projected onto the
//! surface normal and the cell rotated so the surface lies in the xy plane.

use super::linalg::{self, Vec3};
use super::{Lattice, Site, Structure, StructureError, derived_site_count, wrap_unit};

const TOL: f64 = 1e-10;

/// Floor division with the sign convention of the divisor.
fn floor_div(a: i64, b: i64) -> i64 {
    (a - floor_mod(a, b)) / b
}

/// Remainder with the sign of the divisor.
fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }
}

/// `(x, y)` with `a·x + b·y = gcd(a, b)`.
fn ext_gcd(a: i64, b: i64) -> (i64, i64) {
    if b == 0 {
        (1, 0)
    } else if floor_mod(a, b) == 0 {
        (0, 1)
    } else {
        let (x, y) = ext_gcd(b, floor_mod(a, b));
        (y, x - y * floor_div(a, b))
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 { a.abs() } else { gcd(b, a % b) }
}

/// Integer basis `[c1, c2, c3]` (rows, in lattice coordinates) whose first
/// two vectors span the `(h k l)` plane.
fn surface_basis(lattice: &Lattice, miller: [i64; 3]) -> [[i64; 3]; 3] {
    let [h, k, l] = miller;
    let zeros = miller.map(|m| m == 0);

    if zeros.iter().filter(|z| **z).count() == 2 {
        return if !zeros[0] {
            [[0, 1, 0], [0, 0, 1], [1, 0, 0]]
        } else if !zeros[1] {
            [[0, 0, 1], [1, 0, 0], [0, 1, 0]]
        } else {
            [[1, 0, 0], [0, 1, 0], [0, 0, 1]]
        };
    }

    let (mut p, mut q) = ext_gcd(k, l);
    let [a1, a2, a3] = lattice.matrix();
    let comb = |x: i64, u: Vec3, y: i64, v: Vec3| {
        linalg::sub(linalg::scale(u, x as f64), linalg::scale(v, y as f64))
    };

    // dot(c1, c2) = k1 + i * k2 for integer i; pick i to minimise it.
    let ka = comb(k, a1, h, a2);
    let la = comb(l, a1, h, a3);
    let normal_ref = comb(l, a2, k, a3);
    let k1 = linalg::dot(
        linalg::add(linalg::scale(ka, p as f64), linalg::scale(la, q as f64)),
        normal_ref,
    );
    let k2 = linalg::dot(
        linalg::sub(linalg::scale(ka, l as f64), linalg::scale(la, k as f64)),
        normal_ref,
    );
    if k2.abs() > TOL {
        let i = -((k1 / k2).round_ties_even() as i64);
        p += i * l;
        q -= i * k;
    }

    let (a, b) = ext_gcd(p * k + q * l, h);
    let g = gcd(l, k);
    [
        [p * k + q * l, -p * h, -q * h],
        [0, l / g, -k / g],
        [b, a * p, a * q],
    ]
}

/// Stack `layers` copies of the `(h k l)` surface cell without vacuum.
///
/// The returned slab has `a` along x, `b` in the xy plane and `c` along z
/// with height equal to the stacked layers; it is periodic in-plane only.
pub(crate) fn slab(
    bulk: &Structure,
    miller: [i64; 3],
    layers: u32,
) -> Result<Structure, StructureError> {
    if miller == [0, 0, 0] {
        return Err(StructureError::InvalidParameter(
            "Miller indices cannot all be zero".to_string(),
        ));
    }
    if layers == 0 {
        return Err(StructureError::InvalidParameter(
            "layers must be at least 1".to_string(),
        ));
    }

    let basis = surface_basis(&bulk.lattice, miller);
    let basis_f = linalg::to_float(&basis);
    let basis_inv = linalg::inverse(&basis_f).ok_or_else(|| {
        StructureError::InvalidParameter(format!("degenerate surface basis for {miller:?}"))
    })?;

    // Re-express every atom in the new basis and fold into the cell.
    let cell = linalg::mat_mul(&basis_f, &bulk.lattice.matrix());
    let mut frac: Vec<(String, Vec3)> = bulk
        .sites
        .iter()
        .map(|s| {
            let mut f = linalg::vec_mat(s.frac, &basis_inv);
            for v in &mut f {
                *v -= (*v + TOL).floor();
            }
            (s.species.clone(), f)
        })
        .collect();

    // Repeat along the third vector.
    let n = f64::from(layers);
    let mut stacked = Vec::with_capacity(derived_site_count(frac.len(), u64::from(layers), "slab")?);
    for layer in 0..layers {
        for (species, f) in &frac {
            stacked.push((species.clone(), [f[0], f[1], (f[2] + f64::from(layer)) / n]));
        }
    }
    frac = stacked;
    let [a1, a2, a3] = cell;
    let a3 = linalg::scale(a3, n);

    // Cartesian positions are kept while the third vector is replaced by
    // its projection on the surface normal.
    let stacked_lattice = Lattice::new([a1, a2, a3])?;
    let normal = linalg::cross(a1, a2);
    let a3_proj = linalg::scale(normal, linalg::dot(a3, normal) / linalg::dot(normal, normal));
    let projected = Lattice::new([a1, a2, a3_proj])?;
    let refrac: Vec<Vec3> = frac
        .iter()
        .map(|(_, f)| projected.to_fractional(stacked_lattice.to_cartesian(*f)))
        .collect();

    // Rotate: a along x, b in xy, c along z. Fractional coordinates carry over.
    let len1 = linalg::norm(a1);
    let bx = linalg::dot(a1, a2) / len1;
    let by = (linalg::dot(a2, a2) - bx * bx).max(0.0).sqrt();
    let rotated = Lattice::new([
        [len1, 0.0, 0.0],
        [bx, by, 0.0],
        [0.0, 0.0, linalg::norm(a3_proj)],
    ])?;

    let sites = frac
        .iter()
        .zip(refrac)
        .map(|((species, _), f)| Site::new(species.clone(), [wrap_unit(f[0]), wrap_unit(f[1]), f[2]]))
        .collect();

    Ok(Structure {
        lattice: rotated,
        sites,
        pbc: [true, true, false],
        metadata: bulk.metadata.clone(),
    })
}

/// Cut a slab of `layers` unit layers along `miller` and pad it with
/// `vacuum` Å on both sides of the surface.
///
/// With zero vacuum the cell keeps the stacked layer height.
pub fn surface(
    bulk: &Structure,
    miller: [i64; 3],
    layers: u32,
    vacuum: f64,
) -> Result<Structure, StructureError> {
    if !vacuum.is_finite() || vacuum < 0.0 {
        return Err(StructureError::InvalidParameter(format!(
            "vacuum must be a non-negative number of Å, got {vacuum}"
        )));
    }
    let slab = slab(bulk, miller, layers)?;
    if vacuum == 0.0 {
        return Ok(slab);
    }

    let carts = slab.cart_coords();
    let (zmin, zmax) = carts
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
            (lo.min(c[2]), hi.max(c[2]))
        });
    let height = (zmax - zmin) + 2.0 * vacuum;
    let m = slab.lattice.matrix();
    let lattice = Lattice::new([m[0], m[1], [0.0, 0.0, height]])?;

    let sites = slab
        .sites
        .iter()
        .zip(&carts)
        .map(|(site, cart)| {
            let shifted = [cart[0], cart[1], cart[2] - zmin + vacuum];
            let f = lattice.to_fractional(shifted);
            Site::new(site.species.clone(), [wrap_unit(f[0]), wrap_unit(f[1]), f[2]])
        })
        .collect();

    Ok(Structure {
        lattice,
        sites,
        pbc: slab.pbc,
        metadata: slab.metadata,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::structure::tests::nacl;

    fn fcc_primitive(a: f64) -> Structure {
        let h = a / 2.0;
        let lattice = Lattice::new([[0.0, h, h], [h, 0.0, h], [h, h, 0.0]]).unwrap();
        Structure::new(lattice, vec![Site::new("Cu", [0.0, 0.0, 0.0])])
    }

    #[test]
    fn test_python_style_division() {
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(floor_mod(-7, 2), 1);
        assert_eq!(floor_mod(7, -2), -1);
        let (x, y) = ext_gcd(240, 46);
        assert_eq!(240 * x + 46 * y, 2);
        let (x, y) = ext_gcd(-3, 5);
        assert_eq!(-3 * x + 5 * y, 1);
    }

    #[test]
    fn test_surface_100_of_cubic() {
        let s = nacl();
        let slab = surface(&s, [1, 0, 0], 2, 10.0).unwrap();

        assert_eq!(slab.num_sites(), 16);
        assert_eq!(slab.pbc, [true, true, false]);
        let [a, b, c] = slab.lattice.lengths();
        assert!((a - 5.69).abs() < 1e-9);
        assert!((b - 5.69).abs() < 1e-9);
        // Two layers span 5.69 + 2.845 Å of atoms plus vacuum on both sides.
        assert!((c - (5.69 + 2.845 + 20.0)).abs() < 1e-6);

        let carts = slab.cart_coords();
        let zmin = carts.iter().map(|p| p[2]).fold(f64::INFINITY, f64::min);
        assert!((zmin - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_surface_111_of_fcc() {
        let bulk = fcc_primitive(3.6);
        let slab = surface(&bulk, [1, 1, 1], 3, 5.0).unwrap();

        assert_eq!(slab.num_sites(), 3);
        let [a, b, _] = slab.lattice.lengths();
        let nn = 3.6 / 2f64.sqrt();
        assert!((a - nn).abs() < 1e-9, "a = {a}");
        assert!((b - nn).abs() < 1e-9, "b = {b}");
        let gamma = slab.lattice.angles()[2];
        assert!((gamma - 60.0).abs() < 1e-6 || (gamma - 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_surface_rejects_bad_input() {
        let s = nacl();
        assert!(surface(&s, [0, 0, 0], 2, 10.0).is_err());
        assert!(surface(&s, [1, 0, 0], 0, 10.0).is_err());
        assert!(surface(&s, [1, 0, 0], 1, -1.0).is_err());
    }

    #[test]
    fn test_surface_rejects_oversized_slab() {
        let s = nacl();
        let err = surface(&s, [1, 0, 0], 4_000_000_000, 10.0).unwrap_err();
        assert!(matches!(err, StructureError::InvalidParameter(_)));
        assert!(err.to_string().contains("limit"));
    }

    #[test]
    fn test_surface_zero_vacuum_keeps_layer_height() {
        let s = nacl();
        let slab = surface(&s, [0, 0, 1], 3, 0.0).unwrap();
        assert!((slab.lattice.lengths()[2] - 3.0 * 5.69).abs() < 1e-9);
    }
}
