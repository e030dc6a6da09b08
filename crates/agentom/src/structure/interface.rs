//! Film/substrate interfaces from a lattice-matched pair of slabs.
//!
//! Both bulk structures are cut into slabs, then small in-plane supercells
//! of each are enumerated (upper-triangular integer matrices, reduced to
//! short vectors) until a pair agrees in area, vector lengths and angle
//! within tolerance. The film is strained onto the substrate supercell and
//! stacked above it with a gap.

use serde::Serialize;

use super::ops::supercell;
use super::surface::slab;
use super::{Lattice, MAX_ATOMS, Site, Structure, StructureError};

/// Most unit cells a matched in-plane supercell may span.
const MAX_MATCH_CELLS: usize = 100;

type Vec2 = [f64; 2];
type Coeffs = [[i64; 2]; 2];

/// Interface construction parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceParams {
    /// Miller plane of the film
    pub film_miller: [i64; 3],
    /// Miller plane of the substrate
    pub substrate_miller: [i64; 3],
    /// Distance between substrate top and film bottom, Å
    pub gap: f64,
    /// Vacuum above the film, Å; zero means "same as the gap"
    pub vacuum_over_film: f64,
    /// Film thickness in layers
    pub film_layers: u32,
    /// Substrate thickness in layers
    pub substrate_layers: u32,
    /// Largest supercell area considered, Å²
    pub max_area: f64,
    /// Relative tolerance on matched vector lengths
    pub max_length_tol: f64,
    /// Relative tolerance on the matched in-plane angle
    pub max_angle_tol: f64,
    /// Relative tolerance on matched supercell areas
    pub max_area_ratio_tol: f64,
}

impl Default for InterfaceParams {
    fn default() -> Self {
        Self {
            film_miller: [1, 0, 0],
            substrate_miller: [1, 1, 1],
            gap: 2.5,
            vacuum_over_film: 0.0,
            film_layers: 2,
            substrate_layers: 2,
            max_area: 400.0,
            max_length_tol: 0.03,
            max_angle_tol: 0.01,
            max_area_ratio_tol: 0.09,
        }
    }
}

/// The lattice match an interface was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceMatch {
    /// In-plane supercell of the film slab (rows in slab lattice units)
    pub film_supercell: Coeffs,
    /// In-plane supercell of the substrate slab
    pub substrate_supercell: Coeffs,
    /// Area of the matched substrate supercell, Å²
    pub match_area: f64,
    /// Relative length mismatch of the two matched vectors
    pub length_strain: [f64; 2],
    /// Relative mismatch of the in-plane angle
    pub angle_strain: f64,
}

impl InterfaceMatch {
    /// Largest absolute strain component.
    pub fn max_strain(&self) -> f64 {
        self.length_strain
            .iter()
            .chain(std::iter::once(&self.angle_strain))
            .fold(0.0f64, |m, s| m.max(s.abs()))
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    vectors: [Vec2; 2],
    coeffs: Coeffs,
    area: f64,
}

fn cross2(a: Vec2, b: Vec2) -> f64 {
    a[0] * b[1] - a[1] * b[0]
}

fn dot2(a: Vec2, b: Vec2) -> f64 {
    a[0] * b[0] + a[1] * b[1]
}

fn norm2(a: Vec2) -> f64 {
    dot2(a, a).sqrt()
}

fn angle2(a: Vec2, b: Vec2) -> f64 {
    (dot2(a, b) / (norm2(a) * norm2(b))).clamp(-1.0, 1.0).acos()
}

fn combine(coeffs: [i64; 2], basis: [Vec2; 2]) -> Vec2 {
    let (x, y) = (coeffs[0] as f64, coeffs[1] as f64);
    [
        x * basis[0][0] + y * basis[1][0],
        x * basis[0][1] + y * basis[1][1],
    ]
}

/// Lagrange-reduce a 2D basis, keep it right-handed with an acute angle.
fn reduce(basis: [Vec2; 2], mut coeffs: Coeffs) -> Candidate {
    let mut v = [combine(coeffs[0], basis), combine(coeffs[1], basis)];
    loop {
        if dot2(v[0], v[0]) > dot2(v[1], v[1]) + 1e-10 {
            v.swap(0, 1);
            coeffs.swap(0, 1);
        }
        let (d, nn) = (dot2(v[0], v[1]), dot2(v[0], v[0]));
        if 2.0 * d.abs() <= nn + 1e-10 {
            break;
        }
        let mu = (d / nn).round() as i64;
        coeffs[1] = [coeffs[1][0] - mu * coeffs[0][0], coeffs[1][1] - mu * coeffs[0][1]];
        v[1] = combine(coeffs[1], basis);
    }
    if cross2(v[0], v[1]) < 0.0 {
        coeffs[1] = [-coeffs[1][0], -coeffs[1][1]];
        v[1] = combine(coeffs[1], basis);
    }
    if dot2(v[0], v[1]) < -1e-10 {
        coeffs = [coeffs[1], [-coeffs[0][0], -coeffs[0][1]]];
        v = [combine(coeffs[0], basis), combine(coeffs[1], basis)];
    }
    Candidate {
        vectors: v,
        coeffs,
        area: cross2(v[0], v[1]).abs(),
    }
}

/// Every reduced supercell of `basis` with area up to `max_area` and at
/// most `max_cells` unit cells.
fn candidates(basis: [Vec2; 2], max_area: f64, max_cells: i64) -> Vec<Candidate> {
    let unit = cross2(basis[0], basis[1]).abs();
    if unit <= 0.0 {
        return Vec::new();
    }
    let max_n = ((max_area / unit).floor() as i64).min(max_cells);
    let mut out = Vec::new();
    for n in 1..=max_n {
        for a in (1..=n).filter(|a| n % a == 0) {
            let d = n / a;
            for b in 0..d {
                out.push(reduce(basis, [[a, 0], [b, d]]));
            }
        }
    }
    out
}

fn in_plane(structure: &Structure) -> [Vec2; 2] {
    let m = structure.lattice.matrix();
    [[m[0][0], m[0][1]], [m[1][0], m[1][1]]]
}

/// Find the smallest-area match, preferring lower strain among equals.
fn find_match(
    film: [Vec2; 2],
    substrate: [Vec2; 2],
    params: &InterfaceParams,
    max_cells: i64,
) -> Option<InterfaceMatch> {
    let films = candidates(film, params.max_area, max_cells);
    let mut substrates = candidates(substrate, params.max_area, max_cells);
    substrates.sort_by(|a, b| a.area.total_cmp(&b.area));

    let mut best: Option<InterfaceMatch> = None;
    for s in &substrates {
        if let Some(found) = &best
            && s.area > found.match_area + 1e-6
        {
            break;
        }
        for f in &films {
            if (f.area / s.area - 1.0).abs() > params.max_area_ratio_tol {
                continue;
            }
            // The rotated pairing covers bases whose reduction ordered the
            // two vectors differently.
            let rotated = Candidate {
                vectors: [f.vectors[1], [-f.vectors[0][0], -f.vectors[0][1]]],
                coeffs: [f.coeffs[1], [-f.coeffs[0][0], -f.coeffs[0][1]]],
                area: f.area,
            };
            for variant in [*f, rotated] {
                let u = variant.vectors;
                let v = s.vectors;
                let length_strain = [norm2(u[0]) / norm2(v[0]) - 1.0, norm2(u[1]) / norm2(v[1]) - 1.0];
                let angle_strain = angle2(u[0], u[1]) / angle2(v[0], v[1]) - 1.0;
                if length_strain.iter().any(|e| e.abs() > params.max_length_tol)
                    || angle_strain.abs() > params.max_angle_tol
                {
                    continue;
                }
                let candidate = InterfaceMatch {
                    film_supercell: variant.coeffs,
                    substrate_supercell: s.coeffs,
                    match_area: s.area,
                    length_strain,
                    angle_strain,
                };
                let better = best
                    .as_ref()
                    .is_none_or(|b| candidate.max_strain() < b.max_strain());
                if better {
                    best = Some(candidate);
                }
            }
        }
    }
    best
}

fn expand(coeffs: Coeffs) -> [[i64; 3]; 3] {
    [
        [coeffs[0][0], coeffs[0][1], 0],
        [coeffs[1][0], coeffs[1][1], 0],
        [0, 0, 1],
    ]
}

fn z_range(structure: &Structure) -> (f64, f64) {
    structure
        .cart_coords()
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
            (lo.min(c[2]), hi.max(c[2]))
        })
}

/// Build a film-on-substrate interface.
pub fn build_interface(
    film: &Structure,
    substrate: &Structure,
    params: &InterfaceParams,
) -> Result<(Structure, InterfaceMatch), StructureError> {
    if !(params.gap.is_finite() && params.gap > 0.0) {
        return Err(StructureError::InvalidParameter(format!(
            "gap must be positive, got {}",
            params.gap
        )));
    }
    if !(params.vacuum_over_film.is_finite() && params.vacuum_over_film >= 0.0) {
        return Err(StructureError::InvalidParameter(format!(
            "vacuum over film must be non-negative, got {}",
            params.vacuum_over_film
        )));
    }

    let film_slab = slab(film, params.film_miller, params.film_layers)?;
    let substrate_slab = slab(substrate, params.substrate_miller, params.substrate_layers)?;

    let largest_slab = film_slab.num_sites().max(substrate_slab.num_sites()).max(1);
    let max_cells = (MAX_ATOMS / largest_slab).min(MAX_MATCH_CELLS) as i64;

    let matched = find_match(in_plane(&film_slab), in_plane(&substrate_slab), params, max_cells).ok_or_else(|| {
        StructureError::NoMatch(format!(
            "film {:?} on substrate {:?} within area {} Å², length tol {}, angle tol {}; try adjusting tolerances or Miller indices",
            params.film_miller,
            params.substrate_miller,
            params.max_area,
            params.max_length_tol,
            params.max_angle_tol
        ))
    })?;
    tracing::debug!(
        area = matched.match_area,
        strain = matched.max_strain(),
        "interface lattice match"
    );

    let film_super = supercell(&film_slab, expand(matched.film_supercell))?;
    let substrate_super = supercell(&substrate_slab, expand(matched.substrate_supercell))?;

    let (sub_lo, sub_hi) = z_range(&substrate_super);
    let (film_lo, film_hi) = z_range(&film_super);
    let vacuum = if params.vacuum_over_film == 0.0 {
        params.gap
    } else {
        params.vacuum_over_film
    };
    let film_base = (sub_hi - sub_lo) + params.gap;
    let height = film_base + (film_hi - film_lo) + vacuum;

    let m = substrate_super.lattice.matrix();
    let lattice = Lattice::new([
        [m[0][0], m[0][1], 0.0],
        [m[1][0], m[1][1], 0.0],
        [0.0, 0.0, height],
    ])?;

    let mut sites = Vec::with_capacity(substrate_super.num_sites() + film_super.num_sites());
    for (site, cart) in substrate_super.sites.iter().zip(substrate_super.cart_coords()) {
        sites.push(Site::new(
            site.species.clone(),
            [site.frac[0], site.frac[1], (cart[2] - sub_lo) / height],
        ));
    }
    // In-plane fractional coordinates carry over, which strains the film
    // onto the substrate supercell.
    for (site, cart) in film_super.sites.iter().zip(film_super.cart_coords()) {
        sites.push(Site::new(
            site.species.clone(),
            [site.frac[0], site.frac[1], (cart[2] - film_lo + film_base) / height],
        ));
    }

    let mut interface = Structure::new(lattice, sites);
    interface
        .metadata
        .insert("film".to_string(), film.reduced_formula());
    interface
        .metadata
        .insert("substrate".to_string(), substrate.reduced_formula());
    Ok((interface, matched))
}
