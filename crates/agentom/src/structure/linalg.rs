//! Small fixed-size vector and matrix helpers.
//!
//! Matrices are row-major `[[f64; 3]; 3]`; lattice matrices store one
//! lattice vector per row, so Cartesian coordinates are `frac · M`.

pub type Vec3 = [f64; 3];
pub type Mat3 = [[f64; 3]; 3];

pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn scale(a: Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

/// Angle between two vectors in degrees.
pub fn angle_deg(a: Vec3, b: Vec3) -> f64 {
    let cos = (dot(a, b) / (norm(a) * norm(b))).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

pub fn det(m: &Mat3) -> f64 {
    dot(m[0], cross(m[1], m[2]))
}

/// Inverse of `m`, or `None` when it is (numerically) singular.
pub fn inverse(m: &Mat3) -> Option<Mat3> {
    let d = det(m);
    if d.abs() < 1e-12 {
        return None;
    }
    // Columns of the inverse are the cross products of the rows.
    let c0 = cross(m[1], m[2]);
    let c1 = cross(m[2], m[0]);
    let c2 = cross(m[0], m[1]);
    let mut inv = [[0.0; 3]; 3];
    for i in 0..3 {
        inv[i] = [c0[i] / d, c1[i] / d, c2[i] / d];
    }
    Some(inv)
}

/// Row vector times matrix.
pub fn vec_mat(v: Vec3, m: &Mat3) -> Vec3 {
    let mut out = [0.0; 3];
    for (j, slot) in out.iter_mut().enumerate() {
        *slot = v[0] * m[0][j] + v[1] * m[1][j] + v[2] * m[2][j];
    }
    out
}

pub fn mat_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    [vec_mat(a[0], b), vec_mat(a[1], b), vec_mat(a[2], b)]
}

/// Integer 3×3 matrix as floats.
pub fn to_float(m: &[[i64; 3]; 3]) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = m[i][j] as f64;
        }
    }
    out
}
