//! Structure file formats: CIF, POSCAR and pymatgen-style JSON.

use std::fmt;
use std::path::Path;

use serde_json::{Value, json};

use super::elements::symbol_from_label;
use super::{Lattice, Site, Structure, StructureError, wrap_unit};

/// Supported structure file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureFormat {
    /// Crystallographic Information File
    Cif,
    /// VASP POSCAR (VASP 5 layout with a species line)
    Poscar,
    /// pymatgen `Structure.as_dict()` JSON
    Json,
}

impl fmt::Display for StructureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StructureFormat::Cif => "cif",
            StructureFormat::Poscar => "poscar",
            StructureFormat::Json => "json",
        })
    }
}

impl StructureFormat {
    /// Parse a user-facing format name.
    pub fn from_name(name: &str) -> Result<Self, StructureError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cif" => Ok(Self::Cif),
            "poscar" | "vasp" | "contcar" => Ok(Self::Poscar),
            "json" => Ok(Self::Json),
            other => Err(StructureError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Infer the format from a file name.
    pub fn from_path(path: &str) -> Result<Self, StructureError> {
        let path = Path::new(path);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_uppercase())
            .unwrap_or_default();
        if stem.starts_with("POSCAR") || stem.starts_with("CONTCAR") {
            return Ok(Self::Poscar);
        }
        match path.extension().map(|e| e.to_string_lossy().into_owned()) {
            Some(ext) => Self::from_name(&ext),
            None => Err(StructureError::UnsupportedFormat(
                path.display().to_string(),
            )),
        }
    }

    /// Canonical file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            StructureFormat::Cif => "cif",
            StructureFormat::Poscar => "vasp",
            StructureFormat::Json => "json",
        }
    }
}

/// Parse a structure from file contents.
pub fn load(text: &str, format: StructureFormat) -> Result<Structure, StructureError> {
    match format {
        StructureFormat::Cif => parse_cif(text),
        StructureFormat::Poscar => parse_poscar(text),
        StructureFormat::Json => {
            let value: Value = serde_json::from_str(text).map_err(|e| StructureError::Parse {
                format,
                message: e.to_string(),
            })?;
            from_pymatgen_json(&value)
        }
    }
}

/// Serialize a structure.
pub fn dump(structure: &Structure, format: StructureFormat) -> String {
    match format {
        StructureFormat::Cif => write_cif(structure),
        StructureFormat::Poscar => write_poscar(structure),
        StructureFormat::Json => {
            serde_json::to_string_pretty(&to_pymatgen_json(structure)).unwrap_or_default()
        }
    }
}

fn parse_err(format: StructureFormat, message: impl Into<String>) -> StructureError {
    StructureError::Parse {
        format,
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// CIF

#[derive(Debug, Default)]
struct CifBlock {
    items: Vec<(String, String)>,
    loops: Vec<(Vec<String>, Vec<String>)>,
}

impl CifBlock {
    fn item(&self, tag: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(t, _)| t.eq_ignore_ascii_case(tag))
            .map(|(_, v)| v.as_str())
    }

    fn number(&self, tag: &str) -> Result<f64, StructureError> {
        let raw = self
            .item(tag)
            .ok_or_else(|| parse_err(StructureFormat::Cif, format!("missing {tag}")))?;
        cif_number(raw)
            .ok_or_else(|| parse_err(StructureFormat::Cif, format!("invalid {tag}: {raw}")))
    }

    /// Column `tag` of the loop that contains it.
    fn column(&self, tag: &str) -> Option<Vec<&str>> {
        for (tags, values) in &self.loops {
            if let Some(col) = tags.iter().position(|t| t.eq_ignore_ascii_case(tag)) {
                let width = tags.len();
                return Some(
                    values
                        .iter()
                        .skip(col)
                        .step_by(width)
                        .map(String::as_str)
                        .collect(),
                );
            }
        }
        None
    }
}

/// Split CIF text into tokens, honoring quotes and `;` text fields.
fn cif_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        if let Some(rest) = line.strip_prefix(';') {
            let mut field = rest.to_string();
            for next in lines.by_ref() {
                if next.starts_with(';') {
                    break;
                }
                field.push('\n');
                field.push_str(next);
            }
            tokens.push(field.trim().to_string());
            continue;
        }

        let mut chars = line.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
            } else if c == '#' {
                break;
            } else if c == '\'' || c == '"' {
                chars.next();
                let mut tok = String::new();
                while let Some(d) = chars.next() {
                    // A quote only closes when followed by whitespace or EOL.
                    if d == c && chars.peek().is_none_or(|n| n.is_whitespace()) {
                        break;
                    }
                    tok.push(d);
                }
                tokens.push(tok);
            } else {
                let mut tok = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_whitespace() {
                        break;
                    }
                    tok.push(d);
                    chars.next();
                }
                tokens.push(tok);
            }
        }
    }
    tokens
}

fn parse_cif_block(text: &str) -> Result<CifBlock, StructureError> {
    let tokens = cif_tokens(text);
    let mut block = CifBlock::default();
    let mut seen_data = false;
    let mut i = 0;

    while i < tokens.len() {
        let tok = &tokens[i];
        let lower = tok.to_ascii_lowercase();
        if lower.starts_with("data_") {
            if seen_data {
                // Only the first data block is read.
                break;
            }
            seen_data = true;
            i += 1;
        } else if lower == "loop_" {
            i += 1;
            let mut tags = Vec::new();
            while i < tokens.len() && tokens[i].starts_with('_') {
                tags.push(tokens[i].clone());
                i += 1;
            }
            let mut values = Vec::new();
            while i < tokens.len() && !is_cif_keyword(&tokens[i]) {
                values.push(tokens[i].clone());
                i += 1;
            }
            if !tags.is_empty() {
                block.loops.push((tags, values));
            }
        } else if tok.starts_with('_') {
            let value = tokens.get(i + 1).cloned().unwrap_or_default();
            block.items.push((tok.clone(), value));
            i += 2;
        } else {
            i += 1;
        }
    }

    if !seen_data {
        return Err(parse_err(StructureFormat::Cif, "no data_ block found"));
    }
    Ok(block)
}

fn is_cif_keyword(tok: &str) -> bool {
    let lower = tok.to_ascii_lowercase();
    tok.starts_with('_') || lower == "loop_" || lower.starts_with("data_")
}

/// Parse a CIF number, dropping a standard uncertainty such as `5.69(2)`.
fn cif_number(raw: &str) -> Option<f64> {
    let trimmed = raw.split('(').next().unwrap_or(raw).trim();
    if trimmed == "." || trimmed == "?" {
        return None;
    }
    trimmed.parse().ok()
}

/// An affine symmetry operation on fractional coordinates.
#[derive(Debug, Clone, PartialEq)]
struct SymOp {
    rotation: [[f64; 3]; 3],
    translation: [f64; 3],
}

impl SymOp {
    fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }

    /// Parse an operation such as `-x+1/2, y, z-y`.
    fn parse(op: &str) -> Option<Self> {
        let parts: Vec<&str> = op.split(',').collect();
        if parts.len() != 3 {
            return None;
        }
        let mut rotation = [[0.0; 3]; 3];
        let mut translation = [0.0; 3];
        for (row, expr) in parts.iter().enumerate() {
            let (coeffs, constant) = parse_symop_component(expr)?;
            rotation[row] = coeffs;
            translation[row] = constant;
        }
        Some(Self {
            rotation,
            translation,
        })
    }

    fn apply(&self, frac: [f64; 3]) -> [f64; 3] {
        let mut out = self.translation;
        for (row, slot) in out.iter_mut().enumerate() {
            for (col, value) in frac.iter().enumerate() {
                *slot += self.rotation[row][col] * value;
            }
        }
        out
    }
}

fn parse_symop_component(expr: &str) -> Option<([f64; 3], f64)> {
    let cleaned: String = expr
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();

    // Split into signed terms.
    let mut terms = Vec::new();
    let mut current = String::new();
    for c in cleaned.chars() {
        if (c == '+' || c == '-') && !current.is_empty() {
            terms.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        terms.push(current);
    }

    let mut coeffs = [0.0; 3];
    let mut constant = 0.0;
    for term in terms {
        let (sign, body) = match term.strip_prefix('-') {
            Some(rest) => (-1.0, rest),
            None => (1.0, term.strip_prefix('+').unwrap_or(&term)),
        };
        let axis = body.find(['x', 'y', 'z']);
        match axis {
            Some(pos) => {
                let var = body[pos..].chars().next()?;
                let index = match var {
                    'x' => 0,
                    'y' => 1,
                    _ => 2,
                };
                let factor = body[..pos].trim_end_matches('*');
                let value = if factor.is_empty() {
                    1.0
                } else {
                    parse_fraction(factor)?
                };
                coeffs[index] += sign * value;
            }
            None => constant += sign * parse_fraction(body)?,
        }
    }
    Some((coeffs, constant))
}

fn parse_fraction(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then_some(num.parse::<f64>().ok()? / den)
        }
        None => s.parse().ok(),
    }
}

/// Parse the first data block of a CIF, expanding symmetry operations to
/// a P1 site list.
pub fn parse_cif(text: &str) -> Result<Structure, StructureError> {
    let block = parse_cif_block(text)?;
    let fmt = StructureFormat::Cif;

    let lattice = Lattice::from_parameters(
        block.number("_cell_length_a")?,
        block.number("_cell_length_b")?,
        block.number("_cell_length_c")?,
        block.number("_cell_angle_alpha")?,
        block.number("_cell_angle_beta")?,
        block.number("_cell_angle_gamma")?,
    )?;

    let ops_column = block
        .column("_symmetry_equiv_pos_as_xyz")
        .or_else(|| block.column("_space_group_symop_operation_xyz"));
    let mut ops = Vec::new();
    match ops_column {
        Some(column) => {
            for op in column {
                ops.push(
                    SymOp::parse(op)
                        .ok_or_else(|| parse_err(fmt, format!("invalid symmetry operation '{op}'")))?,
                );
            }
        }
        None => ops.push(SymOp::identity()),
    }

    let xs = block
        .column("_atom_site_fract_x")
        .ok_or_else(|| parse_err(fmt, "missing _atom_site_fract_x"))?;
    let ys = block
        .column("_atom_site_fract_y")
        .ok_or_else(|| parse_err(fmt, "missing _atom_site_fract_y"))?;
    let zs = block
        .column("_atom_site_fract_z")
        .ok_or_else(|| parse_err(fmt, "missing _atom_site_fract_z"))?;
    let labels = block
        .column("_atom_site_type_symbol")
        .or_else(|| block.column("_atom_site_label"))
        .ok_or_else(|| parse_err(fmt, "missing _atom_site_type_symbol"))?;

    let mut sites: Vec<Site> = Vec::new();
    for (i, label) in labels.iter().enumerate() {
        let species = symbol_from_label(label)
            .ok_or_else(|| parse_err(fmt, format!("unknown element in label '{label}'")))?;
        let coord = |column: &[&str]| -> Result<f64, StructureError> {
            let raw = column
                .get(i)
                .ok_or_else(|| parse_err(fmt, "truncated atom_site loop"))?;
            cif_number(raw).ok_or_else(|| parse_err(fmt, format!("invalid coordinate '{raw}'")))
        };
        let frac = [coord(&xs)?, coord(&ys)?, coord(&zs)?];

        for op in &ops {
            let mut image = op.apply(frac);
            for v in &mut image {
                *v = wrap_unit(*v);
            }
            let duplicate = sites
                .iter()
                .any(|s| s.species == species && same_periodic_position(s.frac, image));
            if !duplicate {
                sites.push(Site::new(species.clone(), image));
            }
        }
    }

    if sites.is_empty() {
        return Err(parse_err(fmt, "no atoms found"));
    }

    let mut structure = Structure::new(lattice, sites);
    if let Some(id) = block.item("_database_code_mp").or_else(|| block.item("_material_id")) {
        structure.metadata.insert("material_id".to_string(), id.to_string());
    }
    Ok(structure)
}

fn same_periodic_position(a: [f64; 3], b: [f64; 3]) -> bool {
    (0..3).all(|k| {
        let d = a[k] - b[k];
        (d - d.round()).abs() < 1e-4
    })
}

/// Write a structure as a P1 CIF.
pub fn write_cif(structure: &Structure) -> String {
    let [a, b, c] = structure.lattice.lengths();
    let [alpha, beta, gamma] = structure.lattice.angles();
    let composition = structure.composition();
    let sum = composition
        .iter()
        .map(|(s, n)| format!("{s}{n}"))
        .collect::<Vec<_>>()
        .join(" ");

    let mut out = String::new();
    out.push_str("# generated by agentom\n");
    out.push_str(&format!("data_{}\n", structure.reduced_formula()));
    out.push_str("_symmetry_space_group_name_H-M   'P 1'\n");
    out.push_str(&format!("_cell_length_a   {a:.8}\n"));
    out.push_str(&format!("_cell_length_b   {b:.8}\n"));
    out.push_str(&format!("_cell_length_c   {c:.8}\n"));
    out.push_str(&format!("_cell_angle_alpha   {alpha:.8}\n"));
    out.push_str(&format!("_cell_angle_beta   {beta:.8}\n"));
    out.push_str(&format!("_cell_angle_gamma   {gamma:.8}\n"));
    out.push_str("_symmetry_Int_Tables_number   1\n");
    out.push_str(&format!(
        "_chemical_formula_structural   {}\n",
        structure.reduced_formula()
    ));
    out.push_str(&format!("_chemical_formula_sum   '{sum}'\n"));
    out.push_str(&format!(
        "_cell_volume   {:.8}\n",
        structure.lattice.volume()
    ));
    if let Some(id) = structure.metadata.get("material_id") {
        out.push_str(&format!("_database_code_mp   {id}\n"));
    }
    out.push_str("loop_\n _symmetry_equiv_pos_site_id\n _symmetry_equiv_pos_as_xyz\n  1  'x, y, z'\n");
    out.push_str("loop_\n _atom_site_type_symbol\n _atom_site_label\n _atom_site_symmetry_multiplicity\n _atom_site_fract_x\n _atom_site_fract_y\n _atom_site_fract_z\n _atom_site_occupancy\n");

    let mut counters: Vec<(String, usize)> = Vec::new();
    for site in &structure.sites {
        let n = match counters.iter_mut().find(|(s, _)| *s == site.species) {
            Some((_, n)) => {
                *n += 1;
                *n
            }
            None => {
                counters.push((site.species.clone(), 0));
                0
            }
        };
        let [x, y, z] = site.frac;
        out.push_str(&format!(
            "  {sp}  {sp}{n}  1  {x:.8}  {y:.8}  {z:.8}  1\n",
            sp = site.species
        ));
    }
    out
}

// ---------------------------------------------------------------------------
// POSCAR

/// Parse a VASP 5 POSCAR.
pub fn parse_poscar(text: &str) -> Result<Structure, StructureError> {
    let fmt = StructureFormat::Poscar;
    let mut lines = text.lines().map(str::trim);

    let comment = lines.next().ok_or_else(|| parse_err(fmt, "empty file"))?;
    let scale: f64 = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| parse_err(fmt, "invalid scale factor"))?;

    let mut matrix = [[0.0; 3]; 3];
    for row in &mut matrix {
        let line = lines
            .next()
            .ok_or_else(|| parse_err(fmt, "missing lattice vector"))?;
        *row = parse_triple(line).ok_or_else(|| parse_err(fmt, format!("invalid lattice vector '{line}'")))?;
    }

    let mut lattice = Lattice::new(matrix)?;
    if scale < 0.0 {
        // Negative scale is the target volume.
        let factor = (-scale / lattice.volume()).cbrt();
        lattice = scale_lattice(&lattice, factor)?;
    } else if scale != 1.0 {
        lattice = scale_lattice(&lattice, scale)?;
    }

    let mut line = lines
        .next()
        .ok_or_else(|| parse_err(fmt, "missing species line"))?;
    let species: Vec<String> = if line
        .split_whitespace()
        .next()
        .is_some_and(|t| t.parse::<usize>().is_err())
    {
        let names = line
            .split_whitespace()
            .map(|t| {
                symbol_from_label(t)
                    .ok_or_else(|| parse_err(fmt, format!("unknown element '{t}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        line = lines
            .next()
            .ok_or_else(|| parse_err(fmt, "missing counts line"))?;
        names
    } else {
        // VASP 4: species only in the comment line.
        comment
            .split_whitespace()
            .filter_map(symbol_from_label)
            .collect()
    };

    let counts = line
        .split_whitespace()
        .map(|t| t.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| parse_err(fmt, format!("invalid counts line '{line}'")))?;
    if counts.len() != species.len() {
        return Err(parse_err(
            fmt,
            format!("{} species but {} counts", species.len(), counts.len()),
        ));
    }

    let mut mode = lines
        .next()
        .ok_or_else(|| parse_err(fmt, "missing coordinate mode"))?;
    if mode.to_ascii_lowercase().starts_with('s') {
        mode = lines
            .next()
            .ok_or_else(|| parse_err(fmt, "missing coordinate mode"))?;
    }
    let cartesian = matches!(mode.chars().next(), Some('c' | 'C' | 'k' | 'K'));
    let cart_scale = if scale > 0.0 { scale } else { 1.0 };

    let mut sites = Vec::new();
    for (symbol, count) in species.iter().zip(&counts) {
        for _ in 0..*count {
            let line = lines
                .next()
                .ok_or_else(|| parse_err(fmt, "fewer coordinates than counts"))?;
            let v = parse_triple(line)
                .ok_or_else(|| parse_err(fmt, format!("invalid coordinate '{line}'")))?;
            let frac = if cartesian {
                lattice.to_fractional([v[0] * cart_scale, v[1] * cart_scale, v[2] * cart_scale])
            } else {
                v
            };
            sites.push(Site::new(symbol.clone(), frac));
        }
    }

    Ok(Structure::new(lattice, sites))
}

fn parse_triple(line: &str) -> Option<[f64; 3]> {
    let mut it = line.split_whitespace().map(|t| t.parse::<f64>());
    Some([it.next()?.ok()?, it.next()?.ok()?, it.next()?.ok()?])
}

fn scale_lattice(lattice: &Lattice, factor: f64) -> Result<Lattice, StructureError> {
    let m = lattice.matrix();
    Lattice::new([
        super::linalg::scale(m[0], factor),
        super::linalg::scale(m[1], factor),
        super::linalg::scale(m[2], factor),
    ])
}

/// Write a VASP 5 POSCAR in direct coordinates. Sites are grouped by
/// species in first-appearance order.
pub fn write_poscar(structure: &Structure) -> String {
    let composition = structure.composition();
    let mut out = String::new();
    out.push_str(&structure.formula());
    out.push('\n');
    out.push_str("1.0\n");
    for row in structure.lattice.matrix() {
        out.push_str(&format!("  {:.10}  {:.10}  {:.10}\n", row[0], row[1], row[2]));
    }
    let names: Vec<&str> = composition.iter().map(|(s, _)| s.as_str()).collect();
    let counts: Vec<String> = composition.iter().map(|(_, n)| n.to_string()).collect();
    out.push_str(&names.join(" "));
    out.push('\n');
    out.push_str(&counts.join(" "));
    out.push_str("\nDirect\n");
    for (symbol, _) in &composition {
        for site in structure.sites.iter().filter(|s| &s.species == symbol) {
            let [x, y, z] = site.frac;
            out.push_str(&format!("  {x:.10}  {y:.10}  {z:.10} {symbol}\n"));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// pymatgen JSON

/// Build a structure from a pymatgen `Structure.as_dict()` value.
pub fn from_pymatgen_json(value: &Value) -> Result<Structure, StructureError> {
    let fmt = StructureFormat::Json;
    let matrix_value = value
        .pointer("/lattice/matrix")
        .ok_or_else(|| parse_err(fmt, "missing lattice.matrix"))?;
    let matrix: [[f64; 3]; 3] = serde_json::from_value(matrix_value.clone())
        .map_err(|e| parse_err(fmt, format!("invalid lattice.matrix: {e}")))?;
    let lattice = Lattice::new(matrix)?;

    let raw_sites = value
        .get("sites")
        .and_then(Value::as_array)
        .ok_or_else(|| parse_err(fmt, "missing sites"))?;

    let mut sites = Vec::with_capacity(raw_sites.len());
    for (i, site) in raw_sites.iter().enumerate() {
        // Disordered sites keep their majority species.
        let species = site
            .get("species")
            .and_then(Value::as_array)
            .and_then(|list| {
                list.iter().max_by(|a, b| {
                    let occ = |v: &Value| v.get("occu").and_then(Value::as_f64).unwrap_or(1.0);
                    occ(a).total_cmp(&occ(b))
                })
            })
            .and_then(|sp| sp.get("element"))
            .and_then(Value::as_str)
            .and_then(symbol_from_label)
            .ok_or_else(|| parse_err(fmt, format!("site {i} has no species")))?;

        let frac = match site.get("abc") {
            Some(abc) => serde_json::from_value::<[f64; 3]>(abc.clone())
                .map_err(|e| parse_err(fmt, format!("site {i}: invalid abc: {e}")))?,
            None => {
                let xyz = site
                    .get("xyz")
                    .ok_or_else(|| parse_err(fmt, format!("site {i} has no coordinates")))?;
                let xyz: [f64; 3] = serde_json::from_value(xyz.clone())
                    .map_err(|e| parse_err(fmt, format!("site {i}: invalid xyz: {e}")))?;
                lattice.to_fractional(xyz)
            }
        };
        sites.push(Site::new(species, frac));
    }

    let mut structure = Structure::new(lattice, sites);
    if let Some(pbc) = value.pointer("/lattice/pbc")
        && let Ok(pbc) = serde_json::from_value::<[bool; 3]>(pbc.clone())
    {
        structure.pbc = pbc;
    }
    Ok(structure)
}

/// Render a structure as a pymatgen `Structure.as_dict()` value.
pub fn to_pymatgen_json(structure: &Structure) -> Value {
    let [a, b, c] = structure.lattice.lengths();
    let [alpha, beta, gamma] = structure.lattice.angles();
    let sites: Vec<Value> = structure
        .sites
        .iter()
        .map(|site| {
            json!({
                "species": [{"element": site.species, "occu": 1}],
                "abc": site.frac,
                "xyz": structure.lattice.to_cartesian(site.frac),
                "label": site.species,
                "properties": {},
            })
        })
        .collect();

    json!({
        "@module": "pymatgen.core.structure",
        "@class": "Structure",
        "charge": 0,
        "lattice": {
            "matrix": structure.lattice.matrix(),
            "pbc": structure.pbc,
            "a": a,
            "b": b,
            "c": c,
            "alpha": alpha,
            "beta": beta,
            "gamma": gamma,
            "volume": structure.lattice.volume(),
        },
        "properties": {},
        "sites": sites,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::structure::tests::nacl;

    const FCC_NACL_CIF: &str = r#"
# Fm-3m NaCl with a reduced operation list
data_NaCl
_cell_length_a    5.6900(1)
_cell_length_b    5.6900
_cell_length_c    5.6900
_cell_angle_alpha 90
_cell_angle_beta  90
_cell_angle_gamma 90
loop_
_symmetry_equiv_pos_as_xyz
'x, y, z'
'x, y+1/2, z+1/2'
'x+1/2, y, z+1/2'
'x+1/2, y+1/2, z'
'-x, -y, -z'
loop_
_atom_site_label
_atom_site_type_symbol
_atom_site_fract_x
_atom_site_fract_y
_atom_site_fract_z
Na1 Na+ 0 0 0
Cl1 Cl- 0.5 0.5 0.5
"#;

    fn assert_same_positions(a: &Structure, b: &Structure) {
        assert_eq!(a.num_sites(), b.num_sites());
        for (x, y) in a.sites.iter().zip(&b.sites) {
            assert_eq!(x.species, y.species);
            assert!(same_periodic_position(x.frac, y.frac), "{x:?} vs {y:?}");
        }
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(StructureFormat::from_path("outputs/NaCl.cif").unwrap(), StructureFormat::Cif);
        assert_eq!(StructureFormat::from_path("inputs/POSCAR").unwrap(), StructureFormat::Poscar);
        assert_eq!(StructureFormat::from_path("a/Fe.vasp").unwrap(), StructureFormat::Poscar);
        assert_eq!(StructureFormat::from_path("a/b.json").unwrap(), StructureFormat::Json);
        assert!(matches!(
            StructureFormat::from_path("a/b.xyz"),
            Err(StructureError::UnsupportedFormat(_))
        ));
        assert!(StructureFormat::from_path("noext").is_err());
    }

    #[test]
    fn test_cif_symmetry_expansion() {
        let s = parse_cif(FCC_NACL_CIF).unwrap();
        assert_eq!(s.num_sites(), 8);
        assert_eq!(s.formula(), "Cl4Na4");
        let [a, _, _] = s.lattice.lengths();
        assert!((a - 5.69).abs() < 1e-9);
    }

    #[test]
    fn test_cif_roundtrip() {
        let original = nacl();
        let text = write_cif(&original);
        assert!(text.contains("_database_code_mp   mp-22862"));

        let parsed = parse_cif(&text).unwrap();
        assert_same_positions(&original, &parsed);
        assert_eq!(parsed.metadata.get("material_id").map(String::as_str), Some("mp-22862"));
        for (x, y) in original.lattice.lengths().iter().zip(parsed.lattice.lengths()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_cif_missing_cell() {
        let err = parse_cif("data_x\n_cell_length_a 1\n").unwrap_err();
        assert!(err.to_string().contains("_cell_length_b"));
        assert!(parse_cif("no data here").is_err());
    }

    #[test]
    fn test_symop_parse() {
        let op = SymOp::parse("-x+1/2, y-x, 0.25+z").unwrap();
        let image = op.apply([0.1, 0.3, 0.5]);
        assert!((image[0] - 0.4).abs() < 1e-12);
        assert!((image[1] - 0.2).abs() < 1e-12);
        assert!((image[2] - 0.75).abs() < 1e-12);
        assert!(SymOp::parse("x, y").is_none());
    }

    #[test]
    fn test_poscar_roundtrip() {
        let original = nacl();
        let text = write_poscar(&original);
        let parsed = parse_poscar(&text).unwrap();
        assert_same_positions(&original, &parsed);
        for (x, y) in original.lattice.lengths().iter().zip(parsed.lattice.lengths()) {
            assert!((x - y).abs() < 1e-8);
        }
    }

    #[test]
    fn test_poscar_cartesian_and_scale() {
        let text = "Si\n2.0\n1 0 0\n0 1 0\n0 0 1\nSi\n2\nCartesian\n0 0 0\n0.5 0.5 0.5\n";
        let s = parse_poscar(text).unwrap();
        assert_eq!(s.num_sites(), 2);
        assert!((s.lattice.lengths()[0] - 2.0).abs() < 1e-12);
        assert!((s.sites[1].frac[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_poscar_count_mismatch() {
        let text = "x\n1.0\n1 0 0\n0 1 0\n0 0 1\nNa Cl\n1\nDirect\n0 0 0\n";
        assert!(parse_poscar(text).is_err());
    }

    #[test]
    fn test_pymatgen_json_roundtrip() {
        let original = nacl();
        let value = to_pymatgen_json(&original);
        assert_eq!(value["@class"], "Structure");
        let parsed = from_pymatgen_json(&value).unwrap();
        assert_same_positions(&original, &parsed);
    }

    #[test]
    fn test_pymatgen_json_xyz_only() {
        let value = json!({
            "lattice": {"matrix": [[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 4.0]]},
            "sites": [{"species": [{"element": "Fe", "occu": 1.0}], "xyz": [2.0, 2.0, 2.0]}]
        });
        let s = from_pymatgen_json(&value).unwrap();
        assert_eq!(s.sites[0].species, "Fe");
        assert!((s.sites[0].frac[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_load_dispatch() {
        let text = dump(&nacl(), StructureFormat::Json);
        let s = load(&text, StructureFormat::Json).unwrap();
        assert_eq!(s.num_sites(), 8);
        assert!(load("{not json", StructureFormat::Json).is_err());
    }
}
