//! Structure tools: inspect, measure, and derive new structures.

use serde_json::{Value, json};

use super::database::lattice_summary;
use super::{Args, file_name, output_path, three};
use crate::structure::io::{dump, load};
use crate::structure::{
    InterfaceParams, Structure, StructureFormat, build_interface, close_contacts, distance,
    repetition_matrix, supercell, surface,
};
use crate::tools::{
    SideEffect, ToolDescriptor, ToolError, ToolKind, ToolRegistry, ToolRequest, ToolResult, ValueType,
};

/// Default covalent-radius tolerance for `check_close_atoms`, Å.
const DEFAULT_CLOSE_TOLERANCE: f64 = -0.5;

pub(super) fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolDescriptor::new(
            ToolKind::ReadStructure,
            SideEffect::Read,
            "Summarize a structure file (CIF, POSCAR or JSON): formula, cell, atoms.",
        )
        .param("path", ValueType::String, "Workspace-relative structure file")
        .returns("path", ValueType::String)
        .returns("formula", ValueType::String)
        .returns("num_atoms", ValueType::Integer)
        .returns("cell", ValueType::Array)
        .returns("atoms", ValueType::Array)
        .returns("pbc", ValueType::Array),
        read_structure,
    );

    registry.register(
        ToolDescriptor::new(
            ToolKind::CalculateDistance,
            SideEffect::Pure,
            "Distance in Å between two atoms of a structure (0-based indices).",
        )
        .param("path", ValueType::String, "Workspace-relative structure file")
        .param("index1", ValueType::Integer, "First atom index")
        .param("index2", ValueType::Integer, "Second atom index")
        .optional(
            "mic",
            ValueType::Boolean,
            "Use the minimum-image convention across periodic boundaries (default true)",
        )
        .returns("distance_angstrom", ValueType::Number)
        .returns("atom1", ValueType::Object)
        .returns("atom2", ValueType::Object),
        calculate_distance,
    );

    registry.register(
        ToolDescriptor::new(
            ToolKind::CheckCloseAtoms,
            SideEffect::Pure,
            "Find atom pairs closer than the sum of their covalent radii plus a tolerance.",
        )
        .param("path", ValueType::String, "Workspace-relative structure file")
        .optional("tolerance", ValueType::Number, "Added to the radii sum, Å (default -0.5)")
        .returns("number_of_close_pairs", ValueType::Integer)
        .returns("close_pairs", ValueType::Array),
        check_close_atoms,
    );

    registry.register(
        ToolDescriptor::new(
            ToolKind::BuildSupercell,
            SideEffect::Write,
            "Build a supercell by repeating a structure. The result goes to outputs/.",
        )
        .param("path", ValueType::String, "Workspace-relative structure file")
        .param(
            "repetitions",
            ValueType::IntegerList,
            "Three repetition counts, or nine integers forming a 3x3 matrix (row-major)",
        )
        .optional("output_name", ValueType::String, "Output file name (default 'supercell_<file>')")
        .returns("input_path", ValueType::String)
        .returns("output_path", ValueType::String)
        .returns("num_atoms", ValueType::Integer),
        build_supercell,
    );

    registry.register(
        ToolDescriptor::new(
            ToolKind::BuildSurface,
            SideEffect::Write,
            "Cut a surface slab from a bulk structure. The result goes to outputs/.",
        )
        .param("path", ValueType::String, "Workspace-relative bulk structure file")
        .param("miller_indices", ValueType::IntegerList, "Miller indices [h, k, l]")
        .param("layers", ValueType::Integer, "Number of layers")
        .param("vacuum", ValueType::Number, "Vacuum on each side of the slab, Å")
        .optional("output_name", ValueType::String, "Output file name (default 'slab_<file>')")
        .returns("input_path", ValueType::String)
        .returns("output_path", ValueType::String)
        .returns("num_atoms", ValueType::Integer),
        build_surface,
    );

    registry.register(
        ToolDescriptor::new(
            ToolKind::BuildInterface,
            SideEffect::Write,
            "Build a film-on-substrate interface from two bulk structures by lattice matching. \
             The result goes to outputs/.",
        )
        .param("film_path", ValueType::String, "Workspace-relative film bulk structure")
        .param("substrate_path", ValueType::String, "Workspace-relative substrate bulk structure")
        .optional("film_miller", ValueType::IntegerList, "Film Miller indices (default [1, 0, 0])")
        .optional(
            "substrate_miller",
            ValueType::IntegerList,
            "Substrate Miller indices (default [1, 1, 1])",
        )
        .optional("gap", ValueType::Number, "Film-substrate distance, Å (default 2.5)")
        .optional("vacuum", ValueType::Number, "Vacuum above the film, Å (default: same as gap)")
        .optional("film_layers", ValueType::Integer, "Film thickness in layers (default 2)")
        .optional("substrate_layers", ValueType::Integer, "Substrate thickness in layers (default 2)")
        .optional("max_area", ValueType::Number, "Largest matched area, Å² (default 400)")
        .optional("max_length_tol", ValueType::Number, "Length mismatch tolerance (default 0.03)")
        .optional("max_angle_tol", ValueType::Number, "Angle mismatch tolerance (default 0.01)")
        .optional(
            "output_name",
            ValueType::String,
            "Output file name (default '<film>-<substrate>_interface.cif')",
        )
        .returns("output_path", ValueType::String)
        .returns("num_atoms", ValueType::Integer)
        .returns("strain", ValueType::Object)
        .returns("film_supercell", ValueType::Array)
        .returns("substrate_supercell", ValueType::Array),
        build_interface_tool,
    );
}

/// Read and parse a structure file; the format comes from its name.
async fn load_structure(req: &ToolRequest, path: &str) -> Result<(Structure, String), ToolError> {
    let workspace = &req.context.workspace;
    let format = StructureFormat::from_path(path)?;
    let text = workspace.read_to_string(path).await?;
    let structure = load(&text, format)?;
    Ok((structure, workspace.relative(&workspace.resolve(path)?)))
}

/// Serialize `structure` to `path`, format from the name (CIF when the name
/// has no recognized extension).
///
/// `inputs` are the resolved paths the structure was derived from; a `path`
/// resolving to any of them is refused.
async fn save_structure(
    req: &ToolRequest,
    structure: &Structure,
    path: &str,
    inputs: &[&str],
) -> Result<String, ToolError> {
    let workspace = &req.context.workspace;
    let target = workspace.relative(&workspace.resolve(path)?);
    if let Some(input) = inputs.iter().find(|input| **input == target) {
        return Err(ToolError::HandlerFailure(format!(
            "output {target} would overwrite the input {input}; choose another output_name"
        )));
    }
    let format = StructureFormat::from_path(path).unwrap_or(StructureFormat::Cif);
    Ok(workspace.write(path, dump(structure, format).as_bytes()).await?)
}

fn atom_json(structure: &Structure, index: usize) -> Value {
    let site = &structure.sites[index];
    json!({
        "index": index,
        "symbol": site.species,
        "frac": site.frac,
        "position_angstrom": structure.lattice.to_cartesian(site.frac),
    })
}

fn positive_u32(value: i64, what: &str) -> Result<u32, ToolError> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ToolError::HandlerFailure(format!("{what} must be a positive integer")))
}

async fn read_structure(req: ToolRequest) -> ToolResult {
    let path = Args(&req.args).str("path")?;
    let (structure, path) = load_structure(&req, path).await?;
    let atoms: Vec<Value> = (0..structure.num_sites())
        .map(|i| atom_json(&structure, i))
        .collect();
    Ok(json!({
        "path": path,
        "formula": structure.formula(),
        "reduced_formula": structure.reduced_formula(),
        "num_atoms": structure.num_sites(),
        "cell": structure.lattice.matrix(),
        "lattice": lattice_summary(&structure),
        "atoms": atoms,
        "pbc": structure.pbc,
        "metadata": structure.metadata,
    }))
}

async fn calculate_distance(req: ToolRequest) -> ToolResult {
    let args = Args(&req.args);
    let (structure, path) = load_structure(&req, args.str("path")?).await?;
    let (i, j) = (args.i64("index1")?, args.i64("index2")?);
    let mic = args.opt_bool("mic").unwrap_or(true);
    let d = distance(&structure, i, j, mic)?;
    // Indices are validated by `distance`.
    let (i, j) = (i as usize, j as usize);
    Ok(json!({
        "path": path,
        "mic": mic,
        "distance_angstrom": d,
        "atom1": atom_json(&structure, i),
        "atom2": atom_json(&structure, j),
    }))
}

async fn check_close_atoms(req: ToolRequest) -> ToolResult {
    let args = Args(&req.args);
    let (structure, path) = load_structure(&req, args.str("path")?).await?;
    let tolerance = args.opt_f64("tolerance").unwrap_or(DEFAULT_CLOSE_TOLERANCE);
    let pairs: Vec<Value> = close_contacts(&structure, tolerance)
        .into_iter()
        .map(|c| {
            json!({
                "index1": c.index1,
                "index2": c.index2,
                "symbol1": c.symbol1,
                "symbol2": c.symbol2,
                "distance": round3(c.distance),
                "min_distance": round3(c.min_distance),
            })
        })
        .collect();
    Ok(json!({
        "path": path,
        "tolerance": tolerance,
        "number_of_close_pairs": pairs.len(),
        "close_pairs": pairs,
    }))
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

async fn build_supercell(req: ToolRequest) -> ToolResult {
    let args = Args(&req.args);
    let (structure, input_path) = load_structure(&req, args.str("path")?).await?;
    let transform = repetition_matrix(&args.i64_list("repetitions")?)?;
    let result = supercell(&structure, transform)?;

    let name = args
        .opt_str("output_name")
        .map(str::to_string)
        .unwrap_or_else(|| format!("supercell_{}", file_name(&input_path)));
    let output_path = save_structure(&req, &result, &output_path(&name), &[&input_path]).await?;
    Ok(json!({
        "input_path": input_path,
        "output_path": output_path,
        "num_atoms": result.num_sites(),
        "formula": result.formula(),
    }))
}

async fn build_surface(req: ToolRequest) -> ToolResult {
    let args = Args(&req.args);
    let (structure, input_path) = load_structure(&req, args.str("path")?).await?;
    let miller = three(&args.i64_list("miller_indices")?, "miller_indices")?;
    let layers = positive_u32(args.i64("layers")?, "layers")?;
    let vacuum = args.f64("vacuum")?;
    let slab = surface(&structure, miller, layers, vacuum)?;

    let name = args
        .opt_str("output_name")
        .map(str::to_string)
        .unwrap_or_else(|| format!("slab_{}", file_name(&input_path)));
    let output_path = save_structure(&req, &slab, &output_path(&name), &[&input_path]).await?;
    Ok(json!({
        "input_path": input_path,
        "output_path": output_path,
        "num_atoms": slab.num_sites(),
        "formula": slab.formula(),
        "lattice": lattice_summary(&slab),
    }))
}

async fn build_interface_tool(req: ToolRequest) -> ToolResult {
    let args = Args(&req.args);
    let (film, film_path) = load_structure(&req, args.str("film_path")?).await?;
    let (substrate, substrate_path) = load_structure(&req, args.str("substrate_path")?).await?;

    let defaults = InterfaceParams::default();
    let miller = |name: &str, default: [i64; 3]| match args.opt_i64_list(name) {
        Some(values) => three(&values, name),
        None => Ok(default),
    };
    let layers = |name: &str, default: u32| match args.opt_i64(name) {
        Some(value) => positive_u32(value, name),
        None => Ok(default),
    };
    let params = InterfaceParams {
        film_miller: miller("film_miller", defaults.film_miller)?,
        substrate_miller: miller("substrate_miller", defaults.substrate_miller)?,
        gap: args.opt_f64("gap").unwrap_or(defaults.gap),
        vacuum_over_film: args.opt_f64("vacuum").unwrap_or(defaults.vacuum_over_film),
        film_layers: layers("film_layers", defaults.film_layers)?,
        substrate_layers: layers("substrate_layers", defaults.substrate_layers)?,
        max_area: args.opt_f64("max_area").unwrap_or(defaults.max_area),
        max_length_tol: args.opt_f64("max_length_tol").unwrap_or(defaults.max_length_tol),
        max_angle_tol: args.opt_f64("max_angle_tol").unwrap_or(defaults.max_angle_tol),
        ..defaults
    };

    let (interface, matched) = build_interface(&film, &substrate, &params)?;

    let stem = |path: &str| {
        let name = file_name(path);
        name.rsplit_once('.').map_or(name, |(stem, _)| stem).to_string()
    };
    let name = args.opt_str("output_name").map(str::to_string).unwrap_or_else(|| {
        format!("{}-{}_interface.cif", stem(&film_path), stem(&substrate_path))
    });
    let output_path = save_structure(
        &req,
        &interface,
        &output_path(&name),
        &[&film_path, &substrate_path],
    )
    .await?;

    Ok(json!({
        "film_path": film_path,
        "substrate_path": substrate_path,
        "output_path": output_path,
        "num_atoms": interface.num_sites(),
        "formula": interface.formula(),
        "strain": {
            "length": matched.length_strain,
            "angle": matched.angle_strain,
            "max": matched.max_strain(),
        },
        "match_area": matched.match_area,
        "film_supercell": matched.film_supercell,
        "substrate_supercell": matched.substrate_supercell,
    }))
}
