//! Materials database tools: search and download.

use serde_json::{Value, json};

use super::{Args, output_path};
use crate::database::{MaterialQuery, MaterialSummary};
use crate::structure::io::{dump, from_pymatgen_json};
use crate::structure::{Structure, StructureFormat};
use crate::tools::{
    SideEffect, ToolDescriptor, ToolError, ToolKind, ToolRegistry, ToolRequest, ToolResult, ValueType,
};
use crate::workspace::TEMP_DIR;

const SEARCH_RETURNS: [(&str, ValueType); 3] = [
    ("num_results", ValueType::Integer),
    ("results_path", ValueType::String),
    ("materials", ValueType::Array),
];

pub(super) fn register(registry: &mut ToolRegistry) {
    let by_formula = ToolDescriptor::new(
        ToolKind::SearchMaterialsByFormula,
        SideEffect::Read,
        "Search the Materials Project by chemical formula, e.g. 'Fe2O3' or '*2O3' (wildcard). \
         Full results including structures are saved to tmp/; a summary is returned.",
    )
    .param("formula", ValueType::String, "Chemical formula")
    .optional("min_energy_above_hull", ValueType::Number, "Lower bound, eV/atom")
    .optional("max_energy_above_hull", ValueType::Number, "Upper bound, eV/atom")
    .optional("is_stable", ValueType::Boolean, "Only materials on the convex hull")
    .optional("spacegroup_number", ValueType::Integer, "International space group number")
    .optional("num_results", ValueType::Integer, "Maximum number of results");
    registry.register(with_search_returns(by_formula), search_by_formula);

    let by_system = ToolDescriptor::new(
        ToolKind::SearchMaterialsByChemicalSystem,
        SideEffect::Read,
        "Search the Materials Project by chemical system, e.g. 'Fe-O'. \
         Full results including structures are saved to tmp/; a summary is returned.",
    )
    .param("chemical_system", ValueType::String, "Dash-separated elements")
    .optional("min_energy_above_hull", ValueType::Number, "Lower bound, eV/atom")
    .optional("max_energy_above_hull", ValueType::Number, "Upper bound, eV/atom")
    .optional("spacegroup_symbol", ValueType::String, "Space group symbol, e.g. 'Fm-3m'")
    .optional("num_results", ValueType::Integer, "Maximum number of results");
    registry.register(with_search_returns(by_system), search_by_chemical_system);

    registry.register(
        ToolDescriptor::new(
            ToolKind::DownloadStructure,
            SideEffect::Write,
            "Download the structure of a Materials Project entry into outputs/.",
        )
        .param("material_id", ValueType::String, "Identifier such as 'mp-22862'")
        .optional(
            "file_name",
            ValueType::String,
            "Output file name, e.g. 'NaCl.cif' (default '<material_id>.cif')",
        )
        .optional("format", ValueType::String, "cif, poscar or json (default from file_name, else cif)")
        .returns("material_id", ValueType::String)
        .returns("path", ValueType::String)
        .returns("formula", ValueType::String)
        .returns("num_atoms", ValueType::Integer)
        .returns("lattice", ValueType::Object),
        download_structure,
    );
}

fn with_search_returns(mut descriptor: ToolDescriptor) -> ToolDescriptor {
    for (name, value_type) in SEARCH_RETURNS {
        descriptor = descriptor.returns(name, value_type);
    }
    descriptor
}

fn base_query(args: &Args<'_>) -> Result<MaterialQuery, ToolError> {
    let num_results = match args.opt_i64("num_results") {
        Some(n) if n < 1 => {
            return Err(ToolError::HandlerFailure(
                "num_results must be at least 1".to_string(),
            ));
        }
        n => n.and_then(|n| usize::try_from(n).ok()),
    };
    Ok(MaterialQuery {
        min_energy_above_hull: args.opt_f64("min_energy_above_hull"),
        max_energy_above_hull: args.opt_f64("max_energy_above_hull"),
        num_results,
        ..MaterialQuery::default()
    })
}

async fn search_by_formula(req: ToolRequest) -> ToolResult {
    let args = Args(&req.args);
    let formula = args.str("formula")?;
    let query = MaterialQuery {
        formula: Some(formula.to_string()),
        is_stable: args.opt_bool("is_stable"),
        spacegroup_number: args.opt_i64("spacegroup_number"),
        ..base_query(&args)?
    };
    let results_path = format!("{TEMP_DIR}/mp_search_{}.json", formula.replace('*', "X"));
    search(&req, &query, &results_path).await
}

async fn search_by_chemical_system(req: ToolRequest) -> ToolResult {
    let args = Args(&req.args);
    let system = args.str("chemical_system")?;
    let query = MaterialQuery {
        chemical_system: Some(system.to_string()),
        spacegroup_symbol: args.opt_str("spacegroup_symbol").map(str::to_string),
        ..base_query(&args)?
    };
    let results_path = format!("{TEMP_DIR}/mp_search_{}.json", system.replace('-', "_"));
    search(&req, &query, &results_path).await
}

/// Run the query, save the full hits (structures included) to
/// `results_path`, return a compact summary.
async fn search(req: &ToolRequest, query: &MaterialQuery, results_path: &str) -> ToolResult {
    let hits = req.context.database.search(query).await?;

    let saved: Vec<Value> = hits.iter().map(saved_entry).collect();
    let bytes = serde_json::to_vec_pretty(&saved)
        .map_err(|e| ToolError::HandlerFailure(format!("cannot encode results: {e}")))?;
    let results_path = req.context.workspace.write(results_path, &bytes).await?;

    let materials: Vec<Value> = hits
        .into_iter()
        .map(|hit| {
            let mut value = serde_json::to_value(MaterialSummary {
                structure: None,
                ..hit
            })
            .unwrap_or(Value::Null);
            if let Some(map) = value.as_object_mut() {
                map.retain(|_, v| !v.is_null());
            }
            value
        })
        .collect();

    Ok(json!({
        "num_results": materials.len(),
        "results_path": results_path,
        "materials": materials,
    }))
}

fn saved_entry(hit: &MaterialSummary) -> Value {
    json!({
        "mpid": hit.material_id,
        "formula": hit.formula,
        "e_hull": hit.energy_above_hull,
        "is_stable": hit.is_stable,
        "crystal_system": hit.crystal_system,
        "spacegroup_symbol": hit.spacegroup_symbol,
        "num_elements": hit.num_elements,
        "num_sites": hit.num_sites,
        "structure": hit.structure,
    })
}

async fn download_structure(req: ToolRequest) -> ToolResult {
    let args = Args(&req.args);
    let material_id = args.str("material_id")?;
    let file_name = args.opt_str("file_name");
    let format = match (args.opt_str("format"), file_name) {
        (Some(name), _) => StructureFormat::from_name(name)?,
        (None, Some(file)) => StructureFormat::from_path(file)?,
        (None, None) => StructureFormat::Cif,
    };
    let file_name = file_name
        .map(str::to_string)
        .unwrap_or_else(|| format!("{material_id}.{}", format.extension()));

    let raw = req.context.database.download(material_id).await?;
    let value: Value = serde_json::from_slice(&raw)
        .map_err(|e| ToolError::HandlerFailure(format!("invalid structure data for {material_id}: {e}")))?;
    let structure = from_pymatgen_json(&value)?.with_metadata("material_id", material_id);

    let path = req
        .context
        .workspace
        .write(&output_path(&file_name), dump(&structure, format).as_bytes())
        .await?;

    Ok(json!({
        "material_id": material_id,
        "path": path,
        "formula": structure.reduced_formula(),
        "num_atoms": structure.num_sites(),
        "lattice": lattice_summary(&structure),
    }))
}

/// Lattice parameters and matrix of `structure`.
pub(super) fn lattice_summary(structure: &Structure) -> Value {
    let [a, b, c] = structure.lattice.lengths();
    let [alpha, beta, gamma] = structure.lattice.angles();
    json!({
        "a": a,
        "b": b,
        "c": c,
        "alpha": alpha,
        "beta": beta,
        "gamma": gamma,
        "volume": structure.lattice.volume(),
        "matrix": structure.lattice.matrix(),
    })
}
