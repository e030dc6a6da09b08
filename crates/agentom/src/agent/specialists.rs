//! The two built-in capability agents.

use std::sync::Arc;

use super::{AgentDescriptor, ToolAgent};
use crate::backend::InferenceBackend;
use crate::tools::{ToolKind, ToolRegistry};

/// Name of the Materials Project data access agent.
pub const DATA_ACCESS_AGENT: &str = "data_access_agent";

/// Name of the structure manipulation agent.
pub const STRUCTURE_AGENT: &str = "structure_agent";

const DATA_ACCESS_TOOLS: [ToolKind; 4] = [
    ToolKind::SearchMaterialsByFormula,
    ToolKind::SearchMaterialsByChemicalSystem,
    ToolKind::DownloadStructure,
    ToolKind::ListFiles,
];

const STRUCTURE_TOOLS: [ToolKind; 10] = [
    ToolKind::ListAllFiles,
    ToolKind::ReadStructure,
    ToolKind::ReadFile,
    ToolKind::CalculateDistance,
    ToolKind::CheckCloseAtoms,
    ToolKind::BuildSupercell,
    ToolKind::BuildSurface,
    ToolKind::BuildInterface,
    ToolKind::WriteFile,
    ToolKind::RunPythonScript,
];

const DATA_ACCESS_DESCRIPTION: &str = "Searches the Materials Project by formula or chemical \
system, downloads crystal structures into the workspace and lists downloaded files.";

const DATA_ACCESS_PROMPT: &str = "\
You retrieve data from the Materials Project and nothing else.

You may:
- search for materials by formula (wildcards such as '*O3' are allowed) or by chemical system (e.g. 'Li-Fe-O')
- download a structure by its material id (e.g. 'mp-149')
- list files that were downloaded

Prefer the most stable entry (lowest energy above hull) unless the task names a specific material id.
When a download succeeds, report the material id, the formula and the workspace path of the file.
Do not analyse or modify structures; another agent does that.";

const STRUCTURE_DESCRIPTION: &str = "Reads and analyses atomic structures (distances, close \
contacts, lattice), builds supercells, surfaces and interfaces, writes files and runs Python \
scripts inside the workspace.";

const STRUCTURE_PROMPT: &str = "\
You are an atomistic modelling specialist working inside a sandboxed workspace.

You can read and analyse structure files, compute interatomic distances and check for atoms \
that are too close, build supercells, surface slabs and heterostructure interfaces, and write \
and execute Python scripts (ASE and pymatgen may be available) for anything the other tools \
do not cover.

Guidelines:
- Check which files exist before using them; paths are relative to the workspace root.
- Atom indices are 0-based.
- Distances are in angstrom; always state the unit.
- Keep models physically reasonable and check generated structures for close contacts.
- Derived structures go to new files; never overwrite an input.
- Report the paths of every file you create.";

/// The data access agent, bound to the search, download and listing tools.
pub fn data_access_agent(
    registry: &ToolRegistry,
    backend: Arc<dyn InferenceBackend>,
    model: impl Into<String>,
) -> ToolAgent {
    let descriptor = AgentDescriptor {
        name: DATA_ACCESS_AGENT.to_string(),
        description: DATA_ACCESS_DESCRIPTION.to_string(),
        tools: DATA_ACCESS_TOOLS.to_vec(),
        model: model.into(),
    };
    ToolAgent::new(descriptor, DATA_ACCESS_PROMPT, registry, backend)
}

/// The structure agent, bound to the analysis, building, file and script tools.
pub fn structure_agent(
    registry: &ToolRegistry,
    backend: Arc<dyn InferenceBackend>,
    model: impl Into<String>,
) -> ToolAgent {
    let descriptor = AgentDescriptor {
        name: STRUCTURE_AGENT.to_string(),
        description: STRUCTURE_DESCRIPTION.to_string(),
        tools: STRUCTURE_TOOLS.to_vec(),
        model: model.into(),
    };
    ToolAgent::new(descriptor, STRUCTURE_PROMPT, registry, backend)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::agent::CapabilityAgent;
    use crate::backend::ScriptedBackend;
    use crate::tools::testing::context;

    #[test]
    fn test_bindings_cover_every_tool_once() {
        let (_dir, ctx) = context();
        let registry = ToolRegistry::with_builtins(ctx);
        let backend = Arc::new(ScriptedBackend::default());
        let data = data_access_agent(&registry, backend.clone(), "m");
        let structure = structure_agent(&registry, backend, "m");

        assert_eq!(data.registry().kinds().len(), 4);
        assert_eq!(structure.registry().kinds().len(), 10);

        let all: BTreeSet<ToolKind> = data
            .descriptor()
            .tools
            .iter()
            .chain(&structure.descriptor().tools)
            .copied()
            .collect();
        assert_eq!(all.len(), ToolKind::ALL.len());
        assert!(!data.descriptor().binds(ToolKind::RunPythonScript));
        assert!(structure.descriptor().binds(ToolKind::CalculateDistance));
    }
}
