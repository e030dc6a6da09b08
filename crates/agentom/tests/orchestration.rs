//! End-to-end flows through the coordinator, both capability agents, the
//! tool registry and the workspace, with deterministic backends.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use agentom::agent::{CapabilityAgent, data_access_agent, structure_agent};
use agentom::backend::{BackendError, CompletionRequest, InferenceBackend, Reply, Role, ToolCall};
use agentom::coordinator::{Coordinator, TurnStatus};
use agentom::limits::ExecLimits;
use agentom::session::SessionRuntime;
use agentom::structure::{Lattice, Site, Structure};
use agentom::tools::{
    SideEffect, ToolContext, ToolDescriptor, ToolError, ToolKind, ToolRegistry, ToolRequest,
    ValueType,
};
use agentom::workspace::{Workspace, workspace_policy};
use agentom::{ScriptedBackend, StaticDatabase};
use serde_json::{Value, json};
use tempfile::TempDir;

fn nacl() -> Structure {
    let lattice = Lattice::from_parameters(5.69, 5.69, 5.69, 90.0, 90.0, 90.0).unwrap();
    let na = [[0.0, 0.0, 0.0], [0.0, 0.5, 0.5], [0.5, 0.0, 0.5], [0.5, 0.5, 0.0]];
    let cl = [[0.5, 0.0, 0.0], [0.5, 0.5, 0.5], [0.0, 0.0, 0.5], [0.0, 0.5, 0.0]];
    let sites = na
        .iter()
        .map(|f| Site::new("Na", *f))
        .chain(cl.iter().map(|f| Site::new("Cl", *f)))
        .collect();
    Structure::new(lattice, sites)
}

struct Harness {
    dir: TempDir,
    workspace: Arc<Workspace>,
    registry: ToolRegistry,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let workspace = Arc::new(Workspace::open(dir.path(), workspace_policy::<&str>(&[])).unwrap());
    let database = StaticDatabase::new().with_structure("mp-22862", nacl(), 0.0);
    let context = ToolContext::new(Arc::clone(&workspace), Arc::new(database)).with_limits(
        ExecLimits {
            timeout: Duration::from_secs(1),
            ..ExecLimits::default()
        },
    );
    let registry = ToolRegistry::with_builtins(Arc::new(context));
    Harness {
        dir,
        workspace,
        registry,
    }
}

fn coordinator(registry: &ToolRegistry, backend: Arc<dyn InferenceBackend>) -> Coordinator {
    let agents: Vec<Arc<dyn CapabilityAgent>> = vec![
        Arc::new(data_access_agent(registry, Arc::clone(&backend), "test-model")),
        Arc::new(structure_agent(registry, Arc::clone(&backend), "test-model")),
    ];
    Coordinator::new("test-model", backend, agents)
}

fn calls(id: &str, name: &str, args: Value) -> Reply {
    Reply::ToolCalls(vec![ToolCall::new(id, name, args)])
}

/// Plays all three roles by looking at which functions are offered and how
/// many results the conversation already holds. Replies are derived from
/// the actual tool results.
async fn materials_backend(request: CompletionRequest) -> Result<Reply, BackendError> {
    let results: Vec<Value> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| serde_json::from_str(&m.content).unwrap())
        .collect();
    let id = format!("call_{}", results.len());

    if request.offers("transfer_to_data_access_agent") {
        return Ok(match results.len() {
            0 => calls(
                &id,
                "transfer_to_data_access_agent",
                json!({"task": "Find the most stable NaCl entry and download it as NaCl.cif"}),
            ),
            1 => calls(
                &id,
                "transfer_to_structure_agent",
                json!({"task": "Compute the Na-Cl bond distance in outputs/NaCl.cif"}),
            ),
            _ => Reply::Text(results[1]["response"].as_str().unwrap().to_string()),
        });
    }

    if request.offers("download_structure") {
        return Ok(match results.len() {
            0 => calls(&id, "search_materials_by_formula", json!({"formula": "NaCl"})),
            1 => {
                let material_id = results[0]["materials"][0]["material_id"].clone();
                calls(
                    &id,
                    "download_structure",
                    json!({"material_id": material_id, "file_name": "NaCl.cif"}),
                )
            }
            _ => Reply::Text(format!(
                "Downloaded {} to {}",
                results[1]["material_id"], results[1]["path"]
            )),
        });
    }

    if request.offers("calculate_distance") {
        return Ok(match results.len() {
            0 => calls(&id, "read_structure", json!({"path": "outputs/NaCl.cif"})),
            1 => {
                let atoms = results[0]["atoms"].as_array().unwrap();
                let first = |symbol: &str| {
                    atoms
                        .iter()
                        .find(|a| a["symbol"] == symbol)
                        .map(|a| a["index"].clone())
                        .unwrap()
                };
                calls(
                    &id,
                    "calculate_distance",
                    json!({"path": "outputs/NaCl.cif", "index1": first("Na"), "index2": first("Cl")}),
                )
            }
            _ => Reply::Text(format!(
                "The Na-Cl bond distance is {:.3} Å.",
                results[1]["distance_angstrom"].as_f64().unwrap()
            )),
        });
    }

    Err(BackendError::InvalidResponse("unexpected request".into()))
}

#[tokio::test]
async fn nacl_bond_distance_end_to_end() {
    let h = harness();
    let mut coord = coordinator(&h.registry, Arc::new(materials_backend));

    let outcome = coord
        .handle_turn("find the structure for NaCl and compute the Na-Cl bond distance")
        .await;

    assert_eq!(outcome.status, TurnStatus::Answered);
    assert!(outcome.reply.contains("2.845 Å"), "reply: {}", outcome.reply);

    let agents: Vec<&str> = outcome.delegations.iter().map(|d| d.agent.as_str()).collect();
    assert_eq!(agents, ["data_access_agent", "structure_agent"]);
    assert!(
        outcome.delegations[0]
            .report
            .artifacts
            .contains(&"outputs/NaCl.cif".to_string())
    );
    assert!(h.dir.path().join("outputs/NaCl.cif").is_file());
}

#[tokio::test]
async fn routing_is_deterministic() {
    let mut replies = Vec::new();
    for _ in 0..2 {
        let h = harness();
        let mut coord = coordinator(&h.registry, Arc::new(materials_backend));
        let outcome = coord.handle_turn("NaCl bond length please").await;
        let route: Vec<String> = outcome
            .delegations
            .iter()
            .map(|d| format!("{}:{}", d.agent, d.task))
            .collect();
        replies.push((route, outcome.reply));
    }
    assert_eq!(replies[0], replies[1]);
}

#[tokio::test]
async fn write_outside_workspace_is_disallowed() {
    let h = harness();
    let before = std::fs::read("/etc/passwd").ok();
    let backend = Arc::new(ScriptedBackend::new([
        calls(
            "c1",
            "transfer_to_structure_agent",
            json!({"task": "Write 'x' to /etc/passwd"}),
        ),
        calls("c2", "write_file", json!({"path": "/etc/passwd", "content": "x"})),
        calls("c3", "write_file", json!({"path": "../../etc/passwd", "content": "x"})),
        Reply::Text("I could not write the file.".into()),
        Reply::Text("The file could not be written.".into()),
    ]));
    let mut coord = coordinator(&h.registry, backend);

    let outcome = coord.handle_turn("write x to /etc/passwd").await;

    let report = &outcome.delegations[0].report;
    assert!(
        report
            .invocations
            .iter()
            .all(|i| matches!(i.outcome, Err(ToolError::PathEscape(_))))
    );
    assert!(report.artifacts.is_empty());
    assert!(outcome.reply.contains("disallowed"), "reply: {}", outcome.reply);
    assert!(outcome.reply.contains("workspace was left unmodified"));
    assert!(h.workspace.list_all().await.unwrap().is_empty());
    assert_eq!(std::fs::read("/etc/passwd").ok(), before);
}

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

#[tokio::test]
async fn script_timeout_keeps_session_alive() {
    if !python_available() {
        return;
    }
    let h = harness();
    let backend = Arc::new(ScriptedBackend::new([
        calls(
            "c1",
            "transfer_to_structure_agent",
            json!({"task": "Run a long relaxation script"}),
        ),
        calls(
            "c2",
            "run_python_script",
            json!({"script": "import time\ntime.sleep(30)\nprint('done')"}),
        ),
        Reply::Text("The script did not finish.".into()),
        Reply::Text("The relaxation did not complete.".into()),
        Reply::Text("Hello again.".into()),
    ]));
    let coord = coordinator(&h.registry, backend);
    let mut runtime = SessionRuntime::new(coord, Arc::clone(&h.workspace));

    let input: &[u8] = b"run the relaxation\nhello\nquit\n";
    let mut output = Vec::new();
    runtime.run(input, &mut output).await.unwrap();
    let output = String::from_utf8(output).unwrap();

    assert!(output.contains("timed out"), "output: {output}");
    assert!(output.contains("Hello again."));
    let turns = runtime.session().turns();
    assert_eq!(turns.len(), 2);
    let invocation = turns[0].invocations().next().unwrap();
    assert_eq!(invocation.outcome.as_ref().unwrap_err().kind(), "timeout");
    assert!(!output.contains("done"));
}

#[tokio::test]
async fn downloaded_artifact_round_trips_into_structure_tools() {
    let h = harness();
    let backend: Arc<dyn InferenceBackend> = Arc::new(ScriptedBackend::default());
    let data = data_access_agent(&h.registry, Arc::clone(&backend), "m");
    let structure = structure_agent(&h.registry, backend, "m");

    for file_name in ["NaCl.cif", "NaCl.vasp", "NaCl.json"] {
        let downloaded = data
            .registry()
            .invoke(
                "download_structure",
                json!({"material_id": "mp-22862", "file_name": file_name}),
            )
            .await
            .unwrap();
        let path = downloaded["path"].as_str().unwrap();

        let read = structure
            .registry()
            .invoke("read_structure", json!({"path": path}))
            .await
            .unwrap();
        assert_eq!(read["num_atoms"], 8, "{file_name}");
        for axis in ["a", "b", "c"] {
            assert!((read["lattice"][axis].as_f64().unwrap() - 5.69).abs() < 1e-4);
        }
        let original = nacl();
        for (atom, site) in read["atoms"].as_array().unwrap().iter().zip(&original.sites) {
            assert_eq!(atom["symbol"], site.species.as_str());
            for k in 0..3 {
                let frac = atom["frac"][k].as_f64().unwrap();
                let delta = (frac - site.frac[k]).abs();
                assert!(delta < 1e-4 || (1.0 - delta) < 1e-4, "{file_name}: {frac}");
            }
        }
    }
}

#[tokio::test]
async fn analysis_tools_are_idempotent() {
    let h = harness();
    h.registry
        .invoke("download_structure", json!({"material_id": "mp-22862"}))
        .await
        .unwrap();
    let file = h.dir.path().join("outputs/mp-22862.cif");
    let bytes = std::fs::read(&file).unwrap();

    for (tool, args) in [
        (
            "calculate_distance",
            json!({"path": "outputs/mp-22862.cif", "index1": 0, "index2": 4}),
        ),
        ("check_close_atoms", json!({"path": "outputs/mp-22862.cif"})),
        ("read_structure", json!({"path": "outputs/mp-22862.cif"})),
    ] {
        let first = h.registry.invoke(tool, args.clone()).await.unwrap();
        let second = h.registry.invoke(tool, args).await.unwrap();
        assert_eq!(first, second, "{tool}");
    }
    assert_eq!(std::fs::read(&file).unwrap(), bytes);
}

#[tokio::test]
async fn schema_violation_never_reaches_handler() {
    let h = harness();
    let mut registry = h.registry.clone();
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handled);
    registry.register(
        ToolDescriptor::new(ToolKind::CalculateDistance, SideEffect::Pure, "Counting stand-in")
            .param("path", ValueType::String, "file")
            .param("index1", ValueType::Integer, "first")
            .param("index2", ValueType::Integer, "second"),
        move |_req: ToolRequest| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({}))
            }
        },
    );

    let backend = Arc::new(ScriptedBackend::new([
        calls("c1", "calculate_distance", json!({"path": "outputs/x.cif", "index1": 0})),
        calls(
            "c2",
            "calculate_distance",
            json!({"path": "outputs/x.cif", "index1": 0, "index2": "four"}),
        ),
        Reply::Text("Bad arguments.".into()),
    ]));
    let agent = structure_agent(&registry, backend, "m");
    let report = agent.run("measure").await.unwrap();

    assert_eq!(handled.load(Ordering::SeqCst), 0);
    assert_eq!(report.invocations.len(), 2);
    for invocation in &report.invocations {
        assert!(matches!(
            invocation.outcome,
            Err(ToolError::SchemaViolation { .. })
        ));
    }

    registry
        .invoke(
            "calculate_distance",
            json!({"path": "outputs/x.cif", "index1": 0, "index2": 4}),
        )
        .await
        .unwrap();
    assert_eq!(handled.load(Ordering::SeqCst), 1);
}
