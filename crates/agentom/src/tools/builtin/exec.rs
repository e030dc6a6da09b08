//! `run_python_script`: screened Python execution in the workspace.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::json;

use super::Args;
use crate::tools::{
    SideEffect, ToolDescriptor, ToolError, ToolKind, ToolRegistry, ToolRequest, ToolResult, ValueType,
};
use crate::workspace::{ExecutionFailure, TEMP_DIR};

/// Patterns a script may not contain, with the reason reported back.
const SCREEN_PATTERNS: &[(&str, &str)] = &[
    (
        r"(?m)^\s*import\s+[^\n#]*\b(subprocess|shutil|importlib)\b",
        "prohibited module import",
    ),
    (
        r"(?m)^\s*from\s+(subprocess|shutil|importlib)\b",
        "prohibited module import",
    ),
    (
        r"(?:^|[^.\w])(eval|exec|compile|__import__|input)\s*\(",
        "prohibited function call",
    ),
    (
        r"\bos\s*\.\s*(system|popen|exec\w*|spawn\w*|fork|kill)\b",
        "prohibited os function",
    ),
    (
        r"(?m)^\s*from\s+os\s+import\s+[^\n#]*\b(system|popen|exec\w*|spawn\w*|fork|kill)\b",
        "prohibited import from os",
    ),
];

static SCREEN: LazyLock<Result<Vec<(Regex, &'static str)>, regex::Error>> = LazyLock::new(|| {
    SCREEN_PATTERNS
        .iter()
        .map(|(pattern, reason)| Regex::new(pattern).map(|re| (re, *reason)))
        .collect()
});

/// Reject scripts that try to leave the sandbox through Python itself.
fn screen(script: &str) -> Result<(), ToolError> {
    let rules = SCREEN
        .as_ref()
        .map_err(|e| ToolError::HandlerFailure(format!("script screening unavailable: {e}")))?;
    for (re, reason) in rules {
        if let Some(caps) = re.captures(script) {
            let what = caps.get(1).map_or("", |m| m.as_str());
            return Err(ToolError::HandlerFailure(format!(
                "security check failed: {reason}: {what}"
            )));
        }
    }
    Ok(())
}

pub(super) fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolDescriptor::new(
            ToolKind::RunPythonScript,
            SideEffect::Execute,
            "Run a Python script with the workspace as working directory. \
             Use relative paths such as 'outputs/NaCl.cif'. Subprocesses, eval/exec \
             and os.system-style calls are rejected.",
        )
        .param("script", ValueType::String, "Python source code to run")
        .optional(
            "timeout_secs",
            ValueType::Number,
            "Wall-clock limit in seconds (capped by the configured limit)",
        )
        .returns("exit_code", ValueType::Integer)
        .returns("stdout", ValueType::String)
        .returns("stderr", ValueType::String)
        .returns("truncated", ValueType::Boolean),
        run_python_script,
    );
}

async fn run_python_script(req: ToolRequest) -> ToolResult {
    let args = Args(&req.args);
    let script = args.str("script")?;
    screen(script)?;

    let ctx = &req.context;
    let mut limits = ctx.limits.clone();
    if let Some(secs) = args.opt_f64("timeout_secs") {
        if !(secs.is_finite() && secs > 0.0) {
            return Err(ToolError::HandlerFailure(
                "timeout_secs must be a positive number".to_string(),
            ));
        }
        limits = limits.with_timeout(Duration::from_secs_f64(secs).min(ctx.limits.timeout));
    }

    let script_path = format!("{TEMP_DIR}/script_{}.py", uuid::Uuid::new_v4().simple());
    let script_path = ctx.workspace.write(&script_path, script.as_bytes()).await?;
    let run = ctx
        .workspace
        .run_script(&ctx.python, &script_path, &limits)
        .await;
    if let Err(e) = ctx.workspace.remove_file(&script_path).await {
        tracing::warn!(path = %script_path, error = %e, "failed to remove script");
    }
    let result = run?;

    if !result.success() {
        return Err(ToolError::ExecutionFailure(ExecutionFailure::NonZeroExit {
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
        }));
    }
    Ok(json!({
        "exit_code": result.exit_code,
        "stdout": result.stdout,
        "stderr": result.stderr,
        "truncated": result.truncated,
    }))
}
