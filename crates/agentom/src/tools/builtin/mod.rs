//! Built-in tool handlers.

mod database;
mod exec;
mod files;
mod structure;

use serde_json::{Map, Value};

use super::{ToolError, ToolRegistry};
use crate::workspace::OUTPUTS_DIR;

/// Register every built-in tool.
pub(crate) fn register_all(registry: &mut ToolRegistry) {
    files::register(registry);
    exec::register(registry);
    database::register(registry);
    structure::register(registry);
}

/// Typed access to validated arguments.
///
/// Presence and type were checked by the registry; failures here mean a
/// handler asked for something its descriptor does not declare.
struct Args<'a>(&'a Map<String, Value>);

impl<'a> Args<'a> {
    fn missing(name: &str) -> ToolError {
        ToolError::HandlerFailure(format!("argument '{name}' missing or mistyped"))
    }

    fn str(&self, name: &str) -> Result<&'a str, ToolError> {
        self.opt_str(name).ok_or_else(|| Self::missing(name))
    }

    fn opt_str(&self, name: &str) -> Option<&'a str> {
        self.0.get(name).and_then(Value::as_str)
    }

    fn i64(&self, name: &str) -> Result<i64, ToolError> {
        self.opt_i64(name).ok_or_else(|| Self::missing(name))
    }

    fn opt_i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    fn f64(&self, name: &str) -> Result<f64, ToolError> {
        self.opt_f64(name).ok_or_else(|| Self::missing(name))
    }

    fn opt_f64(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    fn opt_bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    fn i64_list(&self, name: &str) -> Result<Vec<i64>, ToolError> {
        self.opt_i64_list(name).ok_or_else(|| Self::missing(name))
    }

    fn opt_i64_list(&self, name: &str) -> Option<Vec<i64>> {
        self.0
            .get(name)?
            .as_array()?
            .iter()
            .map(Value::as_i64)
            .collect()
    }
}

/// Where a derived artifact goes: a bare file name lands in `outputs/`,
/// anything with a directory component is used as given.
fn output_path(name: &str) -> String {
    if name.contains('/') {
        name.to_string()
    } else {
        format!("{OUTPUTS_DIR}/{name}")
    }
}

/// Final path component of a workspace path.
fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Exactly three integers.
fn three(values: &[i64], what: &str) -> Result<[i64; 3], ToolError> {
    <[i64; 3]>::try_from(values).map_err(|_| {
        ToolError::HandlerFailure(format!("{what} must be a list of three integers"))
    })
}
