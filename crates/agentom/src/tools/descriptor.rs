//! Tool descriptors: identity, parameter schema, return contract.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::ToolError;

/// Every tool the system knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Read a text file
    ReadFile,
    /// Write a text file
    WriteFile,
    /// List files in one directory
    ListFiles,
    /// List every file grouped by folder
    ListAllFiles,
    /// Run a Python script in the workspace
    RunPythonScript,
    /// Search the materials database by formula
    SearchMaterialsByFormula,
    /// Search the materials database by chemical system
    SearchMaterialsByChemicalSystem,
    /// Download a structure file from the materials database
    DownloadStructure,
    /// Summarize a structure file
    ReadStructure,
    /// Distance between two sites
    CalculateDistance,
    /// Find atom pairs closer than their covalent radii allow
    CheckCloseAtoms,
    /// Repeat a cell
    BuildSupercell,
    /// Cut a slab along a Miller plane
    BuildSurface,
    /// Stack a film on a substrate
    BuildInterface,
}

impl ToolKind {
    /// All tool kinds, in display order.
    pub const ALL: [ToolKind; 14] = [
        ToolKind::ReadFile,
        ToolKind::WriteFile,
        ToolKind::ListFiles,
        ToolKind::ListAllFiles,
        ToolKind::RunPythonScript,
        ToolKind::SearchMaterialsByFormula,
        ToolKind::SearchMaterialsByChemicalSystem,
        ToolKind::DownloadStructure,
        ToolKind::ReadStructure,
        ToolKind::CalculateDistance,
        ToolKind::CheckCloseAtoms,
        ToolKind::BuildSupercell,
        ToolKind::BuildSurface,
        ToolKind::BuildInterface,
    ];

    /// The name the model calls this tool by.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::ListFiles => "list_files",
            Self::ListAllFiles => "list_all_files",
            Self::RunPythonScript => "run_python_script",
            Self::SearchMaterialsByFormula => "search_materials_by_formula",
            Self::SearchMaterialsByChemicalSystem => "search_materials_by_chemical_system",
            Self::DownloadStructure => "download_structure",
            Self::ReadStructure => "read_structure",
            Self::CalculateDistance => "calculate_distance",
            Self::CheckCloseAtoms => "check_close_atoms",
            Self::BuildSupercell => "build_supercell",
            Self::BuildSurface => "build_surface",
            Self::BuildInterface => "build_interface",
        }
    }

    /// Look a kind up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Semantic type of a parameter or return field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// JSON string
    String,
    /// Integral JSON number
    Integer,
    /// Any JSON number
    Number,
    /// JSON boolean
    Boolean,
    /// Array of integers
    IntegerList,
    /// Array of numbers
    NumberList,
    /// Array of strings
    StringList,
    /// JSON object
    Object,
    /// Array of anything
    Array,
}

impl ValueType {
    /// Whether `value` has this type.
    pub fn matches(&self, value: &Value) -> bool {
        fn all(value: &Value, pred: fn(&Value) -> bool) -> bool {
            value.as_array().is_some_and(|items| items.iter().all(pred))
        }
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::IntegerList => all(value, |v| v.is_i64() || v.is_u64()),
            Self::NumberList => all(value, Value::is_number),
            Self::StringList => all(value, Value::is_string),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    fn json_schema(&self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Number => json!({"type": "number"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::IntegerList => json!({"type": "array", "items": {"type": "integer"}}),
            Self::NumberList => json!({"type": "array", "items": {"type": "number"}}),
            Self::StringList => json!({"type": "array", "items": {"type": "string"}}),
            Self::Object => json!({"type": "object"}),
            Self::Array => json!({"type": "array"}),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Integer => "an integer",
            Self::Number => "a number",
            Self::Boolean => "a boolean",
            Self::IntegerList => "a list of integers",
            Self::NumberList => "a list of numbers",
            Self::StringList => "a list of strings",
            Self::Object => "an object",
            Self::Array => "a list",
        }
    }
}

/// What a tool does to the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    /// Computes from its inputs only
    Pure,
    /// Reads workspace files or remote data
    Read,
    /// Creates or replaces workspace files
    Write,
    /// Runs code
    Execute,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name
    pub name: String,
    /// Semantic type
    pub value_type: ValueType,
    /// Whether the parameter must be present and non-null
    pub required: bool,
    /// Description shown to the model
    pub description: String,
}

/// One field the handler promises in its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnField {
    /// Field name
    pub name: String,
    /// Semantic type
    pub value_type: ValueType,
}

/// Immutable description of one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool identity
    pub kind: ToolKind,
    /// Description shown to the model
    pub description: String,
    /// Declared parameters
    pub params: Vec<ParamSpec>,
    /// Declared result fields
    pub returns: Vec<ReturnField>,
    /// Side-effect class
    pub side_effect: SideEffect,
}

impl ToolDescriptor {
    /// Start a descriptor with no parameters or return fields.
    pub fn new(kind: ToolKind, side_effect: SideEffect, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            params: Vec::new(),
            returns: Vec::new(),
            side_effect,
        }
    }

    /// Add a required parameter.
    pub fn param(self, name: &str, value_type: ValueType, description: &str) -> Self {
        self.push_param(name, value_type, true, description)
    }

    /// Add an optional parameter.
    pub fn optional(self, name: &str, value_type: ValueType, description: &str) -> Self {
        self.push_param(name, value_type, false, description)
    }

    fn push_param(mut self, name: &str, value_type: ValueType, required: bool, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            value_type,
            required,
            description: description.to_string(),
        });
        self
    }

    /// Add a required result field.
    pub fn returns(mut self, name: &str, value_type: ValueType) -> Self {
        self.returns.push(ReturnField {
            name: name.to_string(),
            value_type,
        });
        self
    }

    /// The tool's name.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// JSON Schema of the arguments object.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            let mut schema = param.value_type.json_schema();
            schema["description"] = json!(param.description);
            properties.insert(param.name.clone(), schema);
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Check `args` against the parameter schema.
    ///
    /// `null` (or an absent argument object) counts as `{}`. Optional
    /// parameters given as `null` are dropped from the returned map.
    pub fn validate_args(&self, args: &Value) -> Result<Map<String, Value>, ToolError> {
        let violation = |message: String| ToolError::SchemaViolation {
            tool: self.name().to_string(),
            message,
        };

        let mut args = match args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(violation(format!(
                    "arguments must be an object, got {}",
                    json_type_name(other)
                )));
            }
        };

        if let Some(unknown) = args
            .keys()
            .find(|k| !self.params.iter().any(|p| p.name == **k))
        {
            return Err(violation(format!("unknown parameter '{unknown}'")));
        }

        for param in &self.params {
            match args.get(&param.name).filter(|v| !v.is_null()) {
                None if param.required => {
                    return Err(violation(format!("missing required parameter '{}'", param.name)));
                }
                Some(value) if !param.value_type.matches(value) => {
                    return Err(violation(format!(
                        "parameter '{}' must be {}, got {}",
                        param.name,
                        param.value_type.describe(),
                        json_type_name(value)
                    )));
                }
                _ => {}
            }
        }
        args.retain(|_, v| !v.is_null());
        Ok(args)
    }

    /// Check a handler's result against the return contract.
    pub fn validate_result(&self, result: &Value) -> Result<(), ToolError> {
        let failure =
            |message: String| ToolError::HandlerFailure(format!("{} returned {message}", self.name()));
        let Some(object) = result.as_object() else {
            return Err(failure(format!("{} instead of an object", json_type_name(result))));
        };
        for field in &self.returns {
            match object.get(&field.name) {
                None => {
                    return Err(failure(format!("no '{}' field", field.name)));
                }
                Some(value) if !field.value_type.matches(value) => {
                    return Err(failure(format!(
                        "'{}' that is not {}",
                        field.name,
                        field.value_type.describe()
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Render a tool index: one tool per line, descriptions aligned.
///
/// ```text
/// read_file         Read a text file from the workspace
/// build_surface     Cut a surface slab from a bulk structure
/// ```
pub fn generate_index_txt<'a>(tools: impl IntoIterator<Item = &'a ToolDescriptor>) -> String {
    let tools: Vec<&ToolDescriptor> = tools.into_iter().collect();
    let Some(max_name_len) = tools.iter().map(|t| t.name().len()).max() else {
        return String::new();
    };
    let padding = max_name_len + 4;

    let mut output = String::new();
    for tool in tools {
        let summary = tool.description.lines().next().unwrap_or_default();
        output.push_str(tool.name());
        output.push_str(&" ".repeat(padding - tool.name().len()));
        output.push_str(summary);
        output.push('\n');
    }
    output
}
