//! Materials database access.
//!
//! [`MaterialsDatabase`] is the seam the data access tools talk to.
//! [`MaterialsProjectClient`] queries the Materials Project REST API;
//! [`StaticDatabase`] serves a fixed set of structures from memory.

mod materials_project;
mod static_db;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use materials_project::{DEFAULT_MP_ENDPOINT, MaterialsProjectClient};
pub use static_db::StaticDatabase;

/// Errors from a materials database.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DatabaseError {
    /// No API key is configured.
    #[error("MP_API_KEY not set; set the environment variable or add it to a .env file")]
    MissingApiKey,
    /// The request failed (network, HTTP status, timeout).
    #[error("database request failed: {0}")]
    Request(String),
    /// The requested material does not exist.
    #[error("material not found: {0}")]
    NotFound(String),
    /// The query itself is malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// The response could not be interpreted.
    #[error("invalid database response: {0}")]
    InvalidResponse(String),
}

/// Search filters. Unset fields do not constrain the search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialQuery {
    /// Chemical formula, e.g. `Fe2O3` (`*` wildcards are passed through)
    pub formula: Option<String>,
    /// Dash-separated chemical system, e.g. `Fe-O`
    pub chemical_system: Option<String>,
    /// Lower bound on energy above hull, eV/atom
    pub min_energy_above_hull: Option<f64>,
    /// Upper bound on energy above hull, eV/atom
    pub max_energy_above_hull: Option<f64>,
    /// Only materials on (or off) the convex hull
    pub is_stable: Option<bool>,
    /// International space group number
    pub spacegroup_number: Option<i64>,
    /// Hermann-Mauguin space group symbol
    pub spacegroup_symbol: Option<String>,
    /// Maximum number of results
    pub num_results: Option<usize>,
}

impl MaterialQuery {
    /// Query by formula.
    pub fn formula(formula: impl Into<String>) -> Self {
        Self {
            formula: Some(formula.into()),
            ..Self::default()
        }
    }

    /// Query by chemical system.
    pub fn chemical_system(system: impl Into<String>) -> Self {
        Self {
            chemical_system: Some(system.into()),
            ..Self::default()
        }
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialSummary {
    /// Database identifier, e.g. `mp-22862`
    pub material_id: String,
    /// Reduced formula as displayed by the database
    pub formula: String,
    /// Energy above hull, eV/atom
    #[serde(default)]
    pub energy_above_hull: Option<f64>,
    /// Whether the material is on the convex hull
    #[serde(default)]
    pub is_stable: Option<bool>,
    /// Crystal system name
    #[serde(default)]
    pub crystal_system: Option<String>,
    /// Space group symbol
    #[serde(default)]
    pub spacegroup_symbol: Option<String>,
    /// Number of distinct elements
    #[serde(default)]
    pub num_elements: Option<u32>,
    /// Number of sites in the cell
    #[serde(default)]
    pub num_sites: Option<u32>,
    /// pymatgen structure dictionary, when the search returned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<serde_json::Value>,
}

/// A source of crystal structures.
#[async_trait]
pub trait MaterialsDatabase: Send + Sync + fmt::Debug {
    /// Search for materials matching `query`.
    async fn search(&self, query: &MaterialQuery) -> Result<Vec<MaterialSummary>, DatabaseError>;

    /// Fetch the structure of `material_id` as pymatgen structure JSON.
    async fn download(&self, material_id: &str) -> Result<Vec<u8>, DatabaseError>;
}
