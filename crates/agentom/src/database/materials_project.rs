//! Materials Project REST client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{DatabaseError, MaterialQuery, MaterialSummary, MaterialsDatabase};
use crate::retry::RetryPolicy;

/// Public Materials Project API endpoint.
pub const DEFAULT_MP_ENDPOINT: &str = "https://api.materialsproject.org";

const SUMMARY_FIELDS: &str =
    "material_id,formula_pretty,energy_above_hull,is_stable,symmetry,structure,nelements,nsites";

/// Client for `/materials/summary/`.
///
/// The API key is checked when a request is made, not at construction, so a
/// session can start (and use its other tools) without one.
#[derive(Clone)]
pub struct MaterialsProjectClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl fmt::Debug for MaterialsProjectClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterialsProjectClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    data: Vec<SummaryDoc>,
}

#[derive(Debug, Deserialize)]
struct SummaryDoc {
    material_id: String,
    #[serde(default)]
    formula_pretty: Option<String>,
    #[serde(default)]
    energy_above_hull: Option<f64>,
    #[serde(default)]
    is_stable: Option<bool>,
    #[serde(default)]
    symmetry: Option<Symmetry>,
    #[serde(default)]
    nelements: Option<u32>,
    #[serde(default)]
    nsites: Option<u32>,
    #[serde(default)]
    structure: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Symmetry {
    #[serde(default)]
    crystal_system: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
}

impl From<SummaryDoc> for MaterialSummary {
    fn from(doc: SummaryDoc) -> Self {
        let (crystal_system, spacegroup_symbol) = doc
            .symmetry
            .map(|s| (s.crystal_system, s.symbol))
            .unwrap_or_default();
        Self {
            formula: doc.formula_pretty.unwrap_or_default(),
            material_id: doc.material_id,
            energy_above_hull: doc.energy_above_hull,
            is_stable: doc.is_stable,
            crystal_system,
            spacegroup_symbol,
            num_elements: doc.nelements,
            num_sites: doc.nsites,
            structure: doc.structure,
        }
    }
}

/// A failed attempt, tagged with whether trying again could help.
#[derive(Debug)]
struct Attempt {
    transient: bool,
    error: DatabaseError,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl MaterialsProjectClient {
    /// Create a client against the public endpoint.
    pub fn new(api_key: Option<String>) -> Result<Self, DatabaseError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("agentom/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DatabaseError::Request(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: DEFAULT_MP_ENDPOINT.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            retry: RetryPolicy::default(),
        })
    }

    /// Use a different API endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Use a different retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Whether an API key is configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn search_params(query: &MaterialQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![("_fields", SUMMARY_FIELDS.to_string())];
        if let Some(formula) = &query.formula {
            params.push(("formula", formula.clone()));
        }
        if let Some(system) = &query.chemical_system {
            params.push(("chemsys", system.clone()));
        }
        if let Some(min) = query.min_energy_above_hull {
            params.push(("energy_above_hull_min", min.to_string()));
        }
        if let Some(max) = query.max_energy_above_hull {
            params.push(("energy_above_hull_max", max.to_string()));
        }
        if let Some(stable) = query.is_stable {
            params.push(("is_stable", stable.to_string()));
        }
        if let Some(number) = query.spacegroup_number {
            params.push(("spacegroup_number", number.to_string()));
        }
        if let Some(symbol) = &query.spacegroup_symbol {
            params.push(("spacegroup_symbol", symbol.clone()));
        }
        if let Some(limit) = query.num_results {
            params.push(("_limit", limit.to_string()));
        }
        params
    }

    async fn summary(&self, params: &[(&'static str, String)]) -> Result<Vec<SummaryDoc>, DatabaseError> {
        let api_key = self.api_key.as_deref().ok_or(DatabaseError::MissingApiKey)?;
        let url = format!("{}/materials/summary/", self.endpoint);

        self.retry
            .run(
                "materials project summary",
                || async {
                    let response = self
                        .http
                        .get(&url)
                        .header("X-API-KEY", api_key)
                        .query(params)
                        .send()
                        .await
                        .map_err(|e| Attempt {
                            transient: e.is_connect() || e.is_timeout(),
                            error: DatabaseError::Request(e.to_string()),
                        })?;

                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(Attempt {
                            transient: status.as_u16() == 429 || status.is_server_error(),
                            error: DatabaseError::Request(format!(
                                "HTTP {status}: {}",
                                body.chars().take(200).collect::<String>()
                            )),
                        });
                    }

                    response
                        .json::<SummaryResponse>()
                        .await
                        .map(|r| r.data)
                        .map_err(|e| Attempt {
                            transient: false,
                            error: DatabaseError::InvalidResponse(e.to_string()),
                        })
                },
                |attempt: &Attempt| attempt.transient,
            )
            .await
            .map_err(|attempt| attempt.error)
    }
}

#[async_trait]
impl MaterialsDatabase for MaterialsProjectClient {
    async fn search(&self, query: &MaterialQuery) -> Result<Vec<MaterialSummary>, DatabaseError> {
        tracing::info!(?query, "searching Materials Project");
        let docs = self.summary(&Self::search_params(query)).await?;
        let mut results: Vec<MaterialSummary> = docs.into_iter().map(Into::into).collect();
        if let Some(limit) = query.num_results {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn download(&self, material_id: &str) -> Result<Vec<u8>, DatabaseError> {
        tracing::info!(material_id, "downloading structure from Materials Project");
        let params = [
            ("material_ids", material_id.to_string()),
            ("_fields", "material_id,structure".to_string()),
        ];
        let docs = self.summary(&params).await?;
        let structure = docs
            .into_iter()
            .find(|d| d.material_id == material_id)
            .and_then(|d| d.structure)
            .ok_or_else(|| DatabaseError::NotFound(material_id.to_string()))?;
        serde_json::to_vec(&structure).map_err(|e| DatabaseError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_api_key_fails_before_request() {
        // Unroutable endpoint: the key check must short-circuit first.
        let client = MaterialsProjectClient::new(None)
            .unwrap()
            .with_endpoint("http://127.0.0.1:9");
        assert!(!client.has_api_key());

        let err = client.search(&MaterialQuery::formula("NaCl")).await.unwrap_err();
        assert_eq!(err, DatabaseError::MissingApiKey);
        let err = client.download("mp-22862").await.unwrap_err();
        assert_eq!(err, DatabaseError::MissingApiKey);
    }

    #[test]
    fn test_blank_api_key_is_missing() {
        let client = MaterialsProjectClient::new(Some("  ".to_string())).unwrap();
        assert!(!client.has_api_key());
    }

    #[test]
    fn test_search_params() {
        let query = MaterialQuery {
            formula: Some("Fe2O3".to_string()),
            max_energy_above_hull: Some(0.1),
            is_stable: Some(true),
            num_results: Some(5),
            ..MaterialQuery::default()
        };
        let params = MaterialsProjectClient::search_params(&query);
        assert!(params.contains(&("formula", "Fe2O3".to_string())));
        assert!(params.contains(&("energy_above_hull_max", "0.1".to_string())));
        assert!(params.contains(&("is_stable", "true".to_string())));
        assert!(params.contains(&("_limit", "5".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "chemsys"));
    }

    #[test]
    fn test_summary_doc_conversion() {
        let doc: SummaryDoc = serde_json::from_value(serde_json::json!({
            "material_id": "mp-22862",
            "formula_pretty": "NaCl",
            "energy_above_hull": 0.0,
            "is_stable": true,
            "symmetry": {"crystal_system": "Cubic", "symbol": "Fm-3m", "number": 225},
            "nelements": 2,
            "nsites": 2
        }))
        .unwrap();
        let summary = MaterialSummary::from(doc);
        assert_eq!(summary.formula, "NaCl");
        assert_eq!(summary.spacegroup_symbol.as_deref(), Some("Fm-3m"));
        assert_eq!(summary.num_sites, Some(2));
        assert!(summary.structure.is_none());
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = MaterialsProjectClient::new(Some("secret-key".to_string())).unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("redacted"));
    }
}
