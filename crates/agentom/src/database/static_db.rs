//! In-memory materials database.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use super::{DatabaseError, MaterialQuery, MaterialSummary, MaterialsDatabase};
use crate::structure::Structure;
use crate::structure::io::to_pymatgen_json;

#[derive(Debug, Clone)]
struct Entry {
    summary: MaterialSummary,
    structure: Structure,
}

/// A fixed set of structures answering searches offline.
///
/// Used for tests and for running sessions without Materials Project access.
#[derive(Debug, Clone, Default)]
pub struct StaticDatabase {
    entries: Vec<Entry>,
}

impl StaticDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a structure under `material_id`.
    pub fn with_structure(
        mut self,
        material_id: impl Into<String>,
        structure: Structure,
        energy_above_hull: f64,
    ) -> Self {
        let composition = structure.composition();
        let summary = MaterialSummary {
            material_id: material_id.into(),
            formula: structure.reduced_formula(),
            energy_above_hull: Some(energy_above_hull),
            is_stable: Some(energy_above_hull.abs() < 1e-9),
            crystal_system: None,
            spacegroup_symbol: None,
            num_elements: u32::try_from(composition.len()).ok(),
            num_sites: u32::try_from(structure.num_sites()).ok(),
            structure: Some(to_pymatgen_json(&structure)),
        };
        self.entries.push(Entry { summary, structure });
        self
    }

    /// Add a structure with a hand-written summary.
    pub fn with_entry(mut self, summary: MaterialSummary, structure: Structure) -> Self {
        self.entries.push(Entry { summary, structure });
        self
    }

    /// Number of materials held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the database holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn entry_matches(entry: &Entry, query: &MaterialQuery) -> Result<bool, DatabaseError> {
    let summary = &entry.summary;
    let composition = entry.structure.composition();

    if let Some(formula) = &query.formula
        && !formula_matches(formula, &composition)?
    {
        return Ok(false);
    }
    if let Some(system) = &query.chemical_system {
        let wanted: BTreeSet<&str> = system.split('-').map(str::trim).collect();
        let present: BTreeSet<&str> = composition.iter().map(|(s, _)| s.as_str()).collect();
        if wanted != present {
            return Ok(false);
        }
    }

    let e_hull = summary.energy_above_hull;
    if let Some(min) = query.min_energy_above_hull
        && e_hull.is_none_or(|e| e < min)
    {
        return Ok(false);
    }
    if let Some(max) = query.max_energy_above_hull
        && e_hull.is_none_or(|e| e > max)
    {
        return Ok(false);
    }
    if let Some(stable) = query.is_stable
        && summary.is_stable != Some(stable)
    {
        return Ok(false);
    }
    if let Some(symbol) = &query.spacegroup_symbol
        && summary.spacegroup_symbol.as_deref() != Some(symbol.as_str())
    {
        return Ok(false);
    }
    // Spacegroup numbers are not tracked for static entries.
    if query.spacegroup_number.is_some() {
        return Ok(false);
    }
    Ok(true)
}

/// Parse `Fe2O3` or `*2O3` into (symbol, count) pairs; `None` is a wildcard.
fn parse_formula(formula: &str) -> Result<Vec<(Option<String>, usize)>, DatabaseError> {
    let invalid = || DatabaseError::InvalidQuery(format!("cannot parse formula '{formula}'"));
    let chars: Vec<char> = formula.trim().chars().collect();
    if chars.is_empty() {
        return Err(invalid());
    }

    let mut parts = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let symbol = if chars[i] == '*' {
            i += 1;
            None
        } else if chars[i].is_ascii_uppercase() {
            let start = i;
            i += 1;
            while i < chars.len() && chars[i].is_ascii_lowercase() {
                i += 1;
            }
            Some(chars[start..i].iter().collect::<String>())
        } else {
            return Err(invalid());
        };

        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        let count = if start == i {
            1
        } else {
            chars[start..i]
                .iter()
                .collect::<String>()
                .parse()
                .map_err(|_| invalid())?
        };
        parts.push((symbol, count));
    }
    Ok(parts)
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn reduce<T>(counts: &mut [(T, usize)]) {
    let divisor = counts.iter().fold(0, |g, (_, n)| gcd(g, *n)).max(1);
    for (_, n) in counts.iter_mut() {
        *n /= divisor;
    }
}

fn formula_matches(formula: &str, composition: &[(String, usize)]) -> Result<bool, DatabaseError> {
    let mut wanted = parse_formula(formula)?;
    reduce(&mut wanted);
    let mut present: Vec<(String, usize)> = composition.to_vec();
    reduce(&mut present);

    if wanted.len() != present.len() {
        return Ok(false);
    }

    let mut remaining: BTreeMap<String, usize> = present.into_iter().collect();
    let mut wildcards = Vec::new();
    for (symbol, count) in wanted {
        match symbol {
            Some(symbol) => {
                if remaining.remove(&symbol) != Some(count) {
                    return Ok(false);
                }
            }
            None => wildcards.push(count),
        }
    }

    let mut left: Vec<usize> = remaining.into_values().collect();
    left.sort_unstable();
    wildcards.sort_unstable();
    Ok(left == wildcards)
}

#[async_trait]
impl MaterialsDatabase for StaticDatabase {
    async fn search(&self, query: &MaterialQuery) -> Result<Vec<MaterialSummary>, DatabaseError> {
        let mut results = Vec::new();
        for entry in &self.entries {
            if entry_matches(entry, query)? {
                results.push(entry.summary.clone());
            }
        }
        if let Some(limit) = query.num_results {
            results.truncate(limit);
        }
        tracing::debug!(?query, hits = results.len(), "static database search");
        Ok(results)
    }

    async fn download(&self, material_id: &str) -> Result<Vec<u8>, DatabaseError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.summary.material_id == material_id)
            .ok_or_else(|| DatabaseError::NotFound(material_id.to_string()))?;
        serde_json::to_vec(&to_pymatgen_json(&entry.structure))
            .map_err(|e| DatabaseError::InvalidResponse(e.to_string()))
    }
}
