//! Weak and symbolic relations between APIs, plus the key lists that steer
//! random API selection.
//!
//! All tables are keyed by `Object.api` strings. They are read from a config
//! directory holding any of `blocklist.txt`, `limitlist.txt`,
//! `all_relation.json` and `all_symbolic.json`; a missing file yields an empty
//! table.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use log::{info, warn};
use serde_json::{Map, Value};

use crate::catalog::{CatalogError, CatalogResult};
use crate::symbolic::{self, ConstraintKind, SolverBudget, SolverResult};

pub const BLOCKLIST_FILE: &str = "blocklist.txt";
pub const LIMITLIST_FILE: &str = "limitlist.txt";
pub const WEAK_RELATIONS_FILE: &str = "all_relation.json";
pub const SYMBOLIC_RELATIONS_FILE: &str = "all_symbolic.json";

/// Adjacency list from an API key to APIs observed to relate to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeakRelations {
    edges: BTreeMap<String, Vec<String>>,
}

impl WeakRelations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: &str, to: &str) {
        self.edges.entry(from.to_string()).or_default().push(to.to_string());
    }

    /// Related keys of `api_key`, empty when there are none.
    pub fn related(&self, api_key: &str) -> &[String] {
        self.edges.get(api_key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Parse `{"Obj.api": ["Obj.other", ...], ...}`; non-string entries are
    /// skipped.
    pub fn from_json(value: &Value) -> CatalogResult<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| CatalogError::MalformedRelation("weak relations must be a JSON object".to_string()))?;
        let mut relations = Self::new();
        for (from, targets) in map {
            let Some(targets) = targets.as_array() else {
                warn!("weak relation {} is not a list, skipping", from);
                continue;
            };
            for target in targets.iter().filter_map(Value::as_str) {
                relations.insert(from, target);
            }
        }
        Ok(relations)
    }
}

/// One API's side of a symbolic relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSide {
    /// `Object.api`
    pub api: String,
    pub param: String,
    /// Variable naming this parameter in the constraint
    pub symbol: String,
}

/// Constraint linking one parameter of each of two APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicRelation {
    pub first: RelationSide,
    pub second: RelationSide,
    pub kind: ConstraintKind,
    /// `None` when the entry declares no usable constraint
    pub constraint: Option<String>,
    /// When set, `first` must be emitted before `second`.
    pub sequence: bool,
}

fn string_field<'a>(entry: &'a Map<String, Value>, key: &str) -> CatalogResult<&'a str> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CatalogError::MalformedRelation(format!("missing string field '{}'", key)))
}

fn parse_side(entry: &Map<String, Value>, api_field: &str) -> CatalogResult<RelationSide> {
    let api = string_field(entry, api_field)?.to_string();
    let param = string_field(entry, &api)?.to_string();
    let symbol = string_field(entry, &format!("{}.{}", api, param))?.to_string();
    Ok(RelationSide { api, param, symbol })
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

impl SymbolicRelation {
    /// Parse one entry of the form
    /// `{"api1": "A.f", "api2": "B.g", "A.f": "p", "B.g": "q",
    ///   "A.f.p": "x", "B.g.q": "y", "type": "number", "constraint": "(< x y)"}`.
    pub fn from_json(entry: &Map<String, Value>) -> CatalogResult<Self> {
        let first = parse_side(entry, "api1")?;
        let second = parse_side(entry, "api2")?;
        let kind = ConstraintKind::parse(entry.get("type").and_then(Value::as_str).unwrap_or(""));
        let constraint = entry
            .get("constraint")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("none"))
            .map(str::to_string);
        Ok(Self {
            first,
            second,
            kind,
            constraint,
            sequence: truthy(entry.get("sequence")),
        })
    }

    pub fn side(&self, api_key: &str) -> Option<&RelationSide> {
        if self.first.api == api_key {
            Some(&self.first)
        } else if self.second.api == api_key {
            Some(&self.second)
        } else {
            None
        }
    }

    pub fn other_side(&self, api_key: &str) -> Option<&RelationSide> {
        if self.first.api == api_key {
            Some(&self.second)
        } else if self.second.api == api_key {
            Some(&self.first)
        } else {
            None
        }
    }

    /// Given the text of `known_api`'s parameter, solve for the other API's
    /// parameter. Returns `(parameter name, raw value text)`, or `Ok(None)`
    /// when the entry has no constraint, does not mention `known_api`, or
    /// yields several unknowns.
    pub fn solve_for_other(
        &self,
        known_api: &str,
        known_value: &str,
        budget: &SolverBudget,
    ) -> SolverResult<Option<(String, String)>> {
        let (Some(constraint), Some(known), Some(other)) =
            (self.constraint.as_deref(), self.side(known_api), self.other_side(known_api))
        else {
            return Ok(None);
        };
        let solution = symbolic::solve(constraint, self.kind, &known.symbol, known_value, budget)?;
        Ok(solution.render_single().map(|value| (other.param.clone(), value)))
    }
}

/// Symbolic relations keyed by `"A.f+B.g"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolicRelations {
    entries: BTreeMap<String, Vec<SymbolicRelation>>,
}

impl SymbolicRelations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, first: &str, second: &str, relation: SymbolicRelation) {
        self.entries
            .entry(format!("{}+{}", first, second))
            .or_default()
            .push(relation);
    }

    /// Relations declared for the pair in either order.
    pub fn lookup(&self, a: &str, b: &str) -> Option<&[SymbolicRelation]> {
        self.entries
            .get(&format!("{}+{}", a, b))
            .or_else(|| self.entries.get(&format!("{}+{}", b, a)))
            .map(Vec::as_slice)
            .filter(|relations| !relations.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse `{"A.f+B.g": [entry, ...], ...}`; malformed entries are logged
    /// and skipped.
    pub fn from_json(value: &Value) -> CatalogResult<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| CatalogError::MalformedRelation("symbolic relations must be a JSON object".to_string()))?;
        let mut relations = Self::new();
        for (pair, entries) in map {
            let Some(entries) = entries.as_array() else {
                warn!("symbolic relation {} is not a list, skipping", pair);
                continue;
            };
            let parsed: Vec<SymbolicRelation> = entries
                .iter()
                .filter_map(|entry| {
                    let result = entry
                        .as_object()
                        .ok_or_else(|| CatalogError::MalformedRelation("entry is not an object".to_string()))
                        .and_then(SymbolicRelation::from_json);
                    match result {
                        Ok(relation) => Some(relation),
                        Err(e) => {
                            warn!("skipping symbolic relation in {}: {}", pair, e);
                            None
                        }
                    }
                })
                .collect();
            if !parsed.is_empty() {
                relations.entries.insert(pair.clone(), parsed);
            }
        }
        Ok(relations)
    }
}

/// Everything the relation engine reads from the config directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationConfig {
    pub blocklist: BTreeSet<String>,
    pub limitlist: BTreeSet<String>,
    pub weak: WeakRelations,
    pub symbolic: SymbolicRelations,
}

fn read_key_list(path: &Path) -> CatalogResult<BTreeSet<String>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let text = fs::read_to_string(path).map_err(|e| CatalogError::io(path, e))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Parsed JSON of `path`; a missing or malformed file yields `None`.
fn read_json(path: &Path) -> CatalogResult<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|e| CatalogError::io(path, e))?;
    match serde_json::from_str(&text) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!("ignoring malformed relation file {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

impl RelationConfig {
    /// Load whatever relation files exist under `dir`. Relation files that
    /// do not parse are treated as empty.
    pub fn load(dir: &Path) -> CatalogResult<Self> {
        let blocklist = read_key_list(&dir.join(BLOCKLIST_FILE))?;
        let limitlist = read_key_list(&dir.join(LIMITLIST_FILE))?;
        let weak_path = dir.join(WEAK_RELATIONS_FILE);
        let weak = read_json(&weak_path)?
            .and_then(|value| {
                WeakRelations::from_json(&value)
                    .map_err(|e| warn!("ignoring {}: {}", weak_path.display(), e))
                    .ok()
            })
            .unwrap_or_default();
        let symbolic_path = dir.join(SYMBOLIC_RELATIONS_FILE);
        let symbolic = read_json(&symbolic_path)?
            .and_then(|value| {
                SymbolicRelations::from_json(&value)
                    .map_err(|e| warn!("ignoring {}: {}", symbolic_path.display(), e))
                    .ok()
            })
            .unwrap_or_default();
        info!(
            "loaded relations from {}: {} blocked, {} limited, {} weak, {} symbolic",
            dir.display(),
            blocklist.len(),
            limitlist.len(),
            weak.len(),
            symbolic.len()
        );
        Ok(Self {
            blocklist,
            limitlist,
            weak,
            symbolic,
        })
    }

    pub fn is_blocked(&self, api_key: &str) -> bool {
        self.blocklist.contains(api_key)
    }

    pub fn is_limited(&self, api_key: &str) -> bool {
        self.limitlist.contains(api_key)
    }
}
