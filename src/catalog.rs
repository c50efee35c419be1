//! Loading the on-disk API catalog.
//!
//! Layout, one directory per scripting object:
//!
//! ```text
//! <base>/<Object>/methods/<api>/API_INFO.json
//! <base>/<Object>/methods/<api>/<param>/*.json      grammar rule files
//! <base>/<Object>/properties/<api>/API_INFO.json
//! <base>/<Object>/properties/<api>/empty.json       no parameters
//! ```
//!
//! Problems with a single API (unreadable `API_INFO.json`, missing
//! `API_Name`, a property with several parameters) are logged and that API
//! is skipped; only an unreadable object directory is an error.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::api::{ApiConfigError, ApiDescriptor, ApiGenerator, ApiKind};
use crate::config::InstanceTable;
use crate::grammar::Grammar;
use crate::normalize::ValueNormalizer;
use crate::object::ObjectGenerator;

pub const API_INFO_FILE: &str = "API_INFO.json";
pub const METHODS_DIR: &str = "methods";
pub const PROPERTIES_DIR: &str = "properties";

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} has no API_Name")]
    MissingApiName(PathBuf),

    #[error("malformed relation: {0}")]
    MalformedRelation(String),

    #[error(transparent)]
    Api(#[from] ApiConfigError),
}

impl CatalogError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        CatalogError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn json(path: &Path, source: serde_json::Error) -> Self {
        CatalogError::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Contents of `API_INFO.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiInfo {
    #[serde(rename = "API_Name", default)]
    pub api_name: String,
    #[serde(rename = "Return_Type", default)]
    pub return_type: Option<String>,
}

fn sorted_subdirs(dir: &Path) -> CatalogResult<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| CatalogError::io(dir, e))? {
        let path = entry.map_err(|e| CatalogError::io(dir, e))?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read one API directory into a descriptor.
///
/// Each sub-directory is a parameter whose grammar is merged from its rule
/// files. A directory without sub-directories describes an API that takes no
/// parameters, whether or not it carries an `empty.json` marker.
pub fn load_api_descriptor(object_name: &str, kind: ApiKind, dir: &Path) -> CatalogResult<ApiDescriptor> {
    let info_path = dir.join(API_INFO_FILE);
    let text = fs::read_to_string(&info_path).map_err(|e| CatalogError::io(&info_path, e))?;
    let info: ApiInfo = serde_json::from_str(&text).map_err(|e| CatalogError::json(&info_path, e))?;
    if info.api_name.trim().is_empty() {
        return Err(CatalogError::MissingApiName(info_path));
    }

    let mut descriptor = ApiDescriptor::new(object_name, info.api_name.trim(), kind);
    descriptor.return_type = info.return_type.filter(|t| !t.trim().is_empty());
    for param_dir in sorted_subdirs(dir)? {
        let grammar = Grammar::from_dir(&param_dir)?;
        descriptor.params.insert(dir_name(&param_dir), grammar);
    }
    Ok(descriptor)
}

/// Load every API of one object. APIs listed in `blocklist` (as
/// `Object.api`) are kept but tagged as blocked.
pub fn load_object(
    object_name: &str,
    dir: &Path,
    blocklist: &BTreeSet<String>,
    normalizer: ValueNormalizer,
) -> CatalogResult<ObjectGenerator> {
    let mut object = ObjectGenerator::new(object_name);

    for (sub_dir, kind) in [(METHODS_DIR, ApiKind::Method), (PROPERTIES_DIR, ApiKind::Property)] {
        let kind_dir = dir.join(sub_dir);
        if !kind_dir.is_dir() {
            continue;
        }
        for api_dir in sorted_subdirs(&kind_dir)? {
            let loaded = load_api_descriptor(object_name, kind, &api_dir)
                .and_then(|descriptor| ApiGenerator::new(descriptor).map_err(CatalogError::from));
            match loaded {
                Ok(generator) => {
                    let blocked = blocklist.contains(&generator.descriptor().key());
                    object.add_api(generator.with_normalizer(normalizer), blocked);
                }
                Err(e) => warn!("skipping API at {}: {}", api_dir.display(), e),
            }
        }
    }

    debug!("loaded {} APIs for {}", object.api_list().len(), object_name);
    Ok(object)
}

/// Load the objects named in `table` from `base_dir`, seeding each with its
/// permanent receiver expressions. Objects without a directory are skipped.
pub fn load_catalog(
    base_dir: &Path,
    table: &InstanceTable,
    blocklist: &BTreeSet<String>,
    normalizer: ValueNormalizer,
) -> CatalogResult<BTreeMap<String, ObjectGenerator>> {
    let mut objects = BTreeMap::new();
    for (object_name, instances) in table.iter() {
        let dir = base_dir.join(object_name);
        if !dir.is_dir() {
            warn!("no catalog directory for object {}", object_name);
            continue;
        }
        let mut object = load_object(object_name, &dir, blocklist, normalizer)?;
        for instance in instances {
            object.add_permanent_instance(instance);
        }
        objects.insert(object_name.to_string(), object);
    }
    info!("loaded {} objects from {}", objects.len(), base_dir.display());
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        write(&app.join("methods/beep/API_INFO.json"), r#"{"API_Name": "beep"}"#);
        write(&app.join("methods/beep/empty.json"), "[]");
        write(
            &app.join("methods/alert/API_INFO.json"),
            r#"{"API_Name": "alert", "Return_Type": "Number"}"#,
        );
        write(&app.join("methods/alert/cMsg/rules.json"), r#"[["Msg", "hello"]]"#);
        write(&app.join("methods/broken/API_INFO.json"), r#"{"Return_Type": "Doc"}"#);
        write(&app.join("properties/fs/API_INFO.json"), r#"{"API_Name": "fs", "Return_Type": "fs"}"#);
        write(&app.join("properties/bad/API_INFO.json"), r#"{"API_Name": "bad"}"#);
        write(&app.join("properties/bad/a/r.json"), r#"[["A", "1"]]"#);
        write(&app.join("properties/bad/b/r.json"), r#"[["B", "2"]]"#);
        dir
    }

    #[test]
    fn test_load_descriptor() {
        let dir = fixture();
        let descriptor =
            load_api_descriptor("app", ApiKind::Method, &dir.path().join("app/methods/alert")).unwrap();
        assert_eq!(descriptor.api_name, "alert");
        assert_eq!(descriptor.return_type.as_deref(), Some("Number"));
        assert!(descriptor.params["cMsg"].contains("Msg"));

        let err = load_api_descriptor("app", ApiKind::Method, &dir.path().join("app/methods/broken")).unwrap_err();
        assert!(matches!(err, CatalogError::MissingApiName(_)));
    }

    #[test]
    fn test_load_object_skips_bad_apis() {
        let dir = fixture();
        let blocklist: BTreeSet<String> = ["app.fs".to_string()].into_iter().collect();
        let object = load_object("app", &dir.path().join("app"), &blocklist, ValueNormalizer::default()).unwrap();
        assert_eq!(object.api_list(), &["alert", "beep", "fs"]);
        assert!(object.api("fs").unwrap().blocked);
        assert!(object.api("bad").is_none());
        assert_eq!(object.apis_with_no_parameters(), vec!["beep".to_string()]);
    }

    #[test]
    fn test_load_catalog_seeds_permanent_instances() {
        let dir = fixture();
        let table = InstanceTable::from_pairs([("app", &["this.app", "app"][..]), ("util", &["this.util"][..])]);
        let objects = load_catalog(dir.path(), &table, &BTreeSet::new(), ValueNormalizer::default()).unwrap();
        assert_eq!(objects.len(), 1);
        let app = &objects["app"];
        assert_eq!(app.pool().count("this.app"), 5);
        assert_eq!(app.pool().count("app"), 5);
    }
}
