//! Structural validation of fetched XML serializations.
//!
//! Schemas are resolved by name through a [`SchemaRegistry`]: a JSON schema
//! definition file `{schemas_dir}/{name}.json` takes precedence over the
//! built-in `ead` and `MARC21slim` definitions. Loaded schemas are cached
//! process-wide, keyed by name.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use moka::sync::Cache;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::xml::{Document, Element};

pub const EAD_SCHEMA: &str = "ead";
pub const MARC_SCHEMA: &str = "MARC21slim";

/// Structural schema definition, as stored in `{name}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Accepted local names for the record element.
    pub roots: Vec<String>,
    /// Optional wrapper element whose children are the records
    /// (`collection` for MARCXML).
    #[serde(default)]
    pub wrapper: Option<String>,
    /// Expected namespace URI of the document root.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Slash-separated local-name paths that must exist under each record.
    #[serde(default)]
    pub required_paths: Vec<String>,
    /// Attributes required on every element with the given local name.
    #[serde(default)]
    pub required_attributes: HashMap<String, Vec<String>>,
}

impl SchemaDefinition {
    fn builtin(name: &str) -> Option<Self> {
        match name {
            EAD_SCHEMA => Some(Self {
                roots: vec!["ead".into()],
                wrapper: None,
                namespace: Some("urn:isbn:1-931666-22-9".into()),
                required_paths: vec![
                    "eadheader".into(),
                    "eadheader/eadid".into(),
                    "eadheader/filedesc/titlestmt/titleproper".into(),
                    "archdesc".into(),
                    "archdesc/did".into(),
                ],
                required_attributes: HashMap::from([("archdesc".into(), vec!["level".into()])]),
            }),
            MARC_SCHEMA => Some(Self {
                roots: vec!["record".into()],
                wrapper: Some("collection".into()),
                namespace: Some("http://www.loc.gov/MARC21/slim".into()),
                required_paths: vec!["leader".into()],
                required_attributes: HashMap::from([
                    ("controlfield".into(), vec!["tag".into()]),
                    (
                        "datafield".into(),
                        vec!["tag".into(), "ind1".into(), "ind2".into()],
                    ),
                    ("subfield".into(), vec!["code".into()]),
                ]),
            }),
            _ => None,
        }
    }

    fn check(&self, doc: &Document) -> Vec<String> {
        let mut violations = Vec::new();
        let root = &doc.root;

        if let Some(expected) = &self.namespace {
            match root.declared_namespace() {
                Some(ns) if ns == expected => {}
                Some(ns) => violations.push(format!(
                    "root namespace is '{ns}', expected '{expected}'"
                )),
                None => violations.push(format!("root has no namespace, expected '{expected}'")),
            }
        }

        let records: Vec<&Element> = match &self.wrapper {
            Some(wrapper) if root.local_name() == wrapper => {
                let records: Vec<&Element> = root
                    .elements()
                    .filter(|e| self.roots.iter().any(|r| r == e.local_name()))
                    .collect();
                if records.is_empty() {
                    violations.push(format!("<{wrapper}> contains no records"));
                }
                records
            }
            _ => {
                if !self.roots.iter().any(|r| r == root.local_name()) {
                    violations.push(format!(
                        "root element <{}> is not one of {:?}",
                        root.local_name(),
                        self.roots
                    ));
                    return violations;
                }
                vec![root]
            }
        };

        for record in records {
            for path in &self.required_paths {
                if !has_path(record, path) {
                    violations.push(format!("missing required element '{path}'"));
                }
            }
            for element in record.descendants() {
                if let Some(required) = self.required_attributes.get(element.local_name()) {
                    for attr in required {
                        if element.attribute(attr).is_none() {
                            violations.push(format!(
                                "<{}> is missing attribute '{attr}'",
                                element.local_name()
                            ));
                        }
                    }
                }
            }
        }

        violations
    }
}

fn has_path(element: &Element, path: &str) -> bool {
    let mut frontier = vec![element];
    for step in path.split('/').filter(|s| !s.is_empty()) {
        frontier = frontier
            .into_iter()
            .flat_map(|e| e.children_named(step))
            .collect();
        if frontier.is_empty() {
            return false;
        }
    }
    true
}

/// Process-wide cache of loaded schema definitions, keyed by
/// `(schemas_dir, name)`.
static SCHEMA_CACHE: LazyLock<Cache<(Option<PathBuf>, String), Arc<SchemaDefinition>>> =
    LazyLock::new(|| Cache::new(64));

/// Resolves schema names to definitions.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas_dir: Option<PathBuf>,
}

impl SchemaRegistry {
    /// Registry with only the built-in schemas.
    pub fn builtin() -> Self {
        Self { schemas_dir: None }
    }

    /// Registry that looks in `schemas_dir` before falling back to built-ins.
    pub fn with_dir(schemas_dir: impl Into<PathBuf>) -> Self {
        Self {
            schemas_dir: Some(schemas_dir.into()),
        }
    }

    pub fn load(&self, name: &str) -> Result<Arc<SchemaDefinition>, AppError> {
        let key = (self.schemas_dir.clone(), name.to_string());
        SCHEMA_CACHE
            .try_get_with(key, || self.read(name).map(Arc::new))
            .map_err(|e| AppError::SchemaError(e.as_ref().clone()))
    }

    fn read(&self, name: &str) -> Result<SchemaDefinition, String> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(format!("Invalid schema name: {name}"));
        }

        if let Some(dir) = &self.schemas_dir {
            let path = dir.join(format!("{name}.json"));
            if path.exists() {
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    format!("Failed to read schema file {}: {e}", path.display())
                })?;
                let schema: SchemaDefinition = serde_json::from_str(&raw).map_err(|e| {
                    format!("Invalid JSON in schema file {}: {e}", path.display())
                })?;
                tracing::debug!(schema = %name, path = %path.display(), "Loaded schema from disk");
                return Ok(schema);
            }
        }

        SchemaDefinition::builtin(name).ok_or_else(|| format!("Schema not found: {name}"))
    }
}

/// Outcome of a structural check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub schema: String,
    pub violations: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Validates XML serializations against named schemas.
#[derive(Debug, Clone, Default)]
pub struct RecordValidator {
    registry: SchemaRegistry,
}

impl RecordValidator {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self { registry }
    }

    /// `Ok(false)` for schema non-conformance; `Err(MalformedXml)` when the
    /// bytes are not XML at all.
    pub fn validate(&self, xml: &[u8], schema_name: &str) -> Result<bool, AppError> {
        Ok(self.check(xml, schema_name)?.is_valid())
    }

    pub fn check(&self, xml: &[u8], schema_name: &str) -> Result<ValidationReport, AppError> {
        let schema = self.registry.load(schema_name)?;
        let doc = Document::parse(xml)?;
        Ok(ValidationReport {
            schema: schema_name.to_string(),
            violations: schema.check(&doc),
        })
    }
}
