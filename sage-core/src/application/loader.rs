// sage-core/src/application/loader.rs
//
// Parses catalog/package/sender documents into the in-memory Schema.
// Structural failures are Findings with scope=file and are fatal: no
// Schema is returned. Path references resolve relative to the document
// that declares them; a reference cycle is detected with a visited set
// keyed by canonical path.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::domain::diagnostic::{Diagnostic, Finding, FindingScope};
use crate::domain::expr;
use crate::domain::schema::{
    Catalog, CatalogHandle, CatalogRef, CrossRule, Destination, Package, PackageFileFormat,
    RefSource, Schema, SenderRoster,
};
use crate::infrastructure::secrets;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Catalog,
    Package,
    Sender,
}

/// Outcome of a load: either a usable Schema, or the Findings that
/// explain why there is none. Warnings may accompany a Schema.
#[derive(Debug)]
pub struct LoadResult {
    pub schema: Option<Schema>,
    pub diagnostic: Diagnostic,
}

// =============================================================================
//  1. DOCUMENT SHAPES (raw serde forms, resolved into the Schema arena)
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct CatalogDocument {
    catalog: Catalog,
}

#[derive(Debug, Serialize, Deserialize)]
struct PackageDocument {
    package: RawPackage,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawPackage {
    name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,

    #[serde(default)]
    mandatory: bool,

    file_format: PackageFileFormat,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    catalogs: Vec<RawCatalogRef>,

    /// Legacy surface form: a mapping of file name to reference config.
    /// Normalized into by-path catalog references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    components: Option<BTreeMap<String, RawComponent>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    package_validation: Option<RawPackageValidation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    destination: Option<Destination>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawCatalogRef {
    #[serde(alias = "logical_name")]
    name: String,

    #[serde(default, alias = "file_inside_archive", skip_serializing_if = "Option::is_none")]
    file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    catalog: Option<Catalog>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_format: Option<PackageFileFormat>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawComponent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_format: Option<PackageFileFormat>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawPackageValidation {
    validation_rules: Vec<CrossRule>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SenderDocument {
    senders: SenderRoster,
}

// =============================================================================
//  2. LOADER
// =============================================================================

pub struct Loader;

impl Loader {
    /// Load a standalone catalog document.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load_catalog(path: impl AsRef<Path>) -> LoadResult {
        let mut schema = Schema::default();
        let mut diagnostic = Diagnostic::new();
        let mut stack = Vec::new();

        load_catalog_into(path.as_ref(), &mut schema, &mut diagnostic, &mut stack);
        finish(schema, diagnostic)
    }

    /// Load a package document and every catalog it references.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load_package(path: impl AsRef<Path>) -> LoadResult {
        let mut schema = Schema::default();
        let mut diagnostic = Diagnostic::new();
        let mut stack = Vec::new();

        load_package_into(path.as_ref(), &mut schema, &mut diagnostic, &mut stack);
        finish(schema, diagnostic)
    }

    /// Load a sender roster and, where grants carry a path, the package
    /// documents behind them.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load_sender(path: impl AsRef<Path>) -> LoadResult {
        let path = path.as_ref();
        let mut schema = Schema::default();
        let mut diagnostic = Diagnostic::new();
        let mut stack = Vec::new();

        let Some(document) = read_document::<SenderDocument>(path, &mut diagnostic) else {
            return finish(schema, diagnostic);
        };

        for problem in document.senders.structural_problems() {
            diagnostic.push(Finding::error(FindingScope::File, problem));
        }

        let base = parent_dir(path);
        for sender in &document.senders.senders_list {
            for grant in &sender.packages {
                if let Some(rel) = &grant.path {
                    load_package_into(&base.join(rel), &mut schema, &mut diagnostic, &mut stack);
                }
            }
        }

        schema.roster = Some(document.senders);
        info!(
            senders = schema.roster.as_ref().map(|r| r.senders_list.len()),
            "sender roster loaded"
        );
        finish(schema, diagnostic)
    }

    /// Structural validation only (the CLI's validate-yaml).
    pub fn validate_document(path: impl AsRef<Path>, kind: DocumentKind) -> Diagnostic {
        let result = match kind {
            DocumentKind::Catalog => Self::load_catalog(path),
            DocumentKind::Package => Self::load_package(path),
            DocumentKind::Sender => Self::load_sender(path),
        };
        result.diagnostic
    }

    /// Serialize a loaded package (and the catalogs it references) back
    /// to its document form. Reloading the output yields an equal
    /// Schema — the loader's round-trip contract.
    pub fn package_to_document(schema: &Schema, package: &Package) -> Result<String, serde_yaml::Error> {
        let raw = RawPackage {
            name: package.name.clone(),
            description: package.description.clone(),
            mandatory: package.mandatory,
            file_format: package.file_format.clone(),
            catalogs: package
                .catalogs
                .iter()
                .map(|catalog_ref| RawCatalogRef {
                    name: catalog_ref.logical_name.clone(),
                    file: catalog_ref.file_inside_archive.clone(),
                    path: match &catalog_ref.source {
                        RefSource::Path(p) => Some(p.clone()),
                        RefSource::Inline => None,
                    },
                    catalog: match &catalog_ref.source {
                        RefSource::Inline => Some(schema.catalog(catalog_ref.catalog).clone()),
                        RefSource::Path(_) => None,
                    },
                    file_format: catalog_ref.format_override.clone(),
                })
                .collect(),
            components: None,
            package_validation: if package.cross_rules.is_empty() {
                None
            } else {
                Some(RawPackageValidation {
                    validation_rules: package.cross_rules.clone(),
                })
            },
            destination: package.destination.clone(),
        };
        serde_yaml::to_string(&PackageDocument { package: raw })
    }
}

fn finish(schema: Schema, diagnostic: Diagnostic) -> LoadResult {
    if diagnostic.has_errors() {
        LoadResult {
            schema: None,
            diagnostic,
        }
    } else {
        LoadResult {
            schema: Some(schema),
            diagnostic,
        }
    }
}

// =============================================================================
//  3. RESOLUTION (paths, cycles, expression pre-parsing)
// =============================================================================

fn read_document<T: serde::de::DeserializeOwned>(
    path: &Path,
    diagnostic: &mut Diagnostic,
) -> Option<T> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            diagnostic.push(Finding::error(
                FindingScope::File,
                format!("cannot read '{}': {}", path.display(), e),
            ));
            return None;
        }
    };

    let resolved = match secrets::resolve_placeholders(&raw) {
        Ok(resolved) => resolved,
        Err(e) => {
            diagnostic.push(Finding::error(
                FindingScope::File,
                format!("'{}': {}", path.display(), e),
            ));
            return None;
        }
    };

    match serde_yaml::from_str::<T>(&resolved) {
        Ok(document) => Some(document),
        Err(e) => {
            diagnostic.push(Finding::error(
                FindingScope::File,
                format!("'{}': {}", path.display(), e),
            ));
            None
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn enter(
    path: &Path,
    stack: &mut Vec<PathBuf>,
    diagnostic: &mut Diagnostic,
) -> Option<PathBuf> {
    let key = canonical(path);
    if stack.contains(&key) {
        diagnostic.push(Finding::error(
            FindingScope::File,
            format!(
                "circular document reference involving '{}'",
                path.display()
            ),
        ));
        return None;
    }
    stack.push(key.clone());
    Some(key)
}

fn load_catalog_into(
    path: &Path,
    schema: &mut Schema,
    diagnostic: &mut Diagnostic,
    stack: &mut Vec<PathBuf>,
) -> Option<CatalogHandle> {
    enter(path, stack, diagnostic)?;

    let handle = (|| {
        let document = read_document::<CatalogDocument>(path, diagnostic)?;
        register_catalog(document.catalog, schema, diagnostic)
    })();

    stack.pop();
    handle
}

/// Push a catalog into the arena after structural + expression checks.
fn register_catalog(
    catalog: Catalog,
    schema: &mut Schema,
    diagnostic: &mut Diagnostic,
) -> Option<CatalogHandle> {
    let mut ok = true;
    for problem in catalog.structural_problems() {
        diagnostic.push(Finding::error(FindingScope::File, problem));
        ok = false;
    }

    // Expressions are pre-parsed so a syntax error is a load-time
    // Finding, not a surprise mid-validation.
    for field in &catalog.fields {
        for rule in &field.validation_rules {
            check_expression(&rule.validation_expression, &catalog.name, diagnostic, &mut ok);
        }
    }
    if let Some(check) = &catalog.row_validation {
        check_expression(&check.validation_expression, &catalog.name, diagnostic, &mut ok);
    }
    if let Some(check) = &catalog.catalog_validation {
        check_expression(&check.validation_expression, &catalog.name, diagnostic, &mut ok);
    }

    if !ok {
        return None;
    }

    debug!(catalog = %catalog.name, fields = catalog.fields.len(), "catalog registered");
    Some(schema.push_catalog(catalog))
}

fn check_expression(source: &str, catalog: &str, diagnostic: &mut Diagnostic, ok: &mut bool) {
    if let Err(e) = expr::parse(source) {
        diagnostic.push(Finding::error(
            FindingScope::File,
            format!("catalog '{}': invalid expression '{}': {}", catalog, source, e),
        ));
        *ok = false;
    }
}

fn load_package_into(
    path: &Path,
    schema: &mut Schema,
    diagnostic: &mut Diagnostic,
    stack: &mut Vec<PathBuf>,
) -> Option<()> {
    enter(path, stack, diagnostic)?;
    let result = build_package(path, schema, diagnostic, stack);
    stack.pop();
    result
}

fn build_package(
    path: &Path,
    schema: &mut Schema,
    diagnostic: &mut Diagnostic,
    stack: &mut Vec<PathBuf>,
) -> Option<()> {
    let document = read_document::<PackageDocument>(path, diagnostic)?;
    let raw = document.package;
    let base = parent_dir(path);

    // Normalize the legacy components mapping into by-path references.
    let mut raw_refs = raw.catalogs;
    if let Some(components) = raw.components {
        for (file_name, component) in components {
            let logical_name = file_name
                .rsplit_once('.')
                .map(|(stem, _)| stem.to_string())
                .unwrap_or_else(|| file_name.clone());
            raw_refs.push(RawCatalogRef {
                path: Some(
                    component
                        .path
                        .unwrap_or_else(|| format!("{}.yaml", logical_name)),
                ),
                name: logical_name,
                file: Some(file_name),
                catalog: None,
                file_format: component.file_format,
            });
        }
    }

    if raw_refs.is_empty() {
        diagnostic.push(Finding::error(
            FindingScope::File,
            format!("package '{}': 'catalogs' must have at least one entry", raw.name),
        ));
        return None;
    }

    let mut ok = true;
    let mut refs = Vec::with_capacity(raw_refs.len());
    let mut logical_names = Vec::with_capacity(raw_refs.len());

    for raw_ref in raw_refs {
        if logical_names.contains(&raw_ref.name) {
            diagnostic.push(Finding::error(
                FindingScope::File,
                format!(
                    "package '{}': duplicate catalog logical name '{}'",
                    raw.name, raw_ref.name
                ),
            ));
            ok = false;
            continue;
        }
        logical_names.push(raw_ref.name.clone());

        let (handle, source) = match (raw_ref.catalog, raw_ref.path) {
            (Some(inline), None) => {
                (register_catalog(inline, schema, diagnostic), RefSource::Inline)
            }
            (None, Some(rel)) => (
                load_catalog_into(&base.join(&rel), schema, diagnostic, stack),
                RefSource::Path(rel),
            ),
            (Some(_), Some(_)) => {
                diagnostic.push(Finding::error(
                    FindingScope::File,
                    format!(
                        "package '{}': catalog '{}' declares both 'path' and inline 'catalog'",
                        raw.name, raw_ref.name
                    ),
                ));
                ok = false;
                continue;
            }
            (None, None) => {
                diagnostic.push(Finding::error(
                    FindingScope::File,
                    format!(
                        "package '{}': catalog '{}' needs a 'path' or an inline 'catalog'",
                        raw.name, raw_ref.name
                    ),
                ));
                ok = false;
                continue;
            }
        };

        let Some(handle) = handle else {
            ok = false;
            continue;
        };

        refs.push(CatalogRef {
            logical_name: raw_ref.name,
            file_inside_archive: raw_ref.file,
            catalog: handle,
            source,
            format_override: raw_ref.file_format,
        });
    }

    // Cross rules may only reference logical names declared above.
    let cross_rules = raw
        .package_validation
        .map(|v| v.validation_rules)
        .unwrap_or_default();
    for rule in &cross_rules {
        match expr::parse(&rule.validation_expression) {
            Err(e) => {
                diagnostic.push(Finding::error(
                    FindingScope::File,
                    format!(
                        "package '{}': invalid expression in rule '{}': {}",
                        raw.name, rule.name, e
                    ),
                ));
                ok = false;
            }
            Ok(parsed) => {
                for table in parsed.referenced_tables() {
                    if !logical_names.contains(&table) {
                        diagnostic.push(Finding::error(
                            FindingScope::File,
                            format!(
                                "package '{}': rule '{}' references undeclared catalog '{}'",
                                raw.name, rule.name, table
                            ),
                        ));
                        ok = false;
                    }
                }
            }
        }
    }

    if !ok {
        return None;
    }

    info!(package = %raw.name, catalogs = refs.len(), "package loaded");
    schema.packages.push(Package {
        name: raw.name,
        description: raw.description,
        mandatory: raw.mandatory,
        file_format: raw.file_format,
        catalogs: refs,
        cross_rules,
        destination: raw.destination,
    });
    Some(())
}

// =============================================================================
//  4. TESTS
// =============================================================================
