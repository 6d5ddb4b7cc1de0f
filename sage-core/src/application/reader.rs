// sage-core/src/application/reader.rs
//
// Decodes a submission blob into one in-memory Table per catalog
// logical name. Decode failures and filename-pattern mismatches are
// ERROR Findings with scope=file, fatal for the catalog they concern;
// unknown columns are preserved and flagged as INFO.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use calamine::Reader as CalamineReader;
use quick_xml::events::Event;
use tracing::debug;

use crate::domain::diagnostic::{Diagnostic, Finding, FindingScope, Severity};
use crate::domain::schema::{ArchiveFormat, Catalog, CatalogRef, Package, Schema};
use crate::domain::submission::Submission;
use crate::domain::table::Table;
use crate::infrastructure::error::InfrastructureError;

#[derive(Debug, Default)]
pub struct ReaderOutput {
    pub tables: BTreeMap<String, Table>,
    pub diagnostic: Diagnostic,
}

pub struct FileReader;

impl FileReader {
    /// Decode the blob according to the package's declared file format.
    pub fn read_package(
        schema: &Schema,
        package: &Package,
        blob: &[u8],
        submission: &Submission,
    ) -> ReaderOutput {
        let mut out = ReaderOutput::default();

        // Archive-level filename contract
        if let (Some(pattern), Some(filename)) = (
            package.file_format.filename_pattern.as_deref(),
            submission.filename.as_deref(),
        ) {
            if !filename_matches(pattern, filename, &submission.sender_id) {
                out.diagnostic.push(Finding::error(
                    FindingScope::File,
                    format!(
                        "filename '{}' does not match declared pattern '{}'",
                        filename, pattern
                    ),
                ));
                return out;
            }
        }

        match package.file_format.format {
            ArchiveFormat::Zip => read_zip(schema, package, blob, submission, &mut out),
            inner => read_single_file(schema, package, blob, inner, &mut out),
        }

        out
    }
}

// =============================================================================
//  ARCHIVE HANDLING
// =============================================================================

fn read_zip(
    schema: &Schema,
    package: &Package,
    blob: &[u8],
    submission: &Submission,
    out: &mut ReaderOutput,
) {
    let mut archive = match zip::ZipArchive::new(Cursor::new(blob)) {
        Ok(archive) => archive,
        Err(e) => {
            out.diagnostic.push(Finding::error(
                FindingScope::File,
                format!("cannot open ZIP archive: {}", e),
            ));
            return;
        }
    };

    let mut matched: Vec<(String, Vec<u8>)> = Vec::new();

    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                out.diagnostic.push(Finding::error(
                    FindingScope::File,
                    format!("cannot read ZIP entry #{}: {}", index, e),
                ));
                continue;
            }
        };

        if entry.is_dir() {
            continue;
        }
        let entry_name = entry.name().to_string();

        // Reject path traversal before anything touches the name.
        if entry.enclosed_name().is_none() {
            out.diagnostic.push(Finding::error(
                FindingScope::File,
                format!("unsafe archive entry path '{}'", entry_name),
            ));
            continue;
        }

        let base_name = entry_name
            .rsplit('/')
            .next()
            .unwrap_or(entry_name.as_str())
            .to_string();

        let Some(catalog_ref) = match_entry(schema, package, &base_name, &submission.sender_id)
        else {
            out.diagnostic.push(Finding::error(
                FindingScope::File,
                format!(
                    "archive entry '{}' matches no declared file of package '{}'",
                    entry_name, package.name
                ),
            ));
            continue;
        };

        let mut contents = Vec::with_capacity(entry.size() as usize);
        if let Err(e) = entry.read_to_end(&mut contents) {
            out.diagnostic.push(Finding::error(
                FindingScope::File,
                format!("cannot extract '{}': {}", entry_name, e),
            ));
            continue;
        }
        matched.push((catalog_ref.logical_name.clone(), contents));
    }

    debug!(entries = matched.len(), "archive entries matched");

    for (logical_name, contents) in matched {
        // Find the ref again to own the borrow locally
        if let Some(catalog_ref) = package.catalog_ref(&logical_name) {
            let format = inner_format(catalog_ref);
            decode_into(schema, catalog_ref, &contents, format, out);
        }
    }

    // Declared files with no matching entry are missing input.
    for catalog_ref in &package.catalogs {
        if !out.tables.contains_key(&catalog_ref.logical_name)
            && !out
                .diagnostic
                .has_errors_in_catalog(&catalog_ref.logical_name)
        {
            out.diagnostic.push(
                Finding::error(
                    FindingScope::File,
                    format!(
                        "archive is missing the file for catalog '{}'",
                        catalog_ref.logical_name
                    ),
                )
                .in_catalog(catalog_ref.logical_name.clone()),
            );
        }
    }
}

/// Match one archive entry against the declared files: exact
/// file_inside_archive first, then the catalog's filename pattern.
fn match_entry<'a>(
    schema: &Schema,
    package: &'a Package,
    base_name: &str,
    sender_id: &str,
) -> Option<&'a CatalogRef> {
    if let Some(by_file) = package
        .catalogs
        .iter()
        .find(|r| r.file_inside_archive.as_deref() == Some(base_name))
    {
        return Some(by_file);
    }

    package.catalogs.iter().find(|r| {
        schema
            .catalog(r.catalog)
            .file_format
            .as_ref()
            .and_then(|f| f.filename_pattern.as_deref())
            .is_some_and(|pattern| filename_matches(pattern, base_name, sender_id))
    })
}

fn read_single_file(
    schema: &Schema,
    package: &Package,
    blob: &[u8],
    format: ArchiveFormat,
    out: &mut ReaderOutput,
) {
    let mut refs = package.catalogs.iter();
    let Some(first) = refs.next() else { return };

    decode_into(schema, first, blob, format, out);

    // A non-archive package carries exactly one file.
    for orphan in refs {
        out.diagnostic.push(
            Finding::error(
                FindingScope::File,
                format!(
                    "package format {} carries a single file; no input for catalog '{}'",
                    package.file_format.format, orphan.logical_name
                ),
            )
            .in_catalog(orphan.logical_name.clone()),
        );
    }
}

fn inner_format(catalog_ref: &CatalogRef) -> ArchiveFormat {
    if let Some(override_format) = &catalog_ref.format_override {
        return override_format.format;
    }
    match catalog_ref
        .file_inside_archive
        .as_deref()
        .and_then(|f| f.rsplit('.').next())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("xlsx") | Some("xls") | Some("xlsm") => ArchiveFormat::Xlsx,
        Some("json") => ArchiveFormat::Json,
        Some("xml") => ArchiveFormat::Xml,
        _ => ArchiveFormat::Csv,
    }
}

// =============================================================================
//  FORMAT DECODERS
// =============================================================================

fn decode_into(
    schema: &Schema,
    catalog_ref: &CatalogRef,
    blob: &[u8],
    format: ArchiveFormat,
    out: &mut ReaderOutput,
) {
    let catalog = schema.catalog(catalog_ref.catalog);
    let logical_name = &catalog_ref.logical_name;

    let decoded = match format {
        ArchiveFormat::Csv => decode_csv(catalog, catalog_ref, blob),
        ArchiveFormat::Xlsx => decode_spreadsheet(blob),
        ArchiveFormat::Json => decode_json(catalog, blob),
        ArchiveFormat::Xml => decode_xml(catalog, blob),
        ArchiveFormat::Zip => Err(InfrastructureError::ConfigError(
            "nested ZIP archives are not supported".into(),
        )),
    };

    let (headers, records) = match decoded {
        Ok(decoded) => decoded,
        Err(e) => {
            out.diagnostic.push(
                Finding::error(FindingScope::File, format!("'{}': {}", logical_name, e))
                    .in_catalog(logical_name.clone()),
            );
            return;
        }
    };

    let table = match Table::from_records(headers, records) {
        Ok(table) => table,
        Err(e) => {
            // Duplicate column header in the input
            out.diagnostic.push(
                Finding::error(FindingScope::Catalog, e.to_string())
                    .in_catalog(logical_name.clone()),
            );
            return;
        }
    };

    // Unknown columns are preserved but flagged.
    let declared: Vec<&str> = catalog.fields.iter().map(|f| f.name.as_str()).collect();
    let unknown: Vec<&str> = table
        .column_names()
        .iter()
        .map(String::as_str)
        .filter(|c| !declared.contains(c))
        .collect();
    if !unknown.is_empty() {
        out.diagnostic.push(
            Finding::new(
                Severity::Info,
                FindingScope::Catalog,
                format!("columns not declared in the catalog: {}", unknown.join(", ")),
            )
            .in_catalog(logical_name.clone()),
        );
    }

    debug!(catalog = %logical_name, rows = table.nrows(), "table decoded");
    out.tables.insert(logical_name.clone(), table);
}

type Decoded = (Vec<String>, Vec<Vec<String>>);

fn decode_csv(
    catalog: &Catalog,
    catalog_ref: &CatalogRef,
    blob: &[u8],
) -> Result<Decoded, InfrastructureError> {
    let file_format = catalog.file_format.as_ref();
    let override_format = catalog_ref.format_override.as_ref();

    let encoding = override_format
        .and_then(|f| f.encoding.as_deref())
        .or_else(|| file_format.and_then(|f| f.encoding.as_deref()))
        .unwrap_or("utf-8");
    let separator = override_format
        .and_then(|f| f.separator.as_deref())
        .or_else(|| file_format.and_then(|f| f.separator.as_deref()))
        .unwrap_or(",")
        .bytes()
        .next()
        .unwrap_or(b',');

    let text = decode_text(blob, encoding)?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .flexible(true)
        .has_headers(false)
        .from_reader(text.as_bytes());

    let mut rows = reader.records();
    let headers: Vec<String> = match rows.next() {
        Some(record) => record?.iter().map(|h| h.trim().to_string()).collect(),
        None => {
            return Err(InfrastructureError::ConfigError(
                "CSV input has no header row".into(),
            ))
        }
    };

    let mut records = Vec::new();
    for record in rows {
        let record = record?;
        records.push(record.iter().map(|c| c.to_string()).collect());
    }

    Ok((headers, records))
}

fn decode_text(blob: &[u8], encoding: &str) -> Result<String, InfrastructureError> {
    let label = encoding.trim();
    let codec = encoding_rs::Encoding::for_label(label.as_bytes()).ok_or_else(|| {
        InfrastructureError::ConfigError(format!("unknown encoding '{}'", label))
    })?;
    let (text, _, had_errors) = codec.decode(blob);
    if had_errors {
        return Err(InfrastructureError::ConfigError(format!(
            "input is not valid {}",
            codec.name()
        )));
    }
    Ok(text.into_owned())
}

/// XLSX/XLS: first worksheet, headers on the first row.
fn decode_spreadsheet(blob: &[u8]) -> Result<Decoded, InfrastructureError> {
    let cursor = Cursor::new(blob.to_vec());
    let mut workbook = calamine::open_workbook_auto_from_rs(cursor)?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| InfrastructureError::ConfigError("workbook has no sheets".into()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| InfrastructureError::ConfigError(format!("cannot read sheet: {}", e)))?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| InfrastructureError::ConfigError("worksheet is empty".into()))?
        .iter()
        .map(cell_to_string)
        .collect();

    let mut records = Vec::new();
    for row in rows {
        let values: Vec<String> = row.iter().map(cell_to_string).collect();
        if values.iter().all(String::is_empty) {
            continue;
        }
        records.push(values);
    }

    Ok((headers, records))
}

fn cell_to_string(cell: &calamine::Data) -> String {
    use calamine::Data;
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            // Avoid trailing ".0" for whole numbers
            if *f == (*f as i64) as f64 && f.abs() < i64::MAX as f64 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| dt.as_f64().to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR:{:?}", e),
    }
}

/// JSON: an array of objects, or an object with a `records` array.
fn decode_json(catalog: &Catalog, blob: &[u8]) -> Result<Decoded, InfrastructureError> {
    let value: serde_json::Value = serde_json::from_slice(blob)?;

    let records = match &value {
        serde_json::Value::Array(items) => items.as_slice(),
        serde_json::Value::Object(map) => map
            .get("records")
            .and_then(|r| r.as_array())
            .map(|a| a.as_slice())
            .ok_or_else(|| {
                InfrastructureError::ConfigError(
                    "JSON object input requires a 'records' array".into(),
                )
            })?,
        _ => {
            return Err(InfrastructureError::ConfigError(
                "JSON input must be an array of objects or {records: [...]}".into(),
            ))
        }
    };

    let mut rows: Vec<BTreeMap<String, String>> = Vec::with_capacity(records.len());
    for record in records {
        let object = record.as_object().ok_or_else(|| {
            InfrastructureError::ConfigError("JSON records must be objects".into())
        })?;
        let mut row = BTreeMap::new();
        for (key, cell) in object {
            row.insert(key.clone(), json_cell_to_string(cell));
        }
        rows.push(row);
    }

    Ok(tabulate(catalog, rows))
}

fn json_cell_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// XML: a root element whose immediate children are record elements
/// whose sub-elements are fields.
fn decode_xml(catalog: &Catalog, blob: &[u8]) -> Result<Decoded, InfrastructureError> {
    let text = decode_text(blob, "utf-8")?;
    let mut reader = quick_xml::Reader::from_str(&text);
    reader.config_mut().trim_text(true);

    let mut rows: Vec<BTreeMap<String, String>> = Vec::new();
    let mut current: Option<BTreeMap<String, String>> = None;
    let mut field: Option<String> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                depth += 1;
                let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
                match depth {
                    1 => {} // root
                    2 => current = Some(BTreeMap::new()),
                    3 => field = Some(name),
                    _ => {
                        return Err(InfrastructureError::ConfigError(
                            "XML input nests deeper than root/record/field".into(),
                        ))
                    }
                }
            }
            Event::Text(text) => {
                if let (Some(row), Some(name)) = (current.as_mut(), field.as_ref()) {
                    let value = text.unescape()?.trim().to_string();
                    row.insert(name.clone(), value);
                }
            }
            Event::End(_) => {
                match depth {
                    3 => field = None,
                    2 => {
                        if let Some(row) = current.take() {
                            rows.push(row);
                        }
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Empty(empty) => {
                if depth == 2 {
                    let name = String::from_utf8_lossy(empty.name().as_ref()).to_string();
                    if let Some(row) = current.as_mut() {
                        row.insert(name, String::new());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(tabulate(catalog, rows))
}

/// Key-value records to an ordered table: declared fields first in
/// declaration order, then any extra keys alphabetically.
fn tabulate(catalog: &Catalog, rows: Vec<BTreeMap<String, String>>) -> Decoded {
    let mut headers: Vec<String> = catalog
        .fields
        .iter()
        .map(|f| f.name.clone())
        .filter(|name| rows.iter().any(|row| row.contains_key(name)))
        .collect();

    let mut extras: Vec<String> = rows
        .iter()
        .flat_map(|row| row.keys().cloned())
        .filter(|key| !headers.contains(key))
        .collect();
    extras.sort();
    extras.dedup();
    headers.extend(extras);

    let records = rows
        .into_iter()
        .map(|mut row| {
            headers
                .iter()
                .map(|h| row.remove(h).unwrap_or_default())
                .collect()
        })
        .collect();

    (headers, records)
}

// =============================================================================
//  FILENAME PATTERNS
// =============================================================================

/// `{sender_id}` substitutes literally; `{date}` recognizes YYYYMMDD
/// (8 digits). Everything else matches verbatim; the whole name must
/// match.
pub fn filename_matches(pattern: &str, filename: &str, sender_id: &str) -> bool {
    let mut regex_source = String::from("^");
    let mut rest = pattern;

    while let Some(open) = rest.find('{') {
        regex_source.push_str(&regex::escape(&rest[..open]));
        let Some(close) = rest[open..].find('}') else {
            regex_source.push_str(&regex::escape(&rest[open..]));
            rest = "";
            break;
        };
        match &rest[open + 1..open + close] {
            "sender_id" => regex_source.push_str(&regex::escape(sender_id)),
            "date" => regex_source.push_str(r"\d{8}"),
            other => regex_source.push_str(&regex::escape(&format!("{{{}}}", other))),
        }
        rest = &rest[open + close + 1..];
    }
    regex_source.push_str(&regex::escape(rest));
    regex_source.push('$');

    regex::Regex::new(&regex_source)
        .map(|re| re.is_match(filename))
        .unwrap_or(false)
}

/// Recover the `{date}` placeholder value (YYYYMMDD) from a filename.
/// The sender id is not needed: `{sender_id}` matches loosely here.
pub fn extract_date(pattern: &str, filename: &str) -> Option<chrono::NaiveDate> {
    let mut regex_source = String::from("^");
    let mut rest = pattern;

    while let Some(open) = rest.find('{') {
        regex_source.push_str(&regex::escape(&rest[..open]));
        let Some(close) = rest[open..].find('}') else {
            regex_source.push_str(&regex::escape(&rest[open..]));
            rest = "";
            break;
        };
        match &rest[open + 1..open + close] {
            "sender_id" => regex_source.push_str(".+?"),
            "date" => regex_source.push_str(r"(?P<date>\d{8})"),
            other => regex_source.push_str(&regex::escape(&format!("{{{}}}", other))),
        }
        rest = &rest[open + close + 1..];
    }
    regex_source.push_str(&regex::escape(rest));
    regex_source.push('$');

    let captures = regex::Regex::new(&regex_source).ok()?.captures(filename)?;
    let raw = captures.name("date")?.as_str();
    chrono::NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
}
