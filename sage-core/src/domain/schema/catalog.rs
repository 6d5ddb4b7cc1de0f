// sage-core/src/domain/schema/catalog.rs

use serde::{Deserialize, Serialize};

use crate::domain::diagnostic::Severity;

// =============================================================================
//  1. DATA CONTRACT (the shape of one tabular dataset)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub fields: Vec<FieldSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_validation: Option<RuleCheck>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_validation: Option<RuleCheck>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_format: Option<CatalogFileFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Enum,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Text => write!(f, "text"),
            FieldType::Number => write!(f, "number"),
            FieldType::Date => write!(f, "date"),
            FieldType::Enum => write!(f, "enum"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Max character count for text; max total digits for number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,

    /// Max fractional digits for number (0 when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub unique: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,

    /// Custom rules; all attached rules apply, in declaration order.
    #[serde(
        default,
        alias = "rules",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub validation_rules: Vec<FieldRule>,
}

impl FieldSpec {
    pub fn decimals_or_zero(&self) -> u32 {
        self.decimals.unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub validation_expression: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub severity: Severity,
}

/// Shared shape of `row_validation` and `catalog_validation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCheck {
    pub validation_expression: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub severity: Severity,
}

/// Per-catalog file decoding hints. Encoding and separator default at
/// the point of use (utf-8 / comma) so absent keys round-trip as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogFileFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename_pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
}

// =============================================================================
//  2. STRUCTURAL VALIDATION (document contract, §4.1)
// =============================================================================

impl Catalog {
    /// Structural problems the serde layer cannot express. Each entry
    /// becomes a fatal Finding with scope=file in the Loader.
    pub fn structural_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.fields.is_empty() {
            problems.push(format!("catalog '{}': 'fields' must be non-empty", self.name));
        }

        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                problems.push(format!(
                    "catalog '{}': duplicate field name '{}'",
                    self.name, field.name
                ));
            }

            if field.field_type == FieldType::Enum
                && field
                    .allowed_values
                    .as_ref()
                    .map(|v| v.is_empty())
                    .unwrap_or(true)
            {
                problems.push(format!(
                    "catalog '{}': enum field '{}' requires non-empty 'allowed_values'",
                    self.name, field.name
                ));
            }

            if let Some(length) = field.length {
                if length < 1 {
                    problems.push(format!(
                        "catalog '{}': field '{}' has 'length' < 1",
                        self.name, field.name
                    ));
                }
            }

            if field.decimals.is_some() && field.field_type != FieldType::Number {
                problems.push(format!(
                    "catalog '{}': field '{}' declares 'decimals' but is not a number",
                    self.name, field.name
                ));
            }
        }

        problems
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PRODUCTOS_YAML: &str = r#"
name: productos
description: Maestro de productos
fields:
  - name: codigo_producto
    type: text
    length: 20
    required: true
    unique: true
  - name: precio_lista
    type: number
    decimals: 2
    validation_rules:
      - name: precio_positivo
        validation_expression: "df['precio_lista'] > 0"
        message: El precio debe ser positivo
        severity: ERROR
  - name: estado
    type: enum
    allowed_values: [Activo, Descontinuado, Proximamente]
"#;

    #[test]
    fn test_deserialize_catalog() {
        let catalog: Catalog = serde_yaml::from_str(PRODUCTOS_YAML).unwrap();
        assert_eq!(catalog.fields.len(), 3);
        assert_eq!(catalog.fields[0].field_type, FieldType::Text);
        assert!(catalog.fields[0].unique);
        assert_eq!(catalog.fields[1].validation_rules.len(), 1);
        assert_eq!(
            catalog.fields[1].validation_rules[0].severity,
            Severity::Error
        );
        assert!(catalog.structural_problems().is_empty());
    }

    #[test]
    fn test_roundtrip_is_stable() {
        let catalog: Catalog = serde_yaml::from_str(PRODUCTOS_YAML).unwrap();
        let serialized = serde_yaml::to_string(&catalog).unwrap();
        let reloaded: Catalog = serde_yaml::from_str(&serialized).unwrap();
        assert_eq!(catalog, reloaded);
    }

    #[test]
    fn test_enum_without_allowed_values_is_structural_problem() {
        let yaml = r#"
name: broken
fields:
  - name: estado
    type: enum
"#;
        let catalog: Catalog = serde_yaml::from_str(yaml).unwrap();
        let problems = catalog.structural_problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("allowed_values"));
    }

    #[test]
    fn test_duplicate_field_names_rejected() {
        let yaml = r#"
name: broken
fields:
  - name: codigo
    type: text
  - name: codigo
    type: text
"#;
        let catalog: Catalog = serde_yaml::from_str(yaml).unwrap();
        assert!(catalog
            .structural_problems()
            .iter()
            .any(|p| p.contains("duplicate field name")));
    }
}
