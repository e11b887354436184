//! Layout schema structures and validation.
//!
//! A layout schema names every field a document type carries, the
//! nominal bounding box (or crop region) where each field lives, and
//! which rendered page each section sits on. It is supplied externally
//! and loaded once per run; everything that can go wrong with it goes
//! wrong before any document is touched.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SchemaError;
use crate::formula::normalize_name;
use crate::matcher::{BoxMatcher, MatcherCache};
use crate::region::parse_region_spec;

/// One named field at a nominal location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name, unique within its section.
    pub name: String,

    /// Location spec. Vector pipeline: four `<int>.<3 digits>[:<int>]`
    /// tokens. Image pipeline: `x,y w,h`.
    #[serde(rename = "box")]
    pub box_spec: String,

    /// Drop every non-digit, non-decimal-point character from the
    /// extracted text.
    #[serde(default)]
    pub numeric_only: bool,
}

/// An ordered group of fields living on one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    /// Section name, used to namespace field names across pages.
    pub name: String,

    /// 1-based page number this section's fields appear on.
    pub page: u32,

    /// Fields in declaration order.
    pub fields: Vec<FieldSpec>,
}

/// A full layout schema: ordered sections plus column priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutSchema {
    /// Sections in declaration order.
    pub sections: Vec<Section>,

    /// Explicit column-priority ordering for output assembly. Fields
    /// absent from this list sort after it, in source order. Empty
    /// means "use field declaration order".
    #[serde(default)]
    pub priority: Vec<String>,
}

/// A field with its compiled matcher, ready for page resolution.
#[derive(Debug, Clone)]
pub struct CompiledField {
    pub name: String,
    pub matcher: Arc<BoxMatcher>,
    pub numeric_only: bool,
}

/// A section whose field specs have all been compiled.
#[derive(Debug, Clone)]
pub struct CompiledSection {
    pub name: String,
    pub page: u32,
    pub fields: Vec<CompiledField>,
}

impl LayoutSchema {
    /// Load a schema from a JSON file and validate it.
    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SchemaError::Load(format!("{}: {e}", path.display())))?;
        let schema: LayoutSchema = serde_json::from_str(&content)
            .map_err(|e| SchemaError::Load(format!("{}: {e}", path.display())))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Check cross-field invariants that must hold before processing.
    ///
    /// Section names must be unique, and no two `section/field` names
    /// across the whole schema may normalize to the same derived-value
    /// identifier: the vector pipeline builds one formula environment
    /// per document over the namespaced names, and a silent overwrite
    /// there is never acceptable. Since the section prefix is shared,
    /// this also catches two fields of one section colliding on their
    /// bare names.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut section_names: Vec<&str> = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            if section_names.contains(&section.name.as_str()) {
                return Err(SchemaError::DuplicateSection(section.name.clone()));
            }
            section_names.push(&section.name);
        }

        let mut seen: Vec<(String, String)> = Vec::new();
        for section in &self.sections {
            for field in &section.fields {
                let qualified = format!("{}/{}", section.name, field.name);
                let normalized = normalize_name(&qualified);
                if let Some((_, first)) = seen.iter().find(|(n, _)| *n == normalized) {
                    return Err(SchemaError::NameCollision {
                        first: first.clone(),
                        second: qualified,
                        normalized,
                    });
                }
                seen.push((normalized, qualified));
            }
        }
        Ok(())
    }

    /// Compile every vector bounding-box spec, reusing `cache` across
    /// identical spec strings.
    ///
    /// Fails on the first malformed spec; a vacuous matcher is never
    /// produced.
    pub fn compile(&self, cache: &mut MatcherCache) -> Result<Vec<CompiledSection>, SchemaError> {
        let mut compiled = Vec::with_capacity(self.sections.len());
        for section in &self.sections {
            let mut fields = Vec::with_capacity(section.fields.len());
            for field in &section.fields {
                let matcher = cache.get_or_compile(&field.box_spec)?;
                fields.push(CompiledField {
                    name: field.name.clone(),
                    matcher,
                    numeric_only: field.numeric_only,
                });
            }
            compiled.push(CompiledSection {
                name: section.name.clone(),
                page: section.page,
                fields,
            });
        }
        debug!(
            sections = compiled.len(),
            matchers = cache.len(),
            "compiled layout schema"
        );
        Ok(compiled)
    }

    /// Check every region spec parses as `x,y w,h` (image pipeline).
    pub fn validate_regions(&self) -> Result<(), SchemaError> {
        for section in &self.sections {
            for field in &section.fields {
                parse_region_spec(&field.box_spec)?;
            }
        }
        Ok(())
    }

    /// Column priority for output assembly: the explicit list if one
    /// was given, otherwise `section`'s field declaration order.
    pub fn section_priority(&self, section: &str) -> Vec<String> {
        if !self.priority.is_empty() {
            return self.priority.clone();
        }
        self.sections
            .iter()
            .find(|s| s.name == section)
            .map(|s| s.fields.iter().map(|f| f.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Priority across the whole schema with `section/field` names,
    /// for single-table (vector pipeline) assembly.
    pub fn document_priority(&self) -> Vec<String> {
        if !self.priority.is_empty() {
            return self.priority.clone();
        }
        self.sections
            .iter()
            .flat_map(|s| {
                s.fields
                    .iter()
                    .map(move |f| format!("{}/{}", s.name, f.name))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, box_spec: &str) -> FieldSpec {
        FieldSpec {
            name: name.to_string(),
            box_spec: box_spec.to_string(),
            numeric_only: false,
        }
    }

    fn schema(fields: Vec<FieldSpec>) -> LayoutSchema {
        LayoutSchema {
            sections: vec![Section {
                name: "p1".to_string(),
                page: 1,
                fields,
            }],
            priority: Vec::new(),
        }
    }

    #[test]
    fn validate_accepts_distinct_names() {
        let s = schema(vec![
            field("Total Score", "663.000:20,313.440,699.454,323.989"),
            field("Focus Goal", "639.960,355.565,714.096,365.150"),
        ]);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn validate_rejects_normalized_collision() {
        // Both collapse to "total_score".
        let s = schema(vec![
            field("Total Score", "1.000,1.000,1.000,1.000"),
            field("Total/Score", "2.000,2.000,2.000,2.000"),
        ]);
        let err = s.validate().unwrap_err();
        assert!(matches!(err, SchemaError::NameCollision { .. }));
    }

    #[test]
    fn validate_rejects_cross_section_collision() {
        // Both qualified names collapse to "other_factors_count".
        let s = LayoutSchema {
            sections: vec![
                Section {
                    name: "Other Factors".to_string(),
                    page: 1,
                    fields: vec![field("Count", "1.000,1.000,1.000,1.000")],
                },
                Section {
                    name: "Other-Factors".to_string(),
                    page: 2,
                    fields: vec![field("Count", "2.000,2.000,2.000,2.000")],
                },
            ],
            priority: Vec::new(),
        };
        let err = s.validate().unwrap_err();
        assert!(matches!(
            err,
            SchemaError::NameCollision { ref normalized, .. } if normalized == "other_factors_count"
        ));
    }

    #[test]
    fn validate_rejects_duplicate_section_names() {
        let s = LayoutSchema {
            sections: vec![
                Section {
                    name: "overview".to_string(),
                    page: 1,
                    fields: vec![field("A", "1.000,1.000,1.000,1.000")],
                },
                Section {
                    name: "overview".to_string(),
                    page: 2,
                    fields: vec![field("B", "2.000,2.000,2.000,2.000")],
                },
            ],
            priority: Vec::new(),
        };
        assert!(matches!(
            s.validate().unwrap_err(),
            SchemaError::DuplicateSection(name) if name == "overview"
        ));
    }

    #[test]
    fn compile_shares_matchers_for_identical_specs() {
        let s = schema(vec![
            field("A", "100.000,100.000,120.000,110.000"),
            field("B", "100.000,100.000,120.000,110.000"),
            field("C", "200.000,100.000,220.000,110.000"),
        ]);
        let mut cache = MatcherCache::new();
        let compiled = s.compile(&mut cache).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(Arc::ptr_eq(
            &compiled[0].fields[0].matcher,
            &compiled[0].fields[1].matcher
        ));
    }

    #[test]
    fn compile_fails_on_malformed_spec() {
        let s = schema(vec![field("A", "not a box")]);
        let mut cache = MatcherCache::new();
        assert!(s.compile(&mut cache).is_err());
    }

    #[test]
    fn section_priority_defaults_to_declaration_order() {
        let s = schema(vec![
            field("Z", "1.000,1.000,1.000,1.000"),
            field("A", "2.000,2.000,2.000,2.000"),
        ]);
        assert_eq!(s.section_priority("p1"), vec!["Z", "A"]);
        assert!(s.section_priority("missing").is_empty());
    }

    #[test]
    fn explicit_priority_wins() {
        let mut s = schema(vec![
            field("x", "1.000,1.000,1.000,1.000"),
            field("y", "2.000,2.000,2.000,2.000"),
        ]);
        s.priority = vec!["y".to_string(), "x".to_string()];
        assert_eq!(s.section_priority("p1"), vec!["y", "x"]);
        assert_eq!(s.document_priority(), vec!["y", "x"]);
    }

    #[test]
    fn roundtrips_through_json() {
        let s = schema(vec![field("Total Score", "663.000:20,313.440,699.454,323.989")]);
        let json = serde_json::to_string(&s).unwrap();
        let back: LayoutSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sections[0].fields[0].box_spec, s.sections[0].fields[0].box_spec);
        assert!(!back.sections[0].fields[0].numeric_only);
    }
}
