//! Per-page field resolution for the vector pipeline.
//!
//! One left-to-right pass over a page's positioned elements resolves
//! as many fields as possible: each element is tested against every
//! still-unresolved field's matcher, the first match wins, and the
//! field drops out of further consideration. Whatever is left
//! unresolved is filled with [`SENTINEL`] so a page's output is always
//! schema-complete.

use tracing::{debug, warn};

use crate::matcher::BoundingBox;
use crate::schema::{CompiledField, CompiledSection};

/// Placeholder value for a field no element matched.
///
/// Distinct from omission: a record always carries every declared
/// field.
pub const SENTINEL: &str = "*** Missing value ***";

/// A text run with its bounding box on a page.
#[derive(Debug, Clone)]
pub struct PositionedElement {
    /// Box on the page, in document points.
    pub bbox: BoundingBox,

    /// Text sub-fragments in document order.
    pub fragments: Vec<String>,
}

impl PositionedElement {
    pub fn new(bbox: BoundingBox, fragments: Vec<String>) -> Self {
        Self { bbox, fragments }
    }

    /// Concatenate sub-fragments in order and strip surrounding
    /// whitespace.
    pub fn text(&self) -> String {
        self.fragments.concat().trim().to_string()
    }
}

/// Drop everything but digits and decimal points, preserving order.
///
/// Handles stray currency or percent symbols on fields that are known
/// to be numeric; literal text fields are left untouched by the
/// caller.
fn digits_only(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect()
}

/// Resolve one page's fields against its positioned elements.
///
/// Returns `(field name, value)` pairs in field declaration order.
/// Every field in `fields` appears exactly once; unmatched fields get
/// [`SENTINEL`].
pub fn resolve_page(
    elements: &[PositionedElement],
    fields: &[CompiledField],
) -> Vec<(String, String)> {
    let mut values: Vec<Option<String>> = vec![None; fields.len()];
    let mut unresolved = fields.len();

    for element in elements {
        if unresolved == 0 {
            break;
        }
        for (i, field) in fields.iter().enumerate() {
            if values[i].is_some() {
                continue;
            }
            if field.matcher.matches(&element.bbox) {
                let text = element.text();
                let text = if field.numeric_only {
                    digits_only(&text)
                } else {
                    text
                };
                values[i] = Some(text);
                unresolved -= 1;
            }
        }
    }

    if unresolved > 0 {
        let missing: Vec<&str> = fields
            .iter()
            .zip(&values)
            .filter(|(_, v)| v.is_none())
            .map(|(f, _)| f.name.as_str())
            .collect();
        warn!(?missing, "fields unmatched on page, filling sentinel");
    }

    fields
        .iter()
        .zip(values)
        .map(|(field, value)| (field.name.clone(), value.unwrap_or_else(|| SENTINEL.to_string())))
        .collect()
}

/// Resolve every section of a compiled schema against a multi-page
/// document.
///
/// `pages` maps 1-based page numbers to that page's elements; a page
/// the document does not provide resolves as if it were empty. The
/// result is the union across pages with `section/field` names so no
/// cross-page collision is possible.
pub fn resolve_document(
    sections: &[CompiledSection],
    pages: &std::collections::BTreeMap<u32, Vec<PositionedElement>>,
) -> Vec<(String, String)> {
    static NO_ELEMENTS: Vec<PositionedElement> = Vec::new();

    let mut record = Vec::new();
    for section in sections {
        let elements = pages.get(&section.page).unwrap_or(&NO_ELEMENTS);
        debug!(
            section = %section.name,
            page = section.page,
            elements = elements.len(),
            "resolving section"
        );
        for (name, value) in resolve_page(elements, &section.fields) {
            record.push((format!("{}/{}", section.name, name), value));
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatcherCache;
    use crate::schema::{FieldSpec, LayoutSchema, Section};
    use pretty_assertions::assert_eq;

    fn compile(fields: &[(&str, &str)]) -> Vec<CompiledField> {
        let schema = LayoutSchema {
            sections: vec![Section {
                name: "p1".to_string(),
                page: 1,
                fields: fields
                    .iter()
                    .map(|(name, spec)| FieldSpec {
                        name: name.to_string(),
                        box_spec: spec.to_string(),
                        numeric_only: false,
                    })
                    .collect(),
            }],
            priority: Vec::new(),
        };
        let mut cache = MatcherCache::new();
        schema.compile(&mut cache).unwrap().remove(0).fields
    }

    fn element(x0: f64, y0: f64, x1: f64, y1: f64, text: &str) -> PositionedElement {
        PositionedElement::new(
            BoundingBox::new(x0, y0, x1, y1),
            vec![text.to_string()],
        )
    }

    #[test]
    fn resolves_single_field() {
        let fields = compile(&[("Score", "100.000,100.000,120.000,110.000")]);
        let elements = vec![element(105.123, 103.456, 118.222, 109.876, "42")];

        let record = resolve_page(&elements, &fields);
        assert_eq!(record, vec![("Score".to_string(), "42".to_string())]);
    }

    #[test]
    fn empty_page_yields_all_sentinels() {
        let fields = compile(&[
            ("A", "100.000,100.000,120.000,110.000"),
            ("B", "200.000,100.000,220.000,110.000"),
        ]);

        let record = resolve_page(&[], &fields);
        assert_eq!(record.len(), 2);
        assert!(record.iter().all(|(_, v)| v == SENTINEL));
        let names: Vec<&str> = record.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn first_match_in_document_order_wins() {
        let fields = compile(&[("A", "100.000,100.000,120.000,110.000")]);
        let elements = vec![
            element(101.0, 101.0, 119.0, 109.0, "first"),
            element(102.0, 102.0, 118.0, 108.0, "second"),
        ];

        let record = resolve_page(&elements, &fields);
        assert_eq!(record[0].1, "first");
    }

    #[test]
    fn single_pass_resolves_many_fields() {
        let fields = compile(&[
            ("A", "100.000,100.000,120.000,110.000"),
            ("B", "300.000,100.000,320.000,110.000"),
        ]);
        let elements = vec![
            element(300.5, 100.5, 320.5, 110.5, "b-value"),
            element(100.5, 100.5, 120.5, 110.5, "a-value"),
        ];

        let record = resolve_page(&elements, &fields);
        assert_eq!(record[0], ("A".to_string(), "a-value".to_string()));
        assert_eq!(record[1], ("B".to_string(), "b-value".to_string()));
    }

    #[test]
    fn fragments_concatenated_then_stripped() {
        let e = PositionedElement::new(
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            vec![" 7".to_string(), "1.8".to_string(), "2% ".to_string()],
        );
        assert_eq!(e.text(), "71.82%");
    }

    #[test]
    fn numeric_only_drops_symbols_in_place() {
        let mut fields = compile(&[("Achievement", "100.000,100.000,120.000,110.000")]);
        fields[0].numeric_only = true;
        let elements = vec![element(100.0, 100.0, 120.0, 110.0, " $12.9% ")];

        let record = resolve_page(&elements, &fields);
        assert_eq!(record[0].1, "12.9");
    }

    #[test]
    fn document_union_namespaces_by_section() {
        let schema = LayoutSchema {
            sections: vec![
                Section {
                    name: "overview".to_string(),
                    page: 1,
                    fields: vec![FieldSpec {
                        name: "Score".to_string(),
                        box_spec: "100.000,100.000,120.000,110.000".to_string(),
                        numeric_only: false,
                    }],
                },
                Section {
                    name: "detail".to_string(),
                    page: 2,
                    fields: vec![FieldSpec {
                        name: "Score".to_string(),
                        box_spec: "100.000,100.000,120.000,110.000".to_string(),
                        numeric_only: false,
                    }],
                },
            ],
            priority: Vec::new(),
        };
        let mut cache = MatcherCache::new();
        let sections = schema.compile(&mut cache).unwrap();

        let mut pages = std::collections::BTreeMap::new();
        pages.insert(1, vec![element(100.0, 100.0, 120.0, 110.0, "p1-score")]);
        let record = resolve_document(&sections, &pages);

        assert_eq!(
            record,
            vec![
                ("overview/Score".to_string(), "p1-score".to_string()),
                ("detail/Score".to_string(), SENTINEL.to_string()),
            ]
        );
    }
}
