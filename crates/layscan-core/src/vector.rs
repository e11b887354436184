//! Positioned-text document loading.
//!
//! The vector pipeline's input is a pdfminer-style XML tree: pages
//! containing textboxes, each textbox carrying a `bbox` attribute and
//! a sequence of character `<text>` runs. Only `<text>` elements that
//! themselves carry a `bbox` attribute contribute characters; bare
//! ones hold layout whitespace like trailing newlines.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use crate::error::{LayscanError, Result};
use crate::matcher::BoundingBox;
use crate::resolver::PositionedElement;

/// A positioned-text document: pages of elements, keyed by the
/// 1-based page number.
#[derive(Debug, Clone, Default)]
pub struct VectorDocument {
    pub pages: BTreeMap<u32, Vec<PositionedElement>>,
}

impl VectorDocument {
    /// Parse a positioned-text XML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let reader = Reader::from_file(path)
            .map_err(|e| LayscanError::Document(format!("{}: {e}", path.display())))?;
        let doc = Self::from_reader(reader)?;
        debug!(
            path = %path.display(),
            pages = doc.pages.len(),
            "loaded positioned-text document"
        );
        Ok(doc)
    }

    /// Parse positioned-text XML from a string.
    pub fn from_xml(xml: &str) -> Result<Self> {
        Self::from_reader(Reader::from_reader(xml.as_bytes()))
    }

    fn from_reader<R: BufRead>(mut reader: Reader<R>) -> Result<Self> {
        let mut doc = VectorDocument::default();
        let mut buf = Vec::new();

        let mut current_page: Option<u32> = None;
        let mut current_box: Option<(BoundingBox, Vec<String>)> = None;
        let mut capturing = false;
        let mut fragment = String::new();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| LayscanError::Document(format!("XML parse error: {e}")))?;
            match event {
                Event::Start(ref e) => match e.name().as_ref() {
                    b"page" => {
                        let id = required_attr(e, "id")?;
                        let id: u32 = id.parse().map_err(|_| {
                            LayscanError::Document(format!("bad page id {id:?}"))
                        })?;
                        doc.pages.entry(id).or_default();
                        current_page = Some(id);
                    }
                    b"textbox" => {
                        if current_page.is_some() {
                            let bbox = parse_bbox(&required_attr(e, "bbox")?)?;
                            current_box = Some((bbox, Vec::new()));
                        }
                    }
                    b"text" => {
                        if current_box.is_some() && attr(e, "bbox")?.is_some() {
                            capturing = true;
                            fragment.clear();
                        }
                    }
                    _ => {}
                },
                Event::Text(ref t) => {
                    if capturing {
                        let text = t.unescape().map_err(|e| {
                            LayscanError::Document(format!("XML text error: {e}"))
                        })?;
                        fragment.push_str(&text);
                    }
                }
                Event::End(ref e) => match e.name().as_ref() {
                    b"page" => current_page = None,
                    b"textbox" => {
                        if let (Some(page), Some((bbox, fragments))) =
                            (current_page, current_box.take())
                        {
                            doc.pages
                                .entry(page)
                                .or_default()
                                .push(PositionedElement::new(bbox, fragments));
                        }
                    }
                    b"text" => {
                        if capturing {
                            if let Some((_, fragments)) = current_box.as_mut() {
                                fragments.push(std::mem::take(&mut fragment));
                            }
                            capturing = false;
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(doc)
    }
}

fn attr(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    let found = e
        .try_get_attribute(name)
        .map_err(|err| LayscanError::Document(format!("bad attribute {name:?}: {err}")))?;
    match found {
        Some(a) => {
            let value = a
                .unescape_value()
                .map_err(|err| LayscanError::Document(format!("bad attribute {name:?}: {err}")))?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

fn required_attr(e: &BytesStart<'_>, name: &str) -> Result<String> {
    attr(e, name)?.ok_or_else(|| {
        LayscanError::Document(format!(
            "<{}> element missing {name:?} attribute",
            String::from_utf8_lossy(e.name().as_ref())
        ))
    })
}

/// Parse a `bbox` attribute: four comma-separated decimal numbers in
/// (x0, y0, x1, y1) order.
fn parse_bbox(value: &str) -> Result<BoundingBox> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| LayscanError::Document(format!("bad bbox attribute {value:?}")))?;
    if parts.len() != 4 {
        return Err(LayscanError::Document(format!(
            "bad bbox attribute {value:?}"
        )));
    }
    Ok(BoundingBox::new(parts[0], parts[1], parts[2], parts[3]))
}
