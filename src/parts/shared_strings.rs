//! The shared-string table (`xl/sharedStrings.xml`).
//!
//! Entries keep their source `<si>` markup until they are re-rendered, so an
//! untouched table serializes back to the same entries. New entries are only
//! ever appended; an entry's index is its position in the table.

use std::collections::{BTreeSet, HashMap};

use quick_xml::events::Event;
use serde_json::Value;

use crate::error::Result;
use crate::template::{variable_slots, Renderer};
use crate::xml_helpers::{
    decode_xstring, encode_xstring, escape_text, ChildNode, SpanReader, SplitDocument,
};

use super::worksheet::SheetPart;

/// One `<si>` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedStringEntry {
    /// Text of the entry; rich-text runs are concatenated.
    pub text: String,
    /// Variable names found in `text`. Empty unless the entry is plain text
    /// containing a `{{ ... }}` marker.
    pub template_variable_slots: Vec<String>,
    /// Addresses of cells that reference this entry, filled by
    /// [`SharedStringTable::compute_using_cells`].
    pub referencing_cells: BTreeSet<String>,
    rich: bool,
    /// Source markup; `None` once the entry has been generated or re-rendered.
    raw: Option<String>,
}

impl SharedStringEntry {
    /// A plain-text entry with no source markup.
    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            template_variable_slots: variable_slots(&text),
            text,
            referencing_cells: BTreeSet::new(),
            rich: false,
            raw: None,
        }
    }

    fn from_raw(raw: String) -> Result<Self> {
        let (text, rich) = si_text(&raw)?;
        let template_variable_slots = if rich {
            Vec::new()
        } else {
            variable_slots(&text)
        };
        Ok(Self {
            text,
            template_variable_slots,
            referencing_cells: BTreeSet::new(),
            rich,
            raw: Some(raw),
        })
    }

    /// Whether this entry is re-rendered during a merge.
    pub fn has_variables(&self) -> bool {
        !self.template_variable_slots.is_empty()
    }

    pub fn is_rich_text(&self) -> bool {
        self.rich
    }

    fn set_text(&mut self, text: String) {
        self.template_variable_slots = variable_slots(&text);
        self.text = text;
        self.raw = None;
        self.rich = false;
    }

    fn to_xml(&self, si: &str, t: &str) -> String {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        let space = if self.text.starts_with(char::is_whitespace)
            || self.text.ends_with(char::is_whitespace)
        {
            r#" xml:space="preserve""#
        } else {
            ""
        };
        let encoded = encode_xstring(&self.text);
        format!(
            "<{si}><{t}{space}>{}</{t}></{si}>",
            escape_text(&encoded)
        )
    }
}

/// A rendered copy of a variable entry, paired with the template entry it
/// came from. `shared_index` is assigned by [`SharedStringTable::append`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedString {
    pub template_index: usize,
    pub shared_index: Option<usize>,
    pub entry: SharedStringEntry,
}

/// Extract the text of an `<si>` fragment. Returns (text, is rich text).
///
/// Phonetic runs (`<rPh>`) are not part of the displayed text and are skipped.
fn si_text(raw: &str) -> Result<(String, bool)> {
    let mut reader = SpanReader::new(raw);
    let mut text = String::new();
    let mut rich = false;
    let mut in_t = false;
    let mut in_phonetic = false;

    loop {
        let (event, _) = reader.next_event()?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"r" => rich = true,
                b"rPh" => in_phonetic = true,
                b"t" if !in_phonetic => in_t = true,
                _ => {}
            },
            Event::End(ref e) => match e.local_name().as_ref() {
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Event::Text(ref e) if in_t => text.push_str(&e.unescape()?),
            Event::CData(ref e) if in_t => text.push_str(&String::from_utf8_lossy(e.as_ref())),
            _ => {}
        }
    }

    Ok((decode_xstring(&text).into_owned(), rich))
}

/// The package's shared-string pool. An absent part is an empty table on
/// which every operation is a no-op.
#[derive(Clone, Debug, Default)]
pub struct SharedStringTable {
    doc: Option<SplitDocument>,
    entries: Vec<SharedStringEntry>,
    dirty: bool,
}

impl SharedStringTable {
    /// Parse `sharedStrings.xml`.
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = SplitDocument::parse(xml, "sst")?;
        let entries = doc
            .elements("si")
            .map(|child| SharedStringEntry::from_raw(child.raw.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            doc: Some(doc),
            entries,
            dirty: false,
        })
    }

    /// The table of a package without a shared-strings part.
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn is_present(&self) -> bool {
        self.doc.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SharedStringEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[SharedStringEntry] {
        &self.entries
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether any entry's text equals `text`.
    pub fn contains_text(&self, text: &str) -> bool {
        self.entries.iter().any(|e| e.text == text)
    }

    /// Entries carrying variable markers, tagged with their index.
    ///
    /// Indices stay valid across appends; only the set of entries grows.
    pub fn find_variable_entries(&self) -> Vec<(usize, &SharedStringEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.has_variables())
            .collect()
    }

    /// Record, for every variable entry, which cells of `sheets` reference it.
    pub fn compute_using_cells<'a>(&mut self, sheets: impl IntoIterator<Item = &'a SheetPart>) {
        for entry in &mut self.entries {
            entry.referencing_cells.clear();
        }
        for sheet in sheets {
            for cell in sheet.shared_string_cells() {
                if let Some(entry) = self.entries.get_mut(cell.index) {
                    if entry.has_variables() {
                        entry.referencing_cells.insert(cell.address.clone());
                    }
                }
            }
        }
    }

    /// Render every variable entry against `data`. The table is not modified.
    pub fn render_variable_entries(
        &self,
        data: &Value,
        renderer: &dyn Renderer,
    ) -> Result<Vec<RenderedString>> {
        let indices: Vec<usize> = self
            .find_variable_entries()
            .into_iter()
            .map(|(index, _)| index)
            .collect();
        self.render_entries(&indices, data, renderer)
    }

    /// Render the entries at `indices` against `data`, in the given order.
    ///
    /// Out-of-range indices and entries without variables are skipped.
    pub fn render_entries(
        &self,
        indices: &[usize],
        data: &Value,
        renderer: &dyn Renderer,
    ) -> Result<Vec<RenderedString>> {
        let mut rendered = Vec::with_capacity(indices.len());
        for &index in indices {
            let Some(entry) = self.entries.get(index).filter(|e| e.has_variables()) else {
                continue;
            };
            let mut copy = entry.clone();
            copy.referencing_cells.clear();
            copy.set_text(renderer.render(&entry.text, data)?);
            rendered.push(RenderedString {
                template_index: index,
                shared_index: None,
                entry: copy,
            });
        }
        Ok(rendered)
    }

    /// Append rendered entries, assigning each the index it lands at.
    ///
    /// Entries of one batch with equal text share a single new entry. Earlier
    /// entries are never reused. Returns the number of entries added.
    pub fn append(&mut self, rendered: &mut [RenderedString]) -> usize {
        let before = self.entries.len();
        let mut placed: HashMap<String, usize> = HashMap::with_capacity(rendered.len());
        for item in rendered.iter_mut() {
            let entries = &mut self.entries;
            let index = *placed.entry(item.entry.text.clone()).or_insert_with(|| {
                entries.push(item.entry.clone());
                entries.len() - 1
            });
            item.shared_index = Some(index);
        }
        let added = self.entries.len() - before;
        if added > 0 {
            self.dirty = true;
        }
        added
    }

    /// Replace the text of existing entries in place.
    pub fn replace_rendered(&mut self, rendered: &[RenderedString]) {
        for item in rendered {
            if let Some(entry) = self.entries.get_mut(item.template_index) {
                entry.set_text(item.entry.text.clone());
                self.dirty = true;
            }
        }
    }

    /// Serialize the table with `count`/`uniqueCount` set to its length.
    ///
    /// Returns `None` when the package has no shared-strings part. Calling it
    /// repeatedly without mutation yields identical output.
    pub fn to_xml(&self) -> Option<String> {
        let source = self.doc.as_ref()?;
        let mut doc = source.clone();
        let si = doc.qualify("si");
        let t = doc.qualify("t");

        let mut entries = self.entries.iter();
        let mut children = Vec::with_capacity(doc.children.len() + self.entries.len());
        for child in doc.children.drain(..) {
            if child.is("si") {
                if let Some(entry) = entries.next() {
                    children.push(ChildNode::element("si", child.attrs, entry.to_xml(&si, &t)));
                }
            } else {
                children.push(child);
            }
        }
        for entry in entries {
            children.push(ChildNode::element("si", Vec::new(), entry.to_xml(&si, &t)));
        }
        doc.children = children;

        let len = self.entries.len().to_string();
        doc.set_container_attr("count", len.clone());
        doc.set_container_attr("uniqueCount", len);
        Some(doc.to_xml())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::error::XlmergeError;
    use crate::template::JinjaRenderer;
    use serde_json::json;

    const SST: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="6" uniqueCount="4"><si><t>Title</t></si><si><t>Hello {{name}}</t></si><si><r><rPr><b/></rPr><t>{{bold}}</t></r></si><si><t xml:space="preserve">{{ city }} </t><rPh sb="0" eb="1"><t>x</t></rPh></si></sst>"#;

    fn table() -> SharedStringTable {
        SharedStringTable::parse(SST).unwrap()
    }

    #[test]
    fn test_parse_entries() {
        let sst = table();
        assert_eq!(sst.len(), 4);
        assert_eq!(sst.get(0).unwrap().text, "Title");
        assert!(sst.get(2).unwrap().is_rich_text());
        assert_eq!(sst.get(3).unwrap().text, "{{ city }} ");
    }

    #[test]
    fn test_find_variable_entries_skips_rich_text() {
        let sst = table();
        let found: Vec<usize> = sst
            .find_variable_entries()
            .into_iter()
            .map(|(i, _)| i)
            .collect();
        assert_eq!(found, vec![1, 3]);
        assert_eq!(sst.get(1).unwrap().template_variable_slots, vec!["name"]);
    }

    #[test]
    fn test_render_does_not_mutate() {
        let sst = table();
        let rendered = sst
            .render_variable_entries(
                &json!({"name": "World", "city": "Oslo"}),
                &JinjaRenderer::default(),
            )
            .unwrap();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].template_index, 1);
        assert_eq!(rendered[0].entry.text, "Hello World");
        assert_eq!(rendered[1].entry.text, "Oslo ");
        assert!(rendered.iter().all(|r| r.shared_index.is_none()));
        assert_eq!(sst.get(1).unwrap().text, "Hello {{name}}");
    }

    #[test]
    fn test_append_assigns_indices_and_counts() {
        let mut sst = table();
        let mut rendered = sst
            .render_variable_entries(&json!({"name": "A"}), &JinjaRenderer::default())
            .unwrap();
        sst.append(&mut rendered);
        assert_eq!(rendered[0].shared_index, Some(4));
        assert_eq!(rendered[1].shared_index, Some(5));
        assert_eq!(sst.len(), 6);

        let xml = sst.to_xml().unwrap();
        assert!(xml.contains(r#"count="6" uniqueCount="6""#));
        assert!(xml.contains("<si><t>Hello A</t></si>"));
        // whitespace-only rendering keeps xml:space
        assert!(xml.contains(r#"<si><t xml:space="preserve"> </t></si>"#));
        // source entries are copied through
        assert!(xml.contains(r#"<si><r><rPr><b/></rPr><t>{{bold}}</t></r></si>"#));
    }

    #[test]
    fn test_append_shares_equal_text_within_batch() {
        let mut sst = table();
        let mut rendered: Vec<RenderedString> = [(1, "same"), (3, "same"), (0, "other")]
            .into_iter()
            .map(|(template_index, text)| RenderedString {
                template_index,
                shared_index: None,
                entry: SharedStringEntry::plain(text),
            })
            .collect();
        assert_eq!(sst.append(&mut rendered), 2);
        let indices: Vec<_> = rendered.iter().map(|r| r.shared_index).collect();
        assert_eq!(indices, vec![Some(4), Some(4), Some(5)]);

        // a later batch gets its own entries
        let mut again = vec![rendered[0].clone()];
        assert_eq!(sst.append(&mut again), 1);
        assert_eq!(again[0].shared_index, Some(6));
        assert_eq!(sst.len(), 7);
    }

    #[test]
    fn test_control_characters_round_trip() {
        let mut sst = table();
        let mut rendered = vec![RenderedString {
            template_index: 1,
            shared_index: None,
            entry: SharedStringEntry::plain("bell\u{7}"),
        }];
        sst.append(&mut rendered);
        let xml = sst.to_xml().unwrap();
        assert!(xml.contains("<si><t>bell_x0007_</t></si>"));
        let reparsed = SharedStringTable::parse(&xml).unwrap();
        assert_eq!(reparsed.get(4).unwrap().text, "bell\u{7}");
    }

    #[test]
    fn test_to_xml_is_idempotent() {
        let mut sst = table();
        let mut rendered = vec![RenderedString {
            template_index: 1,
            shared_index: None,
            entry: SharedStringEntry::plain("a & b"),
        }];
        sst.append(&mut rendered);
        let first = sst.to_xml().unwrap();
        let second = sst.to_xml().unwrap();
        assert_eq!(first, second);
        assert!(first.contains("<si><t>a &amp; b</t></si>"));

        let reparsed = SharedStringTable::parse(&first).unwrap();
        assert_eq!(reparsed.len(), 5);
        assert_eq!(reparsed.get(4).unwrap().text, "a & b");
    }

    #[test]
    fn test_compute_using_cells() {
        let mut sst = table();
        let sheet = SheetPart::parse(
            r#"<worksheet><sheetData><row r="1"><c r="A1" t="s"><v>1</v></c><c r="B1" t="s"><v>0</v></c><c r="C1" t="s"><v>1</v></c></row></sheetData></worksheet>"#
                .to_string(),
        )
        .unwrap();
        sst.compute_using_cells([&sheet]);
        let cells: Vec<&str> = sst
            .get(1)
            .unwrap()
            .referencing_cells
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(cells, vec!["A1", "C1"]);
        assert!(sst.get(0).unwrap().referencing_cells.is_empty());
    }

    #[test]
    fn test_replace_rendered_in_place() {
        let mut sst = table();
        let rendered = sst
            .render_variable_entries(&json!({"name": "X", "city": "Y"}), &JinjaRenderer::default())
            .unwrap();
        sst.replace_rendered(&rendered);
        assert_eq!(sst.len(), 4);
        assert!(sst.find_variable_entries().is_empty());
        assert!(sst.contains_text("Hello X"));
    }

    #[test]
    fn test_render_error_propagates() {
        let sst = table();
        let err = sst
            .render_variable_entries(&json!({}), &JinjaRenderer::new(true))
            .unwrap_err();
        assert!(matches!(err, XlmergeError::Render { .. }));
    }

    #[test]
    fn test_absent_table_is_noop() {
        let mut sst = SharedStringTable::absent();
        assert!(sst.find_variable_entries().is_empty());
        let mut rendered = sst
            .render_variable_entries(&json!({"a": 1}), &JinjaRenderer::default())
            .unwrap();
        sst.append(&mut rendered);
        assert!(sst.to_xml().is_none());
        assert!(!sst.is_dirty());
    }

    #[test]
    fn test_prefixed_table_appends_prefixed_entries() {
        let xml = r#"<x:sst xmlns:x="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="1" uniqueCount="1"><x:si><x:t>{{a}}</x:t></x:si></x:sst>"#;
        let mut sst = SharedStringTable::parse(xml).unwrap();
        let mut rendered = sst
            .render_variable_entries(&json!({"a": "z"}), &JinjaRenderer::default())
            .unwrap();
        sst.append(&mut rendered);
        let out = sst.to_xml().unwrap();
        assert!(out.contains("<x:si><x:t>z</x:t></x:si></x:sst>"));
    }
}
