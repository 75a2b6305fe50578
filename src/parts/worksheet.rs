//! Worksheet parts, the sheet-part collection, and the template model.
//!
//! A sheet part keeps its source XML verbatim. The scanner records where the
//! value of every shared-string cell (`<c t="s"><v>N</v></c>`) sits in that
//! text, so a clone can splice in new string indices without touching any
//! other byte of the sheet.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;

use quick_xml::events::Event;

use crate::cell_ref::{cell_address, parse_cell_ref, parse_row_number};
use crate::error::Result;
use crate::xml_helpers::{
    attr_string, attributes, qualified_name_string, slice, write_start_tag, SpanReader,
};

use super::relationships::RelationshipTable;
use super::shared_strings::{RenderedString, SharedStringTable};

/// Sheet relationship types whose target part may belong to one sheet only.
const SINGLE_OWNER_RELATIONSHIPS: [&str; 5] = [
    "/comments",
    "/threadedComment",
    "/vmlDrawing",
    "/drawing",
    "/table",
];

/// A cell whose value is an index into the shared-string table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedStringCell {
    /// A1 address of the cell.
    pub address: String,
    /// Index into the shared-string table.
    pub index: usize,
    /// Byte range of the `<v>` text in the sheet XML.
    value: Range<usize>,
}

/// A `<sheetView>` start tag carrying `tabSelected`.
#[derive(Clone, Debug)]
struct SelectedView {
    tag: Range<usize>,
    name: String,
    attrs: Vec<(String, String)>,
    empty: bool,
}

/// One parsed worksheet part.
#[derive(Clone, Debug)]
pub struct SheetPart {
    xml: String,
    cells: Vec<SharedStringCell>,
    selected_views: Vec<SelectedView>,
    /// Sheet-level relationships part (`_rels/sheetN.xml.rels`), kept opaque.
    rels: Option<String>,
}

impl SheetPart {
    /// Scan worksheet XML for shared-string cells.
    pub fn parse(xml: String) -> Result<Self> {
        let (cells, selected_views) = scan_sheet(&xml)?;
        Ok(Self {
            xml,
            cells,
            selected_views,
            rels: None,
        })
    }

    #[must_use]
    pub fn with_rels(mut self, rels: Option<String>) -> Self {
        self.rels = rels;
        self
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }

    pub fn rels(&self) -> Option<&str> {
        self.rels.as_deref()
    }

    /// Targets of sheet relationships whose part may belong to one sheet
    /// only. A clone copies the rels verbatim and so shares these parts with
    /// its template.
    pub fn single_owner_targets(&self) -> Result<Vec<String>> {
        let Some(rels) = self.rels.as_deref() else {
            return Ok(Vec::new());
        };
        Ok(RelationshipTable::parse(rels)?
            .relationships()
            .into_iter()
            .filter(|rel| {
                SINGLE_OWNER_RELATIONSHIPS
                    .iter()
                    .any(|suffix| rel.rel_type.ends_with(suffix))
            })
            .map(|rel| rel.target)
            .collect())
    }

    /// Shared-string cells in document order.
    pub fn shared_string_cells(&self) -> &[SharedStringCell] {
        &self.cells
    }

    /// Shared-string index of the cell at `address`, if it is a shared-string cell.
    pub fn shared_string_index(&self, address: &str) -> Option<usize> {
        self.cells
            .iter()
            .find(|c| c.address == address)
            .map(|c| c.index)
    }

    /// Deep copy with shared-string indices rewritten through `remap`.
    ///
    /// Cells whose index is not in `remap` keep their value. `tabSelected` is
    /// dropped from every sheet view so the copy does not join the selection.
    pub fn clone_with_remap(&self, remap: &HashMap<usize, usize>) -> Self {
        let mut edits: Vec<(Range<usize>, String)> = Vec::new();
        for cell in &self.cells {
            if let Some(new_index) = remap.get(&cell.index) {
                edits.push((cell.value.clone(), new_index.to_string()));
            }
        }
        for view in &self.selected_views {
            let attrs: Vec<(String, String)> = view
                .attrs
                .iter()
                .filter(|(k, _)| k != "tabSelected")
                .cloned()
                .collect();
            edits.push((view.tag.clone(), write_start_tag(&view.name, &attrs, view.empty)));
        }
        edits.sort_by_key(|(range, _)| range.start);

        let (xml, shift) = splice(&self.xml, &edits);

        let cells = self
            .cells
            .iter()
            .map(|cell| {
                let index = remap.get(&cell.index).copied().unwrap_or(cell.index);
                let start = shift(cell.value.start);
                let end = if index == cell.index {
                    shift(cell.value.end)
                } else {
                    start + index.to_string().len()
                };
                SharedStringCell {
                    address: cell.address.clone(),
                    index,
                    value: start..end,
                }
            })
            .collect();

        Self {
            xml,
            cells,
            selected_views: Vec::new(),
            rels: self.rels.clone(),
        }
    }
}

/// Apply non-overlapping, start-sorted edits. Returns the new text and a
/// function mapping an unedited source offset to its offset in the new text.
fn splice(source: &str, edits: &[(Range<usize>, String)]) -> (String, impl Fn(usize) -> usize) {
    let mut out = String::with_capacity(source.len() + edits.len() * 8);
    let mut cursor = 0;
    let mut deltas: Vec<(usize, isize)> = Vec::with_capacity(edits.len());
    for (range, replacement) in edits {
        if range.start < cursor {
            continue;
        }
        out.push_str(source.get(cursor..range.start).unwrap_or_default());
        out.push_str(replacement);
        cursor = range.end;
        #[allow(clippy::cast_possible_wrap)]
        let delta = replacement.len() as isize - (range.end - range.start) as isize;
        deltas.push((range.end, delta));
    }
    out.push_str(source.get(cursor..).unwrap_or_default());

    let shift = move |pos: usize| {
        let delta: isize = deltas
            .iter()
            .take_while(|(end, _)| *end <= pos)
            .map(|(_, d)| *d)
            .sum();
        pos.saturating_add_signed(delta)
    };
    (out, shift)
}

/// Collect shared-string cells and selected sheet views from worksheet XML.
fn scan_sheet(xml: &str) -> Result<(Vec<SharedStringCell>, Vec<SelectedView>)> {
    let mut reader = SpanReader::new(xml);
    let mut cells = Vec::new();
    let mut views = Vec::new();

    let mut row: u32 = 0;
    let mut next_row: u32 = 0;
    let mut next_col: u32 = 0;
    // (address, is shared string) of the open <c>
    let mut current: Option<(String, bool)> = None;
    let mut in_value = false;

    loop {
        let (event, range) = reader.next_event()?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.local_name().as_ref() {
                    b"row" => {
                        row = attr_string(e, b"r")
                            .as_deref()
                            .and_then(parse_row_number)
                            .unwrap_or(next_row);
                        next_row = row.saturating_add(1);
                        next_col = 0;
                    }
                    b"c" => {
                        let (col, cell_row) = attr_string(e, b"r")
                            .as_deref()
                            .and_then(parse_cell_ref)
                            .unwrap_or((next_col, row));
                        next_col = col.saturating_add(1);
                        let shared = attr_string(e, b"t").as_deref() == Some("s");
                        if !is_empty {
                            current = Some((cell_address(col, cell_row), shared));
                        }
                    }
                    b"v" if !is_empty => {
                        in_value = current.as_ref().is_some_and(|(_, shared)| *shared);
                    }
                    b"sheetView" => {
                        let attrs = attributes(e)?;
                        if attrs.iter().any(|(k, _)| k == "tabSelected") {
                            views.push(SelectedView {
                                tag: range.clone(),
                                name: qualified_name_string(e),
                                attrs,
                                empty: is_empty,
                            });
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(ref t) if in_value => {
                let Some((address, _)) = current.as_ref() else {
                    continue;
                };
                let raw = slice(xml, range.clone())?;
                match raw.trim().parse::<usize>() {
                    Ok(index) => cells.push(SharedStringCell {
                        address: address.clone(),
                        index,
                        value: range.clone(),
                    }),
                    Err(_) => {
                        tracing::warn!(
                            cell = %address,
                            value = %String::from_utf8_lossy(t.as_ref()),
                            "shared-string cell without a numeric index"
                        );
                    }
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"c" => current = None,
                _ => {}
            },
            _ => {}
        }
    }

    Ok((cells, views))
}

/// All worksheet parts of the package, keyed by zip path.
#[derive(Clone, Debug, Default)]
pub struct SheetPartCollection {
    parts: BTreeMap<String, SheetPart>,
    /// Parts added or replaced since parse.
    written: BTreeSet<String>,
    /// Parts present at parse time and removed since.
    removed: BTreeSet<String>,
}

impl SheetPartCollection {
    /// Register a part read from the source package.
    pub(crate) fn insert_original(&mut self, path: String, part: SheetPart) {
        self.parts.insert(path, part);
    }

    /// Register a new part under `path`.
    pub fn add(&mut self, path: impl Into<String>, part: SheetPart) {
        let path = path.into();
        self.removed.remove(&path);
        self.written.insert(path.clone());
        self.parts.insert(path, part);
    }

    pub fn find(&self, path: &str) -> Option<&SheetPart> {
        self.parts.get(path)
    }

    /// Remove a part. Absent paths are ignored.
    pub fn remove(&mut self, path: &str) -> Option<SheetPart> {
        let part = self.parts.remove(path)?;
        if !self.written.remove(path) {
            self.removed.insert(path.to_string());
        }
        Some(part)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SheetPart)> {
        self.parts.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Parts that must be written to the output package.
    pub(crate) fn written(&self) -> impl Iterator<Item = (&str, &SheetPart)> {
        self.written
            .iter()
            .filter_map(|path| self.parts.get(path).map(|p| (path.as_str(), p)))
    }

    /// Source parts that must be dropped from the output package.
    pub(crate) fn removed(&self) -> impl Iterator<Item = &str> {
        self.removed.iter().map(String::as_str)
    }

    /// Build the template model for the sheet stored at `path`.
    pub fn template_model(
        &self,
        sheet_name: &str,
        path: &str,
        shared_strings: &SharedStringTable,
    ) -> Option<TemplateModel> {
        let part = self.parts.get(path)?;
        let variable_indices: BTreeSet<usize> = shared_strings
            .find_variable_entries()
            .into_iter()
            .map(|(index, _)| index)
            .collect();

        let mut variable_cells = Vec::new();
        let mut indices = Vec::new();
        for cell in part.shared_string_cells() {
            if variable_indices.contains(&cell.index) {
                variable_cells.push((cell.address.clone(), cell.index));
                if !indices.contains(&cell.index) {
                    indices.push(cell.index);
                }
            }
        }
        indices.sort_unstable();

        Some(TemplateModel {
            sheet_name: sheet_name.to_string(),
            path: path.to_string(),
            part: part.clone(),
            variable_cells,
            variable_indices: indices,
        })
    }
}

/// The authoring template: the sheet whose cells reference variable strings.
///
/// Holds its own copy of the template part, so the template stays usable after
/// the template sheet itself is deleted from the workbook.
#[derive(Clone, Debug)]
pub struct TemplateModel {
    sheet_name: String,
    path: String,
    part: SheetPart,
    variable_cells: Vec<(String, usize)>,
    variable_indices: Vec<usize>,
}

impl TemplateModel {
    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    /// Zip path of the template part.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn part(&self) -> &SheetPart {
        &self.part
    }

    /// (address, shared index) of every template cell that holds a variable string.
    pub fn variable_cells(&self) -> &[(String, usize)] {
        &self.variable_cells
    }

    /// Distinct shared-string indices referenced by variable cells, ascending.
    pub fn variable_indices(&self) -> &[usize] {
        &self.variable_indices
    }

    /// Clone the template part, pointing each variable cell at the rendered
    /// entry paired with its template index.
    ///
    /// Rendered strings without an assigned shared index are ignored.
    pub fn clone_with_rendered_strings(&self, rendered: &[RenderedString]) -> SheetPart {
        let remap: HashMap<usize, usize> = rendered
            .iter()
            .filter_map(|r| r.shared_index.map(|new| (r.template_index, new)))
            .collect();
        self.part.clone_with_remap(&remap)
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

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetViews><sheetView tabSelected="1" workbookViewId="0"/></sheetViews><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1"><v>42</v></c><c r="C1" t="s"><v>1</v></c></row><row r="2"><c t="s"><v>0</v></c><c t="s"><v>2</v></c></row></sheetData></worksheet>"#;

    #[test]
    fn test_scan_shared_string_cells() {
        let part = SheetPart::parse(SHEET.to_string()).unwrap();
        let cells: Vec<(&str, usize)> = part
            .shared_string_cells()
            .iter()
            .map(|c| (c.address.as_str(), c.index))
            .collect();
        assert_eq!(cells, vec![("A1", 0), ("C1", 1), ("A2", 0), ("B2", 2)]);
        assert_eq!(part.shared_string_index("B1"), None);
    }

    #[test]
    fn test_clone_with_remap_rewrites_only_mapped_cells() {
        let part = SheetPart::parse(SHEET.to_string()).unwrap();
        let remap = HashMap::from([(0, 10), (2, 1234)]);
        let clone = part.clone_with_remap(&remap);

        assert_eq!(clone.shared_string_index("A1"), Some(10));
        assert_eq!(clone.shared_string_index("C1"), Some(1));
        assert_eq!(clone.shared_string_index("A2"), Some(10));
        assert_eq!(clone.shared_string_index("B2"), Some(1234));
        assert!(clone.xml().contains(r#"<c r="A1" t="s"><v>10</v></c>"#));
        assert!(clone.xml().contains(r#"<c r="B1"><v>42</v></c>"#));

        // the original is untouched
        assert_eq!(part.xml(), SHEET);
        assert_eq!(part.shared_string_index("A1"), Some(0));
    }

    #[test]
    fn test_clone_spans_match_rescan() {
        let part = SheetPart::parse(SHEET.to_string()).unwrap();
        let clone = part.clone_with_remap(&HashMap::from([(0, 99_999), (1, 7)]));
        let rescanned = SheetPart::parse(clone.xml().to_string()).unwrap();
        assert_eq!(clone.shared_string_cells(), rescanned.shared_string_cells());
    }

    #[test]
    fn test_clone_drops_tab_selected() {
        let part = SheetPart::parse(SHEET.to_string()).unwrap();
        let clone = part.clone_with_remap(&HashMap::new());
        assert!(!clone.xml().contains("tabSelected"));
        assert!(clone.xml().contains(r#"<sheetView workbookViewId="0"/>"#));
        assert!(part.xml().contains("tabSelected"));
    }

    #[test]
    fn test_single_owner_targets() {
        let rels = concat!(
            r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
            r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="https://example.com" TargetMode="External"/>"#,
            r#"<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/comments" Target="../comments1.xml"/>"#,
            r#"<Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/vmlDrawing" Target="../drawings/vmlDrawing1.vml"/>"#,
            r#"<Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/printerSettings" Target="../printerSettings/printerSettings1.bin"/>"#,
            "</Relationships>"
        );
        let part = SheetPart::parse(SHEET.to_string()).unwrap();
        assert!(part.single_owner_targets().unwrap().is_empty());

        let part = part.with_rels(Some(rels.to_string()));
        assert_eq!(
            part.single_owner_targets().unwrap(),
            vec!["../comments1.xml", "../drawings/vmlDrawing1.vml"]
        );
        let clone = part.clone_with_remap(&HashMap::new());
        assert_eq!(clone.rels(), Some(rels));
    }

    #[test]
    fn test_malformed_sheet_is_rejected() {
        let err = SheetPart::parse("<worksheet><sheetData></worksheet>".to_string());
        assert!(err.is_err());
    }

    #[test]
    fn test_collection_tracks_written_and_removed() {
        let mut parts = SheetPartCollection::default();
        let part = SheetPart::parse(SHEET.to_string()).unwrap();
        parts.insert_original("xl/worksheets/sheet1.xml".into(), part.clone());
        parts.add("xl/worksheets/sheetrId9.xml", part);

        assert_eq!(parts.written().count(), 1);
        assert!(parts.remove("xl/worksheets/sheet1.xml").is_some());
        assert!(parts.remove("xl/worksheets/sheetrId9.xml").is_some());
        assert!(parts.remove("missing.xml").is_none());
        assert_eq!(parts.written().count(), 0);
        assert_eq!(parts.removed().collect::<Vec<_>>(), vec!["xl/worksheets/sheet1.xml"]);
        assert!(parts.is_empty());
    }
}
