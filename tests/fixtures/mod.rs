//! Test fixtures for generating template XLSX files in memory.
//!
//! # Example
//!
//! ```rust,ignore
//! use fixtures::TemplateBuilder;
//!
//! let xlsx = TemplateBuilder::new()
//!     .add_sheet("Template")
//!     .add_string("A1", "{{AccountName}}")
//!     .add_number("B1", 42.0)
//!     .build();
//!
//! let engine = xlmerge::MergeEngine::parse(&xlsx).unwrap();
//! ```
#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::ZipWriter;

pub const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
pub const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

// ============================================================================
// Cells
// ============================================================================

/// A cell value in a template sheet.
#[derive(Debug, Clone)]
pub enum CellValue {
    /// A plain shared string.
    Shared(String),
    /// A rich-text shared string made of runs.
    Rich(Vec<String>),
    Number(f64),
    /// An inline string (not shared).
    Inline(String),
}

#[derive(Debug, Clone)]
pub struct CellEntry {
    pub cell_ref: String,
    pub value: CellValue,
}

/// One sheet of the template.
#[derive(Debug, Clone)]
pub struct SheetSpec {
    pub name: String,
    pub cells: Vec<CellEntry>,
    /// Contents of the sheet's `_rels/sheetN.xml.rels` part.
    pub rels: Option<String>,
}

fn row_of(cell_ref: &str) -> u32 {
    cell_ref
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .expect("cell reference with a row number")
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// The `<si>` body of a shared-string cell value.
fn shared_item(value: &CellValue) -> Option<String> {
    match value {
        CellValue::Shared(text) => Some(format!(
            r#"<si><t xml:space="preserve">{}</t></si>"#,
            escape(text)
        )),
        CellValue::Rich(runs) => {
            let body: String = runs
                .iter()
                .map(|run| format!(r#"<r><t xml:space="preserve">{}</t></r>"#, escape(run)))
                .collect();
            Some(format!("<si>{body}</si>"))
        }
        CellValue::Number(_) | CellValue::Inline(_) => None,
    }
}

// ============================================================================
// Template Builder
// ============================================================================

/// Builder for template packages.
///
/// Sheets are written as `xl/worksheets/sheet{N}.xml` with relationship ids
/// `rId{N}`. Shared strings are pooled in order of first use; a template
/// without string cells has no shared-strings part at all.
#[derive(Debug, Clone, Default)]
pub struct TemplateBuilder {
    sheets: Vec<SheetSpec>,
    defined_names: Vec<(String, Option<usize>, String)>,
    active_tab: Option<usize>,
    overrides: BTreeMap<String, Option<String>>,
}

impl TemplateBuilder {
    /// Create a new template builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new sheet; following `add_*` calls fill it.
    #[must_use]
    pub fn add_sheet(mut self, name: &str) -> Self {
        self.sheets.push(SheetSpec {
            name: name.to_string(),
            cells: Vec::new(),
            rels: None,
        });
        self
    }

    fn push(mut self, cell_ref: &str, value: CellValue) -> Self {
        self.sheets
            .last_mut()
            .expect("add_sheet before adding cells")
            .cells
            .push(CellEntry {
                cell_ref: cell_ref.to_string(),
                value,
            });
        self
    }

    #[must_use]
    pub fn add_string(self, cell_ref: &str, text: &str) -> Self {
        self.push(cell_ref, CellValue::Shared(text.to_string()))
    }

    #[must_use]
    pub fn add_rich_string(self, cell_ref: &str, runs: &[&str]) -> Self {
        self.push(
            cell_ref,
            CellValue::Rich(runs.iter().map(|r| (*r).to_string()).collect()),
        )
    }

    #[must_use]
    pub fn add_number(self, cell_ref: &str, n: f64) -> Self {
        self.push(cell_ref, CellValue::Number(n))
    }

    #[must_use]
    pub fn add_inline_string(self, cell_ref: &str, text: &str) -> Self {
        self.push(cell_ref, CellValue::Inline(text.to_string()))
    }

    /// Give the current sheet a sheet-level relationships part.
    #[must_use]
    pub fn with_sheet_rels(mut self, rels: &str) -> Self {
        self.sheets
            .last_mut()
            .expect("add_sheet before adding rels")
            .rels = Some(rels.to_string());
        self
    }

    /// Add a defined name, optionally scoped to the sheet at `local_sheet_id`.
    #[must_use]
    pub fn with_defined_name(
        mut self,
        name: &str,
        local_sheet_id: Option<usize>,
        formula: &str,
    ) -> Self {
        self.defined_names
            .push((name.to_string(), local_sheet_id, formula.to_string()));
        self
    }

    #[must_use]
    pub fn with_active_tab(mut self, tab: usize) -> Self {
        self.active_tab = Some(tab);
        self
    }

    /// Replace the generated content of a part.
    #[must_use]
    pub fn with_part(mut self, path: &str, content: &str) -> Self {
        self.overrides
            .insert(path.to_string(), Some(content.to_string()));
        self
    }

    /// Leave a part out of the package.
    #[must_use]
    pub fn without_part(mut self, path: &str) -> Self {
        self.overrides.insert(path.to_string(), None);
        self
    }

    /// Shared-string `<si>` bodies in pool order.
    fn shared_string_items(&self) -> Vec<String> {
        let mut items: Vec<String> = Vec::new();
        for cell in self.sheets.iter().flat_map(|s| s.cells.iter()) {
            if let Some(item) = shared_item(&cell.value) {
                if !items.contains(&item) {
                    items.push(item);
                }
            }
        }
        items
    }

    /// All parts of the package, keyed by zip path.
    #[must_use]
    pub fn parts(&self) -> BTreeMap<String, String> {
        let items = self.shared_string_items();
        let mut parts = BTreeMap::new();

        parts.insert(
            "[Content_Types].xml".to_string(),
            generate_content_types(self.sheets.len(), !items.is_empty()),
        );
        parts.insert("_rels/.rels".to_string(), generate_rels());
        parts.insert(
            "xl/_rels/workbook.xml.rels".to_string(),
            generate_workbook_rels(self.sheets.len(), !items.is_empty()),
        );
        parts.insert("xl/workbook.xml".to_string(), self.generate_workbook());
        if !items.is_empty() {
            parts.insert(
                "xl/sharedStrings.xml".to_string(),
                generate_shared_strings(&items, self.string_cell_count()),
            );
        }
        for (i, sheet) in self.sheets.iter().enumerate() {
            parts.insert(
                format!("xl/worksheets/sheet{}.xml", i + 1),
                generate_sheet_xml(sheet, i == self.active_tab.unwrap_or(0), &items),
            );
            if let Some(rels) = &sheet.rels {
                parts.insert(format!("xl/worksheets/_rels/sheet{}.xml.rels", i + 1), rels.clone());
            }
        }

        for (path, content) in &self.overrides {
            match content {
                Some(content) => parts.insert(path.clone(), content.clone()),
                None => parts.remove(path),
            };
        }
        parts
    }

    fn string_cell_count(&self) -> usize {
        self.sheets
            .iter()
            .flat_map(|s| s.cells.iter())
            .filter(|c| matches!(c.value, CellValue::Shared(_) | CellValue::Rich(_)))
            .count()
    }

    /// Build the XLSX file as bytes.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let cursor = Cursor::new(Vec::new());
        let mut zip = ZipWriter::new(cursor);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        // [Content_Types].xml first, like spreadsheet applications write it
        let mut parts = self.parts();
        let content_types = parts.remove("[Content_Types].xml");
        for (path, content) in content_types
            .map(|c| ("[Content_Types].xml".to_string(), c))
            .into_iter()
            .chain(parts)
        {
            zip.start_file(path, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }

        zip.finish().expect("Failed to finish ZIP").into_inner()
    }

    fn generate_workbook(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        xml.push_str(&format!(r#"<workbook xmlns="{NS_MAIN}" xmlns:r="{NS_REL}">"#));
        xml.push_str(&format!(
            r#"<bookViews><workbookView xWindow="0" yWindow="0" windowWidth="16384" windowHeight="8192" activeTab="{}"/></bookViews>"#,
            self.active_tab.unwrap_or(0)
        ));
        xml.push_str("<sheets>");
        for (i, sheet) in self.sheets.iter().enumerate() {
            xml.push_str(&format!(
                r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                escape(&sheet.name),
                i + 1,
                i + 1
            ));
        }
        xml.push_str("</sheets>");
        if !self.defined_names.is_empty() {
            xml.push_str("<definedNames>");
            for (name, local, formula) in &self.defined_names {
                match local {
                    Some(id) => xml.push_str(&format!(
                        r#"<definedName name="{name}" localSheetId="{id}">{}</definedName>"#,
                        escape(formula)
                    )),
                    None => xml.push_str(&format!(
                        r#"<definedName name="{name}">{}</definedName>"#,
                        escape(formula)
                    )),
                }
            }
            xml.push_str("</definedNames>");
        }
        xml.push_str(r#"<calcPr calcId="191029"/>"#);
        xml.push_str("</workbook>");
        xml
    }
}

// ============================================================================
// XML Generators
// ============================================================================

/// Generate [Content_Types].xml
fn generate_content_types(sheet_count: usize, shared_strings: bool) -> String {
    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    xml.push_str(r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#);
    xml.push_str(r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#);
    xml.push_str(r#"<Default Extension="xml" ContentType="application/xml"/>"#);
    xml.push_str(r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#);
    if shared_strings {
        xml.push_str(r#"<Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>"#);
    }
    for i in 1..=sheet_count {
        xml.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{i}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
        ));
    }
    xml.push_str("</Types>");
    xml
}

/// Generate _rels/.rels
fn generate_rels() -> String {
    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    xml.push_str(
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    xml.push_str(r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>"#);
    xml.push_str("</Relationships>");
    xml
}

/// Generate xl/_rels/workbook.xml.rels
fn generate_workbook_rels(sheet_count: usize, shared_strings: bool) -> String {
    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    xml.push_str(
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for i in 1..=sheet_count {
        xml.push_str(&format!(
            r#"<Relationship Id="rId{i}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{i}.xml"/>"#
        ));
    }
    if shared_strings {
        xml.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>"#,
            sheet_count + 1
        ));
    }
    xml.push_str("</Relationships>");
    xml
}

/// Generate xl/sharedStrings.xml
fn generate_shared_strings(items: &[String], count: usize) -> String {
    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    xml.push_str(&format!(
        r#"<sst xmlns="{NS_MAIN}" count="{count}" uniqueCount="{}">"#,
        items.len()
    ));
    for item in items {
        xml.push_str(item);
    }
    xml.push_str("</sst>");
    xml
}

/// Generate xl/worksheets/sheetN.xml
fn generate_sheet_xml(sheet: &SheetSpec, selected: bool, items: &[String]) -> String {
    let mut rows: BTreeMap<u32, Vec<&CellEntry>> = BTreeMap::new();
    for cell in &sheet.cells {
        rows.entry(row_of(&cell.cell_ref)).or_default().push(cell);
    }
    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    xml.push_str(&format!(r#"<worksheet xmlns="{NS_MAIN}" xmlns:r="{NS_REL}">"#));
    if selected {
        xml.push_str(r#"<sheetViews><sheetView tabSelected="1" workbookViewId="0"/></sheetViews>"#);
    } else {
        xml.push_str(r#"<sheetViews><sheetView workbookViewId="0"/></sheetViews>"#);
    }
    xml.push_str("<sheetData>");
    for (row, cells) in rows {
        xml.push_str(&format!(r#"<row r="{row}">"#));
        for cell in cells {
            let r = &cell.cell_ref;
            match &cell.value {
                CellValue::Shared(_) | CellValue::Rich(_) => {
                    let item = shared_item(&cell.value).unwrap();
                    let index = items.iter().position(|i| *i == item).unwrap();
                    xml.push_str(&format!(r#"<c r="{r}" t="s"><v>{index}</v></c>"#));
                }
                CellValue::Number(n) => xml.push_str(&format!(r#"<c r="{r}"><v>{n}</v></c>"#)),
                CellValue::Inline(text) => xml.push_str(&format!(
                    r#"<c r="{r}" t="inlineStr"><is><t>{}</t></is></c>"#,
                    escape(text)
                )),
            }
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData>");
    xml.push_str("</worksheet>");
    xml
}
