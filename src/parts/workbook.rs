//! The workbook manifest (`xl/workbook.xml`): the ordered `<sheets>` list.
//!
//! Only `<sheets>` is modelled. When sheets are removed, the sheet positions
//! referenced elsewhere in the workbook part (`localSheetId` on defined names,
//! `activeTab`/`firstSheet` on workbook views) are shifted on write.

use crate::error::Result;
use crate::xml_helpers::{write_start_tag, ChildNode, SplitDocument};

/// Characters Excel rejects in sheet names.
const FORBIDDEN_NAME_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];
const MAX_NAME_CHARS: usize = 31;

/// One `<sheet>` entry of the manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SheetDescriptor {
    pub name: String,
    pub sheet_id: String,
    pub relationship_id: String,
}

impl SheetDescriptor {
    fn from_node(node: &ChildNode) -> Option<Self> {
        Some(Self {
            name: node.attr("name")?.to_string(),
            sheet_id: node.attr("sheetId").unwrap_or_default().to_string(),
            relationship_id: node.attr("id").unwrap_or_default().to_string(),
        })
    }
}

/// Check a sheet name against the rules spreadsheet applications enforce.
pub fn validate_sheet_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("sheet name is empty");
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err("sheet name is longer than 31 characters");
    }
    if name.contains(FORBIDDEN_NAME_CHARS) {
        return Err("sheet name contains one of [ ] : * ? / \\");
    }
    if name.starts_with('\'') || name.ends_with('\'') {
        return Err("sheet name starts or ends with an apostrophe");
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct WorkbookManifest {
    doc: SplitDocument,
    /// Qualified key of the relationship-id attribute, usually `r:id`.
    rel_id_key: String,
    /// Positions of removed sheets, each relative to the list at removal time.
    removed_positions: Vec<usize>,
    dirty: bool,
}

impl WorkbookManifest {
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = SplitDocument::parse(xml, "sheets")?;
        let rel_id_key = doc
            .elements("sheet")
            .flat_map(|node| node.attrs.iter())
            .map(|(key, _)| key)
            .find(|key| key.ends_with(":id"))
            .cloned()
            .unwrap_or_else(|| "r:id".to_string());
        Ok(Self {
            doc,
            rel_id_key,
            removed_positions: Vec::new(),
            dirty: false,
        })
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Sheet descriptors in tab order.
    pub fn sheets(&self) -> Vec<SheetDescriptor> {
        self.doc
            .elements("sheet")
            .filter_map(SheetDescriptor::from_node)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.doc.elements("sheet").count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a sheet with this name exists. Sheet names compare case-insensitively.
    pub fn contains(&self, name: &str) -> bool {
        let wanted = name.to_lowercase();
        self.doc
            .elements("sheet")
            .filter_map(|node| node.attr("name"))
            .any(|n| n.to_lowercase() == wanted)
    }

    /// Tab position of the sheet named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.doc
            .elements("sheet")
            .position(|node| node.attr("name") == Some(name))
    }

    /// Append a sheet and return the `sheetId` assigned to it.
    pub fn add(&mut self, name: &str, relationship_id: &str) -> String {
        let next = self
            .doc
            .elements("sheet")
            .filter_map(|node| node.attr("sheetId"))
            .filter_map(|id| id.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            .saturating_add(1);
        let sheet_id = next.to_string();

        let attrs = vec![
            ("name".to_string(), name.to_string()),
            ("sheetId".to_string(), sheet_id.clone()),
            (self.rel_id_key.clone(), relationship_id.to_string()),
        ];
        let raw = write_start_tag(&self.doc.qualify("sheet"), &attrs, true);
        self.doc
            .insert_after_last("sheet", ChildNode::element("sheet", attrs, raw));
        self.dirty = true;
        sheet_id
    }

    /// Remove the sheet named `name`. Absent names are ignored.
    pub fn remove(&mut self, name: &str) -> bool {
        let Some(position) = self.position(name) else {
            return false;
        };
        let mut seen = 0;
        self.doc.children.retain(|node| {
            if !node.is("sheet") {
                return true;
            }
            let keep = seen != position;
            seen += 1;
            keep
        });
        self.removed_positions.push(position);
        self.dirty = true;
        true
    }

    pub fn find_relationship_id(&self, name: &str) -> Option<String> {
        self.doc
            .elements("sheet")
            .find(|node| node.attr("name") == Some(name))
            .and_then(|node| node.attr("id"))
            .map(str::to_string)
    }

    /// Name of the first sheet, which is the template by convention.
    pub fn first_sheet_name(&self) -> Option<String> {
        self.doc
            .elements("sheet")
            .find_map(|node| node.attr("name"))
            .map(str::to_string)
    }

    pub fn to_xml(&self) -> Result<String> {
        let xml = self.doc.to_xml();
        if self.removed_positions.is_empty() {
            return Ok(xml);
        }
        let xml = shift_defined_names(&xml, &self.removed_positions)?;
        shift_workbook_views(&xml, &self.removed_positions)
    }
}

/// Shift a sheet position past a removal; `None` if it pointed at the removed sheet.
fn shift_position(position: usize, removed: usize) -> Option<usize> {
    match position.cmp(&removed) {
        std::cmp::Ordering::Less => Some(position),
        std::cmp::Ordering::Equal => None,
        std::cmp::Ordering::Greater => Some(position - 1),
    }
}

/// Drop sheet-scoped defined names of removed sheets and renumber the rest.
fn shift_defined_names(xml: &str, removed: &[usize]) -> Result<String> {
    let Ok(mut doc) = SplitDocument::parse(xml, "definedNames") else {
        return Ok(xml.to_string());
    };

    let mut children = Vec::with_capacity(doc.children.len());
    for mut node in doc.children.drain(..) {
        let local_id = node
            .attr("localSheetId")
            .and_then(|v| v.parse::<usize>().ok());
        let Some(mut local_id) = local_id.filter(|_| node.is("definedName")) else {
            children.push(node);
            continue;
        };
        let original = local_id;
        let mut keep = true;
        for &position in removed {
            match shift_position(local_id, position) {
                Some(shifted) => local_id = shifted,
                None => {
                    keep = false;
                    break;
                }
            }
        }
        if !keep {
            continue;
        }
        if local_id != original {
            node.set_attr("localSheetId", local_id.to_string())?;
        }
        children.push(node);
    }

    // an empty <definedNames/> is not schema-valid
    if !children.iter().any(|c| c.is("definedName")) {
        return Ok(doc.to_xml_without_container());
    }
    doc.children = children;
    Ok(doc.to_xml())
}

/// Keep `activeTab`/`firstSheet` pointing at surviving sheets.
fn shift_workbook_views(xml: &str, removed: &[usize]) -> Result<String> {
    let Ok(mut doc) = SplitDocument::parse(xml, "bookViews") else {
        return Ok(xml.to_string());
    };
    for node in doc.children.iter_mut().filter(|c| c.is("workbookView")) {
        for key in ["activeTab", "firstSheet"] {
            let Some(value) = node.attr(key).and_then(|v| v.parse::<usize>().ok()) else {
                continue;
            };
            let shifted = removed.iter().fold(value, |pos, &removed| {
                shift_position(pos, removed).unwrap_or_else(|| pos.saturating_sub(1))
            });
            if shifted != value {
                node.set_attr(key, shifted.to_string())?;
            }
        }
    }
    Ok(doc.to_xml())
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
    use test_case::test_case;

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><bookViews><workbookView xWindow="0" yWindow="0" activeTab="1"/></bookViews><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/><sheet name="Sheet2" sheetId="2" r:id="rId2"/></sheets><definedNames><definedName name="_xlnm.Print_Area" localSheetId="0">Sheet1!$A$1:$B$2</definedName><definedName name="_xlnm.Print_Area" localSheetId="1">Sheet2!$A$1:$B$2</definedName><definedName name="Total">Sheet2!$C$1</definedName></definedNames><calcPr calcId="191029"/></workbook>"#;

    fn manifest() -> WorkbookManifest {
        WorkbookManifest::parse(WORKBOOK).unwrap()
    }

    #[test]
    fn test_sheets_in_order() {
        let m = manifest();
        let names: Vec<String> = m.sheets().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Sheet1", "Sheet2"]);
        assert_eq!(m.first_sheet_name().as_deref(), Some("Sheet1"));
        assert_eq!(m.find_relationship_id("Sheet2").as_deref(), Some("rId2"));
        assert_eq!(m.find_relationship_id("invalid-sheet-name"), None);
    }

    #[test]
    fn test_add_assigns_next_sheet_id() {
        let mut m = manifest();
        let sheet_id = m.add("added", "rId7");
        assert_eq!(sheet_id, "3");
        let added = m.sheets().pop().unwrap();
        assert_eq!(
            added,
            SheetDescriptor {
                name: "added".into(),
                sheet_id: "3".into(),
                relationship_id: "rId7".into(),
            }
        );
        assert!(m.to_xml().unwrap().contains(concat!(
            r#"<sheet name="Sheet2" sheetId="2" r:id="rId2"/>"#,
            r#"<sheet name="added" sheetId="3" r:id="rId7"/></sheets>"#
        )));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut m = manifest();
        assert!(!m.remove("invalid-sheet-name"));
        assert_eq!(m.len(), 2);
        assert!(!m.is_dirty());
        assert_eq!(m.to_xml().unwrap(), WORKBOOK);
    }

    #[test]
    fn test_remove_shifts_positions() {
        let mut m = manifest();
        assert!(m.remove("Sheet1"));
        assert_eq!(m.len(), 1);
        assert_eq!(m.first_sheet_name().as_deref(), Some("Sheet2"));

        let xml = m.to_xml().unwrap();
        assert!(!xml.contains(r#"name="Sheet1""#));
        assert!(!xml.contains("Sheet1!$A$1"));
        assert!(xml.contains(
            r#"<definedName name="_xlnm.Print_Area" localSheetId="0">Sheet2!$A$1:$B$2</definedName>"#
        ));
        assert!(xml.contains(r#"<definedName name="Total">Sheet2!$C$1</definedName>"#));
        assert!(xml.contains(r#"activeTab="0""#));
    }

    #[test]
    fn test_remove_last_scoped_name_drops_container() {
        let xml = r#"<workbook><sheets><sheet name="A" sheetId="1" r:id="rId1"/><sheet name="B" sheetId="2" r:id="rId2"/></sheets><definedNames><definedName name="x" localSheetId="0">A!$A$1</definedName></definedNames><calcPr/></workbook>"#;
        let mut m = WorkbookManifest::parse(xml).unwrap();
        m.remove("A");
        assert_eq!(
            m.to_xml().unwrap(),
            r#"<workbook><sheets><sheet name="B" sheetId="2" r:id="rId2"/></sheets><calcPr/></workbook>"#
        );
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let m = manifest();
        assert!(m.contains("sheet1"));
        assert!(!m.contains("Sheet3"));
    }

    #[test_case("Report", true)]
    #[test_case("", false)]
    #[test_case("a/b", false)]
    #[test_case("[x]", false)]
    #[test_case("'quoted'", false)]
    #[test_case("0123456789012345678901234567890", true)]
    #[test_case("01234567890123456789012345678901", false)]
    fn test_validate_sheet_name(name: &str, valid: bool) {
        assert_eq!(validate_sheet_name(name).is_ok(), valid);
    }
}
