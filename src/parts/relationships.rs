//! The workbook relationship table (`xl/_rels/workbook.xml.rels`).
//!
//! Maps relationship ids (`rId1`, `rId2`, ...) to the parts they point at.
//! Existing `<Relationship>` elements are copied through verbatim; only new
//! ones are generated.

use crate::error::Result;
use crate::namespaces::{is_shared_strings_relationship, is_worksheet_relationship, REL_WORKSHEET};
use crate::xml_helpers::{write_start_tag, ChildNode, SplitDocument};

const ID_PREFIX: &str = "rId";

/// One `<Relationship>` element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    /// Target as written in the part, relative to the workbook's directory.
    pub target: String,
}

impl Relationship {
    fn from_node(node: &ChildNode) -> Option<Self> {
        Some(Self {
            id: node.attr("Id")?.to_string(),
            rel_type: node.attr("Type").unwrap_or_default().to_string(),
            target: node.attr("Target").unwrap_or_default().to_string(),
        })
    }
}

/// Numeric suffix of an id following the `rIdN` convention.
fn id_number(id: &str) -> Option<u32> {
    id.strip_prefix(ID_PREFIX)?.parse().ok()
}

#[derive(Clone, Debug)]
pub struct RelationshipTable {
    doc: SplitDocument,
    next_number: u32,
    dirty: bool,
}

impl RelationshipTable {
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = SplitDocument::parse(xml, "Relationships")?;
        let max = doc
            .elements("Relationship")
            .filter_map(|node| node.attr("Id").and_then(id_number))
            .max()
            .unwrap_or(0);
        Ok(Self {
            doc,
            next_number: max.saturating_add(1),
            dirty: false,
        })
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// All relationships in document order.
    pub fn relationships(&self) -> Vec<Relationship> {
        self.doc
            .elements("Relationship")
            .filter_map(Relationship::from_node)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.doc.elements("Relationship").count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.doc
            .elements("Relationship")
            .any(|node| node.attr("Id") == Some(id))
    }

    /// Allocate a fresh id. Every call returns a new value, even without an
    /// intervening [`add`](Self::add).
    pub fn next_id(&mut self) -> String {
        loop {
            let id = format!("{ID_PREFIX}{}", self.next_number);
            self.next_number = self.next_number.saturating_add(1);
            if !self.contains(&id) {
                return id;
            }
        }
    }

    /// Add a worksheet relationship.
    pub fn add(&mut self, id: &str, target: &str) {
        self.add_with_type(id, REL_WORKSHEET, target);
    }

    pub fn add_with_type(&mut self, id: &str, rel_type: &str, target: &str) {
        let attrs = vec![
            ("Id".to_string(), id.to_string()),
            ("Type".to_string(), rel_type.to_string()),
            ("Target".to_string(), target.to_string()),
        ];
        let raw = write_start_tag(&self.doc.qualify("Relationship"), &attrs, true);
        self.doc
            .insert_after_last("Relationship", ChildNode::element("Relationship", attrs, raw));
        if let Some(n) = id_number(id) {
            self.next_number = self.next_number.max(n.saturating_add(1));
        }
        self.dirty = true;
    }

    /// Remove a relationship. Unknown ids are ignored.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.doc.children.len();
        self.doc
            .children
            .retain(|node| !(node.is("Relationship") && node.attr("Id") == Some(id)));
        let removed = self.doc.children.len() != before;
        self.dirty |= removed;
        removed
    }

    pub fn find(&self, id: &str) -> Option<Relationship> {
        self.doc
            .elements("Relationship")
            .find(|node| node.attr("Id") == Some(id))
            .and_then(Relationship::from_node)
    }

    /// Target of the relationship `id`, as written in the part.
    pub fn find_target_path(&self, id: &str) -> Option<&str> {
        self.doc
            .elements("Relationship")
            .find(|node| node.attr("Id") == Some(id))
            .and_then(|node| node.attr("Target"))
    }

    /// Target of the first shared-strings relationship.
    pub fn shared_strings_target(&self) -> Option<&str> {
        self.doc
            .elements("Relationship")
            .find(|node| node.attr("Type").is_some_and(is_shared_strings_relationship))
            .and_then(|node| node.attr("Target"))
    }

    /// (id, target) of every worksheet relationship.
    pub fn worksheets(&self) -> Vec<(String, String)> {
        self.relationships()
            .into_iter()
            .filter(|rel| is_worksheet_relationship(&rel.rel_type))
            .map(|rel| (rel.id, rel.target))
            .collect()
    }

    pub fn to_xml(&self) -> String {
        self.doc.to_xml()
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
    use std::collections::HashSet;

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/theme" Target="theme/theme1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId5" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#;

    #[test]
    fn test_parse_and_lookup() {
        let rels = RelationshipTable::parse(RELS).unwrap();
        assert_eq!(rels.len(), 4);
        assert_eq!(rels.find_target_path("rId1"), Some("worksheets/sheet1.xml"));
        assert_eq!(rels.find_target_path("rId9"), None);
        assert_eq!(rels.shared_strings_target(), Some("sharedStrings.xml"));
        assert_eq!(
            rels.worksheets(),
            vec![
                ("rId2".to_string(), "worksheets/sheet2.xml".to_string()),
                ("rId1".to_string(), "worksheets/sheet1.xml".to_string()),
            ]
        );
    }

    #[test]
    fn test_next_id_is_max_plus_one() {
        let mut rels = RelationshipTable::parse(RELS).unwrap();
        assert_eq!(rels.next_id(), "rId6");
    }

    #[test]
    fn test_next_id_never_repeats() {
        let mut rels = RelationshipTable::parse(RELS).unwrap();
        let existing: HashSet<String> = rels.relationships().into_iter().map(|r| r.id).collect();
        let ids: Vec<String> = (0..5).map(|_| rels.next_id()).collect();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), 5);
        assert!(ids.iter().all(|id| !existing.contains(id)));
    }

    #[test]
    fn test_add_and_remove() {
        let mut rels = RelationshipTable::parse(RELS).unwrap();
        let id = rels.next_id();
        rels.add(&id, "worksheets/sheetrId6.xml");
        assert!(rels.is_dirty());
        assert_eq!(rels.find_target_path(&id), Some("worksheets/sheetrId6.xml"));
        assert_eq!(rels.find(&id).unwrap().rel_type, REL_WORKSHEET);

        let xml = rels.to_xml();
        assert!(xml.contains(
            r#"<Relationship Id="rId6" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheetrId6.xml"/></Relationships>"#
        ));

        assert!(rels.remove("rId2"));
        assert!(!rels.remove("rId2"));
        assert!(rels.find_target_path("rId2").is_none());
        assert_eq!(rels.len(), 4);
    }

    #[test]
    fn test_untouched_roundtrip() {
        let rels = RelationshipTable::parse(RELS).unwrap();
        assert_eq!(rels.to_xml(), RELS);
        assert!(!rels.is_dirty());
    }

    #[test]
    fn test_non_numeric_ids() {
        let xml = r#"<Relationships><Relationship Id="R1a2b" Type="t" Target="x.xml"/></Relationships>"#;
        let mut rels = RelationshipTable::parse(xml).unwrap();
        assert_eq!(rels.next_id(), "rId1");
    }
}
