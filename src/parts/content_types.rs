//! `[Content_Types].xml`: per-part content type overrides.

use crate::error::Result;
use crate::xml_helpers::{write_start_tag, ChildNode, SplitDocument};

#[derive(Clone, Debug)]
pub struct ContentTypes {
    doc: SplitDocument,
    dirty: bool,
}

/// Content-type part names are package-rooted (`/xl/worksheets/sheet1.xml`).
fn part_name(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

impl ContentTypes {
    pub fn parse(xml: &str) -> Result<Self> {
        Ok(Self {
            doc: SplitDocument::parse(xml, "Types")?,
            dirty: false,
        })
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Content type declared for a zip path, by override or by extension default.
    pub fn content_type(&self, path: &str) -> Option<&str> {
        let name = part_name(path);
        if let Some(node) = self
            .doc
            .elements("Override")
            .find(|node| node.attr("PartName") == Some(name.as_str()))
        {
            return node.attr("ContentType");
        }
        let extension = path.rsplit_once('.').map(|(_, ext)| ext)?;
        self.doc
            .elements("Default")
            .find(|node| {
                node.attr("Extension")
                    .is_some_and(|e| e.eq_ignore_ascii_case(extension))
            })
            .and_then(|node| node.attr("ContentType"))
    }

    /// Declare `content_type` for the part at zip path `path`.
    pub fn add_override(&mut self, path: &str, content_type: &str) {
        let name = part_name(path);
        self.remove_override(&name);
        let attrs = vec![
            ("PartName".to_string(), name),
            ("ContentType".to_string(), content_type.to_string()),
        ];
        let raw = write_start_tag(&self.doc.qualify("Override"), &attrs, true);
        self.doc
            .insert_after_last("Override", ChildNode::element("Override", attrs, raw));
        self.dirty = true;
    }

    pub fn remove_override(&mut self, path: &str) -> bool {
        let name = part_name(path);
        let before = self.doc.children.len();
        self.doc
            .children
            .retain(|node| !(node.is("Override") && node.attr("PartName") == Some(name.as_str())));
        let removed = self.doc.children.len() != before;
        self.dirty |= removed;
        removed
    }

    pub fn to_xml(&self) -> String {
        self.doc.to_xml()
    }
}
