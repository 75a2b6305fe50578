//! Helpers for reading parts back out of generated packages.
//!
//! These read the XML directly with quick-xml instead of going through
//! xlmerge, so assertions do not depend on the code under test.
#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;

// Re-export fixtures for convenience
pub use super::fixtures::*;

/// Read a part as text, `None` when the archive has no such entry.
#[must_use]
pub fn read_part(data: &[u8], path: &str) -> Option<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).expect("Failed to open ZIP archive");
    let mut file = archive.by_name(path).ok()?;
    let mut text = String::new();
    file.read_to_string(&mut text).expect("part is UTF-8");
    Some(text)
}

/// Entry names of the archive, in archive order.
#[must_use]
pub fn part_names(data: &[u8]) -> Vec<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).expect("Failed to open ZIP archive");
    (0..archive.len())
        .map(|i| archive.by_index(i).expect("entry").name().to_string())
        .collect()
}

fn attr(e: &quick_xml::events::BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| a.unescape_value().unwrap().into_owned())
}

/// Text of every shared string, in table order.
#[must_use]
pub fn shared_strings(data: &[u8]) -> Vec<String> {
    let Some(xml) = read_part(data, "xl/sharedStrings.xml") else {
        return Vec::new();
    };
    let mut reader = Reader::from_str(&xml);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event().unwrap() {
            Event::Start(e) if e.local_name().as_ref() == b"si" => current = Some(String::new()),
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_t = true,
            Event::End(e) if e.local_name().as_ref() == b"t" => in_t = false,
            Event::End(e) if e.local_name().as_ref() == b"si" => {
                strings.push(current.take().unwrap_or_default());
            }
            Event::Text(t) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&t.unescape().unwrap());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    strings
}

/// Declared (`count`, `uniqueCount`) of the shared-string table.
#[must_use]
pub fn shared_string_counts(data: &[u8]) -> (Option<usize>, Option<usize>) {
    let xml = read_part(data, "xl/sharedStrings.xml").expect("shared strings part");
    let mut reader = Reader::from_str(&xml);
    loop {
        match reader.read_event().unwrap() {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sst" => {
                return (
                    attr(&e, b"count").map(|v| v.parse().unwrap()),
                    attr(&e, b"uniqueCount").map(|v| v.parse().unwrap()),
                );
            }
            Event::Eof => panic!("no <sst> element"),
            _ => {}
        }
    }
}

/// A `<sheet>` entry of the workbook part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetEntry {
    pub name: String,
    pub sheet_id: String,
    pub rel_id: String,
}

/// Sheets listed in `xl/workbook.xml`, in tab order.
#[must_use]
pub fn workbook_sheets(data: &[u8]) -> Vec<SheetEntry> {
    let xml = read_part(data, "xl/workbook.xml").expect("workbook part");
    let mut reader = Reader::from_str(&xml);
    let mut sheets = Vec::new();
    loop {
        match reader.read_event().unwrap() {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                sheets.push(SheetEntry {
                    name: attr(&e, b"name").unwrap(),
                    sheet_id: attr(&e, b"sheetId").unwrap(),
                    rel_id: attr(&e, b"r:id").unwrap(),
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }
    sheets
}

#[must_use]
pub fn sheet_names(data: &[u8]) -> Vec<String> {
    workbook_sheets(data).into_iter().map(|s| s.name).collect()
}

/// (Id, Type, Target) of every workbook relationship.
#[must_use]
pub fn workbook_relationships(data: &[u8]) -> Vec<(String, String, String)> {
    let xml = read_part(data, "xl/_rels/workbook.xml.rels").expect("workbook rels part");
    let mut reader = Reader::from_str(&xml);
    let mut rels = Vec::new();
    loop {
        match reader.read_event().unwrap() {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                rels.push((
                    attr(&e, b"Id").unwrap(),
                    attr(&e, b"Type").unwrap(),
                    attr(&e, b"Target").unwrap(),
                ));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    rels
}

/// Zip path of the sheet named `name`, resolved through the workbook rels.
#[must_use]
pub fn sheet_path(data: &[u8], name: &str) -> Option<String> {
    let sheet = workbook_sheets(data).into_iter().find(|s| s.name == name)?;
    let (_, _, target) = workbook_relationships(data)
        .into_iter()
        .find(|(id, _, _)| *id == sheet.rel_id)?;
    Some(format!("xl/{target}"))
}

/// (address, shared index) of every shared-string cell in a sheet part.
#[must_use]
pub fn shared_string_cells(data: &[u8], path: &str) -> Vec<(String, usize)> {
    let xml = read_part(data, path).expect("sheet part");
    let mut reader = Reader::from_str(&xml);
    let mut cells = Vec::new();
    let mut current: Option<String> = None;
    let mut in_v = false;
    loop {
        match reader.read_event().unwrap() {
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                current = (attr(&e, b"t").as_deref() == Some("s"))
                    .then(|| attr(&e, b"r").unwrap());
            }
            Event::End(e) if e.local_name().as_ref() == b"c" => current = None,
            Event::Start(e) if e.local_name().as_ref() == b"v" => in_v = true,
            Event::End(e) if e.local_name().as_ref() == b"v" => in_v = false,
            Event::Text(t) if in_v => {
                if let Some(address) = current.as_ref() {
                    cells.push((address.clone(), t.unescape().unwrap().parse().unwrap()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    cells
}

/// Text of the shared-string cell `address` on the sheet named `sheet`.
#[must_use]
pub fn cell_text(data: &[u8], sheet: &str, address: &str) -> Option<String> {
    let path = sheet_path(data, sheet)?;
    let (_, index) = shared_string_cells(data, &path)
        .into_iter()
        .find(|(a, _)| a == address)?;
    shared_strings(data).get(index).cloned()
}

/// Assert the cross-part invariants every generated package must satisfy.
pub fn assert_package_consistent(data: &[u8]) {
    let strings = shared_strings(data);
    if read_part(data, "xl/sharedStrings.xml").is_some() {
        let (count, unique) = shared_string_counts(data);
        assert_eq!(count, Some(strings.len()), "count matches table length");
        assert_eq!(unique, Some(strings.len()), "uniqueCount matches table length");
    }

    let names = part_names(data);
    let content_types = read_part(data, "[Content_Types].xml").expect("content types part");
    let rels = workbook_relationships(data);
    for sheet in workbook_sheets(data) {
        assert!(
            rels.iter().any(|(id, _, _)| *id == sheet.rel_id),
            "sheet {} has relationship {}",
            sheet.name,
            sheet.rel_id
        );
        let path = sheet_path(data, &sheet.name).unwrap();
        assert!(names.contains(&path), "sheet part {path} exists");
        assert!(
            content_types.contains(&format!(r#"PartName="/{path}""#)),
            "content type override for {path}"
        );
        for (address, index) in shared_string_cells(data, &path) {
            assert!(
                index < strings.len(),
                "{path}!{address} index {index} within {} strings",
                strings.len()
            );
        }
    }

    let mut ids: Vec<&String> = rels.iter().map(|(id, _, _)| id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), rels.len(), "relationship ids are unique");
}
