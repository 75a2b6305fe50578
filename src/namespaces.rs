//! Package constants: relationship types, content types, conventional paths.
//!
//! Different producers use transitional or strict OOXML relationship types;
//! the `is_*` helpers accept both.

// =============================================================================
// Office document relationship types
// =============================================================================

/// Relationship type for worksheets
pub const REL_WORKSHEET: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";

/// Relationship type for shared strings
pub const REL_SHARED_STRINGS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings";

/// Relationship type for workbook (from root .rels)
pub const REL_WORKBOOK: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";

/// Strict relationship type for worksheets
pub const REL_WORKSHEET_STRICT: &str =
    "http://purl.oclc.org/ooxml/officeDocument/relationships/worksheet";

/// Strict relationship type for shared strings
pub const REL_SHARED_STRINGS_STRICT: &str =
    "http://purl.oclc.org/ooxml/officeDocument/relationships/sharedStrings";

/// Strict relationship type for the workbook
pub const REL_WORKBOOK_STRICT: &str =
    "http://purl.oclc.org/ooxml/officeDocument/relationships/officeDocument";

// =============================================================================
// Content types
// =============================================================================

/// Content type of a worksheet part.
pub const CT_WORKSHEET: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";

// =============================================================================
// Conventional part paths
// =============================================================================

pub const PATH_CONTENT_TYPES: &str = "[Content_Types].xml";
pub const PATH_ROOT_RELS: &str = "_rels/.rels";
pub const PATH_WORKBOOK: &str = "xl/workbook.xml";

/// Check if a relationship type is for worksheets.
pub fn is_worksheet_relationship(rel_type: &str) -> bool {
    rel_type == REL_WORKSHEET
        || rel_type == REL_WORKSHEET_STRICT
        || rel_type.ends_with("/worksheet")
}

/// Check if a relationship type is for shared strings.
pub fn is_shared_strings_relationship(rel_type: &str) -> bool {
    rel_type == REL_SHARED_STRINGS
        || rel_type == REL_SHARED_STRINGS_STRICT
        || rel_type.ends_with("/sharedStrings")
}

/// Check if a relationship type points at the main workbook part.
pub fn is_workbook_relationship(rel_type: &str) -> bool {
    rel_type == REL_WORKBOOK || rel_type == REL_WORKBOOK_STRICT
}

/// Directory part of a zip path (`"xl/workbook.xml"` -> `"xl"`).
pub fn part_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Path of the relationships part belonging to `path`
/// (`"xl/workbook.xml"` -> `"xl/_rels/workbook.xml.rels"`).
pub fn rels_path_for(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{path}.rels"),
    }
}

/// Resolve a relationship target against the directory of its source part.
///
/// Absolute targets (leading `/`) are package-rooted; `..` segments are
/// collapsed.
pub fn resolve_target(base_dir: &str, target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None if base_dir.is_empty() => target.to_string(),
        None => format!("{base_dir}/{target}"),
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Express `path` relative to `base_dir`, when it lies underneath it.
pub fn relative_target(base_dir: &str, path: &str) -> String {
    if base_dir.is_empty() {
        return path.to_string();
    }
    path.strip_prefix(base_dir)
        .and_then(|rest| rest.strip_prefix('/'))
        .map_or_else(|| format!("/{path}"), str::to_string)
}
