//! Merge configuration.
//!
//! Options are fixed when a template is parsed. Hosts can load them from JSON;
//! every field is optional there.

use serde::{Deserialize, Serialize};

/// Compression used for parts the merge writes. Untouched parts keep theirs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Deflated,
    Stored,
}

impl From<Compression> for zip::CompressionMethod {
    fn from(c: Compression) -> Self {
        match c {
            Compression::Deflated => Self::Deflated,
            Compression::Stored => Self::Stored,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MergeOptions {
    /// Fail on undefined variables instead of rendering them empty.
    pub strict_variables: bool,
    /// Template sheet name. Defaults to the first sheet of the workbook.
    pub template_sheet: Option<String>,
    /// Drop the template sheet from multi-sheet batch output.
    pub remove_template_sheet: bool,
    pub compression: Compression,
}

impl MergeOptions {
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
