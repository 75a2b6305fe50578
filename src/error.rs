//! Structured error types for xlmerge.
//!
//! Lookups that routinely miss (unknown sheet names, unknown relationship ids)
//! return `Option` instead of an error.

/// All errors that can occur while parsing, merging or writing a package.
#[derive(Debug, thiserror::Error)]
pub enum XlmergeError {
    /// A required part is missing, unparsable, or structurally wrong.
    #[error("Package format: {0}")]
    PackageFormat(String),

    /// The template renderer rejected a template/data pair.
    #[error("Render error in {template:?}: {message}")]
    Render { template: String, message: String },

    /// A sheet name was rejected, or a delete would leave the workbook empty.
    #[error("Invalid sheet name {name:?}: {reason}")]
    InvalidSheetName { name: String, reason: String },

    /// One record of a batch failed. Records before `index` stay committed.
    #[error("Batch record {index} ({name}) failed: {source}")]
    Batch {
        index: usize,
        name: String,
        #[source]
        source: Box<XlmergeError>,
    },

    /// XML parsing error from quick-xml.
    #[error("XML parsing: {0}")]
    Xml(#[from] quick_xml::Error),

    /// ZIP archive error.
    #[error("ZIP archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Binding data could not be decoded.
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, XlmergeError>;

impl XlmergeError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::PackageFormat(msg.into())
    }
}

impl From<quick_xml::events::attributes::AttrError> for XlmergeError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml(e.into())
    }
}

impl From<String> for XlmergeError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for XlmergeError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}
