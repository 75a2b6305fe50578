//! In-memory models of the package parts a merge touches.
//!
//! Each model keeps the original markup of everything it does not edit, so an
//! unmodified part serializes back to its source bytes.

pub mod content_types;
pub mod relationships;
pub mod shared_strings;
pub mod workbook;
pub mod worksheet;

pub use content_types::ContentTypes;
pub use relationships::{Relationship, RelationshipTable};
pub use shared_strings::{RenderedString, SharedStringEntry, SharedStringTable};
pub use workbook::{validate_sheet_name, SheetDescriptor, WorkbookManifest};
pub use worksheet::{SharedStringCell, SheetPart, SheetPartCollection, TemplateModel};
