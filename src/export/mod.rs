//! Package output.
//!
//! Produces the merged package by patching the original ZIP archive. Only
//! parts the merge modified are re-serialized; everything else is passed
//! through byte-identical.

pub(crate) mod zip_patcher;

pub(crate) use zip_patcher::{patch_zip, write_archive};
