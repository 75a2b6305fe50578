//! xlmerge - template mail-merge for XLSX workbooks
//!
//! Renders the `{{ variables }}` of a template sheet against JSON data:
//! - Append one rendered sheet per record to a single workbook
//! - Or produce one workbook per record, packed into a zip archive
//! - Untouched parts are copied through byte-identical
//! - Runs natively and in the browser via WebAssembly
//!
//! # Usage (Rust)
//!
//! ```no_run
//! use xlmerge::MergeEngine;
//!
//! # fn main() -> xlmerge::Result<()> {
//! let template = std::fs::read("invoice.xlsx")?;
//! let mut engine = MergeEngine::parse(&template)?;
//! engine.add_sheet("Acme", &serde_json::json!({ "AccountName": "Acme" }))?;
//! std::fs::write("out.xlsx", engine.generate()?)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Usage (JavaScript)
//!
//! ```javascript
//! import init, { merge_xlsx } from 'xlmerge';
//! await init();
//! const out = merge_xlsx(template, JSON.stringify({ AccountName: 'Acme' }));
//! ```

pub mod cell_ref;
pub mod engine;
pub mod error;
pub mod export;
pub mod namespaces;
pub mod options;
pub mod parts;
pub mod template;
pub mod xml_helpers;

use wasm_bindgen::prelude::*;

pub use engine::{MergeEngine, MergeRecord};
pub use error::{Result, XlmergeError};
pub use options::{Compression, MergeOptions};
pub use template::{has_variable, JinjaRenderer, Renderer};

fn parse_records(records_json: &str) -> Result<Vec<MergeRecord>> {
    Ok(serde_json::from_str(records_json)?)
}

fn parse_options(options: JsValue) -> std::result::Result<MergeOptions, JsValue> {
    if options.is_undefined() || options.is_null() {
        return Ok(MergeOptions::default());
    }
    serde_wasm_bindgen::from_value(options)
        .map_err(|e| JsValue::from_str(&format!("Invalid options: {e}")))
}

/// Render every template variable in place against one data object.
///
/// # Arguments
/// * `template` - The raw bytes of the template XLSX file
/// * `data_json` - A JSON object with the values to substitute
/// * `options` - Optional `MergeOptions` object (camelCase keys)
///
/// # Errors
/// Returns an error if the template is invalid or a variable fails to render.
#[wasm_bindgen]
pub fn merge_xlsx(
    template: &[u8],
    data_json: &str,
    options: JsValue,
) -> std::result::Result<Vec<u8>, JsValue> {
    let options = parse_options(options)?;
    let data: serde_json::Value =
        serde_json::from_str(data_json).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let engine = MergeEngine::parse_with_options(template, options)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    engine
        .merge(&data)
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Append one rendered sheet per `{ name, data }` record to a single workbook.
///
/// # Errors
/// Returns an error naming the first record that failed.
#[wasm_bindgen]
pub fn bulk_render_multi_sheet(
    template: &[u8],
    records_json: &str,
    options: JsValue,
) -> std::result::Result<Vec<u8>, JsValue> {
    let options = parse_options(options)?;
    let records = parse_records(records_json).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let engine = MergeEngine::parse_with_options(template, options)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    engine
        .bulk_render_multi_sheet(&records)
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Render one workbook per `{ name, data }` record and return them as a zip.
///
/// # Errors
/// Returns an error naming the first record that failed.
#[wasm_bindgen]
pub fn bulk_render_multi_file(
    template: &[u8],
    records_json: &str,
    options: JsValue,
) -> std::result::Result<Vec<u8>, JsValue> {
    let options = parse_options(options)?;
    let records = parse_records(records_json).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let engine = MergeEngine::parse_with_options(template, options)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    engine
        .bulk_render_multi_file(&records)
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

/// List the variable names used by the template sheet.
///
/// # Errors
/// Returns an error if the template is invalid.
#[wasm_bindgen]
pub fn template_variables(template: &[u8]) -> std::result::Result<JsValue, JsValue> {
    let engine = MergeEngine::parse(template).map_err(|e| JsValue::from_str(&e.to_string()))?;
    serde_wasm_bindgen::to_value(&engine.variables())
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {e}")))
}

/// Get the version of the library
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
