//! Merge orchestration over a parsed template package.
//!
//! [`MergeEngine::parse`] is the only constructor, so every engine holds a
//! complete model: content types, workbook manifest, workbook relationships,
//! shared strings, sheet parts and the template model. `add_sheet` and
//! `delete_sheet` update these in lockstep; `generate` writes them back over
//! the source archive.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::{Result, XlmergeError};
use crate::export::{patch_zip, write_archive};
use crate::namespaces::{
    is_workbook_relationship, part_dir, rels_path_for, relative_target, resolve_target,
    CT_WORKSHEET, PATH_CONTENT_TYPES, PATH_ROOT_RELS, PATH_WORKBOOK,
};
use crate::options::MergeOptions;
use crate::parts::{
    validate_sheet_name, ContentTypes, RelationshipTable, SharedStringTable, SheetPart,
    SheetPartCollection, TemplateModel, WorkbookManifest,
};
use crate::template::{JinjaRenderer, Renderer};

const OUTPUT_EXTENSION: &str = ".xlsx";

/// One record of a batch: the output name and the data bound to the template.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

impl MergeRecord {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

#[derive(Clone)]
pub struct MergeEngine {
    source: Arc<[u8]>,
    options: MergeOptions,
    renderer: Arc<dyn Renderer + Send + Sync>,
    workbook_path: String,
    workbook_rels_path: String,
    shared_strings_path: String,
    content_types: Option<ContentTypes>,
    manifest: WorkbookManifest,
    relationships: RelationshipTable,
    shared_strings: SharedStringTable,
    sheets: SheetPartCollection,
    template: TemplateModel,
}

impl fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeEngine")
            .field("workbook_path", &self.workbook_path)
            .field("sheets", &self.manifest.len())
            .field("shared_strings", &self.shared_strings.len())
            .field("template", &self.template.sheet_name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Read a part as text; `None` when the archive has no such entry.
fn read_optional<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
) -> Result<Option<String>> {
    let mut file = match archive.by_name(path) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut text = String::with_capacity(usize::try_from(file.size()).unwrap_or(0));
    file.read_to_string(&mut text)?;
    Ok(Some(text))
}

fn read_required<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
) -> Result<String> {
    read_optional(archive, path)?
        .ok_or_else(|| XlmergeError::format(format!("missing required part {path}")))
}

/// Parse a part, reporting any failure as a package format error for `path`.
fn parse_part<T>(path: &str, parse: impl FnOnce() -> Result<T>) -> Result<T> {
    parse().map_err(|e| match e {
        XlmergeError::PackageFormat(msg) => XlmergeError::format(format!("{path}: {msg}")),
        other => XlmergeError::format(format!("{path}: {other}")),
    })
}

/// Zip path of the main workbook part, from the package root relationships.
fn locate_workbook<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
    let Some(xml) = read_optional(archive, PATH_ROOT_RELS)? else {
        return Ok(PATH_WORKBOOK.to_string());
    };
    let rels = parse_part(PATH_ROOT_RELS, || RelationshipTable::parse(&xml))?;
    Ok(rels
        .relationships()
        .into_iter()
        .find(|rel| is_workbook_relationship(&rel.rel_type))
        .map_or_else(
            || PATH_WORKBOOK.to_string(),
            |rel| resolve_target("", &rel.target),
        ))
}

/// Output file name for a record: its name, with `.xlsx` appended if missing.
fn output_file_name(name: &str) -> String {
    let has_extension = name
        .len()
        .checked_sub(OUTPUT_EXTENSION.len())
        .and_then(|start| name.get(start..))
        .is_some_and(|ext| ext.eq_ignore_ascii_case(OUTPUT_EXTENSION));
    if has_extension {
        name.to_string()
    } else {
        format!("{name}{OUTPUT_EXTENSION}")
    }
}

impl MergeEngine {
    /// Parse a template package with default options.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_with_options(data, MergeOptions::default())
    }

    pub fn parse_with_options(data: &[u8], options: MergeOptions) -> Result<Self> {
        let renderer = JinjaRenderer::new(options.strict_variables);
        Self::with_renderer(data, options, renderer)
    }

    /// Parse a template package, rendering variables with `renderer`.
    pub fn with_renderer(
        data: &[u8],
        options: MergeOptions,
        renderer: impl Renderer + Send + Sync + 'static,
    ) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(data))
            .map_err(|e| XlmergeError::format(format!("not a zip archive: {e}")))?;

        let content_types = read_optional(&mut archive, PATH_CONTENT_TYPES)?
            .map(|xml| parse_part(PATH_CONTENT_TYPES, || ContentTypes::parse(&xml)))
            .transpose()?;

        let workbook_path = locate_workbook(&mut archive)?;
        let base = part_dir(&workbook_path).to_string();
        let workbook_xml = read_required(&mut archive, &workbook_path)?;
        let manifest = parse_part(&workbook_path, || WorkbookManifest::parse(&workbook_xml))?;

        let workbook_rels_path = rels_path_for(&workbook_path);
        let rels_xml = read_required(&mut archive, &workbook_rels_path)?;
        let relationships =
            parse_part(&workbook_rels_path, || RelationshipTable::parse(&rels_xml))?;

        let shared_strings_path = resolve_target(
            &base,
            relationships
                .shared_strings_target()
                .unwrap_or("sharedStrings.xml"),
        );
        let mut shared_strings = match read_optional(&mut archive, &shared_strings_path)? {
            Some(xml) => parse_part(&shared_strings_path, || SharedStringTable::parse(&xml))?,
            None => SharedStringTable::absent(),
        };

        let mut sheets = SheetPartCollection::default();
        for (id, target) in relationships.worksheets() {
            let path = resolve_target(&base, &target);
            let Some(xml) = read_optional(&mut archive, &path)? else {
                warn!(id = %id, path = %path, "worksheet relationship has no part");
                continue;
            };
            let rels = read_optional(&mut archive, &rels_path_for(&path))?;
            let part = parse_part(&path, || SheetPart::parse(xml))?.with_rels(rels);
            if let Some(cell) = part
                .shared_string_cells()
                .iter()
                .find(|cell| cell.index >= shared_strings.len())
            {
                warn!(
                    path = %path,
                    cell = %cell.address,
                    index = cell.index,
                    "shared string index past the end of the table"
                );
            }
            sheets.insert_original(path, part);
        }
        shared_strings.compute_using_cells(sheets.iter().map(|(_, part)| part));

        let template_name = options
            .template_sheet
            .clone()
            .or_else(|| manifest.first_sheet_name())
            .ok_or_else(|| XlmergeError::format("workbook has no sheets"))?;
        let template_rel = manifest
            .find_relationship_id(&template_name)
            .ok_or_else(|| {
                XlmergeError::format(format!("template sheet {template_name:?} not found"))
            })?;
        let template_path = relationships
            .find_target_path(&template_rel)
            .map(|target| resolve_target(&base, target))
            .ok_or_else(|| {
                XlmergeError::format(format!(
                    "template sheet {template_name:?} has no relationship {template_rel}"
                ))
            })?;
        let template = sheets
            .template_model(&template_name, &template_path, &shared_strings)
            .ok_or_else(|| {
                XlmergeError::format(format!("missing template sheet part {template_path}"))
            })?;
        let shared_targets = parse_part(&rels_path_for(&template_path), || {
            template.part().single_owner_targets()
        })?;
        if !shared_targets.is_empty() {
            warn!(
                template = %template_name,
                targets = ?shared_targets,
                "added sheets share these parts with the template"
            );
        }

        debug!(
            workbook = %workbook_path,
            sheets = manifest.len(),
            relationships = relationships.len(),
            shared_strings = shared_strings.len(),
            template = %template_name,
            variable_cells = template.variable_cells().len(),
            "parsed template package"
        );

        Ok(Self {
            source: Arc::from(data),
            options,
            renderer: Arc::new(renderer),
            workbook_path,
            workbook_rels_path,
            shared_strings_path,
            content_types,
            manifest,
            relationships,
            shared_strings,
            sheets,
            template,
        })
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    pub fn manifest(&self) -> &WorkbookManifest {
        &self.manifest
    }

    pub fn relationships(&self) -> &RelationshipTable {
        &self.relationships
    }

    pub fn shared_strings(&self) -> &SharedStringTable {
        &self.shared_strings
    }

    pub fn sheets(&self) -> &SheetPartCollection {
        &self.sheets
    }

    pub fn template(&self) -> &TemplateModel {
        &self.template
    }

    pub fn content_types(&self) -> Option<&ContentTypes> {
        self.content_types.as_ref()
    }

    /// Zip path of the workbook part.
    pub fn workbook_path(&self) -> &str {
        &self.workbook_path
    }

    /// Zip path of the sheet named `name`.
    pub fn sheet_path(&self, name: &str) -> Option<String> {
        let id = self.manifest.find_relationship_id(name)?;
        let target = self.relationships.find_target_path(&id)?;
        Some(resolve_target(part_dir(&self.workbook_path), target))
    }

    /// The part of the sheet named `name`.
    pub fn sheet_part(&self, name: &str) -> Option<&SheetPart> {
        self.sheet_path(name)
            .and_then(|path| self.sheets.find(&path))
    }

    /// Variable names used by the template sheet, sorted and de-duplicated.
    pub fn variables(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self
            .template
            .variable_indices()
            .iter()
            .filter_map(|&index| self.shared_strings.get(index))
            .flat_map(|entry| entry.template_variable_slots.iter())
            .collect();
        names.into_iter().cloned().collect()
    }

    pub fn has_shared_string(&self, text: &str) -> bool {
        self.shared_strings.contains_text(text)
    }

    fn check_new_sheet_name(&self, name: &str) -> Result<()> {
        let invalid = |reason: &str| XlmergeError::InvalidSheetName {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        validate_sheet_name(name).map_err(invalid)?;
        if self.manifest.contains(name) {
            return Err(invalid("a sheet with this name already exists"));
        }
        Ok(())
    }

    /// Append a sheet named `name`: a copy of the template with its variables
    /// rendered against `data`.
    ///
    /// Only entries referenced by the template sheet are rendered; variables
    /// used on other sheets are never looked up, even in strict mode.
    /// Rendering happens before any table is touched, so a failed call leaves
    /// the model unchanged.
    pub fn add_sheet(&mut self, name: &str, data: &Value) -> Result<()> {
        self.check_new_sheet_name(name)?;
        let mut rendered = self.shared_strings.render_entries(
            self.template.variable_indices(),
            data,
            &*self.renderer,
        )?;

        let base = part_dir(&self.workbook_path).to_string();
        let (id, path) = loop {
            let id = self.relationships.next_id();
            let path = resolve_target(&base, &format!("worksheets/sheet{id}.xml"));
            if self.sheets.find(&path).is_none() {
                break (id, path);
            }
        };

        self.relationships.add(&id, &relative_target(&base, &path));
        let sheet_id = self.manifest.add(name, &id);
        let appended = self.shared_strings.append(&mut rendered);
        let part = self.template.clone_with_rendered_strings(&rendered);
        if let Some(content_types) = self.content_types.as_mut() {
            content_types.add_override(&path, CT_WORKSHEET);
        }
        self.sheets.add(path.as_str(), part);

        debug!(
            sheet = name,
            sheet_id = %sheet_id,
            relationship = %id,
            path = %path,
            rendered = rendered.len(),
            appended,
            "added sheet"
        );
        Ok(())
    }

    /// Add one sheet per record, in order.
    ///
    /// Stops at the first failing record. Sheets added before it stay in the
    /// model.
    pub fn add_sheets(&mut self, records: &[MergeRecord]) -> Result<()> {
        for (index, record) in records.iter().enumerate() {
            self.add_sheet(&record.name, &record.data)
                .map_err(|source| XlmergeError::Batch {
                    index,
                    name: record.name.clone(),
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }

    /// Delete the sheet named `name` with its relationship, part, content-type
    /// override and sheet-level relationships.
    ///
    /// Returns `false` when no such sheet exists. Shared strings only the
    /// deleted sheet referenced are kept.
    pub fn delete_sheet(&mut self, name: &str) -> Result<bool> {
        let Some(id) = self.manifest.find_relationship_id(name) else {
            return Ok(false);
        };
        if self.manifest.len() <= 1 {
            return Err(XlmergeError::InvalidSheetName {
                name: name.to_string(),
                reason: "a workbook must keep at least one sheet".to_string(),
            });
        }

        let path = self.sheet_path(name);
        self.manifest.remove(name);
        self.relationships.remove(&id);
        if let Some(path) = path.as_deref() {
            self.sheets.remove(path);
            if let Some(content_types) = self.content_types.as_mut() {
                content_types.remove_override(path);
            }
        }

        debug!(sheet = name, relationship = %id, path = ?path, "deleted sheet");
        Ok(true)
    }

    /// Delete the template sheet. Later `add_sheet` calls still use the
    /// template, which the model keeps its own copy of.
    pub fn delete_template_sheet(&mut self) -> Result<bool> {
        let name = self.template.sheet_name().to_string();
        self.delete_sheet(&name)
    }

    /// Write the package with every change made since parse.
    ///
    /// Parts that were not modified are copied from the source archive
    /// unchanged; an unmodified model yields the source bytes.
    pub fn generate(&self) -> Result<Vec<u8>> {
        let mut written: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut removed: BTreeSet<String> = BTreeSet::new();

        if self.manifest.is_dirty() {
            written.insert(self.workbook_path.clone(), self.manifest.to_xml()?.into_bytes());
        }
        if self.relationships.is_dirty() {
            written.insert(
                self.workbook_rels_path.clone(),
                self.relationships.to_xml().into_bytes(),
            );
        }
        if self.shared_strings.is_dirty() {
            if let Some(xml) = self.shared_strings.to_xml() {
                written.insert(self.shared_strings_path.clone(), xml.into_bytes());
            }
        }
        if let Some(content_types) = self.content_types.as_ref().filter(|c| c.is_dirty()) {
            written.insert(PATH_CONTENT_TYPES.to_string(), content_types.to_xml().into_bytes());
        }
        for (path, part) in self.sheets.written() {
            written.insert(path.to_string(), part.xml().as_bytes().to_vec());
            if let Some(rels) = part.rels() {
                written.insert(rels_path_for(path), rels.as_bytes().to_vec());
            }
        }
        for path in self.sheets.removed() {
            removed.insert(path.to_string());
            removed.insert(rels_path_for(path));
        }

        if written.is_empty() && removed.is_empty() {
            return Ok(self.source.to_vec());
        }
        debug!(written = written.len(), removed = removed.len(), "writing package");
        patch_zip(&self.source, &written, &removed, self.options.compression)
    }

    /// Render every variable string in place against `data` and write the
    /// package. No sheet is added and this engine is left unchanged.
    pub fn merge(&self, data: &Value) -> Result<Vec<u8>> {
        let mut merged = self.clone();
        let rendered = merged
            .shared_strings
            .render_variable_entries(data, &*self.renderer)?;
        merged.shared_strings.replace_rendered(&rendered);
        merged.generate()
    }

    /// Add one sheet per record to a copy of this model and write it as a
    /// single workbook. The template sheet is dropped afterwards when
    /// `remove_template_sheet` is set.
    pub fn bulk_render_multi_sheet(&self, records: &[MergeRecord]) -> Result<Vec<u8>> {
        let mut merged = self.clone();
        merged.add_sheets(records)?;
        if merged.options.remove_template_sheet && !records.is_empty() {
            merged.delete_template_sheet()?;
        }
        merged.generate()
    }

    /// Merge each record into its own workbook and pack them into one zip
    /// archive, one `<name>.xlsx` entry per record.
    pub fn bulk_render_multi_file(&self, records: &[MergeRecord]) -> Result<Vec<u8>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut files = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let batch_error = |source: XlmergeError| XlmergeError::Batch {
                index,
                name: record.name.clone(),
                source: Box::new(source),
            };
            let file_name = output_file_name(&record.name);
            if record.name.trim().is_empty() || !seen.insert(file_name.to_lowercase()) {
                return Err(batch_error(XlmergeError::Other(format!(
                    "duplicate or empty file name {file_name:?}"
                ))));
            }
            let bytes = self.merge(&record.data).map_err(batch_error)?;
            files.push((file_name, bytes));
        }
        debug!(files = files.len(), "writing workbook archive");
        write_archive(&files, self.options.compression)
    }
}
