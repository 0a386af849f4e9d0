/*!
 * Office Open XML (`.xlsx`) import and export.
 *
 * Only the first worksheet is read. Strings are written inline so the
 * workbook needs no shared-string table; on read, shared strings, inline
 * strings, formula strings, booleans and numbers are all accepted. Phonetic
 * runs (`rPh`) in shared strings are skipped.
 */

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, anyhow};
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::errors::StoreError;

use super::address::{column_index, column_letter, split_address};
use super::package::{attribute, escape_text, write_package, Member, Package};
use super::{Cell, Store, DEFAULT_SHEET_NAME};

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

const DEFAULT_SHEET_PATH: &str = "xl/worksheets/sheet1.xml";

/// Read the first worksheet of a workbook
pub fn read(path: &Path) -> Result<Store, StoreError> {
    read_workbook(path).map_err(|e| StoreError::decode(path, format!("{:#}", e)))
}

fn read_workbook(path: &Path) -> anyhow::Result<Store> {
    let mut package = Package::open(path)?;

    let (sheet_name, relation) = match package.entry("xl/workbook.xml")? {
        Some(xml) => first_sheet(&xml)?,
        None => return Err(anyhow!("missing xl/workbook.xml")),
    };

    let mut sheet_path = DEFAULT_SHEET_PATH.to_string();
    if let (Some(relation), Some(rels)) = (relation, package.entry("xl/_rels/workbook.xml.rels")?) {
        if let Some(target) = relationship_target(&rels, &relation)? {
            sheet_path = match target.strip_prefix('/') {
                Some(absolute) => absolute.to_string(),
                None => format!("xl/{}", target),
            };
        }
    }

    let shared = match package.entry("xl/sharedStrings.xml")? {
        Some(xml) => shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheet = package
        .entry(&sheet_path)?
        .ok_or_else(|| anyhow!("missing worksheet {}", sheet_path))?;
    let rows = worksheet_rows(&sheet, &shared)?;

    Ok(Store::from_rows(sheet_name.unwrap_or_else(|| DEFAULT_SHEET_NAME.to_string()), rows))
}

/// Name and relationship id of the first `<sheet>` in the workbook
fn first_sheet(xml: &[u8]) -> anyhow::Result<(Option<String>, Option<String>)> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read workbook")? {
            Event::Eof => return Ok((None, None)),
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                return Ok((attribute(&e, b"name")?, attribute(&e, b"id")?));
            }
            _ => {}
        }
    }
}

fn relationship_target(xml: &[u8], id: &str) -> anyhow::Result<Option<String>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read relationships")? {
            Event::Eof => return Ok(None),
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if attribute(&e, b"Id")?.as_deref() == Some(id) {
                    return attribute(&e, b"Target");
                }
            }
            _ => {}
        }
    }
}

/// Shared string table, one entry per `<si>`
fn shared_strings(xml: &[u8]) -> anyhow::Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut phonetic_depth = 0usize;

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read shared strings")? {
            Event::Eof => break,
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => phonetic_depth += 1,
                b"t" => in_text = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"t" => in_text = false,
                _ => {}
            },
            Event::Text(t) if in_text && phonetic_depth == 0 => {
                current.push_str(&t.unescape().context("unescape shared string")?);
            }
            Event::CData(t) if in_text && phonetic_depth == 0 => {
                current.push_str(&String::from_utf8_lossy(&t.into_inner()));
            }
            _ => {}
        }
    }
    Ok(strings)
}

/// Kind of value a `<c>` element carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Shared,
    Inline,
    Boolean,
    Plain,
}

/// Collect worksheet cells into dense rows
fn worksheet_rows(xml: &[u8], shared: &[String]) -> anyhow::Result<Vec<Vec<Cell>>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut cells: HashMap<(usize, usize), String> = HashMap::new();
    let mut max_row = 0usize;
    let mut max_column = 0usize;

    let mut row = 0usize;
    let mut column = 0usize;
    let mut kind = CellKind::Plain;
    let mut value: Option<String> = None;
    let mut capturing = false;

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read worksheet")? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                row = match attribute(&e, b"r")? {
                    Some(r) => r.trim().parse().context("row number")?,
                    None => row + 1,
                };
                column = 0;
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                column = cell_column(attribute(&e, b"r")?, row, column)?;
                kind = match attribute(&e, b"t")?.as_deref() {
                    Some("s") => CellKind::Shared,
                    Some("inlineStr") => CellKind::Inline,
                    Some("b") => CellKind::Boolean,
                    _ => CellKind::Plain,
                };
                value = None;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                column = cell_column(attribute(&e, b"r")?, row, column)?;
            }
            Event::Start(e) => match e.local_name().as_ref() {
                b"v" => capturing = kind != CellKind::Inline,
                b"t" => capturing = kind == CellKind::Inline,
                b"rPh" => capturing = false,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => capturing = false,
                b"c" => {
                    if let Some(raw) = value.take() {
                        let text = match kind {
                            CellKind::Shared => {
                                let index: usize = raw.trim().parse().context("shared string index")?;
                                shared
                                    .get(index)
                                    .cloned()
                                    .ok_or_else(|| anyhow!("shared string {} out of range", index))?
                            }
                            CellKind::Boolean => {
                                if raw.trim() == "1" { "TRUE".to_string() } else { "FALSE".to_string() }
                            }
                            CellKind::Inline | CellKind::Plain => raw,
                        };
                        if row > 0 && column > 0 {
                            max_row = max_row.max(row);
                            max_column = max_column.max(column);
                            cells.insert((row, column), text);
                        }
                    }
                }
                _ => {}
            },
            Event::Text(t) if capturing => {
                value
                    .get_or_insert_with(String::new)
                    .push_str(&t.unescape().context("unescape cell")?);
            }
            Event::CData(t) if capturing => {
                value
                    .get_or_insert_with(String::new)
                    .push_str(&String::from_utf8_lossy(&t.into_inner()));
            }
            _ => {}
        }
    }

    let mut rows = vec![vec![None; max_column]; max_row];
    for ((r, c), text) in cells {
        rows[r - 1][c - 1] = Some(text);
    }
    Ok(rows)
}

/// Column of a `<c>` element: from its `r` attribute, else the next one along
fn cell_column(reference: Option<String>, row: usize, previous: usize) -> anyhow::Result<usize> {
    let Some(reference) = reference else {
        return Ok(previous + 1);
    };
    let (letters, cell_row) = split_address(&reference)?;
    if row != 0 && cell_row != row {
        return Err(anyhow!("cell {} outside row {}", reference, row));
    }
    Ok(column_index(letters)?)
}

/// Write the store as a single-sheet workbook with inline strings
pub fn write(store: &Store, path: &Path) -> Result<(), StoreError> {
    let workbook = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        quick_xml::escape::escape(store.sheet_name())
    );

    let mut sheet = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, row) in store.raw_rows().iter().enumerate() {
        let row_number = r + 1;
        sheet.push_str(&format!(r#"<row r="{}">"#, row_number));
        for (c, cell) in row.iter().enumerate() {
            let Some(text) = cell else { continue };
            sheet.push_str(&format!(
                r#"<c r="{}{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                column_letter(c + 1),
                row_number,
                escape_text(text)
            ));
        }
        sheet.push_str("</row>");
    }
    sheet.push_str("</sheetData></worksheet>");

    write_package(
        path,
        vec![
            Member { name: "[Content_Types].xml", data: CONTENT_TYPES.as_bytes().to_vec(), stored: false },
            Member { name: "_rels/.rels", data: ROOT_RELS.as_bytes().to_vec(), stored: false },
            Member { name: "xl/workbook.xml", data: workbook.into_bytes(), stored: false },
            Member { name: "xl/_rels/workbook.xml.rels", data: WORKBOOK_RELS.as_bytes().to_vec(), stored: false },
            Member { name: DEFAULT_SHEET_PATH, data: sheet.into_bytes(), stored: false },
        ],
    )
}
