/*!
 * OpenDocument spreadsheet (`.ods`) import and export.
 *
 * Repeated empty cells and rows (`number-columns-repeated`,
 * `number-rows-repeated`) are only materialized when something non-empty
 * follows them, so the usual 1024-column filler rows cost nothing.
 */

use std::path::Path;

use anyhow::{Context, anyhow};
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::errors::StoreError;

use super::package::{attribute, escape_text, write_package, Member, Package};
use super::{Cell, Store, DEFAULT_SHEET_NAME};

const MIMETYPE: &str = "application/vnd.oasis.opendocument.spreadsheet";

const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<manifest:manifest xmlns:manifest="urn:oasis:names:tc:opendocument:xmlns:manifest:1.0" manifest:version="1.2"><manifest:file-entry manifest:full-path="/" manifest:version="1.2" manifest:media-type="application/vnd.oasis.opendocument.spreadsheet"/><manifest:file-entry manifest:full-path="content.xml" manifest:media-type="text/xml"/></manifest:manifest>"#;

/// Read the first table of an OpenDocument spreadsheet
pub fn read(path: &Path) -> Result<Store, StoreError> {
    read_document(path).map_err(|e| StoreError::decode(path, format!("{:#}", e)))
}

fn read_document(path: &Path) -> anyhow::Result<Store> {
    let mut package = Package::open(path)?;
    let content = package
        .entry("content.xml")?
        .ok_or_else(|| anyhow!("missing content.xml"))?;
    let (name, rows) = first_table(&content)?;
    Ok(Store::from_rows(name.unwrap_or_else(|| DEFAULT_SHEET_NAME.to_string()), rows))
}

/// Accumulates one table row, deferring runs of empty cells
#[derive(Default)]
struct RowBuilder {
    cells: Vec<Cell>,
    pending_empty: usize,
}

impl RowBuilder {
    fn push(&mut self, value: Option<String>, repeat: usize) {
        match value {
            None => self.pending_empty += repeat,
            Some(text) => {
                self.cells.extend(std::iter::repeat_n(None, self.pending_empty));
                self.pending_empty = 0;
                self.cells.extend(std::iter::repeat_n(Some(text), repeat));
            }
        }
    }

    fn finish(self) -> Vec<Cell> {
        self.cells
    }
}

/// State of the cell currently being read
struct CellState {
    repeat: usize,
    paragraphs: Vec<String>,
    fallback: Option<String>,
    in_paragraph: bool,
}

impl CellState {
    fn value(self) -> Option<String> {
        if self.paragraphs.is_empty() {
            self.fallback
        } else {
            Some(self.paragraphs.join("\n"))
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(last) = self.paragraphs.last_mut() {
            last.push_str(text);
        }
    }
}

fn repeat_count(value: Option<String>) -> anyhow::Result<usize> {
    match value {
        Some(n) => Ok(n.trim().parse::<usize>().context("repeat count")?.max(1)),
        None => Ok(1),
    }
}

/// Name and rows of the first `<table:table>`
fn first_table(xml: &[u8]) -> anyhow::Result<(Option<String>, Vec<Vec<Cell>>)> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut name: Option<String> = None;
    let mut in_table = false;
    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let mut pending_empty_rows = 0usize;
    let mut row: Option<(RowBuilder, usize)> = None;
    let mut cell: Option<CellState> = None;

    loop {
        buf.clear();
        let event = reader.read_event_into(&mut buf).context("read content.xml")?;
        match event {
            Event::Eof => break,
            Event::Start(e) if e.local_name().as_ref() == b"table" => {
                if name.is_some() || in_table {
                    // Only the first table is read
                    break;
                }
                name = attribute(&e, b"name")?;
                in_table = true;
            }
            Event::End(e) if e.local_name().as_ref() == b"table" => break,
            _ if !in_table => {}

            Event::Start(e) if e.local_name().as_ref() == b"table-row" => {
                row = Some((RowBuilder::default(), repeat_count(attribute(&e, b"number-rows-repeated")?)?));
            }
            Event::Empty(e) if e.local_name().as_ref() == b"table-row" => {
                pending_empty_rows += repeat_count(attribute(&e, b"number-rows-repeated")?)?;
            }
            Event::End(e) if e.local_name().as_ref() == b"table-row" => {
                if let Some((builder, repeat)) = row.take() {
                    let cells = builder.finish();
                    if cells.is_empty() {
                        pending_empty_rows += repeat;
                    } else {
                        rows.extend(std::iter::repeat_n(Vec::new(), pending_empty_rows));
                        pending_empty_rows = 0;
                        rows.extend(std::iter::repeat_n(cells, repeat));
                    }
                }
            }

            Event::Start(e) if matches!(e.local_name().as_ref(), b"table-cell" | b"covered-table-cell") => {
                cell = Some(CellState {
                    repeat: repeat_count(attribute(&e, b"number-columns-repeated")?)?,
                    paragraphs: Vec::new(),
                    fallback: attribute(&e, b"value")?
                        .or(attribute(&e, b"date-value")?)
                        .or(attribute(&e, b"boolean-value")?),
                    in_paragraph: false,
                });
            }
            Event::Empty(e) if matches!(e.local_name().as_ref(), b"table-cell" | b"covered-table-cell") => {
                let repeat = repeat_count(attribute(&e, b"number-columns-repeated")?)?;
                let value = attribute(&e, b"value")?.or(attribute(&e, b"boolean-value")?);
                if let Some((builder, _)) = row.as_mut() {
                    builder.push(value, repeat);
                }
            }
            Event::End(e) if matches!(e.local_name().as_ref(), b"table-cell" | b"covered-table-cell") => {
                if let (Some(state), Some((builder, _))) = (cell.take(), row.as_mut()) {
                    let repeat = state.repeat;
                    builder.push(state.value(), repeat);
                }
            }

            Event::Start(e) if e.local_name().as_ref() == b"p" => {
                if let Some(state) = cell.as_mut() {
                    state.paragraphs.push(String::new());
                    state.in_paragraph = true;
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"p" => {
                if let Some(state) = cell.as_mut() {
                    state.paragraphs.push(String::new());
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"p" => {
                if let Some(state) = cell.as_mut() {
                    state.in_paragraph = false;
                }
            }
            Event::Empty(e) => {
                if let Some(state) = cell.as_mut().filter(|s| s.in_paragraph) {
                    match e.local_name().as_ref() {
                        b"s" => {
                            let count = repeat_count(attribute(&e, b"c")?)?;
                            state.text(&" ".repeat(count));
                        }
                        b"tab" => state.text("\t"),
                        b"line-break" => state.text("\n"),
                        _ => {}
                    }
                }
            }
            Event::Text(t) => {
                if let Some(state) = cell.as_mut().filter(|s| s.in_paragraph) {
                    state.text(&t.unescape().context("unescape cell text")?);
                }
            }
            _ => {}
        }
    }

    Ok((name, rows))
}

fn cell_xml(text: &str) -> String {
    let paragraphs: String = text
        .split('\n')
        .map(|line| format!("<text:p>{}</text:p>", escape_spaces(&escape_text(line))))
        .collect();
    format!(r#"<table:table-cell office:value-type="string">{}</table:table-cell>"#, paragraphs)
}

/// Encode runs of spaces and tabs that XML whitespace handling would collapse
fn escape_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut spaces = 0usize;
    let mut at_start = true;
    let flush = |out: &mut String, spaces: &mut usize, at_start: bool| {
        match (*spaces, at_start) {
            (0, _) => {}
            (1, false) => out.push(' '),
            (n, true) => out.push_str(&format!(r#"<text:s text:c="{}"/>"#, n)),
            (n, false) => out.push_str(&format!(r#" <text:s text:c="{}"/>"#, n - 1)),
        }
        *spaces = 0;
    };
    for c in text.chars() {
        match c {
            ' ' => spaces += 1,
            '\t' => {
                flush(&mut out, &mut spaces, at_start);
                out.push_str("<text:tab/>");
                at_start = false;
            }
            _ => {
                flush(&mut out, &mut spaces, at_start);
                out.push(c);
                at_start = false;
            }
        }
    }
    if spaces > 0 {
        out.push_str(&format!(r#"<text:s text:c="{}"/>"#, spaces));
    }
    out
}

/// Write the store as a single-table OpenDocument spreadsheet
pub fn write(store: &Store, path: &Path) -> Result<(), StoreError> {
    let mut content = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<office:document-content xmlns:office="urn:oasis:names:tc:opendocument:xmlns:office:1.0" xmlns:table="urn:oasis:names:tc:opendocument:xmlns:table:1.0" xmlns:text="urn:oasis:names:tc:opendocument:xmlns:text:1.0" office:version="1.2"><office:body><office:spreadsheet><table:table table:name="{}">"#,
        quick_xml::escape::escape(store.sheet_name())
    );
    for row in store.raw_rows() {
        content.push_str("<table:table-row>");
        for cell in row {
            match cell {
                Some(text) => content.push_str(&cell_xml(text)),
                None => content.push_str("<table:table-cell/>"),
            }
        }
        content.push_str("</table:table-row>");
    }
    content.push_str("</table:table></office:spreadsheet></office:body></office:document-content>");

    write_package(
        path,
        vec![
            Member { name: "mimetype", data: MIMETYPE.as_bytes().to_vec(), stored: true },
            Member { name: "META-INF/manifest.xml", data: MANIFEST.as_bytes().to_vec(), stored: false },
            Member { name: "content.xml", data: content.into_bytes(), stored: false },
        ],
    )
}
