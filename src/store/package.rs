/*!
 * Zip container and markup helpers shared by the workbook formats.
 */

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::Context;
use quick_xml::events::BytesStart;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::StoreError;

use super::write_atomically;

/// A zip member to be written
pub(crate) struct Member<'a> {
    pub name: &'a str,
    pub data: Vec<u8>,
    /// Stored members are written uncompressed (ODS requires this for `mimetype`)
    pub stored: bool,
}

/// Read-only view of a zip container
pub(crate) struct Package {
    archive: ZipArchive<File>,
}

impl Package {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let archive = ZipArchive::new(file).context("read zip")?;
        Ok(Self { archive })
    }

    /// Bytes of a member, `None` when it does not exist
    pub fn entry(&mut self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut member = match self.archive.by_name(name) {
            Ok(member) => member,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("zip entry {}", name)),
        };
        let mut data = Vec::with_capacity(member.size() as usize);
        member
            .read_to_end(&mut data)
            .with_context(|| format!("read zip entry {}", name))?;
        Ok(Some(data))
    }
}

/// Write a zip container in member order
pub(crate) fn write_package(path: &Path, members: Vec<Member<'_>>) -> Result<(), StoreError> {
    write_atomically(path, |out| {
        let mut zout = ZipWriter::new(out);
        for member in members {
            let method = if member.stored {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflated
            };
            let options = SimpleFileOptions::default().compression_method(method);
            zout.start_file(member.name, options)
                .map_err(|e| StoreError::io(path, e))?;
            zout.write_all(&member.data)
                .map_err(|e| StoreError::io(path, e))?;
        }
        zout.finish().map_err(|e| StoreError::io(path, e))?;
        Ok(())
    })
}

/// Attribute value by local name, ignoring any namespace prefix
pub(crate) fn attribute(element: &BytesStart<'_>, local: &[u8]) -> anyhow::Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.context("attribute")?;
        if attr.key.local_name().as_ref() == local {
            return Ok(Some(attr.unescape_value().context("attribute value")?.into_owned()));
        }
    }
    Ok(None)
}

/// Escape text for element content, dropping characters XML 1.0 cannot carry
pub(crate) fn escape_text(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect();
    quick_xml::escape::escape(cleaned.as_str()).into_owned()
}
