//! APK manifest reader
//!
//! Reads `AndroidManifest.xml` out of an APK and decodes just enough of the
//! Android binary XML format to recover the `<manifest>` identity attributes.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;

const MANIFEST_ENTRY: &str = "AndroidManifest.xml";
/// Far above any real manifest
const MAX_MANIFEST_SIZE: u64 = 4 * 1024 * 1024;

const RES_XML_TYPE: u16 = 0x0003;
const RES_STRING_POOL_TYPE: u16 = 0x0001;
const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;
const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;

const UTF8_FLAG: u32 = 0x100;
const NO_INDEX: u32 = 0xFFFF_FFFF;

const TYPE_STRING: u8 = 0x03;
const TYPE_INT_DEC: u8 = 0x10;
const TYPE_INT_HEX: u8 = 0x11;

// android.R.attr ids, used when attribute names are stripped from the pool
const ATTR_VERSION_CODE: u32 = 0x0101_021b;
const ATTR_VERSION_NAME: u32 = 0x0101_021c;

#[derive(Error, Debug)]
pub enum ApkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Not an APK: {0}")]
    NotAnApk(String),

    #[error("APK has no AndroidManifest.xml")]
    MissingManifest,

    #[error("Malformed binary XML: {0}")]
    Malformed(&'static str),

    #[error("Manifest has no package attribute")]
    MissingPackage,
}

/// Identity attributes of an APK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApkInfo {
    pub package_name: String,
    pub version_code: Option<u64>,
    pub version_name: Option<String>,
}

/// Read the manifest identity of the APK at `path`.
pub fn read_manifest(path: &Path) -> Result<ApkInfo, ApkError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ApkError::NotAnApk(e.to_string()))?;
    let mut entry = archive
        .by_name(MANIFEST_ENTRY)
        .map_err(|_| ApkError::MissingManifest)?;

    let declared = entry.size();
    let buf = read_bounded(&mut entry, declared, MAX_MANIFEST_SIZE)?;
    parse_manifest(&buf)
}

/// Read at most `limit` bytes. `declared` comes from the archive header and
/// only sizes the initial buffer.
fn read_bounded(reader: impl Read, declared: u64, limit: u64) -> Result<Vec<u8>, ApkError> {
    let mut buf = Vec::with_capacity(declared.min(limit) as usize);
    reader.take(limit + 1).read_to_end(&mut buf)?;
    if buf.len() as u64 > limit {
        return Err(ApkError::Malformed("manifest is too large"));
    }
    Ok(buf)
}

/// Package name of the first file in `files` whose manifest parses.
pub fn first_package_name(files: &[PathBuf]) -> Option<String> {
    files.iter().find_map(|file| match read_manifest(file) {
        Ok(info) => Some(info.package_name),
        Err(e) => {
            tracing::debug!(file = %file.display(), error = %e, "Skipping unreadable manifest");
            None
        }
    })
}

/// Decode a binary `AndroidManifest.xml`.
pub fn parse_manifest(data: &[u8]) -> Result<ApkInfo, ApkError> {
    if u16_at(data, 0)? != RES_XML_TYPE {
        return Err(ApkError::Malformed("not a binary XML document"));
    }
    let header_size = u16_at(data, 2)? as usize;
    let end = (u32_at(data, 4)? as usize).min(data.len());

    let mut strings: Vec<String> = Vec::new();
    let mut res_ids: Vec<u32> = Vec::new();

    let mut pos = header_size;
    while pos + 8 <= end {
        let chunk_type = u16_at(data, pos)?;
        let chunk_header = u16_at(data, pos + 2)? as usize;
        let chunk_size = u32_at(data, pos + 4)? as usize;
        if chunk_size < 8 || chunk_header > chunk_size || pos + chunk_size > end {
            return Err(ApkError::Malformed("bad chunk size"));
        }
        let chunk = &data[pos..pos + chunk_size];

        match chunk_type {
            RES_STRING_POOL_TYPE => strings = parse_string_pool(chunk)?,
            RES_XML_RESOURCE_MAP_TYPE => {
                res_ids = (0..(chunk_size - chunk_header) / 4)
                    .map(|i| u32_at(chunk, chunk_header + i * 4))
                    .collect::<Result<_, _>>()?;
            }
            RES_XML_START_ELEMENT_TYPE => {
                if let Some(info) = parse_manifest_element(chunk, chunk_header, &strings, &res_ids)? {
                    return Ok(info);
                }
            }
            _ => {}
        }
        pos += chunk_size;
    }

    Err(ApkError::MissingPackage)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Attr {
    Package,
    VersionCode,
    VersionName,
    Other,
}

/// Returns `None` for any element other than `<manifest>`.
fn parse_manifest_element(
    chunk: &[u8],
    header: usize,
    strings: &[String],
    res_ids: &[u32],
) -> Result<Option<ApkInfo>, ApkError> {
    let name = u32_at(chunk, header + 4)?;
    if string(strings, name) != Some("manifest") {
        return Ok(None);
    }

    let attr_start = u16_at(chunk, header + 8)? as usize;
    let attr_size = u16_at(chunk, header + 10)? as usize;
    let attr_count = u16_at(chunk, header + 12)? as usize;
    if attr_size < 20 {
        return Err(ApkError::Malformed("attribute record too small"));
    }

    let mut package_name = None;
    let mut version_code = None;
    let mut version_name = None;

    for i in 0..attr_count {
        let at = header + attr_start + i * attr_size;
        let name_idx = u32_at(chunk, at + 4)?;
        let raw = u32_at(chunk, at + 8)?;
        let data_type = u8_at(chunk, at + 15)?;
        let data = u32_at(chunk, at + 16)?;

        let res_id = res_ids.get(name_idx as usize).copied();
        let attr = match (string(strings, name_idx), res_id) {
            (_, Some(ATTR_VERSION_CODE)) | (Some("versionCode"), _) => Attr::VersionCode,
            (_, Some(ATTR_VERSION_NAME)) | (Some("versionName"), _) => Attr::VersionName,
            (Some("package"), _) => Attr::Package,
            _ => Attr::Other,
        };
        if attr == Attr::Other {
            continue;
        }

        let value = if raw != NO_INDEX {
            string(strings, raw).map(str::to_string)
        } else {
            match data_type {
                TYPE_STRING => string(strings, data).map(str::to_string),
                TYPE_INT_DEC | TYPE_INT_HEX => Some(data.to_string()),
                _ => None,
            }
        };

        match attr {
            Attr::Package => package_name = value,
            Attr::VersionCode => version_code = value.and_then(|v| v.parse().ok()),
            Attr::VersionName => version_name = value,
            Attr::Other => {}
        }
    }

    let package_name = package_name
        .filter(|p| !p.is_empty())
        .ok_or(ApkError::MissingPackage)?;
    Ok(Some(ApkInfo {
        package_name,
        version_code,
        version_name,
    }))
}

fn parse_string_pool(chunk: &[u8]) -> Result<Vec<String>, ApkError> {
    let header = u16_at(chunk, 2)? as usize;
    let count = u32_at(chunk, 8)? as usize;
    let flags = u32_at(chunk, 16)?;
    let strings_start = u32_at(chunk, 20)? as usize;
    let utf8 = flags & UTF8_FLAG != 0;

    let mut strings = Vec::new();
    for i in 0..count {
        let offset = u32_at(chunk, header + i * 4)? as usize;
        let start = strings_start + offset;
        let s = if utf8 {
            decode_utf8(chunk, start)?
        } else {
            decode_utf16(chunk, start)?
        };
        strings.push(s);
    }
    Ok(strings)
}

fn decode_utf8(chunk: &[u8], start: usize) -> Result<String, ApkError> {
    let (_chars, n) = utf8_len(chunk, start)?;
    let (len, m) = utf8_len(chunk, start + n)?;
    let from = start + n + m;
    let bytes = chunk
        .get(from..from + len)
        .ok_or(ApkError::Malformed("truncated string"))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn utf8_len(chunk: &[u8], at: usize) -> Result<(usize, usize), ApkError> {
    let b0 = u8_at(chunk, at)? as usize;
    if b0 & 0x80 != 0 {
        let b1 = u8_at(chunk, at + 1)? as usize;
        Ok((((b0 & 0x7f) << 8) | b1, 2))
    } else {
        Ok((b0, 1))
    }
}

fn decode_utf16(chunk: &[u8], start: usize) -> Result<String, ApkError> {
    let u0 = u16_at(chunk, start)? as usize;
    let (len, n) = if u0 & 0x8000 != 0 {
        let u1 = u16_at(chunk, start + 2)? as usize;
        ((((u0 & 0x7fff) << 16) | u1), 4)
    } else {
        (u0, 2)
    };
    let units = (0..len)
        .map(|i| u16_at(chunk, start + n + i * 2))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(String::from_utf16_lossy(&units))
}

fn string(strings: &[String], idx: u32) -> Option<&str> {
    strings.get(idx as usize).map(String::as_str)
}

fn u8_at(data: &[u8], at: usize) -> Result<u8, ApkError> {
    data.get(at).copied().ok_or(ApkError::Malformed("truncated"))
}

fn u16_at(data: &[u8], at: usize) -> Result<u16, ApkError> {
    data.get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or(ApkError::Malformed("truncated"))
}

fn u32_at(data: &[u8], at: usize) -> Result<u32, ApkError> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(ApkError::Malformed("truncated"))
}
