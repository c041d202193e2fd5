//! Archive codec: the byte format of a snapshot.
//!
//! [`ZipArchiveCodec`] writes a zip with
//!  - `data.json` - `{"version": 1, "items": [...]}`; images replaced by `imageFile` references
//!  - `data.csv`  - the same items as CSV, for spreadsheets and older readers
//!  - `images/<id>.<ext>` - decoded image bytes, `<id>-<n>.<ext>` when two ids sanitize alike
//!
//! Encoding is deterministic: entries are written in a fixed order with a fixed timestamp,
//! so the same items always produce the same bytes (and the same sha256).

use std::{
    collections::HashSet,
    io::{Cursor, Read, Write},
};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Serialize;
use serde_json::Value;
use snafu::prelude::*;
use tracing::{debug, warn};
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

use crate::{
    Result,
    csv::{export_csv, import_csv},
    error::{ArchiveSnafu, BackupError, SerializationSnafu},
    item::Item,
};

pub const DATA_JSON: &str = "data.json";
pub const DATA_CSV: &str = "data.csv";
pub const IMAGES_DIR: &str = "images";
pub const ARCHIVE_VERSION: u32 = 1;

/// Converts an item collection to and from snapshot bytes.
pub trait ArchiveCodec: Send + Sync {
    /// Encode items. With `embed_images` false, item images are left out.
    fn encode(&self, items: &[Item], embed_images: bool) -> Result<Vec<u8>>;

    /// Decode snapshot bytes into raw item records, images rehydrated.
    /// Records are not normalized.
    fn decode(&self, bytes: &[u8]) -> Result<Vec<Value>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZipArchiveCodec;

#[derive(Serialize)]
struct DataFile<'a> {
    version: u32,
    items: &'a [Value],
}

const MIME_TO_EXT: [(&str, &str); 5] = [
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/webp", "webp"),
    ("image/gif", "gif"),
];

const EXT_TO_MIME: [(&str, &str); 5] = [
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
];

fn ext_for_mime(mime: &str) -> &'static str {
    MIME_TO_EXT
        .iter()
        .find(|(m, _)| *m == mime)
        .map_or("png", |(_, ext)| ext)
}

fn mime_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    EXT_TO_MIME
        .iter()
        .find(|(e, _)| *e == ext)
        .map_or("application/octet-stream", |(_, mime)| mime)
}

/// Split a `data:<mime>;base64,<payload>` URL into mime type and decoded bytes.
pub fn parse_data_url(data_url: &str) -> Option<(String, Vec<u8>)> {
    let rest = data_url.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    if mime.is_empty() {
        return None;
    }
    let bytes = BASE64.decode(payload.trim()).ok()?;
    Some((mime.to_string(), bytes))
}

pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
}

impl ArchiveCodec for ZipArchiveCodec {
    fn encode(&self, items: &[Item], embed_images: bool) -> Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let mut records = Vec::with_capacity(items.len());
        let mut images: Vec<(String, Vec<u8>)> = Vec::new();
        let mut used_names: HashSet<String> = HashSet::new();

        for item in items {
            let mut record = serde_json::to_value(item).context(SerializationSnafu)?;
            let Some(fields) = record.as_object_mut() else {
                return ArchiveSnafu {
                    message: format!("item {} did not serialize to an object", item.id),
                }
                .fail();
            };
            if let Some(Value::String(image)) = fields.remove("image") {
                if embed_images {
                    if let Some((mime, bytes)) = parse_data_url(&image) {
                        let image_file = unique_image_name(
                            &mut used_names,
                            &sanitize_file_stem(&item.id),
                            ext_for_mime(&mime),
                        );
                        fields.insert("imageFile".to_string(), Value::String(image_file.clone()));
                        images.push((image_file, bytes));
                    } else {
                        // not a data url (e.g. a remote link); keep it inline
                        fields.insert("image".to_string(), Value::String(image));
                    }
                }
            }
            records.push(record);
        }

        let csv = format!("\u{feff}{}", export_csv(items));
        writer.start_file(DATA_CSV, file_options())?;
        write_entry(&mut writer, csv.as_bytes())?;

        let data = serde_json::to_vec_pretty(&DataFile {
            version: ARCHIVE_VERSION,
            items: &records,
        })
        .context(SerializationSnafu)?;
        writer.start_file(DATA_JSON, file_options())?;
        write_entry(&mut writer, &data)?;

        for (path, bytes) in &images {
            writer.start_file(path.as_str(), file_options())?;
            write_entry(&mut writer, bytes)?;
        }

        let cursor = writer.finish()?;
        let bytes = cursor.into_inner();
        debug!(
            items = items.len(),
            images = images.len(),
            bytes = bytes.len(),
            "encoded archive"
        );
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Value>> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))?;

        let records = if let Some(data) = read_entry_if_exists(&mut zip, DATA_JSON)? {
            let parsed: Value = serde_json::from_slice(&data).map_err(|err| {
                BackupError::Archive {
                    message: format!("{DATA_JSON}: {err}"),
                }
            })?;
            match parsed {
                Value::Array(items) => items,
                Value::Object(mut obj) => match obj.remove("items") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            }
        } else if let Some(data) = read_entry_if_exists(&mut zip, DATA_CSV)? {
            import_csv(&String::from_utf8_lossy(&data))
        } else {
            warn!("archive has neither {DATA_JSON} nor {DATA_CSV}");
            return Ok(Vec::new());
        };

        let mut hydrated = Vec::with_capacity(records.len());
        for mut record in records {
            if let Some(fields) = record.as_object_mut() {
                let image_file = match fields.remove("imageFile") {
                    Some(Value::String(path)) => Some(path),
                    _ => None,
                };
                let has_image = fields
                    .get("image")
                    .and_then(Value::as_str)
                    .is_some_and(|s| !s.is_empty());
                if let (false, Some(path)) = (has_image, image_file) {
                    let name = path.trim_start_matches('/');
                    match read_entry_if_exists(&mut zip, name)? {
                        Some(image) => {
                            fields.insert(
                                "image".to_string(),
                                Value::String(to_data_url(mime_for_path(name), &image)),
                            );
                        }
                        None => warn!("archive image {name} missing"),
                    }
                }
            }
            hydrated.push(record);
        }
        Ok(hydrated)
    }
}

fn write_entry<W: Write + std::io::Seek>(writer: &mut ZipWriter<W>, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).map_err(|err| {
        BackupError::Archive {
            message: format!("write archive entry: {err}"),
        }
    })
}

fn read_entry_if_exists<R: Read + std::io::Seek>(
    zip: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>> {
    let Ok(mut entry) = zip.by_name(name) else {
        return Ok(None);
    };
    let mut out = Vec::new();
    entry
        .read_to_end(&mut out)
        .map_err(|err| BackupError::Archive {
            message: format!("read {name}: {err}"),
        })?;
    Ok(Some(out))
}

/// `images/<stem>.<ext>`, suffixed `-2`, `-3`, ... if an earlier item took the name.
fn unique_image_name(used: &mut HashSet<String>, stem: &str, ext: &str) -> String {
    let mut name = format!("{IMAGES_DIR}/{stem}.{ext}");
    let mut n = 2;
    while !used.insert(name.clone()) {
        name = format!("{IMAGES_DIR}/{stem}-{n}.{ext}");
        n += 1;
    }
    name
}

/// Replace characters that are unsafe in a zip entry name.
fn sanitize_file_stem(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
