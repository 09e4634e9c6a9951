use img_parts::jpeg::Jpeg;
use img_parts::png::Png;
use img_parts::webp::{self, WebP};
use img_parts::{Bytes, ImageEXIF};
use little_exif::endian::Endian;
use little_exif::exif_tag::{ExifTag, ExifTagGroup};
use little_exif::exif_tag_format::ExifTagFormat;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;
use std::panic::AssertUnwindSafe;
use std::path::Path;

use super::tags::{self, TagDef, TagFormat, TagGroup};
use crate::error::{CodecError, PersistCause, PersistFailure};
use crate::snapshot::TagMap;

// little_exif as_u8_vec(JPEG) returns: [APP1 marker 2B][length 2B][Exif\0\0 6B][TIFF data]
// img-parts set_exif() expects just the TIFF data (after Exif\0\0)
const JPEG_EXIF_OVERHEAD: usize = 10; // 2 + 2 + 6

const USER_COMMENT_ASCII: &[u8] = b"ASCII\0\0\0";

// little_exif keeps PNG EXIF in a zTXt chunk under this keyword
const PNG_RAW_PROFILE_EXIF: &[u8] = b"Raw profile type exif\0";

/// Writes tag edits in-process through `little_exif`.
///
/// Stateless: every commit loads the file's metadata afresh, overlays the
/// edits, and writes the merged block back. All edits are encoded before
/// anything touches the file, so a bad value never leaves a half-written
/// container behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibraryBackend;

impl LibraryBackend {
    pub fn new() -> Self {
        Self
    }

    pub fn commit(&self, path: &Path, edits: &TagMap) -> Result<(), PersistFailure> {
        if edits.is_empty() {
            return Ok(());
        }

        let new_tags = build_tags(edits).map_err(|cause| PersistFailure::new(path, cause))?;

        let result = if is_jpeg(path) {
            write_jpeg(path, &new_tags)
        } else {
            write_other(path, &new_tags)
        };

        result
            .map(|()| log::debug!("Wrote {} tag(s) to {}", edits.len(), path.display()))
            .map_err(|cause| PersistFailure::new(path, cause))
    }
}

/// Run `f`, turning a panic inside the metadata library into `None`.
pub(super) fn without_panics<T>(f: impl FnOnce() -> T) -> Option<T> {
    // Suppress panics from little_exif
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));
    let result = std::panic::catch_unwind(AssertUnwindSafe(f));
    std::panic::set_hook(prev_hook);
    result.ok()
}

/// Load existing EXIF metadata from a file path using little_exif.
pub(super) fn load_existing_metadata(path: &Path) -> Result<Metadata, String> {
    let path_owned = path.to_path_buf();
    match without_panics(move || Metadata::new_from_path(&path_owned)) {
        Some(Ok(m)) => {
            log::debug!("little_exif loaded {} existing EXIF tags", m.data().len());
            Ok(m)
        }
        Some(Err(e)) => {
            log::debug!("little_exif could not parse EXIF: {e}");
            Err(e.to_string())
        }
        None => Err("metadata library panicked while parsing".to_string()),
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

/// PNG and WebP: merge and let the library rewrite the file.
///
/// Anything else is refused by the library with an `Open` failure. A WebP
/// without an extended (VP8X) header also fails, since the library cannot
/// parse it.
fn write_other(path: &Path, new_tags: &[ExifTag]) -> Result<(), PersistCause> {
    let has_exif = has_embedded_exif(path)?;
    let mut metadata = load_existing_metadata(path).map_err(PersistCause::Open)?;
    // The library hands back an empty block when it cannot decode the
    // existing one; writing that would drop every tag already in the file.
    if has_exif && metadata.data().is_empty() {
        return Err(PersistCause::Open(
            "existing EXIF block holds no readable tags".to_string(),
        ));
    }
    for tag in new_tags {
        metadata.set_tag(tag.clone());
    }

    match without_panics(|| metadata.write_to_file(path)) {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(PersistCause::Write(e.to_string())),
        None => Err(PersistCause::Write(
            "metadata library panicked while writing".to_string(),
        )),
    }
}

/// Whether a PNG or WebP already carries an EXIF payload, as img-parts sees it.
fn has_embedded_exif(path: &Path) -> Result<bool, PersistCause> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if extension != "png" && extension != "webp" {
        return Ok(false);
    }

    let file_bytes = Bytes::from(std::fs::read(path).map_err(|e| PersistCause::Open(e.to_string()))?);

    if extension == "png" {
        let png = Png::from_bytes(file_bytes)
            .map_err(|e| PersistCause::Open(format!("failed to parse PNG: {e}")))?;
        let exif_chunk = png.exif().is_some_and(|exif| !exif.is_empty());
        let raw_profile = png
            .chunks_by_type(*b"zTXt")
            .any(|chunk| chunk.contents().starts_with(PNG_RAW_PROFILE_EXIF));
        Ok(exif_chunk || raw_profile)
    } else {
        let riff = WebP::from_bytes(file_bytes)
            .map_err(|e| PersistCause::Open(format!("failed to parse WebP: {e}")))?;
        Ok(riff
            .chunk_by_id(webp::CHUNK_EXIF)
            .and_then(|chunk| chunk.content().data())
            .is_some_and(|data| !data.is_empty()))
    }
}

/// Write tags into a JPEG, keeping every other segment as it was.
///
/// Existing EXIF is merged when the library can parse it. A JPEG with no EXIF
/// gets a fresh block. EXIF that is present but unparseable is left alone and
/// the commit fails, since replacing it would drop every existing tag.
fn write_jpeg(path: &Path, new_tags: &[ExifTag]) -> Result<(), PersistCause> {
    let file_bytes = std::fs::read(path).map_err(|e| PersistCause::Open(e.to_string()))?;

    // Parse JPEG structure with img-parts (preserves all segments)
    let mut jpeg = Jpeg::from_bytes(Bytes::from(file_bytes))
        .map_err(|e| PersistCause::Open(format!("failed to parse JPEG: {e}")))?;

    let orig_exif_pos = find_exif_segment_pos(&jpeg);
    let has_exif = jpeg.exif().is_some_and(|exif| !exif.is_empty());

    let mut metadata = match load_existing_metadata(path) {
        Ok(m) if !m.data().is_empty() => m,
        Ok(_) | Err(_) if !has_exif => {
            log::info!("No EXIF in {}, building a fresh block", path.display());
            Metadata::new()
        }
        Ok(_) => {
            return Err(PersistCause::Open(
                "existing EXIF segment holds no readable tags".to_string(),
            ));
        }
        Err(e) => return Err(PersistCause::Open(e)),
    };
    for tag in new_tags {
        metadata.set_tag(tag.clone());
    }

    let exif_bytes = without_panics(|| metadata.as_u8_vec(FileExtension::JPEG)).ok_or_else(
        || PersistCause::Write("metadata library panicked while encoding".to_string()),
    )?;
    if exif_bytes.len() <= JPEG_EXIF_OVERHEAD {
        return Err(PersistCause::Write("encoded EXIF block is empty".to_string()));
    }

    jpeg.set_exif(Some(Bytes::from(exif_bytes[JPEG_EXIF_OVERHEAD..].to_vec())));

    // set_exif() inserts at position 3; move it back to where it was so EXIF
    // still precedes any XMP segment.
    if let Some(new_pos) = find_exif_segment_pos(&jpeg) {
        let target_pos = orig_exif_pos.unwrap_or(1); // default: right after APP0
        if target_pos < new_pos {
            let segments = jpeg.segments_mut();
            let seg = segments.remove(new_pos);
            segments.insert(target_pos, seg);
        }
    }

    let output = jpeg.encoder().bytes();
    std::fs::write(path, &output).map_err(|e| PersistCause::Write(e.to_string()))
}

/// Find the position of the EXIF APP1 segment in a JPEG.
fn find_exif_segment_pos(jpeg: &Jpeg) -> Option<usize> {
    const EXIF_PREFIX: &[u8] = b"Exif\0\0";
    jpeg.segments()
        .iter()
        .position(|s| s.marker() == 0xE1 && s.contents().starts_with(EXIF_PREFIX))
}

/// Turn every edit into a library tag, failing on the first bad one.
fn build_tags(edits: &TagMap) -> Result<Vec<ExifTag>, PersistCause> {
    edits
        .iter()
        .map(|(key, raw)| {
            let encode_err = |source: CodecError| PersistCause::Encode {
                key: key.clone(),
                source,
            };

            let def = tags::lookup_key(key)
                .filter(|def| def.writable)
                .ok_or_else(|| {
                    encode_err(CodecError::UnsupportedValue {
                        what: "writable tag key".to_string(),
                        value: key.clone(),
                    })
                })?;

            let data = encode_tag_value(def, raw).map_err(encode_err)?;

            ExifTag::from_u16_with_data(
                def.code,
                &library_format(def.format),
                &data,
                &Endian::Little,
                &library_group(def.group),
            )
            .map_err(|_| {
                encode_err(CodecError::InvalidFormat(format!(
                    "library rejected {} byte(s) for {}",
                    data.len(),
                    def.name
                )))
            })
        })
        .collect()
}

fn library_format(format: TagFormat) -> ExifTagFormat {
    match format {
        TagFormat::Ascii => ExifTagFormat::STRING,
        TagFormat::Byte => ExifTagFormat::INT8U,
        TagFormat::Short => ExifTagFormat::INT16U,
        TagFormat::Long => ExifTagFormat::INT32U,
        TagFormat::Rational => ExifTagFormat::RATIONAL64U,
        TagFormat::SRational => ExifTagFormat::RATIONAL64S,
        TagFormat::Undefined => ExifTagFormat::UNDEF,
    }
}

fn library_group(group: TagGroup) -> ExifTagGroup {
    match group {
        TagGroup::Image => ExifTagGroup::IFD0,
        TagGroup::Photo => ExifTagGroup::ExifIFD,
        TagGroup::GpsInfo => ExifTagGroup::GPSIFD,
    }
}

/// Encode a raw value into little-endian bytes for the tag's storage format.
pub(crate) fn encode_tag_value(def: &TagDef, raw: &str) -> Result<Vec<u8>, CodecError> {
    match def.format {
        TagFormat::Ascii => {
            let mut data = raw.as_bytes().to_vec();
            data.push(0); // null terminator
            Ok(data)
        }
        TagFormat::Byte | TagFormat::Undefined => {
            if let Some(bytes) = parse_byte_list(raw) {
                return Ok(bytes);
            }
            Ok(match def.code {
                tags::TAG_XP_TITLE..=tags::TAG_XP_SUBJECT => encode_utf16le(raw),
                tags::TAG_USER_COMMENT => {
                    let mut data = USER_COMMENT_ASCII.to_vec();
                    data.extend_from_slice(raw.as_bytes());
                    data
                }
                _ => raw.as_bytes().to_vec(),
            })
        }
        TagFormat::Short => numbers(raw, |t| t.parse::<u16>().ok().map(u16::to_le_bytes)),
        TagFormat::Long => numbers(raw, |t| t.parse::<u32>().ok().map(u32::to_le_bytes)),
        TagFormat::Rational => numbers(raw, |t| {
            let (num, den) = split_rational::<u32>(t)?;
            let mut out = [0u8; 8];
            out[..4].copy_from_slice(&num.to_le_bytes());
            out[4..].copy_from_slice(&den.to_le_bytes());
            Some(out)
        }),
        TagFormat::SRational => numbers(raw, |t| {
            let (num, den) = split_rational::<i32>(t)?;
            let mut out = [0u8; 8];
            out[..4].copy_from_slice(&num.to_le_bytes());
            out[4..].copy_from_slice(&den.to_le_bytes());
            Some(out)
        }),
    }
}

/// Parse each whitespace-separated token with `parse` and concatenate.
fn numbers<const N: usize>(
    raw: &str,
    parse: impl Fn(&str) -> Option<[u8; N]>,
) -> Result<Vec<u8>, CodecError> {
    let mut data = Vec::new();
    for token in raw.split_whitespace() {
        let bytes = parse(token)
            .ok_or_else(|| CodecError::InvalidFormat(format!("bad numeric token {token:?} in {raw:?}")))?;
        data.extend_from_slice(&bytes);
    }
    if data.is_empty() {
        return Err(CodecError::InvalidFormat(format!("no values in {raw:?}")));
    }
    Ok(data)
}

/// `"n/d"` or a bare integer `"n"` (read as `n/1`).
fn split_rational<T: std::str::FromStr + From<u8>>(token: &str) -> Option<(T, T)> {
    match token.split_once('/') {
        Some((num, den)) => Some((num.parse().ok()?, den.parse().ok()?)),
        None => Some((token.parse().ok()?, T::from(1))),
    }
}

/// A whitespace-separated list of decimal bytes, or `None` if `raw` is anything else.
fn parse_byte_list(raw: &str) -> Option<Vec<u8>> {
    let bytes: Option<Vec<u8>> = raw.split_whitespace().map(|t| t.parse().ok()).collect();
    bytes.filter(|b| !b.is_empty())
}

/// Encode a string as UTF-16LE bytes (used for XP* tags).
fn encode_utf16le(s: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = s
        .encode_utf16()
        .flat_map(|c| c.to_le_bytes())
        .collect();
    // Null terminator
    bytes.push(0);
    bytes.push(0);
    bytes
}
