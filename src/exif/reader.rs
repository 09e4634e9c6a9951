use little_exif::endian::Endian;
use little_exif::exif_tag::{ExifTag, ExifTagGroup};
use little_exif::exif_tag_format::ExifTagFormat;
use nom_exif::{EntryValue, ExifIter, LatLng, MediaParser, MediaSource};
use std::path::{Path, PathBuf};

use super::{tags, writer};
use crate::error::LoadError;

/// Dimensions and size of the image itself, for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImageInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_size: u64,
}

/// Read every EXIF tag of an image as `(key, raw value)` pairs.
///
/// A file without EXIF data yields an empty list. Containers nom-exif does
/// not recognise (PNG, WebP) are read through little_exif instead.
pub fn read_tags(path: &Path) -> Result<Vec<(String, String)>, LoadError> {
    std::fs::metadata(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut parser = MediaParser::new();
    let ms = match MediaSource::file_path(path) {
        Ok(ms) => ms,
        Err(e) => {
            log::debug!("nom-exif cannot open {}: {e}", path.display());
            return read_tags_with_library(path).map_err(|_| metadata_error(path, e));
        }
    };

    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => {
            log::debug!("No EXIF data found in {}", path.display());
            return Ok(Vec::new());
        }
    };

    // GPS comes from the dedicated parser; iteration may not surface it
    let gps_info = iter.parse_gps_info().ok().flatten();

    let mut pairs = Vec::new();
    for mut entry in iter {
        let key = tags::key_for(entry.tag_code(), entry.ifd_index());
        match entry.take_result() {
            Ok(value) => pairs.push((key, raw_value(&value))),
            Err(e) => log::debug!("Skipping unreadable tag {key}: {e:?}"),
        }
    }

    if let Some(gps) = gps_info {
        let has_gps = pairs.iter().any(|(k, _)| k == "Exif.GPSInfo.GPSLatitude");
        if !has_gps {
            pairs.push(("Exif.GPSInfo.GPSLatitudeRef".into(), gps.latitude_ref.to_string()));
            pairs.push(("Exif.GPSInfo.GPSLatitude".into(), latlng_to_raw(&gps.latitude)));
            pairs.push(("Exif.GPSInfo.GPSLongitudeRef".into(), gps.longitude_ref.to_string()));
            pairs.push(("Exif.GPSInfo.GPSLongitude".into(), latlng_to_raw(&gps.longitude)));
        }
    }

    log::debug!("Read {} tags from {}", pairs.len(), path.display());
    Ok(pairs)
}

/// Read tags through the same library the writer uses.
fn read_tags_with_library(path: &Path) -> Result<Vec<(String, String)>, String> {
    let metadata = writer::load_existing_metadata(path)?;
    let endian = metadata.get_endian();

    let pairs: Vec<(String, String)> = metadata
        .data()
        .iter()
        .filter(|tag| tag.is_writable())
        .map(|tag| {
            let ifd_index = usize::from(tag.get_group() == ExifTagGroup::IFD1);
            (
                tags::key_for(tag.as_u16(), ifd_index),
                library_raw_value(tag, endian),
            )
        })
        .collect();

    log::debug!("Read {} tags from {} via little_exif", pairs.len(), path.display());
    Ok(pairs)
}

/// Probe dimensions (header only) and file size.
///
/// Formats the decoder does not understand still report their size.
pub fn probe_image(path: &Path) -> Result<ImageInfo, LoadError> {
    let meta = std::fs::metadata(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let (width, height) = match image::image_dimensions(path) {
        Ok((w, h)) => (Some(w), Some(h)),
        Err(e) => {
            log::debug!("Cannot decode dimensions of {}: {e}", path.display());
            (None, None)
        }
    };

    Ok(ImageInfo {
        width,
        height,
        file_size: meta.len(),
    })
}

fn metadata_error(path: &Path, e: impl std::fmt::Display) -> LoadError {
    LoadError::Metadata {
        path: PathBuf::from(path),
        message: e.to_string(),
    }
}

/// Render a value the way the rest of the crate expects raw values:
/// rationals as `n/d`, arrays space-separated, bytes as decimals.
fn raw_value(val: &EntryValue) -> String {
    match val {
        EntryValue::Text(s) => s.trim_end_matches('\0').to_string(),
        EntryValue::URational(r) => format!("{}/{}", r.0, r.1),
        EntryValue::IRational(r) => format!("{}/{}", r.0, r.1),
        EntryValue::URationalArray(v) => v
            .iter()
            .map(|r| format!("{}/{}", r.0, r.1))
            .collect::<Vec<_>>()
            .join(" "),
        EntryValue::IRationalArray(v) => v
            .iter()
            .map(|r| format!("{}/{}", r.0, r.1))
            .collect::<Vec<_>>()
            .join(" "),
        EntryValue::U8Array(bytes) | EntryValue::Undefined(bytes) => bytes
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

/// Same rendering as [`raw_value`], from a little_exif tag.
fn library_raw_value(tag: &ExifTag, endian: &Endian) -> String {
    let bytes = tag.value_as_u8_vec(endian);
    let big = matches!(endian, Endian::Big);

    match tag.format() {
        ExifTagFormat::STRING => String::from_utf8_lossy(&bytes)
            .trim_end_matches('\0')
            .to_string(),
        ExifTagFormat::INT8U | ExifTagFormat::UNDEF => join(bytes.iter()),
        ExifTagFormat::INT8S => join(bytes.iter().map(|b| *b as i8)),
        ExifTagFormat::INT16U => join(words::<2>(&bytes).map(|w| {
            if big { u16::from_be_bytes(w) } else { u16::from_le_bytes(w) }
        })),
        ExifTagFormat::INT16S => join(words::<2>(&bytes).map(|w| {
            if big { i16::from_be_bytes(w) } else { i16::from_le_bytes(w) }
        })),
        ExifTagFormat::INT32U => join(words::<4>(&bytes).map(|w| u32_from(w, big))),
        ExifTagFormat::INT32S => join(words::<4>(&bytes).map(|w| u32_from(w, big) as i32)),
        ExifTagFormat::RATIONAL64U => join(words::<8>(&bytes).map(|w| {
            let (num, den) = rational_parts(w, big);
            format!("{num}/{den}")
        })),
        ExifTagFormat::RATIONAL64S => join(words::<8>(&bytes).map(|w| {
            let (num, den) = rational_parts(w, big);
            format!("{}/{}", num as i32, den as i32)
        })),
        ExifTagFormat::FLOAT => join(words::<4>(&bytes).map(|w| f32::from_bits(u32_from(w, big)))),
        ExifTagFormat::DOUBLE => join(words::<8>(&bytes).map(|w| {
            if big { f64::from_be_bytes(w) } else { f64::from_le_bytes(w) }
        })),
    }
}

fn words<const N: usize>(bytes: &[u8]) -> impl Iterator<Item = [u8; N]> + '_ {
    bytes
        .chunks_exact(N)
        .filter_map(|chunk| <[u8; N]>::try_from(chunk).ok())
}

fn u32_from(word: [u8; 4], big: bool) -> u32 {
    if big {
        u32::from_be_bytes(word)
    } else {
        u32::from_le_bytes(word)
    }
}

fn rational_parts(word: [u8; 8], big: bool) -> (u32, u32) {
    let [a, b, c, d, e, f, g, h] = word;
    (u32_from([a, b, c, d], big), u32_from([e, f, g, h], big))
}

fn join<T: std::fmt::Display>(values: impl Iterator<Item = T>) -> String {
    values.map(|v| v.to_string()).collect::<Vec<_>>().join(" ")
}

/// Convert a nom-exif LatLng (3 URationals: deg, min, sec) to a raw DMS triple.
fn latlng_to_raw(latlng: &LatLng) -> String {
    format!(
        "{}/{} {}/{} {}/{}",
        latlng.0.0, latlng.0.1, latlng.1.0, latlng.1.1, latlng.2.0, latlng.2.1
    )
}
