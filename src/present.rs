//! Display fields built from a snapshot.
//!
//! Each [`Field`] is one group shown to the user (Title, Camera, GPS, ...)
//! with one or more labelled values. A tag that fails to decode blanks only
//! its own value and is logged; the rest of the fields are built normally.

use serde::Serialize;
use std::path::Path;

use crate::codec::{self, Axis, DecodedValue};
use crate::error::CodecError;
use crate::exif::ImageInfo;
use crate::format::Backend;
use crate::snapshot::{Snapshot, TagMap};

pub const KEY_TITLE: &str = "Exif.Image.XPTitle";
pub const KEY_DESCRIPTION: &str = "Exif.Image.ImageDescription";
pub const KEY_DATE_ORIGINAL: &str = "Exif.Photo.DateTimeOriginal";

/// How the presentation layer should render a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldKind {
    Text,
    MultiLineText,
    Date,
    GpsCoordinate,
}

/// How an edited value is turned back into a raw value for its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EditEncoding {
    ReadOnly,
    Plain,
    /// Windows `XP*` byte-pair text. Worker-backed files take the text as is.
    BinaryText { emit_utf16: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub label: &'static str,
    /// Tag an edit of this field is written to.
    pub key: Option<&'static str>,
    pub kind: FieldKind,
    pub encoding: EditEncoding,
    pub values: Vec<(&'static str, String)>,
}

impl Field {
    fn read_only(label: &'static str, kind: FieldKind, values: Vec<(&'static str, String)>) -> Self {
        Self {
            label,
            key: None,
            kind,
            encoding: EditEncoding::ReadOnly,
            values,
        }
    }

    pub fn is_editable(&self) -> bool {
        self.key.is_some() && self.encoding != EditEncoding::ReadOnly
    }

    /// The first value, for single-valued fields.
    pub fn value(&self) -> Option<&str> {
        self.values.first().map(|(_, v)| v.as_str())
    }

    /// Turn edited text into the `(key, raw value)` pending edit for this field.
    /// `None` for read-only fields.
    pub fn encode_edit(&self, text: &str) -> Option<(String, String)> {
        let key = self.key?.to_string();
        match self.encoding {
            EditEncoding::ReadOnly => None,
            EditEncoding::Plain => Some((key, text.to_string())),
            EditEncoding::BinaryText { emit_utf16 } => {
                Some((key, codec::encode_binary_text(text, emit_utf16)))
            }
        }
    }
}

/// Build every display field for one loaded image, in display order.
pub fn present(snapshot: &Snapshot, info: &ImageInfo, path: &Path, backend: Backend) -> Vec<Field> {
    let tag = |key: &str| snapshot.get(key);
    let mut fields = Vec::new();

    fields.push(Field {
        label: "Title",
        key: Some(KEY_TITLE),
        kind: FieldKind::Text,
        encoding: EditEncoding::BinaryText {
            emit_utf16: backend == Backend::LibraryBacked,
        },
        values: vec![("Title", codec::decode_binary_text(tag(KEY_TITLE).unwrap_or("")))],
    });

    fields.push(Field {
        label: "Description",
        key: Some(KEY_DESCRIPTION),
        kind: FieldKind::MultiLineText,
        encoding: EditEncoding::Plain,
        values: vec![(
            "Description",
            codec::decode_binary_text(tag(KEY_DESCRIPTION).unwrap_or("")),
        )],
    });

    if let Some(raw) = tag(KEY_DATE_ORIGINAL) {
        let date = or_blank(KEY_DATE_ORIGINAL, normalize_date(raw));
        fields.push(Field::read_only("Date", FieldKind::Date, vec![("Date", date)]));
    }

    if let Some(field) = dimensions(snapshot, info) {
        fields.push(field);
    }

    if tag("Exif.Photo.ExposureTime").is_some() {
        fields.push(camera(snapshot));
    }

    if let Some(field) = gps(snapshot) {
        fields.push(field);
    }

    fields.push(Field::read_only(
        "File",
        FieldKind::Text,
        vec![("Size", codec::format_byte_size(info.file_size))],
    ));

    fields.push(Field::read_only(
        "Source",
        FieldKind::Text,
        vec![("Source", path.display().to_string())],
    ));

    fields
}

/// Pending edits that move the image to `latitude`, `longitude` (decimal degrees).
pub fn gps_edits(latitude: f64, longitude: f64) -> Result<TagMap, CodecError> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(CodecError::UnsupportedValue {
            what: "GPS position".to_string(),
            value: format!("{latitude}, {longitude}"),
        });
    }

    let mut edits = TagMap::new();
    edits.insert(
        "Exif.GPSInfo.GPSLatitudeRef".into(),
        codec::hemisphere_ref(latitude, Axis::Latitude).into(),
    );
    edits.insert(
        "Exif.GPSInfo.GPSLatitude".into(),
        DecodedValue::GpsCoordinate { degrees: latitude }.to_raw(),
    );
    edits.insert(
        "Exif.GPSInfo.GPSLongitudeRef".into(),
        codec::hemisphere_ref(longitude, Axis::Longitude).into(),
    );
    edits.insert(
        "Exif.GPSInfo.GPSLongitude".into(),
        DecodedValue::GpsCoordinate { degrees: longitude }.to_raw(),
    );
    Ok(edits)
}

fn dimensions(snapshot: &Snapshot, info: &ImageInfo) -> Option<Field> {
    let (width, height) = match (info.width, info.height) {
        (Some(w), Some(h)) => (w.to_string(), h.to_string()),
        _ => (
            snapshot.get("Exif.Image.ImageWidth")?.to_string(),
            snapshot.get("Exif.Image.ImageLength")?.to_string(),
        ),
    };

    let dpi = or_blank("Exif.Image.XResolution", dpi(snapshot));
    Some(Field::read_only(
        "Dimensions",
        FieldKind::Text,
        vec![("Dimensions", format!("{width} x {height}")), ("DPI", dpi)],
    ))
}

fn dpi(snapshot: &Snapshot) -> Result<String, CodecError> {
    let x = number(required(snapshot, "Exif.Image.XResolution")?)?;
    let y = number(required(snapshot, "Exif.Image.YResolution")?)?;
    let multiplier = codec::resolution_multiplier(required(snapshot, "Exif.Image.ResolutionUnit")?)?;
    Ok(format!("{:.0}", ((x * multiplier) * (y * multiplier)).sqrt()))
}

fn camera(snapshot: &Snapshot) -> Field {
    let text = |key: &str| snapshot.get(key).unwrap_or("").to_string();
    let decoded = |key: &'static str, render: fn(&str) -> Result<String, CodecError>| {
        match snapshot.get(key) {
            Some(raw) => or_blank(key, render(raw)),
            None => String::new(),
        }
    };

    Field::read_only(
        "Camera",
        FieldKind::Text,
        vec![
            ("Make", text("Exif.Image.Make")),
            ("Model", text("Exif.Image.Model")),
            (
                "Focal length",
                decoded("Exif.Photo.FocalLength", |raw| {
                    Ok(format!("{:.1} mm", number(raw)?))
                }),
            ),
            (
                "F-stop",
                decoded("Exif.Photo.FNumber", |raw| Ok(format!("f/{:.1}", number(raw)?))),
            ),
            ("Exposure time", format!("{} sec", text("Exif.Photo.ExposureTime"))),
            ("ISO speed", format!("ISO {}", text("Exif.Photo.ISOSpeedRatings"))),
            (
                "Flash",
                decoded("Exif.Photo.Flash", |raw| {
                    Ok(if integer(raw)? & 0x1 != 0 { "Flash" } else { "No flash" }.to_string())
                }),
            ),
            (
                "Exposure program",
                decoded("Exif.Photo.ExposureProgram", |raw| {
                    Ok(exposure_program(integer(raw)?).to_string())
                }),
            ),
            (
                "White Balance",
                decoded("Exif.Photo.WhiteBalance", |raw| {
                    Ok(if integer(raw)? == 0 { "Auto" } else { "Manual" }.to_string())
                }),
            ),
            (
                "Zoom ratio",
                decoded("Exif.Photo.DigitalZoomRatio", |raw| {
                    Ok(DecodedValue::rational(raw)?.to_string())
                }),
            ),
        ],
    )
}

fn exposure_program(code: i64) -> &'static str {
    match code {
        1 => "Manual",
        2 => "Normal",
        3 => "Aperture",
        4 => "Shutter",
        5 => "Creative",
        6 => "Action",
        7 => "Portrait",
        8 => "Landscape",
        _ => "Unknown",
    }
}

fn gps(snapshot: &Snapshot) -> Option<Field> {
    let lat = snapshot.get("Exif.GPSInfo.GPSLatitude")?;
    let lat_ref = snapshot.get("Exif.GPSInfo.GPSLatitudeRef")?;
    let lon = snapshot.get("Exif.GPSInfo.GPSLongitude")?;
    let lon_ref = snapshot.get("Exif.GPSInfo.GPSLongitudeRef")?;

    let coordinate = |key: &str, raw: &str, hemisphere: &str| {
        or_blank(key, DecodedValue::gps(raw, hemisphere).map(|v| v.to_string()))
    };

    let mut values = vec![
        ("Latitude", coordinate("Exif.GPSInfo.GPSLatitude", lat, lat_ref)),
        ("Longitude", coordinate("Exif.GPSInfo.GPSLongitude", lon, lon_ref)),
    ];

    if let Some(raw) = snapshot.get("Exif.GPSInfo.GPSAltitude") {
        let below_sea_level = snapshot
            .get("Exif.GPSInfo.GPSAltitudeRef")
            .is_some_and(|r| r.trim() == "1");
        let altitude = codec::parse_fraction(raw).map(|meters| {
            let meters = if below_sea_level { -meters } else { meters };
            format!("{meters:.1} m")
        });
        values.push(("Altitude", or_blank("Exif.GPSInfo.GPSAltitude", altitude)));
    }

    Some(Field::read_only("GPS", FieldKind::GpsCoordinate, values))
}

/// `YYYY:MM:DD HH:MM:SS` → `YYYY-MM-DD HH:MM:SS`.
fn normalize_date(raw: &str) -> Result<String, CodecError> {
    let invalid = || CodecError::InvalidFormat(format!("not an EXIF date: {raw:?}"));
    let raw = raw.trim_end_matches('\0').trim();
    let (date, time) = raw.split_once(' ').ok_or_else(invalid)?;

    let date: Vec<&str> = date.split(':').collect();
    let time_parts: Vec<&str> = time.split(':').collect();
    let digits = |s: &&str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_digit());

    let well_formed = date.len() == 3
        && time_parts.len() == 3
        && digits(&date[0], 4)
        && date[1..].iter().all(|p| digits(p, 2))
        && time_parts.iter().all(|p| digits(p, 2));
    if !well_formed {
        return Err(invalid());
    }

    Ok(format!("{}-{}-{} {time}", date[0], date[1], date[2]))
}

fn required<'a>(snapshot: &'a Snapshot, key: &str) -> Result<&'a str, CodecError> {
    snapshot
        .get(key)
        .ok_or_else(|| CodecError::InvalidFormat(format!("{key} is missing")))
}

/// A rational `n/d` or a plain decimal number.
fn number(raw: &str) -> Result<f64, CodecError> {
    if raw.contains('/') {
        codec::parse_fraction(raw)
    } else {
        raw.trim()
            .parse()
            .map_err(|_| CodecError::InvalidFormat(format!("not a number: {raw:?}")))
    }
}

fn integer(raw: &str) -> Result<i64, CodecError> {
    raw.trim()
        .parse()
        .map_err(|_| CodecError::InvalidFormat(format!("not an integer: {raw:?}")))
}

fn or_blank(key: &str, value: Result<String, CodecError>) -> String {
    value.unwrap_or_else(|e| {
        log::warn!("Cannot display {key}: {e}");
        String::new()
    })
}
