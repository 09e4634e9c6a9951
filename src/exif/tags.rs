//! Catalogue of the EXIF tags this crate knows how to name and write.
//!
//! Keys follow the `Exif.<Group>.<Name>` convention. Tags missing from the
//! table still get a key when read (`Exif.Image.0x1234`), but they cannot be
//! written because their storage format is unknown.

/// IFD a tag lives in, as used in tag keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagGroup {
    /// IFD0
    Image,
    /// Exif sub-IFD
    Photo,
    /// GPS sub-IFD
    GpsInfo,
}

impl TagGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Photo => "Photo",
            Self::GpsInfo => "GPSInfo",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "Image" => Some(Self::Image),
            "Photo" => Some(Self::Photo),
            "GPSInfo" => Some(Self::GpsInfo),
            _ => None,
        }
    }
}

/// TIFF storage format of a tag's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFormat {
    Ascii,
    Byte,
    Short,
    Long,
    Rational,
    SRational,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagDef {
    pub code: u16,
    pub group: TagGroup,
    pub name: &'static str,
    pub format: TagFormat,
    /// Sub-IFD pointers are maintained by the library, never edited.
    pub writable: bool,
}

impl TagDef {
    pub fn key(&self) -> String {
        format!("Exif.{}.{}", self.group.as_str(), self.name)
    }
}

const fn tag(code: u16, group: TagGroup, name: &'static str, format: TagFormat) -> TagDef {
    TagDef {
        code,
        group,
        name,
        format,
        writable: true,
    }
}

const fn pointer(code: u16, name: &'static str) -> TagDef {
    TagDef {
        code,
        group: TagGroup::Image,
        name,
        format: TagFormat::Long,
        writable: false,
    }
}

use TagFormat::*;
use TagGroup::*;

pub const TAG_XP_TITLE: u16 = 0x9C9B;
pub const TAG_XP_COMMENT: u16 = 0x9C9C;
pub const TAG_XP_AUTHOR: u16 = 0x9C9D;
pub const TAG_XP_KEYWORDS: u16 = 0x9C9E;
pub const TAG_XP_SUBJECT: u16 = 0x9C9F;
pub const TAG_USER_COMMENT: u16 = 0x9286;

pub static TAGS: &[TagDef] = &[
    // IFD0
    tag(0x0100, Image, "ImageWidth", Long),
    tag(0x0101, Image, "ImageLength", Long),
    tag(0x010E, Image, "ImageDescription", Ascii),
    tag(0x010F, Image, "Make", Ascii),
    tag(0x0110, Image, "Model", Ascii),
    tag(0x0112, Image, "Orientation", Short),
    tag(0x011A, Image, "XResolution", Rational),
    tag(0x011B, Image, "YResolution", Rational),
    tag(0x0128, Image, "ResolutionUnit", Short),
    tag(0x0131, Image, "Software", Ascii),
    tag(0x0132, Image, "DateTime", Ascii),
    tag(0x013B, Image, "Artist", Ascii),
    tag(0x8298, Image, "Copyright", Ascii),
    pointer(0x8769, "ExifTag"),
    pointer(0x8825, "GPSTag"),
    tag(TAG_XP_TITLE, Image, "XPTitle", Byte),
    tag(TAG_XP_COMMENT, Image, "XPComment", Byte),
    tag(TAG_XP_AUTHOR, Image, "XPAuthor", Byte),
    tag(TAG_XP_KEYWORDS, Image, "XPKeywords", Byte),
    tag(TAG_XP_SUBJECT, Image, "XPSubject", Byte),
    // Exif sub-IFD
    tag(0x829A, Photo, "ExposureTime", Rational),
    tag(0x829D, Photo, "FNumber", Rational),
    tag(0x8822, Photo, "ExposureProgram", Short),
    tag(0x8827, Photo, "ISOSpeedRatings", Short),
    tag(0x9003, Photo, "DateTimeOriginal", Ascii),
    tag(0x9004, Photo, "DateTimeDigitized", Ascii),
    tag(0x9201, Photo, "ShutterSpeedValue", SRational),
    tag(0x9202, Photo, "ApertureValue", Rational),
    tag(0x9204, Photo, "ExposureBiasValue", SRational),
    tag(0x9209, Photo, "Flash", Short),
    tag(0x920A, Photo, "FocalLength", Rational),
    tag(TAG_USER_COMMENT, Photo, "UserComment", Undefined),
    tag(0xA002, Photo, "PixelXDimension", Long),
    tag(0xA003, Photo, "PixelYDimension", Long),
    tag(0xA403, Photo, "WhiteBalance", Short),
    tag(0xA404, Photo, "DigitalZoomRatio", Rational),
    tag(0xA405, Photo, "FocalLengthIn35mmFilm", Short),
    tag(0xA433, Photo, "LensMake", Ascii),
    tag(0xA434, Photo, "LensModel", Ascii),
    // GPS sub-IFD
    tag(0x0000, GpsInfo, "GPSVersionID", Byte),
    tag(0x0001, GpsInfo, "GPSLatitudeRef", Ascii),
    tag(0x0002, GpsInfo, "GPSLatitude", Rational),
    tag(0x0003, GpsInfo, "GPSLongitudeRef", Ascii),
    tag(0x0004, GpsInfo, "GPSLongitude", Rational),
    tag(0x0005, GpsInfo, "GPSAltitudeRef", Byte),
    tag(0x0006, GpsInfo, "GPSAltitude", Rational),
    tag(0x0007, GpsInfo, "GPSTimeStamp", Rational),
    tag(0x001D, GpsInfo, "GPSDateStamp", Ascii),
];

/// Find a tag by its full key, e.g. `Exif.Photo.FNumber`.
pub fn lookup_key(key: &str) -> Option<&'static TagDef> {
    let mut parts = key.splitn(3, '.');
    if parts.next()? != "Exif" {
        return None;
    }
    let group = TagGroup::parse(parts.next()?)?;
    let name = parts.next()?;
    TAGS.iter()
        .find(|t| t.group == group && t.name == name)
}

pub fn lookup_code(code: u16) -> Option<&'static TagDef> {
    TAGS.iter().find(|t| t.code == code)
}

/// Key for a tag read from a file.
///
/// `ifd_index` 1 is the thumbnail IFD; its tags are named but kept apart.
pub fn key_for(code: u16, ifd_index: usize) -> String {
    let known = lookup_code(code);

    if ifd_index >= 1 {
        return match known {
            Some(t) => format!("Exif.Thumbnail.{}", t.name),
            None => format!("Exif.Thumbnail.0x{code:04x}"),
        };
    }

    match known {
        Some(t) => t.key(),
        None => format!("Exif.{}.0x{code:04x}", guess_group(code).as_str()),
    }
}

fn guess_group(code: u16) -> TagGroup {
    match code {
        0x0000..=0x001F => GpsInfo,
        0x9000..=0xAFFF => Photo,
        _ => Image,
    }
}

/// The tag name without its group prefix (text after the last `.`).
pub fn stripped_name(key: &str) -> &str {
    key.rsplit_once('.').map_or(key, |(_, name)| name)
}
