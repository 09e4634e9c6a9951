//! Pure conversions between raw metadata strings and the values they encode.
//!
//! Raw values arrive in the textual form the metadata reader produces:
//! rationals as `"num/den"`, GPS coordinates as three space-separated
//! rationals, Windows `XP*` fields as decimal byte lists, everything else as
//! plain text. Nothing in here performs I/O or keeps state.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt;

use crate::error::CodecError;

/// Which GPS axis a coordinate belongs to (decides the hemisphere letters).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Latitude,
    Longitude,
}

/// A raw value decoded by one of the codecs below.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Rational { num: i64, den: i64 },
    /// Signed decimal degrees, already hemisphere-adjusted.
    GpsCoordinate { degrees: f64 },
    Text { content: String },
    /// Text recovered from a decimal-byte-pair (UTF-16LE) encoding.
    BinaryText { content: String },
}

impl DecodedValue {
    /// Decode a single `"num/den"` rational with integer parts.
    pub fn rational(raw: &str) -> Result<Self, CodecError> {
        let (num, den) = raw
            .trim()
            .split_once('/')
            .ok_or_else(|| CodecError::InvalidFormat(format!("not a rational: {raw:?}")))?;
        let num: i64 = num
            .trim()
            .parse()
            .map_err(|_| CodecError::InvalidFormat(format!("non-numeric numerator: {raw:?}")))?;
        let den: i64 = den
            .trim()
            .parse()
            .map_err(|_| CodecError::InvalidFormat(format!("non-numeric denominator: {raw:?}")))?;
        if den == 0 {
            return Err(CodecError::InvalidFormat(format!("division by zero: {raw:?}")));
        }
        Ok(Self::Rational { num, den })
    }

    /// Decode a GPS DMS triple plus its hemisphere reference.
    pub fn gps(raw_dms: &str, hemisphere_ref: &str) -> Result<Self, CodecError> {
        decode_dms_str(raw_dms, hemisphere_ref).map(|degrees| Self::GpsCoordinate { degrees })
    }

    pub fn binary_text(raw: &str) -> Self {
        Self::BinaryText {
            content: decode_binary_text(raw),
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Rational { num, den } => Some(*num as f64 / *den as f64),
            Self::GpsCoordinate { degrees } => Some(*degrees),
            Self::Text { .. } | Self::BinaryText { .. } => None,
        }
    }

    /// Convert back into the raw textual form.
    ///
    /// GPS coordinates produce the unsigned DMS triple; the hemisphere
    /// reference is a separate tag, see [`hemisphere_ref`].
    pub fn to_raw(&self) -> String {
        match self {
            Self::Rational { num, den } => format!("{num}/{den}"),
            Self::GpsCoordinate { degrees } => encode_dms(*degrees),
            Self::Text { content } => content.clone(),
            Self::BinaryText { content } => encode_binary_text(content, true),
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rational { num, den } => write!(f, "{:.1}", *num as f64 / *den as f64),
            Self::GpsCoordinate { degrees } => write!(f, "{degrees:.6}"),
            Self::Text { content } | Self::BinaryText { content } => f.write_str(content),
        }
    }
}

/// Parse a `"num/den"` string.
///
/// Returns `None` when there is no `/`, when either side is not a number, or
/// when the denominator is zero.
pub fn parse_rational(s: &str) -> Option<f64> {
    let (num, den) = s.trim().split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 {
        return None;
    }
    let value = num / den;
    value.is_finite().then_some(value)
}

/// Strict form of [`parse_rational`]: exactly one `/`, numeric parts, non-zero
/// denominator.
pub fn parse_fraction(s: &str) -> Result<f64, CodecError> {
    let parts: Vec<&str> = s.trim().split('/').collect();
    if parts.len() != 2 {
        return Err(CodecError::InvalidFormat(format!("not a fraction: {s:?}")));
    }
    let num: f64 = parts[0]
        .trim()
        .parse()
        .map_err(|_| CodecError::InvalidFormat(format!("non-numeric fraction: {s:?}")))?;
    let den: f64 = parts[1]
        .trim()
        .parse()
        .map_err(|_| CodecError::InvalidFormat(format!("non-numeric fraction: {s:?}")))?;
    if den == 0.0 {
        return Err(CodecError::InvalidFormat(format!("division by zero: {s:?}")));
    }
    let value = num / den;
    if !value.is_finite() {
        return Err(CodecError::InvalidFormat(format!("not a finite fraction: {s:?}")));
    }
    Ok(value)
}

/// Convert degrees/minutes/seconds rationals to signed decimal degrees.
///
/// Exactly three components are required; a missing one is an error, never a
/// zero.
pub fn decode_dms(components: &[&str], hemisphere_ref: &str) -> Result<f64, CodecError> {
    if components.len() != 3 {
        return Err(CodecError::InvalidFormat(format!(
            "DMS needs 3 components, got {}",
            components.len()
        )));
    }

    let degrees = parse_fraction(components[0])?;
    let minutes = parse_fraction(components[1])?;
    let seconds = parse_fraction(components[2])?;

    let decimal = degrees + minutes / 60.0 + seconds / 3600.0;

    let reference = hemisphere_ref.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if reference == "S" || reference == "W" {
        Ok(-decimal)
    } else {
        Ok(decimal)
    }
}

/// [`decode_dms`] on a raw space-separated triple such as `"10/1 30/1 0/1"`.
pub fn decode_dms_str(raw: &str, hemisphere_ref: &str) -> Result<f64, CodecError> {
    let components: Vec<&str> = raw.split_whitespace().collect();
    decode_dms(&components, hemisphere_ref)
}

/// Encode the magnitude of a decimal coordinate as a DMS rational triple.
/// Seconds keep four decimal places.
pub fn encode_dms(decimal: f64) -> String {
    let abs = decimal.abs();
    let mut degrees = abs.trunc() as u32;
    let minutes_f = (abs - degrees as f64) * 60.0;
    let mut minutes = minutes_f.trunc() as u32;
    let mut seconds = ((minutes_f - minutes as f64) * 60.0 * 10_000.0).round() as u32;

    if seconds >= 600_000 {
        seconds -= 600_000;
        minutes += 1;
    }
    if minutes >= 60 {
        minutes -= 60;
        degrees += 1;
    }

    format!("{degrees}/1 {minutes}/1 {seconds}/10000")
}

/// Hemisphere letter for a signed coordinate.
pub fn hemisphere_ref(decimal: f64, axis: Axis) -> &'static str {
    match (axis, decimal < 0.0) {
        (Axis::Latitude, false) => "N",
        (Axis::Latitude, true) => "S",
        (Axis::Longitude, false) => "E",
        (Axis::Longitude, true) => "W",
    }
}

/// Read text that may be stored as a decimal byte list.
///
/// Anything that does not look like a list of bytes is returned unchanged.
/// Byte lists are read as little-endian UTF-16 pairs; only the low byte of
/// each code unit is kept and non-printable bytes become `?`. All-digit plain
/// text is indistinguishable from a byte list and will be decoded.
pub fn decode_binary_text(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return s.to_string();
    }
    if trimmed
        .chars()
        .any(|c| !c.is_ascii_digit() && !c.is_whitespace())
    {
        return s.to_string();
    }
    if !trimmed.chars().any(|c| c.is_ascii_digit()) {
        return s.to_string();
    }

    let mut bytes = Vec::new();
    for token in trimmed.split_whitespace() {
        match token.parse::<u16>() {
            Ok(value) if value <= 255 => bytes.push(value as u8),
            _ => return s.to_string(),
        }
    }

    let mut result = String::new();
    for unit in bytes.chunks(2) {
        let low = unit[0];
        let high = unit.get(1).copied().unwrap_or(0);
        if low == 0 && high == 0 {
            continue;
        }
        result.push(if (32..=126).contains(&low) {
            low as char
        } else {
            '?'
        });
    }

    if result.is_empty() {
        return s.to_string();
    }
    result
}

/// Encode text as the decimal UTF-16LE byte list used by Windows `XP*` tags,
/// terminated by `"0 0"`. With `emit_utf16 == false` the text passes through.
pub fn encode_binary_text(s: &str, emit_utf16: bool) -> String {
    if !emit_utf16 {
        return s.to_string();
    }

    let mut out = String::new();
    for unit in s.encode_utf16() {
        let [low, high] = unit.to_le_bytes();
        out.push_str(&format!("{low} {high} "));
    }
    out.push_str("0 0");
    out
}

/// Whether `s` is canonical standard base64.
///
/// Short strings are rejected outright, and the decoded bytes must re-encode
/// to exactly the input.
pub fn is_base64(s: &str) -> bool {
    if s.len() < 8 {
        return false;
    }

    let body = s.trim_end_matches('=');
    if s.len() - body.len() > 2 {
        return false;
    }
    if !body
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
    {
        return false;
    }
    if s.len() % 4 != 0 {
        return false;
    }

    match STANDARD.decode(s) {
        Ok(decoded) if !decoded.is_empty() => STANDARD.encode(&decoded) == s,
        _ => false,
    }
}

/// Base64-encode `s` unless it already is base64.
pub fn to_base64(s: &str) -> String {
    if is_base64(s) {
        return s.to_string();
    }
    STANDARD.encode(s.as_bytes())
}

/// Decode `s` if it is base64, otherwise return it unchanged.
pub fn from_base64(s: &str) -> Result<String, CodecError> {
    if !is_base64(s) {
        log::debug!("{s:?} is not base64, leaving as-is");
        return Ok(s.to_string());
    }

    let decoded = STANDARD
        .decode(s)
        .map_err(|e| CodecError::Decode(e.to_string()))?;
    if decoded.is_empty() && !s.is_empty() {
        return Err(CodecError::Decode(format!("{s:?} decoded to nothing")));
    }
    String::from_utf8(decoded)
        .map_err(|e| CodecError::Decode(format!("{s:?} is not UTF-8 text: {e}")))
}

/// Human-readable byte count: `"950.0 B"`, `"1.5 KB"`, `"12 MB"`.
///
/// Bytes always keep one decimal; larger units keep one decimal below 10 and
/// none above. Scaling stops at TB.
pub fn format_byte_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut size = bytes as f64;
    let mut index = 0;
    while size >= 1024.0 && index < UNITS.len() - 1 {
        size /= 1024.0;
        index += 1;
    }

    if index == 0 || size < 10.0 {
        format!("{size:.1} {}", UNITS[index])
    } else {
        format!("{size:.0} {}", UNITS[index])
    }
}

/// Pixels-per-unit multiplier that turns a resolution into dots per inch.
///
/// Only `2` (inch) and `3` (centimetre) are known; anything else is rejected.
pub fn resolution_multiplier(unit: &str) -> Result<f64, CodecError> {
    match unit.trim() {
        "2" => Ok(1.0),
        "3" => Ok(2.54),
        other => Err(CodecError::UnsupportedValue {
            what: "resolution unit".to_string(),
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── parse_rational ───────────────────────────────────────────────

    #[test]
    fn rational_zero_numerator() {
        assert_eq!(parse_rational("0/5"), Some(0.0));
    }

    #[test]
    fn rational_zero_denominator_is_none() {
        assert_eq!(parse_rational("5/0"), None);
    }

    #[test]
    fn rational_without_slash_is_none() {
        assert_eq!(parse_rational("no-slash"), None);
        assert_eq!(parse_rational("72"), None);
    }

    #[test]
    fn rational_regular_values() {
        assert_eq!(parse_rational("72/1"), Some(72.0));
        assert_eq!(parse_rational(" 28/10 "), Some(2.8));
        assert_eq!(parse_rational("abc/10"), None);
    }

    // ── parse_fraction ───────────────────────────────────────────────

    #[test]
    fn fraction_rejects_malformed_input() {
        assert!(parse_fraction("1/2/3").is_err());
        assert!(parse_fraction("x/2").is_err());
        assert!(parse_fraction("1/0").is_err());
        assert_eq!(parse_fraction("3/4"), Ok(0.75));
    }

    #[test]
    fn fraction_rejects_non_finite_parts() {
        assert!(parse_fraction("inf/1").is_err());
        assert!(parse_fraction("NaN/1").is_err());
        assert!(decode_dms(&["inf/1", "0/1", "0/1"], "N").is_err());
    }

    // ── decode_dms ───────────────────────────────────────────────────

    #[test]
    fn dms_north_is_positive() {
        let v = decode_dms(&["10/1", "30/1", "0/1"], "N").unwrap();
        assert!((v - 10.5).abs() < 1e-9);
    }

    #[test]
    fn dms_south_and_west_are_negative() {
        let s = decode_dms(&["10/1", "30/1", "0/1"], "S").unwrap();
        assert!((s + 10.5).abs() < 1e-9);
        let w = decode_dms(&["10/1", "30/1", "0/1"], "W").unwrap();
        assert!((w + 10.5).abs() < 1e-9);
    }

    #[test]
    fn dms_with_two_components_fails() {
        let err = decode_dms(&["10/1", "30/1"], "N").unwrap_err();
        assert!(matches!(err, CodecError::InvalidFormat(_)));
    }

    #[test]
    fn dms_with_four_components_fails() {
        assert!(decode_dms(&["1/1", "2/1", "3/1", "4/1"], "N").is_err());
    }

    #[test]
    fn dms_zero_denominator_fails() {
        assert!(decode_dms(&["10/1", "30/0", "0/1"], "N").is_err());
    }

    #[test]
    fn dms_from_raw_string() {
        let v = decode_dms_str("48/1 51/1 2964/100", "N").unwrap();
        assert!((v - 48.858233).abs() < 1e-5);
    }

    #[test]
    fn dms_reference_with_nul_terminator() {
        let v = decode_dms_str("10/1 30/1 0/1", "S\0").unwrap();
        assert!(v < 0.0);
    }

    // ── encode_dms ───────────────────────────────────────────────────

    #[test]
    fn encode_dms_roundtrips_through_decode() {
        let raw = encode_dms(-122.4194);
        let back = decode_dms_str(&raw, hemisphere_ref(-122.4194, Axis::Longitude)).unwrap();
        assert!((back + 122.4194).abs() < 1e-6);
    }

    #[test]
    fn encode_dms_carries_rounded_seconds() {
        assert_eq!(encode_dms(10.999_999_999), "11/1 0/1 0/10000");
    }

    #[test]
    fn hemisphere_letters() {
        assert_eq!(hemisphere_ref(1.0, Axis::Latitude), "N");
        assert_eq!(hemisphere_ref(-1.0, Axis::Latitude), "S");
        assert_eq!(hemisphere_ref(0.0, Axis::Longitude), "E");
        assert_eq!(hemisphere_ref(-0.5, Axis::Longitude), "W");
    }

    // ── binary text ──────────────────────────────────────────────────

    #[test]
    fn binary_text_roundtrip_ascii() {
        let encoded = encode_binary_text("Hello", true);
        assert_eq!(encoded, "72 0 101 0 108 0 108 0 111 0 0 0");
        assert_eq!(decode_binary_text(&encoded), "Hello");
    }

    #[test]
    fn binary_text_plain_text_unchanged() {
        assert_eq!(decode_binary_text("Sunset at the pier"), "Sunset at the pier");
        assert_eq!(decode_binary_text("   "), "   ");
        assert_eq!(decode_binary_text(""), "");
    }

    #[test]
    fn binary_text_out_of_range_returns_original() {
        assert_eq!(decode_binary_text("72 0 300 0"), "72 0 300 0");
    }

    #[test]
    fn binary_text_non_printable_becomes_question_mark() {
        // U+00E9 keeps only its low byte (233), which is not printable ASCII.
        assert_eq!(decode_binary_text("67 0 233 0 0 0"), "C?");
    }

    #[test]
    fn binary_text_only_terminator_returns_original() {
        assert_eq!(decode_binary_text("0 0"), "0 0");
    }

    #[test]
    fn binary_text_all_digit_plain_text_is_decoded() {
        // Known heuristic false positive: "65" reads as the byte 'A'.
        assert_eq!(decode_binary_text("65"), "A");
    }

    #[test]
    fn binary_text_passthrough_without_utf16() {
        assert_eq!(encode_binary_text("Title", false), "Title");
    }

    #[test]
    fn binary_text_empty_encodes_terminator() {
        assert_eq!(encode_binary_text("", true), "0 0");
    }

    // ── base64 ───────────────────────────────────────────────────────

    #[test]
    fn base64_short_strings_rejected() {
        assert!(!is_base64("QUJD"));
        assert!(!is_base64("QUJDRA="));
    }

    #[test]
    fn base64_valid_strings() {
        assert!(is_base64("SGVsbG8gV29ybGQ="));
        assert!(is_base64("QUJDREVGR0g="));
    }

    #[test]
    fn base64_rejects_bad_alphabet_and_length() {
        assert!(!is_base64("SGVsbG8g!29ybGQ="));
        assert!(!is_base64("SGVsbG8gV29ybGQ"));
        assert!(!is_base64("SGVsbG8===="));
    }

    #[test]
    fn base64_rejects_non_canonical_padding_bits() {
        // "QUJDREVGR0h=" decodes (lenient) or fails, but never re-encodes identically.
        assert!(!is_base64("QUJDREVGR0h="));
    }

    #[test]
    fn to_base64_is_idempotent() {
        let once = to_base64("Hello World");
        assert_eq!(once, "SGVsbG8gV29ybGQ=");
        assert_eq!(to_base64(&once), once);
    }

    #[test]
    fn from_base64_decodes_or_passes_through() {
        assert_eq!(from_base64("SGVsbG8gV29ybGQ=").unwrap(), "Hello World");
        assert_eq!(from_base64("plain").unwrap(), "plain");
    }

    #[test]
    fn from_base64_rejects_bytes_that_are_not_text() {
        assert!(is_base64("//79/w/+/f8="));
        assert!(matches!(from_base64("//79/w/+/f8="), Err(CodecError::Decode(_))));
    }

    // ── format_byte_size ─────────────────────────────────────────────

    #[test]
    fn byte_size_below_one_kilobyte() {
        assert_eq!(format_byte_size(0), "0.0 B");
        assert_eq!(format_byte_size(950), "950.0 B");
        assert_eq!(format_byte_size(1023), "1023.0 B");
    }

    #[test]
    fn byte_size_kilobyte_boundary() {
        assert_eq!(format_byte_size(1024), "1.0 KB");
        assert_eq!(format_byte_size(1536), "1.5 KB");
    }

    #[test]
    fn byte_size_ten_unit_transition() {
        assert_eq!(format_byte_size(10 * 1024 - 100), "9.9 KB");
        assert_eq!(format_byte_size(10 * 1024), "10 KB");
        assert_eq!(format_byte_size(10 * 1024 * 1024), "10 MB");
        assert_eq!(format_byte_size(5 * 1024 * 1024 * 1024), "5.0 GB");
    }

    #[test]
    fn byte_size_stops_at_terabytes() {
        assert_eq!(format_byte_size(2048 * 1024u64.pow(4)), "2048 TB");
    }

    // ── resolution unit ──────────────────────────────────────────────

    #[test]
    fn resolution_units() {
        assert_eq!(resolution_multiplier("2"), Ok(1.0));
        assert_eq!(resolution_multiplier("3"), Ok(2.54));
        assert!(matches!(
            resolution_multiplier("1"),
            Err(CodecError::UnsupportedValue { .. })
        ));
    }

    // ── DecodedValue ─────────────────────────────────────────────────

    #[test]
    fn decoded_rational_roundtrip_and_display() {
        let v = DecodedValue::rational("28/10").unwrap();
        assert_eq!(v, DecodedValue::Rational { num: 28, den: 10 });
        assert_eq!(v.to_string(), "2.8");
        assert_eq!(v.to_raw(), "28/10");
        assert!(DecodedValue::rational("1/0").is_err());
    }

    #[test]
    fn decoded_gps_and_binary_text() {
        let v = DecodedValue::gps("10/1 30/1 0/1", "S").unwrap();
        assert_eq!(v.as_f64(), Some(-10.5));
        assert_eq!(v.to_raw(), "10/1 30/1 0/10000");

        let t = DecodedValue::binary_text("72 0 105 0 0 0");
        assert_eq!(t.to_string(), "Hi");
        assert_eq!(t.to_raw(), "72 0 105 0 0 0");
    }
}
