use std::path::Path;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDateTime, Timelike};
use exif::{In, Tag, Value};
use reverse_geocoder::ReverseGeocoder;
use tracing::debug;

use crate::{BlockKind, ExtractError, MetadataBlock};

pub fn is_image_extension(ext: &str) -> bool {
    matches!(
        ext,
        "png" | "jpg" | "jpeg" | "bmp" | "tiff" | "tif" | "gif" | "webp"
    )
}

/// OCR the image and summarize its EXIF metadata.
///
/// Either half may fail independently; the file is skipped only when both
/// come back empty.
pub fn read_image(path: &Path) -> Result<Vec<MetadataBlock>, ExtractError> {
    let mut blocks = Vec::new();

    match run_ocr(path) {
        Ok(text) if !text.trim().is_empty() => blocks.push(MetadataBlock {
            kind: BlockKind::Ocr,
            text: text.trim().to_string(),
        }),
        Ok(_) => {}
        Err(reason) => debug!("ocr failed for {}: {}", path.display(), reason),
    }

    if let Some(summary) = exif_summary(path) {
        blocks.push(MetadataBlock {
            kind: BlockKind::Ocr,
            text: summary,
        });
    }

    if blocks.is_empty() {
        return Err(ExtractError::skipped(path, "no text or metadata in image"));
    }
    Ok(blocks)
}

fn run_ocr(path: &Path) -> Result<String, String> {
    let mut engine = leptess::LepTess::new(None, "eng").map_err(|e| e.to_string())?;
    engine.set_image(path).map_err(|e| e.to_string())?;
    engine.get_utf8_text().map_err(|e| e.to_string())
}

/// Camera, lens, numeric settings, humanized timestamp, and location, joined
/// into a single searchable line.
fn exif_summary(path: &Path) -> Option<String> {
    let file = std::fs::File::open(path).ok()?;
    let mut reader = std::io::BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;

    let mut parts: Vec<String> = Vec::new();

    let field_text = |tag: Tag| -> Option<String> {
        exif.get_field(tag, In::PRIMARY)
            .map(|f| f.display_value().to_string().replace('"', "").trim().to_string())
    };

    if let Some(raw) = field_text(Tag::DateTimeOriginal).or_else(|| field_text(Tag::DateTime)) {
        parts.push(humanize_exif_timestamp(&raw));
    }

    match (field_text(Tag::Make), field_text(Tag::Model)) {
        (Some(make), Some(model)) => parts.push(format!("Camera: {make} {model}")),
        (Some(make), None) => parts.push(format!("Camera: {make}")),
        _ => {}
    }
    if let Some(lens) = field_text(Tag::LensModel) {
        parts.push(format!("Lens: {lens}"));
    }
    if let Some(f) = field_text(Tag::FNumber) {
        parts.push(format!("f/{f}"));
    }
    if let Some(t) = field_text(Tag::ExposureTime) {
        parts.push(format!("{t}s"));
    }
    if let Some(iso) = field_text(Tag::PhotographicSensitivity) {
        parts.push(format!("ISO {iso}"));
    }
    if let Some(fl) = field_text(Tag::FocalLength) {
        parts.push(format!("{fl}mm"));
    }

    let lat = gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef);
    let lon = gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef);
    if let (Some(lat), Some(lon)) = (lat, lon) {
        parts.push(format!("Location: {}", reverse_geocode(lat, lon)));
    }

    if let Some(artist) = field_text(Tag::Artist) {
        parts.push(format!("Artist: {artist}"));
    }
    if let Some(description) = field_text(Tag::ImageDescription) {
        parts.push(description);
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

/// Expand an EXIF timestamp into a searchable phrase, e.g.
/// `2024-07-15, Monday, summer morning`.
fn humanize_exif_timestamp(raw: &str) -> String {
    let cleaned = raw.trim();
    let parsed = NaiveDateTime::parse_from_str(cleaned, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(cleaned, "%Y:%m:%d %H:%M:%S"));

    let Ok(dt) = parsed else {
        return format!("Date: {cleaned}");
    };

    let season = match dt.month() {
        3..=5 => "spring",
        6..=8 => "summer",
        9..=11 => "autumn",
        _ => "winter",
    };
    let time_of_day = match dt.hour() {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=20 => "evening",
        _ => "night",
    };

    format!(
        "{}, {}, {} {}",
        dt.format("%Y-%m-%d"),
        dt.format("%A"),
        season,
        time_of_day
    )
}

fn reverse_geocode(lat: f64, lon: f64) -> String {
    static GEOCODER: LazyLock<ReverseGeocoder> = LazyLock::new(ReverseGeocoder::new);

    let result = GEOCODER.search((lat, lon));
    let city = &result.record.name;
    let region = &result.record.admin1;
    let country = &result.record.cc;
    if region.is_empty() {
        format!("{city}, {country}")
    } else {
        format!("{city}, {region}, {country}")
    }
}

/// Degrees/minutes/seconds rationals to a signed decimal coordinate.
fn gps_coordinate(exif: &exif::Exif, coordinate_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(coordinate_tag, In::PRIMARY)?;
    let values: Vec<f64> = match &field.value {
        Value::Rational(rationals) => {
            if rationals.iter().any(|r| r.denom == 0) {
                return None;
            }
            rationals
                .iter()
                .map(|r| r.num as f64 / r.denom as f64)
                .collect()
        }
        _ => return None,
    };
    if values.len() < 3 {
        return None;
    }

    let mut coordinate = values[0] + values[1] / 60.0 + values[2] / 3600.0;
    if let Some(reference) = exif.get_field(ref_tag, In::PRIMARY) {
        let reference = reference.display_value().to_string();
        if reference.contains('S') || reference.contains('W') {
            coordinate = -coordinate;
        }
    }
    Some(coordinate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_extension_table() {
        assert!(is_image_extension("png"));
        assert!(is_image_extension("webp"));
        assert!(!is_image_extension("rs"));
        assert!(!is_image_extension("pdf"));
    }

    #[test]
    fn timestamp_expansion_matches_expected_phrase() {
        assert_eq!(
            humanize_exif_timestamp("2024:07:15 09:30:00"),
            "2024-07-15, Monday, summer morning"
        );
        assert_eq!(
            humanize_exif_timestamp("2023-12-24 22:01:12"),
            "2023-12-24, Sunday, winter night"
        );
    }

    #[test]
    fn unparseable_timestamp_passes_through() {
        assert_eq!(humanize_exif_timestamp("whenever"), "Date: whenever");
    }
}
