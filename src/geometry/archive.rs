//! Zip-based containers: shapefile/KML/GeoJSON bundles and KMZ.

use std::io::{Cursor, Read};

use geo::Geometry;
use tracing::debug;
use zip::ZipArchive;

use super::shapefile::{ShapefileDecoder, SHAPEFILE_DECODER};
use super::{geojson, kml};
use crate::error::GeometryError;

// ---

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// Largest uncompressed entry read from an upload.
const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

/// Read a `.zip` upload, preferring a shapefile payload, then KML, then GeoJSON.
pub(crate) fn read_zip(bytes: &[u8]) -> Result<Vec<Geometry<f64>>, GeometryError> {
    // ---
    let mut archive = open(bytes)?;
    let names = entry_names(&mut archive)?;
    debug!("Zip container entries: {:?}", names);

    if let Some(name) = find_entry(&names, &[".shp"]) {
        let payload = read_entry(&mut archive, name)?;
        return SHAPEFILE_DECODER.decode(&payload);
    }

    if let Some(name) = find_entry(&names, &[".kml"]) {
        let payload = read_entry(&mut archive, name)?;
        return kml::parse_kml(&utf8(payload)?);
    }

    if let Some(name) = find_entry(&names, &[".geojson", ".json"]) {
        let payload = read_entry(&mut archive, name)?;
        return geojson::features_from_slice(&payload);
    }

    Err(GeometryError::UnsupportedFormat(
        "archive contains no .shp, .kml, .geojson or .json entry".into(),
    ))
}

/// Unwrap a `.kmz` and parse its first `.kml` entry.
pub(crate) fn read_kmz(bytes: &[u8]) -> Result<Vec<Geometry<f64>>, GeometryError> {
    // ---
    let mut archive = open(bytes)?;
    let names = entry_names(&mut archive)?;
    let name = find_entry(&names, &[".kml"]).ok_or(GeometryError::MissingKml)?;
    let payload = read_entry(&mut archive, name)?;
    kml::parse_kml(&utf8(payload)?)
}

pub(crate) fn utf8(payload: Vec<u8>) -> Result<String, GeometryError> {
    String::from_utf8(payload)
        .map_err(|e| GeometryError::ParseFailure(format!("file is not valid UTF-8: {}", e)))
}

fn open(bytes: &[u8]) -> Result<Archive<'_>, GeometryError> {
    ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| GeometryError::MalformedContainer(format!("unreadable zip archive: {}", e)))
}

/// File entry names in archive order, excluding directories and resource forks.
fn entry_names(archive: &mut Archive<'_>) -> Result<Vec<String>, GeometryError> {
    // ---
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|e| {
            GeometryError::MalformedContainer(format!("unreadable zip entry {}: {}", i, e))
        })?;
        if entry.is_dir() || entry.name().starts_with("__MACOSX/") {
            continue;
        }
        names.push(entry.name().to_string());
    }
    Ok(names)
}

/// First entry whose name ends with one of `extensions`, case-insensitively.
fn find_entry<'n>(names: &'n [String], extensions: &[&str]) -> Option<&'n str> {
    // ---
    names
        .iter()
        .find(|name| {
            let lowered = name.to_lowercase();
            extensions.iter().any(|ext| lowered.ends_with(ext))
        })
        .map(String::as_str)
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, GeometryError> {
    read_entry_capped(archive, name, MAX_ENTRY_BYTES)
}

/// Read one entry, refusing to inflate more than `limit` bytes. The header's
/// size field is not trusted.
fn read_entry_capped(
    archive: &mut Archive<'_>,
    name: &str,
    limit: u64,
) -> Result<Vec<u8>, GeometryError> {
    // ---
    let entry = archive.by_name(name).map_err(|e| {
        GeometryError::MalformedContainer(format!("cannot open entry '{}': {}", name, e))
    })?;
    let mut payload = Vec::new();
    entry.take(limit + 1).read_to_end(&mut payload).map_err(|e| {
        GeometryError::MalformedContainer(format!("cannot read entry '{}': {}", name, e))
    })?;
    if payload.len() as u64 > limit {
        return Err(GeometryError::MalformedContainer(format!(
            "entry '{}' inflates beyond {} bytes",
            name, limit
        )));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let entries: Vec<(&str, &[u8])> =
            entries.iter().map(|(n, c)| (*n, c.as_bytes())).collect();
        build_zip_bytes(&entries)
    }

    fn build_zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        // ---
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    const POINT_JSON: &str = r#"{"type":"Point","coordinates":[1.0,2.0]}"#;
    const POINT_KML: &str = r#"<kml><Placemark><Point><coordinates>3,4</coordinates></Point></Placemark></kml>"#;

    #[test]
    fn zip_prefers_kml_over_geojson() {
        // ---
        let bytes = build_zip(&[("data/parcel.geojson", POINT_JSON), ("doc.KML", POINT_KML)]);
        let geoms = read_zip(&bytes).unwrap();
        assert_eq!(geoms, vec![Geometry::Point(geo::Point::new(3.0, 4.0))]);
    }

    #[test]
    fn zip_falls_back_to_geojson() {
        // ---
        let bytes = build_zip(&[("readme.txt", "hello"), ("parcel.json", POINT_JSON)]);
        let geoms = read_zip(&bytes).unwrap();
        assert_eq!(geoms, vec![Geometry::Point(geo::Point::new(1.0, 2.0))]);
    }

    #[test]
    fn zip_without_payload_is_unsupported() {
        // ---
        let bytes = build_zip(&[("readme.txt", "hello")]);
        assert!(matches!(
            read_zip(&bytes),
            Err(GeometryError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn kmz_without_kml_is_missing_kml() {
        // ---
        let bytes = build_zip(&[("parcel.json", POINT_JSON)]);
        assert_eq!(read_kmz(&bytes), Err(GeometryError::MissingKml));
    }

    #[test]
    fn corrupt_archive_is_malformed() {
        // ---
        assert!(matches!(
            read_zip(b"PK\x03\x04 truncated"),
            Err(GeometryError::MalformedContainer(_))
        ));
    }

    #[test]
    fn zip_prefers_shapefile_over_kml() {
        // ---
        let shp = crate::geometry::shapefile::unit_squares_shp(&[(10.0, 20.0)]);
        let bytes = build_zip_bytes(&[
            ("doc.kml", POINT_KML.as_bytes()),
            ("lots/LOTS.SHP", shp.as_slice()),
            ("lots/lots.prj", "GEOGCS[\"WGS 84\"]".as_bytes()),
        ]);
        let geoms = read_zip(&bytes).unwrap();
        assert_eq!(geoms.len(), 1);
        assert!(matches!(geoms[0], Geometry::Polygon(_)));
    }

    #[test]
    fn oversized_entry_is_refused() {
        // ---
        let zeros = vec![0u8; 64 * 1024];
        let bytes = build_zip_bytes(&[("parcel.json", zeros.as_slice())]);
        let mut archive = open(&bytes).unwrap();
        assert!(matches!(
            read_entry_capped(&mut archive, "parcel.json", 1024),
            Err(GeometryError::MalformedContainer(_))
        ));

        let mut archive = open(&bytes).unwrap();
        let payload = read_entry_capped(&mut archive, "parcel.json", 64 * 1024).unwrap();
        assert_eq!(payload.len(), 64 * 1024);
    }
}
