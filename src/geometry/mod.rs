//! Geometry ingestion gateway.
//!
//! Uploaded files are dispatched by extension to the container, KML, GeoJSON
//! or shapefile readers in the sibling modules. Every path yields a list of
//! feature geometries that [`combine_geometries`] folds into one canonical
//! WGS84 geometry.

mod archive;
pub mod geojson;
mod kml;
pub mod metrics;
pub mod shapefile;

use std::path::Path;

use geo::{
    Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon, Point,
    Polygon,
};
use serde_json::Value;
use tracing::debug;

use self::shapefile::{ShapefileDecoder, SHAPEFILE_DECODER};
use crate::error::GeometryError;

pub use metrics::compute_metrics;

// ---

/// File extensions accepted by [`parse_geometry_file`].
pub const SUPPORTED_EXTENSIONS: [&str; 6] = [".zip", ".shp", ".kml", ".kmz", ".geojson", ".json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Zip,
    Shapefile,
    Kml,
    Kmz,
    GeoJson,
}

impl FileKind {
    fn from_filename(filename: &str) -> Result<Self, GeometryError> {
        // ---
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "zip" => Ok(FileKind::Zip),
            "shp" => Ok(FileKind::Shapefile),
            "kml" => Ok(FileKind::Kml),
            "kmz" => Ok(FileKind::Kmz),
            "geojson" | "json" => Ok(FileKind::GeoJson),
            _ => Err(GeometryError::UnsupportedFormat(format!(
                "'{}' is not one of {}",
                filename,
                SUPPORTED_EXTENSIONS.join(", ")
            ))),
        }
    }
}

/// Parse an uploaded geo file into one canonical geometry.
pub fn parse_geometry_file(bytes: &[u8], filename: &str) -> Result<Geometry<f64>, GeometryError> {
    // ---
    let kind = FileKind::from_filename(filename)?;
    debug!("Parsing {} ({} bytes) as {:?}", filename, bytes.len(), kind);

    let features = match kind {
        FileKind::Zip => archive::read_zip(bytes)?,
        FileKind::Shapefile => SHAPEFILE_DECODER.decode(bytes)?,
        FileKind::Kml => kml::parse_kml(&archive::utf8(bytes.to_vec())?)?,
        FileKind::Kmz => archive::read_kmz(bytes)?,
        FileKind::GeoJson => geojson::features_from_slice(bytes)?,
    };
    combine_geometries(features)
}

/// Parse a geometry supplied inline as GeoJSON (Geometry, Feature or FeatureCollection).
pub fn parse_inline_geometry(value: &Value) -> Result<Geometry<f64>, GeometryError> {
    combine_geometries(geojson::features_from_value(value)?)
}

/// Fold feature geometries into one.
///
/// A single feature passes through unchanged. Features sharing one type are
/// concatenated into the matching `Multi*`; `Multi*` inputs of one kind merge
/// the same way. Anything mixed becomes a `GeometryCollection`.
pub fn combine_geometries(
    mut geometries: Vec<Geometry<f64>>,
) -> Result<Geometry<f64>, GeometryError> {
    // ---
    match geometries.len() {
        0 => {
            return Err(GeometryError::EmptyGeometry(
                "no features with geometry were found".into(),
            ))
        }
        1 => return Ok(geometries.remove(0)),
        _ => {}
    }

    if let Some(points) = collect_all(&geometries, points_of) {
        return Ok(Geometry::MultiPoint(MultiPoint(points)));
    }
    if let Some(lines) = collect_all(&geometries, lines_of) {
        return Ok(Geometry::MultiLineString(MultiLineString(lines)));
    }
    if let Some(polygons) = collect_all(&geometries, polygons_of) {
        return Ok(Geometry::MultiPolygon(MultiPolygon(polygons)));
    }

    debug!("Mixed feature types, wrapping {} members", geometries.len());
    Ok(Geometry::GeometryCollection(GeometryCollection(geometries)))
}

/// Apply `extract` to every geometry; `None` as soon as one does not fit.
fn collect_all<T: Clone>(
    geometries: &[Geometry<f64>],
    extract: fn(&Geometry<f64>) -> Option<Vec<T>>,
) -> Option<Vec<T>> {
    // ---
    let mut out = Vec::new();
    for geometry in geometries {
        out.extend(extract(geometry)?);
    }
    Some(out)
}

fn points_of(geometry: &Geometry<f64>) -> Option<Vec<Point<f64>>> {
    match geometry {
        Geometry::Point(p) => Some(vec![*p]),
        Geometry::MultiPoint(mp) => Some(mp.0.clone()),
        _ => None,
    }
}

fn lines_of(geometry: &Geometry<f64>) -> Option<Vec<LineString<f64>>> {
    match geometry {
        Geometry::LineString(ls) => Some(vec![ls.clone()]),
        Geometry::MultiLineString(mls) => Some(mls.0.clone()),
        _ => None,
    }
}

fn polygons_of(geometry: &Geometry<f64>) -> Option<Vec<Polygon<f64>>> {
    match geometry {
        Geometry::Polygon(p) => Some(vec![p.clone()]),
        Geometry::MultiPolygon(mp) => Some(mp.0.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use geo::{line_string, polygon};
    use serde_json::json;

    fn square(offset: f64) -> Polygon<f64> {
        polygon![
            (x: offset, y: 0.0),
            (x: offset + 1.0, y: 0.0),
            (x: offset + 1.0, y: 1.0),
            (x: offset, y: 1.0),
            (x: offset, y: 0.0),
        ]
    }

    #[test]
    fn single_polygon_passes_through() {
        // ---
        let value = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": { "name": "lot 4" },
                "geometry": geojson::geometry_to_value(&Geometry::Polygon(square(0.0)))
            }]
        });
        let geom = parse_inline_geometry(&value).unwrap();
        assert_eq!(geom, Geometry::Polygon(square(0.0)));
    }

    #[test]
    fn three_polygons_become_multipolygon() {
        // ---
        let geoms = (0..3)
            .map(|i| Geometry::Polygon(square(i as f64 * 2.0)))
            .collect();
        let Geometry::MultiPolygon(mp) = combine_geometries(geoms).unwrap() else {
            panic!("expected multipolygon");
        };
        assert_eq!(mp.0.len(), 3);
        assert_eq!(mp.0[2], square(4.0));
    }

    #[test]
    fn mixed_types_become_collection() {
        // ---
        let geoms = vec![
            Geometry::Polygon(square(0.0)),
            Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 2.0, y: 2.0)]),
        ];
        let Geometry::GeometryCollection(gc) = combine_geometries(geoms).unwrap() else {
            panic!("expected geometry collection");
        };
        assert_eq!(gc.0.len(), 2);
    }

    #[test]
    fn points_and_multipoints_merge() {
        // ---
        let geoms = vec![
            Geometry::Point(Point::new(1.0, 1.0)),
            Geometry::MultiPoint(MultiPoint(vec![Point::new(2.0, 2.0), Point::new(3.0, 3.0)])),
        ];
        let Geometry::MultiPoint(mp) = combine_geometries(geoms).unwrap() else {
            panic!("expected multipoint");
        };
        assert_eq!(mp.0.len(), 3);
    }

    #[test]
    fn empty_feature_collection_is_empty_geometry() {
        // ---
        let value = json!({
            "type": "FeatureCollection",
            "features": [{ "type": "Feature", "properties": {}, "geometry": null }]
        });
        assert!(matches!(
            parse_inline_geometry(&value),
            Err(GeometryError::EmptyGeometry(_))
        ));
    }

    #[test]
    fn extension_dispatch() {
        // ---
        assert!(matches!(
            parse_geometry_file(b"whatever", "parcel.txt"),
            Err(GeometryError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            parse_geometry_file(b"whatever", "no_extension"),
            Err(GeometryError::UnsupportedFormat(_))
        ));

        let body = br#"{"type":"Point","coordinates":[36.8,-1.3]}"#;
        let geom = parse_geometry_file(body, "Site.GeoJSON").unwrap();
        assert_eq!(geom, Geometry::Point(Point::new(36.8, -1.3)));
    }

    #[test]
    fn kml_file_with_two_placemarks() {
        // ---
        let body = r#"<kml><Document>
            <Placemark><Polygon><outerBoundaryIs><LinearRing>
              <coordinates>0,0 1,0 1,1 0,1 0,0</coordinates>
            </LinearRing></outerBoundaryIs></Polygon></Placemark>
            <Placemark><Polygon><outerBoundaryIs><LinearRing>
              <coordinates>5,5 6,5 6,6 5,6 5,5</coordinates>
            </LinearRing></outerBoundaryIs></Polygon></Placemark>
          </Document></kml>"#;
        let geom = parse_geometry_file(body.as_bytes(), "plots.kml").unwrap();
        let Geometry::MultiPolygon(mp) = geom else {
            panic!("expected multipolygon");
        };
        assert_eq!(mp.0.len(), 2);
    }

    #[test]
    fn kml_file_with_edge_sharing_placemarks_is_measurable() {
        // ---
        let body = r#"<kml><Document>
            <Placemark><Polygon><outerBoundaryIs><LinearRing>
              <coordinates>0,0 1,0 1,1 0,1 0,0</coordinates>
            </LinearRing></outerBoundaryIs></Polygon></Placemark>
            <Placemark><Polygon><outerBoundaryIs><LinearRing>
              <coordinates>1,0 2,0 2,1 1,1 1,0</coordinates>
            </LinearRing></outerBoundaryIs></Polygon></Placemark>
          </Document></kml>"#;
        let geom = parse_geometry_file(body.as_bytes(), "adjacent.kml").unwrap();
        assert!(matches!(geom, Geometry::MultiPolygon(ref mp) if mp.0.len() == 2));

        let metrics = compute_metrics(&geom).unwrap();
        assert!(metrics.area_sq_meters > 2.4e10 && metrics.area_sq_meters < 2.5e10);
    }
}
