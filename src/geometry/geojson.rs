//! GeoJSON reading and writing over `serde_json::Value` and `geo` types.

use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use serde_json::{json, Value};

use crate::error::GeometryError;

// ---

/// Parse raw GeoJSON bytes into the geometries of every feature they contain.
pub(crate) fn features_from_slice(bytes: &[u8]) -> Result<Vec<Geometry<f64>>, GeometryError> {
    // ---
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| GeometryError::ParseFailure(format!("invalid JSON: {}", e)))?;
    features_from_value(&value)
}

/// Accept a bare Geometry, a Feature, or a FeatureCollection.
///
/// Features whose geometry is `null` are skipped; the caller decides what an
/// empty result means.
pub fn features_from_value(value: &Value) -> Result<Vec<Geometry<f64>>, GeometryError> {
    // ---
    match value.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    GeometryError::ParseFailure("FeatureCollection has no features array".into())
                })?;

            let mut geometries = Vec::with_capacity(features.len());
            for feature in features {
                match feature.get("geometry") {
                    None | Some(Value::Null) => continue,
                    Some(geometry) => geometries.push(geometry_from_value(geometry)?),
                }
            }
            Ok(geometries)
        }
        Some("Feature") => match value.get("geometry") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(geometry) => Ok(vec![geometry_from_value(geometry)?]),
        },
        Some(_) => Ok(vec![geometry_from_value(value)?]),
        None => Err(GeometryError::ParseFailure(
            "GeoJSON object has no type member".into(),
        )),
    }
}

/// Parse a GeoJSON geometry text, as returned by `ST_AsGeoJSON`.
pub fn geometry_from_str(text: &str) -> Result<Geometry<f64>, GeometryError> {
    // ---
    let value: Value = serde_json::from_str(text)
        .map_err(|e| GeometryError::ParseFailure(format!("invalid JSON: {}", e)))?;
    geometry_from_value(&value)
}

/// Parse one GeoJSON geometry object.
pub fn geometry_from_value(value: &Value) -> Result<Geometry<f64>, GeometryError> {
    // ---
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| GeometryError::ParseFailure("geometry has no type member".into()))?;

    if kind == "GeometryCollection" {
        let members = value
            .get("geometries")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                GeometryError::ParseFailure("GeometryCollection has no geometries array".into())
            })?;
        let members = members
            .iter()
            .map(geometry_from_value)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Geometry::GeometryCollection(GeometryCollection(members)));
    }

    let coords = value
        .get("coordinates")
        .ok_or_else(|| GeometryError::ParseFailure(format!("{} has no coordinates", kind)))?;

    let geometry = match kind {
        "Point" => Geometry::Point(Point(parse_position(coords)?)),
        "LineString" => Geometry::LineString(parse_line(coords)?),
        "Polygon" => Geometry::Polygon(parse_polygon(coords)?),
        "MultiPoint" => Geometry::MultiPoint(MultiPoint(
            as_array(coords)?
                .iter()
                .map(|p| parse_position(p).map(Point))
                .collect::<Result<_, _>>()?,
        )),
        "MultiLineString" => Geometry::MultiLineString(MultiLineString(
            as_array(coords)?
                .iter()
                .map(parse_line)
                .collect::<Result<_, _>>()?,
        )),
        "MultiPolygon" => Geometry::MultiPolygon(MultiPolygon(
            as_array(coords)?
                .iter()
                .map(parse_polygon)
                .collect::<Result<_, _>>()?,
        )),
        other => {
            return Err(GeometryError::ParseFailure(format!(
                "unsupported geometry type '{}'",
                other
            )))
        }
    };
    Ok(geometry)
}

fn as_array(value: &Value) -> Result<&Vec<Value>, GeometryError> {
    value
        .as_array()
        .ok_or_else(|| GeometryError::ParseFailure("coordinates must be an array".into()))
}

/// A position is `[x, y]` or `[x, y, z]`; extra ordinates are dropped.
fn parse_position(value: &Value) -> Result<Coord<f64>, GeometryError> {
    // ---
    let parts = as_array(value)?;
    if parts.len() < 2 {
        return Err(GeometryError::ParseFailure(
            "position needs at least two numbers".into(),
        ));
    }
    let x = parts[0].as_f64();
    let y = parts[1].as_f64();
    match (x, y) {
        (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Ok(Coord { x, y }),
        _ => Err(GeometryError::ParseFailure(
            "position members must be finite numbers".into(),
        )),
    }
}

fn parse_line(value: &Value) -> Result<LineString<f64>, GeometryError> {
    // ---
    let coords = as_array(value)?
        .iter()
        .map(parse_position)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(LineString(coords))
}

fn parse_polygon(value: &Value) -> Result<Polygon<f64>, GeometryError> {
    // ---
    let mut rings = as_array(value)?.iter().map(parse_line);
    let exterior = rings
        .next()
        .ok_or_else(|| GeometryError::ParseFailure("polygon has no exterior ring".into()))??;
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

// ---

/// Serialize a geometry as a GeoJSON geometry object.
pub fn geometry_to_value(geometry: &Geometry<f64>) -> Value {
    // ---
    match geometry {
        Geometry::Point(p) => json!({ "type": "Point", "coordinates": position(p.0) }),
        Geometry::Line(line) => json!({
            "type": "LineString",
            "coordinates": [position(line.start), position(line.end)],
        }),
        Geometry::LineString(ls) => json!({ "type": "LineString", "coordinates": line(ls) }),
        Geometry::Polygon(poly) => json!({ "type": "Polygon", "coordinates": polygon(poly) }),
        Geometry::MultiPoint(mp) => json!({
            "type": "MultiPoint",
            "coordinates": mp.0.iter().map(|p| position(p.0)).collect::<Vec<_>>(),
        }),
        Geometry::MultiLineString(mls) => json!({
            "type": "MultiLineString",
            "coordinates": mls.0.iter().map(line).collect::<Vec<_>>(),
        }),
        Geometry::MultiPolygon(mp) => json!({
            "type": "MultiPolygon",
            "coordinates": mp.0.iter().map(polygon).collect::<Vec<_>>(),
        }),
        Geometry::GeometryCollection(gc) => json!({
            "type": "GeometryCollection",
            "geometries": gc.0.iter().map(geometry_to_value).collect::<Vec<_>>(),
        }),
        Geometry::Rect(rect) => json!({
            "type": "Polygon",
            "coordinates": polygon(&rect.to_polygon()),
        }),
        Geometry::Triangle(tri) => json!({
            "type": "Polygon",
            "coordinates": polygon(&tri.to_polygon()),
        }),
    }
}

/// GeoJSON `type` member for a geometry.
pub fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    // ---
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) | Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
    }
}

fn position(c: Coord<f64>) -> Value {
    json!([c.x, c.y])
}

fn line(ls: &LineString<f64>) -> Vec<Value> {
    ls.coords().map(|c| position(*c)).collect()
}

fn polygon(poly: &Polygon<f64>) -> Vec<Vec<Value>> {
    std::iter::once(poly.exterior())
        .chain(poly.interiors())
        .map(line)
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn reads_bare_geometry() {
        // ---
        let value = json!({ "type": "Point", "coordinates": [36.8, -1.29, 1650.0] });
        let geoms = features_from_value(&value).unwrap();
        assert_eq!(geoms, vec![Geometry::Point(Point::new(36.8, -1.29))]);
    }

    #[test]
    fn skips_null_feature_geometries() {
        // ---
        let value = json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "properties": {}, "geometry": null },
                { "type": "Feature", "properties": {},
                  "geometry": { "type": "LineString", "coordinates": [[0, 0], [1, 1]] } }
            ]
        });
        let geoms = features_from_value(&value).unwrap();
        assert_eq!(geoms.len(), 1);
        assert_eq!(geometry_type_name(&geoms[0]), "LineString");
    }

    #[test]
    fn polygon_keeps_holes() {
        // ---
        let value = json!({
            "type": "Polygon",
            "coordinates": [
                [[0, 0], [10, 0], [10, 10], [0, 10], [0, 0]],
                [[2, 2], [4, 2], [4, 4], [2, 2]]
            ]
        });
        let geom = geometry_from_value(&value).unwrap();
        let Geometry::Polygon(poly) = &geom else {
            panic!("expected polygon, got {:?}", geom);
        };
        assert_eq!(poly.interiors().len(), 1);

        let written = geometry_to_value(&geom);
        assert_eq!(written["type"], "Polygon");
        assert_eq!(written["coordinates"].as_array().unwrap().len(), 2);
        assert_eq!(written["coordinates"][1][3], json!([2.0, 2.0]));
    }

    #[test]
    fn rejects_unknown_type_and_bad_positions() {
        // ---
        let unknown = json!({ "type": "Circle", "coordinates": [0, 0] });
        assert!(matches!(
            geometry_from_value(&unknown),
            Err(GeometryError::ParseFailure(_))
        ));

        let short = json!({ "type": "Point", "coordinates": [1.0] });
        assert!(matches!(
            geometry_from_value(&short),
            Err(GeometryError::ParseFailure(_))
        ));

        assert!(matches!(
            features_from_slice(b"{not json"),
            Err(GeometryError::ParseFailure(_))
        ));
    }
}
