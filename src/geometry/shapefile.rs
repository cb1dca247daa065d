//! Shapefile (`.shp`) decoding.
//!
//! One concrete decoder backed by the `shapefile` crate sits behind the
//! [`ShapefileDecoder`] trait. The process-wide instance is a zero-sized static,
//! so there is nothing to resolve or cache at runtime.

use std::io::Cursor;

use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use ::shapefile as shp;
use tracing::debug;

use crate::error::GeometryError;

// ---

/// Decode the main `.shp` payload of a shapefile into one geometry per record.
pub trait ShapefileDecoder: Send + Sync {
    fn decode(&self, shp_bytes: &[u8]) -> Result<Vec<Geometry<f64>>, GeometryError>;
}

/// Decoder backed by `shapefile::ShapeReader`. Coordinates are taken as WGS84.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShpReaderDecoder;

/// The decoder used by every ingestion path.
pub static SHAPEFILE_DECODER: ShpReaderDecoder = ShpReaderDecoder;

impl ShapefileDecoder for ShpReaderDecoder {
    fn decode(&self, shp_bytes: &[u8]) -> Result<Vec<Geometry<f64>>, GeometryError> {
        // ---
        let reader = shp::ShapeReader::new(Cursor::new(shp_bytes))
            .map_err(|e| GeometryError::ParseFailure(format!("unreadable shapefile: {}", e)))?;
        let shapes = reader
            .read()
            .map_err(|e| GeometryError::ParseFailure(format!("unreadable shapefile: {}", e)))?;

        let total = shapes.len();
        let geometries: Vec<Geometry<f64>> = shapes.iter().filter_map(shape_to_geo).collect();
        debug!("Shapefile decoded: {} records, {} geometries", total, geometries.len());

        if geometries.is_empty() {
            return Err(GeometryError::EmptyGeometry(
                "shapefile contains no features".into(),
            ));
        }
        Ok(geometries)
    }
}

/// X/Y access shared by the plain, M and Z point types. Extra ordinates are dropped.
trait PlanarPoint {
    fn coord(&self) -> Coord<f64>;
}

impl PlanarPoint for shp::Point {
    fn coord(&self) -> Coord<f64> {
        Coord { x: self.x, y: self.y }
    }
}

impl PlanarPoint for shp::PointM {
    fn coord(&self) -> Coord<f64> {
        Coord { x: self.x, y: self.y }
    }
}

impl PlanarPoint for shp::PointZ {
    fn coord(&self) -> Coord<f64> {
        Coord { x: self.x, y: self.y }
    }
}

fn shape_to_geo(shape: &shp::Shape) -> Option<Geometry<f64>> {
    // ---
    match shape {
        shp::Shape::NullShape => None,
        shp::Shape::Point(p) => Some(Geometry::Point(Point(p.coord()))),
        shp::Shape::PointM(p) => Some(Geometry::Point(Point(p.coord()))),
        shp::Shape::PointZ(p) => Some(Geometry::Point(Point(p.coord()))),
        shp::Shape::Polyline(line) => polyline_to_geo(line.parts()),
        shp::Shape::PolylineM(line) => polyline_to_geo(line.parts()),
        shp::Shape::PolylineZ(line) => polyline_to_geo(line.parts()),
        shp::Shape::Polygon(poly) => polygon_to_geo(poly.rings()),
        shp::Shape::PolygonM(poly) => polygon_to_geo(poly.rings()),
        shp::Shape::PolygonZ(poly) => polygon_to_geo(poly.rings()),
        shp::Shape::Multipoint(mp) => multipoint_to_geo(mp.points()),
        shp::Shape::MultipointM(mp) => multipoint_to_geo(mp.points()),
        shp::Shape::MultipointZ(mp) => multipoint_to_geo(mp.points()),
        shp::Shape::Multipatch(_) => {
            debug!("Skipping multipatch shape");
            None
        }
    }
}

fn polyline_to_geo<P: PlanarPoint>(parts: &[Vec<P>]) -> Option<Geometry<f64>> {
    // ---
    let mut lines: Vec<LineString<f64>> = parts
        .iter()
        .map(|part| LineString(part.iter().map(PlanarPoint::coord).collect()))
        .filter(|ls| ls.0.len() >= 2)
        .collect();

    match lines.len() {
        0 => None,
        1 => lines.pop().map(Geometry::LineString),
        _ => Some(Geometry::MultiLineString(MultiLineString(lines))),
    }
}

/// Shapefile rings arrive as each outer ring followed by its holes.
fn polygon_to_geo<P: PlanarPoint>(rings: &[shp::PolygonRing<P>]) -> Option<Geometry<f64>> {
    // ---
    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes: Vec<LineString<f64>> = Vec::new();

    for ring in rings {
        let ls = LineString(ring.points().iter().map(PlanarPoint::coord).collect());
        match ring {
            shp::PolygonRing::Outer(_) => {
                if let Some(ext) = exterior.take() {
                    polygons.push(Polygon::new(ext, std::mem::take(&mut holes)));
                }
                exterior = Some(ls);
            }
            shp::PolygonRing::Inner(_) => holes.push(ls),
        }
    }
    if let Some(ext) = exterior {
        polygons.push(Polygon::new(ext, holes));
    }

    match polygons.len() {
        0 => None,
        1 => polygons.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(MultiPolygon(polygons))),
    }
}

fn multipoint_to_geo<P: PlanarPoint>(points: &[P]) -> Option<Geometry<f64>> {
    // ---
    if points.is_empty() {
        return None;
    }
    Some(Geometry::MultiPoint(MultiPoint(
        points.iter().map(|p| Point(p.coord())).collect(),
    )))
}

/// `.shp` bytes holding one unit square polygon per south-west corner.
#[cfg(test)]
pub(crate) fn unit_squares_shp(corners: &[(f64, f64)]) -> Vec<u8> {
    // ---
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = shp::ShapeWriter::new(&mut cursor);
        for &(x, y) in corners {
            let ring = shp::PolygonRing::Outer(vec![
                shp::Point::new(x, y),
                shp::Point::new(x, y + 1.0),
                shp::Point::new(x + 1.0, y + 1.0),
                shp::Point::new(x + 1.0, y),
                shp::Point::new(x, y),
            ]);
            writer.write_shape(&shp::Polygon::new(ring)).unwrap();
        }
    }
    cursor.into_inner()
}
