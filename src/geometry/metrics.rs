//! Ellipsoidal (WGS84) area and boundary length.

use geo::{Coord, Distance, Geodesic, GeodesicArea, Geometry, LineString, Point, Polygon, Validation};

use crate::error::GeometryError;
use crate::models::GeometryMetrics;

// ---

/// Compute area (m²) and perimeter (m) of a validated geometry.
///
/// Polygonal members contribute area; every ring and line contributes length.
/// Points measure zero. Self-intersecting or degenerate rings are rejected so
/// callers never persist a zeroed metric for a broken shape. Members of a
/// multi-geometry are checked one by one: adjacent or overlapping parcels in
/// one upload are fine.
pub fn compute_metrics(geometry: &Geometry<f64>) -> Result<GeometryMetrics, GeometryError> {
    // ---
    if !members_valid(geometry) {
        return Err(GeometryError::GeometryInvalid(
            "self-intersecting or degenerate coordinates".into(),
        ));
    }

    let area_sq_meters = polygonal_area(geometry);
    let perimeter_meters = linear_length(geometry);

    if !area_sq_meters.is_finite() || !perimeter_meters.is_finite() {
        return Err(GeometryError::GeometryInvalid(
            "metrics are not finite".into(),
        ));
    }

    Ok(GeometryMetrics {
        area_sq_meters,
        perimeter_meters,
    })
}

/// Validity of each member on its own, ignoring how members relate to each other.
fn members_valid(geometry: &Geometry<f64>) -> bool {
    // ---
    match geometry {
        Geometry::MultiPolygon(mp) => mp.0.iter().all(|p| p.is_valid()),
        Geometry::MultiLineString(mls) => mls.0.iter().all(|ls| ls.is_valid()),
        Geometry::GeometryCollection(gc) => gc.0.iter().all(members_valid),
        other => other.is_valid(),
    }
}

/// Geodesic area of the polygonal members, in square meters.
pub fn polygonal_area(geometry: &Geometry<f64>) -> f64 {
    // ---
    match geometry {
        Geometry::Polygon(p) => p.geodesic_area_unsigned(),
        Geometry::MultiPolygon(mp) => mp.0.iter().map(|p| p.geodesic_area_unsigned()).sum(),
        Geometry::Rect(r) => r.to_polygon().geodesic_area_unsigned(),
        Geometry::Triangle(t) => t.to_polygon().geodesic_area_unsigned(),
        Geometry::GeometryCollection(gc) => gc.0.iter().map(polygonal_area).sum(),
        Geometry::Point(_)
        | Geometry::MultiPoint(_)
        | Geometry::Line(_)
        | Geometry::LineString(_)
        | Geometry::MultiLineString(_) => 0.0,
    }
}

/// Total geodesic length of every line and ring, in meters.
pub fn linear_length(geometry: &Geometry<f64>) -> f64 {
    // ---
    match geometry {
        Geometry::Point(_) | Geometry::MultiPoint(_) => 0.0,
        Geometry::Line(l) => geodesic_distance(l.start, l.end),
        Geometry::LineString(ls) => line_length(ls),
        Geometry::MultiLineString(mls) => mls.0.iter().map(line_length).sum(),
        Geometry::Polygon(p) => ring_length(p),
        Geometry::MultiPolygon(mp) => mp.0.iter().map(ring_length).sum(),
        Geometry::Rect(r) => ring_length(&r.to_polygon()),
        Geometry::Triangle(t) => ring_length(&t.to_polygon()),
        Geometry::GeometryCollection(gc) => gc.0.iter().map(linear_length).sum(),
    }
}

/// Geodesic distance in meters between two lon/lat coordinates.
pub fn geodesic_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    Geodesic.distance(Point(a), Point(b))
}

fn line_length(ls: &LineString<f64>) -> f64 {
    ls.lines().map(|l| geodesic_distance(l.start, l.end)).sum()
}

/// Exterior plus interior rings.
fn ring_length(p: &Polygon<f64>) -> f64 {
    p.geodesic_perimeter()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use geo::{line_string, point, polygon, GeometryCollection, MultiPolygon};

    fn square(x0: f64, y0: f64, side: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + side, y: y0),
            (x: x0 + side, y: y0 + side),
            (x: x0, y: y0 + side),
            (x: x0, y: y0),
        ]
    }

    fn unit_degree_square() -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ])
    }

    #[test]
    fn one_degree_square_near_equator() {
        // ---
        let metrics = compute_metrics(&unit_degree_square()).unwrap();

        // ~111.3 km x ~110.6 km
        assert!(metrics.area_sq_meters > 1.2e10 && metrics.area_sq_meters < 1.3e10);
        assert!(metrics.perimeter_meters > 440_000.0 && metrics.perimeter_meters < 450_000.0);
    }

    #[test]
    fn point_measures_zero() {
        // ---
        let metrics = compute_metrics(&Geometry::Point(point!(x: 36.8, y: -1.3))).unwrap();
        assert_eq!(metrics.area_sq_meters, 0.0);
        assert_eq!(metrics.perimeter_meters, 0.0);
    }

    #[test]
    fn line_has_length_but_no_area() {
        // ---
        let line = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 0.0, y: 1.0)]);
        let metrics = compute_metrics(&line).unwrap();
        assert_eq!(metrics.area_sq_meters, 0.0);
        assert!((metrics.perimeter_meters - 110_574.0).abs() < 100.0);
    }

    #[test]
    fn self_intersecting_ring_is_invalid() {
        // ---
        let bowtie = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 0.0),
            (x: 0.0, y: 1.0),
            (x: 0.0, y: 0.0),
        ]);
        assert!(matches!(
            compute_metrics(&bowtie),
            Err(GeometryError::GeometryInvalid(_))
        ));
    }

    #[test]
    fn degenerate_ring_is_invalid() {
        // ---
        let sliver = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 0.0, y: 0.0),
        ]);
        assert!(matches!(
            compute_metrics(&sliver),
            Err(GeometryError::GeometryInvalid(_))
        ));
    }

    #[test]
    fn adjacent_parcels_share_an_edge() {
        // ---
        let pair = Geometry::MultiPolygon(MultiPolygon(vec![
            square(0.0, 0.0, 1.0),
            square(1.0, 0.0, 1.0),
        ]));
        let metrics = compute_metrics(&pair).unwrap();
        let single = compute_metrics(&Geometry::Polygon(square(0.0, 0.0, 1.0))).unwrap();
        assert!((metrics.area_sq_meters - 2.0 * single.area_sq_meters).abs() < 1e6);
    }

    #[test]
    fn overlapping_parcels_are_measured_separately() {
        // ---
        let pair = Geometry::MultiPolygon(MultiPolygon(vec![
            square(0.0, 0.0, 1.0),
            square(0.5, 0.5, 1.0),
        ]));
        assert!(compute_metrics(&pair).is_ok());
    }

    #[test]
    fn broken_member_still_rejects_the_upload() {
        // ---
        let bowtie = polygon![
            (x: 3.0, y: 0.0),
            (x: 4.0, y: 1.0),
            (x: 4.0, y: 0.0),
            (x: 3.0, y: 1.0),
            (x: 3.0, y: 0.0),
        ];
        let pair = Geometry::MultiPolygon(MultiPolygon(vec![square(0.0, 0.0, 1.0), bowtie.clone()]));
        assert!(matches!(
            compute_metrics(&pair),
            Err(GeometryError::GeometryInvalid(_))
        ));

        let mixed = Geometry::GeometryCollection(GeometryCollection(vec![
            Geometry::Point(point!(x: 0.5, y: 0.5)),
            Geometry::Polygon(bowtie),
        ]));
        assert!(matches!(
            compute_metrics(&mixed),
            Err(GeometryError::GeometryInvalid(_))
        ));
    }
}
