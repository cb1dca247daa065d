//! KML placemark extraction.
//!
//! Placemarks are read directly: the first `coordinates` element of each one is
//! classified by the geometry tag it sits under. When a document has no
//! placemarks, or none of them yields a usable shape, a structural converter
//! walks every geometry element in the document instead.

use geo::{Coord, Geometry, LineString, Point, Polygon};
use roxmltree::{Document, Node};
use tracing::{debug, warn};

use crate::error::GeometryError;

// ---

/// Parse KML text into the geometries of its placemarks.
pub(crate) fn parse_kml(text: &str) -> Result<Vec<Geometry<f64>>, GeometryError> {
    // ---
    let doc = Document::parse(text)
        .map_err(|e| GeometryError::ParseFailure(format!("invalid KML XML: {}", e)))?;

    let placemarks: Vec<Node> = doc
        .descendants()
        .filter(|n| is_element(n, "Placemark"))
        .collect();

    debug!(
        placemarks = placemarks.len(),
        documents = doc.descendants().filter(|n| is_element(n, "Document")).count(),
        folders = doc.descendants().filter(|n| is_element(n, "Folder")).count(),
        "KML structure"
    );

    if placemarks.is_empty() {
        return convert_document(&doc).map_err(|e| {
            GeometryError::ParseFailure(format!(
                "KML has no Placemarks and generic conversion failed: {}",
                e
            ))
        });
    }

    match parse_placemarks(&placemarks) {
        Ok(geometries) => Ok(geometries),
        Err(manual) => {
            warn!("Placemark extraction failed ({}), trying generic conversion", manual);
            convert_document(&doc)
                .map_err(|_| GeometryError::ParseFailure(format!("failed to parse KML: {}", manual)))
        }
    }
}

fn parse_placemarks(placemarks: &[Node]) -> Result<Vec<Geometry<f64>>, String> {
    // ---
    let mut geometries = Vec::new();

    for (i, placemark) in placemarks.iter().enumerate() {
        let name = placemark
            .children()
            .find(|n| is_element(n, "name"))
            .and_then(|n| n.text())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("Feature {}", i + 1));

        let Some(coords_node) = placemark.descendants().find(|n| is_element(n, "coordinates"))
        else {
            warn!("Placemark \"{}\" has no coordinates", name);
            continue;
        };

        let coords = parse_coordinates(coords_node.text().unwrap_or_default());
        if coords.is_empty() {
            warn!("Placemark \"{}\" has no valid coordinates", name);
            continue;
        }

        let has = |tag: &str| placemark.descendants().any(|n| is_element(&n, tag));

        let geometry = if has("Polygon") {
            if coords.len() < 4 {
                warn!(
                    "Polygon \"{}\" has too few coordinates ({})",
                    name,
                    coords.len()
                );
                continue;
            }
            Geometry::Polygon(Polygon::new(LineString(coords), vec![]))
        } else if has("LineString") && coords.len() >= 2 {
            Geometry::LineString(LineString(coords))
        } else if has("Point") && coords.len() == 1 {
            Geometry::Point(Point(coords[0]))
        } else {
            classify_by_count(coords)
        };

        geometries.push(geometry);
    }

    if geometries.is_empty() {
        return Err("no valid geometries found in KML placemarks".to_string());
    }

    debug!("Extracted {} geometries from KML placemarks", geometries.len());
    Ok(geometries)
}

/// Placemarks without a recognizable geometry tag are classified by point count.
fn classify_by_count(coords: Vec<Coord<f64>>) -> Geometry<f64> {
    // ---
    match coords.len() {
        1 => Geometry::Point(Point(coords[0])),
        n if n >= 4 => Geometry::Polygon(Polygon::new(LineString(coords), vec![])),
        _ => Geometry::LineString(LineString(coords)),
    }
}

/// Structural conversion of every geometry element in the document, including
/// `MultiGeometry` members and polygon holes.
fn convert_document(doc: &Document) -> Result<Vec<Geometry<f64>>, String> {
    // ---
    let mut geometries = Vec::new();

    for node in doc.descendants().filter(Node::is_element) {
        match node.tag_name().name() {
            "Point" => {
                if let Some(c) = first_coordinates(&node).into_iter().next() {
                    geometries.push(Geometry::Point(Point(c)));
                }
            }
            "LineString" => {
                let coords = first_coordinates(&node);
                if coords.len() >= 2 {
                    geometries.push(Geometry::LineString(LineString(coords)));
                }
            }
            "Polygon" => {
                if let Some(polygon) = convert_polygon(&node) {
                    geometries.push(Geometry::Polygon(polygon));
                }
            }
            "LinearRing" if !has_ancestor(&node, "Polygon") => {
                let coords = first_coordinates(&node);
                if coords.len() >= 4 {
                    geometries.push(Geometry::Polygon(Polygon::new(LineString(coords), vec![])));
                }
            }
            _ => {}
        }
    }

    if geometries.is_empty() {
        return Err("document contains no geometry elements".to_string());
    }
    Ok(geometries)
}

fn convert_polygon(node: &Node) -> Option<Polygon<f64>> {
    // ---
    let boundary = |tag: &str| -> Vec<LineString<f64>> {
        node.children()
            .filter(|n| is_element(n, tag))
            .map(|b| LineString(first_coordinates(&b)))
            .filter(|ring| ring.0.len() >= 4)
            .collect()
    };

    let exterior = boundary("outerBoundaryIs").into_iter().next()?;
    Some(Polygon::new(exterior, boundary("innerBoundaryIs")))
}

fn first_coordinates(node: &Node) -> Vec<Coord<f64>> {
    node.descendants()
        .find(|n| is_element(n, "coordinates"))
        .map(|n| parse_coordinates(n.text().unwrap_or_default()))
        .unwrap_or_default()
}

/// Parse whitespace-separated `lon,lat[,alt]` tuples; malformed tuples are dropped.
fn parse_coordinates(text: &str) -> Vec<Coord<f64>> {
    // ---
    text.split_whitespace()
        .filter_map(|tuple| {
            let mut parts = tuple.split(',').map(|p| p.trim().parse::<f64>());
            let x = parts.next()?.ok()?;
            let y = parts.next()?.ok()?;
            (x.is_finite() && y.is_finite()).then_some(Coord { x, y })
        })
        .collect()
}

fn is_element(node: &Node, local_name: &str) -> bool {
    node.is_element() && node.tag_name().name() == local_name
}

fn has_ancestor(node: &Node, local_name: &str) -> bool {
    node.ancestors().skip(1).any(|n| is_element(&n, local_name))
}
