use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RegistryError;

/// A single coordinate pair. All geometries share one fixed reference
/// system; no CRS transformation happens anywhere in the registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

/// Tagged geometry value. Raw WKT text never travels past the boundary:
/// it is decoded here on ingestion and re-encoded on serialization.
///
/// Locations carry points, land parcels carry polygons. The kind is
/// checked when the owning record is created, never coerced later.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Coord),
    /// Closed ring of at least 4 coordinate pairs, first == last.
    Polygon(Vec<Coord>),
}

impl Geometry {
    /// Decode a WKT string. Accepts the two kinds used by the registry,
    /// `POINT(x y)` and single-ring `POLYGON((x y, x y, ...))`.
    pub fn from_wkt(text: &str) -> Result<Self, RegistryError> {
        let text = text.trim();
        let upper = text.to_ascii_uppercase();
        if let Some(rest) = upper.strip_prefix("POINT") {
            let inner = strip_parens(&text[text.len() - rest.len()..], 1)?;
            let coord = parse_coord(inner)?;
            Ok(Geometry::Point(coord))
        } else if let Some(rest) = upper.strip_prefix("POLYGON") {
            let inner = strip_parens(&text[text.len() - rest.len()..], 2)?;
            let ring = inner
                .split(',')
                .map(parse_coord)
                .collect::<Result<Vec<_>, _>>()?;
            let polygon = Geometry::Polygon(ring);
            polygon.validate()?;
            Ok(polygon)
        } else {
            Err(malformed(format!("unsupported geometry text: '{}'", text)))
        }
    }

    /// Encode back to WKT. Lossless: `from_wkt(to_wkt(g)) == g`.
    pub fn to_wkt(&self) -> String {
        match self {
            Geometry::Point(c) => format!("POINT({} {})", c.x, c.y),
            Geometry::Polygon(ring) => {
                let coords = ring
                    .iter()
                    .map(|c| format!("{} {}", c.x, c.y))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("POLYGON(({}))", coords)
            }
        }
    }

    pub fn is_point(&self) -> bool {
        matches!(self, Geometry::Point(_))
    }

    pub fn is_polygon(&self) -> bool {
        matches!(self, Geometry::Polygon(_))
    }

    /// Structural checks: ring length, closure, self-intersection.
    fn validate(&self) -> Result<(), RegistryError> {
        let Geometry::Polygon(ring) = self else {
            return Ok(());
        };
        if ring.len() < 4 {
            return Err(malformed(format!(
                "polygon ring needs at least 4 coordinate pairs, got {}",
                ring.len()
            )));
        }
        if ring.first() != ring.last() {
            return Err(malformed("polygon ring is not closed".to_string()));
        }
        if ring_self_intersects(ring) {
            return Err(malformed("polygon ring is self-intersecting".to_string()));
        }
        Ok(())
    }
}

fn malformed(reason: String) -> RegistryError {
    RegistryError::MalformedGeometry(reason)
}

/// Strip `depth` layers of balanced parentheses around the payload.
fn strip_parens(text: &str, depth: usize) -> Result<&str, RegistryError> {
    let mut inner = text.trim();
    for _ in 0..depth {
        inner = inner
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| malformed(format!("unbalanced parentheses in '{}'", text)))?
            .trim();
    }
    Ok(inner)
}

fn parse_coord(text: &str) -> Result<Coord, RegistryError> {
    let mut parts = text.split_whitespace();
    let (Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(malformed(format!("expected 'x y' pair, got '{}'", text.trim())));
    };
    let x = x
        .parse::<f64>()
        .map_err(|_| malformed(format!("invalid coordinate '{}'", x)))?;
    let y = y
        .parse::<f64>()
        .map_err(|_| malformed(format!("invalid coordinate '{}'", y)))?;
    Ok(Coord { x, y })
}

/// Proper-intersection test over all non-adjacent segment pairs. The ring
/// is small (survey parcels), so the quadratic scan is fine.
fn ring_self_intersects(ring: &[Coord]) -> bool {
    let n = ring.len() - 1; // last point repeats the first
    for i in 0..n {
        for j in (i + 1)..n {
            // skip adjacent segments (they share an endpoint), including
            // the closing segment against the first one
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            let (a, b) = (ring[i], ring[i + 1]);
            let (c, d) = (ring[j], ring[j + 1]);
            if segments_intersect(a, b, c, d) {
                return true;
            }
        }
    }
    false
}

fn orientation(a: Coord, b: Coord, c: Coord) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: Coord, b: Coord, p: Coord) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn segments_intersect(a: Coord, b: Coord, c: Coord, d: Coord) -> bool {
    let o1 = orientation(a, b, c);
    let o2 = orientation(a, b, d);
    let o3 = orientation(c, d, a);
    let o4 = orientation(c, d, b);

    if (o1 * o2) < 0.0 && (o3 * o4) < 0.0 {
        return true;
    }
    // collinear overlap counts as an intersection too
    (o1 == 0.0 && on_segment(a, b, c))
        || (o2 == 0.0 && on_segment(a, b, d))
        || (o3 == 0.0 && on_segment(c, d, a))
        || (o4 == 0.0 && on_segment(c, d, b))
}

impl Serialize for Geometry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wkt())
    }
}

impl<'de> Deserialize<'de> for Geometry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Geometry::from_wkt(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_round_trip() {
        let g = Geometry::from_wkt("POINT(10.5 53.5)").unwrap();
        assert_eq!(g, Geometry::Point(Coord { x: 10.5, y: 53.5 }));
        assert_eq!(Geometry::from_wkt(&g.to_wkt()).unwrap(), g);
    }

    #[test]
    fn polygon_round_trip() {
        let wkt = "POLYGON((10 53, 10.1 53, 10.1 53.1, 10 53.1, 10 53))";
        let g = Geometry::from_wkt(wkt).unwrap();
        assert!(g.is_polygon());
        assert_eq!(Geometry::from_wkt(&g.to_wkt()).unwrap(), g);
    }

    #[test]
    fn rejects_unclosed_ring() {
        let err = Geometry::from_wkt("POLYGON((0 0, 1 0, 1 1, 0 1))").unwrap_err();
        assert!(matches!(err, RegistryError::MalformedGeometry(_)));
    }

    #[test]
    fn rejects_short_ring() {
        let err = Geometry::from_wkt("POLYGON((0 0, 1 1, 0 0))").unwrap_err();
        assert!(matches!(err, RegistryError::MalformedGeometry(_)));
    }

    #[test]
    fn rejects_self_intersecting_ring() {
        // bow-tie
        let err = Geometry::from_wkt("POLYGON((0 0, 2 2, 2 0, 0 2, 0 0))").unwrap_err();
        assert!(matches!(err, RegistryError::MalformedGeometry(_)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Geometry::from_wkt("LINESTRING(0 0, 1 1)").is_err());
        assert!(Geometry::from_wkt("POINT(1)").is_err());
        assert!(Geometry::from_wkt("POINT(a b)").is_err());
        assert!(Geometry::from_wkt("").is_err());
    }

    #[test]
    fn serde_uses_wkt_strings() {
        let g = Geometry::Point(Coord { x: 9.5, y: 53.0 });
        let json = serde_json::to_string(&g).unwrap();
        assert_eq!(json, "\"POINT(9.5 53)\"");
        let back: Geometry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }
}
