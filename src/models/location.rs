use serde::{Deserialize, Serialize};

/// Mean earth radius in metres, used for the equirectangular approximation.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 point. Longitude first to match GeoJSON ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
}

impl Location {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self { longitude, latitude }
    }

    /// Distance in metres to another point.
    ///
    /// Uses an equirectangular projection, which is accurate to well under a
    /// metre at the segment lengths found in vehicle tracks.
    pub fn distance_to(&self, other: &Location) -> f64 {
        let (x, y) = self.flat_offset_from(other);
        (x * x + y * y).sqrt()
    }

    /// Perpendicular distance in metres from this point to the segment `[a, b]`.
    ///
    /// Falls back to point distance when the segment is degenerate.
    pub fn distance_from_line(&self, a: &Location, b: &Location) -> f64 {
        let (px, py) = self.flat_offset_from(a);
        let (bx, by) = b.flat_offset_from(a);

        let segment_len_sq = bx * bx + by * by;
        if segment_len_sq == 0.0 {
            return self.distance_to(a);
        }

        // Clamp the projection onto the segment so points beyond either end
        // measure to the nearest endpoint.
        let t = ((px * bx + py * by) / segment_len_sq).clamp(0.0, 1.0);
        let dx = px - t * bx;
        let dy = py - t * by;
        (dx * dx + dy * dy).sqrt()
    }

    /// Offset of `self` from `origin` in metres on a plane tangent at `origin`.
    fn flat_offset_from(&self, origin: &Location) -> (f64, f64) {
        let x = (self.longitude - origin.longitude).to_radians()
            * origin.latitude.to_radians().cos()
            * EARTH_RADIUS_M;
        let y = (self.latitude - origin.latitude).to_radians() * EARTH_RADIUS_M;
        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_known_points() {
        // Two points ~111m apart on a meridian (0.001 degrees latitude).
        let a = Location::new(-1.0, 52.0);
        let b = Location::new(-1.0, 52.001);
        let d = a.distance_to(&b);
        assert!((d - 111.2).abs() < 1.0, "expected ~111m, got {d}");
    }

    #[test]
    fn distance_to_self_is_zero() {
        let a = Location::new(-0.1276, 51.5072);
        assert_eq!(a.distance_to(&a), 0.0);
    }

    #[test]
    fn perpendicular_distance_to_horizontal_segment() {
        // Segment runs west-east, point sits 0.001 degrees (~111m) north of it.
        let a = Location::new(-1.0, 52.0);
        let b = Location::new(-0.99, 52.0);
        let p = Location::new(-0.995, 52.001);
        let d = p.distance_from_line(&a, &b);
        assert!((d - 111.2).abs() < 1.0, "expected ~111m, got {d}");
    }

    #[test]
    fn point_beyond_segment_end_measures_to_endpoint() {
        let a = Location::new(-1.0, 52.0);
        let b = Location::new(-0.999, 52.0);
        // Well east of b: nearest point on the segment is b itself.
        let p = Location::new(-0.99, 52.0);
        let d = p.distance_from_line(&a, &b);
        assert!((d - p.distance_to(&b)).abs() < 0.01);
    }

    #[test]
    fn degenerate_segment_falls_back_to_point_distance() {
        let a = Location::new(-1.0, 52.0);
        let p = Location::new(-1.0, 52.001);
        assert_eq!(p.distance_from_line(&a, &a), p.distance_to(&a));
    }
}
