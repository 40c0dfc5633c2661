use crate::models::position::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Great-circle distance between two points, in kilometres.
pub fn distance_km(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let from_lat = from.lat.to_radians();
    let to_lat = to.lat.to_radians();
    let half_dlat = ((to.lat - from.lat).to_radians() / 2.0).sin();
    let half_dlng = ((to.lng - from.lng).to_radians() / 2.0).sin();

    let h = half_dlat.powi(2) + from_lat.cos() * to_lat.cos() * half_dlng.powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::distance_km;
    use crate::models::position::GeoPoint;

    #[test]
    fn same_point_is_zero_km_away() {
        let tahrir = GeoPoint {
            lat: 30.0444,
            lng: 31.2357,
        };
        assert!(distance_km(&tahrir, &tahrir) < 1e-9);
    }

    #[test]
    fn cairo_to_alexandria_is_around_180_km() {
        let cairo = GeoPoint {
            lat: 30.0444,
            lng: 31.2357,
        };
        let alexandria = GeoPoint {
            lat: 31.2001,
            lng: 29.9187,
        };
        let distance = distance_km(&cairo, &alexandria);
        assert!((distance - 180.0).abs() < 10.0);
    }
}
