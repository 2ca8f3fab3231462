use aqb_common::{CompileError, Result};

/// Parses a geo-point literal of the form `point(lat, lng)`.
///
/// The `point` keyword is case-insensitive and optional; `(lat, lng)` alone
/// is accepted. Latitude must lie in [-90, 90] and longitude in [-180, 180].
pub fn geo_point_from_string(s: &str) -> Result<(f32, f32)> {
    let trimmed = s.trim();
    let lower = trimmed.to_ascii_lowercase();
    let body = lower.strip_prefix("point").unwrap_or(&lower).trim_start();

    let inner = body
        .strip_prefix('(')
        .and_then(|b| b.strip_suffix(')'))
        .ok_or_else(|| bad_point(s))?;

    let (lat_text, lng_text) = inner.split_once(',').ok_or_else(|| bad_point(s))?;
    let lat: f32 = lat_text.trim().parse().map_err(|_| bad_point(s))?;
    let lng: f32 = lng_text.trim().parse().map_err(|_| bad_point(s))?;

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(CompileError::GeoParse(format!(
            "coordinates out of range in {s}"
        )));
    }
    Ok((lat, lng))
}

fn bad_point(s: &str) -> CompileError {
    CompileError::GeoParse(format!("expect point(lat, lng), got {s}"))
}

#[cfg(test)]
mod tests {
    use super::geo_point_from_string;
    use aqb_common::CompileError;

    #[test]
    fn accepts_keyword_and_bare_forms() {
        assert_eq!(
            geo_point_from_string("point(37.77, -122.44)").unwrap(),
            (37.77, -122.44)
        );
        assert_eq!(
            geo_point_from_string("POINT( 37.77 , -122.44 )").unwrap(),
            (37.77, -122.44)
        );
        assert_eq!(geo_point_from_string("(0, 0)").unwrap(), (0.0, 0.0));
    }

    #[test]
    fn rejects_malformed_and_out_of_range() {
        for bad in ["37.77 -122.44", "point(37.77)", "point(91, 0)", "point(0, 181)", "point(a, b)"] {
            assert!(
                matches!(geo_point_from_string(bad), Err(CompileError::GeoParse(_))),
                "expected GeoParse for {bad}"
            );
        }
    }
}
