//! Common test fixtures for pipeline tests.

use chrono::NaiveDate;

/// Archive-style areas as [north, west, south, east].
pub mod area {
    pub const NORTH: [f64; 4] = [90.0, -180.0, 0.0, 180.0];
    pub const SOUTH: [f64; 4] = [0.0, -180.0, -90.0, 180.0];
}

/// Destination grids small enough for fast tests.
pub mod grid {
    /// 8x8 cells of 500 km.
    pub const COARSE_RESOLUTION_KM: f64 = 500.0;
    pub const COARSE_HALF_EXTENT_KM: f64 = 2000.0;
    pub const COARSE_SIZE: usize = 8;
}

/// Shorthand for a calendar date.
pub fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

/// Every day from `start` to `end`, inclusive.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Latitudes from the pole (or equator) down in `step` degree increments,
/// global longitudes from -180.
pub fn hemisphere_axes(north: bool, step: f64) -> (Vec<f64>, Vec<f64>) {
    let n_lat = (90.0 / step).round() as usize + 1;
    let latitude = (0..n_lat)
        .map(|i| {
            let lat = 90.0 - i as f64 * step;
            if north {
                lat
            } else {
                lat - 90.0
            }
        })
        .collect();
    let n_lon = (360.0 / step).round() as usize;
    let longitude = (0..n_lon).map(|i| -180.0 + i as f64 * step).collect();
    (latitude, longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_range_inclusive() {
        let days = date_range(ymd(2020, 2, 27), ymd(2020, 3, 1));
        assert_eq!(days.len(), 4);
        assert_eq!(days[2], ymd(2020, 2, 29));
        assert!(date_range(ymd(2020, 1, 2), ymd(2020, 1, 1)).is_empty());
    }

    #[test]
    fn test_hemisphere_axes() {
        let (lat, lon) = hemisphere_axes(true, 10.0);
        assert_eq!(lat.first(), Some(&90.0));
        assert_eq!(lat.last(), Some(&0.0));
        assert_eq!(lon.len(), 36);

        let (lat, _) = hemisphere_axes(false, 10.0);
        assert_eq!(lat.first(), Some(&0.0));
        assert_eq!(lat.last(), Some(&-90.0));
    }
}
