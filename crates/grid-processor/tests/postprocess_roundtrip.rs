//! Integration test: write synthetic raw archive files, normalise them, and
//! read the canonical stores back.

use grid_processor::{
    raw_dates, read_dates, CanonicalFile, GridProcessorConfig, GridProcessorError, Postprocessor,
};
use test_utils::{assert_approx_eq, expected_daily_mean, write_raw_zarr, ymd, RawSpec};

fn small_axes() -> (Vec<f64>, Vec<f64>) {
    (vec![80.0, 75.0, 70.0], vec![-10.0, 0.0, 10.0, 20.0])
}

#[test]
fn test_hourly_raw_becomes_daily_canonical() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let raw_path = temp_dir.path().join("raw_2020.zarr");
    let (lat, lon) = small_axes();
    let dates = vec![ymd(2020, 3, 1), ymd(2020, 3, 2), ymd(2020, 3, 3)];

    // Newest-first, with a degenerate pressure level and bookkeeping vars
    let spec = RawSpec::new("t", dates.clone(), lat.clone(), lon.clone())
        .with_level(500.0)
        .reversed();
    write_raw_zarr(&spec, &raw_path).expect("Failed to write raw file");

    let field = Postprocessor::default()
        .normalize(&raw_path, "ta500")
        .expect("Failed to normalise");

    assert_eq!(field.code, "ta500");
    assert_eq!(field.dates, dates);
    assert_eq!(field.latitude, lat);
    assert_eq!(field.units.as_deref(), Some("K"));

    for (t, &date) in dates.iter().enumerate() {
        let slice = field.slice(t);
        for (i, &la) in lat.iter().enumerate() {
            for (j, &lo) in lon.iter().enumerate() {
                let expected = expected_daily_mean(date, 24, la, lo);
                assert_approx_eq!(slice[i * lon.len() + j], expected, 1e-3);
            }
        }
    }
}

#[test]
fn test_raw_dates_lists_calendar_days() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let raw_path = temp_dir.path().join("raw_2020.zarr");
    let (lat, lon) = small_axes();
    let dates = vec![ymd(2020, 2, 28), ymd(2020, 2, 29), ymd(2020, 3, 1)];

    write_raw_zarr(
        &RawSpec::new("t", dates.clone(), lat, lon).reversed(),
        &raw_path,
    )
    .expect("Failed to write raw file");

    let held: Vec<_> = raw_dates(&raw_path)
        .expect("Failed to read raw dates")
        .into_iter()
        .collect();
    assert_eq!(held, dates);

    assert!(raw_dates(&temp_dir.path().join("missing.zarr")).is_err());
}

#[test]
fn test_normalize_into_merges_per_year() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let (lat, lon) = small_axes();
    let config = GridProcessorConfig::default();
    let postprocessor = Postprocessor::default();
    let dest = |year: i32| temp_dir.path().join(format!("latlon_{}.zarr", year));

    // First chunk straddles a year boundary
    let first = temp_dir.path().join("raw_a.zarr");
    write_raw_zarr(
        &RawSpec::new("t2m", vec![ymd(2019, 12, 31), ymd(2020, 1, 1)], lat.clone(), lon.clone())
            .with_steps_per_day(4),
        &first,
    )
    .expect("Failed to write raw file");
    let written = postprocessor
        .normalize_into(&first, "tas", None, dest, &config)
        .expect("Failed to normalise");
    assert_eq!(written.len(), 2);
    assert_eq!(read_dates(&dest(2019)).unwrap(), vec![ymd(2019, 12, 31)]);

    // Second chunk adds days to 2020, keeping only the requested ones
    let second = temp_dir.path().join("raw_b.zarr");
    write_raw_zarr(
        &RawSpec::new(
            "t2m",
            vec![ymd(2020, 1, 2), ymd(2020, 1, 3), ymd(2020, 1, 4)],
            lat.clone(),
            lon.clone(),
        )
        .with_steps_per_day(4),
        &second,
    )
    .expect("Failed to write raw file");
    let wanted = [ymd(2020, 1, 2), ymd(2020, 1, 3)];
    postprocessor
        .normalize_into(&second, "tas", Some(&wanted), dest, &config)
        .expect("Failed to normalise");

    let merged = CanonicalFile::open(&dest(2020)).expect("Failed to open canonical");
    assert_eq!(
        merged.field.dates,
        vec![ymd(2020, 1, 1), ymd(2020, 1, 2), ymd(2020, 1, 3)]
    );
    assert_approx_eq!(
        merged.field.slice(2)[0],
        expected_daily_mean(ymd(2020, 1, 3), 4, 80.0, -10.0),
        1e-3
    );
}

#[test]
fn test_requested_dates_missing_from_file() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let (lat, lon) = small_axes();
    let raw_path = temp_dir.path().join("raw.zarr");
    write_raw_zarr(&RawSpec::new("t2m", vec![ymd(2020, 1, 1)], lat, lon), &raw_path)
        .expect("Failed to write raw file");

    let err = Postprocessor::default()
        .normalize_into(
            &raw_path,
            "tas",
            Some(&[ymd(2021, 1, 1)]),
            |year| temp_dir.path().join(format!("latlon_{}.zarr", year)),
            &GridProcessorConfig::default(),
        )
        .unwrap_err();
    assert!(matches!(err, GridProcessorError::Schema(_)));
    assert!(!temp_dir.path().join("latlon_2021.zarr").exists());
}

#[test]
fn test_unreadable_raw_file() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let raw_path = temp_dir.path().join("raw_2020.zarr");
    std::fs::create_dir_all(&raw_path).unwrap();

    let err = Postprocessor::default().normalize(&raw_path, "tas").unwrap_err();
    assert!(matches!(err, GridProcessorError::UnsupportedFormat(_)));
}
