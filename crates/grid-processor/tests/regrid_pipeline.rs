//! Integration test: regrid canonical stores onto small EASE grids.

use grid_processor::{
    CanonicalField, CanonicalFile, DefaultPolicy, GridConfig, GridProcessorConfig,
    GridProcessorError, HemisphereRegion, RegridMethod, RegridPolicy, RegriddedFile, Regridder,
    Result,
};
use projection::Hemisphere;
use test_utils::{grid, hemisphere_axes, read_tree, ymd};

fn coarse(hemisphere: Hemisphere) -> GridConfig {
    GridConfig {
        resolution_km: grid::COARSE_RESOLUTION_KM,
        half_extent_km: grid::COARSE_HALF_EXTENT_KM,
        region: HemisphereRegion::new(hemisphere),
    }
}

fn canonical(dir: &std::path::Path, code: &str, north: bool) -> CanonicalFile {
    let (latitude, longitude) = hemisphere_axes(north, 2.0);
    let dates = vec![ymd(2021, 6, 1), ymd(2021, 6, 2)];
    let mut values = Vec::new();
    for (t, _) in dates.iter().enumerate() {
        for &lat in &latitude {
            for &lon in &longitude {
                values.push((t as f64 * 10.0 + lat.abs() * 0.5 + (lon.to_radians()).cos()) as f32);
            }
        }
    }
    let field = CanonicalField::new(code, dates, latitude, longitude, values)
        .expect("valid field")
        .with_units("K");
    CanonicalFile::write(&dir.join(format!("latlon_{}.zarr", code)), field, &GridProcessorConfig::default())
        .expect("Failed to write canonical")
}

#[test]
fn test_regrid_is_byte_for_byte_deterministic() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let source = canonical(temp_dir.path(), "rsds", true);
    let regridder = Regridder::new(coarse(Hemisphere::North), GridProcessorConfig::default())
        .expect("Failed to build regridder");

    let a = temp_dir.path().join("a").join("2021.zarr");
    let b = temp_dir.path().join("b").join("2021.zarr");
    std::fs::create_dir_all(a.parent().unwrap()).unwrap();
    std::fs::create_dir_all(b.parent().unwrap()).unwrap();

    regridder.regrid(&source, &DefaultPolicy::new(), &a).expect("first regrid");
    regridder.regrid(&source, &DefaultPolicy::new(), &b).expect("second regrid");

    let tree_a = read_tree(&a);
    let tree_b = read_tree(&b);
    assert!(!tree_a.is_empty());
    assert_eq!(tree_a, tree_b);
}

#[test]
fn test_output_layout_and_fingerprint() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let source = canonical(temp_dir.path(), "rlds", false);
    let regridder = Regridder::new(coarse(Hemisphere::South), GridProcessorConfig::default())
        .expect("Failed to build regridder");
    let dest = temp_dir.path().join("2021.zarr");

    regridder.regrid(&source, &DefaultPolicy::new(), &dest).expect("regrid");
    let out = RegriddedFile::open(&dest).expect("Failed to open output");

    assert_eq!(out.field.code, "rlds");
    assert_eq!(out.field.dates, source.field.dates);
    assert_eq!(out.field.x.len(), grid::COARSE_SIZE);
    assert_eq!(out.field.y.len(), grid::COARSE_SIZE);
    assert!(out.field.y[0] > out.field.y[grid::COARSE_SIZE - 1]);
    assert_eq!(out.attrs["method"], "conservative");
    assert_eq!(out.attrs["hemisphere"], "south");
    assert_eq!(out.attrs["source_revision"], source.revision.as_str());
    assert!(out.field.values.iter().all(|v| v.is_finite()));

    assert!(regridder.is_current(&dest, &source, &DefaultPolicy::new()));
    let bilinear = DefaultPolicy::new().with_override("rlds", RegridMethod::Bilinear);
    assert!(!regridder.is_current(&dest, &source, &bilinear));

    // A new canonical revision makes the output stale
    let rewritten = CanonicalFile::write(&source.path, source.field.clone(), &GridProcessorConfig::default())
        .expect("rewrite");
    assert!(!regridder.is_current(&dest, &rewritten, &DefaultPolicy::new()));
}

#[test]
fn test_wrong_hemisphere_is_grid_error() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let source = canonical(temp_dir.path(), "tas", true);
    let regridder = Regridder::new(coarse(Hemisphere::South), GridProcessorConfig::default())
        .expect("Failed to build regridder");
    let dest = temp_dir.path().join("2021.zarr");

    let err = regridder.regrid(&source, &DefaultPolicy::new(), &dest).unwrap_err();
    assert!(matches!(err, GridProcessorError::Grid(_)));
    assert!(!dest.exists());
}

struct Scaled;

impl RegridPolicy for Scaled {
    fn method(&self, _code: &str) -> RegridMethod {
        RegridMethod::Nearest
    }

    fn adjust(&self, field: &mut CanonicalField) -> Result<()> {
        field.values.iter_mut().for_each(|v| *v *= 2.0);
        field.units = Some("2K".to_string());
        Ok(())
    }
}

#[test]
fn test_adjust_hook_runs_on_a_copy() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let source = canonical(temp_dir.path(), "tas", true);
    let regridder = Regridder::new(coarse(Hemisphere::North), GridProcessorConfig::default())
        .expect("Failed to build regridder");

    let plain = regridder
        .regrid_field(&source.field, RegridMethod::Nearest)
        .expect("plain regrid");
    let dest = temp_dir.path().join("2021.zarr");
    let adjusted = regridder.regrid(&source, &Scaled, &dest).expect("adjusted regrid");

    assert_eq!(adjusted.field.units.as_deref(), Some("2K"));
    assert_eq!(adjusted.field.values[0], plain.values[0] * 2.0);
    // The canonical file on disk is untouched
    let reopened = CanonicalFile::open(&source.path).unwrap();
    assert_eq!(reopened.field.values, source.field.values);
}
