//! Zarr V3 directory stores.
//!
//! A dataset is a root group holding one array per variable. Dimension names
//! travel in the `_ARRAY_DIMENSIONS` attribute so stores stay readable by
//! xarray.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::{Group, GroupBuilder};
use zarrs_filesystem::FilesystemStore;

use crate::config::{GridProcessorConfig, ZarrCompression};
use crate::dataset::{Attributes, Dataset, Variable};
use crate::error::{GridProcessorError, Result};

const DIMENSIONS_ATTR: &str = "_ARRAY_DIMENSIONS";

/// Read all arrays of a Zarr store.
pub fn read_zarr(path: &Path) -> Result<Dataset> {
    let store = open_store(path)?;
    let mut dataset = Dataset::new();

    let group = Group::open(store.clone(), "/").map_err(GridProcessorError::storage_err)?;
    dataset.attrs = group.attributes().clone();

    for name in array_names(path)? {
        let variable = read_array(&store, &name)?;
        dataset.insert(&name, variable)?;
    }

    debug!(path = %path.display(), variables = dataset.variables.len(), "Read Zarr store");
    Ok(dataset)
}

/// Read a single array of a Zarr store.
pub fn read_zarr_variable(path: &Path, name: &str) -> Result<Variable> {
    let store = open_store(path)?;
    if !is_array_node(&path.join(name).join("zarr.json"))? {
        return Err(GridProcessorError::schema(format!(
            "{} has no array named {}",
            path.display(),
            name
        )));
    }
    read_array(&store, name)
}

/// Attributes of a single array, without reading its data.
pub fn read_zarr_attributes(path: &Path, name: &str) -> Result<Attributes> {
    let store = open_store(path)?;
    let array = Array::open(store, &format!("/{}", name)).map_err(GridProcessorError::storage_err)?;
    Ok(array.attributes().clone())
}

/// Names of the arrays directly under the store root, sorted.
pub fn array_names(path: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if is_array_node(&entry.path().join("zarr.json"))? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn open_store(path: &Path) -> Result<Arc<FilesystemStore>> {
    if !path.join("zarr.json").is_file() {
        return Err(GridProcessorError::UnsupportedFormat(format!(
            "{} is not a Zarr V3 store",
            path.display()
        )));
    }
    Ok(Arc::new(
        FilesystemStore::new(path).map_err(GridProcessorError::storage_err)?,
    ))
}

fn read_array(store: &Arc<FilesystemStore>, name: &str) -> Result<Variable> {
    let array =
        Array::open(store.clone(), &format!("/{}", name)).map_err(GridProcessorError::storage_err)?;
    let shape: Vec<usize> = array.shape().iter().map(|&n| n as usize).collect();
    let mut attrs = array.attributes().clone();

    let dims: Vec<String> = match attrs.remove(DIMENSIONS_ATTR) {
        Some(value) => serde_json::from_value(value)?,
        None if shape.len() == 1 => vec![name.to_string()],
        None => (0..shape.len()).map(|i| format!("{}_dim_{}", name, i)).collect(),
    };

    let values = retrieve_all(&array)?;
    let mut variable = Variable::new(dims, shape, values)?;
    variable.attrs = attrs;
    Ok(variable)
}

fn is_array_node(metadata: &Path) -> Result<bool> {
    if !metadata.is_file() {
        return Ok(false);
    }
    let json: serde_json::Value = serde_json::from_slice(&std::fs::read(metadata)?)?;
    Ok(json.get("node_type").and_then(|v| v.as_str()) == Some("array"))
}

macro_rules! retrieve_as_f64 {
    ($array:expr, $subset:expr, $ty:ty) => {
        $array
            .retrieve_array_subset_elements::<$ty>($subset)
            .map_err(GridProcessorError::storage_err)?
            .into_iter()
            .map(|v| v as f64)
            .collect::<Vec<f64>>()
    };
}

fn retrieve_all(array: &Array<FilesystemStore>) -> Result<Vec<f64>> {
    if array.shape().iter().any(|&n| n == 0) {
        return Ok(Vec::new());
    }
    let subset = ArraySubset::new_with_shape(array.shape().to_vec());

    let values = match array.data_type() {
        DataType::Float64 => array
            .retrieve_array_subset_elements::<f64>(&subset)
            .map_err(GridProcessorError::storage_err)?,
        DataType::Float32 => retrieve_as_f64!(array, &subset, f32),
        DataType::Int8 => retrieve_as_f64!(array, &subset, i8),
        DataType::Int16 => retrieve_as_f64!(array, &subset, i16),
        DataType::Int32 => retrieve_as_f64!(array, &subset, i32),
        DataType::Int64 => retrieve_as_f64!(array, &subset, i64),
        DataType::UInt8 => retrieve_as_f64!(array, &subset, u8),
        DataType::UInt16 => retrieve_as_f64!(array, &subset, u16),
        DataType::UInt32 => retrieve_as_f64!(array, &subset, u32),
        other => {
            return Err(GridProcessorError::UnsupportedFormat(format!(
                "Zarr data type {:?}",
                other
            )))
        }
    };
    Ok(values)
}

/// Write a dataset as a Zarr store at `path`.
///
/// Coordinates are stored as float64 and data variables as float32, both
/// with a NaN fill value.
pub fn write_zarr(dataset: &Dataset, path: &Path, config: &GridProcessorConfig) -> Result<()> {
    std::fs::create_dir_all(path)?;
    let store = Arc::new(FilesystemStore::new(path).map_err(GridProcessorError::storage_err)?);

    let mut group_builder = GroupBuilder::new();
    group_builder
        .attributes(dataset.attrs.clone())
        .build(store.clone(), "/")
        .map_err(GridProcessorError::storage_err)?
        .store_metadata()
        .map_err(GridProcessorError::storage_err)?;

    for (name, variable) in &dataset.variables {
        if variable.ndim() == 0 {
            debug!(variable = %name, "Skipping scalar variable");
            continue;
        }
        let data_type = if dataset.is_coordinate(name) {
            DataType::Float64
        } else {
            DataType::Float32
        };
        write_variable(store.clone(), name, variable, data_type, config)?;
    }

    Ok(())
}

fn write_variable(
    store: Arc<FilesystemStore>,
    name: &str,
    variable: &Variable,
    data_type: DataType,
    config: &GridProcessorConfig,
) -> Result<()> {
    let shape: Vec<u64> = variable.shape.iter().map(|&n| n as u64).collect();

    let mut attrs = variable.attrs.clone();
    attrs.insert(DIMENSIONS_ATTR.to_string(), serde_json::json!(variable.dims));

    let chunk_grid: zarrs::array::ChunkGrid = chunk_shape(&variable.shape, config.zarr_chunk_size)
        .try_into()
        .map_err(|e| GridProcessorError::Config(format!("{:?}", e)))?;

    let (fill_value, typesize) = match data_type {
        DataType::Float64 => (FillValue::from(f64::NAN), 8),
        _ => (FillValue::from(f32::NAN), 4),
    };

    let mut binding = ArrayBuilder::new(shape.clone(), data_type.clone(), chunk_grid, fill_value);
    let mut builder = binding.attributes(attrs);
    if config.zarr_compression != ZarrCompression::None {
        builder = builder.bytes_to_bytes_codecs(vec![compression_codec(config, typesize)?]);
    }

    let array = builder
        .build(store, &format!("/{}", name))
        .map_err(GridProcessorError::storage_err)?;
    array
        .store_metadata()
        .map_err(GridProcessorError::storage_err)?;

    if variable.values.is_empty() {
        return Ok(());
    }

    let subset = ArraySubset::new_with_start_shape(vec![0; shape.len()], shape)
        .map_err(GridProcessorError::storage_err)?;
    match data_type {
        DataType::Float64 => array.store_array_subset_elements(&subset, variable.values.as_slice()),
        _ => {
            let narrowed: Vec<f32> = variable.values.iter().map(|&v| v as f32).collect();
            array.store_array_subset_elements(&subset, narrowed.as_slice())
        }
    }
    .map_err(GridProcessorError::storage_err)?;

    Ok(())
}

/// Whole-axis chunks for 1-d arrays; for n-d arrays one step along each
/// leading axis and square spatial tiles over the last two.
fn chunk_shape(shape: &[usize], chunk_size: usize) -> Vec<u64> {
    let n = shape.len();
    shape
        .iter()
        .enumerate()
        .map(|(axis, &len)| {
            let chunk = if n == 1 {
                len
            } else if axis + 2 >= n {
                len.min(chunk_size)
            } else {
                1
            };
            chunk.max(1) as u64
        })
        .collect()
}

fn compression_codec(
    config: &GridProcessorConfig,
    typesize: usize,
) -> Result<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
    let level = BloscCompressionLevel::try_from(config.zarr_compression_level)
        .map_err(|_| GridProcessorError::Config("Invalid compression level".to_string()))?;

    let (shuffle, typesize) = if config.zarr_shuffle {
        (BloscShuffleMode::Shuffle, Some(typesize))
    } else {
        (BloscShuffleMode::NoShuffle, None)
    };

    let compressor = match config.zarr_compression {
        ZarrCompression::None => {
            return Err(GridProcessorError::Config(
                "No compression configured".to_string(),
            ))
        }
        ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
        ZarrCompression::BloscZstd => BloscCompressor::Zstd,
    };

    let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
        .map_err(|e| GridProcessorError::Config(e.to_string()))?;
    Ok(Arc::new(codec))
}
