//! In-memory labelled arrays.
//!
//! A [`Dataset`] is a set of named n-dimensional variables sharing named
//! dimensions. A variable whose only dimension carries its own name is a
//! coordinate; everything else is a data variable. Values are held as `f64`
//! in row-major order regardless of the on-disk type.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{GridProcessorError, Result};

/// Attribute map, shared with the Zarr attribute representation.
pub type Attributes = Map<String, Value>;

/// A named n-dimensional array.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
    pub attrs: Attributes,
}

impl Variable {
    pub fn new(dims: Vec<String>, shape: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        if dims.len() != shape.len() {
            return Err(GridProcessorError::schema(format!(
                "{} dimension names for a {}-d array",
                dims.len(),
                shape.len()
            )));
        }
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(GridProcessorError::schema(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                expected,
                values.len()
            )));
        }
        Ok(Self {
            dims,
            shape,
            values,
            attrs: Attributes::new(),
        })
    }

    /// A 1-d coordinate variable named after its dimension.
    pub fn coordinate(name: &str, values: Vec<f64>) -> Self {
        Self {
            dims: vec![name.to_string()],
            shape: vec![values.len()],
            values,
            attrs: Attributes::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn axis(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        match self.attrs.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::Array(items) => items.first().and_then(Value::as_f64),
            Value::String(s) => match s.as_str() {
                "NaN" => Some(f64::NAN),
                _ => s.parse().ok(),
            },
            _ => None,
        }
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    /// Apply CF packing and missing-value conventions in place.
    ///
    /// Values equal to `_FillValue` or `missing_value` become NaN, then
    /// `scale_factor` and `add_offset` are applied. The consumed attributes
    /// are removed so decoding twice is a no-op.
    pub fn decode_cf(&mut self) {
        let sentinels: Vec<f64> = ["_FillValue", "missing_value"]
            .iter()
            .filter_map(|key| self.attr_f64(key))
            .filter(|v| !v.is_nan())
            .collect();
        let scale = self.attr_f64("scale_factor").unwrap_or(1.0);
        let offset = self.attr_f64("add_offset").unwrap_or(0.0);

        for v in self.values.iter_mut() {
            if sentinels.iter().any(|s| *v == *s) {
                *v = f64::NAN;
            } else {
                *v = *v * scale + offset;
            }
        }

        for key in ["_FillValue", "missing_value", "scale_factor", "add_offset"] {
            self.attrs.remove(key);
        }
    }

    /// Reorder axes so that the dimensions appear in `order`.
    pub fn transpose(&self, order: &[&str]) -> Result<Variable> {
        if order.len() != self.ndim() {
            return Err(GridProcessorError::schema(format!(
                "cannot transpose {:?} to {:?}",
                self.dims, order
            )));
        }
        let perm: Vec<usize> = order
            .iter()
            .map(|d| {
                self.axis(d).ok_or_else(|| {
                    GridProcessorError::schema(format!("no dimension {} in {:?}", d, self.dims))
                })
            })
            .collect::<Result<_>>()?;

        if perm.iter().enumerate().all(|(i, &p)| i == p) {
            return Ok(self.clone());
        }

        let new_shape: Vec<usize> = perm.iter().map(|&p| self.shape[p]).collect();
        let old_strides = strides(&self.shape);
        let mut values = Vec::with_capacity(self.values.len());
        let mut index = vec![0usize; new_shape.len()];

        for _ in 0..self.values.len() {
            let offset: usize = index
                .iter()
                .zip(&perm)
                .map(|(&i, &p)| i * old_strides[p])
                .sum();
            values.push(self.values[offset]);

            for axis in (0..index.len()).rev() {
                index[axis] += 1;
                if index[axis] < new_shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }

        Ok(Variable {
            dims: order.iter().map(|d| d.to_string()).collect(),
            shape: new_shape,
            values,
            attrs: self.attrs.clone(),
        })
    }
}

fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// A collection of variables sharing named dimensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub variables: BTreeMap<String, Variable>,
    pub attrs: Attributes,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a variable, checking that its dimension sizes agree with the
    /// variables already present.
    pub fn insert(&mut self, name: &str, variable: Variable) -> Result<()> {
        let sizes = self.dims();
        for (dim, &len) in variable.dims.iter().zip(&variable.shape) {
            if let Some(&existing) = sizes.get(dim) {
                if existing != len {
                    return Err(GridProcessorError::schema(format!(
                        "dimension {} has length {} in {} but {} elsewhere",
                        dim, len, name, existing
                    )));
                }
            }
        }
        self.variables.insert(name.to_string(), variable);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// All dimensions and their lengths.
    pub fn dims(&self) -> BTreeMap<String, usize> {
        let mut dims = BTreeMap::new();
        for var in self.variables.values() {
            for (dim, &len) in var.dims.iter().zip(&var.shape) {
                dims.entry(dim.clone()).or_insert(len);
            }
        }
        dims
    }

    pub fn is_coordinate(&self, name: &str) -> bool {
        self.variables
            .get(name)
            .map(|v| v.dims.len() == 1 && v.dims[0] == name)
            .unwrap_or(false)
    }

    /// Names of the non-coordinate variables, sorted.
    pub fn data_variables(&self) -> Vec<&str> {
        self.variables
            .keys()
            .filter(|name| !self.is_coordinate(name))
            .map(String::as_str)
            .collect()
    }

    /// Rename a variable and/or dimension. Renaming a name that is absent
    /// is a no-op.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let dim_exists = self.dims().contains_key(from);
        if (self.contains(from) && self.contains(to)) || (dim_exists && self.dims().contains_key(to))
        {
            return Err(GridProcessorError::schema(format!(
                "cannot rename {} to {}: {} already exists",
                from, to, to
            )));
        }
        if let Some(var) = self.variables.remove(from) {
            self.variables.insert(to.to_string(), var);
        }
        for var in self.variables.values_mut() {
            for dim in var.dims.iter_mut() {
                if dim == from {
                    *dim = to.to_string();
                }
            }
        }
        Ok(())
    }

    /// Remove the named variables; missing names are ignored.
    pub fn drop_vars<S: AsRef<str>>(&mut self, names: &[S]) {
        for name in names {
            self.variables.remove(name.as_ref());
        }
    }

    /// Remove a length-1 dimension from every variable, dropping its
    /// coordinate. A dimension that is absent is a no-op.
    pub fn squeeze(&mut self, dim: &str) -> Result<()> {
        let len = match self.dims().get(dim) {
            Some(&len) => len,
            None => return Ok(()),
        };
        if len != 1 {
            return Err(GridProcessorError::schema(format!(
                "cannot squeeze dimension {} of length {}",
                dim, len
            )));
        }

        self.variables.remove(dim);
        for var in self.variables.values_mut() {
            if let Some(axis) = var.axis(dim) {
                var.dims.remove(axis);
                var.shape.remove(axis);
            }
        }
        Ok(())
    }
}
