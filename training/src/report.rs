use std::{
    collections::{BTreeMap, btree_map},
    fmt,
};

use ndarray::ArrayD;

/// Where the data of a tensor lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

/// A dense tensor tagged with the device it was produced on.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: ArrayD<f32>,
    device: Device,
}

impl Tensor {
    /// Creates a new `Tensor`.
    ///
    /// # Arguments
    /// * `data` - The values of the tensor.
    /// * `device` - The device holding the values.
    pub fn new(data: ArrayD<f32>, device: Device) -> Self {
        Self { data, device }
    }

    /// Creates a zero dimensional tensor holding `value`.
    pub fn scalar(value: f32, device: Device) -> Self {
        Self::new(ArrayD::from_elem(vec![], value), device)
    }

    /// Creates a tensor of the given shape filled with `value`.
    pub fn full(shape: &[usize], value: f32, device: Device) -> Self {
        Self::new(ArrayD::from_elem(shape.to_vec(), value), device)
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Returns a copy of this tensor living on the cpu.
    pub fn to_cpu(&self) -> Tensor {
        Self {
            data: self.data.clone(),
            device: Device::Cpu,
        }
    }
}

/// A single reported value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Tensor(Tensor),
}

impl Value {
    /// Returns this value as a float when it is a scalar.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Tensor(t) if t.data.len() == 1 => t.data.iter().next().map(|&v| f64::from(v)),
            Value::Tensor(_) => None,
        }
    }

    /// A short name for the kind of value, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Float(_) => "float",
            Value::Int(_) => "int",
            Value::Tensor(_) => "tensor",
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(f64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<Tensor> for Value {
    fn from(value: Tensor) -> Self {
        Value::Tensor(value)
    }
}

/// The values a single step produced, keyed by output name.
pub type Outputs = BTreeMap<String, Value>;

/// The per-step record of reported values.
///
/// A fresh `Observation` is opened with every iteration and travels with it
/// until the iteration completes, so deferred completions still write into
/// the record of the iteration they belong to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    values: BTreeMap<String, Value>,
}

impl Observation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports a value under `key`, replacing any previous value for the same key.
    pub fn report<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Merges another observation into this one.
    pub fn extend(&mut self, other: Observation) {
        self.values.extend(other.values);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<'a> IntoIterator for &'a Observation {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Running mean of the scalar values of many observations.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    sums: BTreeMap<String, (f64, usize)>,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates every scalar value in `observation`, non scalar tensors are skipped.
    pub fn add(&mut self, observation: &Observation) {
        for (key, value) in observation {
            let Some(v) = value.as_scalar() else {
                continue;
            };

            let entry = self.sums.entry(key.clone()).or_insert((0., 0));
            entry.0 += v;
            entry.1 += 1;
        }
    }

    /// Returns the mean of every accumulated key.
    pub fn compute(&self) -> Observation {
        let mut observation = Observation::new();

        for (key, &(sum, n)) in &self.sums {
            observation.report(key.clone(), sum / n as f64);
        }

        observation
    }

    pub fn clear(&mut self) {
        self.sums.clear();
    }
}
