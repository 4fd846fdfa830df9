use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a tensor. `Undefined` has no wire code and cannot be lowered.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    F32,
    F16,
    BF16,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U32,
    Bool,
    #[default]
    Undefined,
}

impl DataType {
    /// Stable code used in serialized descriptors.
    pub fn wire_code(&self) -> Option<i32> {
        match self {
            DataType::F32 => Some(0),
            DataType::F16 => Some(1),
            DataType::I8 => Some(2),
            DataType::I32 => Some(3),
            DataType::U8 => Some(4),
            DataType::I16 => Some(6),
            DataType::U32 => Some(8),
            DataType::I64 => Some(9),
            DataType::F64 => Some(11),
            DataType::Bool => Some(12),
            DataType::BF16 => Some(27),
            DataType::Undefined => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Memory layout tag of a tensor.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    ND,
    NCHW,
    NHWC,
    HWCN,
    NC1HWC0,
    FractalZ,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum Dim {
    Static(usize),
    Variable(String),
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Static(v) => write!(f, "{}", v),
            Dim::Variable(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, Default)]
#[serde(transparent)]
pub struct Shape {
    pub dims: Vec<Dim>,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self { dims: dims.iter().map(|&d| Dim::Static(d)).collect() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        write!(f, "[{}]", dims.join(", "))
    }
}

/// Where a fused unit's output originally came from.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct OutputOrigin {
    pub node: String,
    pub output_index: usize,
    pub dtype: DataType,
    pub format: Format,
}

/// Typed description of one input or output position of a node.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, Default)]
pub struct TensorDesc {
    pub name: String,
    #[serde(default)]
    pub dtype: DataType,
    #[serde(default)]
    pub shape: Shape,
    #[serde(default)]
    pub format: Format,
    /// Tensor aliases mutable state (ref/variable semantics).
    #[serde(default)]
    pub is_ref: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<OutputOrigin>,
}

impl TensorDesc {
    pub fn new(name: &str, dtype: DataType, dims: &[usize]) -> Self {
        Self {
            name: name.to_string(),
            dtype,
            shape: Shape::new(dims),
            ..Default::default()
        }
    }
}
