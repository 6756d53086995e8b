use std::fmt::{self};
use std::error::Error;
use serde::{Serialize, Deserialize};

/// GGUF metadata value types that can be stored in a GGUF file
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub enum GGUFValue {
    /// String value type for text data
    String(String),
    /// Integer value type for whole numbers, stored as i64
    Int(i64),
    /// Float value type for decimal numbers, stored as f64
    Float(f64),
    /// Boolean value type for true/false values
    Bool(bool),
    /// Array value type for sequences of other GGUF values
    Array(Vec<GGUFValue>),
}

impl GGUFValue {
    /// Attempts to convert the value to an integer
    ///
    /// # Returns
    /// Some(i64) if the value can be converted to an integer, None otherwise
    pub fn as_int(&self) -> Option<i64> {
        match self {
            GGUFValue::Int(i) => Some(*i),
            GGUFValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Attempts to convert the value to a float. Integers are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            GGUFValue::Float(f) => Some(*f),
            GGUFValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GGUFValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[GGUFValue]> {
        match self {
            GGUFValue::Array(values) => Some(values),
            _ => None,
        }
    }
}

// Keep long arrays readable in debug output
impl fmt::Debug for GGUFValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GGUFValue::String(s) => write!(f, "String({:?})", s),
            GGUFValue::Int(i) => write!(f, "Int({})", i),
            GGUFValue::Float(fl) => write!(f, "Float({})", fl),
            GGUFValue::Bool(b) => write!(f, "Bool({})", b),
            GGUFValue::Array(arr) => {
                if arr.is_empty() {
                    write!(f, "Array([])")
                } else if arr.len() <= 3 {
                    write!(f, "Array({:?})", arr)
                } else {
                    write!(f, "Array([{:?}, {:?}, {:?}, ...and {} more])",
                           &arr[0], &arr[1], &arr[2], arr.len() - 3)
                }
            }
        }
    }
}

/// Custom error types for GGUF operations
#[derive(Debug)]
pub enum GGUFError {
    /// Wraps std::io::Error for file operations
    IoError(std::io::Error),
    /// Invalid format errors with a message
    InvalidFormat(String),
    /// Missing metadata key errors
    MetadataNotFound(String),
    /// Requested tensor is not present in the file
    TensorNotFound(String),
    /// Tensor stored in a data type this reader cannot decode
    UnsupportedTensorType(u32),
}

/// Implements Display trait for GGUFError for error reporting
impl fmt::Display for GGUFError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GGUFError::IoError(e) => write!(f, "I/O error: {}", e),
            GGUFError::InvalidFormat(msg) => write!(f, "Invalid GGUF format: {}", msg),
            GGUFError::MetadataNotFound(key) => write!(f, "Metadata key not found: {}", key),
            GGUFError::TensorNotFound(name) => write!(f, "Tensor not found: {}", name),
            GGUFError::UnsupportedTensorType(t) => write!(f, "Unsupported tensor data type: {}", t),
        }
    }
}

/// Implements Error trait to allow GGUFError to be used as a standard error type
impl Error for GGUFError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GGUFError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

/// Allows automatic conversion from std::io::Error to GGUFError
impl From<std::io::Error> for GGUFError {
    fn from(err: std::io::Error) -> Self {
        GGUFError::IoError(err)
    }
}

/// Value type identifiers for metadata entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GGUFValueType {
    UINT8 = 0,
    INT8 = 1,
    UINT16 = 2,
    INT16 = 3,
    UINT32 = 4,
    INT32 = 5,
    FLOAT32 = 6,
    BOOL = 7,
    STRING = 8,
    ARRAY = 9,
    UINT64 = 10,
    INT64 = 11,
    FLOAT64 = 12,
}

impl GGUFValueType {
    /// Convert the value type to a string representation
    pub fn type_string(&self) -> String {
        match self {
            GGUFValueType::STRING => "String",
            GGUFValueType::ARRAY => "Array",
            GGUFValueType::BOOL => "Bool",
            GGUFValueType::FLOAT32 | GGUFValueType::FLOAT64 => "Float",
            _ => "Int", // All other numeric types
        }.to_string()
    }
}

impl TryFrom<u32> for GGUFValueType {
    type Error = GGUFError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GGUFValueType::UINT8),
            1 => Ok(GGUFValueType::INT8),
            2 => Ok(GGUFValueType::UINT16),
            3 => Ok(GGUFValueType::INT16),
            4 => Ok(GGUFValueType::UINT32),
            5 => Ok(GGUFValueType::INT32),
            6 => Ok(GGUFValueType::FLOAT32),
            7 => Ok(GGUFValueType::BOOL),
            8 => Ok(GGUFValueType::STRING),
            9 => Ok(GGUFValueType::ARRAY),
            10 => Ok(GGUFValueType::UINT64),
            11 => Ok(GGUFValueType::INT64),
            12 => Ok(GGUFValueType::FLOAT64),
            _ => Err(GGUFError::InvalidFormat(format!("Unknown value type: {}", value))),
        }
    }
}

/// Element types a tensor payload can be stored in.
///
/// Only the unquantized float types are meaningful for classifier weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GGMLType {
    F32 = 0,
    F16 = 1,
}

impl GGMLType {
    /// Size in bytes of a single element
    pub fn element_size(&self) -> usize {
        match self {
            GGMLType::F32 => 4,
            GGMLType::F16 => 2,
        }
    }
}

impl TryFrom<u32> for GGMLType {
    type Error = GGUFError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GGMLType::F32),
            1 => Ok(GGMLType::F16),
            other => Err(GGUFError::UnsupportedTensorType(other)),
        }
    }
}

impl fmt::Display for GGMLType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GGMLType::F32 => write!(f, "F32"),
            GGMLType::F16 => write!(f, "F16"),
        }
    }
}

/// Information about a tensor in the GGUF file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorInfo {
    /// Name/label of the tensor
    pub name: String,
    /// Size of each dimension, fastest-varying first (ggml order)
    pub dims: Vec<u64>,
    /// Data type of the tensor
    pub data_type: GGMLType,
    /// Offset of the tensor data, relative to the start of the data section
    pub offset: u64,
}

impl TensorInfo {
    /// Row-major shape, i.e. `dims` reversed. A PyTorch `[out, in, kh, kw]`
    /// weight comes back in that order.
    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().rev().map(|&d| d as usize).collect()
    }

    /// Total number of elements, or `None` if the dimensions overflow `usize`
    pub fn n_elements(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, &d| {
            acc.checked_mul(usize::try_from(d).ok()?)
        })
    }

    /// Size of the tensor payload in bytes
    ///
    /// # Errors
    /// `GGUFError::InvalidFormat` if the size does not fit in `usize`
    pub fn byte_len(&self) -> Result<usize, GGUFError> {
        self.n_elements()
            .and_then(|n| n.checked_mul(self.data_type.element_size()))
            .ok_or_else(|| GGUFError::InvalidFormat(format!(
                "Tensor {} has dimensions {:?} too large to address", self.name, self.dims
            )))
    }
}

impl fmt::Display for TensorInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.shape().iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(" x "))
    }
}

impl fmt::Display for GGUFValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.type_string())
    }
}

impl fmt::Display for GGUFValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GGUFValue::String(s) => write!(f, "{}", s),
            GGUFValue::Int(i) => write!(f, "{}", i),
            GGUFValue::Float(fl) => write!(f, "{}", fl),
            GGUFValue::Bool(b) => write!(f, "{}", b),
            GGUFValue::Array(arr) => {
                write!(f, "[")?;
                for (i, value) in arr.iter().enumerate() {
                    if i > 0 { write!(f, ", ")? }
                    write!(f, "{}", value)?;
                }
                write!(f, "]")
            }
        }
    }
}
