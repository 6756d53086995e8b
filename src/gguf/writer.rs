use std::fs;
use std::io::Write;
use std::path::Path;
use byteorder::{LittleEndian, WriteBytesExt};
use super::types::{GGUFError, GGUFValueType, GGMLType};
use super::gguf_utils::{align_offset, GGUF_MAGIC, DEFAULT_ALIGNMENT};

struct PendingTensor {
    name: String,
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// Builds a version 3 GGUF artifact with F32 tensors.
///
/// Used by export tooling and test fixtures to produce files the
/// [`GGUFReader`](super::GGUFReader) accepts.
pub struct GGUFWriter {
    kv_count: u64,
    kv_bytes: Vec<u8>,
    tensors: Vec<PendingTensor>,
}

impl Default for GGUFWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl GGUFWriter {
    pub fn new() -> Self {
        Self {
            kv_count: 0,
            kv_bytes: Vec::new(),
            tensors: Vec::new(),
        }
    }

    fn push_key(&mut self, key: &str, value_type: GGUFValueType) {
        self.kv_count += 1;
        write_string(&mut self.kv_bytes, key);
        self.kv_bytes.extend_from_slice(&(value_type as u32).to_le_bytes());
    }

    pub fn add_string(&mut self, key: &str, value: &str) {
        self.push_key(key, GGUFValueType::STRING);
        write_string(&mut self.kv_bytes, value);
    }

    pub fn add_u32(&mut self, key: &str, value: u32) {
        self.push_key(key, GGUFValueType::UINT32);
        self.kv_bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_f32(&mut self, key: &str, value: f32) {
        self.push_key(key, GGUFValueType::FLOAT32);
        self.kv_bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn add_u32_array(&mut self, key: &str, values: &[u32]) {
        self.push_key(key, GGUFValueType::ARRAY);
        self.kv_bytes.extend_from_slice(&(GGUFValueType::UINT32 as u32).to_le_bytes());
        self.kv_bytes.extend_from_slice(&(values.len() as u64).to_le_bytes());
        for value in values {
            self.kv_bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    /// Adds a tensor given its row-major shape and data
    pub fn add_tensor(&mut self, name: &str, shape: &[usize], data: &[f32]) {
        self.tensors.push(PendingTensor {
            name: name.to_string(),
            shape: shape.to_vec(),
            data: data.to_vec(),
        });
    }

    /// Serializes the artifact into memory
    pub fn to_bytes(&self) -> Result<Vec<u8>, GGUFError> {
        for tensor in &self.tensors {
            let expected: usize = tensor.shape.iter().product();
            if expected != tensor.data.len() {
                return Err(GGUFError::InvalidFormat(format!(
                    "Tensor {} has {} values for shape {:?}",
                    tensor.name, tensor.data.len(), tensor.shape
                )));
            }
        }

        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(GGUF_MAGIC)?;
        out.write_u32::<LittleEndian>(3)?;
        out.write_u64::<LittleEndian>(self.tensors.len() as u64)?;
        out.write_u64::<LittleEndian>(self.kv_count)?;
        out.write_all(&self.kv_bytes)?;

        // Directory entries: offsets are relative to the aligned data section
        let mut offset = 0u64;
        for tensor in &self.tensors {
            write_string(&mut out, &tensor.name);
            out.write_u32::<LittleEndian>(tensor.shape.len() as u32)?;
            for &dim in tensor.shape.iter().rev() {
                out.write_u64::<LittleEndian>(dim as u64)?;
            }
            out.write_u32::<LittleEndian>(GGMLType::F32 as u32)?;
            out.write_u64::<LittleEndian>(offset)?;
            offset = align_offset(offset + (tensor.data.len() * 4) as u64, DEFAULT_ALIGNMENT);
        }

        for tensor in &self.tensors {
            let padded = align_offset(out.len() as u64, DEFAULT_ALIGNMENT) as usize;
            out.resize(padded, 0);
            for value in &tensor.data {
                out.write_f32::<LittleEndian>(*value)?;
            }
        }

        Ok(out)
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), GGUFError> {
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u64).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}
