use std::fs::File;
use std::path::{Path, PathBuf};
use std::collections::BTreeMap;
use std::io::{BufReader, Read, Seek};
use byteorder::{LittleEndian, ReadBytesExt};
use memmap2::Mmap;
use ndarray::{ArrayD, IxDyn};
use super::types::{GGUFValue, GGUFError, GGUFValueType, GGMLType, TensorInfo};
use super::gguf_utils::{self, GGUF_MAGIC, DEFAULT_ALIGNMENT};
use tracing::debug;

/// Reader for a GGUF artifact.
///
/// The header (metadata and tensor directory) is parsed eagerly. Tensor
/// payloads stay in a read-only memory map and are decoded on request.
pub struct GGUFReader {
    /// Path to the GGUF file
    pub path: PathBuf,
    /// Format version from the header
    pub version: u32,
    /// Metadata key-value pairs, with the type name of each value
    pub metadata: BTreeMap<String, (String, GGUFValue)>,
    /// Information about each tensor
    pub tensors: Vec<TensorInfo>,
    /// Absolute file offset of the tensor data section
    data_offset: u64,
    /// Memory-mapped file contents
    data: Mmap,
}

impl GGUFReader {
    /// Opens and parses a GGUF file.
    ///
    /// Every tensor's byte range is checked against the file length here, so
    /// a truncated artifact fails on open rather than on first access.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, GGUFError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = BufReader::new(&file);

        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != GGUF_MAGIC {
            return Err(GGUFError::InvalidFormat("Invalid magic number".into()));
        }

        // Version 1 used 32-bit counts and is long obsolete
        let version = reader.read_u32::<LittleEndian>()?;
        if !(2..=3).contains(&version) {
            return Err(GGUFError::InvalidFormat(format!("Unsupported GGUF version: {}", version)));
        }

        let tensor_count = gguf_utils::read_length(&mut reader)?;
        let metadata_count = gguf_utils::read_length(&mut reader)?;

        debug!("Reading GGUF file {}: {} tensors, {} metadata entries",
               path.display(), tensor_count, metadata_count);

        let mut metadata: BTreeMap<String, (String, GGUFValue)> = BTreeMap::new();
        for _ in 0..metadata_count {
            let (key, type_str, value) = read_metadata_kv(&mut reader)?;
            metadata.insert(key, (type_str, value));
        }

        let tensors = read_tensor_info(&mut reader, tensor_count)?;

        let alignment = match metadata.get("general.alignment") {
            Some((_, value)) => match value.as_int() {
                Some(a) if a > 0 => a as u64,
                _ => return Err(GGUFError::InvalidFormat(format!("Invalid alignment: {}", value))),
            },
            None => DEFAULT_ALIGNMENT,
        };

        let header_end = reader.stream_position()?;
        let data_offset = gguf_utils::align_offset(header_end, alignment);
        drop(reader);

        // SAFETY: the mapping is read-only and artifacts are not modified
        // while the process that loaded them is running.
        let data = unsafe { Mmap::map(&file)? };

        for tensor in &tensors {
            let len = tensor.byte_len()?;
            let end = data_offset
                .checked_add(tensor.offset)
                .and_then(|start| start.checked_add(len as u64));
            match end {
                Some(end) if end <= data.len() as u64 => {}
                _ => {
                    return Err(GGUFError::InvalidFormat(format!(
                        "Tensor {} extends past end of file", tensor.name
                    )))
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            version,
            metadata,
            tensors,
            data_offset,
            data,
        })
    }

    pub fn get_metadata_value(&self, key: &str) -> Result<&GGUFValue, GGUFError> {
        match self.metadata.get(key) {
            Some((_, value)) => Ok(value),
            None => Err(GGUFError::MetadataNotFound(key.to_string()))
        }
    }

    pub fn tensor_info(&self, name: &str) -> Option<&TensorInfo> {
        self.tensors.iter().find(|t| t.name == name)
    }

    pub fn has_tensor(&self, name: &str) -> bool {
        self.tensor_info(name).is_some()
    }

    /// Decodes a tensor into an owned f32 array in row-major shape.
    pub fn tensor(&self, name: &str) -> Result<ArrayD<f32>, GGUFError> {
        let info = self.tensor_info(name)
            .ok_or_else(|| GGUFError::TensorNotFound(name.to_string()))?;

        // Range was validated in `new`
        let start = (self.data_offset + info.offset) as usize;
        let bytes = &self.data[start..start + info.byte_len()?];

        let values: Vec<f32> = match info.data_type {
            GGMLType::F32 => bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            GGMLType::F16 => bytes
                .chunks_exact(2)
                .map(|c| gguf_utils::f16_to_f32(u16::from_le_bytes([c[0], c[1]])))
                .collect(),
        };

        ArrayD::from_shape_vec(IxDyn(&info.shape()), values)
            .map_err(|e| GGUFError::InvalidFormat(format!("Tensor {}: {}", name, e)))
    }
}

fn read_metadata_kv<R: Read>(reader: &mut R) -> Result<(String, String, GGUFValue), GGUFError> {
    let key = gguf_utils::read_string(reader)?;

    let value_type = GGUFValueType::try_from(reader.read_u32::<LittleEndian>()?)?;
    let type_str = value_type.type_string();

    let value = gguf_utils::read_value_by_type(reader, value_type)?;
    Ok((key, type_str, value))
}

fn read_tensor_info<R: Read>(reader: &mut R, tensor_count: usize) -> Result<Vec<TensorInfo>, GGUFError> {
    let mut tensors = Vec::with_capacity(tensor_count.min(4096));

    for _ in 0..tensor_count {
        let name = gguf_utils::read_string(reader)?;

        let n_dims = reader.read_u32::<LittleEndian>()?;
        if n_dims > 8 {
            return Err(GGUFError::InvalidFormat(format!("Tensor {} has {} dimensions", name, n_dims)));
        }

        let mut dims = Vec::with_capacity(n_dims as usize);
        for _ in 0..n_dims {
            dims.push(reader.read_u64::<LittleEndian>()?);
        }

        let data_type = GGMLType::try_from(reader.read_u32::<LittleEndian>()?)?;
        let offset = reader.read_u64::<LittleEndian>()?;

        tensors.push(TensorInfo {
            name,
            dims,
            data_type,
            offset,
        });
    }

    Ok(tensors)
}
