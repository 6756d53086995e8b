use std::fs::File;
use std::path::Path;
use std::io::Read;
use byteorder::{LittleEndian, ReadBytesExt};
use super::types::{GGUFValue, GGUFError, GGUFValueType};

/// The magic number that identifies GGUF files
pub const GGUF_MAGIC: u32 = 0x46554747; // "GGUF" in ASCII

/// Default alignment of the tensor data section
pub const DEFAULT_ALIGNMENT: u64 = 32;

/// Upper bound on any length prefix read from a file. A corrupt header
/// must not be able to request a multi-gigabyte allocation.
const MAX_LENGTH_PREFIX: u64 = 64 * 1024 * 1024;

/// Reads a u64 length prefix and rejects implausible values
pub fn read_length<R: Read>(reader: &mut R) -> Result<usize, GGUFError> {
    let len = reader.read_u64::<LittleEndian>()?;
    if len > MAX_LENGTH_PREFIX {
        return Err(GGUFError::InvalidFormat(format!("Length prefix too large: {}", len)));
    }
    Ok(len as usize)
}

/// Read a length-prefixed UTF-8 string
pub fn read_string<R: Read>(reader: &mut R) -> Result<String, GGUFError> {
    let str_len = read_length(reader)?;

    let mut buffer = vec![0u8; str_len];
    reader.read_exact(&mut buffer)?;

    String::from_utf8(buffer)
        .map_err(|e| GGUFError::InvalidFormat(format!("Invalid UTF-8 in string: {}", e)))
}

/// Read a GGUF value of the specified type
pub fn read_value_by_type<R: Read>(reader: &mut R, value_type: GGUFValueType) -> Result<GGUFValue, GGUFError> {
    let value = match value_type {
        GGUFValueType::UINT8 => GGUFValue::Int(reader.read_u8()? as i64),
        GGUFValueType::INT8 => GGUFValue::Int(reader.read_i8()? as i64),
        GGUFValueType::UINT16 => GGUFValue::Int(reader.read_u16::<LittleEndian>()? as i64),
        GGUFValueType::INT16 => GGUFValue::Int(reader.read_i16::<LittleEndian>()? as i64),
        GGUFValueType::UINT32 => GGUFValue::Int(reader.read_u32::<LittleEndian>()? as i64),
        GGUFValueType::INT32 => GGUFValue::Int(reader.read_i32::<LittleEndian>()? as i64),
        GGUFValueType::FLOAT32 => GGUFValue::Float(reader.read_f32::<LittleEndian>()? as f64),
        GGUFValueType::BOOL => GGUFValue::Bool(reader.read_u8()? != 0),
        GGUFValueType::STRING => GGUFValue::String(read_string(reader)?),
        GGUFValueType::UINT64 => GGUFValue::Int(reader.read_u64::<LittleEndian>()? as i64),
        GGUFValueType::INT64 => GGUFValue::Int(reader.read_i64::<LittleEndian>()?),
        GGUFValueType::FLOAT64 => GGUFValue::Float(reader.read_f64::<LittleEndian>()?),
        GGUFValueType::ARRAY => {
            let element_type = GGUFValueType::try_from(reader.read_u32::<LittleEndian>()?)?;
            if element_type == GGUFValueType::ARRAY {
                return Err(GGUFError::InvalidFormat("Nested arrays are not supported".into()));
            }
            let arr_len = read_length(reader)?;
            let mut array = Vec::with_capacity(arr_len.min(4096));
            for _ in 0..arr_len {
                array.push(read_value_by_type(reader, element_type)?);
            }
            GGUFValue::Array(array)
        }
    };
    Ok(value)
}

/// Checks if a file at the given path is a GGUF format file by verifying its magic number.
///
/// # Arguments
///
/// * `path` - Path to the file to check
///
/// # Returns
///
/// `true` if the file exists and has a valid GGUF magic number, `false` otherwise
pub fn is_gguf_file<P: AsRef<Path>>(path: P) -> bool {
    if let Ok(mut file) = File::open(path) {
        if let Ok(magic) = file.read_u32::<LittleEndian>() {
            return magic == GGUF_MAGIC;
        }
    }
    false
}

/// Rounds `offset` up to the next multiple of `alignment`
pub fn align_offset(offset: u64, alignment: u64) -> u64 {
    offset.div_ceil(alignment) * alignment
}

/// Converts IEEE 754 half-precision bits to f32
pub fn f16_to_f32(bits: u16) -> f32 {
    let sign = ((bits >> 15) as u32) << 31;
    let exponent = ((bits >> 10) & 0x1f) as u32;
    let mantissa = (bits & 0x3ff) as u32;

    let out = match (exponent, mantissa) {
        (0, 0) => sign,
        (0, _) => {
            // Subnormal: renormalize into the f32 exponent range
            let mut shift: u32 = 0;
            let mut m = mantissa;
            while m & 0x400 == 0 {
                m <<= 1;
                shift += 1;
            }
            let exp32 = 127 - 14 - shift;
            sign | (exp32 << 23) | ((m & 0x3ff) << 13)
        }
        (0x1f, 0) => sign | 0x7f80_0000,
        (0x1f, _) => sign | 0x7fc0_0000 | (mantissa << 13),
        _ => sign | ((exponent + 127 - 15) << 23) | (mantissa << 13),
    };
    f32::from_bits(out)
}
