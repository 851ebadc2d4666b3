//! Binary weights format for the convolutional backbone.
//!
//! File format: `.vggw`
//!
//! Layout (little-endian):
//! ```text
//! Header:
//!   - Magic: "VGGW\0\0\0\0" (8 bytes)
//!   - Version: u32 (4 bytes)
//!   - Tensor count: u32 (4 bytes)
//!
//! Per convolution:
//!   - Name length: u32, then UTF-8 name (e.g. "conv1_1")
//!   - out_channels: u32
//!   - in_channels: u32
//!   - kernel: u32 (square kernel side)
//!   - Weights: out × in × kernel × kernel f32, (out, in, ky, kx) order
//!   - Biases: out f32
//! ```
//!
//! The layout matches a PyTorch `state_dict` of `Conv2d` layers dumped in
//! declaration order, so conversion is a plain flatten per tensor.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAGIC: &[u8; 8] = b"VGGW\0\0\0\0";
const VERSION: u32 = 1;

/// Names longer than this are treated as corruption.
const MAX_NAME_LEN: u32 = 256;

/// Largest tensor accepted (elements); VGG-19's biggest is 2.4M.
const MAX_TENSOR_LEN: usize = 1 << 28;

#[derive(Debug, Error)]
pub enum WeightsError {
    #[error("cannot open weights file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file magic (not a .vggw file)")]
    InvalidMagic,

    #[error("unsupported weights version: {0}")]
    UnsupportedVersion(u32),

    #[error("invalid weights data: {0}")]
    InvalidData(String),
}

/// Parameters of one convolution layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvWeights {
    pub name: String,
    pub out_channels: usize,
    pub in_channels: usize,
    pub kernel: usize,
    /// (out, in, ky, kx)
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl ConvWeights {
    pub fn new(
        name: impl Into<String>,
        out_channels: usize,
        in_channels: usize,
        kernel: usize,
        weights: Vec<f32>,
        bias: Vec<f32>,
    ) -> Result<Self, WeightsError> {
        let name = name.into();
        let expected = out_channels * in_channels * kernel * kernel;
        if weights.len() != expected {
            return Err(WeightsError::InvalidData(format!(
                "{name}: expected {expected} weights, got {}",
                weights.len()
            )));
        }
        if bias.len() != out_channels {
            return Err(WeightsError::InvalidData(format!(
                "{name}: expected {out_channels} biases, got {}",
                bias.len()
            )));
        }
        Ok(Self {
            name,
            out_channels,
            in_channels,
            kernel,
            weights,
            bias,
        })
    }
}

/// All convolution parameters of a network, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightSet {
    layers: Vec<ConvWeights>,
}

impl WeightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a layer by name.
    pub fn insert(&mut self, layer: ConvWeights) {
        match self.layers.iter_mut().find(|l| l.name == layer.name) {
            Some(slot) => *slot = layer,
            None => self.layers.push(layer),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ConvWeights> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConvWeights> {
        self.layers.iter()
    }
}

/// Load a `.vggw` file.
pub fn load_weights(path: &Path) -> Result<WeightSet, WeightsError> {
    let file = File::open(path).map_err(|source| WeightsError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    read_weights(&mut BufReader::new(file))
}

/// Save a `.vggw` file.
pub fn save_weights(path: &Path, set: &WeightSet) -> Result<(), WeightsError> {
    let file = File::create(path).map_err(|source| WeightsError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    write_weights(&mut writer, set)?;
    writer.flush()?;
    Ok(())
}

pub fn read_weights<R: Read>(reader: &mut R) -> Result<WeightSet, WeightsError> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(WeightsError::InvalidMagic);
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(WeightsError::UnsupportedVersion(version));
    }

    let count = reader.read_u32::<LittleEndian>()?;
    let mut set = WeightSet::new();
    for _ in 0..count {
        let name_len = reader.read_u32::<LittleEndian>()?;
        if name_len == 0 || name_len > MAX_NAME_LEN {
            return Err(WeightsError::InvalidData(format!("bad tensor name length {name_len}")));
        }
        let mut name_buf = vec![0u8; name_len as usize];
        reader.read_exact(&mut name_buf)?;
        let name = String::from_utf8(name_buf)
            .map_err(|_| WeightsError::InvalidData("tensor name is not UTF-8".to_string()))?;

        let out_channels = reader.read_u32::<LittleEndian>()? as usize;
        let in_channels = reader.read_u32::<LittleEndian>()? as usize;
        let kernel = reader.read_u32::<LittleEndian>()? as usize;

        let len = out_channels
            .checked_mul(in_channels)
            .and_then(|v| v.checked_mul(kernel * kernel))
            .filter(|&v| v <= MAX_TENSOR_LEN)
            .ok_or_else(|| {
                WeightsError::InvalidData(format!(
                    "{name}: implausible shape {out_channels}x{in_channels}x{kernel}x{kernel}"
                ))
            })?;
        let mut weights = vec![0.0f32; len];
        reader.read_f32_into::<LittleEndian>(&mut weights)?;
        let mut bias = vec![0.0f32; out_channels];
        reader.read_f32_into::<LittleEndian>(&mut bias)?;

        if set.get(&name).is_some() {
            return Err(WeightsError::InvalidData(format!("duplicate tensor '{name}'")));
        }
        set.insert(ConvWeights::new(name, out_channels, in_channels, kernel, weights, bias)?);
    }
    Ok(set)
}

pub fn write_weights<W: Write>(writer: &mut W, set: &WeightSet) -> Result<(), WeightsError> {
    writer.write_all(MAGIC)?;
    writer.write_u32::<LittleEndian>(VERSION)?;
    writer.write_u32::<LittleEndian>(set.len() as u32)?;
    for layer in set.iter() {
        writer.write_u32::<LittleEndian>(layer.name.len() as u32)?;
        writer.write_all(layer.name.as_bytes())?;
        writer.write_u32::<LittleEndian>(layer.out_channels as u32)?;
        writer.write_u32::<LittleEndian>(layer.in_channels as u32)?;
        writer.write_u32::<LittleEndian>(layer.kernel as u32)?;
        for &w in &layer.weights {
            writer.write_f32::<LittleEndian>(w)?;
        }
        for &b in &layer.bias {
            writer.write_f32::<LittleEndian>(b)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tiny_set() -> WeightSet {
        let mut set = WeightSet::new();
        let w: Vec<f32> = (0..2 * 3 * 9).map(|i| i as f32 * 0.5).collect();
        set.insert(ConvWeights::new("conv1_1", 2, 3, 3, w, vec![0.1, -0.1]).unwrap());
        set.insert(ConvWeights::new("conv1_2", 1, 2, 3, vec![1.0; 18], vec![0.0]).unwrap());
        set
    }

    #[test]
    fn test_save_load_roundtrip() {
        use tempfile::NamedTempFile;

        let set = tiny_set();
        let temp_file = NamedTempFile::new().unwrap();
        save_weights(temp_file.path(), &set).unwrap();

        let loaded = load_weights(temp_file.path()).unwrap();
        assert_eq!(loaded, set);
        assert_eq!(loaded.get("conv1_1").unwrap().bias, vec![0.1, -0.1]);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = Vec::new();
        write_weights(&mut bytes, &tiny_set()).unwrap();
        bytes[0] = b'X';
        let err = read_weights(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, WeightsError::InvalidMagic));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut bytes = Vec::new();
        write_weights(&mut bytes, &tiny_set()).unwrap();
        bytes[8..12].copy_from_slice(&7u32.to_le_bytes());
        let err = read_weights(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, WeightsError::UnsupportedVersion(7)));
    }

    #[test]
    fn test_truncated_file_is_io_error() {
        let mut bytes = Vec::new();
        write_weights(&mut bytes, &tiny_set()).unwrap();
        bytes.truncate(bytes.len() - 3);
        let err = read_weights(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, WeightsError::Io(_)));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = load_weights(Path::new("/nonexistent/vgg_conv.vggw")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/vgg_conv.vggw"));
    }

    #[test]
    fn test_conv_weights_validates_sizes() {
        assert!(ConvWeights::new("c", 2, 1, 3, vec![0.0; 17], vec![0.0; 2]).is_err());
        assert!(ConvWeights::new("c", 2, 1, 3, vec![0.0; 18], vec![0.0; 1]).is_err());
    }
}
