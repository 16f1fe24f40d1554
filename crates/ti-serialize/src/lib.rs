#![forbid(unsafe_code)]

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use ti_core::{ArrayView, Element, ElementType, Family};

pub const NPY_MAGIC: [u8; 6] = [0x93, b'N', b'U', b'M', b'P', b'Y'];
pub const NPY_VERSION: [u8; 2] = [0x01, 0x00];

// Fixed-size prefix: magic + version + little-endian u16 header length.
const PREFIX_LEN: usize = NPY_MAGIC.len() + NPY_VERSION.len() + 2;
const HEADER_ALIGN: usize = 64;

#[derive(Debug)]
pub enum EncodeError {
    Io { path: PathBuf, source: std::io::Error },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to write dump file {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    BadMagic,
    UnsupportedVersion { major: u8, minor: u8 },
    Truncated { expected: usize, actual: usize },
    MalformedHeader { reason: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "not an npy file: bad magic"),
            Self::UnsupportedVersion { major, minor } => {
                write!(f, "unsupported npy version {major}.{minor}")
            }
            Self::Truncated { expected, actual } => {
                write!(f, "truncated npy data: expected {expected} bytes, got {actual}")
            }
            Self::MalformedHeader { reason } => write!(f, "malformed npy header: {reason}"),
        }
    }
}

impl std::error::Error for DecodeError {}

fn endian_char() -> char {
    if cfg!(target_endian = "little") { '<' } else { '>' }
}

const fn type_code(family: Family) -> char {
    match family {
        Family::Float => 'f',
        Family::Unsigned => 'u',
        Family::Signed => 'i',
    }
}

/// dtype descriptor for the host, e.g. `<f4` for f32 on a little-endian
/// machine.
#[must_use]
pub fn descr(dtype: ElementType) -> String {
    let mut out = String::with_capacity(4);
    out.push(endian_char());
    out.push(type_code(dtype.family()));
    out.push_str(&dtype.size_of().to_string());
    out
}

/// Builds the complete file header: magic, version, length word, and the
/// dictionary padded with spaces so the total header length is a multiple of
/// 64 and the final dictionary byte is a newline.
#[must_use]
pub fn npy_header(dtype: ElementType, shape: &[usize]) -> Vec<u8> {
    let mut dict = String::from("{'descr': '");
    dict.push_str(&descr(dtype));
    dict.push_str("', 'fortran_order': False, 'shape': (");
    for (dim, size) in shape.iter().copied().enumerate() {
        if dim > 0 {
            dict.push_str(", ");
        }
        dict.push_str(&size.to_string());
    }
    if shape.len() == 1 {
        dict.push(',');
    }
    dict.push_str("), } ");

    let padding = HEADER_ALIGN - ((PREFIX_LEN + dict.len()) % HEADER_ALIGN);
    dict.push_str(&" ".repeat(padding));
    dict.pop();
    dict.push('\n');

    let mut header = Vec::with_capacity(PREFIX_LEN + dict.len());
    header.extend_from_slice(&NPY_MAGIC);
    header.extend_from_slice(&NPY_VERSION);
    header.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    header.extend_from_slice(dict.as_bytes());
    header
}

/// Serializes the view into a self-describing npy byte stream: the header
/// followed by the raw element bytes in row-major order.
#[must_use]
pub fn encode_npy<T: Element>(view: &ArrayView<'_, T>) -> Vec<u8> {
    let mut out = npy_header(T::ELEMENT_TYPE, view.shape());
    out.reserve(view.size() * T::ELEMENT_TYPE.size_of());
    for value in view.data().iter().copied() {
        value.extend_ne_bytes(&mut out);
    }
    out
}

/// Dump file name for one visit of a tag: `{tag}_{visit}.npy`.
#[must_use]
pub fn dump_file_name(tag: &str, visit: u64) -> String {
    format!("{tag}_{visit}.npy")
}

/// Encodes the view and writes it under `dir`, returning the written path.
pub fn write_npy_file<T: Element>(
    dir: &Path,
    tag: &str,
    visit: u64,
    view: &ArrayView<'_, T>,
) -> Result<PathBuf, EncodeError> {
    let path = dir.join(dump_file_name(tag, visit));
    let bytes = encode_npy(view);
    fs::write(&path, &bytes).map_err(|source| EncodeError::Io {
        path: path.clone(),
        source,
    })?;
    debug!(
        path = %path.display(),
        bytes = bytes.len(),
        dtype = T::ELEMENT_TYPE.name(),
        "wrote npy dump"
    );
    Ok(path)
}

/// Parsed form of the header dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    pub descr: String,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
}

/// Parses an npy byte stream produced by [`encode_npy`] (or external
/// tooling), returning the header and the raw payload that follows it.
pub fn parse_npy(bytes: &[u8]) -> Result<(NpyHeader, &[u8]), DecodeError> {
    if bytes.len() < PREFIX_LEN {
        return Err(DecodeError::Truncated {
            expected: PREFIX_LEN,
            actual: bytes.len(),
        });
    }
    if bytes[..NPY_MAGIC.len()] != NPY_MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let major = bytes[6];
    let minor = bytes[7];
    if [major, minor] != NPY_VERSION {
        return Err(DecodeError::UnsupportedVersion { major, minor });
    }

    let dict_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let header_end = PREFIX_LEN + dict_len;
    if bytes.len() < header_end {
        return Err(DecodeError::Truncated {
            expected: header_end,
            actual: bytes.len(),
        });
    }

    let dict = std::str::from_utf8(&bytes[PREFIX_LEN..header_end]).map_err(|_| {
        DecodeError::MalformedHeader {
            reason: "dictionary is not valid ASCII".to_string(),
        }
    })?;

    let header = NpyHeader {
        descr: quoted_value(dict, "'descr':")?,
        fortran_order: keyword_value(dict, "'fortran_order':")?,
        shape: shape_value(dict)?,
    };
    Ok((header, &bytes[header_end..]))
}

fn field_tail<'a>(dict: &'a str, key: &str) -> Result<&'a str, DecodeError> {
    let start = dict.find(key).ok_or_else(|| DecodeError::MalformedHeader {
        reason: format!("missing {key} field"),
    })?;
    Ok(dict[start + key.len()..].trim_start())
}

fn quoted_value(dict: &str, key: &str) -> Result<String, DecodeError> {
    let tail = field_tail(dict, key)?;
    let tail = tail
        .strip_prefix('\'')
        .ok_or_else(|| DecodeError::MalformedHeader {
            reason: format!("{key} value is not quoted"),
        })?;
    let end = tail.find('\'').ok_or_else(|| DecodeError::MalformedHeader {
        reason: format!("{key} value is unterminated"),
    })?;
    Ok(tail[..end].to_string())
}

fn keyword_value(dict: &str, key: &str) -> Result<bool, DecodeError> {
    let tail = field_tail(dict, key)?;
    if tail.starts_with("False") {
        Ok(false)
    } else if tail.starts_with("True") {
        Ok(true)
    } else {
        Err(DecodeError::MalformedHeader {
            reason: format!("{key} value is neither True nor False"),
        })
    }
}

fn shape_value(dict: &str) -> Result<Vec<usize>, DecodeError> {
    let tail = field_tail(dict, "'shape':")?;
    let tail = tail
        .strip_prefix('(')
        .ok_or_else(|| DecodeError::MalformedHeader {
            reason: "'shape': value is not a tuple".to_string(),
        })?;
    let end = tail.find(')').ok_or_else(|| DecodeError::MalformedHeader {
        reason: "'shape': tuple is unterminated".to_string(),
    })?;

    let mut shape = Vec::new();
    for token in tail[..end].split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let size = token.parse().map_err(|_| DecodeError::MalformedHeader {
            reason: format!("'shape': component '{token}' is not an integer"),
        })?;
        shape.push(size);
    }
    Ok(shape)
}
