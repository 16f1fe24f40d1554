#![forbid(unsafe_code)]

use std::fmt;

/// Numeric family of an element type. Predicate gating and dump type codes
/// branch on this at runtime rather than per-instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Signed,
    Unsigned,
    Float,
}

/// Closed set of element kinds an inspected buffer may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl ElementType {
    #[must_use]
    pub const fn family(self) -> Family {
        match self {
            Self::I8 | Self::I16 | Self::I32 | Self::I64 => Family::Signed,
            Self::U8 | Self::U16 | Self::U32 | Self::U64 => Family::Unsigned,
            Self::F32 | Self::F64 => Family::Float,
        }
    }

    /// Byte width of one element.
    #[must_use]
    pub const fn size_of(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// Name used in formatter annotations, e.g. `<i32 Tensor 2x3>`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Concrete element kinds the generic core is instantiated over. Implemented
/// exactly for the ten members of [`ElementType`]; the single dispatch point
/// in `ti-api` is the only place that branches on the tag.
pub trait Element: Copy + PartialEq + PartialOrd + fmt::Display {
    const ELEMENT_TYPE: ElementType;
    const ZERO: Self;

    /// Lossy widening used only for IEEE classification of float families;
    /// integer families never reach the classifying predicates.
    fn to_f64(self) -> f64;

    /// Appends the element's native-endian bytes, as laid out in the buffer.
    fn extend_ne_bytes(self, out: &mut Vec<u8>);
}

macro_rules! impl_element {
    ($($ty:ty => $tag:ident),* $(,)?) => {$(
        impl Element for $ty {
            const ELEMENT_TYPE: ElementType = ElementType::$tag;
            const ZERO: Self = 0 as $ty;

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn extend_ne_bytes(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }
        }
    )*};
}

impl_element! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

/// Where the viewed buffer lives. A `Device` view's slice is an opaque
/// handle; the facade obtains a host copy before any core operation reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageLocation {
    Host,
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewError {
    EmptyShape,
    ZeroDimension { dim: usize },
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for ViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyShape => write!(f, "array view requires rank >= 1"),
            Self::ZeroDimension { dim } => {
                write!(f, "array view dimension {dim} has size 0")
            }
            Self::LengthMismatch { expected, actual } => {
                write!(
                    f,
                    "buffer length mismatch: shape product={expected}, buffer={actual}"
                )
            }
        }
    }
}

impl std::error::Error for ViewError {}

/// Read-only, non-owning view over a contiguous row-major buffer.
///
/// Invariants checked at construction: rank >= 1, every dimension > 0, and
/// buffer length equals the shape product.
#[derive(Debug, Clone)]
pub struct ArrayView<'a, T> {
    shape: Vec<usize>,
    data: &'a [T],
    location: StorageLocation,
}

impl<'a, T: Element> ArrayView<'a, T> {
    pub fn new(data: &'a [T], shape: &[usize]) -> Result<Self, ViewError> {
        if shape.is_empty() {
            return Err(ViewError::EmptyShape);
        }
        for (dim, size) in shape.iter().copied().enumerate() {
            if size == 0 {
                return Err(ViewError::ZeroDimension { dim });
            }
        }
        let expected: usize = shape.iter().copied().product();
        if expected != data.len() {
            return Err(ViewError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
            location: StorageLocation::Host,
        })
    }

    #[must_use]
    pub fn with_location(mut self, location: StorageLocation) -> Self {
        self.location = location;
        self
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn data(&self) -> &'a [T] {
        self.data
    }

    #[must_use]
    pub fn location(&self) -> StorageLocation {
        self.location
    }

    #[must_use]
    pub fn dtype(&self) -> ElementType {
        T::ELEMENT_TYPE
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Residual view named by a coordinate prefix: the remaining dimensions and
/// the flat offset of the first addressed element. An empty residual shape
/// degenerates to a scalar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubView {
    pub residual_shape: Vec<usize>,
    pub offset: usize,
}

impl SubView {
    /// Element count of the addressed region.
    #[must_use]
    pub fn volume(&self) -> usize {
        self.residual_shape.iter().copied().product()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    Overflow,
    RankExceeded { rank: usize, len: usize },
    OutOfRange { dim: usize, index: usize, size: usize },
    SpanOutOfBounds { offset: usize, len: usize, size: usize },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow => write!(f, "offset arithmetic overflow"),
            Self::RankExceeded { rank, len } => {
                write!(f, "coordinate length {len} exceeds rank {rank}")
            }
            Self::OutOfRange { dim, index, size } => {
                write!(
                    f,
                    "coordinate out of range at dim={dim}: index={index}, size={size}"
                )
            }
            Self::SpanOutOfBounds { offset, len, size } => {
                write!(
                    f,
                    "sub-view span out of bounds: offset={offset}, len={len}, buffer={size}"
                )
            }
        }
    }
}

impl std::error::Error for LayoutError {}

/// Row-major strides: stride of dimension i is the product of the trailing
/// dimension sizes.
#[must_use]
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    if shape.is_empty() {
        return Vec::new();
    }

    let mut strides = vec![1; shape.len()];
    let mut running = 1usize;
    for idx in (0..shape.len()).rev() {
        strides[idx] = running;
        running = running.saturating_mul(shape[idx]);
    }
    strides
}

/// Resolves a coordinate prefix to the sub-view it names. A full-length
/// coordinate yields an empty residual shape and the flat element offset.
pub fn locate_prefix(shape: &[usize], coord: &[usize]) -> Result<SubView, LayoutError> {
    if coord.len() > shape.len() {
        return Err(LayoutError::RankExceeded {
            rank: shape.len(),
            len: coord.len(),
        });
    }
    for (dim, (index, size)) in coord.iter().copied().zip(shape.iter().copied()).enumerate() {
        if index >= size {
            return Err(LayoutError::OutOfRange { dim, index, size });
        }
    }

    let residual_shape = shape[coord.len()..].to_vec();
    let mut residual_volume = 1usize;
    for size in residual_shape.iter().copied() {
        residual_volume = residual_volume
            .checked_mul(size)
            .ok_or(LayoutError::Overflow)?;
    }

    let mut sum = 0usize;
    let mut multiplier = 1usize;
    for dim in (0..coord.len()).rev() {
        let step = coord[dim]
            .checked_mul(multiplier)
            .ok_or(LayoutError::Overflow)?;
        sum = sum.checked_add(step).ok_or(LayoutError::Overflow)?;
        multiplier = multiplier
            .checked_mul(shape[dim])
            .ok_or(LayoutError::Overflow)?;
    }

    let offset = sum
        .checked_mul(residual_volume)
        .ok_or(LayoutError::Overflow)?;
    Ok(SubView {
        residual_shape,
        offset,
    })
}

/// Recovers the full coordinate of a flat buffer offset by successive
/// modulo/divide against the shape, innermost dimension first.
#[must_use]
pub fn offset_to_coordinate(shape: &[usize], flat: usize) -> Vec<usize> {
    let mut remaining = flat;
    let mut coord = Vec::with_capacity(shape.len());
    for size in shape.iter().copied().rev() {
        coord.push(remaining % size);
        remaining /= size;
    }
    coord.reverse();
    coord
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinateError {
    Empty,
    RankExceeded { rank: usize, len: usize },
    Unparsable { token: String },
    OutOfRange { dim: usize, index: usize, size: usize },
}

impl fmt::Display for CoordinateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty coordinate"),
            Self::RankExceeded { rank, len } => {
                write!(f, "coordinate length {len} exceeds rank {rank}")
            }
            Self::Unparsable { token } => {
                write!(f, "coordinate component '{token}' is not a non-negative integer")
            }
            Self::OutOfRange { dim, index, size } => {
                write!(
                    f,
                    "coordinate out of range at dim={dim}: index={index}, size={size}"
                )
            }
        }
    }
}

impl std::error::Error for CoordinateError {}

/// Parses a comma-separated coordinate (or coordinate prefix) against a
/// shape. Surrounding whitespace per component is tolerated; negative,
/// non-numeric, out-of-range, or over-long input is rejected.
pub fn parse_coordinate_text(shape: &[usize], text: &str) -> Result<Vec<usize>, CoordinateError> {
    if text.trim().is_empty() {
        return Err(CoordinateError::Empty);
    }

    let mut coord = Vec::new();
    for token in text.split(',') {
        let token = token.trim();
        let index: usize = token.parse().map_err(|_| CoordinateError::Unparsable {
            token: token.to_string(),
        })?;
        coord.push(index);
    }

    if coord.len() > shape.len() {
        return Err(CoordinateError::RankExceeded {
            rank: shape.len(),
            len: coord.len(),
        });
    }
    for (dim, (index, size)) in coord.iter().copied().zip(shape.iter().copied()).enumerate() {
        if index >= size {
            return Err(CoordinateError::OutOfRange { dim, index, size });
        }
    }
    Ok(coord)
}
