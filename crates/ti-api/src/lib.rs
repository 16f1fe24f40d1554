#![forbid(unsafe_code)]

//! Entry point for array inspection.
//!
//! Callers hand over an [`AnyView`] — a closed tagged union over the
//! supported element kinds. The element type is resolved exactly once, here;
//! everything below this boundary (address mapping, formatting, scanning,
//! encoding, the session loops) is generic over [`ti_core::Element`].
//!
//! Views whose storage is not host-addressable are materialized through the
//! [`HostMaterializer`] capability before any core operation touches them;
//! the host copy is owned by the call and dropped at exit.

use std::fmt;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

/// Type-erased array view: one variant per supported element kind.
#[derive(Debug, Clone)]
pub enum AnyView<'a> {
    I8(ArrayView<'a, i8>),
    I16(ArrayView<'a, i16>),
    I32(ArrayView<'a, i32>),
    I64(ArrayView<'a, i64>),
    U8(ArrayView<'a, u8>),
    U16(ArrayView<'a, u16>),
    U32(ArrayView<'a, u32>),
    U64(ArrayView<'a, u64>),
    F32(ArrayView<'a, f32>),
    F64(ArrayView<'a, f64>),
}

/// Owned host-resident array, the product of materializing a device view.
#[derive(Debug, Clone)]
pub enum AnyArray {
    I8(Vec<i8>, Vec<usize>),
    I16(Vec<i16>, Vec<usize>),
    I32(Vec<i32>, Vec<usize>),
    I64(Vec<i64>, Vec<usize>),
    U8(Vec<u8>, Vec<usize>),
    U16(Vec<u16>, Vec<usize>),
    U32(Vec<u32>, Vec<usize>),
    U64(Vec<u64>, Vec<usize>),
    F32(Vec<f32>, Vec<usize>),
    F64(Vec<f64>, Vec<usize>),
}

// The single dispatch point: every operation funnels through one of these
// two matches.
macro_rules! with_view {
    ($any:expr, $view:ident => $body:expr) => {
        match $any {
            AnyView::I8($view) => $body,
            AnyView::I16($view) => $body,
            AnyView::I32($view) => $body,
            AnyView::I64($view) => $body,
            AnyView::U8($view) => $body,
            AnyView::U16($view) => $body,
            AnyView::U32($view) => $body,
            AnyView::U64($view) => $body,
            AnyView::F32($view) => $body,
            AnyView::F64($view) => $body,
        }
    };
}

macro_rules! impl_any_variants {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl<'a> From<ArrayView<'a, $ty>> for AnyView<'a> {
                fn from(view: ArrayView<'a, $ty>) -> Self {
                    Self::$variant(view)
                }
            }
        )*

        impl AnyArray {
            /// Borrows the owned buffer as a host view. Fails only if the
            /// materializer produced a buffer/shape pair that violates the
            /// view invariants.
            pub fn as_view(&self) -> Result<AnyView<'_>, ViewError> {
                match self {
                    $(
                        Self::$variant(data, shape) => {
                            Ok(AnyView::$variant(ArrayView::new(data, shape)?))
                        }
                    )*
                }
            }
        }
    };
}

impl_any_variants! {
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

impl AnyView<'_> {
    #[must_use]
    pub fn dtype(&self) -> ElementType {
        with_view!(self, view => view.dtype())
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        with_view!(self, view => view.shape())
    }

    #[must_use]
    pub fn location(&self) -> StorageLocation {
        with_view!(self, view => view.location())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterializeError {
    NoDevicePath { dtype: ElementType },
    Failed { reason: String },
}

impl fmt::Display for MaterializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDevicePath { dtype } => {
                write!(
                    f,
                    "no host materializer configured for device-resident {dtype} view"
                )
            }
            Self::Failed { reason } => write!(f, "host materialization failed: {reason}"),
        }
    }
}

impl std::error::Error for MaterializeError {}

/// Capability to turn a device-resident view into an owned host-resident
/// copy with identical shape, type, and contents.
pub trait HostMaterializer {
    fn materialize(&self, view: &AnyView<'_>) -> Result<AnyArray, MaterializeError>;
}

/// Default materializer for embedders with no device story: always fails,
/// which makes inspecting a device view a fatal, propagated error.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceUnsupported;

impl HostMaterializer for DeviceUnsupported {
    fn materialize(&self, view: &AnyView<'_>) -> Result<AnyArray, MaterializeError> {
        Err(MaterializeError::NoDevicePath {
            dtype: view.dtype(),
        })
    }
}

#[derive(Debug)]
pub enum InspectError {
    Materialize(MaterializeError),
    View(ViewError),
    Session(SessionError),
    Encode(EncodeError),
    Io(std::io::Error),
}

impl fmt::Display for InspectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Materialize(error) => write!(f, "inspection failed: {error}"),
            Self::View(error) => write!(f, "inspection failed: {error}"),
            Self::Session(error) => write!(f, "inspection failed: {error}"),
            Self::Encode(error) => write!(f, "inspection failed: {error}"),
            Self::Io(error) => write!(f, "inspection failed: {error}"),
        }
    }
}

impl std::error::Error for InspectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Materialize(error) => Some(error),
            Self::View(error) => Some(error),
            Self::Session(error) => Some(error),
            Self::Encode(error) => Some(error),
            Self::Io(error) => Some(error),
        }
    }
}

impl From<MaterializeError> for InspectError {
    fn from(value: MaterializeError) -> Self {
        Self::Materialize(value)
    }
}

impl From<ViewError> for InspectError {
    fn from(value: ViewError) -> Self {
        Self::View(value)
    }
}

impl From<SessionError> for InspectError {
    fn from(value: SessionError) -> Self {
        Self::Session(value)
    }
}

impl From<EncodeError> for InspectError {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<std::io::Error> for InspectError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

// Host-resident form of the inspected view for the span of one call.
enum HostView<'a> {
    Borrowed(&'a AnyView<'a>),
    Owned(AnyArray),
}

impl HostView<'_> {
    fn view(&self) -> Result<AnyView<'_>, ViewError> {
        match self {
            Self::Borrowed(view) => Ok((*view).clone()),
            Self::Owned(array) => array.as_view(),
        }
    }
}

/// Inspection facade over one array view.
///
/// The non-interactive operations (`render`, `scan`, `encode`) are pure
/// functions of the view; the interactive and dump operations additionally
/// read and mutate the supplied [`SessionState`].
pub struct Inspector<'a> {
    view: AnyView<'a>,
    materializer: &'a dyn HostMaterializer,
}

static NO_DEVICE: DeviceUnsupported = DeviceUnsupported;

impl<'a> Inspector<'a> {
    #[must_use]
    pub fn new(view: AnyView<'a>) -> Self {
        Self {
            view,
            materializer: &NO_DEVICE,
        }
    }

    #[must_use]
    pub fn with_materializer(view: AnyView<'a>, materializer: &'a dyn HostMaterializer) -> Self {
        Self { view, materializer }
    }

    #[must_use]
    pub fn dtype(&self) -> ElementType {
        self.view.dtype()
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.view.shape()
    }

    fn resolve(&self) -> Result<HostView<'_>, InspectError> {
        match self.view.location() {
            StorageLocation::Host => Ok(HostView::Borrowed(&self.view)),
            StorageLocation::Device => {
                debug!(dtype = %self.view.dtype(), "materializing device view to host");
                let owned = self.materializer.materialize(&self.view)?;
                Ok(HostView::Owned(owned))
            }
        }
    }

    /// Nested-bracket rendering of the whole array.
    pub fn render(&self) -> Result<String, InspectError> {
        let host = self.resolve()?;
        let view = host.view()?;
        Ok(with_view!(&view, v => ti_format::format_array(v)))
    }

    /// Writes [`Inspector::render`] output to the given stream.
    pub fn print_string<W: Write>(&self, output: &mut W) -> Result<(), InspectError> {
        let rendered = self.render()?;
        output.write_all(rendered.as_bytes())?;
        Ok(())
    }

    /// Non-interactive scan: ordered matching coordinates and the count.
    pub fn check_value(&self, kind: CheckerKind) -> Result<ScanReport, InspectError> {
        let host = self.resolve()?;
        let view = host.view()?;
        Ok(with_view!(&view, v => ti_scan::scan(v, kind)))
    }

    /// Scan followed by the interactive value-check session over the result.
    pub fn check_value_interactive<R: BufRead, W: Write>(
        &self,
        kind: CheckerKind,
        session: &SessionState,
        input: &mut R,
        output: &mut W,
        tag: &str,
    ) -> Result<ScanReport, InspectError> {
        let host = self.resolve()?;
        let view = host.view()?;
        let report = with_view!(&view, v => ti_scan::scan(v, kind));
        ti_session::check_value_session(session, &report, input, output, tag)?;
        Ok(report)
    }

    /// Interactive print session over the view.
    pub fn interactive_print<R: BufRead, W: Write>(
        &self,
        session: &SessionState,
        input: &mut R,
        output: &mut W,
        dump_dir: &Path,
        tag: &str,
    ) -> Result<(), InspectError> {
        let host = self.resolve()?;
        let view = host.view()?;
        with_view!(&view, v => {
            ti_session::interactive_print(session, v, input, output, dump_dir, tag)
        })?;
        Ok(())
    }

    /// npy serialization of the view.
    pub fn encode(&self) -> Result<Vec<u8>, InspectError> {
        let host = self.resolve()?;
        let view = host.view()?;
        Ok(with_view!(&view, v => ti_serialize::encode_npy(v)))
    }

    /// Dumps the view to `{tag}_{visit}.npy` under `dir`, advancing the
    /// session's dump counter for the tag, and returns the written path.
    pub fn dump_value(
        &self,
        session: &SessionState,
        dir: &Path,
        tag: &str,
    ) -> Result<PathBuf, InspectError> {
        let host = self.resolve()?;
        let view = host.view()?;
        let visit = session.next_dump_visit(tag);
        let path = with_view!(&view, v => ti_serialize::write_npy_file(dir, tag, visit, v))?;
        Ok(path)
    }
}

pub use ti_core::{
    ArrayView, CoordinateError, Element, ElementType, Family, LayoutError, StorageLocation,
    SubView, ViewError,
};
pub use ti_scan::{CheckerKind, ScanReport, render_matches};
pub use ti_serialize::{DecodeError, EncodeError, NpyHeader, parse_npy};
pub use ti_session::{SessionError, SessionState};
