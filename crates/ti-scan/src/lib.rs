#![forbid(unsafe_code)]

use std::sync::Once;

use tracing::warn;

use ti_core::{ArrayView, Element, Family, offset_to_coordinate};

/// Closed catalogue of numeric-property checkers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckerKind {
    Negative,
    Positive,
    Zero,
    NaN,
    Inf,
    PositiveInf,
    NegativeInf,
    Finite,
    Normal,
}

impl CheckerKind {
    /// Checkers defined only for floating element families. On integer
    /// families they evaluate to constant false.
    #[must_use]
    pub const fn float_only(self) -> bool {
        matches!(
            self,
            Self::Inf | Self::PositiveInf | Self::NegativeInf | Self::Finite | Self::Normal
        )
    }
}

static FLOAT_ONLY_WARNING: Once = Once::new();

/// Evaluates one checker against one raw element value.
///
/// IEEE classification applies to floating families only; for integer
/// families the classifying checkers are constant false, reported once per
/// process as a warning rather than silently.
pub fn evaluate<T: Element>(kind: CheckerKind, value: T) -> bool {
    match kind {
        CheckerKind::Negative => value < T::ZERO,
        CheckerKind::Positive => value > T::ZERO,
        CheckerKind::Zero => value == T::ZERO,
        CheckerKind::NaN => {
            T::ELEMENT_TYPE.family() == Family::Float && value.to_f64().is_nan()
        }
        CheckerKind::Inf
        | CheckerKind::PositiveInf
        | CheckerKind::NegativeInf
        | CheckerKind::Finite
        | CheckerKind::Normal => {
            if T::ELEMENT_TYPE.family() != Family::Float {
                FLOAT_ONLY_WARNING.call_once(|| {
                    warn!(
                        checker = ?kind,
                        dtype = T::ELEMENT_TYPE.name(),
                        "checker applies only to floating element types; evaluating to false"
                    );
                });
                return false;
            }
            let widened = value.to_f64();
            match kind {
                CheckerKind::Inf => widened.is_infinite(),
                CheckerKind::PositiveInf => widened == f64::INFINITY,
                CheckerKind::NegativeInf => widened == f64::NEG_INFINITY,
                CheckerKind::Finite => widened.is_finite(),
                CheckerKind::Normal => widened.is_finite() && !widened.is_nan(),
                _ => false,
            }
        }
    }
}

/// Ordered matches of one scan pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub kind: CheckerKind,
    pub coordinates: Vec<Vec<usize>>,
    pub count: usize,
}

/// Single deterministic pass over the buffer in flat index order, collecting
/// the coordinate of every element the checker matches.
#[must_use]
pub fn scan<T: Element>(view: &ArrayView<'_, T>, kind: CheckerKind) -> ScanReport {
    let shape = view.shape();
    let mut coordinates = Vec::new();
    for (flat, value) in view.data().iter().copied().enumerate() {
        if evaluate(kind, value) {
            coordinates.push(offset_to_coordinate(shape, flat));
        }
    }
    let count = coordinates.len();
    ScanReport {
        kind,
        coordinates,
        count,
    }
}

/// Renders the match list as `[(c0, c1), (c0, c1), ...]`, the form the
/// value-check session prints on request.
#[must_use]
pub fn render_matches(report: &ScanReport) -> String {
    let mut out = String::from("[");
    for (nth, coord) in report.coordinates.iter().enumerate() {
        if nth > 0 {
            out.push_str(", ");
        }
        out.push('(');
        for (dim, component) in coord.iter().enumerate() {
            if dim > 0 {
                out.push_str(", ");
            }
            out.push_str(&component.to_string());
        }
        out.push(')');
    }
    out.push(']');
    out
}
