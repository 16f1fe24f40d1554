#![forbid(unsafe_code)]

use ti_core::{ArrayView, Element, LayoutError, SubView};

/// Annotation line for an array of the given shape, e.g. `<i32 Tensor 2x3>`.
#[must_use]
pub fn array_info<T: Element>(shape: &[usize]) -> String {
    let mut out = String::from("<");
    out.push_str(T::ELEMENT_TYPE.name());
    out.push_str(" Tensor ");
    for (dim, size) in shape.iter().copied().enumerate() {
        if dim > 0 {
            out.push('x');
        }
        out.push_str(&size.to_string());
    }
    out.push('>');
    out
}

// Cumulative sizes of the trailing dimensions, innermost first. An index
// divisible by k of these sits on k closing dimension boundaries.
fn suffix_multiples(shape: &[usize]) -> Vec<usize> {
    let mut multiples = Vec::with_capacity(shape.len());
    let mut multiple = 1usize;
    for size in shape.iter().copied().rev() {
        multiple = multiple.saturating_mul(size);
        multiples.push(multiple);
    }
    multiples
}

fn render_nested<T: Element>(data: &[T], shape: &[usize]) -> String {
    let rank = shape.len();
    let multiples = suffix_multiples(shape);

    let mut out = "[".repeat(rank);
    out.push_str(&data[0].to_string());
    for (index, value) in data.iter().enumerate().skip(1) {
        let boundaries = multiples
            .iter()
            .filter(|&&multiple| index % multiple == 0)
            .count();
        if boundaries > 0 {
            out.push_str(&"]".repeat(boundaries));
            out.push_str(", ");
            out.push_str(&"[".repeat(boundaries));
        } else {
            out.push_str(", ");
        }
        out.push_str(&value.to_string());
    }
    out.push_str(&"]".repeat(rank));
    out.push('\n');
    out.push_str(&array_info::<T>(shape));
    out.push('\n');
    out
}

/// Renders the whole array as nested bracketed text followed by the
/// annotation line.
#[must_use]
pub fn format_array<T: Element>(view: &ArrayView<'_, T>) -> String {
    render_nested(view.data(), view.shape())
}

/// Renders the sub-view named by a resolved coordinate prefix. An empty
/// residual shape renders as a single scalar line with a bare type
/// annotation.
pub fn format_sub_view<T: Element>(
    view: &ArrayView<'_, T>,
    sub: &SubView,
) -> Result<String, LayoutError> {
    let volume = sub.volume();
    let data = view
        .data()
        .get(sub.offset..sub.offset + volume)
        .ok_or(LayoutError::SpanOutOfBounds {
            offset: sub.offset,
            len: volume,
            size: view.size(),
        })?;

    if sub.residual_shape.is_empty() {
        return Ok(format!("{}\n<{}>\n", data[0], T::ELEMENT_TYPE.name()));
    }
    Ok(render_nested(data, &sub.residual_shape))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use ti_core::{ArrayView, SubView, locate_prefix};

    use super::{array_info, format_array, format_sub_view};

    #[test]
    fn rank_two_array_renders_nested_brackets() {
        let data = [1i32, 2, 3, 4, 5, 6];
        let view = ArrayView::new(&data, &[2, 3]).expect("valid view");
        assert_eq!(
            format_array(&view),
            "[[1, 2, 3], [4, 5, 6]]\n<i32 Tensor 2x3>\n"
        );
    }

    #[test]
    fn rank_one_array_renders_flat() {
        let data = [1.5f32, -2.0];
        let view = ArrayView::new(&data, &[2]).expect("valid view");
        assert_eq!(format_array(&view), "[1.5, -2]\n<f32 Tensor 2>\n");
    }

    #[test]
    fn rank_three_boundaries_close_and_reopen() {
        let data: Vec<u8> = (0..8).collect();
        let view = ArrayView::new(&data, &[2, 2, 2]).expect("valid view");
        assert_eq!(
            format_array(&view),
            "[[[0, 1], [2, 3]], [[4, 5], [6, 7]]]\n<u8 Tensor 2x2x2>\n"
        );
    }

    #[test]
    fn prefix_sub_view_renders_residual_row() {
        let data = [1i32, 2, 3, 4, 5, 6];
        let view = ArrayView::new(&data, &[2, 3]).expect("valid view");
        let sub = locate_prefix(view.shape(), &[1]).expect("valid prefix");
        assert_eq!(
            format_sub_view(&view, &sub).expect("in-bounds sub-view"),
            "[4, 5, 6]\n<i32 Tensor 3>\n"
        );
    }

    #[test]
    fn full_coordinate_renders_scalar() {
        let data = [1i32, 2, 3, 4, 5, 6];
        let view = ArrayView::new(&data, &[2, 3]).expect("valid view");
        let sub = locate_prefix(view.shape(), &[1, 2]).expect("valid coordinate");
        assert_eq!(
            format_sub_view(&view, &sub).expect("in-bounds scalar"),
            "6\n<i32>\n"
        );
    }

    #[test]
    fn out_of_bounds_sub_view_is_rejected() {
        let data = [1i32, 2, 3, 4];
        let view = ArrayView::new(&data, &[4]).expect("valid view");
        let sub = SubView {
            residual_shape: vec![4],
            offset: 2,
        };
        assert!(format_sub_view(&view, &sub).is_err());
    }

    #[test]
    fn info_line_spells_dtype_and_shape() {
        assert_eq!(array_info::<f64>(&[7]), "<f64 Tensor 7>");
        assert_eq!(array_info::<u32>(&[2, 3, 4]), "<u32 Tensor 2x3x4>");
    }

    proptest! {
        #[test]
        fn prop_bracket_counts_match_rank(shape in prop::collection::vec(1usize..=4, 1..=4)) {
            let size: usize = shape.iter().copied().product();
            let data: Vec<i32> = (0..size as i32).collect();
            let view = ArrayView::new(data.as_slice(), shape.as_slice())
                .expect("generated view is valid");
            let rendered = format_array(&view);
            let body = rendered
                .split('\n')
                .next()
                .expect("rendered output has a body line");

            prop_assert!(body.starts_with(&"[".repeat(shape.len())));
            prop_assert!(!body.starts_with(&"[".repeat(shape.len() + 1)));
            prop_assert!(body.ends_with(&"]".repeat(shape.len())));
            prop_assert_eq!(
                body.matches('[').count(),
                body.matches(']').count()
            );
        }

        #[test]
        fn prop_every_element_appears_in_flat_order(shape in prop::collection::vec(1usize..=4, 1..=3)) {
            let size: usize = shape.iter().copied().product();
            // Distinct values so positions are unambiguous.
            let data: Vec<i32> = (10..10 + size as i32).collect();
            let view = ArrayView::new(data.as_slice(), shape.as_slice())
                .expect("generated view is valid");
            let rendered = format_array(&view);
            let body = rendered
                .split('\n')
                .next()
                .expect("rendered output has a body line");

            let mut cursor = 0usize;
            for value in &data {
                let needle = value.to_string();
                let found = body[cursor..]
                    .find(&needle)
                    .expect("value must appear after the previous one");
                cursor += found + needle.len();
            }
        }
    }
}
