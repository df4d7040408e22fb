//! Helper functions shared by operator implementations.

use kestrel_core::{NodeCtx, Result, TensorValue};

/// Convert shape dimensions to the `i64` form the broadcast engine takes.
pub(crate) fn dims_i64(shape: &[usize]) -> Vec<i64> {
    shape.iter().map(|&d| d as i64).collect()
}

/// Normalize possibly negative axes against `rank`, rejecting out-of-range and duplicate axes.
pub(crate) fn normalize_axes(ctx: &NodeCtx<'_>, axes: &[i64], rank: usize) -> Result<Vec<usize>> {
    let mut normalized = Vec::with_capacity(axes.len());
    for &axis in axes {
        let resolved = if axis < 0 { axis + rank as i64 } else { axis };
        if resolved < 0 || resolved >= rank as i64 {
            return Err(ctx.invalid(format!("axis {axis} out of range for rank {rank}")));
        }
        let resolved = resolved as usize;
        if normalized.contains(&resolved) {
            return Err(ctx.invalid(format!("duplicate axis {axis}")));
        }
        normalized.push(resolved);
    }
    normalized.sort_unstable();
    Ok(normalized)
}

/// Read axes from the second input (newer opsets) or the `axes` attribute.
pub(crate) fn axes_from_input_or_attr(
    ctx: &NodeCtx<'_>,
    inputs: &[TensorValue],
) -> Result<Option<Vec<i64>>> {
    if let Some(axes) = inputs.get(1) {
        let values = axes
            .as_i64()
            .ok_or_else(|| ctx.invalid(format!("axes input must be I64, got {:?}", axes.dtype)))?;
        return Ok(Some(values.to_vec()));
    }
    if ctx.has_attr("axes") {
        return Ok(Some(ctx.attr_ints("axes")?.to_vec()));
    }
    Ok(None)
}
