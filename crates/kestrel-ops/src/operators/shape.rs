//! Shape manipulation operators.
//!
//! All three keep the element data unchanged and only compute a new shape.

use kestrel_core::{NodeCtx, Operator, Result, TensorValue};

use crate::helpers::{axes_from_input_or_attr, normalize_axes};

/// Reshape operator - changes tensor shape without copying data.
///
/// A `0` in the target shape copies the input dimension (unless `allowzero`
/// is set) and a single `-1` is inferred from the element count.
pub struct ReshapeOp;

impl Operator for ReshapeOp {
    fn name(&self) -> &str {
        "Reshape"
    }

    fn compute(&self, ctx: &NodeCtx<'_>, inputs: &[TensorValue]) -> Result<Vec<TensorValue>> {
        let [data, target] = inputs else {
            return Err(ctx.invalid(format!("expected 2 inputs, got {}", inputs.len())));
        };
        let target = target
            .as_i64()
            .ok_or_else(|| ctx.invalid("shape input must be I64"))?;
        let allow_zero = ctx.attr_i64_or("allowzero", 0)? != 0;

        let mut dims = Vec::with_capacity(target.len());
        let mut inferred = None;
        for (i, &d) in target.iter().enumerate() {
            match d {
                -1 if inferred.is_none() => {
                    inferred = Some(i);
                    dims.push(1);
                }
                -1 => return Err(ctx.invalid("more than one -1 in target shape")),
                0 if !allow_zero => {
                    let copied = data.shape.get(i).copied().ok_or_else(|| {
                        ctx.invalid(format!("cannot copy dimension {i} from rank {}", data.ndim()))
                    })?;
                    dims.push(copied);
                }
                d if d < 0 => return Err(ctx.invalid(format!("invalid dimension {d}"))),
                d => dims.push(d as usize),
            }
        }

        if let Some(slot) = inferred {
            let known: usize = dims.iter().product();
            if known == 0 || data.len() % known != 0 {
                return Err(ctx.invalid(format!(
                    "cannot infer -1 for {} elements into {target:?}",
                    data.len()
                )));
            }
            dims[slot] = data.len() / known;
        }

        Ok(vec![data.reshape(dims).map_err(|e| ctx.invalid(e))?])
    }
}

/// Squeeze operator - removes dimensions of size 1.
pub struct SqueezeOp;

impl Operator for SqueezeOp {
    fn name(&self) -> &str {
        "Squeeze"
    }

    fn compute(&self, ctx: &NodeCtx<'_>, inputs: &[TensorValue]) -> Result<Vec<TensorValue>> {
        let data = inputs
            .first()
            .ok_or_else(|| ctx.invalid("missing data input"))?;
        let rank = data.ndim();

        let dims: Vec<usize> = match axes_from_input_or_attr(ctx, inputs)? {
            Some(axes) => {
                let axes = normalize_axes(ctx, &axes, rank)?;
                if let Some(&bad) = axes.iter().find(|&&a| data.shape[a] != 1) {
                    return Err(ctx.invalid(format!(
                        "cannot squeeze axis {bad} of size {}",
                        data.shape[bad]
                    )));
                }
                data.shape
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !axes.contains(i))
                    .map(|(_, &d)| d)
                    .collect()
            }
            None => data.shape.iter().copied().filter(|&d| d != 1).collect(),
        };

        Ok(vec![data.reshape(dims)?])
    }
}

/// Unsqueeze operator - inserts dimensions of size 1.
pub struct UnsqueezeOp;

impl Operator for UnsqueezeOp {
    fn name(&self) -> &str {
        "Unsqueeze"
    }

    fn compute(&self, ctx: &NodeCtx<'_>, inputs: &[TensorValue]) -> Result<Vec<TensorValue>> {
        let data = inputs
            .first()
            .ok_or_else(|| ctx.invalid("missing data input"))?;
        let axes = axes_from_input_or_attr(ctx, inputs)?
            .ok_or_else(|| ctx.invalid("missing axes"))?;

        let out_rank = data.ndim() + axes.len();
        let axes = normalize_axes(ctx, &axes, out_rank)?;

        let mut source = data.shape.iter();
        let dims: Vec<usize> = (0..out_rank)
            .map(|i| {
                if axes.contains(&i) {
                    1
                } else {
                    source.next().copied().unwrap_or(1)
                }
            })
            .collect();

        Ok(vec![data.reshape(dims)?])
    }
}
