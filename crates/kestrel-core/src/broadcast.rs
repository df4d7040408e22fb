//! Broadcast shape engine for element-wise operators.
//!
//! Implements NumPy-style broadcasting rules:
//! - Shapes are aligned from the rightmost dimension
//! - Dimensions match if they are equal or one of them is 1
//! - Missing dimensions in shorter shapes are treated as 1
//!
//! Besides the output shape, [`BroadcastInfo`] keeps the per-operand reshape and
//! multiplier vectors, the gradient reduction axes and can produce flat index
//! tables that replicate operand buffers without materializing expanded tensors.

use crate::{Error, Result};

/// Result of broadcasting two operand shapes.
///
/// All vectors are stored outermost-first. Reduction indices are expressed as
/// the distance from the last dimension (0 = innermost axis), independent of
/// the total rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastInfo {
    x_reshape: Vec<i64>,
    y_reshape: Vec<i64>,
    x_bcast: Vec<i64>,
    y_bcast: Vec<i64>,
    output_shape: Vec<i64>,
    grad_x_reduce_idx: Vec<i64>,
    grad_y_reduce_idx: Vec<i64>,
}

impl BroadcastInfo {
    /// Compute broadcast information for operand shapes `x` and `y`.
    ///
    /// Two empty shapes (scalar with scalar) broadcast to the 1-D shape `[1]`
    /// rather than to a 0-D shape; callers building output tensors must do the same.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidArgument` if any dimension is negative.
    /// - `Error::NotCompatible` if an aligned dimension pair is unequal and neither is 1.
    ///
    /// # Example
    ///
    /// ```
    /// use kestrel_core::BroadcastInfo;
    ///
    /// let info = BroadcastInfo::generate(&[8, 1, 6, 1], &[7, 1, 5]).unwrap();
    /// assert_eq!(info.output_shape(), &[8, 7, 6, 5]);
    /// ```
    pub fn generate(x: &[i64], y: &[i64]) -> Result<Self> {
        if x.is_empty() && y.is_empty() {
            return Ok(Self {
                x_reshape: vec![1],
                y_reshape: vec![1],
                x_bcast: vec![1],
                y_bcast: vec![1],
                output_shape: vec![1],
                grad_x_reduce_idx: Vec::new(),
                grad_y_reduce_idx: Vec::new(),
            });
        }

        let rank = x.len().max(y.len());
        let mut x_rev: Vec<i64> = x.iter().rev().copied().collect();
        let mut y_rev: Vec<i64> = y.iter().rev().copied().collect();
        x_rev.resize(rank, 1);
        y_rev.resize(rank, 1);

        let mut output = Vec::with_capacity(rank);
        let mut x_bcast = Vec::with_capacity(rank);
        let mut y_bcast = Vec::with_capacity(rank);
        let mut grad_x = Vec::new();
        let mut grad_y = Vec::new();

        // Index 0 is the innermost dimension while scanning.
        for (i, (&dx, &dy)) in x_rev.iter().zip(&y_rev).enumerate() {
            if dx < 0 || dy < 0 {
                return Err(Error::InvalidArgument(format!(
                    "Cannot broadcast shapes {x:?} and {y:?}: negative dimension"
                )));
            }
            let axis = i as i64;
            if dx == dy {
                output.push(dx);
                x_bcast.push(1);
                y_bcast.push(1);
                if dx == 1 {
                    grad_x.push(axis);
                    grad_y.push(axis);
                }
            } else if dx == 1 {
                output.push(dy);
                x_bcast.push(dy);
                y_bcast.push(1);
                grad_x.push(axis);
            } else if dy == 1 {
                output.push(dx);
                x_bcast.push(1);
                y_bcast.push(dx);
                grad_y.push(axis);
            } else {
                return Err(Error::NotCompatible(format!(
                    "Cannot broadcast shapes {x:?} and {y:?} at dimension {}",
                    rank - 1 - i
                )));
            }
        }

        x_rev.reverse();
        y_rev.reverse();
        output.reverse();
        x_bcast.reverse();
        y_bcast.reverse();
        grad_x.reverse();
        grad_y.reverse();

        Ok(Self {
            x_reshape: x_rev,
            y_reshape: y_rev,
            x_bcast,
            y_bcast,
            output_shape: output,
            grad_x_reduce_idx: grad_x,
            grad_y_reduce_idx: grad_y,
        })
    }

    /// Broadcast output shape.
    pub fn output_shape(&self) -> &[i64] {
        &self.output_shape
    }

    /// Operand A's shape left-padded with 1s to the output rank.
    pub fn x_reshape(&self) -> &[i64] {
        &self.x_reshape
    }

    /// Operand B's shape left-padded with 1s to the output rank.
    pub fn y_reshape(&self) -> &[i64] {
        &self.y_reshape
    }

    /// Per-dimension replication factor applied to operand A.
    pub fn x_bcast(&self) -> &[i64] {
        &self.x_bcast
    }

    /// Per-dimension replication factor applied to operand B.
    pub fn y_bcast(&self) -> &[i64] {
        &self.y_bcast
    }

    /// Axes (distance from the last dimension) to sum over for operand A's gradient.
    pub fn grad_x_reduce_idx(&self) -> &[i64] {
        &self.grad_x_reduce_idx
    }

    /// Axes (distance from the last dimension) to sum over for operand B's gradient.
    pub fn grad_y_reduce_idx(&self) -> &[i64] {
        &self.grad_y_reduce_idx
    }

    /// Total number of elements in the broadcast output.
    pub fn output_element_count(&self) -> usize {
        self.output_shape.iter().map(|&d| d as usize).product()
    }

    /// Build flat source-offset tables for both operands.
    ///
    /// For the `i`-th element of the row-major output, `index_x[i]` and
    /// `index_y[i]` are element offsets into the un-broadcast operand buffers.
    /// Tables are grown one dimension at a time, innermost first, by replicating
    /// the block built so far with an operand-specific offset.
    ///
    /// Leaves `self` untouched; the scan works on reversed local copies.
    pub fn compute_index_tables(&self) -> (Vec<i64>, Vec<i64>) {
        if self.output_shape.is_empty() {
            return (vec![0], vec![0]);
        }

        let out_rev: Vec<i64> = self.output_shape.iter().rev().copied().collect();
        let x_rev: Vec<i64> = self.x_reshape.iter().rev().copied().collect();
        let y_rev: Vec<i64> = self.y_reshape.iter().rev().copied().collect();

        let total = self.output_element_count();
        let mut index_x = Vec::with_capacity(total);
        let mut index_y = Vec::with_capacity(total);

        let x_is_bcast = x_rev[0] == 1;
        let y_is_bcast = y_rev[0] == 1;
        for j in 0..out_rev[0] {
            index_x.push(if x_is_bcast { 0 } else { j });
            index_y.push(if y_is_bcast { 0 } else { j });
        }
        let mut x_bias = x_rev[0];
        let mut y_bias = y_rev[0];

        for i in 1..out_rev.len() {
            let block = index_x.len();
            let x_is_bcast = x_rev[i] == 1;
            let y_is_bcast = y_rev[i] == 1;
            for j in 1..out_rev[i] {
                let x_step = if x_is_bcast { 0 } else { j * x_bias };
                let y_step = if y_is_bcast { 0 } else { j * y_bias };
                for k in 0..block {
                    index_x.push(index_x[k] + x_step);
                    index_y.push(index_y[k] + y_step);
                }
            }
            if out_rev[i] == 0 {
                index_x.clear();
                index_y.clear();
            }
            x_bias *= x_rev[i];
            y_bias *= y_rev[i];
        }

        (index_x, index_y)
    }
}

/// Compute NumPy-style broadcast output shape from two input shapes.
///
/// # Example
///
/// ```text
/// broadcast_shape(&[2, 3, 4], &[3, 4])    -> [2, 3, 4]
/// broadcast_shape(&[2, 3, 4], &[2, 1, 4]) -> [2, 3, 4]
/// broadcast_shape(&[8, 1, 6, 1], &[7, 1, 5]) -> [8, 7, 6, 5]
/// ```
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let a: Vec<i64> = a.iter().map(|&d| d as i64).collect();
    let b: Vec<i64> = b.iter().map(|&d| d as i64).collect();
    let info = BroadcastInfo::generate(&a, &b)?;
    Ok(info.output_shape().iter().map(|&d| d as usize).collect())
}
