//! Binary elementwise operator family.
//!
//! Covers: Add, Sub, Mul, Div

use kestrel_core::{BroadcastInfo, NodeCtx, Operator, Result, TensorData, TensorValue};

use crate::helpers::dims_i64;

/// Binary elementwise operator family.
///
/// All members share NumPy-style broadcasting through [`BroadcastInfo`]; the
/// operands are read through the broadcast index tables so neither input is
/// ever expanded. The only differences between members are the fold functions.
///
/// Integer fold functions return `None` on overflow or division by zero; such
/// nodes are reported as not foldable instead of producing a wrong constant.
pub struct BinaryElementwiseOp {
    name: &'static str,
    fold_fn_f32: fn(f32, f32) -> f32,
    fold_fn_i64: fn(i64, i64) -> Option<i64>,
    fold_fn_i32: fn(i32, i32) -> Option<i32>,
}

impl BinaryElementwiseOp {
    /// Create an Add operator.
    pub fn add() -> Self {
        Self {
            name: "Add",
            fold_fn_f32: |a, b| a + b,
            fold_fn_i64: i64::checked_add,
            fold_fn_i32: i32::checked_add,
        }
    }

    /// Create a Sub operator.
    pub fn sub() -> Self {
        Self {
            name: "Sub",
            fold_fn_f32: |a, b| a - b,
            fold_fn_i64: i64::checked_sub,
            fold_fn_i32: i32::checked_sub,
        }
    }

    /// Create a Mul operator.
    pub fn mul() -> Self {
        Self {
            name: "Mul",
            fold_fn_f32: |a, b| a * b,
            fold_fn_i64: i64::checked_mul,
            fold_fn_i32: i32::checked_mul,
        }
    }

    /// Create a Div operator.
    pub fn div() -> Self {
        Self {
            name: "Div",
            fold_fn_f32: |a, b| a / b,
            fold_fn_i64: i64::checked_div,
            fold_fn_i32: i32::checked_div,
        }
    }
}

/// Apply `f` across the broadcast output using precomputed source offsets.
fn apply_indexed<T: Copy>(
    a: &[T],
    b: &[T],
    index_a: &[i64],
    index_b: &[i64],
    f: impl Fn(T, T) -> Option<T>,
) -> Option<Vec<T>> {
    index_a
        .iter()
        .zip(index_b)
        .map(|(&ia, &ib)| f(a[ia as usize], b[ib as usize]))
        .collect()
}

impl Operator for BinaryElementwiseOp {
    fn name(&self) -> &str {
        self.name
    }

    fn compute(&self, ctx: &NodeCtx<'_>, inputs: &[TensorValue]) -> Result<Vec<TensorValue>> {
        let [lhs, rhs] = inputs else {
            return Err(ctx.invalid(format!("expected 2 inputs, got {}", inputs.len())));
        };

        let info = BroadcastInfo::generate(&dims_i64(&lhs.shape), &dims_i64(&rhs.shape))?;
        let (index_a, index_b) = info.compute_index_tables();
        let output_shape: Vec<usize> = info.output_shape().iter().map(|&d| d as usize).collect();

        let data = match (&lhs.data, &rhs.data) {
            (TensorData::F32(a), TensorData::F32(b)) => {
                let f = self.fold_fn_f32;
                apply_indexed(a, b, &index_a, &index_b, |x, y| Some(f(x, y))).map(TensorData::F32)
            }
            (TensorData::I64(a), TensorData::I64(b)) => {
                apply_indexed(a, b, &index_a, &index_b, self.fold_fn_i64).map(TensorData::I64)
            }
            (TensorData::I32(a), TensorData::I32(b)) => {
                apply_indexed(a, b, &index_a, &index_b, self.fold_fn_i32).map(TensorData::I32)
            }
            _ => {
                return Err(ctx.invalid(format!(
                    "unsupported operand types {:?} and {:?}",
                    lhs.dtype, rhs.dtype
                )));
            }
        };

        let data = data.ok_or_else(|| {
            ctx.invalid("integer overflow or division by zero while folding")
        })?;

        tracing::trace!(op = self.name, shape = ?output_shape, "folded binary elementwise");
        Ok(vec![TensorValue::from_data(data, output_shape)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::{DataType, Error, IrEdge, IrGraph, IrNode, IrNodeId, TensorShape};

    fn add_node(graph: &mut IrGraph, op_type: &str) -> IrNodeId {
        let a = graph.add_edge(IrEdge::new("a", DataType::I32, TensorShape::Static(vec![1])));
        let b = graph.add_edge(IrEdge::new("b", DataType::I32, TensorShape::Static(vec![1])));
        let c = graph.add_edge(IrEdge::new("c", DataType::I32, TensorShape::Static(vec![1])));
        let mut node = IrNode::new(op_type).with_name("node");
        node.add_input(a);
        node.add_input(b);
        node.add_output(c);
        graph.add_node(node)
    }

    fn value(data: TensorData, shape: &[usize]) -> TensorValue {
        TensorValue::from_data(data, shape.to_vec()).unwrap()
    }

    #[test]
    fn test_mul_broadcast_column() {
        let mut graph = IrGraph::new();
        let id = add_node(&mut graph, "Mul");
        let ctx = NodeCtx::new(&graph, id).unwrap();

        let a = value(TensorData::F32(vec![1.0, 2.0]), &[2, 1]);
        let b = value(TensorData::F32(vec![10.0, 20.0, 30.0]), &[3]);
        let out = BinaryElementwiseOp::mul().compute(&ctx, &[a, b]).unwrap();

        assert_eq!(out[0].shape, vec![2, 3]);
        assert_eq!(
            out[0].as_f32(),
            Some(&[10.0, 20.0, 30.0, 20.0, 40.0, 60.0][..])
        );
    }

    #[test]
    fn test_scalar_pair_yields_rank_one() {
        let mut graph = IrGraph::new();
        let id = add_node(&mut graph, "Sub");
        let ctx = NodeCtx::new(&graph, id).unwrap();

        let a = value(TensorData::I64(vec![9]), &[]);
        let b = value(TensorData::I64(vec![4]), &[]);
        let out = BinaryElementwiseOp::sub().compute(&ctx, &[a, b]).unwrap();
        assert_eq!(out[0].shape, vec![1]);
        assert_eq!(out[0].as_i64(), Some(&[5][..]));
    }

    #[test]
    fn test_incompatible_shapes_are_recoverable() {
        let mut graph = IrGraph::new();
        let id = add_node(&mut graph, "Add");
        let ctx = NodeCtx::new(&graph, id).unwrap();

        let a = value(TensorData::I32(vec![0; 12]), &[3, 4]);
        let b = value(TensorData::I32(vec![0; 15]), &[3, 5]);
        let err = BinaryElementwiseOp::add().compute(&ctx, &[a, b]).unwrap_err();
        assert!(matches!(err, Error::NotCompatible(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_integer_division_by_zero_not_folded() {
        let mut graph = IrGraph::new();
        let id = add_node(&mut graph, "Div");
        let ctx = NodeCtx::new(&graph, id).unwrap();

        let a = value(TensorData::I32(vec![4, 6]), &[2]);
        let b = value(TensorData::I32(vec![2, 0]), &[2]);
        let err = BinaryElementwiseOp::div().compute(&ctx, &[a, b]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(err.to_string().contains("node"));
    }

    #[test]
    fn test_mixed_dtypes_rejected() {
        let mut graph = IrGraph::new();
        let id = add_node(&mut graph, "Add");
        let ctx = NodeCtx::new(&graph, id).unwrap();

        let a = value(TensorData::I32(vec![1]), &[1]);
        let b = value(TensorData::F32(vec![1.0]), &[1]);
        assert!(BinaryElementwiseOp::add().compute(&ctx, &[a, b]).is_err());
    }
}
