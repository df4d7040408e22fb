//! Folding tests for the binary elementwise family.

mod common;

use common::*;
use kestrel_core::{NodeCtx, TensorData};
use kestrel_ops::BinaryElementwiseOp;

#[test]
fn test_add_broadcast_i32_end_to_end() {
    init_tracing();

    let lhs = vec![1, 2, 3];
    let rhs = vec![10, 20, 30, 40, 50, 60];
    let (mut graph, _, out) = make_constant_binary_graph(
        "Add",
        (TensorData::I32(lhs.clone()), &[1, 3]),
        (TensorData::I32(rhs.clone()), &[2, 3]),
    );

    let changed = ConstantFoldingPass::new()
        .run(&mut graph, &core_operator_registry())
        .unwrap();
    assert!(changed);

    let value = graph.edge(out).unwrap().constant_value().unwrap();
    assert_eq!(value.shape, vec![2, 3]);
    let data = value.as_i32().unwrap();
    assert_eq!(data.len(), 6);
    // [1][2] = A[0][2] + B[1][2]
    assert_eq!(data[3 + 2], lhs[2] + rhs[3 + 2]);
    assert_eq!(data, &[11, 22, 33, 41, 52, 63]);
}

#[test]
fn test_sub_both_operands_broadcast() {
    let (graph, id, _) = make_constant_binary_graph(
        "Sub",
        (TensorData::F32(vec![10.0, 20.0]), &[2, 1]),
        (TensorData::F32(vec![1.0, 2.0, 3.0]), &[1, 3]),
    );
    let ctx = NodeCtx::new(&graph, id).unwrap();
    let inputs = vec![
        ctx.input_value(0).unwrap().unwrap(),
        ctx.input_value(1).unwrap().unwrap(),
    ];

    let out = BinaryElementwiseOp::sub().compute(&ctx, &inputs).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].shape, vec![2, 3]);
    assert_eq!(
        out[0].as_f32().unwrap(),
        &[9.0, 8.0, 7.0, 19.0, 18.0, 17.0]
    );
}

#[test]
fn test_incompatible_add_stays_in_graph() {
    init_tracing();

    let (mut graph, id, out) = make_constant_binary_graph(
        "Add",
        (TensorData::I64(vec![0; 12]), &[3, 4]),
        (TensorData::I64(vec![0; 15]), &[3, 5]),
    );

    let changed = ConstantFoldingPass::new()
        .run(&mut graph, &core_operator_registry())
        .unwrap();
    assert!(!changed);
    assert!(graph.node(id).is_ok());
    assert!(graph.edge(out).unwrap().constant_value().is_none());
}
