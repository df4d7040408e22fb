//! Ordering between the holders of producer and consumer nodes.

mod common;

use common::{edge, ext_info, lower, reaches, static_shape};
use kestrel_core::{AttributeValue, DataType, IrGraph, IrNode, TensorShape};
use kestrel_lower::attrs::{self, lib_names};
use kestrel_lower::kernel_names as names;
use kestrel_lower::{AicpuTaskDef, CompileResult, CompileResults, LoweringOptions};

/// `x -> ops[0] -> t0 -> ops[1] -> t1 ...`, every edge shaped by `shapes`.
fn chain(ops: &[(&str, &str)], shapes: &[TensorShape]) -> IrGraph {
    let mut graph = IrGraph::new();
    let mut prev = edge(&mut graph, "x", DataType::F32, shapes[0].clone());
    graph.inputs.push(prev);
    for (i, &(op_type, name)) in ops.iter().enumerate() {
        let next = edge(&mut graph, &format!("t{i}"), DataType::F32, shapes[i + 1].clone());
        let mut node = IrNode::new(op_type).with_name(name);
        if op_type == "Abs" {
            node.set_attribute(
                attrs::KERNEL_LIB_NAME,
                AttributeValue::String(lib_names::AICPU_TF.to_string()),
            );
        }
        node.add_input(prev);
        node.add_output(next);
        graph.add_node(node);
        prev = next;
    }
    graph.outputs.push(prev);
    graph
}

fn abs_results(nodes: &[&str]) -> CompileResults {
    nodes.iter().fold(CompileResults::new(), |results, name| {
        results.with(
            *name,
            CompileResult::aicpu(AicpuTaskDef::tf("Abs").with_ext_info(ext_info(1, 1))),
        )
    })
}

#[test]
fn test_consumer_launch_runs_after_producer_launch() {
    let shape = static_shape(&[4]);
    let graph = chain(&[("Abs", "a"), ("Abs", "b")], &[shape.clone(), shape.clone(), shape]);
    let (ctx, lowered) = lower(&graph, LoweringOptions::default(), abs_results(&["a", "b"]));
    let lowered = lowered.unwrap();

    let launches = ctx.graph.holders_by_type(names::LAUNCH_TF_KERNEL);
    assert_eq!(launches.len(), 2);
    let (a, b) = (launches[0], launches[1]);
    assert!(reaches(&ctx.graph, a, b));
    assert!(!reaches(&ctx.graph, b, a));

    // The consumer's io update is the first holder reading the producer's output.
    let updates = ctx.graph.holders_by_type(names::UPDATE_IO_ADDR);
    assert!(ctx.graph.has_dependency(a, updates[1]));
    assert!(ctx.graph.has_dependency(b, lowered.net_output));
}

#[test]
fn test_alias_passes_producer_order_through() {
    let graph = chain(
        &[("Abs", "a"), ("Reshape", "view"), ("Abs", "b")],
        &[
            static_shape(&[4]),
            static_shape(&[4]),
            static_shape(&[2, 2]),
            static_shape(&[2, 2]),
        ],
    );
    let (ctx, lowered) = lower(&graph, LoweringOptions::default(), abs_results(&["a", "b"]));
    lowered.unwrap();

    let launches = ctx.graph.holders_by_type(names::LAUNCH_TF_KERNEL);
    assert!(reaches(&ctx.graph, launches[0], launches[1]));
}

#[test]
fn test_aliased_graph_output_waits_for_writer() {
    let graph = chain(
        &[("Abs", "a"), ("Reshape", "view")],
        &[static_shape(&[4]), static_shape(&[4]), static_shape(&[2, 2])],
    );
    let (ctx, lowered) = lower(&graph, LoweringOptions::default(), abs_results(&["a"]));
    let lowered = lowered.unwrap();

    let launch = ctx.graph.holders_by_type(names::LAUNCH_TF_KERNEL)[0];
    assert!(ctx.graph.has_dependency(launch, lowered.net_output));
}
