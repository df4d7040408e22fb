//! End-to-end lowering of CPU kernels hosted on the accelerator.

mod common;

use common::{SingleNode, ext_info, lower, static_shape};
use kestrel_core::{AttributeValue, NodeCtx, TensorShape};
use kestrel_lower::attrs::{self, lib_names};
use kestrel_lower::compile_result::CmoTaskDef;
use kestrel_lower::kernel_names as names;
use kestrel_lower::{
    AicpuTaskDef, CompileResult, CompileResults, ConstValue, ConverterRegistry, Error, Frame,
    HolderOutput, LowerInput, LowerResult, LoweringContext, LoweringOptions, Placement, TaskDef, default_passes,
    lower_graph,
};

fn unary(op_type: &str, name: &str, output: TensorShape) -> SingleNode {
    SingleNode::new(op_type, name)
        .lib(lib_names::AICPU_TF)
        .input(static_shape(&[4]))
        .output(output)
}

fn depend_compute(op_type: &str, name: &str) -> SingleNode {
    unary(op_type, name, TensorShape::UnknownRank)
        .attr(attrs::UNKNOWN_SHAPE_TYPE, AttributeValue::Int(4))
}

fn tf_result(name: &str, task: &str) -> CompileResults {
    CompileResults::new().with(
        name,
        CompileResult::aicpu(AicpuTaskDef::tf(task).with_ext_info(ext_info(1, 1))),
    )
}

#[test]
fn test_static_kernel_releases_after_launch() {
    let graph = unary("Abs", "abs", static_shape(&[4])).build();
    let (ctx, lowered) = lower(&graph, LoweringOptions::default(), tf_result("abs", "Abs"));
    let lowered = lowered.unwrap();

    let launches = ctx.graph.holders_by_type(names::LAUNCH_TF_KERNEL);
    assert_eq!(launches.len(), 1);
    assert!(ctx.graph.holders_by_type(names::UPDATE_EXT_INFO).is_empty());
    assert!(ctx.graph.holders_by_type(names::INFER_SHAPE).is_empty());

    let build = ctx.graph.holders_by_type(names::BUILD_TF_ARGS);
    assert_eq!(build.len(), 1);
    assert_eq!(ctx.graph.holder(build[0]).unwrap().frame, Frame::Init);

    assert_eq!(lowered.out_shapes.len(), 1);
    assert_eq!(
        ctx.graph.const_value(lowered.out_shapes[0]),
        Some(&ConstValue::Ints(vec![4]))
    );
    let out = lowered.out_addrs[0];
    assert_eq!(out.placement, Placement::Device);
    assert_eq!(
        ctx.graph.holder(out.value.holder).unwrap().op_type,
        names::ALLOC_MEMORY
    );
    let guarder = ctx.graph.guarder(out.value).unwrap();
    assert!(ctx.graph.has_dependency(launches[0], guarder));
    assert!(ctx.graph.has_dependency(lowered.net_output, guarder));
}

#[test]
fn test_dynamic_kernel_refreshes_ext_info_before_launch() {
    let graph = SingleNode::new("Abs", "abs")
        .lib(lib_names::AICPU_TF)
        .input(TensorShape::UnknownRank)
        .output(TensorShape::UnknownRank)
        .build();
    let options = LoweringOptions::default().with_session_id(7);
    let (ctx, lowered) = lower(&graph, options, tf_result("abs", "Abs"));
    lowered.unwrap();

    assert_eq!(ctx.graph.holders_by_type(names::INFER_SHAPE).len(), 1);
    assert_eq!(ctx.graph.holders_by_type(names::CALC_TENSOR_SIZE).len(), 1);

    let update = ctx.graph.holders_by_type(names::UPDATE_EXT_INFO);
    assert_eq!(update.len(), 1);
    let launch = ctx.graph.holders_by_type(names::LAUNCH_TF_KERNEL)[0];
    assert!(ctx.graph.has_dependency(update[0], launch));

    let inputs = ctx.graph.inputs(update[0]);
    assert_eq!(ctx.graph.const_value(inputs[1]), Some(&ConstValue::Bool(true)));
    let stream = ctx.graph.holders_by_type(names::GET_STREAM_BY_ID)[0];
    assert_eq!(inputs.last().unwrap().holder, stream);

    let build = ctx.graph.holders_by_type(names::BUILD_TF_ARGS)[0];
    let session = ctx.graph.inputs(build)[5];
    assert_eq!(ctx.graph.const_value(session), Some(&ConstValue::Int(7)));
}

#[test]
fn test_ported_depend_compute_relocates_outputs() {
    let graph = depend_compute("Unique", "unique").build();
    let results = CompileResults::new().with(
        "unique",
        CompileResult::new(vec![
            TaskDef::Aicpu(AicpuTaskDef::tf("Unique").with_ext_info(ext_info(1, 1))),
            TaskDef::Aicpu(AicpuTaskDef::tf("MemCopy")),
        ]),
    );
    let (ctx, lowered) = lower(&graph, LoweringOptions::default(), results);
    let lowered = lowered.unwrap();

    assert_eq!(ctx.graph.holders_by_type(names::LAUNCH_TF_KERNEL).len(), 2);
    assert_eq!(ctx.graph.holders_by_type(names::BUILD_TF_ARGS).len(), 2);
    assert_eq!(ctx.graph.holders_by_type(names::BUILD_RELOCATE_COPY_DESCS).len(), 1);

    let syncs = ctx.graph.holders_by_type(names::SYNC_STREAM);
    assert_eq!(syncs.len(), 2);
    let read = ctx.graph.holders_by_type(names::GET_SHAPES_FROM_SUMMARY);
    assert_eq!(read.len(), 1);
    assert!(ctx.graph.has_dependency(syncs[0], read[0]));
    assert_eq!(lowered.out_shapes[0].holder, read[0]);

    // Summaries and the relocated output are both released after the copy.
    let allocs = ctx.graph.holders_by_type(names::ALLOC_MEMORY);
    assert_eq!(allocs.len(), 2);
    for alloc in allocs {
        let guarder = ctx.graph.guarder(HolderOutput::first(alloc)).unwrap();
        assert!(ctx.graph.has_dependency(syncs[1], guarder));
    }
}

#[test]
fn test_relocation_errors_name_original_node() {
    let graph = depend_compute("Unique", "unique").build();
    let results = CompileResults::new().with(
        "unique",
        CompileResult::new(vec![
            TaskDef::Aicpu(AicpuTaskDef::tf("Unique").with_ext_info(ext_info(1, 1))),
            // Shorter than one record header.
            TaskDef::Aicpu(AicpuTaskDef::tf("MemCopy").with_ext_info(vec![1, 2, 3])),
        ]),
    );
    let (_, lowered) = lower(&graph, LoweringOptions::default(), results);
    let err = lowered.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("'unique'"));
    assert!(!message.contains("unique_relocate"));
    match err {
        Error::Lowering { node, source, .. } => {
            assert_eq!(node, "unique");
            match *source {
                Error::MalformedExtInfo { node, message } => {
                    assert_eq!(node, "unique");
                    assert!(message.starts_with("relocation kernel: "));
                }
                other => panic!("unexpected source: {other}"),
            }
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_task_count_mismatch_is_internal() {
    let graph = depend_compute("Unique", "unique").build();
    let (_, lowered) = lower(&graph, LoweringOptions::default(), tf_result("unique", "Unique"));
    let err = lowered.unwrap_err();

    assert!(err.is_internal());
    assert!(err.to_string().contains("'unique' (Unique)"));
    match err {
        Error::Lowering { node, source, .. } => {
            assert_eq!(node, "unique");
            assert!(matches!(
                *source,
                Error::TaskCountMismatch {
                    expected: 2,
                    actual: 1,
                    ..
                }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_missing_compile_result_names_node() {
    let graph = unary("Abs", "abs", static_shape(&[4])).build();
    let (_, lowered) = lower(&graph, LoweringOptions::default(), CompileResults::new());
    let err = lowered.unwrap_err();

    assert!(!err.is_internal());
    match err {
        Error::Lowering { source, .. } => {
            assert!(matches!(*source, Error::MissingCompileResult { ref node, .. } if node == "abs"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_native_depend_compute_reads_summaries() {
    let graph = depend_compute("Unique", "unique")
        .lib(lib_names::AICPU_ASCEND)
        .build();
    let task = AicpuTaskDef::cc("Unique", "libcpu_kernels.so").with_ext_info(ext_info(1, 1));
    let results = CompileResults::new().with("unique", CompileResult::aicpu(task));
    let (ctx, lowered) = lower(&graph, LoweringOptions::default(), results);
    let lowered = lowered.unwrap();

    assert_eq!(ctx.graph.holders_by_type(names::LAUNCH_CC_KERNEL).len(), 1);
    assert!(ctx.graph.holders_by_type(names::GET_SHAPES_FROM_SUMMARY).is_empty());
    let shapes = ctx.graph.holders_by_type(names::GET_OUTPUT_SHAPES_FROM_EXT_INFO);
    let data = ctx.graph.holders_by_type(names::GET_OUTPUT_DATA_FROM_SUMMARY);
    assert_eq!((shapes.len(), data.len()), (1, 1));

    let sync = ctx.graph.holders_by_type(names::SYNC_STREAM)[0];
    assert!(ctx.graph.has_dependency(sync, shapes[0]));
    assert_eq!(lowered.out_addrs[0].value.holder, data[0]);
    assert!(ctx.graph.guarder(lowered.out_addrs[0].value).is_some());
}

#[test]
fn test_blocking_kernel_waits_on_event() {
    let graph = unary("QueueDequeue", "dequeue", static_shape(&[4]))
        .attr(attrs::IS_BLOCKING_OP, AttributeValue::Bool(true))
        .build();
    let options = LoweringOptions::default().with_blocking_op_supported(true);
    let (ctx, lowered) = lower(&graph, options, tf_result("dequeue", "QueueDequeue"));
    let lowered = lowered.unwrap();

    let event = ctx.graph.holders_by_type(names::CREATE_ASYNC_EVENT);
    assert_eq!(event.len(), 1);
    assert_eq!(ctx.graph.holder(event[0]).unwrap().frame, Frame::Init);

    let wait = ctx.graph.holders_by_type(names::WAIT_ASYNC_EVENT);
    assert_eq!(wait.len(), 1);
    let launch = ctx.graph.holders_by_type(names::LAUNCH_TF_KERNEL)[0];
    assert!(ctx.graph.has_dependency(launch, wait[0]));
    let guarder = ctx.graph.guarder(lowered.out_addrs[0].value).unwrap();
    assert!(ctx.graph.has_dependency(wait[0], guarder));
}

#[test]
fn test_host_inputs_copied_to_device() {
    let graph = unary("Abs", "abs", static_shape(&[4])).build();
    let options = LoweringOptions::default().with_input_placement(Placement::Host);
    let (ctx, lowered) = lower(&graph, options, tf_result("abs", "Abs"));
    lowered.unwrap();

    let ensure = ctx.graph.holders_by_type(names::ENSURE_TENSOR_AT_DEVICE);
    assert_eq!(ensure.len(), 1);
    let update = ctx.graph.holders_by_type(names::UPDATE_IO_ADDR)[0];
    assert_eq!(ctx.graph.inputs(update)[1].holder, ensure[0]);
}

#[test]
fn test_unsupported_op_names_node() {
    let graph = SingleNode::new("Mystery", "mystery")
        .input(static_shape(&[1]))
        .output(static_shape(&[1]))
        .build();
    let (_, lowered) = lower(&graph, LoweringOptions::default(), CompileResults::new());
    match lowered.unwrap_err() {
        Error::UnsupportedOp { node, op_type } => {
            assert_eq!(node, "mystery");
            assert_eq!(op_type, "Mystery");
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn partial(_: &NodeCtx<'_>, input: &mut LowerInput<'_>) -> kestrel_lower::Result<LowerResult> {
    let shape = input.input_shapes[0];
    Ok(LowerResult::new(Vec::new(), vec![shape], Vec::new()))
}

#[test]
fn test_partial_result_is_rejected() {
    common::init_tracing();
    let graph = SingleNode::new("Partial", "partial")
        .input(static_shape(&[1]))
        .output(static_shape(&[1]))
        .build();
    let mut registry = ConverterRegistry::new();
    registry.register("Partial", partial);
    let mut ctx = LoweringContext::new(LoweringOptions::default(), CompileResults::new());

    let err = lower_graph(&graph, &registry, &mut ctx, &default_passes()).unwrap_err();
    assert!(err.is_internal());
    assert!(matches!(err, Error::Lowering { ref source, .. } if matches!(**source, Error::Graph(_))));
}

#[test]
fn test_void_node_ordered_before_net_output() {
    let graph = SingleNode::new("Cmo", "prefetch")
        .input(static_shape(&[64]))
        .build();
    let results = CompileResults::new().with(
        "prefetch",
        CompileResult::new(vec![TaskDef::Cmo(CmoTaskDef { cmo_type: 6 })]),
    );
    let (ctx, lowered) = lower(&graph, LoweringOptions::default(), results);
    let lowered = lowered.unwrap();

    assert!(lowered.out_shapes.is_empty());
    let launch = ctx.graph.holders_by_type(names::LAUNCH_CMO_TASK);
    assert_eq!(launch.len(), 1);
    assert!(ctx.graph.has_dependency(launch[0], lowered.net_output));
    let inputs = ctx.graph.inputs(launch[0]);
    assert_eq!(ctx.graph.const_value(inputs[1]), Some(&ConstValue::Int(6)));
}
