//! Synthetic operation identifiers resolved by the executor.
//!
//! The executor dispatches compute and guarder holders by these names, so
//! each constant is part of the lowered graph's wire contract. The comment
//! beside each one lists its positional inputs and its output count.

// Init-frame resources.

/// `[placement, usage]` -> 1 (allocator handle).
pub const CREATE_ALLOCATOR: &str = "CreateAllocator";
/// `[stream id]` -> 1 (stream handle).
pub const GET_STREAM_BY_ID: &str = "GetStreamById";
/// `[]` -> 1 (current step id).
pub const GET_STEP_ID: &str = "GetStepId";

// Memory.

/// `[allocator, size]` -> 1 (memory handle).
pub const ALLOC_MEMORY: &str = "AllocMemory";
/// Guarder over a memory handle.
pub const FREE_MEMORY: &str = "FreeMemory";
/// `[shape, dtype]` -> 1 (byte size).
pub const CALC_TENSOR_SIZE: &str = "CalcTensorSizeFromShape";
/// `[device allocator, stream, addr, size]` -> 1 (device memory handle).
pub const ENSURE_TENSOR_AT_DEVICE: &str = "EnsureTensorAtDevice";
/// `[device allocator, stream, index, (addr, size)...]` -> n (device memory handles).
pub const FUSED_ENSURE_TENSORS_AT_DEVICE: &str = "FusedEnsureTensorsAtDevice";

// Shape inference.

/// `[op type]` -> 1 (infer function handle).
pub const FIND_INFER_SHAPE_FUNC: &str = "FindInferShapeFunc";
/// `[infer function, input shapes...]` -> n (output shapes).
pub const INFER_SHAPE: &str = "InferShape";

// Argument buffers.

/// `[io count, node name, needs device ext-info, args, ext-info, session id, step id, task info,
///   is blocking, timeout, event id?]` -> 2 (args handle, ext-info handle).
pub const BUILD_TF_ARGS: &str = "BuildTfArgs";
/// `[io count, node name, needs device ext-info, args, ext-info, kernel name, so name,
///   is blocking, timeout, event id?]` -> 2 (args handle, ext-info handle).
pub const BUILD_CC_ARGS: &str = "BuildCCArgs";
/// `[so name, so binary]` -> 1 (loaded handle).
pub const LOAD_CUSTOM_SO: &str = "LoadCustomAicpuSo";
/// `[args, input addrs..., output addrs...]` -> 0.
pub const UPDATE_IO_ADDR: &str = "UpdateAicpuIoAddr";
/// `[ext-info, copy to device, input count, output count, has workspace,
///   input shapes..., output shapes..., workspace?, stream?]` -> 0.
pub const UPDATE_EXT_INFO: &str = "UpdateExtInfo";
/// `[]` -> 2 (event handle, event id).
pub const CREATE_ASYNC_EVENT: &str = "CreateAsyncEvent";
/// Guarder over an async event handle.
pub const DESTROY_ASYNC_EVENT: &str = "DestroyAsyncEvent";

// Launch and synchronization.

/// `[args, stream, block dim]` -> 0.
pub const LAUNCH_TF_KERNEL: &str = "AicpuLaunchTfKernel";
/// `[args, stream, block dim]` -> 0.
pub const LAUNCH_CC_KERNEL: &str = "AicpuLaunchCCKernel";
/// `[event, stream]` -> 0.
pub const WAIT_ASYNC_EVENT: &str = "WaitAsyncEvent";
/// `[stream]` -> 0.
pub const SYNC_STREAM: &str = "SyncStream";

// Depend-on-compute outputs.

/// `[summaries...]` -> 2n (shapes, data addrs).
pub const GET_SHAPES_FROM_SUMMARY: &str = "GetShapesFromSummary";
/// `[data addrs..., output addrs..., output sizes...]` -> n (one copy descriptor per output).
pub const BUILD_RELOCATE_COPY_DESCS: &str = "BuildRelocateCopyDescs";
/// `[ext-info, output count]` -> n (output shapes).
pub const GET_OUTPUT_SHAPES_FROM_EXT_INFO: &str = "GetOutputShapesFromExtInfo";
/// `[summaries..., shapes...]` -> n (output data handles).
pub const GET_OUTPUT_DATA_FROM_SUMMARY: &str = "GetOutputDataFromSummary";

// Host CPU.

/// `[proc name, input shapes..., input addrs..., output shapes..., output addrs...]` -> 0,
/// or `[proc name, input shapes..., input addrs...]` -> 2n for depend-on-compute ops.
pub const HOST_PROC_COMPUTE: &str = "HostProcCompute";
/// `[args, ext-info]` -> 0.
pub const AICPU_HOST_COMPUTE: &str = "AicpuHostCompute";

// Structural.

/// `[input shapes...]` -> 2 per input (result shape, host shape tensor).
pub const BUILD_SHAPE_TENSOR_DATA: &str = "BuildShapeTensorData";

// Sequence containers.

/// `[container id]` -> 1 (session handle).
pub const CREATE_CONTAINER_SESSION: &str = "CreateContainerSession";
/// Guarder over a container session.
pub const DESTROY_CONTAINER_SESSION: &str = "DestroyContainerSession";
/// `[session]` -> 0.
pub const CLEAR_CONTAINER: &str = "ClearContainer";
/// `[session, dtype]` -> 2 (handle shape, handle addr).
pub const SEQUENCE_EMPTY: &str = "SequenceEmpty";
/// `[session, seq shape, seq addr, tensor shape, tensor addr, position shape?, position addr?]` -> 2.
pub const SEQUENCE_INSERT: &str = "SequenceInsert";
/// `[session, seq addr, position shape, position addr, allocator]` -> 2.
pub const SEQUENCE_AT: &str = "SequenceAt";
/// `[session, seq addr, allocator]` -> 2.
pub const SEQUENCE_LENGTH: &str = "SequenceLength";
/// `[session, allocator, input shape, input addr, axis, keepdims, split shape?, split addr?]` -> 2.
pub const SPLIT_TO_SEQUENCE: &str = "SplitToSequence";

// Proxy and runtime signal tasks.

/// `[stream, cmo type, addrs...]` -> 0.
pub const LAUNCH_CMO_TASK: &str = "LaunchCmoTask";
/// `[stream, sqe, input addrs..., output addrs...]` -> 0.
pub const LAUNCH_DVPP_TASK: &str = "LaunchDvppTask";
/// `[stream, output addr]` -> 0.
pub const NPU_GET_FLOAT_STATUS: &str = "NpuGetFloatStatus";
/// `[stream]` -> 0.
pub const NPU_CLEAR_FLOAT_STATUS: &str = "NpuClearFloatStatus";

// Graph boundary.

/// `[output shapes..., output addrs...]` -> 0.
pub const NET_OUTPUT: &str = "NetOutput";
