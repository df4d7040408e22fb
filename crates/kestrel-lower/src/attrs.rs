//! Per-node attribute keys read during lowering.

/// Unknown-shape category (1-4) of a node's outputs.
pub const UNKNOWN_SHAPE_TYPE: &str = "_unknown_shape_type";

/// Host node whose outputs are small enough for the direct allocation path.
pub const HOST_SMALL_SHAPE: &str = "_host_small_shape";

/// Per-output input index the output aliases, `-1` for a fresh allocation.
pub const HOST_OUTPUT_REF_INPUT: &str = "_host_output_ref_input";

/// Whether the kernel blocks on an async event.
pub const IS_BLOCKING_OP: &str = "_is_blocking_op";

/// Async wait timeout in seconds for blocking kernels.
pub const BLOCKING_OP_TIMEOUT: &str = "_blocking_op_timeout";

/// Workspace kinds requested by the kernel.
pub const AICPU_WORKSPACE_TYPE: &str = "_aicpu_workspace_type";

/// Kernel library the node was compiled for.
pub const KERNEL_LIB_NAME: &str = "_kernel_lib_name";

/// Explicit target placement (`"host"` or `"device"`).
pub const PLACEMENT: &str = "_placement";

/// Kernel library names.
pub mod lib_names {
    pub const AICPU_TF: &str = "aicpu_tf_kernel";
    pub const AICPU_ASCEND: &str = "aicpu_ascend_kernel";
    pub const HOST_CPU: &str = "host_cpu_kernel";
    pub const DVPP: &str = "dvpp_kernel";
}

/// Workspace kind code for the kernel log buffer.
pub const WORKSPACE_TYPE_LOG: i64 = 1;
