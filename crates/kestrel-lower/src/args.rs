//! Argument-buffer and ext-info builders for CPU-class kernels.
//!
//! Argument buffers are built once in the init frame from the compiled task
//! descriptor. Per-invocation addresses and shapes are patched in the main
//! frame by `UpdateAicpuIoAddr` and `UpdateExtInfo`.

use kestrel_core::{DataType, NodeCtx, TensorShape};

use crate::attrs;
use crate::compile_result::{AicpuTaskDef, KernelDialect};
use crate::context::LoweringContext;
use crate::ext_info::{BITMAP_SINGLE_OP, ExtInfoHandler};
use crate::holder::{ConstValue, DevMemValue, Frame, HolderId, HolderOutput, Placement};
use crate::kernel_names as names;
use crate::planner::{ShapeCategory, shape_category};
use crate::{Error, Result};

/// Async wait timeout meaning "wait forever".
pub const ASYNC_TIMEOUT_FOREVER: u32 = u32::MAX;

/// Number of `u64` fields in one relocation copy descriptor:
/// release flag, data size, source address, destination address, destination size.
pub const RELOCATE_DESC_LEN: usize = 5;

/// Dtype and shape of one kernel input or output.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDesc {
    pub dtype: DataType,
    pub shape: TensorShape,
}

/// Blocking behavior of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingOp {
    pub is_blocking: bool,
    /// Async wait timeout in seconds.
    pub timeout: u32,
}

impl Default for BlockingOp {
    fn default() -> Self {
        Self {
            is_blocking: false,
            timeout: ASYNC_TIMEOUT_FOREVER,
        }
    }
}

/// What a CPU kernel needs to know about its node to build arguments.
///
/// Decoupled from the IR so the relocation copy kernel can be described
/// without a graph node.
#[derive(Debug, Clone)]
pub struct CpuKernelIo {
    pub node_name: String,
    pub op_type: String,
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
    pub category: ShapeCategory,
    pub blocking: BlockingOp,
    pub workspace_types: Vec<i64>,
}

impl CpuKernelIo {
    pub fn from_node(node: &NodeCtx<'_>) -> Result<Self> {
        let desc = |edge: &kestrel_core::IrEdge| TensorDesc {
            dtype: edge.dtype,
            shape: edge.shape.clone(),
        };
        let inputs = (0..node.input_count())
            .map(|i| node.input_edge(i).map(desc))
            .collect::<kestrel_core::Result<Vec<_>>>()?;
        let outputs = (0..node.output_count())
            .map(|i| node.output_edge(i).map(desc))
            .collect::<kestrel_core::Result<Vec<_>>>()?;

        let is_blocking = node.attr_bool_or(attrs::IS_BLOCKING_OP, false)?;
        let timeout = match node.attr_i64_or(attrs::BLOCKING_OP_TIMEOUT, -1)? {
            -1 => ASYNC_TIMEOUT_FOREVER,
            raw => u32::try_from(raw).map_err(|_| {
                Error::invalid_input(node, format!("blocking op timeout {raw} out of range"))
            })?,
        };

        Ok(Self {
            node_name: node.name().to_string(),
            op_type: node.op_type().to_string(),
            inputs,
            outputs,
            category: shape_category(node)?,
            blocking: BlockingOp {
                is_blocking,
                timeout,
            },
            workspace_types: node.attr_ints_or_empty(attrs::AICPU_WORKSPACE_TYPE)?.to_vec(),
        })
    }

    /// Io of the copy kernel that relocates `count` depend-on-compute outputs
    /// of `origin` into their final buffers. Takes one copy descriptor per output.
    pub fn for_relocation(origin: &CpuKernelIo, count: usize) -> Self {
        let descriptor = TensorDesc {
            dtype: DataType::U64,
            shape: TensorShape::Static(vec![RELOCATE_DESC_LEN]),
        };
        Self {
            node_name: format!("{}_relocate", origin.node_name),
            op_type: "MemCopy".to_string(),
            inputs: vec![descriptor; count],
            outputs: Vec::new(),
            category: ShapeCategory::Static,
            blocking: BlockingOp::default(),
            workspace_types: Vec::new(),
        }
    }

    pub fn io_count(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }
}

/// Holders produced by [`build_args`].
#[derive(Debug, Clone, Copy)]
pub struct ArgsHolders {
    /// Host argument buffer.
    pub args: HolderOutput,
    /// Ext-info buffer, mirrored on device when the kernel runs there.
    pub ext_info: HolderOutput,
    /// Hardware event for blocking kernels, when the device supports it.
    pub blocking_event: Option<HolderOutput>,
    /// Custom kernel load the launch must follow.
    pub so_load: Option<HolderId>,
    pub ext_info_len: usize,
    pub has_workspace: bool,
}

/// Build the argument and ext-info buffers for `task` in the init frame.
#[tracing::instrument(skip_all, fields(node = %io.node_name, dialect = ?task.dialect()))]
pub fn build_args(
    ctx: &mut LoweringContext,
    io: &CpuKernelIo,
    task: &AicpuTaskDef,
    placement: Placement,
) -> Result<ArgsHolders> {
    let dialect = task.dialect();

    let so_load = if dialect == KernelDialect::Cc && task.custom {
        Some(load_custom_so(ctx, &io.node_name, task)?)
    } else {
        None
    };

    let (ext_info, has_workspace) = if task.ext_info.is_empty() {
        (Vec::new(), false)
    } else {
        let mut handler = ExtInfoHandler::parse(
            &io.node_name,
            &task.ext_info,
            io.inputs.len(),
            io.outputs.len(),
        )?;
        let kernel_id = ctx.next_kernel_id();
        handler.update_session_info(ctx.options().session_id, kernel_id)?;
        if ctx.options().single_op_mode {
            let bitmap = handler.bitmap().unwrap_or(0) | BITMAP_SINGLE_OP;
            handler.update_bitmap(bitmap)?;
        }
        if io.blocking.is_blocking {
            handler.update_async_wait(1, 0, u64::from(io.blocking.timeout))?;
        }
        let has_workspace = handler.has_workspace();
        (handler.as_bytes().to_vec(), has_workspace)
    };
    let ext_info_len = ext_info.len();
    let needs_dev_ext = placement == Placement::Device && !ext_info.is_empty();

    let session_id = ctx.session_id_holder()?;
    let step_id = match dialect {
        KernelDialect::Tf => Some(ctx.step_id()?),
        KernelDialect::Cc => None,
    };
    let blocking_supported = ctx.options().blocking_op_supported;

    ctx.in_frame(Frame::Init, |ctx| {
        let blocking_event = if blocking_supported && io.blocking.is_blocking {
            let event = ctx.graph.add_compute(names::CREATE_ASYNC_EVENT, &[], 2)?;
            let event = HolderOutput::first(event);
            ctx.graph.add_guarder(names::DESTROY_ASYNC_EVENT, event)?;
            Some(event)
        } else {
            None
        };

        let g = &mut ctx.graph;
        let mut inputs = vec![
            g.add_const(ConstValue::Int(io.io_count() as i64)),
            g.add_const(ConstValue::Str(io.node_name.clone())),
            g.add_const(ConstValue::Bool(needs_dev_ext)),
            g.add_const(ConstValue::Bytes(task.args.clone())),
            g.add_const(ConstValue::Bytes(ext_info)),
        ];
        let op = match (dialect, step_id) {
            (KernelDialect::Tf, Some(step_id)) => {
                inputs.push(session_id);
                inputs.push(step_id);
                inputs.push(g.add_const(ConstValue::Bytes(task.task_info.clone())));
                names::BUILD_TF_ARGS
            }
            _ => {
                inputs.push(g.add_const(ConstValue::Str(task.kernel_name.clone())));
                inputs.push(g.add_const(ConstValue::Str(task.so_name.clone())));
                names::BUILD_CC_ARGS
            }
        };
        inputs.push(g.add_const(ConstValue::Bool(io.blocking.is_blocking)));
        inputs.push(g.add_const(ConstValue::Int(i64::from(io.blocking.timeout))));
        if let Some(event) = blocking_event {
            inputs.push(HolderOutput::new(event.holder, 1));
        }

        let build = g.add_compute(op, &inputs, 2)?;
        g.set_placement(build, placement, None)?;
        if let Some(so_load) = so_load {
            g.add_dependency(so_load, build)?;
        }

        Ok(ArgsHolders {
            args: HolderOutput::new(build, 0),
            ext_info: HolderOutput::new(build, 1),
            blocking_event,
            so_load,
            ext_info_len,
            has_workspace,
        })
    })
}

/// Load a custom kernel shared object once per context.
fn load_custom_so(ctx: &mut LoweringContext, node_name: &str, task: &AicpuTaskDef) -> Result<HolderId> {
    if task.so_name.is_empty() {
        return Err(Error::Resource {
            node: node_name.to_string(),
            message: "custom kernel without shared object name".to_string(),
        });
    }
    ctx.ensure_custom_so(node_name, &task.so_name, &task.so_bin)?;
    let key = format!("CustomSo-{}", task.so_name);
    let loaded = ctx.unique_holder(&key, |ctx| {
        ctx.in_frame(Frame::Init, |ctx| {
            let name = ctx.graph.add_const(ConstValue::Str(task.so_name.clone()));
            let bin = ctx.graph.add_const(ConstValue::Bytes(task.so_bin.clone()));
            let load = ctx.graph.add_compute(names::LOAD_CUSTOM_SO, &[name, bin], 1)?;
            Ok(HolderOutput::first(load))
        })
    })?;
    Ok(loaded.holder)
}

/// Patch the argument buffer with this invocation's addresses.
pub fn update_io_addr(
    ctx: &mut LoweringContext,
    args: HolderOutput,
    input_addrs: &[DevMemValue],
    output_addrs: &[DevMemValue],
) -> Result<HolderId> {
    let mut inputs = Vec::with_capacity(1 + input_addrs.len() + output_addrs.len());
    inputs.push(args);
    inputs.extend(input_addrs.iter().map(|a| a.value));
    inputs.extend(output_addrs.iter().map(|a| a.value));
    ctx.graph.add_compute(names::UPDATE_IO_ADDR, &inputs, 0)
}

/// Patch ext-info with runtime shapes and workspace.
///
/// Returns `None` when nothing needs patching. The device mirror is refreshed
/// only when `stream` is given and the kernel's shapes are not static.
pub fn update_ext_info(
    ctx: &mut LoweringContext,
    io: &CpuKernelIo,
    args: &ArgsHolders,
    input_shapes: &[HolderOutput],
    output_shapes: &[HolderOutput],
    workspace: Option<&DevMemValue>,
    stream: Option<HolderOutput>,
) -> Result<Option<HolderId>> {
    if args.ext_info_len == 0 {
        return Ok(None);
    }
    let workspace = workspace.filter(|_| args.has_workspace);
    if io.category.is_static() && workspace.is_none() {
        return Ok(None);
    }

    let copy_to_device = stream.is_some() && !io.category.is_static();
    let g = &mut ctx.graph;
    let mut inputs = vec![
        args.ext_info,
        g.add_const(ConstValue::Bool(copy_to_device)),
        g.add_const(ConstValue::Int(input_shapes.len() as i64)),
        g.add_const(ConstValue::Int(output_shapes.len() as i64)),
        g.add_const(ConstValue::Bool(workspace.is_some())),
    ];
    inputs.extend_from_slice(input_shapes);
    inputs.extend_from_slice(output_shapes);
    if let Some(workspace) = workspace {
        inputs.push(workspace.value);
    }
    if let (true, Some(stream)) = (copy_to_device, stream) {
        inputs.push(stream);
    }
    let update = g.add_compute(names::UPDATE_EXT_INFO, &inputs, 0)?;
    Ok(Some(update))
}
