//! Shared state threaded through the lowering of one graph.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kestrel_core::NodeCtx;

use crate::compile_result::{CompileResult, CompileResults};
use crate::converters::host_cpu::HostProcRegistry;
use crate::custom_kernels::{CustomKernelRegistry, LoadedSo};
use crate::holder::{ConstValue, DevMemValue, Frame, HolderId, HolderOutput, LoweringGraph, Placement};
use crate::kernel_names as names;
use crate::{Error, Result};

/// Session-level lowering settings.
#[derive(Debug, Clone)]
pub struct LoweringOptions {
    pub session_id: u64,

    /// Stream the main frame launches on.
    pub stream_id: i64,

    /// Lowering a single standalone operator rather than a full graph.
    pub single_op_mode: bool,

    /// Whether the device supports hardware events for blocking kernels.
    pub blocking_op_supported: bool,

    /// Placement of the tensors fed as graph inputs.
    pub input_placement: Placement,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        Self {
            session_id: 0,
            stream_id: 0,
            single_op_mode: false,
            blocking_op_supported: false,
            input_placement: Placement::Device,
        }
    }
}

impl LoweringOptions {
    pub fn with_session_id(mut self, session_id: u64) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_stream_id(mut self, stream_id: i64) -> Self {
        self.stream_id = stream_id;
        self
    }

    pub fn with_single_op_mode(mut self, enabled: bool) -> Self {
        self.single_op_mode = enabled;
        self
    }

    pub fn with_blocking_op_supported(mut self, supported: bool) -> Self {
        self.blocking_op_supported = supported;
        self
    }

    pub fn with_input_placement(mut self, placement: Placement) -> Self {
        self.input_placement = placement;
        self
    }
}

/// Lowering context: the graph under construction plus per-session caches.
pub struct LoweringContext {
    /// Graph under construction.
    pub graph: LoweringGraph,

    options: LoweringOptions,
    compile_results: CompileResults,

    /// Holders shared by every node, keyed by purpose.
    unique: HashMap<String, Vec<HolderOutput>>,

    container_ids: AtomicU64,
    kernel_ids: u64,

    custom_kernels: Arc<CustomKernelRegistry>,
    /// Shared objects kept loaded for the lifetime of this context.
    loaded_sos: Vec<Arc<LoadedSo>>,

    host_procs: HostProcRegistry,
}

impl LoweringContext {
    pub fn new(options: LoweringOptions, compile_results: CompileResults) -> Self {
        Self {
            graph: LoweringGraph::new(),
            options,
            compile_results,
            unique: HashMap::new(),
            container_ids: AtomicU64::new(0),
            kernel_ids: 0,
            custom_kernels: CustomKernelRegistry::global(),
            loaded_sos: Vec::new(),
            host_procs: HostProcRegistry::with_defaults(),
        }
    }

    pub fn with_custom_kernels(mut self, registry: Arc<CustomKernelRegistry>) -> Self {
        self.custom_kernels = registry;
        self
    }

    pub fn with_host_procs(mut self, host_procs: HostProcRegistry) -> Self {
        self.host_procs = host_procs;
        self
    }

    pub fn options(&self) -> &LoweringOptions {
        &self.options
    }

    pub fn host_procs(&self) -> &HostProcRegistry {
        &self.host_procs
    }

    /// Compile result for `node`. A node reaching lowering must have one.
    pub fn compile_result(&self, node: &NodeCtx<'_>) -> Result<&CompileResult> {
        self.compile_results
            .get(node.name())
            .ok_or_else(|| Error::MissingCompileResult {
                node: node.name().to_string(),
                op_type: node.op_type().to_string(),
            })
    }

    /// Run `f` with new holders placed in `frame`, restoring the current frame afterwards.
    pub fn in_frame<T>(
        &mut self,
        frame: Frame,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let previous = self.graph.set_frame(frame);
        let result = f(self);
        self.graph.set_frame(previous);
        result
    }

    /// Holders built once per context under `key`.
    pub fn unique_holders(
        &mut self,
        key: &str,
        build: impl FnOnce(&mut Self) -> Result<Vec<HolderOutput>>,
    ) -> Result<Vec<HolderOutput>> {
        if let Some(holders) = self.unique.get(key) {
            tracing::debug!(key, "unique holder cache hit");
            return Ok(holders.clone());
        }
        let holders = build(self)?;
        self.unique.insert(key.to_string(), holders.clone());
        Ok(holders)
    }

    /// Single-output variant of [`Self::unique_holders`].
    pub fn unique_holder(
        &mut self,
        key: &str,
        build: impl FnOnce(&mut Self) -> Result<HolderOutput>,
    ) -> Result<HolderOutput> {
        let holders = self.unique_holders(key, |ctx| Ok(vec![build(ctx)?]))?;
        holders
            .first()
            .copied()
            .ok_or_else(|| Error::Graph(format!("unique holder '{key}' is empty")))
    }

    /// Allocator for `placement`, created once in the init frame.
    pub fn allocator(&mut self, placement: Placement) -> Result<HolderOutput> {
        self.unique_holder(&format!("Allocator-{placement:?}"), |ctx| {
            ctx.in_frame(Frame::Init, |ctx| {
                let placement = ctx.graph.add_const(ConstValue::Int(placement.code()));
                let usage = ctx.graph.add_const(ConstValue::Int(0));
                let id = ctx
                    .graph
                    .add_compute(names::CREATE_ALLOCATOR, &[placement, usage], 1)?;
                Ok(HolderOutput::first(id))
            })
        })
    }

    /// Stream the main frame launches on, resolved once in the init frame.
    pub fn stream(&mut self) -> Result<HolderOutput> {
        let stream_id = self.options.stream_id;
        self.unique_holder("Stream", |ctx| {
            ctx.in_frame(Frame::Init, |ctx| {
                let id = ctx.graph.add_const(ConstValue::Int(stream_id));
                let stream = ctx.graph.add_compute(names::GET_STREAM_BY_ID, &[id], 1)?;
                Ok(HolderOutput::first(stream))
            })
        })
    }

    pub fn session_id_holder(&mut self) -> Result<HolderOutput> {
        let session_id = self.options.session_id as i64;
        self.unique_holder("SessionId", |ctx| {
            ctx.in_frame(Frame::Init, |ctx| {
                Ok(ctx.graph.add_const(ConstValue::Int(session_id)))
            })
        })
    }

    /// Step id cell. Standalone operators always run as step 0.
    pub fn step_id(&mut self) -> Result<HolderOutput> {
        let single_op = self.options.single_op_mode;
        self.unique_holder("StepId", |ctx| {
            ctx.in_frame(Frame::Init, |ctx| {
                if single_op {
                    Ok(ctx.graph.add_const(ConstValue::Int(0)))
                } else {
                    let id = ctx.graph.add_compute(names::GET_STEP_ID, &[], 1)?;
                    Ok(HolderOutput::first(id))
                }
            })
        })
    }

    /// Next sequence container id of this context, starting at 1.
    pub fn next_container_id(&self) -> u64 {
        self.container_ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Next kernel id written into session ext-info.
    pub fn next_kernel_id(&mut self) -> u64 {
        let id = self.kernel_ids;
        self.kernel_ids += 1;
        id
    }

    /// Make sure a custom kernel shared object is loaded and kept alive
    /// for as long as this context.
    ///
    /// Returns `true` when this call loaded it.
    pub fn ensure_custom_so(&mut self, node_name: &str, so_name: &str, bin: &[u8]) -> Result<bool> {
        let (so, loaded) = self
            .custom_kernels
            .get_or_load(so_name, bin)
            .map_err(|message| Error::Resource {
                node: node_name.to_string(),
                message: format!("failed to load custom kernel '{so_name}': {message}"),
            })?;
        if !self.loaded_sos.iter().any(|held| held.so_name == so.so_name) {
            self.loaded_sos.push(so);
        }
        Ok(loaded)
    }

    /// Shared objects held by this context.
    pub fn loaded_sos(&self) -> &[Arc<LoadedSo>] {
        &self.loaded_sos
    }
}

/// Input to a node converter.
pub struct LowerInput<'a> {
    /// Shape holder per node input.
    pub input_shapes: Vec<HolderOutput>,

    /// Memory handle per node input.
    pub input_addrs: Vec<DevMemValue>,

    pub ctx: &'a mut LoweringContext,
}

/// Output of a node converter.
#[derive(Debug, Clone, Default)]
pub struct LowerResult {
    /// Holders anything depending on the whole node must wait for.
    pub order_holders: Vec<HolderId>,

    /// Shape holder per node output.
    pub out_shapes: Vec<HolderOutput>,

    /// Memory handle per node output.
    pub out_addrs: Vec<DevMemValue>,
}

impl LowerResult {
    pub fn new(
        order_holders: Vec<HolderId>,
        out_shapes: Vec<HolderOutput>,
        out_addrs: Vec<DevMemValue>,
    ) -> Self {
        Self {
            order_holders,
            out_shapes,
            out_addrs,
        }
    }

    /// Result of a node without outputs.
    pub fn void(order_holders: Vec<HolderId>) -> Self {
        Self {
            order_holders,
            ..Default::default()
        }
    }
}
