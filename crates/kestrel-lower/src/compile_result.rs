//! Compiled task descriptors produced by the compilation stage.

use std::collections::HashMap;

/// Argument dialect of a CPU kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelDialect {
    /// Ported kernels: session and step ids are passed inline.
    Tf,
    /// Native kernels: resolved by kernel and shared-object name.
    Cc,
}

/// Task descriptor for a CPU-class kernel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AicpuTaskDef {
    pub dialect: Option<KernelDialect>,
    pub kernel_name: String,
    pub so_name: String,
    /// Serialized argument template.
    pub args: Vec<u8>,
    /// Serialized ext-info template; empty when the kernel needs none.
    pub ext_info: Vec<u8>,
    /// Serialized task info (Tf dialect only).
    pub task_info: Vec<u8>,
    /// Serialized workspace template.
    pub workspace: Vec<u8>,
    /// Custom kernel shipped as a shared object.
    pub custom: bool,
    /// Shared-object image for custom kernels.
    pub so_bin: Vec<u8>,
    pub block_dim: u32,
}

impl AicpuTaskDef {
    pub fn tf(kernel_name: impl Into<String>) -> Self {
        Self {
            dialect: Some(KernelDialect::Tf),
            kernel_name: kernel_name.into(),
            block_dim: 1,
            ..Default::default()
        }
    }

    pub fn cc(kernel_name: impl Into<String>, so_name: impl Into<String>) -> Self {
        Self {
            dialect: Some(KernelDialect::Cc),
            kernel_name: kernel_name.into(),
            so_name: so_name.into(),
            block_dim: 1,
            ..Default::default()
        }
    }

    pub fn with_ext_info(mut self, ext_info: Vec<u8>) -> Self {
        self.ext_info = ext_info;
        self
    }

    pub fn with_args(mut self, args: Vec<u8>) -> Self {
        self.args = args;
        self
    }

    /// Mark as a custom kernel loaded from `so_bin`.
    pub fn with_custom_so(mut self, so_bin: Vec<u8>) -> Self {
        self.custom = true;
        self.so_bin = so_bin;
        self
    }

    pub fn dialect(&self) -> KernelDialect {
        self.dialect.unwrap_or(KernelDialect::Tf)
    }
}

/// Task descriptor for a media-processing kernel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DvppTaskDef {
    /// Submission queue entry template.
    pub sqe: Vec<u8>,
}

/// Task descriptor for a cache-maintenance hint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CmoTaskDef {
    pub cmo_type: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskDef {
    Aicpu(AicpuTaskDef),
    Dvpp(DvppTaskDef),
    Cmo(CmoTaskDef),
}

/// Everything compiled for one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileResult {
    pub task_defs: Vec<TaskDef>,
}

impl CompileResult {
    pub fn new(task_defs: Vec<TaskDef>) -> Self {
        Self { task_defs }
    }

    /// Result holding a single CPU-kernel task.
    pub fn aicpu(task: AicpuTaskDef) -> Self {
        Self::new(vec![TaskDef::Aicpu(task)])
    }

    pub fn aicpu_tasks(&self) -> impl Iterator<Item = &AicpuTaskDef> {
        self.task_defs.iter().filter_map(|t| match t {
            TaskDef::Aicpu(task) => Some(task),
            _ => None,
        })
    }
}

/// Compile results keyed by node name.
#[derive(Debug, Clone, Default)]
pub struct CompileResults {
    results: HashMap<String, CompileResult>,
}

impl CompileResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node_name: impl Into<String>, result: CompileResult) {
        self.results.insert(node_name.into(), result);
    }

    pub fn with(mut self, node_name: impl Into<String>, result: CompileResult) -> Self {
        self.insert(node_name, result);
        self
    }

    pub fn get(&self, node_name: &str) -> Option<&CompileResult> {
        self.results.get(node_name)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
