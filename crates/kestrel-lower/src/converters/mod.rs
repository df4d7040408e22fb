//! Node converters, one module per target kernel family.

pub mod aicpu;
pub mod cmo;
pub mod dvpp;
pub mod float_status;
pub mod host_cpu;
pub mod reshape;
pub mod sequence;
pub mod shape;

use kestrel_core::NodeCtx;

use crate::context::{LowerInput, LoweringContext};
use crate::holder::{DevMemValue, HolderId, HolderOutput};
use crate::registry::ConverterRegistry;
use crate::{Error, Result};

/// Register every built-in converter.
pub fn register_all(registry: &mut ConverterRegistry) {
    aicpu::register(registry);
    host_cpu::register(registry);
    reshape::register(registry);
    shape::register(registry);
    sequence::register(registry);
    cmo::register(registry);
    dvpp::register(registry);
    float_status::register(registry);
}

/// Check that `input` carries one shape and one address per node input.
pub(crate) fn check_inputs(node: &NodeCtx<'_>, input: &LowerInput<'_>) -> Result<()> {
    let expected = node.input_count();
    if input.input_shapes.len() != expected || input.input_addrs.len() != expected {
        return Err(Error::invalid_input(
            node,
            format!(
                "expected {expected} inputs, got {} shapes and {} addresses",
                input.input_shapes.len(),
                input.input_addrs.len()
            ),
        ));
    }
    Ok(())
}

/// Check the node's input count lies in `min..=max`.
pub(crate) fn check_arity(node: &NodeCtx<'_>, min: usize, max: usize) -> Result<()> {
    let n = node.input_count();
    if n < min || n > max {
        return Err(Error::invalid_input(
            node,
            format!("expected {min}..={max} inputs, got {n}"),
        ));
    }
    Ok(())
}

/// Delay the release of every value until `last` has run.
pub(crate) fn release_all<'v>(
    ctx: &mut LoweringContext,
    values: impl IntoIterator<Item = &'v DevMemValue>,
    last: HolderId,
) -> Result<()> {
    for value in values {
        ctx.graph.release_after(value.value, last)?;
    }
    Ok(())
}

/// `count` consecutive outputs of `holder` starting at `offset`.
pub(crate) fn outputs_of(holder: HolderId, offset: usize, count: usize) -> Vec<HolderOutput> {
    (offset..offset + count)
        .map(|i| HolderOutput::new(holder, i))
        .collect()
}
