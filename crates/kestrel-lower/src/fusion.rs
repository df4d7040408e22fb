//! Passes over the finished lowering graph.

use crate::context::LoweringContext;
use crate::holder::{ConstValue, HolderId, HolderOutput};
use crate::kernel_names as names;
use crate::{Error, Result};

/// A rewrite of the lowering graph run after every node is lowered.
///
/// `run()` returns `Ok(true)` if the pass changed the graph.
pub trait LoweringPass: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, ctx: &mut LoweringContext) -> Result<bool>;
}

/// Passes [`crate::lower_graph`] runs by default, in order.
pub fn default_passes() -> Vec<Box<dyn LoweringPass>> {
    vec![Box::new(HostInputsFusionPass::new())]
}

/// Inputs of an `EnsureTensorAtDevice` holder before its `(addr, size)` pair.
const ENSURE_PREFIX_LEN: usize = 2;

/// Fuses the host-to-device copies feeding one `UpdateAicpuIoAddr` into a
/// single `FusedEnsureTensorsAtDevice` holder.
///
/// Only runs in single-op mode. A copy qualifies when nothing but the update
/// and its own release guarder reads it, and when it shares the allocator and
/// stream of the other copies. At least two copies must qualify.
///
/// The fused holder takes `[allocator, stream, index, (addr, size)...]`,
/// where `index[k]` is the update slot fused output `k` feeds.
#[derive(Debug, Default)]
pub struct HostInputsFusionPass;

struct Candidate {
    holder: HolderId,
    slot: usize,
    addr: HolderOutput,
    size: HolderOutput,
}

impl HostInputsFusionPass {
    pub fn new() -> Self {
        Self
    }

    fn candidates(
        &self,
        ctx: &LoweringContext,
        update: HolderId,
    ) -> Result<(Vec<Candidate>, Option<[HolderOutput; ENSURE_PREFIX_LEN]>)> {
        let graph = &ctx.graph;
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut prefix = None;

        for (slot, input) in graph.inputs(update).into_iter().enumerate() {
            let producer = graph.holder(input.holder)?;
            if producer.op_type != names::ENSURE_TENSOR_AT_DEVICE || producer.output_count != 1 {
                continue;
            }
            if candidates.iter().any(|c| c.holder == input.holder) {
                continue;
            }

            let mut exclusive = true;
            for (consumer, _, _) in graph.consumers(input.holder) {
                exclusive &= consumer == update
                    || graph.holder(consumer)?.op_type == names::FREE_MEMORY;
            }
            if !exclusive {
                tracing::debug!(slot, "copy has other consumers, not fused");
                continue;
            }

            let inputs = graph.inputs(input.holder);
            let [allocator, stream, addr, size] = inputs.as_slice() else {
                continue;
            };
            let own_prefix = [*allocator, *stream];
            match prefix {
                None => prefix = Some(own_prefix),
                Some(p) if p != own_prefix => continue,
                Some(_) => {}
            }
            candidates.push(Candidate {
                holder: input.holder,
                slot,
                addr: *addr,
                size: *size,
            });
        }
        Ok((candidates, prefix))
    }

    fn fuse(
        &self,
        ctx: &mut LoweringContext,
        update: HolderId,
        candidates: &[Candidate],
        prefix: [HolderOutput; ENSURE_PREFIX_LEN],
    ) -> Result<HolderId> {
        let first = ctx.graph.holder(candidates[0].holder)?;
        let (frame, placement, stream_id) = (first.frame, first.placement, first.stream_id);

        let fused = ctx.in_frame(frame, |ctx| {
            let slots = candidates.iter().map(|c| c.slot as i64).collect();
            let index = ctx.graph.add_const(ConstValue::Ints(slots));
            let mut inputs = prefix.to_vec();
            inputs.push(index);
            for c in candidates {
                inputs.push(c.addr);
                inputs.push(c.size);
            }
            let fused = ctx.graph.add_compute(
                names::FUSED_ENSURE_TENSORS_AT_DEVICE,
                &inputs,
                candidates.len(),
            )?;
            ctx.graph.set_placement(fused, placement, stream_id)?;
            Ok(fused)
        })?;

        for (k, c) in candidates.iter().enumerate() {
            ctx.graph
                .redirect_output(HolderOutput::first(c.holder), HolderOutput::new(fused, k))?;
            ctx.graph.move_control_edges(c.holder, fused)?;
            ctx.graph.remove_holder(c.holder)?;
        }

        // Fused output k must now feed update slot index[k].
        let rewired = ctx
            .graph
            .inputs(update)
            .iter()
            .enumerate()
            .filter(|(slot, input)| {
                input.holder == fused
                    && candidates.get(input.index).is_some_and(|c| c.slot == *slot)
            })
            .count();
        if rewired != candidates.len() {
            return Err(Error::FusionIndexMismatch {
                node: ctx.graph.holder(fused)?.name.clone(),
                indices: rewired,
                outputs: candidates.len(),
            });
        }
        Ok(fused)
    }
}

impl LoweringPass for HostInputsFusionPass {
    fn name(&self) -> &str {
        "host_inputs_fusion"
    }

    fn run(&self, ctx: &mut LoweringContext) -> Result<bool> {
        if !ctx.options().single_op_mode {
            return Ok(false);
        }

        let mut changed = false;
        for update in ctx.graph.holders_by_type(names::UPDATE_IO_ADDR) {
            let (candidates, prefix) = self.candidates(ctx, update)?;
            let Some(prefix) = prefix.filter(|_| candidates.len() >= 2) else {
                continue;
            };
            let fused = self.fuse(ctx, update, &candidates, prefix)?;
            tracing::debug!(
                fused = ?fused,
                count = candidates.len(),
                "fused host input copies"
            );
            changed = true;
        }
        Ok(changed)
    }
}
