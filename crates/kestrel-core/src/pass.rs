//! Graph pass trait and stage definitions.

use crate::Result;
use crate::ir::IrGraph;
use crate::registry::OperatorRegistry;

/// Stage a graph pass belongs to.
///
/// Passes are grouped into stages and run in a fixed order. Within each stage,
/// passes run in the order they were registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Constant folding (evaluate operations at compile time).
    ///
    /// Passes in this stage call `Operator::compute()` for nodes where all
    /// inputs are known constants, replacing the node's output with the value.
    Folding,

    /// Graph rewriting on the op-level graph before lowering.
    Optimization,
}

/// Trait for implementing graph passes.
///
/// `run()` returns `Ok(true)` if the pass made changes to the graph, so the
/// pipeline can detect a fixed point.
pub trait Pass: Send + Sync {
    /// Get the pass name (used for logging and debugging).
    fn name(&self) -> &str;

    /// Get the stage this pass belongs to.
    fn stage(&self) -> Stage;

    /// Run the pass on the given graph.
    fn run(&self, graph: &mut IrGraph, registry: &OperatorRegistry) -> Result<bool>;
}

/// Run `passes` sorted by stage, returning whether any of them changed the graph.
pub fn run_passes(
    passes: &[Box<dyn Pass>],
    graph: &mut IrGraph,
    registry: &OperatorRegistry,
) -> Result<bool> {
    let mut ordered: Vec<&dyn Pass> = passes.iter().map(|p| p.as_ref()).collect();
    ordered.sort_by_key(|p| p.stage());

    let mut changed = false;
    for pass in ordered {
        let _span = tracing::debug_span!("pass", name = pass.name()).entered();
        let pass_changed = pass.run(graph, registry)?;
        tracing::debug!(changed = pass_changed, "pass finished");
        changed |= pass_changed;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct NoOpPass;

    impl Pass for NoOpPass {
        fn name(&self) -> &str {
            "noop"
        }

        fn stage(&self) -> Stage {
            Stage::Optimization
        }

        fn run(&self, _graph: &mut IrGraph, _registry: &OperatorRegistry) -> Result<bool> {
            Ok(false)
        }
    }

    struct RecordingPass {
        name: &'static str,
        stage: Stage,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Pass for RecordingPass {
        fn name(&self) -> &str {
            self.name
        }

        fn stage(&self) -> Stage {
            self.stage
        }

        fn run(&self, _graph: &mut IrGraph, _registry: &OperatorRegistry) -> Result<bool> {
            self.log.lock().unwrap().push(self.name);
            Ok(true)
        }
    }

    #[test]
    fn test_pass_trait() {
        let pass: Box<dyn Pass> = Box::new(NoOpPass);
        assert_eq!(pass.name(), "noop");
        assert_eq!(pass.stage(), Stage::Optimization);
    }

    #[test]
    fn test_stage_ordering() {
        assert!(Stage::Folding < Stage::Optimization);
    }

    #[test]
    fn test_run_passes_in_stage_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let passes: Vec<Box<dyn Pass>> = vec![
            Box::new(RecordingPass {
                name: "rewrite",
                stage: Stage::Optimization,
                log: log.clone(),
            }),
            Box::new(NoOpPass),
            Box::new(RecordingPass {
                name: "fold",
                stage: Stage::Folding,
                log: log.clone(),
            }),
        ];
        let mut graph = IrGraph::new();
        let changed = run_passes(&passes, &mut graph, &OperatorRegistry::new()).unwrap();
        assert!(changed);
        assert_eq!(*log.lock().unwrap(), vec!["fold", "rewrite"]);
    }
}
