//! Kernels the constant-folding pass evaluates nodes with.

use crate::operator::Operator;
use std::collections::HashMap;

/// Folding kernels keyed by IR op type.
///
/// Lookup matches the op type exactly. Nodes whose op type has no kernel
/// stay in the graph for lowering. Registering an op type again replaces
/// the earlier kernel.
pub struct OperatorRegistry {
    kernels: HashMap<String, Box<dyn Operator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self {
            kernels: HashMap::new(),
        }
    }

    pub fn register<O>(&mut self, op_type: &str, operator: O) -> &mut Self
    where
        O: Operator + 'static,
    {
        if self
            .kernels
            .insert(op_type.to_string(), Box::new(operator))
            .is_some()
        {
            tracing::debug!(op_type, "folding kernel replaced");
        }
        self
    }

    /// Kernel folding nodes of `op_type`, if any.
    pub fn lookup(&self, op_type: &str) -> Option<&dyn Operator> {
        self.kernels.get(op_type).map(|op| op.as_ref())
    }

    /// Op types with a kernel, sorted.
    pub fn op_types(&self) -> Vec<&str> {
        let mut op_types: Vec<&str> = self.kernels.keys().map(String::as_str).collect();
        op_types.sort_unstable();
        op_types
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
