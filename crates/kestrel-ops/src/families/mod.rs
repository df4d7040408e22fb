//! Operator families sharing one implementation across several op types.

mod binary_elementwise;

pub use binary_elementwise::BinaryElementwiseOp;
