//! Graph passes built on the operator kernels.

mod constant_folding;

pub use constant_folding::ConstantFoldingPass;
