//! Individual operator implementations.

mod shape;

pub use shape::{ReshapeOp, SqueezeOp, UnsqueezeOp};
