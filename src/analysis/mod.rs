//! The static analyses and the worklist framework shared with
//! the code generator's liveness computation.

pub mod const_fold;
pub mod definite_assignment;
pub mod fixed_point;
pub mod reachability;

pub use const_fold::{ConstValue, Constants};
pub use reachability::{Reachability, StmtFlags};
