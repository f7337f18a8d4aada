//! Generic cache primitives shared by the terminal grid.

pub mod terminal;

/// Monotonic sequence number used for conflict resolution between cell writes.
pub type Seq = u64;
