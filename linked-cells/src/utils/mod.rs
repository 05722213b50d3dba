//! Small helpers shared by the grid and the traversals

mod index;

pub use index::*;
