//! Everything that crosses process boundaries

mod backend;
mod decomposition;
mod halo;

pub use backend::*;
pub use decomposition::*;
pub use halo::*;
