//! Cell processors shipped with the crate

mod lennard_jones;

pub use lennard_jones::*;
