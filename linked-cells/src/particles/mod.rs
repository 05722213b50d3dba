//! Particle state and its wire representation

mod buffer;
mod particle;

pub use buffer::*;
pub use particle::*;
