//! Linked-cell engine for short-range particle simulations
//!
//! The crate buckets particles into a regular grid of cells surrounded by a
//! halo layer, moves particles across process boundaries and refreshes halo
//! copies through a pluggable communication backend, and enumerates
//! interacting cell pairs with one of several traversal strategies.

pub mod config;
pub mod grid;
pub mod parallel;
pub mod particles;
pub mod processors;
pub mod simulation;
pub mod traversal;
pub mod utils;

pub use config::*;
pub use grid::{Cell, CellRegion, Face, GridGeometry, IterateType, NeighborOffsetTable, SpatialGrid};
pub use parallel::{CommunicationBackend, DomainDecomposition, HaloExchange, LocalCluster, SingleProcess};
pub use particles::{Particle, ParticleBuffer};
pub use processors::LennardJonesProcessor;
pub use simulation::{Simulation, SimulationBuilder};
pub use traversal::{CellPairTraversal, CellProcessor, TraversalTuner};
