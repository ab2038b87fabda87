//! Keplerian orbits: element sets, the two-body solver and the per-tick
//! propagation pass

mod elements;
mod solver;
mod system;

pub use elements::{wrap_angle, ElementsError, OrbitalElements};
pub use solver::{KeplerSolution, KeplerSolver, OrbitalState};
pub use system::{update_orbits_system, OrbitReport};
