//! Two-body Kepler propagation

use super::elements::OrbitalElements;
use crate::config::SolverConfig;
use glam::DVec3;
use std::f64::consts::PI;
use tracing::trace;

/// Position and velocity relative to the reference body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitalState {
    /// Relative position (km)
    pub position: DVec3,
    /// Relative velocity (km/s)
    pub velocity: DVec3,
}

impl OrbitalState {
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite()
    }
}

/// Outcome of solving Kepler's equation for one body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeplerSolution {
    /// Eccentric anomaly (radians), the last iterate if not converged
    pub eccentric_anomaly: f64,
    /// Newton-Raphson iterations performed
    pub iterations: u32,
    /// Whether the step size dropped below tolerance within the cap
    pub converged: bool,
}

/// Kepler's equation `M = E - e sin E` and its derivative
#[derive(Debug, Clone, Copy)]
struct KeplerEquation {
    eccentricity: f64,
    mean_anomaly: f64,
}

impl KeplerEquation {
    fn root(&self, e: f64) -> f64 {
        e - self.eccentricity * e.sin() - self.mean_anomaly
    }

    fn diff(&self, e: f64) -> f64 {
        1.0 - self.eccentricity * e.cos()
    }
}

/// Elliptical two-body solver
#[derive(Debug, Clone, Copy)]
pub struct KeplerSolver {
    config: SolverConfig,
}

impl Default for KeplerSolver {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}

impl KeplerSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Clamp an eccentricity onto the elliptical path
    pub fn clamp_eccentricity(&self, eccentricity: f64) -> f64 {
        eccentricity.clamp(0.0, self.config.max_eccentricity)
    }

    /// Solve mean anomaly -> eccentric anomaly by Newton-Raphson.
    ///
    /// Stops at the iteration cap or when the step falls below tolerance,
    /// whichever comes first.
    pub fn eccentric_anomaly(&self, mean_anomaly: f64, eccentricity: f64) -> KeplerSolution {
        let equation = KeplerEquation {
            eccentricity,
            mean_anomaly,
        };

        // Starting at pi converges reliably for highly eccentric orbits
        let mut e = if eccentricity < 0.8 || mean_anomaly == 0.0 {
            mean_anomaly
        } else {
            PI.copysign(mean_anomaly)
        };

        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.config.max_iterations {
            let dx = equation.root(e) / equation.diff(e);
            e -= dx;
            iterations += 1;
            if dx.abs() < self.config.tolerance {
                converged = true;
                break;
            }
        }

        KeplerSolution {
            eccentric_anomaly: e,
            iterations,
            converged,
        }
    }

    /// State relative to the reference body at `time`.
    ///
    /// Returns `None` if the result is not finite, which only happens for
    /// element sets that should have been rejected at registration.
    pub fn state_at(
        &self,
        elements: &OrbitalElements,
        mu: f64,
        time: f64,
    ) -> Option<(OrbitalState, KeplerSolution)> {
        let ecc = self.clamp_eccentricity(elements.eccentricity);
        if ecc != elements.eccentricity {
            trace!(
                eccentricity = elements.eccentricity,
                clamped = ecc,
                "Eccentricity clamped for elliptical solver"
            );
        }
        let elements = OrbitalElements {
            eccentricity: ecc,
            ..*elements
        };

        let mean_anomaly = elements.mean_anomaly_at(time, mu);
        let solution = self.eccentric_anomaly(mean_anomaly, ecc);
        let state = perifocal_to_reference(&elements, mu, solution.eccentric_anomaly);

        state.is_finite().then_some((state, solution))
    }
}

/// Position and velocity in the reference frame for a given eccentric anomaly
fn perifocal_to_reference(elements: &OrbitalElements, mu: f64, eccentric_anomaly: f64) -> OrbitalState {
    let a = elements.semi_major_axis;
    let e = elements.eccentricity;
    let (sin_e, cos_e) = eccentric_anomaly.sin_cos();
    let root = (1.0 - e * e).sqrt();

    let true_anomaly = (root * sin_e).atan2(cos_e - e);
    let radius = a * (1.0 - e * cos_e);
    let (sin_nu, cos_nu) = true_anomaly.sin_cos();

    let p = elements.semi_latus_rectum();
    let speed = (mu / p).sqrt();

    let (p_axis, q_axis) = perifocal_axes(elements);
    let position = radius * (cos_nu * p_axis + sin_nu * q_axis);
    let velocity = speed * (-sin_nu * p_axis + (e + cos_nu) * q_axis);

    OrbitalState { position, velocity }
}

/// Perifocal P (towards periapsis) and Q axes expressed in the reference frame
fn perifocal_axes(elements: &OrbitalElements) -> (DVec3, DVec3) {
    let (sin_lan, cos_lan) = elements.longitude_of_ascending_node.sin_cos();
    let (sin_w, cos_w) = elements.argument_of_periapsis.sin_cos();
    let (sin_i, cos_i) = elements.inclination.sin_cos();

    let p_axis = DVec3::new(
        cos_lan * cos_w - sin_lan * sin_w * cos_i,
        sin_lan * cos_w + cos_lan * sin_w * cos_i,
        sin_w * sin_i,
    );
    let q_axis = DVec3::new(
        -cos_lan * sin_w - sin_lan * cos_w * cos_i,
        -sin_lan * sin_w + cos_lan * cos_w * cos_i,
        cos_w * sin_i,
    );
    (p_axis, q_axis)
}
