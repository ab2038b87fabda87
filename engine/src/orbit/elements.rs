//! Keplerian element sets

use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// Below this an orbit is treated as circular / equatorial when converting
/// from a state vector.
const DEGENERACY_TOLERANCE: f64 = 1e-11;

/// Errors describing an element set or state vector that cannot be propagated
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ElementsError {
    #[error("{0} is not finite")]
    NonFinite(&'static str),

    #[error("eccentricity {0} is outside [0, 1)")]
    Eccentricity(f64),

    #[error("semi-major axis {0} km is not positive")]
    SemiMajorAxis(f64),

    #[error("gravitational parameter {0} is not positive")]
    GravitationalParameter(f64),

    #[error("state is not bound to its reference body (eccentricity {0})")]
    Unbound(f64),

    #[error("state vector is degenerate (zero radius or purely radial motion)")]
    Degenerate,
}

/// Classical orbital elements relative to a reference body.
///
/// The reference plane is the x-y plane of the true-space frame; +z is the
/// pole. The mean anomaly is given at `epoch` (simulation seconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbitalElements {
    /// Semi-major axis (km)
    pub semi_major_axis: f64,
    /// Eccentricity (dimensionless)
    pub eccentricity: f64,
    /// Inclination (radians)
    pub inclination: f64,
    /// Longitude of the ascending node (radians)
    pub longitude_of_ascending_node: f64,
    /// Argument of periapsis (radians)
    pub argument_of_periapsis: f64,
    /// Mean anomaly at epoch (radians)
    pub mean_anomaly: f64,
    /// Epoch of `mean_anomaly` (simulation seconds)
    #[serde(default)]
    pub epoch: f64,
}

impl OrbitalElements {
    /// Circular, equatorial orbit starting at the +x axis at epoch 0
    pub fn circular(semi_major_axis: f64) -> Self {
        Self {
            semi_major_axis,
            eccentricity: 0.0,
            inclination: 0.0,
            longitude_of_ascending_node: 0.0,
            argument_of_periapsis: 0.0,
            mean_anomaly: 0.0,
            epoch: 0.0,
        }
    }

    pub fn with_eccentricity(mut self, eccentricity: f64) -> Self {
        self.eccentricity = eccentricity;
        self
    }

    pub fn with_inclination(mut self, inclination: f64) -> Self {
        self.inclination = inclination;
        self
    }

    pub fn with_ascending_node(mut self, longitude: f64) -> Self {
        self.longitude_of_ascending_node = longitude;
        self
    }

    pub fn with_argument_of_periapsis(mut self, argument: f64) -> Self {
        self.argument_of_periapsis = argument;
        self
    }

    pub fn with_mean_anomaly(mut self, mean_anomaly: f64, epoch: f64) -> Self {
        self.mean_anomaly = mean_anomaly;
        self.epoch = epoch;
        self
    }

    /// Reject element sets the elliptical solver cannot handle.
    ///
    /// Parabolic and hyperbolic sets belong to data authoring, not runtime.
    pub fn validate(&self) -> Result<(), ElementsError> {
        let fields = [
            (self.semi_major_axis, "semi-major axis"),
            (self.eccentricity, "eccentricity"),
            (self.inclination, "inclination"),
            (self.longitude_of_ascending_node, "longitude of ascending node"),
            (self.argument_of_periapsis, "argument of periapsis"),
            (self.mean_anomaly, "mean anomaly"),
            (self.epoch, "epoch"),
        ];
        for (value, name) in fields {
            if !value.is_finite() {
                return Err(ElementsError::NonFinite(name));
            }
        }
        if !(0.0..1.0).contains(&self.eccentricity) {
            return Err(ElementsError::Eccentricity(self.eccentricity));
        }
        if self.semi_major_axis <= 0.0 {
            return Err(ElementsError::SemiMajorAxis(self.semi_major_axis));
        }
        Ok(())
    }

    /// Semi-latus rectum (km)
    pub fn semi_latus_rectum(&self) -> f64 {
        self.semi_major_axis * (1.0 - self.eccentricity * self.eccentricity)
    }

    pub fn periapsis_radius(&self) -> f64 {
        self.semi_major_axis * (1.0 - self.eccentricity)
    }

    pub fn apoapsis_radius(&self) -> f64 {
        self.semi_major_axis * (1.0 + self.eccentricity)
    }

    /// Mean motion (rad/s) about a body with gravitational parameter `mu`
    pub fn mean_motion(&self, mu: f64) -> f64 {
        (mu / self.semi_major_axis.powi(3)).sqrt()
    }

    /// Orbital period (s)
    pub fn period(&self, mu: f64) -> f64 {
        TAU / self.mean_motion(mu)
    }

    /// Mean anomaly at `time`, wrapped to [-pi, pi)
    pub fn mean_anomaly_at(&self, time: f64, mu: f64) -> f64 {
        wrap_angle(self.mean_anomaly + self.mean_motion(mu) * (time - self.epoch))
    }

    /// Derive elements from a state relative to the reference body.
    ///
    /// Circular orbits get an argument of periapsis of zero and measure the
    /// anomaly from the ascending node; equatorial orbits get a longitude of
    /// ascending node of zero and measure from +x.
    pub fn from_state(
        position: DVec3,
        velocity: DVec3,
        mu: f64,
        epoch: f64,
    ) -> Result<Self, ElementsError> {
        if !position.is_finite() {
            return Err(ElementsError::NonFinite("position"));
        }
        if !velocity.is_finite() {
            return Err(ElementsError::NonFinite("velocity"));
        }
        if !(mu > 0.0 && mu.is_finite()) {
            return Err(ElementsError::GravitationalParameter(mu));
        }

        let r = position.length();
        let v2 = velocity.length_squared();
        let h = position.cross(velocity);
        let h_norm = h.length();
        if r <= f64::EPSILON || h_norm <= DEGENERACY_TOLERANCE * r * velocity.length().max(1.0) {
            return Err(ElementsError::Degenerate);
        }

        let energy = v2 / 2.0 - mu / r;
        let e_vec = ((v2 - mu / r) * position - position.dot(velocity) * velocity) / mu;
        let e = e_vec.length();
        if energy >= 0.0 || e >= 1.0 {
            return Err(ElementsError::Unbound(e));
        }

        let a = -mu / (2.0 * energy);
        let h_hat = h / h_norm;
        let inclination = h_hat.z.clamp(-1.0, 1.0).acos();

        let node = DVec3::Z.cross(h);
        let node_norm = node.length();
        let circular = e < DEGENERACY_TOLERANCE;
        let equatorial = node_norm < DEGENERACY_TOLERANCE * h_norm;
        // Retrograde equatorial orbits have their in-plane axes mirrored
        let handedness = if h.z < 0.0 { -1.0 } else { 1.0 };

        let (lan, argpe, true_anomaly) = match (equatorial, circular) {
            (false, false) => {
                let n_hat = node / node_norm;
                let lan = node.y.atan2(node.x);
                let argpe = h_hat.dot(n_hat.cross(e_vec)).atan2(n_hat.dot(e_vec));
                let ta = h_hat.dot(e_vec.cross(position)).atan2(e_vec.dot(position));
                (lan, argpe, ta)
            }
            (true, false) => {
                // Longitude of periapsis stands in for the argument
                let argpe = (handedness * e_vec.y).atan2(e_vec.x);
                let ta = h_hat.dot(e_vec.cross(position)).atan2(e_vec.dot(position));
                (0.0, argpe, ta)
            }
            (false, true) => {
                // Argument of latitude stands in for the true anomaly
                let n_hat = node / node_norm;
                let lan = node.y.atan2(node.x);
                let u = h_hat.dot(n_hat.cross(position)).atan2(n_hat.dot(position));
                (lan, 0.0, u)
            }
            (true, true) => {
                // True longitude
                let l = (handedness * position.y).atan2(position.x);
                (0.0, 0.0, l)
            }
        };

        let eccentric_anomaly =
            ((1.0 - e * e).sqrt() * true_anomaly.sin()).atan2(e + true_anomaly.cos());
        let mean_anomaly = eccentric_anomaly - e * eccentric_anomaly.sin();

        Ok(Self {
            semi_major_axis: a,
            eccentricity: e,
            inclination,
            longitude_of_ascending_node: wrap_positive(lan),
            argument_of_periapsis: wrap_positive(argpe),
            mean_anomaly: wrap_angle(mean_anomaly),
            epoch,
        })
    }
}

/// Wrap an angle to [-pi, pi)
pub fn wrap_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(TAU) - PI
}

/// Wrap an angle to [0, 2pi)
fn wrap_positive(angle: f64) -> f64 {
    angle.rem_euclid(TAU)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MU_EARTH: f64 = 398_600.4418;

    #[test]
    fn test_validate() {
        assert!(OrbitalElements::circular(7000.0).validate().is_ok());
        assert_eq!(
            OrbitalElements::circular(7000.0)
                .with_eccentricity(1.2)
                .validate(),
            Err(ElementsError::Eccentricity(1.2))
        );
        assert_eq!(
            OrbitalElements::circular(-1.0).validate(),
            Err(ElementsError::SemiMajorAxis(-1.0))
        );
        assert_eq!(
            OrbitalElements::circular(7000.0)
                .with_inclination(f64::NAN)
                .validate(),
            Err(ElementsError::NonFinite("inclination"))
        );
    }

    #[test]
    fn test_period_leo() {
        // ~92.6 minutes for a 400 km orbit
        let elements = OrbitalElements::circular(6778.0);
        let period = elements.period(MU_EARTH);
        assert!((period / 60.0 - 92.56).abs() < 0.5, "period {period}");
    }

    #[test]
    fn test_from_state_circular_equatorial() {
        let r = 7000.0;
        let v = (MU_EARTH / r).sqrt();
        let elements =
            OrbitalElements::from_state(DVec3::new(0.0, r, 0.0), DVec3::new(-v, 0.0, 0.0), MU_EARTH, 5.0)
                .unwrap();

        assert!((elements.semi_major_axis - r).abs() < 1e-6);
        assert!(elements.eccentricity < 1e-9);
        assert!(elements.inclination.abs() < 1e-12);
        // Quarter of the way round from +x
        assert!((elements.mean_anomaly - PI / 2.0).abs() < 1e-9);
        assert_eq!(elements.epoch, 5.0);
    }

    #[test]
    fn test_from_state_inclined_eccentric() {
        // Periapsis state of an inclined ellipse
        let rp = 7000.0;
        let e = 0.3;
        let a = rp / (1.0 - e);
        let vp = (MU_EARTH * (2.0 / rp - 1.0 / a)).sqrt();
        let incl = 0.5_f64;
        let position = DVec3::new(rp, 0.0, 0.0);
        let velocity = DVec3::new(0.0, vp * incl.cos(), vp * incl.sin());

        let elements = OrbitalElements::from_state(position, velocity, MU_EARTH, 0.0).unwrap();
        assert!((elements.semi_major_axis - a).abs() < 1e-6);
        assert!((elements.eccentricity - e).abs() < 1e-9);
        assert!((elements.inclination - incl).abs() < 1e-12);
        assert!(elements.mean_anomaly.abs() < 1e-9);
    }

    #[test]
    fn test_from_state_rejects_unbound() {
        let r = 7000.0;
        let escape = (2.0 * MU_EARTH / r).sqrt();
        let result = OrbitalElements::from_state(
            DVec3::new(r, 0.0, 0.0),
            DVec3::new(0.0, escape * 1.1, 0.0),
            MU_EARTH,
            0.0,
        );
        assert!(matches!(result, Err(ElementsError::Unbound(_))));
    }

    #[test]
    fn test_from_state_rejects_radial() {
        let result = OrbitalElements::from_state(
            DVec3::new(7000.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            MU_EARTH,
            0.0,
        );
        assert_eq!(result, Err(ElementsError::Degenerate));
    }

    #[test]
    fn test_wrap_angle() {
        assert!((wrap_angle(3.0 * PI) - (-PI)).abs() < 1e-12);
        assert!((wrap_angle(-0.5) + 0.5).abs() < 1e-15);
        assert!((wrap_angle(TAU + 0.25) - 0.25).abs() < 1e-12);
    }
}
