//! Ship physics: world constants, thrust commands and the integrator

use serde::{Deserialize, Serialize};

use super::vector::Vec2;

/// Per-map world constants, immutable for the lifetime of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorldConfig {
    /// Constant acceleration applied to every ship
    pub gravity: Vec2,
    /// Thrust acceleration at full throttle
    pub max_thrust: f64,
    /// Velocity decay per second
    pub damping: f64,
    /// Speed cap
    pub max_speed: f64,
    /// Fastest touchdown on the goal that still counts as a landing
    pub max_landing_speed: f64,
    /// Ship footprint radius
    pub ship_radius: f64,
    /// Distance from the goal centre that counts as arrival
    pub goal_radius: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: Vec2::new(0.0, 1.62),
            max_thrust: 25.0,
            damping: 0.05,
            max_speed: 20.0,
            max_landing_speed: 3.0,
            ship_radius: 0.3,
            goal_radius: 0.5,
        }
    }
}

/// Rejected world constants
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("World constant `{0}` must be finite")]
    NotFinite(&'static str),

    #[error("World constant `{0}` must not be negative")]
    Negative(&'static str),
}

impl WorldConfig {
    pub fn validate(&self) -> Result<(), WorldError> {
        if !self.gravity.is_finite() {
            return Err(WorldError::NotFinite("gravity"));
        }

        let scalars = [
            ("maxThrust", self.max_thrust),
            ("damping", self.damping),
            ("maxSpeed", self.max_speed),
            ("maxLandingSpeed", self.max_landing_speed),
            ("shipRadius", self.ship_radius),
            ("goalRadius", self.goal_radius),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                return Err(WorldError::NotFinite(name));
            }
            if value < 0.0 {
                return Err(WorldError::Negative(name));
            }
        }
        Ok(())
    }
}

/// A thrust command: how hard and which way
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Command {
    /// 0.0 = engine off, 1.0 = full thrust
    pub throttle: f64,
    /// Thrust direction, unit length or zero
    pub dir: Vec2,
}

impl Command {
    /// Zero thrust
    pub const IDLE: Command = Command {
        throttle: 0.0,
        dir: Vec2::ZERO,
    };

    pub fn new(throttle: f64, dir: Vec2) -> Self {
        Self { throttle, dir }
    }

    /// Clamp throttle into `[0, 1]` and normalize the direction.
    /// Non-finite components collapse to zero thrust.
    pub fn sanitized(self) -> Self {
        let throttle = if self.throttle.is_finite() {
            self.throttle.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let dir = if self.dir.is_finite() {
            self.dir.normalize()
        } else {
            Vec2::ZERO
        };
        Self { throttle, dir }
    }
}

/// Physics system for advancing ship motion
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Advance one ship by `dt` seconds with semi-implicit Euler.
    /// Returns `(new_pos, new_vel)`.
    ///
    /// Damping is applied once per call as `max(0, 1 - damping * dt)`, so
    /// two calls of `dt` only match one call of `2 * dt` in velocity when
    /// damping is zero and the speed cap is not reached. Positions differ
    /// by `accel * dt^2` even then.
    pub fn integrate(
        pos: Vec2,
        vel: Vec2,
        command: Command,
        config: &WorldConfig,
        dt: f64,
    ) -> (Vec2, Vec2) {
        let command = command.sanitized();

        let thrust = command.dir * (command.throttle * config.max_thrust);
        let accel = config.gravity + thrust;

        let damp = (1.0 - config.damping * dt).max(0.0);
        let new_vel = ((vel + accel * dt) * damp).clamp_length(config.max_speed);
        let new_pos = pos + new_vel * dt;

        (new_pos, new_vel)
    }
}
