//! Move-to-target: autopilot toward a point until within tolerance.

use crate::controls::flags::ControlFlags;
use crate::geo::{self, Vec3};

use super::{MotionState, LANDING_COLLIDING_ASSERTS};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MoveToTarget {
    pub target: Vec3,
    pub tolerance: f32,
    pub land_at_target: bool,
}

/// Outcome of one move-to-target step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MoveStep {
    /// No move in progress.
    Inactive,
    /// Arrived: position snapped, velocity zeroed, move cleared. `land`
    /// asks the caller to stop flying and assert the grounded state.
    Arrived { land: bool },
    /// Still under way; add the returned avatar-frame delta to the control
    /// vector.
    Updated(Vec3),
}

impl MotionState {
    pub fn start_move_to_target(&mut self, target: Vec3, tolerance: f32, land_at_target: bool) {
        self.move_to_target = Some(MoveToTarget {
            target,
            tolerance,
            land_at_target,
        });
    }

    /// Cancel an active move and release the direction bits it was driving.
    pub fn cancel_move_to_target(&mut self) {
        if self.move_to_target.take().is_some() {
            self.movement_flags.remove(ControlFlags::DIRECTIONS);
        }
    }

    /// Advance the active move by one tick.
    pub fn step_move_to_target(&mut self, flying: bool) -> MoveStep {
        let Some(move_to) = self.move_to_target else {
            return MoveStep::Inactive;
        };

        let delta = move_to.target - self.kinematics.position;
        // Airborne moves measure in 3D; walking and landing moves only care
        // about surface distance.
        let distance = if flying && !move_to.land_at_target {
            delta.norm()
        } else {
            geo::horizontal(&delta).norm()
        };

        if distance <= move_to.tolerance {
            self.kinematics.position = move_to.target;
            self.kinematics.velocity = Vec3::zeros();
            let land = move_to.land_at_target && flying;
            if land {
                self.landing_asserts_left = LANDING_COLLIDING_ASSERTS;
            }
            self.move_to_target = None;
            self.movement_flags.remove(ControlFlags::DIRECTIONS);
            return MoveStep::Arrived { land };
        }

        let local = self
            .kinematics
            .body_rotation
            .inverse_transform_vector(&delta);
        let direction = geo::normalize_or(&local, Vec3::new(1.0, 0.0, 0.0));

        self.movement_flags.remove(ControlFlags::DIRECTIONS);
        if direction.x.abs() > f32::EPSILON {
            self.movement_flags |= if direction.x > 0.0 {
                ControlFlags::AT_POS
            } else {
                ControlFlags::AT_NEG
            };
        }
        if direction.y.abs() > f32::EPSILON {
            self.movement_flags |= if direction.y > 0.0 {
                ControlFlags::LEFT_POS
            } else {
                ControlFlags::LEFT_NEG
            };
        }

        MoveStep::Updated(local)
    }
}
