//! Per-tick input integration: direction flags, camera state, the movement
//! force handed to physics, and the flying-roll effect.

pub mod target;

use serde::{Deserialize, Serialize};

use crate::controls::flags::{impulse_of, ControlFlags, DIRECTION_IMPULSES};
use crate::geo::{self, Quat, Vec3};

pub use target::{MoveStep, MoveToTarget};

/// Post-rotation scale applied to every movement vector.
pub const MOVEMENT_SCALE: f32 = 0.03 * 128.0;

/// Camera ray-casts run on every Nth processed agent update.
pub const NUM_MOVEMENTS_BETWEEN_RAYCAST: u32 = 5;

/// How many consecutive ticks the grounded state is asserted to the physics
/// engine after landing from a move-to-target flight.
pub const LANDING_COLLIDING_ASSERTS: u8 = 5;

const FOLLOW_CAM_UP_Z: f32 = 0.97;
const FOLLOW_CAM_UP_TOLERANCE: f32 = 0.01;
const FOLLOW_CAM_LOOK_TOLERANCE: f32 = 0.4;

const FALL_BRAKE_SENTINEL: f32 = -9999.0;
const FLYING_SPEED_FACTOR: f32 = 4.0;
const JUMP_THRESHOLD: f32 = 2.0;
const JUMP_BOOST: f32 = 2.6;

const FLY_ROLL_MAX: f32 = 1.1;
const FLY_ROLL_PER_TICK: f32 = 0.06;
const FLY_ROLL_RESET_PER_TICK: f32 = 0.02;
// Climbing resists the roll, diving leans into it.
const FLY_ROLL_UP_ADJUST: f32 = 0.04;
const FLY_ROLL_DOWN_ADJUST: f32 = 0.02;

/// Fallback position when a presence has never had a finite one.
pub fn region_center() -> Vec3 {
    Vec3::new(127.0, 127.0, 127.0)
}

/// One agent update as decoded off the wire.
#[derive(Clone, Debug)]
pub struct AgentUpdateInput {
    pub control_flags: ControlFlags,
    pub body_rotation: Quat,
    pub head_rotation: Quat,
    pub camera_position: Vec3,
    pub camera_at_axis: Vec3,
    pub camera_left_axis: Vec3,
    pub camera_up_axis: Vec3,
    pub draw_distance: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct CameraState {
    pub position: Vec3,
    pub at_axis: Vec3,
    pub left_axis: Vec3,
    pub up_axis: Vec3,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            at_axis: Vec3::new(1.0, 0.0, 0.0),
            left_axis: Vec3::new(0.0, 1.0, 0.0),
            up_axis: Vec3::new(0.0, 0.0, 1.0),
        }
    }
}

/// Pose and motion of the presence. Position and body rotation are region
/// absolute while standing and seat relative while sitting.
#[derive(Clone, Debug)]
pub struct Kinematics {
    pub position: Vec3,
    pub body_rotation: Quat,
    pub head_rotation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub camera: CameraState,
    pub draw_distance: f32,
}

impl Default for Kinematics {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            body_rotation: Quat::identity(),
            head_rotation: Quat::identity(),
            velocity: Vec3::zeros(),
            angular_velocity: Vec3::zeros(),
            camera: CameraState::default(),
            draw_distance: 255.0,
        }
    }
}

/// Animation bookkeeping carried for clients and hand-off; the names are
/// opaque to the core apart from the movement state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationState {
    pub animations: Vec<String>,
    pub default_animation: String,
    pub implicit_default: String,
    pub movement_state: String,
}

impl Default for AnimationState {
    fn default() -> Self {
        Self {
            animations: Vec::new(),
            default_animation: "STAND".to_string(),
            implicit_default: "STAND".to_string(),
            movement_state: "STAND".to_string(),
        }
    }
}

impl AnimationState {
    pub fn is_falling(&self) -> bool {
        self.movement_state == "FALLDOWN"
    }

    pub fn is_hovering(&self) -> bool {
        self.movement_state.starts_with("HOVER")
    }

    pub fn set_movement(&mut self, name: &str) {
        self.movement_state = name.to_string();
        self.default_animation = name.to_string();
    }
}

/// Mutable motion-controller state for one presence.
#[derive(Debug)]
pub struct MotionState {
    pub kinematics: Kinematics,
    pub animation: AnimationState,

    /// Direction bits currently held down, after script masking.
    pub movement_flags: ControlFlags,
    /// Flags exactly as the client sent them, before script masking.
    pub raw_control_flags: ControlFlags,
    pub stop_active: bool,

    pub speed_modifier: f32,
    pub always_run: bool,
    pub mouselook: bool,

    pub force_fly: bool,
    pub fly_disabled: bool,

    pub move_to_target: Option<MoveToTarget>,
    /// Grounded-state asserts still owed to physics after a landing.
    pub landing_asserts_left: u8,

    /// Movement force computed this update, consumed by the next physics
    /// tick.
    pub force_to_apply: Option<Vec3>,

    update_count: u32,
    pub cam_raycast_in_flight: bool,
    pub follow_cam_auto: bool,

    last_finite_position: Option<Vec3>,
}

impl MotionState {
    pub fn new() -> Self {
        Self {
            kinematics: Kinematics::default(),
            animation: AnimationState::default(),
            movement_flags: ControlFlags::empty(),
            raw_control_flags: ControlFlags::empty(),
            stop_active: false,
            speed_modifier: 1.0,
            always_run: false,
            mouselook: false,
            force_fly: false,
            fly_disabled: false,
            move_to_target: None,
            landing_asserts_left: 0,
            force_to_apply: None,
            update_count: 0,
            cam_raycast_in_flight: false,
            follow_cam_auto: false,
            last_finite_position: None,
        }
    }

    /// Remember the current position if it is finite; returns the position
    /// to self-heal to when it is not.
    pub fn note_position(&mut self) -> Option<Vec3> {
        if geo::is_finite(&self.kinematics.position) {
            self.last_finite_position = Some(self.kinematics.position);
            None
        } else {
            Some(self.last_finite_position.unwrap_or_else(region_center))
        }
    }

    /// Camera, draw distance (caller pre-clamps), and the follow-cam
    /// heuristic.
    pub fn update_camera(&mut self, input: &AgentUpdateInput, draw_distance: f32) {
        self.kinematics.camera = CameraState {
            position: input.camera_position,
            at_axis: input.camera_at_axis,
            left_axis: input.camera_left_axis,
            up_axis: input.camera_up_axis,
        };
        self.kinematics.draw_distance = draw_distance;

        let level_up = (input.camera_up_axis.z - FOLLOW_CAM_UP_Z).abs() < FOLLOW_CAM_UP_TOLERANCE;
        let look = input.camera_at_axis;
        let body_forward = input.body_rotation.transform_vector(&Vec3::new(1.0, 0.0, 0.0));
        let aligned = (look.x - body_forward.x).abs() < FOLLOW_CAM_LOOK_TOLERANCE
            && (look.y - body_forward.y).abs() < FOLLOW_CAM_LOOK_TOLERANCE;
        self.follow_cam_auto = level_up && aligned;
    }

    /// Gate for the periodic camera ray-cast.
    pub fn should_cam_raycast(&mut self, sitting: bool) -> bool {
        self.update_count = self.update_count.wrapping_add(1);
        if self.update_count % NUM_MOVEMENTS_BETWEEN_RAYCAST != 0 {
            return false;
        }
        if self.mouselook || sitting || self.cam_raycast_in_flight {
            return false;
        }
        self.cam_raycast_in_flight = true;
        true
    }

    /// Resolve the effective flying state from the override precedence.
    pub fn resolve_flying(&self, client_fly: bool) -> bool {
        if self.force_fly {
            true
        } else if self.fly_disabled {
            false
        } else {
            client_fly
        }
    }

    /// Diff the twelve direction bits against the held set, accumulating
    /// impulses for newly and still-held bits. Returns the control vector
    /// and whether anything changed.
    pub fn update_direction_flags(&mut self, masked: ControlFlags) -> (Vec3, bool) {
        let mut control = Vec3::zeros();
        let mut changed = false;

        for (bit, _) in DIRECTION_IMPULSES.iter() {
            let down = masked.contains(*bit);
            let was_down = self.movement_flags.contains(*bit);
            if down {
                control += impulse_of(*bit);
                if !was_down {
                    self.movement_flags |= *bit;
                    changed = true;
                }
            } else if was_down {
                self.movement_flags.remove(*bit);
                changed = true;
            }
        }
        (control, changed)
    }

    /// Edge-detect the agent-control stop bit. Returns true on a
    /// transition.
    pub fn update_stop_state(&mut self, masked: ControlFlags) -> bool {
        let down = masked.contains(ControlFlags::STOP);
        if down != self.stop_active {
            self.stop_active = down;
            true
        } else {
            false
        }
    }

    /// Accumulate flying roll from yaw-with-turn input; climbing shallows
    /// the per-tick amount and diving deepens it.
    pub fn apply_flying_roll(&mut self, direction: f32, pressing_up: bool, pressing_down: bool) {
        let mut amount = FLY_ROLL_PER_TICK;
        if pressing_up {
            amount -= FLY_ROLL_UP_ADJUST;
        }
        if pressing_down {
            amount += FLY_ROLL_DOWN_ADJUST;
        }
        let z = self.kinematics.angular_velocity.z + direction * amount;
        self.kinematics.angular_velocity.z = z.clamp(-FLY_ROLL_MAX, FLY_ROLL_MAX);
    }

    /// Relax the roll toward level when no turn input is held.
    pub fn relax_flying_roll(&mut self) {
        let z = self.kinematics.angular_velocity.z;
        if z.abs() <= FLY_ROLL_RESET_PER_TICK {
            self.kinematics.angular_velocity.z = 0.0;
        } else {
            self.kinematics.angular_velocity.z = z - z.signum() * FLY_ROLL_RESET_PER_TICK;
        }
    }

    /// Turn the tick's control vector into the force the physics tick will
    /// consume.
    pub fn add_new_movement(
        &mut self,
        vec: Vec3,
        scale: f32,
        braking: bool,
        flying: bool,
        colliding: bool,
        colliding_down: bool,
    ) {
        let mut direc = self.kinematics.body_rotation.transform_vector(&vec);

        // In mouselook a level input must not climb the avatar.
        if self.mouselook && vec.z == 0.0 {
            direc.z = 0.0;
        }

        direc *= MOVEMENT_SCALE * self.speed_modifier * scale;

        if self.animation.is_falling() && !self.animation.is_hovering() {
            if braking {
                direc = Vec3::new(direc.x, direc.y, FALL_BRAKE_SENTINEL);
            } else {
                direc = Vec3::zeros();
            }
        } else if flying {
            if colliding_down {
                direc = Vec3::zeros();
            } else {
                direc *= FLYING_SPEED_FACTOR;
            }
        } else if colliding && direc.z > JUMP_THRESHOLD {
            direc.z *= JUMP_BOOST;
        }

        self.force_to_apply = Some(direc);
    }

    /// The force computed by the last update, cleared for the next tick.
    pub fn take_force(&mut self) -> Option<Vec3> {
        self.force_to_apply.take()
    }

    /// Zero everything movement related; used on demotion to child.
    pub fn reset_movement(&mut self) {
        self.movement_flags = ControlFlags::empty();
        self.raw_control_flags = ControlFlags::empty();
        self.stop_active = false;
        self.move_to_target = None;
        self.force_to_apply = None;
        self.landing_asserts_left = 0;
        self.kinematics.velocity = Vec3::zeros();
        self.kinematics.angular_velocity = Vec3::zeros();
    }
}

impl Default for MotionState {
    fn default() -> Self {
        Self::new()
    }
}
