//! Sitting on scene objects and on the ground.
//!
//! Seat resolution walks the linkset for a free declared sit target; the
//! seat pose is kept relative to the seat part so the avatar follows the
//! object when it moves.

use std::sync::Arc;

use crate::geo::{self, Quat, Vec3};
use crate::ids::{LocalId, ObjectId};
use crate::scene::{Scene, ScenePart, SitResponse, SitTarget};

pub const SIT_ANIMATION: &str = "SIT";
pub const SIT_GROUND_ANIMATION: &str = "SIT_GROUND_CONSTRAINED";
pub const STAND_ANIMATION: &str = "STAND";

/// Geometric fallback seats only work close to the clicked point.
pub const MAX_SIT_DISTANCE: f32 = 10.0;

const SIT_VERTICAL_ADJUST: f32 = 0.4;
const LEGACY_OFFSET_FACTOR: f32 = 0.05;
const MODERN_OFFSET_FACTOR: f32 = 0.02638;

const STAND_FORWARD_OFFSET: f32 = 0.75;
const STAND_VERTICAL_OFFSET: f32 = 0.3;

/// Seat linkage of a presence. A set part means "sitting".
#[derive(Clone, Debug)]
pub struct SeatState {
    parent_object: Option<ObjectId>,
    parent_part: Option<LocalId>,
    prev_sit_offset: Vec3,
    sit_on_ground: bool,
    /// Seat-relative body rotation stored for the stand restore.
    stored_rotation: Quat,
    /// Rotation declared by the sit target, when one was used.
    sit_target_rotation: Option<Quat>,
}

impl Default for SeatState {
    fn default() -> Self {
        Self {
            parent_object: None,
            parent_part: None,
            prev_sit_offset: Vec3::zeros(),
            sit_on_ground: false,
            stored_rotation: Quat::identity(),
            sit_target_rotation: None,
        }
    }
}

impl SeatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sitting(&self) -> bool {
        self.parent_part.is_some()
    }

    pub fn is_sitting_on_ground(&self) -> bool {
        self.sit_on_ground
    }

    pub fn parent_part(&self) -> Option<LocalId> {
        self.parent_part
    }

    pub fn parent_object(&self) -> Option<ObjectId> {
        self.parent_object
    }

    pub fn prev_sit_offset(&self) -> Vec3 {
        self.prev_sit_offset
    }

    pub fn set_prev_sit_offset(&mut self, offset: Vec3) {
        self.prev_sit_offset = offset;
    }

    pub fn seat_on(
        &mut self,
        object: ObjectId,
        part: LocalId,
        offset: Vec3,
        relative_rotation: Quat,
        sit_target_rotation: Option<Quat>,
    ) {
        self.parent_object = Some(object);
        self.parent_part = Some(part);
        self.prev_sit_offset = offset;
        self.stored_rotation = relative_rotation;
        self.sit_target_rotation = sit_target_rotation;
        self.sit_on_ground = false;
    }

    pub fn seat_on_ground(&mut self) {
        self.parent_object = None;
        self.parent_part = None;
        self.sit_on_ground = true;
    }

    /// Raw linkage restore during hand-off; the seat part is revalidated
    /// when the scene re-attaches the avatar.
    pub fn restore_linkage(&mut self, part: Option<LocalId>, offset: Vec3) {
        self.parent_part = part;
        self.prev_sit_offset = offset;
    }

    /// Clears the linkage, handing back what the stand needs.
    pub fn release(&mut self) -> Option<(ObjectId, LocalId, Quat)> {
        self.sit_on_ground = false;
        let object = self.parent_object.take();
        let part = self.parent_part.take();
        let rotation = self.sit_target_rotation.take().unwrap_or(self.stored_rotation);
        match (object, part) {
            (Some(object), Some(part)) => Some((object, part, rotation)),
            _ => None,
        }
    }
}

/// The computed seat, relative to the part that owns it.
#[derive(Clone, Debug)]
pub struct SitPose {
    pub part: LocalId,
    pub object: ObjectId,
    /// Avatar position relative to the seat part.
    pub offset: Vec3,
    /// Avatar rotation relative to the seat part.
    pub rotation: Quat,
    pub animation: String,
    pub used_sit_target: bool,
}

/// Pick the part actually sat on: any linked part with a free declared sit
/// target wins (clicked part first, then link order), else the clicked part
/// itself.
pub fn resolve_sit_part(scene: &dyn Scene, clicked: LocalId) -> Option<Arc<ScenePart>> {
    let clicked_part = scene.find_part(clicked)?;
    if clicked_part.sit_target_available() {
        return Some(clicked_part);
    }

    let mut linked = scene.linked_parts(clicked);
    linked.sort_by_key(|p| p.link_number());
    for part in linked {
        if part.sit_target_available() {
            return Some(part);
        }
    }
    Some(clicked_part)
}

/// Seat offset for a declared sit target.
///
/// Two formulas coexist: the legacy one scales a fixed factor by the
/// squared rotation norm, the modern one scales with avatar height. Both
/// lift the avatar by the same empirical vertical adjustment.
pub fn sit_target_offset(target: &SitTarget, legacy: bool, avatar_height: f32) -> Vec3 {
    let adjust = Vec3::new(0.0, 0.0, SIT_VERTICAL_ADJUST);
    if legacy {
        let norm_sq = target.rotation.as_ref().norm_squared();
        let up = target.rotation.transform_vector(&Vec3::new(0.0, 0.0, 1.0));
        target.offset - up * (LEGACY_OFFSET_FACTOR / norm_sq) + adjust
    } else {
        let rotation = Quat::new_normalize(*target.rotation.as_ref());
        let up = rotation.transform_vector(&Vec3::new(0.0, 0.0, 1.0));
        target.offset + up * (MODERN_OFFSET_FACTOR * avatar_height) + adjust
    }
}

/// Seat pose from a part's declared sit target.
pub fn explicit_sit_pose(part: &ScenePart, legacy: bool, avatar_height: f32) -> Option<SitPose> {
    let target = part.sit_target()?;
    Some(SitPose {
        part: part.local_id(),
        object: part.object_id(),
        offset: sit_target_offset(&target, legacy, avatar_height),
        rotation: target.rotation,
        animation: part
            .sit_animation()
            .unwrap_or_else(|| SIT_ANIMATION.to_string()),
        used_sit_target: true,
    })
}

/// Seat pose for a surface hit without a declared target. `world_seat` is
/// where the avatar would end up; callers outside `MAX_SIT_DISTANCE` are
/// refused upstream.
pub fn surface_sit_pose(part: &ScenePart, world_seat: Vec3, world_rotation: Quat) -> SitPose {
    let part_rotation = part.world_rotation();
    let offset = part_rotation.inverse_transform_vector(&(world_seat - part.world_position()));
    let rotation = part_rotation.inverse() * world_rotation;
    SitPose {
        part: part.local_id(),
        object: part.object_id(),
        offset,
        rotation,
        animation: part
            .sit_animation()
            .unwrap_or_else(|| SIT_ANIMATION.to_string()),
        used_sit_target: false,
    }
}

/// Build the client's sit response. Seats on child parts are expressed
/// through the root part's frame, which is what the viewer animates
/// against.
pub fn compose_sit_response(scene: &dyn Scene, seat: &ScenePart, pose: &SitPose) -> SitResponse {
    let (camera_at, camera_eye, force_mouselook) = seat.camera_offsets();

    let (offset, rotation) = if seat.is_root() {
        (pose.offset, pose.rotation)
    } else if let Some(root) = scene.find_part(seat.root_local_id()) {
        let world_seat = seat.world_position() + seat.world_rotation() * pose.offset;
        let root_rotation = root.world_rotation();
        let offset = root_rotation.inverse_transform_vector(&(world_seat - root.world_position()));
        let rotation = root_rotation.inverse() * seat.world_rotation() * pose.rotation;
        (offset, rotation)
    } else {
        (pose.offset, pose.rotation)
    };

    SitResponse {
        seat_object: pose.object,
        offset,
        rotation,
        camera_at_offset: camera_at,
        camera_eye_offset: camera_eye,
        force_mouselook,
    }
}

/// Where an avatar standing up from a seat lands, and its restored world
/// rotation.
pub fn stand_pose(
    seat_world_position: Vec3,
    seat_world_rotation: Quat,
    relative_rotation: Quat,
    sit_avatar_height: f32,
) -> (Vec3, Quat) {
    let planar = geo::z_plane_rotation(&seat_world_rotation);
    let extraction = Vec3::new(
        STAND_FORWARD_OFFSET,
        0.0,
        sit_avatar_height + STAND_VERTICAL_OFFSET,
    );
    let position = seat_world_position + planar.transform_vector(&extraction);
    let rotation = seat_world_rotation * relative_rotation;
    (position, rotation)
}

/// Absolute pose of a seated avatar, following the seat part.
pub fn seated_world_pose(seat: &ScenePart, offset: Vec3, relative_rotation: Quat) -> (Vec3, Quat) {
    let rotation = seat.world_rotation();
    (
        seat.world_position() + rotation * offset,
        rotation * relative_rotation,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn part_with_target(offset: Vec3) -> ScenePart {
        let part = ScenePart::new(LocalId(5), ObjectId::random(), LocalId(5), 1);
        part.set_sit_target(Some(SitTarget {
            offset,
            rotation: Quat::identity(),
        }));
        part
    }

    #[test]
    fn modern_offset_lifts_by_height_fraction() {
        let target = SitTarget {
            offset: Vec3::new(0.0, 0.0, 0.5),
            rotation: Quat::identity(),
        };
        let offset = sit_target_offset(&target, false, 1.9);
        let expected_z = 0.5 + MODERN_OFFSET_FACTOR * 1.9 + SIT_VERTICAL_ADJUST;
        assert!((offset.z - expected_z).abs() < 1e-5);
    }

    #[test]
    fn legacy_offset_subtracts_the_up_vector() {
        let target = SitTarget {
            offset: Vec3::new(0.0, 0.0, 0.5),
            rotation: Quat::identity(),
        };
        let offset = sit_target_offset(&target, true, 1.9);
        let expected_z = 0.5 - LEGACY_OFFSET_FACTOR + SIT_VERTICAL_ADJUST;
        assert!((offset.z - expected_z).abs() < 1e-5);
    }

    #[test]
    fn seated_pose_follows_part_rotation() {
        let part = part_with_target(Vec3::new(0.0, 0.0, 0.5));
        part.set_world_pose(Vec3::new(100.0, 100.0, 25.0), Quat::identity());

        let offset = Vec3::new(0.0, 0.0, 0.5);
        let (pos, _) = seated_world_pose(&part, offset, Quat::identity());
        assert_eq!(pos, Vec3::new(100.0, 100.0, 25.5));

        // The part turns 90 degrees about z; the avatar follows.
        let quarter = Quat::from_euler_angles(0.0, 0.0, FRAC_PI_2);
        part.set_world_pose(Vec3::new(100.0, 100.0, 25.0), quarter);
        let sideways_offset = Vec3::new(1.0, 0.0, 0.5);
        let (pos, _) = seated_world_pose(&part, sideways_offset, Quat::identity());
        assert!((pos.x - 100.0).abs() < 1e-4);
        assert!((pos.y - 101.0).abs() < 1e-4);
        assert!((pos.z - 25.5).abs() < 1e-4);
    }

    #[test]
    fn stand_extraction_uses_the_planar_frame() {
        let seat_pos = Vec3::new(50.0, 50.0, 21.0);
        // A seat pitched forward still ejects along its planar heading.
        let pitched_and_turned = Quat::from_euler_angles(0.0, 0.5, FRAC_PI_2);
        let (pos, _) = stand_pose(seat_pos, pitched_and_turned, Quat::identity(), 0.95);

        assert!((pos.x - 50.0).abs() < 1e-4);
        assert!((pos.y - 50.75).abs() < 1e-4);
        assert!((pos.z - (21.0 + 0.95 + STAND_VERTICAL_OFFSET)).abs() < 1e-4);
    }

    #[test]
    fn stand_rotation_composes_seat_and_stored() {
        let seat_rotation = Quat::from_euler_angles(0.0, 0.0, FRAC_PI_2);
        let stored = Quat::from_euler_angles(0.0, 0.0, 0.3);
        let (_, rotation) = stand_pose(Vec3::zeros(), seat_rotation, stored, 0.95);
        let expected = seat_rotation * stored;
        assert!((rotation.angle_to(&expected)).abs() < 1e-5);
    }

    #[test]
    fn release_prefers_the_sit_target_rotation() {
        let mut seat = SeatState::new();
        let target_rot = Quat::from_euler_angles(0.0, 0.0, 1.0);
        seat.seat_on(
            ObjectId::random(),
            LocalId(9),
            Vec3::zeros(),
            Quat::identity(),
            Some(target_rot),
        );
        let (_, _, rotation) = seat.release().unwrap();
        assert_eq!(rotation, target_rot);
        assert!(!seat.is_sitting());
    }
}
