//! The structured state handed to a peer region during hand-off.
//!
//! Everything externally observable about a presence travels here; the
//! physics body never does, it is rebuilt on the far side.

use serde::{Deserialize, Serialize};

use crate::controls::arbiter::ScriptControlRegistration;
use crate::controls::flags::ControlFlags;
use crate::geo::{Quat, Vec3};
use crate::ids::{AgentId, LocalId, RegionHandle, SessionId};
use crate::motion::AnimationState;
use crate::scene::AttachmentState;

/// One neighbour entry as carried across a hand-off.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChildRegionEntry {
    pub handle: RegionHandle,
    pub seed_capability: String,
    pub size_x: u32,
    pub size_y: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentTransitPayload {
    pub agent: AgentId,
    pub session: SessionId,
    pub origin_region: Option<RegionHandle>,

    pub position: Vec3,
    pub velocity: Vec3,

    pub camera_position: Vec3,
    pub camera_at_axis: Vec3,
    pub camera_left_axis: Vec3,
    pub camera_up_axis: Vec3,
    pub draw_distance: f32,

    /// Opaque client throttle settings, passed through untouched.
    pub throttle: Vec<u8>,

    pub head_rotation: Quat,
    pub body_rotation: Quat,
    pub control_flags: ControlFlags,
    pub access_level: u8,
    pub always_run: bool,

    /// Opaque appearance blob, passed through untouched.
    pub appearance: Vec<u8>,

    pub parent_part: Option<LocalId>,
    pub prev_sit_offset: Vec3,

    pub script_controls: Vec<ScriptControlRegistration>,
    pub animation: AnimationState,
    pub attachments: Vec<AttachmentState>,
    pub child_regions: Vec<ChildRegionEntry>,
}
