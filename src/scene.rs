//! Seams to the rest of the simulator.
//!
//! The presence core never owns the scene graph, the physics engine, or the
//! wire protocol; it consumes them through the traits here. Everything a
//! collaborator hands back is a plain snapshot value, so callbacks from
//! external threads cannot reach into component state.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::RegionInfo,
    controls::flags::{ControlFlags, EntityUpdateFlags, TeleportFlags},
    geo::{Plane, Quat, Vec3},
    ids::{AgentId, ItemId, LocalId, ObjectId, ParcelId, RegionHandle, SessionId},
    presence::Presence,
};

// Land

/// What the parcel does with arrivals teleporting into it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParcelLandingType {
    /// Teleports into the parcel are refused.
    Blocked,
    /// Arrivals are redirected to the parcel's user location.
    LandingPoint,
    /// Arrivals land where they asked to.
    Anywhere,
}

/// Snapshot of one parcel's presence-relevant settings.
#[derive(Clone, Debug)]
pub struct ParcelInfo {
    pub id: ParcelId,
    pub local_id: i32,
    /// When false, avatars inside are hidden from avatars outside.
    pub see_avatars: bool,
    /// Whether avatar collision sounds may play here.
    pub allow_sounds: bool,
    pub landing_type: ParcelLandingType,
    /// Zero when the owner never set a landing spot.
    pub user_location: Vec3,
    pub user_look_at: Vec3,
    pub owner: AgentId,
}

impl ParcelInfo {
    pub fn hides_avatars(&self) -> bool {
        !self.see_avatars
    }

    pub fn has_user_location(&self) -> bool {
        self.user_location != Vec3::zeros()
    }
}

/// Parcel/land geometry queries.
pub trait LandChannel: Send + Sync {
    fn parcel_at(&self, x: f32, y: f32) -> Option<ParcelInfo>;
    fn is_banned(&self, parcel: ParcelId, agent: AgentId) -> bool;
    /// Whether the land under `pos` admits this avatar at all.
    fn allows_avatar(&self, agent: AgentId, pos: Vec3) -> bool;
}

// Physics

/// Collision shape for an avatar body.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AvatarShape {
    pub width: f32,
    pub depth: f32,
    pub height: f32,
}

impl Default for AvatarShape {
    fn default() -> Self {
        Self {
            width: 0.45,
            depth: 0.6,
            height: 1.9,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RayHit {
    pub position: Vec3,
    pub normal: Vec3,
    pub distance: f32,
    /// Zero for terrain.
    pub local_id: LocalId,
    /// Volume-detect phantoms do not block cameras or landings.
    pub is_volume_detect: bool,
}

/// One contact reported by the physics engine for the avatar body.
#[derive(Clone, Copy, Debug)]
pub struct ContactPoint {
    /// Zero for the ground surface.
    pub other: LocalId,
    pub position: Vec3,
    pub normal: Vec3,
    pub penetration_depth: f32,
    pub relative_speed: f32,
    /// Contact belongs to the character's feet collider.
    pub character_feet: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct SitSurfaceSolution {
    pub position: Vec3,
    pub rotation: Quat,
}

/// The simulated body of a root presence.
pub trait PhysicsActor: Send + Sync {
    fn position(&self) -> Vec3;
    fn set_position(&self, position: Vec3);
    fn velocity(&self) -> Vec3;
    /// Hard momentum write, carried across a local teleport.
    fn set_momentum(&self, velocity: Vec3);
    /// The per-tick movement force the controller computed.
    fn set_target_velocity(&self, velocity: Vec3);
    fn set_orientation(&self, rotation: Quat);
    fn set_flying(&self, flying: bool);
    fn is_flying(&self) -> bool;
    fn is_colliding(&self) -> bool;
    /// Colliding with an obstacle below while flying.
    fn is_colliding_obstacle_down(&self) -> bool;
    /// The engine only believes a grounded state after repeated asserts.
    fn set_colliding(&self, colliding: bool);
}

/// The physics world this region simulates in.
pub trait PhysicsScene: Send + Sync {
    fn add_avatar(
        &self,
        local_id: LocalId,
        position: Vec3,
        shape: &AvatarShape,
        flying: bool,
    ) -> Arc<dyn PhysicsActor>;
    fn remove_avatar(&self, local_id: LocalId);
    fn raycast(&self, origin: Vec3, direction: Vec3, length: f32, max_hits: usize) -> Vec<RayHit>;
    /// Ask the engine for a seat pose on the given part near the hit point.
    fn sit_on_surface(
        &self,
        part: LocalId,
        hit_point: Vec3,
        avatar_height: f32,
    ) -> Option<SitSurfaceSolution>;
    /// Request collision callbacks for the avatar at the given cadence.
    fn subscribe_collisions(&self, local_id: LocalId, interval_ms: u32);
    fn supports_raycast(&self) -> bool;
}

// Client sink

/// Full avatar description pushed when a presence becomes visible.
#[derive(Clone, Debug)]
pub struct AvatarData {
    pub agent: AgentId,
    pub local_id: LocalId,
    pub first_name: String,
    pub last_name: String,
    pub position: Vec3,
    pub rotation: Quat,
}

#[derive(Clone, Debug)]
pub struct EntityUpdate {
    pub local_id: LocalId,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    pub angular_velocity: Vec3,
    pub collision_plane: Plane,
}

#[derive(Clone, Debug)]
pub struct SitResponse {
    pub seat_object: ObjectId,
    pub offset: Vec3,
    pub rotation: Quat,
    pub camera_at_offset: Vec3,
    pub camera_eye_offset: Vec3,
    pub force_mouselook: bool,
}

/// Outbound messages to one connected client. Implemented by the wire
/// codec; every method is non-blocking.
pub trait ClientSink: Send + Sync {
    fn send_avatar_data(&self, data: &AvatarData);
    fn send_appearance(&self, about: AgentId, appearance: &[u8]);
    fn send_animations(&self, about: AgentId, animations: &[String]);
    fn send_entity_update(&self, update: &EntityUpdate, flags: EntityUpdateFlags);
    fn send_sit_response(&self, response: &SitResponse);
    fn send_coarse_locations(&self, locations: &[(AgentId, Vec3)]);
    fn send_kill(&self, local_ids: &[LocalId]);
    fn send_alert(&self, message: &str);
    fn send_camera_constraint(&self, plane: &Plane);
    fn send_local_teleport(&self, position: Vec3, look_at: Vec3, flags: TeleportFlags);
    fn send_take_controls(&self, controls: ControlFlags, take: bool, pass_to_agent: bool);
    fn send_health(&self, health: f32);
    /// Rebuild this client's update queues around its new position.
    fn reprioritize(&self);
}

// Transfer / grid

/// Minimal position report pushed to neighbour regions holding our child
/// agents.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChildAgentPositionUpdate {
    pub agent: AgentId,
    pub region: RegionHandle,
    pub position: Vec3,
    pub velocity: Vec3,
    pub draw_distance: f32,
}

/// The external module that talks hand-off to peer regions.
pub trait TransferModule: Send + Sync {
    /// Establish child agents on the current neighbour set.
    fn enable_child_agents(&self, agent: AgentId);
    /// Returns false when the destination refuses the crossing.
    fn cross_to_region(
        &self,
        agent: AgentId,
        destination: RegionHandle,
        position: Vec3,
        velocity: Vec3,
    ) -> bool;
    /// Tell the departing region we now own the agent.
    fn release_agent(&self, origin: RegionHandle, agent: AgentId, callback_uri: &str);
    fn send_child_agent_position(
        &self,
        update: &ChildAgentPositionUpdate,
        destinations: &[RegionHandle],
    );
}

/// Region-to-grid control plane.
pub trait GridService: Send + Sync {
    /// Returns false on failure; callers treat the close as best-effort.
    fn close_child_agent(&self, region: RegionHandle, agent: AgentId, session: SessionId) -> bool;
}

// Attachments

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachmentState {
    pub object: ObjectId,
    pub attach_point: u8,
    pub data: Vec<u8>,
}

pub trait AttachmentModule: Send + Sync {
    fn rez_attachments(&self, agent: AgentId);
    fn delete_attachments(&self, agent: AgentId);
    /// Push full updates of `owner`'s attachments to `observer`'s viewer.
    fn send_attachments_to(&self, owner: AgentId, observer: AgentId);
    /// Root local ids of everything attached, for kill lists.
    fn root_local_ids(&self, agent: AgentId) -> Vec<LocalId>;
    /// Attached objects whose scripts asked for avatar collision events.
    fn collision_subscribers(&self, agent: AgentId) -> Vec<LocalId>;
    fn copy_to_payload(&self, agent: AgentId) -> Vec<AttachmentState>;
    fn restore_from_payload(&self, agent: AgentId, attachments: &[AttachmentState]);
}

// Scripts

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollisionEventKind {
    Start,
    Continue,
    End,
    LandStart,
    LandContinue,
    LandEnd,
}

/// Event sink into the script runtimes.
pub trait ScriptSink: Send + Sync {
    fn post_control_event(
        &self,
        item: ItemId,
        object: ObjectId,
        held: ControlFlags,
        changed: ControlFlags,
    );
    fn post_collision_event(&self, object: LocalId, kind: CollisionEventKind, others: &[LocalId]);
    /// Link-set membership changed (an avatar sat down or stood up).
    fn post_link_changed(&self, object: LocalId);
    fn post_avatar_killed(&self, agent: AgentId, killer: LocalId);
    fn revoke_camera_permissions(&self, agent: AgentId, object: ObjectId);
}

// Audio

#[derive(Clone, Copy, Debug)]
pub struct CollisionSound {
    pub sound: Uuid,
    pub volume: f32,
    pub position: Vec3,
}

pub trait AudioSink: Send + Sync {
    fn queue_collision_sound(&self, sound: &CollisionSound);
}

// Scene parts

/// A declared seat on a part: offset and orientation relative to the part.
#[derive(Clone, Copy, Debug)]
pub struct SitTarget {
    pub offset: Vec3,
    pub rotation: Quat,
}

#[derive(Debug)]
struct PartState {
    world_position: Vec3,
    world_rotation: Quat,
    sit_target: Option<SitTarget>,
    seated: HashSet<AgentId>,
    sit_animation: Option<String>,
    /// Damage dealt to avatars colliding with this part's group; zero for
    /// harmless objects.
    damage: f32,
    collision_sound: Option<(Uuid, f32)>,
    camera_at_offset: Vec3,
    camera_eye_offset: Vec3,
    force_mouselook: bool,
}

/// One part of a scene object, shared with the presence core by the scene
/// graph. Pose and seat state are mutated by the scene; the presence core
/// reads snapshots and only touches the seated-avatars set.
#[derive(Debug)]
pub struct ScenePart {
    local_id: LocalId,
    object_id: ObjectId,
    root_local_id: LocalId,
    link_number: i32,
    state: RwLock<PartState>,
}

impl ScenePart {
    pub fn new(local_id: LocalId, object_id: ObjectId, root_local_id: LocalId, link_number: i32) -> Self {
        Self {
            local_id,
            object_id,
            root_local_id,
            link_number,
            state: RwLock::new(PartState {
                world_position: Vec3::zeros(),
                world_rotation: Quat::identity(),
                sit_target: None,
                seated: HashSet::new(),
                sit_animation: None,
                damage: 0.0,
                collision_sound: None,
                camera_at_offset: Vec3::zeros(),
                camera_eye_offset: Vec3::zeros(),
                force_mouselook: false,
            }),
        }
    }

    pub fn local_id(&self) -> LocalId {
        self.local_id
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn root_local_id(&self) -> LocalId {
        self.root_local_id
    }

    pub fn is_root(&self) -> bool {
        self.root_local_id == self.local_id
    }

    pub fn link_number(&self) -> i32 {
        self.link_number
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PartState> {
        self.state.read().expect("part state lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, PartState> {
        self.state.write().expect("part state lock poisoned")
    }

    pub fn world_position(&self) -> Vec3 {
        self.read().world_position
    }

    pub fn world_rotation(&self) -> Quat {
        self.read().world_rotation
    }

    pub fn set_world_pose(&self, position: Vec3, rotation: Quat) {
        let mut state = self.write();
        state.world_position = position;
        state.world_rotation = rotation;
    }

    pub fn sit_target(&self) -> Option<SitTarget> {
        self.read().sit_target
    }

    pub fn set_sit_target(&self, target: Option<SitTarget>) {
        self.write().sit_target = target;
    }

    /// An explicit sit target is available when declared and unoccupied.
    pub fn sit_target_available(&self) -> bool {
        let state = self.read();
        state.sit_target.is_some() && state.seated.is_empty()
    }

    pub fn seat_avatar(&self, agent: AgentId) {
        self.write().seated.insert(agent);
    }

    pub fn unseat_avatar(&self, agent: AgentId) {
        self.write().seated.remove(&agent);
    }

    pub fn has_seated(&self, agent: AgentId) -> bool {
        self.read().seated.contains(&agent)
    }

    pub fn sit_animation(&self) -> Option<String> {
        self.read().sit_animation.clone()
    }

    pub fn set_sit_animation(&self, animation: Option<&str>) {
        self.write().sit_animation = animation.map(str::to_string);
    }

    pub fn damage(&self) -> f32 {
        self.read().damage
    }

    pub fn set_damage(&self, damage: f32) {
        self.write().damage = damage;
    }

    pub fn collision_sound(&self) -> Option<(Uuid, f32)> {
        self.read().collision_sound
    }

    pub fn set_collision_sound(&self, sound: Option<(Uuid, f32)>) {
        self.write().collision_sound = sound;
    }

    pub fn camera_offsets(&self) -> (Vec3, Vec3, bool) {
        let state = self.read();
        (
            state.camera_at_offset,
            state.camera_eye_offset,
            state.force_mouselook,
        )
    }

    pub fn set_camera_offsets(&self, at: Vec3, eye: Vec3, force_mouselook: bool) {
        let mut state = self.write();
        state.camera_at_offset = at;
        state.camera_eye_offset = eye;
        state.force_mouselook = force_mouselook;
    }
}

// Telehub

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpawnPointMode {
    Random,
    Sequence,
    Closest,
}

#[derive(Clone, Debug)]
pub struct Telehub {
    pub object: LocalId,
    pub position: Vec3,
    pub rotation: Quat,
    /// Spawn point offsets relative to the telehub.
    pub spawn_points: Vec<Vec3>,
    pub mode: SpawnPointMode,
}

// Scene

/// The region scene graph, consumed as a read-mostly snapshot source.
pub trait Scene: Send + Sync {
    fn region(&self) -> &RegionInfo;
    fn ground_height(&self, x: f32, y: f32) -> f32;
    /// Consistent list copy of the current presences; iteration never
    /// observes a half-applied mutation.
    fn presences(&self) -> Vec<Arc<Presence>>;
    fn find_part(&self, id: LocalId) -> Option<Arc<ScenePart>>;
    /// All parts of the object owning `part`, in link order.
    fn linked_parts(&self, part: LocalId) -> Vec<Arc<ScenePart>>;
    fn delete_object(&self, root: LocalId);
    fn allows_direct_teleport(&self) -> bool;
    fn is_estate_banned(&self, agent: AgentId) -> bool;
    fn is_estate_manager(&self, agent: AgentId) -> bool;
    fn telehub(&self) -> Option<Telehub>;
    /// Stats hook; called once per processed agent update.
    fn record_agent_update(&self);
    /// The presence moved past the fine-grained movement threshold.
    fn trigger_client_movement(&self, agent: AgentId);
    /// The presence moved past the significant-movement threshold.
    fn trigger_significant_movement(&self, agent: AgentId);
}

/// Everything a presence talks to, bundled for construction.
pub struct Collaborators {
    pub scene: Arc<dyn Scene>,
    pub physics: Arc<dyn PhysicsScene>,
    pub client: Arc<dyn ClientSink>,
    pub transfer: Arc<dyn TransferModule>,
    pub grid: Arc<dyn GridService>,
    pub land: Arc<dyn LandChannel>,
    pub attachments: Arc<dyn AttachmentModule>,
    pub scripts: Arc<dyn ScriptSink>,
    pub audio: Arc<dyn AudioSink>,
}

impl Clone for Collaborators {
    fn clone(&self) -> Self {
        Self {
            scene: self.scene.clone(),
            physics: self.physics.clone(),
            client: self.client.clone(),
            transfer: self.transfer.clone(),
            grid: self.grid.clone(),
            land: self.land.clone(),
            attachments: self.attachments.clone(),
            scripts: self.scripts.clone(),
            audio: self.audio.clone(),
        }
    }
}
