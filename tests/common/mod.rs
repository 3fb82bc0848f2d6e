//! Mock collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use region_presence::scene::{
    AttachmentModule, AttachmentState, AudioSink, AvatarData, AvatarShape, ChildAgentPositionUpdate,
    ClientSink, CollisionEventKind, CollisionSound, EntityUpdate, GridService, LandChannel,
    ParcelInfo, PhysicsActor, PhysicsScene, RayHit, Scene, ScenePart, SitResponse,
    SitSurfaceSolution, Telehub, TransferModule, ScriptSink,
};
use region_presence::{
    AgentId, AgentKind, ControlFlags, EntityUpdateFlags, ItemId, LocalId, ObjectId, ParcelId,
    Plane, PresenceConfig, PresenceInit, Presence, Quat, RegionHandle, RegionInfo, SessionId,
    TeleportFlags, Vec3,
};

// Physics

pub struct MockActor {
    pub position: Mutex<Vec3>,
    pub velocity: Mutex<Vec3>,
    pub flying: AtomicBool,
    pub colliding: AtomicBool,
    pub colliding_down: AtomicBool,
    pub momentum_writes: Mutex<Vec<Vec3>>,
    pub target_velocities: Mutex<Vec<Vec3>>,
    pub colliding_asserts: AtomicUsize,
}

impl MockActor {
    fn new(position: Vec3) -> Arc<Self> {
        Arc::new(Self {
            position: Mutex::new(position),
            velocity: Mutex::new(Vec3::zeros()),
            flying: AtomicBool::new(false),
            colliding: AtomicBool::new(false),
            colliding_down: AtomicBool::new(false),
            momentum_writes: Mutex::new(Vec::new()),
            target_velocities: Mutex::new(Vec::new()),
            colliding_asserts: AtomicUsize::new(0),
        })
    }

    pub fn place(&self, position: Vec3, velocity: Vec3) {
        *self.position.lock().unwrap() = position;
        *self.velocity.lock().unwrap() = velocity;
    }
}

impl PhysicsActor for MockActor {
    fn position(&self) -> Vec3 {
        *self.position.lock().unwrap()
    }

    fn set_position(&self, position: Vec3) {
        *self.position.lock().unwrap() = position;
    }

    fn velocity(&self) -> Vec3 {
        *self.velocity.lock().unwrap()
    }

    fn set_momentum(&self, velocity: Vec3) {
        self.momentum_writes.lock().unwrap().push(velocity);
        *self.velocity.lock().unwrap() = velocity;
    }

    fn set_target_velocity(&self, velocity: Vec3) {
        self.target_velocities.lock().unwrap().push(velocity);
    }

    fn set_orientation(&self, _rotation: Quat) {}

    fn set_flying(&self, flying: bool) {
        self.flying.store(flying, Ordering::SeqCst);
    }

    fn is_flying(&self) -> bool {
        self.flying.load(Ordering::SeqCst)
    }

    fn is_colliding(&self) -> bool {
        self.colliding.load(Ordering::SeqCst)
    }

    fn is_colliding_obstacle_down(&self) -> bool {
        self.colliding_down.load(Ordering::SeqCst)
    }

    fn set_colliding(&self, _colliding: bool) {
        self.colliding_asserts.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockPhysics {
    pub actors: Mutex<HashMap<u32, Arc<MockActor>>>,
    pub add_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
    pub raycast_hits: Mutex<Vec<RayHit>>,
    pub sit_solution: Mutex<Option<SitSurfaceSolution>>,
    pub raycast_supported: AtomicBool,
}

impl MockPhysics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            actors: Mutex::new(HashMap::new()),
            add_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
            raycast_hits: Mutex::new(Vec::new()),
            sit_solution: Mutex::new(None),
            raycast_supported: AtomicBool::new(false),
        })
    }

    pub fn actor_of(&self, local_id: LocalId) -> Option<Arc<MockActor>> {
        self.actors.lock().unwrap().get(&local_id.0).cloned()
    }
}

impl PhysicsScene for MockPhysics {
    fn add_avatar(
        &self,
        local_id: LocalId,
        position: Vec3,
        _shape: &AvatarShape,
        flying: bool,
    ) -> Arc<dyn PhysicsActor> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        let actor = MockActor::new(position);
        actor.set_flying(flying);
        self.actors.lock().unwrap().insert(local_id.0, actor.clone());
        actor
    }

    fn remove_avatar(&self, local_id: LocalId) {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.actors.lock().unwrap().remove(&local_id.0);
    }

    fn raycast(&self, _origin: Vec3, _direction: Vec3, _length: f32, _max_hits: usize) -> Vec<RayHit> {
        self.raycast_hits.lock().unwrap().clone()
    }

    fn sit_on_surface(
        &self,
        _part: LocalId,
        _hit_point: Vec3,
        _avatar_height: f32,
    ) -> Option<SitSurfaceSolution> {
        *self.sit_solution.lock().unwrap()
    }

    fn subscribe_collisions(&self, _local_id: LocalId, _interval_ms: u32) {}

    fn supports_raycast(&self) -> bool {
        self.raycast_supported.load(Ordering::SeqCst)
    }
}

// Client sink

#[derive(Default)]
pub struct RecordingClient {
    pub avatar_data: Mutex<Vec<AvatarData>>,
    pub appearances: Mutex<Vec<AgentId>>,
    pub animations: Mutex<Vec<AgentId>>,
    pub entity_updates: Mutex<Vec<(EntityUpdate, EntityUpdateFlags)>>,
    pub sit_responses: Mutex<Vec<SitResponse>>,
    pub coarse_locations: Mutex<Vec<usize>>,
    pub kills: Mutex<Vec<Vec<LocalId>>>,
    pub alerts: Mutex<Vec<String>>,
    pub camera_planes: Mutex<Vec<Plane>>,
    pub local_teleports: Mutex<Vec<Vec3>>,
    pub take_controls: Mutex<Vec<(ControlFlags, bool, bool)>>,
    pub healths: Mutex<Vec<f32>>,
    pub reprioritizations: AtomicUsize,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn killed_ids(&self) -> Vec<LocalId> {
        self.kills.lock().unwrap().iter().flatten().copied().collect()
    }

    pub fn shown_agents(&self) -> Vec<AgentId> {
        self.avatar_data.lock().unwrap().iter().map(|d| d.agent).collect()
    }

    pub fn last_terse(&self) -> Option<EntityUpdate> {
        self.entity_updates
            .lock()
            .unwrap()
            .last()
            .map(|(update, _)| update.clone())
    }
}

impl ClientSink for RecordingClient {
    fn send_avatar_data(&self, data: &AvatarData) {
        self.avatar_data.lock().unwrap().push(data.clone());
    }

    fn send_appearance(&self, about: AgentId, _appearance: &[u8]) {
        self.appearances.lock().unwrap().push(about);
    }

    fn send_animations(&self, about: AgentId, _animations: &[String]) {
        self.animations.lock().unwrap().push(about);
    }

    fn send_entity_update(&self, update: &EntityUpdate, flags: EntityUpdateFlags) {
        self.entity_updates.lock().unwrap().push((update.clone(), flags));
    }

    fn send_sit_response(&self, response: &SitResponse) {
        self.sit_responses.lock().unwrap().push(response.clone());
    }

    fn send_coarse_locations(&self, locations: &[(AgentId, Vec3)]) {
        self.coarse_locations.lock().unwrap().push(locations.len());
    }

    fn send_kill(&self, local_ids: &[LocalId]) {
        self.kills.lock().unwrap().push(local_ids.to_vec());
    }

    fn send_alert(&self, message: &str) {
        self.alerts.lock().unwrap().push(message.to_string());
    }

    fn send_camera_constraint(&self, plane: &Plane) {
        self.camera_planes.lock().unwrap().push(*plane);
    }

    fn send_local_teleport(&self, position: Vec3, _look_at: Vec3, _flags: TeleportFlags) {
        self.local_teleports.lock().unwrap().push(position);
    }

    fn send_take_controls(&self, controls: ControlFlags, take: bool, pass_to_agent: bool) {
        self.take_controls.lock().unwrap().push((controls, take, pass_to_agent));
    }

    fn send_health(&self, health: f32) {
        self.healths.lock().unwrap().push(health);
    }

    fn reprioritize(&self) {
        self.reprioritizations.fetch_add(1, Ordering::SeqCst);
    }
}

// Transfer & grid

#[derive(Default)]
pub struct MockTransfer {
    pub accept_crossings: AtomicBool,
    pub crossings: Mutex<Vec<(RegionHandle, Vec3)>>,
    pub releases: Mutex<Vec<String>>,
    pub enable_calls: AtomicUsize,
    pub child_pushes: Mutex<Vec<Vec<RegionHandle>>>,
}

impl MockTransfer {
    pub fn new() -> Arc<Self> {
        let transfer = Self::default();
        transfer.accept_crossings.store(true, Ordering::SeqCst);
        Arc::new(transfer)
    }
}

impl TransferModule for MockTransfer {
    fn enable_child_agents(&self, _agent: AgentId) {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn cross_to_region(
        &self,
        _agent: AgentId,
        destination: RegionHandle,
        position: Vec3,
        _velocity: Vec3,
    ) -> bool {
        self.crossings.lock().unwrap().push((destination, position));
        self.accept_crossings.load(Ordering::SeqCst)
    }

    fn release_agent(&self, _origin: RegionHandle, _agent: AgentId, callback_uri: &str) {
        self.releases.lock().unwrap().push(callback_uri.to_string());
    }

    fn send_child_agent_position(
        &self,
        _update: &ChildAgentPositionUpdate,
        destinations: &[RegionHandle],
    ) {
        self.child_pushes.lock().unwrap().push(destinations.to_vec());
    }
}

#[derive(Default)]
pub struct MockGrid {
    pub closes: Mutex<Vec<RegionHandle>>,
    pub fail_closes: AtomicBool,
}

impl MockGrid {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl GridService for MockGrid {
    fn close_child_agent(&self, region: RegionHandle, _agent: AgentId, _session: SessionId) -> bool {
        self.closes.lock().unwrap().push(region);
        !self.fail_closes.load(Ordering::SeqCst)
    }
}

// Land

pub struct ParcelRect {
    pub x0: f32,
    pub x1: f32,
    pub y0: f32,
    pub y1: f32,
    pub info: ParcelInfo,
}

#[derive(Default)]
pub struct MockLand {
    pub parcels: Mutex<Vec<ParcelRect>>,
    pub denied: Mutex<Vec<AgentId>>,
}

impl MockLand {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_parcel(&self, x0: f32, x1: f32, y0: f32, y1: f32, info: ParcelInfo) {
        self.parcels.lock().unwrap().push(ParcelRect { x0, x1, y0, y1, info });
    }
}

impl LandChannel for MockLand {
    fn parcel_at(&self, x: f32, y: f32) -> Option<ParcelInfo> {
        self.parcels
            .lock()
            .unwrap()
            .iter()
            .find(|p| x >= p.x0 && x < p.x1 && y >= p.y0 && y < p.y1)
            .map(|p| p.info.clone())
    }

    fn is_banned(&self, _parcel: ParcelId, agent: AgentId) -> bool {
        self.denied.lock().unwrap().contains(&agent)
    }

    fn allows_avatar(&self, agent: AgentId, _pos: Vec3) -> bool {
        !self.denied.lock().unwrap().contains(&agent)
    }
}

// Attachments

#[derive(Default)]
pub struct MockAttachments {
    pub roots: Mutex<Vec<LocalId>>,
    pub subscribers: Mutex<Vec<LocalId>>,
    pub payload: Mutex<Vec<AttachmentState>>,
    pub rez_calls: AtomicUsize,
}

impl MockAttachments {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl AttachmentModule for MockAttachments {
    fn rez_attachments(&self, _agent: AgentId) {
        self.rez_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn delete_attachments(&self, _agent: AgentId) {}

    fn send_attachments_to(&self, _owner: AgentId, _observer: AgentId) {}

    fn root_local_ids(&self, _agent: AgentId) -> Vec<LocalId> {
        self.roots.lock().unwrap().clone()
    }

    fn collision_subscribers(&self, _agent: AgentId) -> Vec<LocalId> {
        self.subscribers.lock().unwrap().clone()
    }

    fn copy_to_payload(&self, _agent: AgentId) -> Vec<AttachmentState> {
        self.payload.lock().unwrap().clone()
    }

    fn restore_from_payload(&self, _agent: AgentId, attachments: &[AttachmentState]) {
        *self.payload.lock().unwrap() = attachments.to_vec();
    }
}

// Scripts

#[derive(Default)]
pub struct MockScripts {
    pub control_events: Mutex<Vec<(ItemId, ControlFlags, ControlFlags)>>,
    pub collisions: Mutex<Vec<(LocalId, CollisionEventKind, Vec<LocalId>)>>,
    pub link_changes: Mutex<Vec<LocalId>>,
    pub kills: Mutex<Vec<AgentId>>,
    pub camera_revokes: Mutex<Vec<(AgentId, ObjectId)>>,
}

impl MockScripts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ScriptSink for MockScripts {
    fn post_control_event(
        &self,
        item: ItemId,
        _object: ObjectId,
        held: ControlFlags,
        changed: ControlFlags,
    ) {
        self.control_events.lock().unwrap().push((item, held, changed));
    }

    fn post_collision_event(&self, object: LocalId, kind: CollisionEventKind, others: &[LocalId]) {
        self.collisions.lock().unwrap().push((object, kind, others.to_vec()));
    }

    fn post_link_changed(&self, object: LocalId) {
        self.link_changes.lock().unwrap().push(object);
    }

    fn post_avatar_killed(&self, agent: AgentId, _killer: LocalId) {
        self.kills.lock().unwrap().push(agent);
    }

    fn revoke_camera_permissions(&self, agent: AgentId, object: ObjectId) {
        self.camera_revokes.lock().unwrap().push((agent, object));
    }
}

// Audio

#[derive(Default)]
pub struct MockAudio {
    pub sounds: Mutex<Vec<CollisionSound>>,
}

impl MockAudio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl AudioSink for MockAudio {
    fn queue_collision_sound(&self, sound: &CollisionSound) {
        self.sounds.lock().unwrap().push(*sound);
    }
}

// Scene

pub struct MockScene {
    pub region: RegionInfo,
    pub ground: Mutex<f32>,
    pub presences: Mutex<Vec<Arc<Presence>>>,
    pub parts: Mutex<HashMap<u32, Arc<ScenePart>>>,
    pub telehub: Mutex<Option<Telehub>>,
    pub direct_teleport: AtomicBool,
    pub estate_banned: Mutex<Vec<AgentId>>,
    pub estate_managers: Mutex<Vec<AgentId>>,
    pub deleted_objects: Mutex<Vec<LocalId>>,
    pub agent_updates: AtomicUsize,
    pub movement_events: Mutex<Vec<AgentId>>,
    pub significant_events: Mutex<Vec<AgentId>>,
}

impl MockScene {
    pub fn new(region: RegionInfo) -> Arc<Self> {
        let scene = Self {
            region,
            ground: Mutex::new(20.0),
            presences: Mutex::new(Vec::new()),
            parts: Mutex::new(HashMap::new()),
            telehub: Mutex::new(None),
            direct_teleport: AtomicBool::new(true),
            estate_banned: Mutex::new(Vec::new()),
            estate_managers: Mutex::new(Vec::new()),
            deleted_objects: Mutex::new(Vec::new()),
            agent_updates: AtomicUsize::new(0),
            movement_events: Mutex::new(Vec::new()),
            significant_events: Mutex::new(Vec::new()),
        };
        Arc::new(scene)
    }

    pub fn add_presence(&self, presence: Arc<Presence>) {
        self.presences.lock().unwrap().push(presence);
    }

    pub fn add_part(&self, part: Arc<ScenePart>) {
        self.parts.lock().unwrap().insert(part.local_id().0, part);
    }
}

impl Scene for MockScene {
    fn region(&self) -> &RegionInfo {
        &self.region
    }

    fn ground_height(&self, _x: f32, _y: f32) -> f32 {
        *self.ground.lock().unwrap()
    }

    fn presences(&self) -> Vec<Arc<Presence>> {
        self.presences.lock().unwrap().clone()
    }

    fn find_part(&self, id: LocalId) -> Option<Arc<ScenePart>> {
        self.parts.lock().unwrap().get(&id.0).cloned()
    }

    fn linked_parts(&self, part: LocalId) -> Vec<Arc<ScenePart>> {
        let parts = self.parts.lock().unwrap();
        let Some(clicked) = parts.get(&part.0) else {
            return Vec::new();
        };
        let root = clicked.root_local_id();
        parts
            .values()
            .filter(|p| p.root_local_id() == root)
            .cloned()
            .collect()
    }

    fn delete_object(&self, root: LocalId) {
        self.deleted_objects.lock().unwrap().push(root);
    }

    fn allows_direct_teleport(&self) -> bool {
        self.direct_teleport.load(Ordering::SeqCst)
    }

    fn is_estate_banned(&self, agent: AgentId) -> bool {
        self.estate_banned.lock().unwrap().contains(&agent)
    }

    fn is_estate_manager(&self, agent: AgentId) -> bool {
        self.estate_managers.lock().unwrap().contains(&agent)
    }

    fn telehub(&self) -> Option<Telehub> {
        self.telehub.lock().unwrap().clone()
    }

    fn record_agent_update(&self) {
        self.agent_updates.fetch_add(1, Ordering::SeqCst);
    }

    fn trigger_client_movement(&self, agent: AgentId) {
        self.movement_events.lock().unwrap().push(agent);
    }

    fn trigger_significant_movement(&self, agent: AgentId) {
        self.significant_events.lock().unwrap().push(agent);
    }
}

// Harness

pub struct Harness {
    pub scene: Arc<MockScene>,
    pub physics: Arc<MockPhysics>,
    pub transfer: Arc<MockTransfer>,
    pub grid: Arc<MockGrid>,
    pub land: Arc<MockLand>,
    pub attachments: Arc<MockAttachments>,
    pub scripts: Arc<MockScripts>,
    pub audio: Arc<MockAudio>,
    pub config: PresenceConfig,
    pub region: RegionInfo,
    next_local_id: AtomicUsize,
}

impl Harness {
    pub fn new() -> Self {
        let region = RegionInfo::new(
            RegionHandle::from_meters(256000, 256000),
            "Test Region",
            256,
            256,
        );
        let mut config = PresenceConfig::default();
        // Integration tests never want multi-second polls.
        config.handshake_poll_interval = std::time::Duration::from_millis(5);
        config.handshake_attempts = 4;
        Self {
            scene: MockScene::new(region.clone()),
            physics: MockPhysics::new(),
            transfer: MockTransfer::new(),
            grid: MockGrid::new(),
            land: MockLand::new(),
            attachments: MockAttachments::new(),
            scripts: MockScripts::new(),
            audio: MockAudio::new(),
            config,
            region,
            next_local_id: AtomicUsize::new(10),
        }
    }

    pub fn collaborators(&self, client: Arc<RecordingClient>) -> region_presence::scene::Collaborators {
        region_presence::scene::Collaborators {
            scene: self.scene.clone(),
            physics: self.physics.clone(),
            client,
            transfer: self.transfer.clone(),
            grid: self.grid.clone(),
            land: self.land.clone(),
            attachments: self.attachments.clone(),
            scripts: self.scripts.clone(),
            audio: self.audio.clone(),
        }
    }

    pub fn spawn_presence(&self, name: &str) -> (Arc<Presence>, Arc<RecordingClient>) {
        let client = RecordingClient::new();
        let local_id = self.next_local_id.fetch_add(1, Ordering::SeqCst) as u32;
        let presence = Presence::new(
            PresenceInit {
                agent: AgentId::random(),
                session: SessionId::random(),
                first_name: name.to_string(),
                last_name: "Resident".to_string(),
                kind: AgentKind::Human,
                local_id: LocalId(local_id),
                access_level: 0,
                avatar_height: 1.9,
            },
            self.region.clone(),
            self.config.clone(),
            self.collaborators(client.clone()),
        );
        self.scene.add_presence(presence.clone());
        (presence, client)
    }

    /// A root presence standing at `position` with its body attached.
    pub fn spawn_root(&self, name: &str, position: Vec3) -> (Arc<Presence>, Arc<RecordingClient>) {
        let (presence, client) = self.spawn_presence(name);
        presence.add_to_region(true).unwrap();
        presence
            .complete_movement(None, position, false)
            .unwrap();
        (presence, client)
    }

    pub fn actor_of(&self, presence: &Presence) -> Arc<MockActor> {
        self.physics
            .actor_of(presence.local_id())
            .expect("presence has no physics actor")
    }

    pub fn public_parcel(&self) -> ParcelInfo {
        ParcelInfo {
            id: ParcelId::random(),
            local_id: 1,
            see_avatars: true,
            allow_sounds: true,
            landing_type: region_presence::scene::ParcelLandingType::Anywhere,
            user_location: Vec3::zeros(),
            user_look_at: Vec3::zeros(),
            owner: AgentId::random(),
        }
    }

    pub fn private_parcel(&self) -> ParcelInfo {
        ParcelInfo {
            see_avatars: false,
            local_id: 2,
            ..self.public_parcel()
        }
    }
}

pub fn agent_update(flags: ControlFlags) -> region_presence::AgentUpdateInput {
    region_presence::AgentUpdateInput {
        control_flags: flags,
        body_rotation: Quat::identity(),
        head_rotation: Quat::identity(),
        camera_position: Vec3::new(0.0, 0.0, 30.0),
        camera_at_axis: Vec3::new(1.0, 0.0, 0.0),
        camera_left_axis: Vec3::new(0.0, 1.0, 0.0),
        camera_up_axis: Vec3::new(0.0, 0.0, 1.0),
        draw_distance: 128.0,
    }
}
