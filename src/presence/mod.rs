//! The presence orchestrator: owns one avatar's identity, composes the
//! lifecycle, motion, transit, sit, parcel, control, scheduling, and body
//! components, and exposes the public contract the region calls.
//!
//! Every entry point takes `&self`; component state lives behind its own
//! lock and no two component locks are ever held at once.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use log::{debug, info, warn};

use crate::{
    body::{PhysicalBody, COLLISION_SUBSCRIPTION_MS},
    config::{PresenceConfig, RegionInfo},
    controls::{
        arbiter::ScriptControls,
        flags::{ControlFlags, EntityUpdateFlags, TeleportFlags},
    },
    error::{LifecycleError, MotionError, PresenceError, SitError, TransitError},
    geo::{self, Plane, Quat, Vec3},
    landing,
    lifecycle::{Lifecycle, LifecycleState},
    motion::{target::MoveStep, AgentUpdateInput, AnimationState, MotionState},
    parcel::{self, ParcelState, PeerView, ELEVATED_ACCESS_LEVEL},
    scene::{
        AvatarData, AvatarShape, Collaborators, ContactPoint, EntityUpdate, ScenePart,
        SitResponse,
    },
    scheduler::UpdateScheduler,
    sit::{self, SeatState, SIT_GROUND_ANIMATION, STAND_ANIMATION},
    task::TaskRunner,
    transit::{
        self, AgentTransitPayload, ChildRegionEntry, NeighbourMap, NeighbourRegion,
    },
    ids::{AgentId, ItemId, LocalId, ObjectId, RegionHandle, SessionId},
};

const MIN_DRAW_DISTANCE: f32 = 32.0;
const BACKGROUND_TASK_LIMIT: usize = 8;
/// Head offset above the body origin for the camera ray-cast.
const CAMERA_RAY_HEAD_OFFSET: f32 = 0.6;
const CAMERA_RAY_MAX_HITS: usize = 10;
/// Default walking-speed multiplier while the stop control is held.
const STOP_SPEED_SCALE: f32 = 0.5;

/// Whether the presence is a connected user or a server-side NPC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentKind {
    Human,
    NonPlayerCharacter,
}

/// Construction parameters for a presence.
#[derive(Clone, Debug)]
pub struct PresenceInit {
    pub agent: AgentId,
    pub session: SessionId,
    pub first_name: String,
    pub last_name: String,
    pub kind: AgentKind,
    pub local_id: LocalId,
    pub access_level: u8,
    pub avatar_height: f32,
}

#[derive(Debug, Default)]
struct TransitState {
    /// Empty until the departing peer's update confirms the hand-off.
    origin_region: Option<RegionHandle>,
    /// Endpoint expecting a release once we own the agent.
    callback_uri: Option<String>,
    teleport_flags: TeleportFlags,
    do_not_close_after_teleport: bool,
    in_transit: bool,
}

#[derive(Debug, Default)]
struct AppearanceState {
    appearance: Vec<u8>,
    throttle: Vec<u8>,
}

pub struct Presence {
    // Identity
    agent: AgentId,
    session: SessionId,
    first_name: String,
    last_name: String,
    kind: AgentKind,
    local_id: LocalId,
    access_level: AtomicU8,
    avatar_height: f32,

    region: RegionInfo,
    config: PresenceConfig,
    collab: Collaborators,

    // Components
    lifecycle: Mutex<Lifecycle>,
    transit_state: Mutex<TransitState>,
    motion: Mutex<MotionState>,
    seat: Mutex<SeatState>,
    parcel: Mutex<ParcelState>,
    script_controls: Mutex<ScriptControls>,
    scheduler: Mutex<UpdateScheduler>,
    body: Mutex<PhysicalBody>,
    neighbours: Mutex<NeighbourMap>,
    appearance: Mutex<AppearanceState>,

    /// Serialises child/root promotion; the loser of a concurrent arrival
    /// observes `AlreadyRoot` inside.
    complete_movement_lock: Mutex<()>,

    tasks: TaskRunner,
}

impl Presence {
    pub fn new(
        init: PresenceInit,
        region: RegionInfo,
        config: PresenceConfig,
        collab: Collaborators,
    ) -> Arc<Self> {
        let home = region.handle;
        let scheduler = UpdateScheduler::new(&config);
        Arc::new(Self {
            agent: init.agent,
            session: init.session,
            first_name: init.first_name,
            last_name: init.last_name,
            kind: init.kind,
            local_id: init.local_id,
            access_level: AtomicU8::new(init.access_level),
            avatar_height: init.avatar_height,
            region,
            config,
            collab,
            lifecycle: Mutex::new(Lifecycle::new()),
            transit_state: Mutex::new(TransitState::default()),
            motion: Mutex::new(MotionState::new()),
            seat: Mutex::new(SeatState::new()),
            parcel: Mutex::new(ParcelState::new()),
            script_controls: Mutex::new(ScriptControls::new()),
            scheduler: Mutex::new(scheduler),
            body: Mutex::new(PhysicalBody::new()),
            neighbours: Mutex::new(NeighbourMap::new(home)),
            appearance: Mutex::new(AppearanceState::default()),
            complete_movement_lock: Mutex::new(()),
            tasks: TaskRunner::new(BACKGROUND_TASK_LIMIT),
        })
    }

    // Identity & derived state

    pub fn agent_id(&self) -> AgentId {
        self.agent
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn local_id(&self) -> LocalId {
        self.local_id
    }

    pub fn access_level(&self) -> u8 {
        self.access_level.load(Ordering::Acquire)
    }

    pub fn is_elevated(&self) -> bool {
        self.access_level() >= ELEVATED_ACCESS_LEVEL
    }

    pub fn avatar_height(&self) -> f32 {
        self.avatar_height
    }

    pub fn is_child(&self) -> bool {
        self.lock(&self.lifecycle).is_child()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lock(&self.lifecycle).state()
    }

    pub fn is_in_transit(&self) -> bool {
        self.lock(&self.transit_state).in_transit
    }

    pub fn has_physical_body(&self) -> bool {
        self.lock(&self.body).is_attached()
    }

    pub fn is_sitting(&self) -> bool {
        self.lock(&self.seat).is_sitting()
    }

    pub fn is_sitting_on_ground(&self) -> bool {
        self.lock(&self.seat).is_sitting_on_ground()
    }

    pub fn health(&self) -> f32 {
        self.lock(&self.body).health()
    }

    pub fn set_invulnerable(&self, invulnerable: bool) {
        self.lock(&self.body).set_invulnerable(invulnerable);
    }

    pub fn collision_plane(&self) -> Plane {
        self.lock(&self.body).collision_plane()
    }

    pub fn is_flying(&self) -> bool {
        let actor = self.lock(&self.body).actor();
        actor.map(|a| a.is_flying()).unwrap_or(false)
    }

    pub fn draw_distance(&self) -> f32 {
        let raw = self.lock(&self.motion).kinematics.draw_distance;
        raw.clamp(MIN_DRAW_DISTANCE, self.config.max_draw_distance)
    }

    pub fn region_view_distance(&self) -> f32 {
        self.draw_distance()
            .clamp(MIN_DRAW_DISTANCE, self.config.max_region_view_distance)
    }

    pub fn movement_flags(&self) -> ControlFlags {
        self.lock(&self.motion).movement_flags
    }

    pub fn raw_control_flags(&self) -> ControlFlags {
        self.lock(&self.motion).raw_control_flags
    }

    pub fn animation(&self) -> AnimationState {
        self.lock(&self.motion).animation.clone()
    }

    /// Region-absolute position. Seated presences resolve through their
    /// seat part so they follow the object.
    pub fn absolute_position(&self) -> Vec3 {
        let seat_part = self.lock(&self.seat).parent_part();
        if let Some(part_id) = seat_part {
            if let Some(part) = self.collab.scene.find_part(part_id) {
                let (offset, rotation) = {
                    let motion = self.lock(&self.motion);
                    (motion.kinematics.position, motion.kinematics.body_rotation)
                };
                let (position, _) = sit::seated_world_pose(&part, offset, rotation);
                return position;
            }
        }
        self.lock(&self.motion).kinematics.position
    }

    /// World-space body rotation, composed through the seat while sitting.
    pub fn world_rotation(&self) -> Quat {
        let seat_part = self.lock(&self.seat).parent_part();
        if let Some(part_id) = seat_part {
            if let Some(part) = self.collab.scene.find_part(part_id) {
                let (offset, rotation) = {
                    let motion = self.lock(&self.motion);
                    (motion.kinematics.position, motion.kinematics.body_rotation)
                };
                let (_, world) = sit::seated_world_pose(&part, offset, rotation);
                return world;
            }
        }
        self.lock(&self.motion).kinematics.body_rotation
    }

    pub fn velocity(&self) -> Vec3 {
        self.lock(&self.motion).kinematics.velocity
    }

    /// How this presence looks to another presence's visibility engine.
    pub fn peer_view(&self) -> PeerView {
        let (parcel_id, hides) = {
            let parcel = self.lock(&self.parcel);
            (parcel.current_id(), parcel.current_hides())
        };
        PeerView {
            agent: self.agent,
            parcel: parcel_id,
            parcel_hides: hides,
            access_level: self.access_level(),
        }
    }

    pub fn current_parcel_hides(&self) -> bool {
        self.lock(&self.parcel).current_hides()
    }

    fn avatar_data(&self) -> AvatarData {
        AvatarData {
            agent: self.agent,
            local_id: self.local_id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            position: self.absolute_position(),
            rotation: self.world_rotation(),
        }
    }

    // Lifecycle

    /// First add to the region: the presence starts running as a child.
    pub fn add_to_region(&self, is_login: bool) -> Result<(), PresenceError> {
        {
            let mut lifecycle = self.lock(&self.lifecycle);
            lifecycle.advance(LifecycleState::Running)?;
            lifecycle.set_logging_in(is_login);
        }
        info!("presence {} added to {} as child", self.name(), self.region.name);
        Ok(())
    }

    /// Demote to child: the body detaches, movement state zeroes, teleport
    /// flags reset, and the parcel binding clears.
    pub fn make_child(self: &Arc<Self>) -> Result<(), PresenceError> {
        {
            let mut lifecycle = self.lock(&self.lifecycle);
            match lifecycle.demote_to_child() {
                Ok(()) => {}
                Err(LifecycleError::AlreadyChild) => {
                    debug!("presence {} already a child", self.agent);
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }
        }

        self.detach_body();
        self.lock(&self.motion).reset_movement();
        {
            let mut transit_state = self.lock(&self.transit_state);
            transit_state.teleport_flags = TeleportFlags::DEFAULT;
            transit_state.in_transit = false;
        }
        self.lock(&self.parcel).clear();

        self.drop_distant_neighbours();
        info!("presence {} demoted to child", self.name());
        Ok(())
    }

    /// Begin removal; returns false when a teleport asked us not to close.
    pub fn close(&self, force: bool) -> Result<bool, PresenceError> {
        {
            let mut transit_state = self.lock(&self.transit_state);
            if transit_state.do_not_close_after_teleport && !force {
                transit_state.do_not_close_after_teleport = false;
                debug!("presence {} close skipped after teleport", self.agent);
                return Ok(false);
            }
        }
        self.lock(&self.lifecycle).advance(LifecycleState::Removing)?;
        self.detach_body();
        self.lock(&self.lifecycle).advance(LifecycleState::Removed)?;
        info!("presence {} removed", self.name());
        Ok(true)
    }

    // Transit

    pub fn set_callback_uri(&self, uri: Option<String>) {
        self.lock(&self.transit_state).callback_uri = uri;
    }

    pub fn set_teleport_flags(&self, flags: TeleportFlags) {
        self.lock(&self.transit_state).teleport_flags = flags;
    }

    pub fn teleport_flags(&self) -> TeleportFlags {
        self.lock(&self.transit_state).teleport_flags
    }

    pub fn set_do_not_close_after_teleport(&self, value: bool) {
        self.lock(&self.transit_state).do_not_close_after_teleport = value;
    }

    pub fn origin_region(&self) -> Option<RegionHandle> {
        self.lock(&self.transit_state).origin_region
    }

    /// Inbound arrival: promote to root, land, and attach the body.
    pub fn complete_movement(
        self: &Arc<Self>,
        client_look: Option<Vec3>,
        declared_position: Vec3,
        flying: bool,
    ) -> Result<(), PresenceError> {
        let _guard = self
            .complete_movement_lock
            .lock()
            .expect("completion lock poisoned");

        // Wait for the departing region's hand-off confirmation unless this
        // is an NPC or a fresh login.
        let needs_handshake =
            self.kind == AgentKind::Human && !self.lock(&self.lifecycle).is_logging_in();
        if needs_handshake {
            self.wait_for_origin_confirmation()?;
        }

        let velocity = self.velocity();
        let look = transit::landing_look(client_look, velocity);

        {
            let mut lifecycle = self.lock(&self.lifecycle);
            lifecycle.advance(LifecycleState::Running)?;
            match lifecycle.promote_to_root() {
                Ok(()) => {}
                Err(LifecycleError::AlreadyRoot) => {
                    debug!("presence {} arrival raced, already root", self.agent);
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }
        }

        let flags = self.teleport_flags();
        let landed = match self.route_landing(declared_position, look, flags) {
            Ok(position) => position,
            Err(err) => {
                // The redirect was lost, not the arrival: land at the
                // requested spot and tell the client why.
                self.collab.client.send_alert(&err.to_string());
                let ground = self
                    .collab
                    .scene
                    .ground_height(declared_position.x, declared_position.y);
                landing::finalize_landing(
                    &self.region,
                    ground,
                    self.collab.physics.as_ref(),
                    declared_position,
                    self.avatar_height / 2.0,
                    flags,
                )
            }
        };

        {
            let mut motion = self.lock(&self.motion);
            motion.kinematics.position = landed;
            motion.kinematics.body_rotation = yaw_rotation_from_look(look);
            let simple_teleport = flags == TeleportFlags::DEFAULT;
            if !simple_teleport {
                motion.kinematics.velocity = Vec3::zeros();
                motion.kinematics.camera.position = landed;
            }
        }

        self.attach_body(landed, flying);
        if flags == TeleportFlags::DEFAULT {
            if let Some(actor) = self.lock(&self.body).actor() {
                actor.set_momentum(velocity);
            }
        }

        self.collab.transfer.enable_child_agents(self.agent);
        {
            let mut scheduler = self.lock(&self.scheduler);
            scheduler.arrival_grace(self.config.arrival_reprioritization_grace);
            scheduler.open_child_update_gate();
        }

        self.refresh_parcel(landed);
        self.send_terse_updates();

        let callback = self.lock(&self.transit_state).callback_uri.take();
        if let Some(uri) = callback {
            let origin = self.origin_region().unwrap_or(self.region.handle);
            self.collab.transfer.release_agent(origin, self.agent, &uri);
        }

        info!("presence {} is now root at {:?}", self.name(), landed);
        Ok(())
    }

    fn wait_for_origin_confirmation(&self) -> Result<(), PresenceError> {
        for _ in 0..self.config.handshake_attempts {
            if self.lock(&self.transit_state).origin_region.is_some() {
                return Ok(());
            }
            thread::sleep(self.config.handshake_poll_interval);
        }
        warn!(
            "presence {} never heard from its origin region",
            self.agent
        );
        Err(TransitError::PeerHandshakeTimeout {
            attempts: self.config.handshake_attempts,
        }
        .into())
    }

    fn route_landing(
        &self,
        requested: Vec3,
        look: Vec3,
        flags: TeleportFlags,
    ) -> Result<Vec3, TransitError> {
        let (routed, _look) = landing::apply_landing_policy(
            self.config.landing_policy,
            self.collab.scene.as_ref(),
            self.collab.land.as_ref(),
            self.agent,
            self.access_level(),
            requested,
            look,
            flags,
        )?;
        let ground = self.collab.scene.ground_height(routed.x, routed.y);
        Ok(landing::finalize_landing(
            &self.region,
            ground,
            self.collab.physics.as_ref(),
            routed,
            self.avatar_height / 2.0,
            flags,
        ))
    }

    /// Heartbeat: border crossing, physics sync, parcel refresh, and the
    /// scheduled update classes.
    pub fn heartbeat_tick(self: &Arc<Self>) {
        if self.is_child() || self.is_in_transit() {
            return;
        }

        self.sync_with_physics();
        if self.check_border_crossing() {
            return;
        }

        let position = self.absolute_position();
        self.refresh_parcel(position);

        let significance = self.lock(&self.scheduler).check_movement(position);
        if significance.client_movement {
            self.collab.scene.trigger_client_movement(self.agent);
        }
        if significance.significant_client_movement {
            self.collab.scene.trigger_significant_movement(self.agent);
        }

        self.maybe_send_terse_updates();
        self.maybe_reprioritize(position);
        self.maybe_push_child_position(position);
    }

    fn sync_with_physics(&self) {
        let actor = self.lock(&self.body).actor();
        let Some(actor) = actor else { return };

        let (force, asserts) = {
            let mut motion = self.lock(&self.motion);
            (motion.take_force(), motion.landing_asserts_left)
        };
        if asserts > 0 {
            actor.set_colliding(true);
            self.lock(&self.motion).landing_asserts_left = asserts - 1;
        }
        if let Some(force) = force {
            actor.set_target_velocity(force);
        }

        let position = actor.position();
        let velocity = actor.velocity();
        let mut motion = self.lock(&self.motion);
        motion.kinematics.position = position;
        motion.kinematics.velocity = velocity;
    }

    /// Returns true when the presence left the region this tick.
    fn check_border_crossing(self: &Arc<Self>) -> bool {
        let (position, velocity) = {
            let motion = self.lock(&self.motion);
            (motion.kinematics.position, motion.kinematics.velocity)
        };
        if !geo::is_finite(&position) || !geo::is_finite(&velocity) {
            // Corrupt state heals on the next agent update, not here.
            return false;
        }
        let size = (self.region.size_x, self.region.size_y);
        let Some(predicted) = transit::predict_exit(position, velocity, size) else {
            return false;
        };

        let destination = self.neighbour_at(predicted);
        let accepted = match destination {
            Some(handle) => {
                self.lock(&self.transit_state).in_transit = true;
                self.collab
                    .transfer
                    .cross_to_region(self.agent, handle, predicted, velocity)
            }
            None => false,
        };

        if accepted {
            if let Err(err) = self.make_child() {
                warn!("demotion after crossing failed: {}", err);
            }
            true
        } else {
            self.lock(&self.transit_state).in_transit = false;
            let refused = TransitError::CrossRejected {
                destination: destination
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "unknown region".to_string()),
            };
            warn!("{} for {}, reflecting inside the border", refused, self.agent);
            let pulled = transit::pull_back_inside(predicted, velocity, size);
            {
                let mut motion = self.lock(&self.motion);
                motion.kinematics.position = pulled;
                motion.kinematics.velocity = Vec3::zeros();
            }
            if let Some(actor) = self.lock(&self.body).actor() {
                actor.set_position(pulled);
                actor.set_momentum(Vec3::zeros());
            }
            false
        }
    }

    /// The neighbour whose extent contains the given world-relative exit
    /// point.
    fn neighbour_at(&self, predicted: Vec3) -> Option<RegionHandle> {
        let world_x = self.region.handle.x_meters() as f64 + predicted.x as f64;
        let world_y = self.region.handle.y_meters() as f64 + predicted.y as f64;
        let neighbours = self.lock(&self.neighbours);
        for (handle, region) in neighbours.iter() {
            let x0 = handle.x_meters() as f64;
            let y0 = handle.y_meters() as f64;
            if world_x >= x0
                && world_x < x0 + region.size_x as f64
                && world_y >= y0
                && world_y < y0 + region.size_y as f64
            {
                return Some(*handle);
            }
        }
        None
    }

    // Agent updates

    /// One inbound agent update from the client. Non-blocking.
    pub fn handle_agent_update(self: &Arc<Self>, input: &AgentUpdateInput) {
        // A corrupt position self-heals before anything else runs.
        let heal = self.lock(&self.motion).note_position();
        if let Some(position) = heal {
            let err = MotionError::NonFiniteState {
                x: position.x,
                y: position.y,
                z: position.z,
            };
            warn!("{}", err);
            let had_body = self.has_physical_body();
            self.detach_body();
            {
                let mut motion = self.lock(&self.motion);
                motion.kinematics.position = position;
                motion.kinematics.velocity = Vec3::zeros();
            }
            if had_body {
                self.attach_body(position, false);
            }
        }

        if self.is_child() || self.is_in_transit() {
            return;
        }
        self.collab.scene.record_agent_update();

        let sitting = self.is_sitting();
        let draw = input
            .draw_distance
            .clamp(MIN_DRAW_DISTANCE, self.config.max_draw_distance);
        {
            let mut motion = self.lock(&self.motion);
            motion.mouselook = input.control_flags.contains(ControlFlags::MOUSELOOK);
            motion.update_camera(input, draw);
            motion.kinematics.head_rotation = input.head_rotation;
            if !sitting {
                motion.kinematics.body_rotation = input.body_rotation;
            }
        }

        if self.lock(&self.motion).should_cam_raycast(sitting) {
            self.spawn_camera_raycast();
        }

        if input.control_flags.contains(ControlFlags::STAND_UP) {
            self.stand_up();
        }
        if input.control_flags.contains(ControlFlags::SIT_ON_GROUND) && !self.is_sitting() {
            self.sit_on_ground();
        }

        // Raw flags are kept for scripts before any masking.
        self.lock(&self.motion).raw_control_flags = input.control_flags;
        self.dispatch_script_control_events(input.control_flags);

        let ignore_mask = self.lock(&self.script_controls).ignore_mask();
        let masked = input.control_flags & !ignore_mask;

        if sitting {
            return;
        }

        let actor = self.lock(&self.body).actor();
        let (flying, colliding, colliding_down) = match &actor {
            Some(actor) => (
                self.lock(&self.motion)
                    .resolve_flying(masked.contains(ControlFlags::FLY)),
                actor.is_colliding(),
                actor.is_colliding_obstacle_down(),
            ),
            None => (false, false, false),
        };
        if let Some(actor) = &actor {
            actor.set_flying(flying);
            actor.set_orientation(self.lock(&self.motion).kinematics.body_rotation);
        }

        let mut motion = self.lock(&self.motion);
        let (mut control, mut changed) = motion.update_direction_flags(masked);
        if motion.update_stop_state(masked) {
            changed = true;
        }

        if motion.move_to_target.is_some() && masked.any_direction_down() {
            motion.cancel_move_to_target();
            changed = true;
        } else {
            match motion.step_move_to_target(flying) {
                MoveStep::Arrived { land } => {
                    changed = true;
                    if land {
                        if let Some(actor) = &actor {
                            actor.set_flying(false);
                        }
                    }
                }
                MoveStep::Updated(delta) => {
                    control += delta;
                    changed = true;
                }
                MoveStep::Inactive => {}
            }
        }

        if flying {
            let turn_left = masked.contains(ControlFlags::TURN_LEFT)
                && masked.contains(ControlFlags::YAW_POS);
            let turn_right = masked.contains(ControlFlags::TURN_RIGHT)
                && masked.contains(ControlFlags::YAW_NEG);
            let up = masked.contains(ControlFlags::UP_POS);
            let down = masked.contains(ControlFlags::UP_NEG);
            if turn_left {
                motion.apply_flying_roll(1.0, up, down);
            } else if turn_right {
                motion.apply_flying_roll(-1.0, up, down);
            } else {
                motion.relax_flying_roll();
            }
        }

        if changed {
            let braking = motion.stop_active;
            let scale = if braking { STOP_SPEED_SCALE } else { 1.0 };
            motion.add_new_movement(control, scale, braking, flying, colliding, colliding_down);
        }
    }

    fn dispatch_script_control_events(&self, raw: ControlFlags) {
        let events = self.lock(&self.script_controls).tick(raw);
        for event in events {
            self.collab
                .scripts
                .post_control_event(event.item, event.object, event.held, event.changed);
        }
    }

    fn spawn_camera_raycast(self: &Arc<Self>) {
        let presence = Arc::clone(self);
        self.tasks.spawn("camera-raycast", move || {
            let (head, camera) = {
                let motion = presence.lock(&presence.motion);
                (
                    motion.kinematics.position + Vec3::new(0.0, 0.0, CAMERA_RAY_HEAD_OFFSET),
                    motion.kinematics.camera.position,
                )
            };
            let direction = camera - head;
            let length = direction.norm();
            if length > f32::EPSILON {
                let hits = presence.collab.physics.raycast(
                    head,
                    direction / length,
                    length,
                    CAMERA_RAY_MAX_HITS,
                );
                if let Some(hit) = hits.iter().find(|hit| !hit.is_volume_detect) {
                    let normal = geo::round_vec(&hit.normal, 2);
                    let point = geo::round_vec(&hit.position, 1);
                    let plane =
                        Plane::new(normal.x, normal.y, normal.z, normal.dot(&point));
                    presence.collab.client.send_camera_constraint(&plane);
                }
            }
            presence.lock(&presence.motion).cam_raycast_in_flight = false;
        });
    }

    /// Autopilot toward a point.
    pub fn move_to_target(&self, target: Vec3, tolerance: f32, land_at_target: bool) {
        self.lock(&self.motion)
            .start_move_to_target(target, tolerance, land_at_target);
    }

    pub fn is_moving_to_target(&self) -> bool {
        self.lock(&self.motion).move_to_target.is_some()
    }

    pub fn set_speed_modifier(&self, modifier: f32) {
        self.lock(&self.motion).speed_modifier = modifier;
    }

    pub fn set_always_run(&self, always_run: bool) {
        self.lock(&self.motion).always_run = always_run;
    }

    pub fn set_fly_overrides(&self, force_fly: bool, fly_disabled: bool) {
        let mut motion = self.lock(&self.motion);
        motion.force_fly = force_fly;
        motion.fly_disabled = fly_disabled;
    }

    // Physics callbacks

    /// Collision callback from the physics engine thread. Faults are
    /// converted, never propagated.
    pub fn physics_collision_update(&self, contacts: &[ContactPoint]) {
        if contacts.iter().any(|c| !geo::is_finite(&c.position)) {
            let err = MotionError::PhysicsFault {
                context: "non-finite collision contact",
            };
            warn!("{}", err);
            self.collab.client.send_alert("Physics fault detected");
            return;
        }

        let position = self.absolute_position();
        let allow_sounds = self
            .collab
            .land
            .parcel_at(position.x, position.y)
            .map(|parcel| parcel.allow_sounds)
            .unwrap_or(true);

        let output = {
            let mut body = self.lock(&self.body);
            if !body.is_attached() {
                return;
            }
            body.process_tick(
                contacts,
                self.local_id,
                self.is_elevated(),
                allow_sounds,
                self.collab.scene.as_ref(),
                self.collab.attachments.as_ref(),
                self.collab.scripts.as_ref(),
                self.collab.audio.as_ref(),
                self.agent,
            )
        };

        if let Some(health) = output.health_changed {
            self.collab.client.send_health(health);
        }
        if output.died {
            self.collab
                .scripts
                .post_avatar_killed(self.agent, LocalId::GROUND);
            self.collab.client.send_health(self.health());
        }
    }

    // Sitting

    /// Client asked to sit on a part, with the click offset relative to it.
    pub fn handle_sit_request(&self, clicked: LocalId, requested_offset: Vec3) {
        match self.try_sit(clicked, requested_offset) {
            Ok(()) => {}
            Err(err) => {
                debug!("sit refused for {}: {}", self.agent, err);
                self.collab.client.send_alert("There is no suitable surface to sit on");
            }
        }
    }

    fn try_sit(&self, clicked: LocalId, requested_offset: Vec3) -> Result<(), SitError> {
        if self.is_sitting() {
            self.stand_up();
        }

        let part = sit::resolve_sit_part(self.collab.scene.as_ref(), clicked)
            .ok_or(SitError::PartNotFound { part: clicked.0 })?;

        let pose = if part.sit_target_available() {
            sit::explicit_sit_pose(&part, self.config.legacy_sit_offsets, self.avatar_height)
                .ok_or(SitError::SitRefused)?
        } else {
            let hit_point = part.world_position()
                + part.world_rotation().transform_vector(&requested_offset);
            match self.collab.physics.sit_on_surface(
                part.local_id(),
                hit_point,
                self.avatar_height,
            ) {
                Some(solution) => sit::surface_sit_pose(&part, solution.position, solution.rotation),
                None => {
                    let distance = (self.absolute_position() - hit_point).norm();
                    if distance > sit::MAX_SIT_DISTANCE {
                        return Err(SitError::SitRefused);
                    }
                    sit::surface_sit_pose(&part, hit_point, part.world_rotation())
                }
            }
        };

        self.accept_sit(&part, pose);
        Ok(())
    }

    fn accept_sit(&self, part: &Arc<ScenePart>, pose: sit::SitPose) {
        self.detach_body();
        {
            let mut motion = self.lock(&self.motion);
            motion.cancel_move_to_target();
            motion.kinematics.velocity = Vec3::zeros();
            motion.kinematics.angular_velocity = Vec3::zeros();
            motion.kinematics.position = pose.offset;
            motion.kinematics.body_rotation = pose.rotation;
            motion.animation.set_movement(&pose.animation);
        }

        part.seat_avatar(self.agent);
        let sit_target_rotation = if pose.used_sit_target {
            part.sit_target().map(|t| t.rotation)
        } else {
            None
        };
        self.lock(&self.seat).seat_on(
            pose.object,
            pose.part,
            pose.offset,
            pose.rotation,
            sit_target_rotation,
        );

        let response: SitResponse =
            sit::compose_sit_response(self.collab.scene.as_ref(), part, &pose);
        self.collab.client.send_sit_response(&response);
        self.collab.scripts.post_link_changed(part.root_local_id());
    }

    pub fn sit_on_ground(&self) {
        self.detach_body();
        {
            let mut motion = self.lock(&self.motion);
            motion.kinematics.angular_velocity = Vec3::zeros();
            motion.kinematics.velocity = Vec3::zeros();
            motion.animation.set_movement(SIT_GROUND_ANIMATION);
        }
        self.lock(&self.seat).seat_on_ground();
    }

    pub fn stand_up(&self) {
        let released = self.lock(&self.seat).release();

        if let Some((object, part_id, relative_rotation)) = released {
            let removed = self.lock(&self.script_controls).unregister_object(object);
            if !removed.is_empty() {
                self.collab
                    .client
                    .send_take_controls(ControlFlags::empty(), false, true);
            }
            self.collab.scripts.revoke_camera_permissions(self.agent, object);

            if let Some(part) = self.collab.scene.find_part(part_id) {
                let (position, rotation) = sit::stand_pose(
                    part.world_position(),
                    part.world_rotation(),
                    relative_rotation,
                    self.avatar_height / 2.0,
                );
                {
                    let mut motion = self.lock(&self.motion);
                    motion.kinematics.position = position;
                    motion.kinematics.body_rotation = rotation;
                }
                part.unseat_avatar(self.agent);
                self.collab.scripts.post_link_changed(part.root_local_id());
            }
        }

        let position = self.lock(&self.motion).kinematics.position;
        if !self.has_physical_body() && !self.is_child() {
            self.attach_body(position, false);
        }
        self.lock(&self.motion).animation.set_movement(STAND_ANIMATION);
    }

    // Script controls

    /// Take-controls request from a script.
    pub fn handle_take_controls(
        &self,
        item: ItemId,
        object: ObjectId,
        controls: ControlFlags,
        accept: bool,
        pass_on: bool,
    ) {
        self.lock(&self.script_controls)
            .register(item, object, controls, accept, pass_on);
        self.collab
            .client
            .send_take_controls(controls, accept, pass_on);
    }

    pub fn release_script_controls(&self, item: ItemId) {
        self.lock(&self.script_controls).unregister(item);
    }

    pub fn script_ignore_mask(&self) -> ControlFlags {
        self.lock(&self.script_controls).ignore_mask()
    }

    // Parcels & visibility

    fn refresh_parcel(&self, position: Vec3) {
        let Some(parcel_info) = self.collab.land.parcel_at(position.x, position.y) else {
            return;
        };
        let changed = self.lock(&self.parcel).current_id() != Some(parcel_info.id);
        if !changed {
            return;
        }

        let peers = self.peer_snapshot();
        let views: Vec<PeerView> = peers.iter().map(|p| p.peer_view()).collect();
        let lists = self
            .lock(&self.parcel)
            .enter_parcel(self.access_level(), &parcel_info, &views);
        self.apply_visibility_lists(&lists, &peers);
    }

    /// Elevation change: reveal or re-hide privacy-parcel occupants.
    pub fn set_access_level(&self, level: u8) {
        let previous = self.access_level.swap(level, Ordering::AcqRel);
        let was_elevated = previous >= ELEVATED_ACCESS_LEVEL;
        let now_elevated = level >= ELEVATED_ACCESS_LEVEL;
        if was_elevated == now_elevated {
            return;
        }

        let my_parcel = self.lock(&self.parcel).current_id();
        let peers = self.peer_snapshot();
        let views: Vec<PeerView> = peers.iter().map(|p| p.peer_view()).collect();
        let lists = parcel::god_level_toggled(now_elevated, my_parcel, &views);
        self.apply_visibility_lists(&lists, &peers);
    }

    fn peer_snapshot(&self) -> Vec<Arc<Presence>> {
        self.collab
            .scene
            .presences()
            .into_iter()
            .filter(|p| p.agent_id() != self.agent)
            .collect()
    }

    fn apply_visibility_lists(&self, lists: &parcel::VisibilityLists, peers: &[Arc<Presence>]) {
        let find = |agent: AgentId| peers.iter().find(|p| p.agent_id() == agent);

        if !lists.kill_to_them.is_empty() {
            let kill_list = self.kill_list();
            for agent in &lists.kill_to_them {
                if let Some(peer) = find(*agent) {
                    peer.collab.client.send_kill(&kill_list);
                }
            }
        }
        for agent in &lists.kill_to_me {
            if let Some(peer) = find(*agent) {
                self.collab.client.send_kill(&peer.kill_list());
            }
        }
        for agent in &lists.show_to_them {
            if let Some(peer) = find(*agent) {
                self.show_to(peer);
            }
        }
        for agent in &lists.show_to_me {
            if let Some(peer) = find(*agent) {
                peer.show_to(self);
            }
        }
    }

    /// Local ids destroyed when this presence disappears from a viewer:
    /// the avatar plus every attachment root.
    fn kill_list(&self) -> Vec<LocalId> {
        let mut ids = vec![self.local_id];
        ids.extend(self.collab.attachments.root_local_ids(self.agent));
        ids
    }

    /// Push everything a viewer needs to start rendering this presence.
    fn show_to(&self, observer: &Presence) {
        let sink = observer.collab.client.as_ref();
        sink.send_avatar_data(&self.avatar_data());
        let appearance = self.lock(&self.appearance).appearance.clone();
        sink.send_appearance(self.agent, &appearance);
        let animation = self.animation();
        sink.send_animations(self.agent, &animation.animations);
        self.collab
            .attachments
            .send_attachments_to(self.agent, observer.agent_id());
    }

    // Scheduled updates

    fn maybe_send_terse_updates(&self) {
        let sitting = self.is_sitting();
        let (position, rotation, velocity) = {
            let motion = self.lock(&self.motion);
            (
                motion.kinematics.position,
                motion.kinematics.body_rotation,
                motion.kinematics.velocity,
            )
        };
        let due = self
            .lock(&self.scheduler)
            .needs_terse_update(sitting, position, rotation, velocity);
        if due {
            self.send_terse_updates();
        }
    }

    /// Broadcast a terse update to our own client and every peer the
    /// visibility rules allow.
    pub fn send_terse_updates(&self) {
        let update = self.build_entity_update();
        self.collab
            .client
            .send_entity_update(&update, EntityUpdateFlags::TERSE);

        let hidden = self.current_parcel_hides();
        let my_parcel = self.lock(&self.parcel).current_id();
        for peer in self.peer_snapshot() {
            let view = peer.peer_view();
            if parcel::observer_can_see(hidden, my_parcel, view.parcel, view.access_level) {
                peer.collab
                    .client
                    .send_entity_update(&update, EntityUpdateFlags::TERSE);
            }
        }
    }

    fn build_entity_update(&self) -> EntityUpdate {
        let (position, rotation, velocity, angular_velocity) = {
            let motion = self.lock(&self.motion);
            (
                motion.kinematics.position,
                motion.kinematics.body_rotation,
                motion.kinematics.velocity,
                motion.kinematics.angular_velocity,
            )
        };
        EntityUpdate {
            local_id: self.local_id,
            position,
            rotation,
            velocity,
            acceleration: Vec3::zeros(),
            angular_velocity,
            collision_plane: self.collision_plane(),
        }
    }

    fn maybe_reprioritize(self: &Arc<Self>, position: Vec3) {
        let threshold = if self.is_child() {
            self.config.child_reprioritization_distance
        } else {
            self.config.root_reprioritization_distance
        };
        let guard = self
            .lock(&self.scheduler)
            .try_begin_reprioritization(position, threshold);
        if let Some(guard) = guard {
            let presence = Arc::clone(self);
            self.tasks.spawn("reprioritize", move || {
                presence.collab.client.reprioritize();
                drop(guard);
            });
        }
    }

    fn maybe_push_child_position(self: &Arc<Self>, position: Vec3) {
        let handles = self.lock(&self.neighbours).handles();
        if handles.is_empty() {
            return;
        }
        let guard = self.lock(&self.scheduler).try_begin_child_push(position);
        if let Some(guard) = guard {
            let presence = Arc::clone(self);
            let update = crate::scene::ChildAgentPositionUpdate {
                agent: self.agent,
                region: self.region.handle,
                position,
                velocity: self.velocity(),
                draw_distance: self.draw_distance(),
            };
            self.tasks.spawn("child-position-push", move || {
                presence
                    .collab
                    .transfer
                    .send_child_agent_position(&update, &handles);
                drop(guard);
            });
        }
    }

    // Neighbours

    pub fn add_neighbour(&self, handle: RegionHandle, seed_capability: &str, size_x: u32, size_y: u32) {
        self.lock(&self.neighbours).insert(
            handle,
            NeighbourRegion {
                seed_capability: seed_capability.to_string(),
                size_x,
                size_y,
            },
        );
    }

    pub fn neighbour_handles(&self) -> Vec<RegionHandle> {
        self.lock(&self.neighbours).handles()
    }

    /// Close child agents on every neighbour now outside the view
    /// rectangle. The close is best effort and runs in the background;
    /// local entries go regardless.
    pub fn drop_distant_neighbours(self: &Arc<Self>) {
        let view = self.region_view_distance();
        let outside = {
            let neighbours = self.lock(&self.neighbours);
            neighbours.outside_view((self.region.size_x, self.region.size_y), view)
        };
        if outside.is_empty() {
            return;
        }
        for handle in &outside {
            self.lock(&self.neighbours).remove(*handle);
        }
        let presence = Arc::clone(self);
        self.tasks.spawn("neighbour-close", move || {
            for handle in outside {
                let closed = presence.collab.grid.close_child_agent(
                    handle,
                    presence.agent,
                    presence.session,
                );
                if !closed {
                    warn!(
                        "{}",
                        TransitError::NeighbourCloseFailed {
                            handle: handle.to_string(),
                        }
                    );
                }
            }
        });
    }

    /// Explicit view-distance change from the client; distant neighbours
    /// are re-evaluated here rather than on promotion.
    pub fn set_draw_distance(self: &Arc<Self>, draw_distance: f32) {
        let clamped = draw_distance.clamp(MIN_DRAW_DISTANCE, self.config.max_draw_distance);
        self.lock(&self.motion).kinematics.draw_distance = clamped;
        self.drop_distant_neighbours();
    }

    // Local teleport

    /// Teleport inside this region, honouring the landing policy.
    pub fn teleport_within_region(
        &self,
        requested: Vec3,
        look_at: Vec3,
        flags: TeleportFlags,
    ) -> Result<(), PresenceError> {
        if self.is_sitting() {
            self.stand_up();
        }
        let landed = match self.route_landing(requested, look_at, flags) {
            Ok(position) => position,
            Err(err) => {
                self.collab.client.send_alert(&err.to_string());
                return Err(err.into());
            }
        };

        self.detach_body();
        {
            let mut motion = self.lock(&self.motion);
            motion.kinematics.position = landed;
            motion.kinematics.velocity = Vec3::zeros();
        }
        if !self.is_child() {
            self.attach_body(landed, false);
        }
        self.collab.client.send_local_teleport(landed, look_at, flags);
        self.refresh_parcel(landed);
        self.send_terse_updates();
        Ok(())
    }

    // Hand-off payload

    /// Everything a peer region needs to reconstruct this presence.
    pub fn copy_to_payload(&self) -> AgentTransitPayload {
        let (kinematics, animation, control_flags, always_run) = {
            let motion = self.lock(&self.motion);
            (
                motion.kinematics.clone(),
                motion.animation.clone(),
                motion.raw_control_flags,
                motion.always_run,
            )
        };
        let (parent_part, prev_sit_offset) = {
            let seat = self.lock(&self.seat);
            (seat.parent_part(), seat.prev_sit_offset())
        };
        let (appearance, throttle) = {
            let state = self.lock(&self.appearance);
            (state.appearance.clone(), state.throttle.clone())
        };
        let script_controls = self.lock(&self.script_controls).export();
        let child_regions = {
            let neighbours = self.lock(&self.neighbours);
            neighbours
                .iter()
                .map(|(handle, region)| ChildRegionEntry {
                    handle: *handle,
                    seed_capability: region.seed_capability.clone(),
                    size_x: region.size_x,
                    size_y: region.size_y,
                })
                .collect()
        };

        AgentTransitPayload {
            agent: self.agent,
            session: self.session,
            origin_region: Some(self.region.handle),
            position: kinematics.position,
            velocity: kinematics.velocity,
            camera_position: kinematics.camera.position,
            camera_at_axis: kinematics.camera.at_axis,
            camera_left_axis: kinematics.camera.left_axis,
            camera_up_axis: kinematics.camera.up_axis,
            draw_distance: kinematics.draw_distance,
            throttle,
            head_rotation: kinematics.head_rotation,
            body_rotation: kinematics.body_rotation,
            control_flags,
            access_level: self.access_level(),
            always_run,
            appearance,
            parent_part,
            prev_sit_offset,
            script_controls,
            animation,
            attachments: self.collab.attachments.copy_to_payload(self.agent),
            child_regions,
        }
    }

    /// Rebuild state from a peer's payload. Confirms the hand-off origin,
    /// which releases any `complete_movement` waiting on it.
    pub fn restore_from_payload(&self, payload: &AgentTransitPayload) {
        {
            let mut motion = self.lock(&self.motion);
            motion.kinematics.position = payload.position;
            motion.kinematics.velocity = payload.velocity;
            motion.kinematics.camera.position = payload.camera_position;
            motion.kinematics.camera.at_axis = payload.camera_at_axis;
            motion.kinematics.camera.left_axis = payload.camera_left_axis;
            motion.kinematics.camera.up_axis = payload.camera_up_axis;
            motion.kinematics.draw_distance = payload.draw_distance;
            motion.kinematics.head_rotation = payload.head_rotation;
            motion.kinematics.body_rotation = payload.body_rotation;
            motion.raw_control_flags = payload.control_flags;
            motion.always_run = payload.always_run;
            motion.animation = payload.animation.clone();
        }
        self.lock(&self.seat)
            .restore_linkage(payload.parent_part, payload.prev_sit_offset);
        {
            let mut appearance = self.lock(&self.appearance);
            appearance.appearance = payload.appearance.clone();
            appearance.throttle = payload.throttle.clone();
        }
        self.lock(&self.script_controls).import(&payload.script_controls);
        self.access_level.store(payload.access_level, Ordering::Release);
        {
            let mut neighbours = self.lock(&self.neighbours);
            for entry in &payload.child_regions {
                neighbours.insert(
                    entry.handle,
                    NeighbourRegion {
                        seed_capability: entry.seed_capability.clone(),
                        size_x: entry.size_x,
                        size_y: entry.size_y,
                    },
                );
            }
        }
        self.collab
            .attachments
            .restore_from_payload(self.agent, &payload.attachments);
        self.lock(&self.transit_state).origin_region = payload.origin_region;
    }

    pub fn set_appearance(&self, appearance: Vec<u8>, throttle: Vec<u8>) {
        let mut state = self.lock(&self.appearance);
        state.appearance = appearance;
        state.throttle = throttle;
    }

    // Body plumbing

    fn attach_body(&self, position: Vec3, flying: bool) {
        let shape = AvatarShape {
            height: self.avatar_height,
            ..AvatarShape::default()
        };
        let actor = self
            .collab
            .physics
            .add_avatar(self.local_id, position, &shape, flying);
        self.collab
            .physics
            .subscribe_collisions(self.local_id, COLLISION_SUBSCRIPTION_MS);
        self.lock(&self.body).attach(actor);
    }

    fn detach_body(&self) {
        let detached = self.lock(&self.body).detach();
        if detached.is_some() {
            self.collab.physics.remove_avatar(self.local_id);
        }
    }

    // Lock helper: recover a poisoned component lock rather than cascade
    // the panic through the region thread.
    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Body rotation facing along a (surface-projected) look vector.
fn yaw_rotation_from_look(look: Vec3) -> Quat {
    let planar = geo::horizontal(&look);
    if planar.norm_squared() <= f32::EPSILON {
        return Quat::identity();
    }
    Quat::from_euler_angles(0.0, 0.0, planar.y.atan2(planar.x))
}

