//! Mirror of the presence in the physics world.
//!
//! Owns the physics actor handle exclusively; the other components observe
//! it through the orchestrator. Collision callbacks land here and turn into
//! collision-plane updates, sounds, script events, and damage.

use std::collections::HashSet;
use std::sync::Arc;

use log::debug;

use crate::geo::{default_plane, Plane, Vec3};
use crate::ids::LocalId;
use crate::scene::{
    AttachmentModule, AudioSink, CollisionEventKind, CollisionSound, ContactPoint, PhysicsActor,
    Scene, ScriptSink,
};

/// Cadence at which the physics engine reports collisions for avatars.
pub const COLLISION_SUBSCRIPTION_MS: u32 = 100;

const COLLISION_SOUND_MIN_SPEED: f32 = 0.2;
const DAMAGE_PENETRATION_MIN: f32 = 0.10;
const DAMAGE_PER_DEPTH: f32 = 5.0;
const HEALTH_REGEN_PER_TICK: f32 = 0.03;
const MAX_HEALTH: f32 = 100.0;

/// Collision sets for one physics tick, diffed against the previous tick.
#[derive(Debug, Default)]
pub struct CollisionSets {
    pub started: Vec<ContactPoint>,
    pub continuing: Vec<ContactPoint>,
    pub ended: Vec<LocalId>,
}

/// What one collision tick asked the orchestrator to do.
#[derive(Debug, Default)]
pub struct CollisionTickOutput {
    /// New collision plane, when it moved this tick.
    pub plane_changed: Option<Plane>,
    /// New health value, when damage or regeneration changed it.
    pub health_changed: Option<f32>,
    /// Health reached zero this tick.
    pub died: bool,
}

pub struct PhysicalBody {
    actor: Option<Arc<dyn PhysicsActor>>,
    previous_colliders: HashSet<LocalId>,
    collision_plane: Plane,
    health: f32,
    invulnerable: bool,
}

impl PhysicalBody {
    pub fn new() -> Self {
        Self {
            actor: None,
            previous_colliders: HashSet::new(),
            collision_plane: default_plane(),
            health: MAX_HEALTH,
            invulnerable: false,
        }
    }

    pub fn attach(&mut self, actor: Arc<dyn PhysicsActor>) {
        self.previous_colliders.clear();
        self.collision_plane = default_plane();
        self.actor = Some(actor);
    }

    pub fn detach(&mut self) -> Option<Arc<dyn PhysicsActor>> {
        self.previous_colliders.clear();
        self.collision_plane = default_plane();
        self.actor.take()
    }

    pub fn actor(&self) -> Option<Arc<dyn PhysicsActor>> {
        self.actor.clone()
    }

    pub fn is_attached(&self) -> bool {
        self.actor.is_some()
    }

    pub fn collision_plane(&self) -> Plane {
        self.collision_plane
    }

    pub fn health(&self) -> f32 {
        self.health
    }

    pub fn set_health(&mut self, health: f32) {
        self.health = health.clamp(0.0, MAX_HEALTH);
    }

    pub fn is_invulnerable(&self) -> bool {
        self.invulnerable
    }

    pub fn set_invulnerable(&mut self, invulnerable: bool) {
        self.invulnerable = invulnerable;
    }

    /// Diff this tick's contacts against the previous tick's collider set.
    pub fn classify(&mut self, contacts: &[ContactPoint]) -> CollisionSets {
        let mut sets = CollisionSets::default();
        let mut current: HashSet<LocalId> = HashSet::with_capacity(contacts.len());

        for contact in contacts {
            current.insert(contact.other);
            if self.previous_colliders.contains(&contact.other) {
                sets.continuing.push(*contact);
            } else {
                sets.started.push(*contact);
            }
        }
        for old in &self.previous_colliders {
            if !current.contains(old) {
                sets.ended.push(*old);
            }
        }
        self.previous_colliders = current;
        sets
    }

    /// Recompute the surface clamp plane from the feet contacts. Returns the
    /// plane when it changed.
    pub fn update_collision_plane(&mut self, contacts: &[ContactPoint]) -> Option<Plane> {
        let lowest_feet = contacts
            .iter()
            .filter(|c| c.character_feet)
            .min_by(|a, b| a.position.z.total_cmp(&b.position.z));

        let plane = match lowest_feet {
            Some(contact) => {
                let normal = -contact.normal;
                let offset = normal.dot(&contact.position);
                Plane::new(normal.x, normal.y, normal.z, offset)
            }
            None => default_plane(),
        };

        if plane != self.collision_plane {
            self.collision_plane = plane;
            Some(plane)
        } else {
            None
        }
    }

    /// Run one full collision tick: diff sets, plane, sounds, script
    /// events, damage, and regeneration.
    #[allow(clippy::too_many_arguments)]
    pub fn process_tick(
        &mut self,
        contacts: &[ContactPoint],
        my_local_id: LocalId,
        skip_damage: bool,
        parcel_allows_sounds: bool,
        scene: &dyn Scene,
        attachments: &dyn AttachmentModule,
        scripts: &dyn ScriptSink,
        audio: &dyn AudioSink,
        agent: crate::ids::AgentId,
    ) -> CollisionTickOutput {
        let mut output = CollisionTickOutput::default();
        let sets = self.classify(contacts);

        if let Some(plane) = self.update_collision_plane(contacts) {
            output.plane_changed = Some(plane);
        }

        // Impact sounds for fresh contacts, where the land allows them.
        if parcel_allows_sounds {
            for contact in &sets.started {
                if contact.relative_speed <= COLLISION_SOUND_MIN_SPEED || contact.other.is_ground()
                {
                    continue;
                }
                if let Some(part) = scene.find_part(contact.other) {
                    if let Some((sound, volume)) = part.collision_sound() {
                        audio.queue_collision_sound(&CollisionSound {
                            sound,
                            volume,
                            position: contact.position,
                        });
                    }
                }
            }
        }

        self.dispatch_script_events(&sets, attachments, scripts, agent);

        let starting_health = self.health;
        if !skip_damage && !self.invulnerable {
            self.apply_damage(&sets, scene);
        }
        self.health = (self.health + HEALTH_REGEN_PER_TICK).min(MAX_HEALTH);

        if (self.health - starting_health).abs() > f32::EPSILON {
            output.health_changed = Some(self.health);
        }
        if self.health <= 0.0 {
            debug!("presence {} killed by collision damage", my_local_id);
            output.died = true;
            self.health = MAX_HEALTH;
        }
        output
    }

    fn dispatch_script_events(
        &self,
        sets: &CollisionSets,
        attachments: &dyn AttachmentModule,
        scripts: &dyn ScriptSink,
        agent: crate::ids::AgentId,
    ) {
        let subscribers = attachments.collision_subscribers(agent);
        if subscribers.is_empty() {
            return;
        }

        let started_objects: Vec<LocalId> = sets
            .started
            .iter()
            .filter(|c| !c.other.is_ground())
            .map(|c| c.other)
            .collect();
        let continuing_objects: Vec<LocalId> = sets
            .continuing
            .iter()
            .filter(|c| !c.other.is_ground())
            .map(|c| c.other)
            .collect();
        let ended_objects: Vec<LocalId> = sets
            .ended
            .iter()
            .filter(|id| !id.is_ground())
            .copied()
            .collect();

        let land_started = sets.started.iter().any(|c| c.other.is_ground());
        let land_continuing = sets.continuing.iter().any(|c| c.other.is_ground());
        let land_ended = sets.ended.iter().any(|id| id.is_ground());

        for subscriber in subscribers {
            if !started_objects.is_empty() {
                scripts.post_collision_event(
                    subscriber,
                    CollisionEventKind::Start,
                    &started_objects,
                );
            }
            if !continuing_objects.is_empty() {
                scripts.post_collision_event(
                    subscriber,
                    CollisionEventKind::Continue,
                    &continuing_objects,
                );
            }
            if !ended_objects.is_empty() {
                scripts.post_collision_event(subscriber, CollisionEventKind::End, &ended_objects);
            }
            if land_started {
                scripts.post_collision_event(
                    subscriber,
                    CollisionEventKind::LandStart,
                    &[LocalId::GROUND],
                );
            }
            if land_continuing {
                scripts.post_collision_event(
                    subscriber,
                    CollisionEventKind::LandContinue,
                    &[LocalId::GROUND],
                );
            }
            if land_ended {
                scripts.post_collision_event(
                    subscriber,
                    CollisionEventKind::LandEnd,
                    &[LocalId::GROUND],
                );
            }
        }
    }

    fn apply_damage(&mut self, sets: &CollisionSets, scene: &dyn Scene) {
        for contact in sets.started.iter().chain(sets.continuing.iter()) {
            if contact.other.is_ground() {
                continue;
            }
            let damage_dealt = scene
                .find_part(contact.other)
                .and_then(|part| scene.find_part(part.root_local_id()))
                .map(|root| (root.local_id(), root.damage()))
                .filter(|(_, damage)| *damage > 0.0);

            if let Some((root_id, damage)) = damage_dealt {
                self.health -= damage;
                scene.delete_object(root_id);
                continue;
            }

            if contact.penetration_depth >= DAMAGE_PENETRATION_MIN {
                self.health -= contact.penetration_depth * DAMAGE_PER_DEPTH;
            }
        }
    }
}

impl Default for PhysicalBody {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(other: u32, z: f32, feet: bool) -> ContactPoint {
        ContactPoint {
            other: LocalId(other),
            position: Vec3::new(10.0, 10.0, z),
            normal: Vec3::new(0.0, 0.0, 1.0),
            penetration_depth: 0.0,
            relative_speed: 0.0,
            character_feet: feet,
        }
    }

    #[test]
    fn classify_diffs_against_previous_tick() {
        let mut body = PhysicalBody::new();
        let sets = body.classify(&[contact(1, 0.0, false)]);
        assert_eq!(sets.started.len(), 1);
        assert!(sets.continuing.is_empty());
        assert!(sets.ended.is_empty());

        let sets = body.classify(&[contact(1, 0.0, false), contact(2, 0.0, false)]);
        assert_eq!(sets.started.len(), 1);
        assert_eq!(sets.started[0].other, LocalId(2));
        assert_eq!(sets.continuing.len(), 1);

        let sets = body.classify(&[contact(2, 0.0, false)]);
        assert_eq!(sets.ended, vec![LocalId(1)]);
    }

    #[test]
    fn collision_plane_prefers_lowest_feet_contact() {
        let mut body = PhysicalBody::new();
        let contacts = [
            contact(1, 5.0, true),
            contact(2, 2.0, true),
            contact(3, 1.0, false),
        ];
        let plane = body.update_collision_plane(&contacts).expect("plane moves");
        // Negated normal of the z=2 feet contact.
        assert_eq!(plane.x, 0.0);
        assert_eq!(plane.z, -1.0);
        assert_eq!(plane.w, -2.0);
    }

    #[test]
    fn collision_plane_resets_without_feet_contacts() {
        let mut body = PhysicalBody::new();
        body.update_collision_plane(&[contact(1, 2.0, true)]);
        let plane = body
            .update_collision_plane(&[contact(1, 2.0, false)])
            .expect("plane resets");
        assert_eq!(plane, default_plane());
    }

    #[test]
    fn health_clamps_and_regenerates() {
        let mut body = PhysicalBody::new();
        body.set_health(150.0);
        assert_eq!(body.health(), MAX_HEALTH);
        body.set_health(-5.0);
        assert_eq!(body.health(), 0.0);
    }
}
