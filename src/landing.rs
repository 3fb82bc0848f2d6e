//! Where an arriving avatar actually ends up: estate bans, telehub
//! routing, parcel landing points, and the final clamp-and-raise above
//! ground (with an optional downward probe for platforms).

use log::debug;

use crate::config::{LandingPolicyKind, RegionInfo};
use crate::controls::flags::TeleportFlags;
use crate::error::TransitError;
use crate::geo::{self, Vec3};
use crate::ids::AgentId;
use crate::parcel::ELEVATED_ACCESS_LEVEL;
use crate::scene::{
    LandChannel, ParcelLandingType, PhysicsScene, RayHit, Scene, SpawnPointMode, Telehub,
};

/// Downward landing probes start this high unless the ground is higher.
const LANDING_TEST_HEIGHT: f32 = 600.0;
const LANDING_TEST_ABOVE_GROUND: f32 = 100.0;
const LANDING_MAX_HITS: usize = 30;
/// Surfaces closer than this are merged into one platform.
const LANDING_SURFACE_GAP: f32 = 50.0;

/// Resolve the arrival position for a teleport or login.
pub fn apply_landing_policy(
    policy: LandingPolicyKind,
    scene: &dyn Scene,
    land: &dyn LandChannel,
    agent: AgentId,
    access_level: u8,
    requested: Vec3,
    look_at: Vec3,
    flags: TeleportFlags,
) -> Result<(Vec3, Vec3), TransitError> {
    if scene.is_estate_banned(agent) {
        return Err(TransitError::LandingDenied {
            reason: "banned from estate",
        });
    }

    let elevated = access_level >= ELEVATED_ACCESS_LEVEL;

    match policy {
        LandingPolicyKind::Permissive => {
            if let Some(telehub) = scene.telehub() {
                if !scene.allows_direct_teleport() {
                    let position = telehub_route(&telehub, land, agent, requested);
                    return Ok((position, look_at));
                }
            }
            if let Some(parcel) = land.parcel_at(requested.x, requested.y) {
                let privileged =
                    parcel.owner == agent || scene.is_estate_manager(agent) || elevated;
                if parcel.landing_type == ParcelLandingType::LandingPoint
                    && parcel.has_user_location()
                    && !privileged
                    && flags.is_routable_arrival()
                {
                    debug!("redirecting arrival to parcel landing point");
                    return Ok((parcel.user_location, look_at));
                }
            }
            Ok((requested, look_at))
        }
        LandingPolicyKind::Strict => {
            if elevated {
                return Ok((requested, look_at));
            }
            if !scene.allows_direct_teleport() {
                if let Some(telehub) = scene.telehub() {
                    let position = telehub_route(&telehub, land, agent, requested);
                    return Ok((position, look_at));
                }
            }
            if let Some(parcel) = land.parcel_at(requested.x, requested.y) {
                let privileged = parcel.owner == agent || scene.is_estate_manager(agent);
                if parcel.landing_type == ParcelLandingType::LandingPoint
                    && parcel.has_user_location()
                    && !privileged
                    && flags.is_routable_arrival()
                {
                    let look = if parcel.user_look_at != Vec3::zeros() {
                        parcel.user_look_at
                    } else {
                        look_at
                    };
                    return Ok((parcel.user_location, look));
                }
            }
            Ok((requested, look_at))
        }
    }
}

/// Choose a telehub spawn point for this avatar.
pub fn telehub_route(
    telehub: &Telehub,
    land: &dyn LandChannel,
    agent: AgentId,
    requested: Vec3,
) -> Vec3 {
    let spawns: Vec<Vec3> = telehub
        .spawn_points
        .iter()
        .map(|offset| telehub.position + telehub.rotation.transform_vector(offset))
        .collect();

    if spawns.is_empty() {
        return telehub.position;
    }

    match telehub.mode {
        SpawnPointMode::Random => {
            let mut order: Vec<usize> = (0..spawns.len()).collect();
            fastrand::shuffle(&mut order);
            for index in order {
                if land.allows_avatar(agent, spawns[index]) {
                    return spawns[index];
                }
            }
            // Exhausted: fall through to sequence order.
            sequence_route(&spawns, land, agent)
        }
        SpawnPointMode::Sequence => sequence_route(&spawns, land, agent),
        SpawnPointMode::Closest => {
            let mut best: Option<(f32, Vec3)> = None;
            for spawn in &spawns {
                if !land.allows_avatar(agent, *spawn) {
                    continue;
                }
                let dist_sq = (spawn - requested).norm_squared();
                if best.map(|(d, _)| dist_sq < d).unwrap_or(true) {
                    best = Some((dist_sq, *spawn));
                }
            }
            best.map(|(_, p)| p).unwrap_or(telehub.position)
        }
    }
}

fn sequence_route(spawns: &[Vec3], land: &dyn LandChannel, agent: AgentId) -> Vec3 {
    for spawn in spawns {
        if land.allows_avatar(agent, *spawn) {
            return *spawn;
        }
    }
    spawns[0]
}

/// Clamp into the region, raise above ground, and (for location-based
/// arrivals with ray-casting available) land on the topmost platform under
/// the requested point.
pub fn finalize_landing(
    region: &RegionInfo,
    ground_height: f32,
    physics: &dyn PhysicsScene,
    position: Vec3,
    avatar_half_height: f32,
    flags: TeleportFlags,
) -> Vec3 {
    let mut landed = geo::clamp_into_region(position, region.size_x, region.size_y);

    let floor = ground_height + avatar_half_height;
    if landed.z < floor {
        landed.z = floor;
    }

    if flags.is_location_arrival() && physics.supports_raycast() {
        let start = LANDING_TEST_HEIGHT.max(ground_height + LANDING_TEST_ABOVE_GROUND);
        let hits = physics.raycast(
            Vec3::new(landed.x, landed.y, start),
            Vec3::new(0.0, 0.0, -1.0),
            start,
            LANDING_MAX_HITS,
        );
        if let Some(surface) = select_landing_surface(&hits) {
            let platform = surface + avatar_half_height;
            if landed.z < platform {
                landed.z = platform;
            }
        }
    }
    landed
}

/// Pick the landing surface from a top-down probe: the topmost platform,
/// where hits separated by less than the minimum gap belong to the same
/// platform (the lowest of the run is the surface).
pub fn select_landing_surface(hits: &[RayHit]) -> Option<f32> {
    let mut heights: Vec<f32> = hits
        .iter()
        .filter(|hit| !hit.is_volume_detect)
        .map(|hit| hit.position.z)
        .collect();
    if heights.is_empty() {
        return None;
    }
    heights.sort_by(|a, b| b.total_cmp(a));

    let mut surface = heights[0];
    for z in heights.into_iter().skip(1) {
        if surface - z < LANDING_SURFACE_GAP {
            surface = z;
        } else {
            break;
        }
    }
    Some(surface)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::LocalId;

    fn hit_at(z: f32) -> RayHit {
        RayHit {
            position: Vec3::new(50.0, 50.0, z),
            normal: Vec3::new(0.0, 0.0, 1.0),
            distance: 600.0 - z,
            local_id: LocalId(9),
            is_volume_detect: false,
        }
    }

    #[test]
    fn no_hits_means_no_surface() {
        assert_eq!(select_landing_surface(&[]), None);
    }

    #[test]
    fn single_surface_is_selected() {
        assert_eq!(select_landing_surface(&[hit_at(120.0)]), Some(120.0));
    }

    #[test]
    fn close_surfaces_merge_downward() {
        // A platform with a 2 m thick double floor: land on the lower face.
        let hits = [hit_at(122.0), hit_at(120.0)];
        assert_eq!(select_landing_surface(&hits), Some(120.0));
    }

    #[test]
    fn distant_surfaces_stay_separate() {
        // Skybox at 300, house roof at 30: land on the skybox.
        let hits = [hit_at(300.0), hit_at(30.0)];
        assert_eq!(select_landing_surface(&hits), Some(300.0));
    }

    #[test]
    fn volume_detect_hits_are_transparent() {
        let mut phantom = hit_at(400.0);
        phantom.is_volume_detect = true;
        let hits = [phantom, hit_at(120.0)];
        assert_eq!(select_landing_surface(&hits), Some(120.0));
    }
}
