use std::time::Duration;

use crate::ids::RegionHandle;

/// Static description of the region this presence core runs in.
#[derive(Clone, Debug)]
pub struct RegionInfo {
    pub handle: RegionHandle,
    pub name: String,
    pub size_x: u32,
    pub size_y: u32,
}

impl RegionInfo {
    pub fn new(handle: RegionHandle, name: &str, size_x: u32, size_y: u32) -> Self {
        Self {
            handle,
            name: name.to_string(),
            size_x,
            size_y,
        }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= 0.0 && x < self.size_x as f32 && y >= 0.0 && y < self.size_y as f32
    }
}

/// Which landing-point policy the region enforces on arrivals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LandingPolicyKind {
    /// Honour estate bans, route through the telehub only when the estate
    /// disallows direct teleports, and redirect to parcel landing points
    /// unless the arrival is privileged
    #[default]
    Permissive,

    /// Never redirect elevated-access users, always route through the
    /// telehub when direct teleport is disallowed, and respect the parcel's
    /// look-at on redirection
    Strict,
}

/// Tunables for one region's presence handling.
///
/// Defaults match the wire-observable behaviour clients expect; tests
/// shorten the timed values.
#[derive(Clone, Debug)]
pub struct PresenceConfig {
    pub max_draw_distance: f32,
    pub max_region_view_distance: f32,

    pub landing_policy: LandingPolicyKind,
    /// Selects the older sit-offset formula kept for regions with content
    /// authored against it.
    pub legacy_sit_offsets: bool,

    /// How long to wait between polls for the departing region's hand-off
    /// confirmation, and how many polls to attempt before giving up.
    pub handshake_poll_interval: Duration,
    pub handshake_attempts: u32,

    pub reprioritization_interval: Duration,
    pub root_reprioritization_distance: f32,
    pub child_reprioritization_distance: f32,
    /// Updates are not reprioritised for this long after an arrival.
    pub arrival_reprioritization_grace: Duration,

    pub child_update_period: Duration,
    pub child_update_distance_sq: f32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            max_draw_distance: 512.0,
            max_region_view_distance: 255.0,
            landing_policy: LandingPolicyKind::default(),
            legacy_sit_offsets: false,
            handshake_poll_interval: Duration::from_millis(200),
            handshake_attempts: 50,
            reprioritization_interval: Duration::from_secs(5),
            root_reprioritization_distance: 10.0,
            child_reprioritization_distance: 20.0,
            arrival_reprioritization_grace: Duration::from_millis(15_000),
            child_update_period: Duration::from_millis(10_000),
            child_update_distance_sq: 100.0,
        }
    }
}
