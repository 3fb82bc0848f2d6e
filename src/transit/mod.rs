//! Cross-region hand-off support: neighbour bookkeeping, the outside-view
//! predicate driving child-agent closes, and border-crossing geometry.

pub mod payload;

use std::collections::HashMap;

use log::debug;

use crate::geo::{self, Vec3};
use crate::ids::RegionHandle;

pub use payload::{AgentTransitPayload, ChildRegionEntry};

/// Predictive look-ahead applied to the position each heartbeat before the
/// border test.
pub const CROSSING_LOOKAHEAD: f32 = 0.1;

/// A neighbouring region we keep a child agent in.
#[derive(Clone, Debug, PartialEq)]
pub struct NeighbourRegion {
    pub seed_capability: String,
    pub size_x: u32,
    pub size_y: u32,
}

/// Region-handle keyed neighbour set. The home region's own handle is
/// never a member.
#[derive(Debug)]
pub struct NeighbourMap {
    home: RegionHandle,
    regions: HashMap<RegionHandle, NeighbourRegion>,
}

impl NeighbourMap {
    pub fn new(home: RegionHandle) -> Self {
        Self {
            home,
            regions: HashMap::new(),
        }
    }

    pub fn insert(&mut self, handle: RegionHandle, region: NeighbourRegion) {
        if handle == self.home {
            debug!("ignoring neighbour entry for our own region {}", handle);
            return;
        }
        self.regions.insert(handle, region);
    }

    pub fn remove(&mut self, handle: RegionHandle) -> Option<NeighbourRegion> {
        self.regions.remove(&handle)
    }

    pub fn contains(&self, handle: RegionHandle) -> bool {
        self.regions.contains_key(&handle)
    }

    pub fn get(&self, handle: RegionHandle) -> Option<&NeighbourRegion> {
        self.regions.get(&handle)
    }

    pub fn handles(&self) -> Vec<RegionHandle> {
        self.regions.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RegionHandle, &NeighbourRegion)> {
        self.regions.iter()
    }

    /// Neighbours no longer inside the view rectangle around the home
    /// region for the given view distance.
    pub fn outside_view(&self, home_size: (u32, u32), view_distance: f32) -> Vec<RegionHandle> {
        self.regions
            .iter()
            .filter(|(handle, region)| {
                is_outside_view(
                    self.home,
                    home_size,
                    **handle,
                    (region.size_x, region.size_y),
                    view_distance,
                )
            })
            .map(|(handle, _)| *handle)
            .collect()
    }
}

/// Whether region `b` lies entirely outside the view rectangle extending
/// `view_distance` meters around region `a`. Both sizes matter: a large
/// neighbour can reach into view even when its corner handle is far away.
pub fn is_outside_view(
    a: RegionHandle,
    a_size: (u32, u32),
    b: RegionHandle,
    b_size: (u32, u32),
    view_distance: f32,
) -> bool {
    let view = view_distance.max(0.0);

    let ax0 = a.x_meters() as f32 - view;
    let ax1 = (a.x_meters() + a_size.0) as f32 + view;
    let ay0 = a.y_meters() as f32 - view;
    let ay1 = (a.y_meters() + a_size.1) as f32 + view;

    let bx0 = b.x_meters() as f32;
    let bx1 = (b.x_meters() + b_size.0) as f32;
    let by0 = b.y_meters() as f32;
    let by1 = (b.y_meters() + b_size.1) as f32;

    bx1 <= ax0 || bx0 >= ax1 || by1 <= ay0 || by0 >= ay1
}

/// The landing look direction: the client's declared look when usable,
/// else the travel direction projected onto the surface, else straight
/// along +x.
pub fn landing_look(client_look: Option<Vec3>, velocity: Vec3) -> Vec3 {
    let fallback = Vec3::new(1.0, 0.0, 0.0);
    if let Some(look) = client_look {
        if geo::is_finite(&look) && look != Vec3::zeros() {
            return geo::normalize_or(&look, fallback);
        }
    }
    let planar = geo::horizontal(&velocity);
    geo::normalize_or(&planar, fallback)
}

/// Predict whether the presence exits the region on the next tick.
/// Returns the predicted position when it does.
pub fn predict_exit(position: Vec3, velocity: Vec3, size: (u32, u32)) -> Option<Vec3> {
    let predicted = position + velocity * CROSSING_LOOKAHEAD;
    let inside = predicted.x >= 0.0
        && predicted.x < size.0 as f32
        && predicted.y >= 0.0
        && predicted.y < size.1 as f32;
    if inside {
        None
    } else {
        Some(predicted)
    }
}

/// Pull a presence whose crossing was refused back inside the border on
/// each exited axis.
pub fn pull_back_inside(position: Vec3, velocity: Vec3, size: (u32, u32)) -> Vec3 {
    let max_x = size.0 as f32 - 0.5;
    let max_y = size.1 as f32 - 0.5;
    let mut pos = position;

    if pos.x < 0.0 || pos.x >= size.0 as f32 {
        pos.x = (pos.x - 2.0 * velocity.x).clamp(0.5, max_x);
    }
    if pos.y < 0.0 || pos.y >= size.1 as f32 {
        pos.y = (pos.y - 2.0 * velocity.y).clamp(0.5, max_y);
    }
    pos
}
