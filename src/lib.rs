//! # Region Presence
//! The server-side avatar presence core of a virtual-world region
//! simulator: the full lifecycle of a user's avatar inside one region,
//! its movement and sit state machines, parcel-privacy visibility,
//! cross-region hand-off, and the retention of script-captured controls.
//!
//! The crate owns no scene graph, physics engine, or wire codec; those
//! are consumed through the traits in [`scene`].

#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces
)]

pub mod scene;

mod body;
mod config;
mod controls;
mod error;
mod geo;
mod ids;
mod landing;
mod lifecycle;
mod motion;
mod parcel;
mod presence;
mod scheduler;
mod sit;
mod task;
mod timer;
mod transit;

pub use body::{CollisionSets, CollisionTickOutput, PhysicalBody, COLLISION_SUBSCRIPTION_MS};
pub use config::{LandingPolicyKind, PresenceConfig, RegionInfo};
pub use controls::{
    ControlEvent, ControlFlags, EntityUpdateFlags, ScriptControlRegistration, ScriptControls,
    TeleportFlags,
};
pub use error::{LifecycleError, MotionError, PresenceError, SitError, TransitError};
pub use geo::{Plane, Quat, Vec3};
pub use ids::{AgentId, ItemId, LocalId, ObjectId, ParcelId, RegionHandle, SessionId};
pub use landing::{apply_landing_policy, telehub_route};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use motion::{
    AgentUpdateInput, AnimationState, CameraState, Kinematics, MotionState, MoveStep,
    MoveToTarget, LANDING_COLLIDING_ASSERTS, MOVEMENT_SCALE, NUM_MOVEMENTS_BETWEEN_RAYCAST,
};
pub use parcel::{
    god_level_toggled, observer_can_see, ParcelState, PeerView, VisibilityLists,
    ELEVATED_ACCESS_LEVEL,
};
pub use presence::{AgentKind, Presence, PresenceInit};
pub use scheduler::{MovementSignificance, UpdateScheduler};
pub use sit::{SeatState, SitPose, MAX_SIT_DISTANCE};
pub use task::{BusyFlag, BusyGuard, TaskRunner};
pub use timer::Timer;
pub use transit::{
    is_outside_view, landing_look, predict_exit, pull_back_inside, AgentTransitPayload,
    ChildRegionEntry, NeighbourMap, NeighbourRegion, CROSSING_LOOKAHEAD,
};
