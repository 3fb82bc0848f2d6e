use thiserror::Error;

/// Errors raised by the lifecycle state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// Lifecycle only moves forward; an attempt to step backwards is a bug
    /// in the caller and leaves state untouched
    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// Promotion requested while the presence is already root. Idempotent
    /// no-op for callers racing on arrival
    #[error("Presence is already a root agent")]
    AlreadyRoot,

    /// Demotion requested while the presence is already a child
    #[error("Presence is already a child agent")]
    AlreadyChild,
}

/// Errors raised during cross-region hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitError {
    /// The departing region never confirmed the hand-off; the presence
    /// stays a child and the caller decides whether to retry or close
    #[error("Peer region never confirmed hand-off after {attempts} attempts")]
    PeerHandshakeTimeout {
        attempts: u32,
    },

    /// The destination region refused the border crossing; the presence is
    /// pulled back just inside the border with zero velocity
    #[error("Region {destination} refused the crossing")]
    CrossRejected {
        destination: String,
    },

    /// Landing was constrained by a telehub or landing-point policy and the
    /// requested teleport was abandoned
    #[error("Landing denied: {reason}")]
    LandingDenied {
        reason: &'static str,
    },

    /// Best-effort close of a child agent on a neighbour failed; the local
    /// neighbour entry is removed regardless
    #[error("Failed to close child agent on neighbour {handle}")]
    NeighbourCloseFailed {
        handle: String,
    },
}

/// Errors raised by the motion controller and the physical body adapter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MotionError {
    /// The physics engine reported a non-finite position; the presence
    /// self-heals by re-adding its body at the last finite position
    #[error("Non-finite position reported by physics, restored to ({x}, {y}, {z})")]
    NonFiniteState {
        x: f32,
        y: f32,
        z: f32,
    },

    /// Out-of-bounds or otherwise invalid callback from the physics engine
    #[error("Physics fault: {context}")]
    PhysicsFault {
        context: &'static str,
    },
}

/// Errors raised by the sit/stand controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SitError {
    /// No suitable seat or surface was found; the client gets an alert and
    /// nothing changes
    #[error("No suitable surface to sit on")]
    SitRefused,

    /// The requested seat part does not exist in the scene
    #[error("Sit target part {part} not found")]
    PartNotFound {
        part: u32,
    },
}

/// Top-level error for the presence public contract.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PresenceError {
    /// Lifecycle error
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Transit error
    #[error("Transit error: {0}")]
    Transit(#[from] TransitError),

    /// Motion error
    #[error("Motion error: {0}")]
    Motion(#[from] MotionError),

    /// Sit error
    #[error("Sit error: {0}")]
    Sit(#[from] SitError),
}
