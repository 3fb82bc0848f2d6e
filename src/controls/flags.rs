use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::geo::Vec3;

bitflags! {
    /// Input action bits sent by the client with every agent update.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ControlFlags: u32 {
        const AT_POS          = 0x0000_0001;
        const AT_NEG          = 0x0000_0002;
        const LEFT_POS        = 0x0000_0004;
        const LEFT_NEG        = 0x0000_0008;
        const UP_POS          = 0x0000_0010;
        const UP_NEG          = 0x0000_0020;
        const PITCH_POS       = 0x0000_0040;
        const PITCH_NEG       = 0x0000_0080;
        const YAW_POS         = 0x0000_0100;
        const YAW_NEG         = 0x0000_0200;
        const FAST_AT         = 0x0000_0400;
        const FAST_LEFT       = 0x0000_0800;
        const FAST_UP         = 0x0000_1000;
        const FLY             = 0x0000_2000;
        const STOP            = 0x0000_4000;
        const FINISH_ANIM     = 0x0000_8000;
        const STAND_UP        = 0x0001_0000;
        const SIT_ON_GROUND   = 0x0002_0000;
        const MOUSELOOK       = 0x0004_0000;
        const NUDGE_AT_POS    = 0x0008_0000;
        const NUDGE_AT_NEG    = 0x0010_0000;
        const NUDGE_LEFT_POS  = 0x0020_0000;
        const NUDGE_LEFT_NEG  = 0x0040_0000;
        const NUDGE_UP_POS    = 0x0080_0000;
        const NUDGE_UP_NEG    = 0x0100_0000;
        const TURN_LEFT       = 0x0200_0000;
        const TURN_RIGHT      = 0x0400_0000;
        const AWAY            = 0x0800_0000;
        const LBUTTON_DOWN    = 0x1000_0000;
        const LBUTTON_UP      = 0x2000_0000;
        const ML_LBUTTON_DOWN = 0x4000_0000;
        const ML_LBUTTON_UP   = 0x8000_0000;
    }
}

impl ControlFlags {
    /// The twelve direction bits the motion controller integrates.
    pub const DIRECTIONS: ControlFlags = ControlFlags::AT_POS
        .union(ControlFlags::AT_NEG)
        .union(ControlFlags::LEFT_POS)
        .union(ControlFlags::LEFT_NEG)
        .union(ControlFlags::UP_POS)
        .union(ControlFlags::UP_NEG)
        .union(ControlFlags::NUDGE_AT_POS)
        .union(ControlFlags::NUDGE_AT_NEG)
        .union(ControlFlags::NUDGE_LEFT_POS)
        .union(ControlFlags::NUDGE_LEFT_NEG)
        .union(ControlFlags::NUDGE_UP_POS)
        .union(ControlFlags::NUDGE_UP_NEG);

    pub fn any_direction_down(&self) -> bool {
        self.intersects(Self::DIRECTIONS)
    }
}

/// Impulse magnitude for the six primary direction bits.
pub const DIRECTION_SPEED: f32 = 1.0;
/// Impulse magnitude for the six nudge bits.
pub const NUDGE_SPEED: f32 = 1.0;

/// The direction bits paired with their unit impulses in the avatar frame
/// (x forward, y left, z up). Iteration order matches bit order.
pub const DIRECTION_IMPULSES: [(ControlFlags, [f32; 3]); 12] = [
    (ControlFlags::AT_POS, [DIRECTION_SPEED, 0.0, 0.0]),
    (ControlFlags::AT_NEG, [-DIRECTION_SPEED, 0.0, 0.0]),
    (ControlFlags::LEFT_POS, [0.0, DIRECTION_SPEED, 0.0]),
    (ControlFlags::LEFT_NEG, [0.0, -DIRECTION_SPEED, 0.0]),
    (ControlFlags::UP_POS, [0.0, 0.0, DIRECTION_SPEED]),
    (ControlFlags::UP_NEG, [0.0, 0.0, -DIRECTION_SPEED]),
    (ControlFlags::NUDGE_AT_POS, [NUDGE_SPEED, 0.0, 0.0]),
    (ControlFlags::NUDGE_AT_NEG, [-NUDGE_SPEED, 0.0, 0.0]),
    (ControlFlags::NUDGE_LEFT_POS, [0.0, NUDGE_SPEED, 0.0]),
    (ControlFlags::NUDGE_LEFT_NEG, [0.0, -NUDGE_SPEED, 0.0]),
    (ControlFlags::NUDGE_UP_POS, [0.0, 0.0, NUDGE_SPEED]),
    (ControlFlags::NUDGE_UP_NEG, [0.0, 0.0, -NUDGE_SPEED]),
];

pub fn impulse_of(flag: ControlFlags) -> Vec3 {
    for (bit, v) in DIRECTION_IMPULSES.iter() {
        if *bit == flag {
            return Vec3::new(v[0], v[1], v[2]);
        }
    }
    Vec3::zeros()
}

bitflags! {
    /// How an arriving teleport was initiated, as reported by the source.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TeleportFlags: u32 {
        const VIA_LURE      = 1 << 2;
        const VIA_LANDMARK  = 1 << 3;
        const VIA_LOCATION  = 1 << 4;
        const VIA_LOGIN     = 1 << 7;
        const VIA_REGION_ID = 1 << 12;
        const VIA_HG_LOGIN  = 1 << 26;
    }
}

impl TeleportFlags {
    pub const DEFAULT: TeleportFlags = TeleportFlags::empty();

    /// Arrivals that are subject to landing-point redirection.
    pub fn is_routable_arrival(&self) -> bool {
        self.intersects(
            Self::VIA_LOGIN
                | Self::VIA_LANDMARK
                | Self::VIA_LOCATION
                | Self::VIA_REGION_ID
                | Self::VIA_HG_LOGIN,
        )
    }

    /// Arrivals that declared an explicit target location.
    pub fn is_location_arrival(&self) -> bool {
        self.intersects(Self::VIA_LOCATION | Self::VIA_REGION_ID)
    }
}

bitflags! {
    /// Which fields of an entity update the client should apply.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct EntityUpdateFlags: u32 {
        const POSITION         = 1 << 0;
        const ROTATION         = 1 << 1;
        const VELOCITY         = 1 << 2;
        const ACCELERATION     = 1 << 3;
        const ANGULAR_VELOCITY = 1 << 4;
        const FULL_UPDATE      = 1 << 5;
    }
}

impl EntityUpdateFlags {
    pub const TERSE: EntityUpdateFlags = EntityUpdateFlags::POSITION
        .union(EntityUpdateFlags::ROTATION)
        .union(EntityUpdateFlags::VELOCITY)
        .union(EntityUpdateFlags::ACCELERATION)
        .union(EntityUpdateFlags::ANGULAR_VELOCITY);
}
