use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// AgentId

/// Stable identity of one user or NPC, constant across regions.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AgentId(Uuid);

impl AgentId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

// SessionId

/// Per-login session token, used as the bearer credential when asking the
/// grid to close child agents on our behalf.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

// ObjectId

/// Stable identity of a scene object (a linkset root or one of its parts).
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ObjectId(Uuid);

impl ObjectId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

// ItemId

/// Identity of a script item living inside a scene object's inventory.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

// ParcelId

/// Identity of one parcel of land within a region.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ParcelId(Uuid);

impl ParcelId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

// LocalId

/// Scene-local integer id of an entity (avatar or part). Zero is reserved
/// for the ground surface in collision events and is never a valid entity.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(pub u32);

impl LocalId {
    pub const GROUND: LocalId = LocalId(0);

    pub fn is_ground(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// RegionHandle

/// Packed world location of a region: the region's south-west corner in
/// meters, x in the high 32 bits, y in the low 32 bits.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionHandle(u64);

impl RegionHandle {
    pub fn from_meters(x: u32, y: u32) -> Self {
        Self(((x as u64) << 32) | y as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn to_raw(&self) -> u64 {
        self.0
    }

    /// World x of the region's south-west corner, in meters.
    pub fn x_meters(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// World y of the region's south-west corner, in meters.
    pub fn y_meters(&self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }
}

impl fmt::Display for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.x_meters(), self.y_meters())
    }
}
