pub mod arbiter;
pub mod flags;

pub use arbiter::{ControlEvent, ScriptControlRegistration, ScriptControls};
pub use flags::{ControlFlags, EntityUpdateFlags, TeleportFlags};
