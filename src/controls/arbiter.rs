use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::controls::flags::ControlFlags;
use crate::ids::{ItemId, ObjectId};

/// One script's claim on the avatar's control inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptControlRegistration {
    pub object: ObjectId,
    pub item: ItemId,
    /// Bits hidden from the motion controller while this claim is active.
    pub ignore_mask: ControlFlags,
    /// Bits this script wants control events for.
    pub event_mask: ControlFlags,
}

/// A `control(held, changed)` event owed to one script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlEvent {
    pub item: ItemId,
    pub object: ObjectId,
    pub held: ControlFlags,
    pub changed: ControlFlags,
}

/// Routes control inputs captured by scripts: which bits are hidden from
/// motion, and which edges are forwarded to which script.
#[derive(Debug, Default)]
pub struct ScriptControls {
    registrations: HashMap<ItemId, ScriptControlRegistration>,
    last_commands: ControlFlags,
    lbutton_down: bool,
    ml_lbutton_down: bool,
}

impl ScriptControls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a take-controls request.
    ///
    /// accept=0 pass=0: capture silently. accept=1 pass=0: capture and get
    /// events. accept=1 pass=1: get events, avatar keeps the controls.
    /// accept=0 pass=1: release the claim entirely.
    pub fn register(
        &mut self,
        item: ItemId,
        object: ObjectId,
        controls: ControlFlags,
        accept: bool,
        pass_on: bool,
    ) {
        match (accept, pass_on) {
            (false, true) => {
                self.registrations.remove(&item);
            }
            (accept, pass_on) => {
                let ignore_mask = if pass_on {
                    ControlFlags::empty()
                } else {
                    controls
                };
                let event_mask = if accept { controls } else { ControlFlags::empty() };
                self.registrations.insert(
                    item,
                    ScriptControlRegistration {
                        object,
                        item,
                        ignore_mask,
                        event_mask,
                    },
                );
            }
        }
    }

    pub fn unregister(&mut self, item: ItemId) {
        self.registrations.remove(&item);
    }

    /// Drop every claim held by scripts of the given object. Used when
    /// standing up from a seat whose scripts took controls.
    pub fn unregister_object(&mut self, object: ObjectId) -> Vec<ItemId> {
        let removed: Vec<ItemId> = self
            .registrations
            .values()
            .filter(|reg| reg.object == object)
            .map(|reg| reg.item)
            .collect();
        for item in &removed {
            self.registrations.remove(item);
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn registrations(&self) -> impl Iterator<Item = &ScriptControlRegistration> {
        self.registrations.values()
    }

    /// Union of all active ignore masks; the motion controller sees
    /// `raw & !ignore_mask()`.
    pub fn ignore_mask(&self) -> ControlFlags {
        self.registrations
            .values()
            .fold(ControlFlags::empty(), |mask, reg| mask | reg.ignore_mask)
    }

    /// Edge-detect this tick's inputs against the previous tick and collect
    /// the control events owed to each registration.
    pub fn tick(&mut self, raw: ControlFlags) -> Vec<ControlEvent> {
        if raw.contains(ControlFlags::LBUTTON_DOWN) {
            self.lbutton_down = true;
        }
        if raw.contains(ControlFlags::LBUTTON_UP) {
            self.lbutton_down = false;
        }
        if raw.contains(ControlFlags::ML_LBUTTON_DOWN) {
            self.ml_lbutton_down = true;
        }
        if raw.contains(ControlFlags::ML_LBUTTON_UP) {
            self.ml_lbutton_down = false;
        }

        let mut allflags = raw;
        if self.lbutton_down {
            allflags |= ControlFlags::LBUTTON_DOWN;
        }
        if self.ml_lbutton_down {
            allflags |= ControlFlags::ML_LBUTTON_DOWN;
        }

        let mut events = Vec::new();
        if allflags != self.last_commands || !allflags.is_empty() || !self.last_commands.is_empty()
        {
            for reg in self.registrations.values() {
                let held = allflags & reg.event_mask;
                let changed = (allflags ^ self.last_commands) & reg.event_mask;
                if !held.is_empty() || !changed.is_empty() {
                    events.push(ControlEvent {
                        item: reg.item,
                        object: reg.object,
                        held,
                        changed,
                    });
                }
            }
        }
        self.last_commands = allflags;
        events
    }

    pub fn last_commands(&self) -> ControlFlags {
        self.last_commands
    }

    // Hand-off support

    pub fn export(&self) -> Vec<ScriptControlRegistration> {
        self.registrations.values().copied().collect()
    }

    pub fn import(&mut self, registrations: &[ScriptControlRegistration]) {
        self.registrations.clear();
        for reg in registrations {
            self.registrations.insert(reg.item, *reg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg_ids() -> (ItemId, ObjectId) {
        (ItemId::random(), ObjectId::random())
    }

    #[test]
    fn capture_without_events() {
        let (item, object) = reg_ids();
        let mut controls = ScriptControls::new();
        controls.register(item, object, ControlFlags::AT_POS, false, false);
        assert_eq!(controls.ignore_mask(), ControlFlags::AT_POS);
        let events = controls.tick(ControlFlags::AT_POS);
        assert!(events.is_empty());
    }

    #[test]
    fn capture_with_events() {
        let (item, object) = reg_ids();
        let mut controls = ScriptControls::new();
        controls.register(item, object, ControlFlags::AT_POS, true, false);
        assert_eq!(controls.ignore_mask(), ControlFlags::AT_POS);

        let events = controls.tick(ControlFlags::AT_POS);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].held, ControlFlags::AT_POS);
        assert_eq!(events[0].changed, ControlFlags::AT_POS);
    }

    #[test]
    fn pass_on_leaves_motion_untouched() {
        let (item, object) = reg_ids();
        let mut controls = ScriptControls::new();
        controls.register(item, object, ControlFlags::AT_POS, true, true);
        assert_eq!(controls.ignore_mask(), ControlFlags::empty());
        let events = controls.tick(ControlFlags::AT_POS);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn release_removes_registration() {
        let (item, object) = reg_ids();
        let mut controls = ScriptControls::new();
        controls.register(item, object, ControlFlags::AT_POS, true, false);
        controls.register(item, object, ControlFlags::AT_POS, false, true);
        assert!(controls.is_empty());
        assert_eq!(controls.ignore_mask(), ControlFlags::empty());
    }

    #[test]
    fn release_edge_is_reported() {
        let (item, object) = reg_ids();
        let mut controls = ScriptControls::new();
        controls.register(item, object, ControlFlags::AT_POS, true, false);

        controls.tick(ControlFlags::AT_POS);
        let events = controls.tick(ControlFlags::empty());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].held, ControlFlags::empty());
        assert_eq!(events[0].changed, ControlFlags::AT_POS);

        // Nothing held, nothing changed: quiet.
        let events = controls.tick(ControlFlags::empty());
        assert!(events.is_empty());
    }

    #[test]
    fn mouse_button_state_latches() {
        let (item, object) = reg_ids();
        let mut controls = ScriptControls::new();
        controls.register(item, object, ControlFlags::LBUTTON_DOWN, true, false);

        let events = controls.tick(ControlFlags::LBUTTON_DOWN);
        assert_eq!(events[0].held, ControlFlags::LBUTTON_DOWN);

        // Held across ticks that don't repeat the press.
        let events = controls.tick(ControlFlags::empty());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].held, ControlFlags::LBUTTON_DOWN);
        assert_eq!(events[0].changed, ControlFlags::empty());

        let events = controls.tick(ControlFlags::LBUTTON_UP);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].held, ControlFlags::empty());
        assert_eq!(events[0].changed, ControlFlags::LBUTTON_DOWN);
    }

    #[test]
    fn ignore_mask_is_union_across_registrations() {
        let (item_a, object_a) = reg_ids();
        let (item_b, object_b) = reg_ids();
        let mut controls = ScriptControls::new();
        controls.register(item_a, object_a, ControlFlags::AT_POS, false, false);
        controls.register(item_b, object_b, ControlFlags::LEFT_POS, true, false);
        assert_eq!(
            controls.ignore_mask(),
            ControlFlags::AT_POS | ControlFlags::LEFT_POS
        );
        controls.unregister(item_a);
        assert_eq!(controls.ignore_mask(), ControlFlags::LEFT_POS);
    }

    #[test]
    fn unregister_object_drops_all_of_its_items() {
        let object = ObjectId::random();
        let item_a = ItemId::random();
        let item_b = ItemId::random();
        let mut controls = ScriptControls::new();
        controls.register(item_a, object, ControlFlags::AT_POS, true, false);
        controls.register(item_b, object, ControlFlags::LEFT_POS, true, false);
        let removed = controls.unregister_object(object);
        assert_eq!(removed.len(), 2);
        assert!(controls.is_empty());
    }
}
