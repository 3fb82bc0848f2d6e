// Property tests for the control arbiter's mask laws.

use proptest::prelude::*;

use region_presence::{ControlFlags, ItemId, ObjectId, ScriptControls};

fn flags(bits: u32) -> ControlFlags {
    ControlFlags::from_bits_truncate(bits)
}

proptest! {
    // The aggregated ignore mask is exactly the union of the per-item
    // ignore masks, whatever the registration order.
    #[test]
    fn ignore_mask_is_the_union_of_registrations(masks in proptest::collection::vec(any::<u32>(), 0..8)) {
        let mut controls = ScriptControls::new();
        let mut expected = ControlFlags::empty();
        for bits in &masks {
            let item = ItemId::random();
            let object = ObjectId::random();
            controls.register(item, object, flags(*bits), true, false);
            expected |= flags(*bits);
        }
        prop_assert_eq!(controls.ignore_mask(), expected);
    }

    // A pass-on registration followed by its release leaves the aggregated
    // ignore mask exactly where it started.
    #[test]
    fn pass_on_register_then_release_is_mask_neutral(
        existing in any::<u32>(),
        taken in any::<u32>(),
    ) {
        let mut controls = ScriptControls::new();
        let resident_item = ItemId::random();
        let resident_object = ObjectId::random();
        controls.register(resident_item, resident_object, flags(existing), true, false);
        let mask_before = controls.ignore_mask();

        let item = ItemId::random();
        let object = ObjectId::random();
        controls.register(item, object, flags(taken), true, true);
        prop_assert_eq!(controls.ignore_mask(), mask_before);
        controls.unregister(item);
        prop_assert_eq!(controls.ignore_mask(), mask_before);
    }

    // Motion never sees a captured bit: observed = raw & !ignore.
    #[test]
    fn captured_bits_never_reach_motion(raw in any::<u32>(), captured in any::<u32>()) {
        let mut controls = ScriptControls::new();
        controls.register(
            ItemId::random(),
            ObjectId::random(),
            flags(captured),
            false,
            false,
        );
        let observed = flags(raw) & !controls.ignore_mask();
        prop_assert_eq!(observed & flags(captured), ControlFlags::empty());
    }

    // Held state reported to scripts is always a subset of the event mask.
    #[test]
    fn control_events_respect_the_event_mask(
        event_mask in any::<u32>(),
        presses in proptest::collection::vec(any::<u32>(), 1..6),
    ) {
        let mut controls = ScriptControls::new();
        controls.register(
            ItemId::random(),
            ObjectId::random(),
            flags(event_mask),
            true,
            true,
        );
        for press in presses {
            for event in controls.tick(flags(press)) {
                prop_assert_eq!(event.held & !flags(event_mask), ControlFlags::empty());
                prop_assert_eq!(event.changed & !flags(event_mask), ControlFlags::empty());
            }
        }
    }
}
