//! Per-observer hide/show decisions tied to parcel privacy.
//!
//! A parcel with `see_avatars` off hides its occupants from everyone
//! standing elsewhere. Occupants keep seeing the rest of the region; the
//! asymmetry is resolved per avatar as each one crosses a boundary.

use crate::ids::{AgentId, ParcelId};
use crate::scene::ParcelInfo;

/// Access level at and above which parcel privacy no longer applies.
pub const ELEVATED_ACCESS_LEVEL: u8 = 200;

/// The parcel binding of one presence, updated atomically on each move.
#[derive(Clone, Debug, Default)]
pub struct ParcelState {
    current_id: Option<ParcelId>,
    previous_id: Option<ParcelId>,
    current_hides: bool,
    previous_hides: bool,
}

impl ParcelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_id(&self) -> Option<ParcelId> {
        self.current_id
    }

    pub fn previous_id(&self) -> Option<ParcelId> {
        self.previous_id
    }

    pub fn current_hides(&self) -> bool {
        self.current_hides
    }

    /// Child presences hold no parcel binding.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn shift_to(&mut self, parcel: &ParcelInfo) {
        self.previous_id = self.current_id;
        self.previous_hides = self.current_hides;
        self.current_id = Some(parcel.id);
        self.current_hides = parcel.hides_avatars();
    }
}

/// What one peer looks like to the visibility engine.
#[derive(Clone, Copy, Debug)]
pub struct PeerView {
    pub agent: AgentId,
    pub parcel: Option<ParcelId>,
    pub parcel_hides: bool,
    pub access_level: u8,
}

impl PeerView {
    fn is_elevated(&self) -> bool {
        self.access_level >= ELEVATED_ACCESS_LEVEL
    }
}

/// The four disjoint outcomes of a boundary event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisibilityLists {
    /// Peers who must stop seeing this presence.
    pub kill_to_them: Vec<AgentId>,
    /// Peers this presence must stop seeing.
    pub kill_to_me: Vec<AgentId>,
    /// Peers who must begin seeing this presence.
    pub show_to_them: Vec<AgentId>,
    /// Peers this presence must begin seeing.
    pub show_to_me: Vec<AgentId>,
}

impl VisibilityLists {
    pub fn is_empty(&self) -> bool {
        self.kill_to_them.is_empty()
            && self.kill_to_me.is_empty()
            && self.show_to_them.is_empty()
            && self.show_to_me.is_empty()
    }
}

/// Can `observer` receive updates about a presence standing on
/// `subject_parcel`?
pub fn observer_can_see(
    subject_hidden: bool,
    subject_parcel: Option<ParcelId>,
    observer_parcel: Option<ParcelId>,
    observer_access_level: u8,
) -> bool {
    if !subject_hidden {
        return true;
    }
    if observer_access_level >= ELEVATED_ACCESS_LEVEL {
        return true;
    }
    subject_parcel.is_some() && subject_parcel == observer_parcel
}

impl ParcelState {
    /// Record a move onto `parcel` and classify the boundary event against
    /// the given peer snapshot. The presence's own entry must not appear in
    /// `peers`.
    pub fn enter_parcel(
        &mut self,
        my_access_level: u8,
        parcel: &ParcelInfo,
        peers: &[PeerView],
    ) -> VisibilityLists {
        self.shift_to(parcel);

        let current = self.current_id;
        let previous = self.previous_id;
        let i_am_elevated = my_access_level >= ELEVATED_ACCESS_LEVEL;
        let mut lists = VisibilityLists::default();

        if self.current_hides {
            if self.previous_hides && previous.is_some() && previous != current {
                // Private to private: the old parcel's occupants lose both
                // directions, the new parcel's gain both.
                for peer in peers {
                    if peer.parcel == previous {
                        if !peer.is_elevated() {
                            lists.kill_to_them.push(peer.agent);
                        }
                        if !i_am_elevated {
                            lists.kill_to_me.push(peer.agent);
                        }
                    }
                    if peer.parcel == current {
                        lists.show_to_them.push(peer.agent);
                        lists.show_to_me.push(peer.agent);
                    }
                }
            } else if !self.previous_hides {
                // Public to private: everyone off the new parcel stops
                // seeing me; I gain sight of (and am shown to) its
                // occupants.
                for peer in peers {
                    if peer.parcel != current {
                        if !peer.is_elevated() {
                            lists.kill_to_them.push(peer.agent);
                        }
                    } else {
                        lists.show_to_them.push(peer.agent);
                        lists.show_to_me.push(peer.agent);
                    }
                }
            }
        } else if self.previous_hides && previous.is_some() {
            // Private to public: I stop seeing the old parcel's occupants,
            // everyone else starts seeing me again.
            for peer in peers {
                if peer.parcel == previous {
                    if !i_am_elevated {
                        lists.kill_to_me.push(peer.agent);
                    }
                } else {
                    lists.show_to_them.push(peer.agent);
                }
            }
        }

        lists
    }

    /// The parcel under this presence flipped its privacy flag in place.
    pub fn hide_toggled(&mut self, now_hides: bool, peers: &[PeerView]) -> VisibilityLists {
        let mut lists = VisibilityLists::default();
        if self.current_id.is_none() || self.current_hides == now_hides {
            return lists;
        }
        let was_hidden = self.current_hides;
        self.current_hides = now_hides;

        for peer in peers {
            if peer.parcel == self.current_id {
                continue;
            }
            if was_hidden {
                lists.show_to_them.push(peer.agent);
            } else if !peer.is_elevated() {
                lists.kill_to_them.push(peer.agent);
            }
        }
        lists
    }
}

/// This presence's elevation changed: recompute what it may see of peers
/// hiding on other parcels.
pub fn god_level_toggled(
    now_elevated: bool,
    my_parcel: Option<ParcelId>,
    peers: &[PeerView],
) -> VisibilityLists {
    let mut lists = VisibilityLists::default();
    for peer in peers {
        if peer.parcel != my_parcel && peer.parcel_hides {
            if now_elevated {
                lists.show_to_me.push(peer.agent);
            } else {
                lists.kill_to_me.push(peer.agent);
            }
        }
    }
    lists
}
