//! Significance gates for everything this presence sends out: terse motion
//! updates, movement events, client queue reprioritisation, and position
//! pushes to neighbour regions holding our child agents.

use std::time::{Duration, Instant};

use crate::config::PresenceConfig;
use crate::geo::{Quat, Vec3};
use crate::task::{BusyFlag, BusyGuard};
use crate::timer::Timer;

const ROTATION_TOLERANCE: f32 = 0.01;
const VELOCITY_TOLERANCE: f32 = 0.1;
const POSITION_TOLERANCE: f32 = 5.0;
const DRIFT_TOLERANCE: f32 = 0.05;
const DRIFT_SPEED_SQ: f32 = 0.1;

/// Squared distance that fires a `client_movement` event.
const MOVEMENT_SQ: f32 = 0.25;
/// Squared distance that fires `significant_client_movement`.
const SIGNIFICANT_MOVEMENT_SQ: f32 = 16.0;

/// Which movement events this tick's position change produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MovementSignificance {
    pub client_movement: bool,
    pub significant_client_movement: bool,
}

pub struct UpdateScheduler {
    last_sent_position: Vec3,
    last_sent_rotation: Quat,
    last_sent_velocity: Vec3,

    movement_anchor: Vec3,
    significant_anchor: Vec3,

    reprioritization_timer: Timer,
    last_reprioritized_position: Vec3,
    reprioritizing: BusyFlag,

    child_push_period: Duration,
    child_push_distance_sq: f32,
    last_child_push: Option<Instant>,
    last_pushed_position: Vec3,
    pushing: BusyFlag,
}

impl UpdateScheduler {
    pub fn new(config: &PresenceConfig) -> Self {
        Self {
            last_sent_position: Vec3::zeros(),
            last_sent_rotation: Quat::identity(),
            last_sent_velocity: Vec3::zeros(),
            movement_anchor: Vec3::zeros(),
            significant_anchor: Vec3::zeros(),
            reprioritization_timer: Timer::new(config.reprioritization_interval),
            last_reprioritized_position: Vec3::zeros(),
            reprioritizing: BusyFlag::new(),
            child_push_period: config.child_update_period,
            child_push_distance_sq: config.child_update_distance_sq,
            last_child_push: None,
            last_pushed_position: Vec3::zeros(),
            pushing: BusyFlag::new(),
        }
    }

    // Terse updates

    /// Whether this tick's motion state differs enough from the last sent
    /// one to broadcast a terse update. Updates the sent anchors when it
    /// answers yes.
    pub fn needs_terse_update(
        &mut self,
        sitting: bool,
        position: Vec3,
        rotation: Quat,
        velocity: Vec3,
    ) -> bool {
        if sitting {
            return false;
        }

        let velocity_stopped = velocity == Vec3::zeros() && self.last_sent_velocity != Vec3::zeros();
        let position_delta = (position - self.last_sent_position).norm();

        let significant = !rotations_close(&rotation, &self.last_sent_rotation)
            || (velocity - self.last_sent_velocity).norm() > VELOCITY_TOLERANCE
            || position_delta > POSITION_TOLERANCE
            || velocity_stopped
            || (position_delta > DRIFT_TOLERANCE && velocity.norm_squared() < DRIFT_SPEED_SQ);

        if significant {
            self.last_sent_position = position;
            self.last_sent_rotation = rotation;
            self.last_sent_velocity = velocity;
        }
        significant
    }

    // Movement events

    /// Test the movement anchors, moving each one when its threshold fires.
    pub fn check_movement(&mut self, position: Vec3) -> MovementSignificance {
        let mut result = MovementSignificance::default();
        if (position - self.movement_anchor).norm_squared() > MOVEMENT_SQ {
            self.movement_anchor = position;
            result.client_movement = true;
        }
        if (position - self.significant_anchor).norm_squared() > SIGNIFICANT_MOVEMENT_SQ {
            self.significant_anchor = position;
            result.significant_client_movement = true;
        }
        result
    }

    // Reprioritisation

    /// Hold off reprioritisation for a while after an arrival.
    pub fn arrival_grace(&mut self, grace: Duration) {
        self.reprioritization_timer.delay(grace);
    }

    /// Claim a reprioritisation run if the interval elapsed, the presence
    /// moved far enough, and no run is in flight. The returned guard gates
    /// the next run until dropped.
    pub fn try_begin_reprioritization(
        &mut self,
        position: Vec3,
        distance_threshold: f32,
    ) -> Option<BusyGuard> {
        if !self.reprioritization_timer.ringing() {
            return None;
        }
        if (position - self.last_reprioritized_position).norm() <= distance_threshold {
            return None;
        }
        let guard = self.reprioritizing.try_begin()?;
        self.reprioritization_timer.reset();
        self.last_reprioritized_position = position;
        Some(guard)
    }

    // Neighbour pushes

    /// Arm the child-update gate so the first push waits a full period.
    pub fn open_child_update_gate(&mut self) {
        self.last_child_push = Some(Instant::now());
    }

    /// Claim a child-agent position push if the period elapsed and the
    /// presence drifted far enough from the last pushed position.
    pub fn try_begin_child_push(&mut self, position: Vec3) -> Option<BusyGuard> {
        if let Some(last) = self.last_child_push {
            if last.elapsed() < self.child_push_period {
                return None;
            }
        }
        if (position - self.last_pushed_position).norm_squared() <= self.child_push_distance_sq {
            return None;
        }
        let guard = self.pushing.try_begin()?;
        self.last_child_push = Some(Instant::now());
        self.last_pushed_position = position;
        Some(guard)
    }

    pub fn is_pushing(&self) -> bool {
        self.pushing.is_busy()
    }
}

fn rotations_close(a: &Quat, b: &Quat) -> bool {
    // q and -q are the same rotation; align signs before comparing.
    let dot = a.coords.dot(&b.coords);
    let bc = if dot < 0.0 { -b.coords } else { b.coords };
    (a.coords - bc).amax() <= ROTATION_TOLERANCE
}
