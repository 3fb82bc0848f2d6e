use crate::error::LifecycleError;

/// Authoritative state of existence for one presence.
///
/// States only advance; the single exception is `Running -> Running`, since
/// child/root is an orthogonal attribute and both live under `Running`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    PreAdd,
    NotInRegion,
    InTransit,
    Running,
    Removing,
    Removed,
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::PreAdd => "PreAdd",
            LifecycleState::NotInRegion => "NotInRegion",
            LifecycleState::InTransit => "InTransit",
            LifecycleState::Running => "Running",
            LifecycleState::Removing => "Removing",
            LifecycleState::Removed => "Removed",
        }
    }
}

/// Lifecycle attributes of a presence: the state machine plus the
/// orthogonal child/root and login markers.
#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
    is_child: bool,
    is_logging_in: bool,
}

impl Lifecycle {
    /// A freshly connected presence: created before its first add to the
    /// region, as a child.
    pub fn new() -> Self {
        Self {
            state: LifecycleState::PreAdd,
            is_child: true,
            is_logging_in: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_child(&self) -> bool {
        self.is_child
    }

    pub fn is_running(&self) -> bool {
        self.state == LifecycleState::Running
    }

    pub fn is_logging_in(&self) -> bool {
        self.is_logging_in
    }

    pub fn set_logging_in(&mut self, logging_in: bool) {
        self.is_logging_in = logging_in;
    }

    /// Advance the state machine. Stepping backwards fails without mutating
    /// state; re-entering `Running` is allowed.
    pub fn advance(&mut self, next: LifecycleState) -> Result<(), LifecycleError> {
        let same_running = next == LifecycleState::Running && self.state == LifecycleState::Running;
        if next <= self.state && !same_running {
            return Err(LifecycleError::InvalidTransition {
                from: self.state.name(),
                to: next.name(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Flip child -> root. Callers racing on arrival serialise on the
    /// completion lock; the loser observes `AlreadyRoot` here.
    pub fn promote_to_root(&mut self) -> Result<(), LifecycleError> {
        if !self.is_child {
            return Err(LifecycleError::AlreadyRoot);
        }
        self.is_child = false;
        Ok(())
    }

    pub fn demote_to_child(&mut self) -> Result<(), LifecycleError> {
        if self.is_child {
            return Err(LifecycleError::AlreadyChild);
        }
        self.is_child = true;
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_pre_add_as_child() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::PreAdd);
        assert!(lifecycle.is_child());
    }

    #[test]
    fn advances_forward() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(LifecycleState::Running).unwrap();
        lifecycle.advance(LifecycleState::Removing).unwrap();
        lifecycle.advance(LifecycleState::Removed).unwrap();
    }

    #[test]
    fn rejects_backwards_steps() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(LifecycleState::Running).unwrap();
        let err = lifecycle.advance(LifecycleState::PreAdd).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::InvalidTransition {
                from: "Running",
                to: "PreAdd",
            }
        );
        assert_eq!(lifecycle.state(), LifecycleState::Running);
    }

    #[test]
    fn running_is_reentrant() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(LifecycleState::Running).unwrap();
        lifecycle.advance(LifecycleState::Running).unwrap();
    }

    #[test]
    fn second_promotion_observes_already_root() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.promote_to_root().unwrap();
        assert_eq!(
            lifecycle.promote_to_root().unwrap_err(),
            LifecycleError::AlreadyRoot
        );
    }

    #[test]
    fn child_and_running_are_independent() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(LifecycleState::Running).unwrap();
        assert!(lifecycle.is_child());
        lifecycle.promote_to_root().unwrap();
        assert!(lifecycle.is_running());
        lifecycle.demote_to_child().unwrap();
        assert!(lifecycle.is_running());
        assert!(lifecycle.is_child());
    }
}
