use std::fmt;

/// Where a stage sits in its lifecycle.
///
/// `Loaded -> Allocated -> Prepared -> Executing -> Stopped -> Loaded`, with
/// `Stopped -> Prepared` for another transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum StageState {
    /// No codec resources held.
    Loaded,
    /// Codec opened for at least one port.
    Allocated,
    /// Slots cleared; ready to exchange buffers.
    Prepared,
    /// Buffer exchange runs on every notification.
    Executing,
    /// Buffers returned; notifications are ignored.
    Stopped,
}

impl StageState {
    /// True for the states in which notifications are accepted but do no work.
    pub fn is_idle(self) -> bool {
        matches!(self, StageState::Prepared | StageState::Stopped)
    }

    /// State reached by running `op` from `self`, or `None` if the order is invalid.
    ///
    /// Repeating a hook that already holds (`stop` while stopped, `deallocate`
    /// while loaded) maps onto the current state.
    ///
    /// # Example
    /// ```rust
    /// use stagehand::lifecycle::{LifecycleOp, StageState};
    ///
    /// assert_eq!(StageState::Loaded.after(LifecycleOp::Allocate), Some(StageState::Allocated));
    /// assert_eq!(StageState::Executing.after(LifecycleOp::Deallocate), None);
    /// ```
    pub fn after(self, op: LifecycleOp) -> Option<StageState> {
        use LifecycleOp as Op;
        use StageState as S;
        match (op, self) {
            (Op::Allocate, S::Loaded | S::Allocated) => Some(S::Allocated),
            (Op::Prepare, S::Allocated | S::Prepared | S::Stopped) => Some(S::Prepared),
            (Op::Transfer, S::Prepared | S::Executing) => Some(S::Executing),
            (Op::BuffersReady, S::Prepared | S::Executing | S::Stopped) => Some(self),
            (Op::Stop, S::Prepared | S::Executing | S::Stopped) => Some(S::Stopped),
            (Op::Deallocate, S::Loaded | S::Allocated | S::Prepared | S::Stopped) => {
                Some(S::Loaded)
            }
            _ => None,
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageState::Loaded => "loaded",
            StageState::Allocated => "allocated",
            StageState::Prepared => "prepared",
            StageState::Executing => "executing",
            StageState::Stopped => "stopped",
        })
    }
}

/// Scheduler-driven entry points of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum LifecycleOp {
    Allocate,
    Prepare,
    Transfer,
    BuffersReady,
    Stop,
    Deallocate,
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleOp::Allocate => "allocate_resources",
            LifecycleOp::Prepare => "prepare_to_transfer",
            LifecycleOp::Transfer => "transfer_and_process",
            LifecycleOp::BuffersReady => "on_buffers_ready",
            LifecycleOp::Stop => "stop_and_return",
            LifecycleOp::Deallocate => "deallocate_resources",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_is_accepted() {
        let mut state = StageState::Loaded;
        for op in [
            LifecycleOp::Allocate,
            LifecycleOp::Prepare,
            LifecycleOp::Transfer,
            LifecycleOp::BuffersReady,
            LifecycleOp::Stop,
            LifecycleOp::Prepare,
            LifecycleOp::Transfer,
            LifecycleOp::Stop,
            LifecycleOp::Deallocate,
        ] {
            state = state.after(op).unwrap_or_else(|| panic!("{op} from {state}"));
        }
        assert_eq!(state, StageState::Loaded);
    }

    #[test]
    fn out_of_order_hooks_are_rejected() {
        assert_eq!(StageState::Loaded.after(LifecycleOp::Transfer), None);
        assert_eq!(StageState::Loaded.after(LifecycleOp::BuffersReady), None);
        assert_eq!(StageState::Allocated.after(LifecycleOp::BuffersReady), None);
        assert_eq!(StageState::Executing.after(LifecycleOp::Allocate), None);
        assert_eq!(StageState::Executing.after(LifecycleOp::Prepare), None);
        assert_eq!(StageState::Loaded.after(LifecycleOp::Stop), None);
    }

    #[test]
    fn repeated_teardown_is_a_no_op() {
        assert_eq!(
            StageState::Stopped.after(LifecycleOp::Stop),
            Some(StageState::Stopped)
        );
        assert_eq!(
            StageState::Loaded.after(LifecycleOp::Deallocate),
            Some(StageState::Loaded)
        );
        assert!(StageState::Stopped.is_idle());
        assert!(!StageState::Executing.is_idle());
    }
}
