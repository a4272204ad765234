//! Client finite-state machine: states, events, and the transition table
//! expressed as data rather than a conditional chain (§4.F, §9 Design
//! Notes "Transition table").

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Boot,
    Running,
    Resizing,
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    EnableRawMode,
    Winch,
    ChldExit,
    EofPty,
    PtyRead,
    StdinRead,
    Detached,
    PaneSplit,
    EofStdin,
    Interrupt,
    /// Recovered from `original_source/`: the event exists but spec.md's
    /// transition table has no entry for it (§9 Open Questions). The
    /// missing transition is added below rather than left undispatched.
    SyncInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    InstallRawMode,
    RecomputeLayoutAndRedraw,
    RestoreAndExit,
    ReadPtyAndRedraw,
    HandleStdinByte,
    DetachCeremony,
    SplitPane,
    ToggleSyncInput,
    NoOp,
}

/// `(state, event) -> (next_state, action)`. Pairs absent from the table
/// leave the state unchanged and run no action (§8 property 5).
const TABLE: &[(State, Event, State, Action)] = &[
    (State::Boot, Event::EnableRawMode, State::Running, Action::InstallRawMode),
    (State::Running, Event::Winch, State::Running, Action::RecomputeLayoutAndRedraw),
    (State::Running, Event::ChldExit, State::Exiting, Action::RestoreAndExit),
    (State::Running, Event::EofPty, State::Exiting, Action::RestoreAndExit),
    (State::Running, Event::PtyRead, State::Running, Action::ReadPtyAndRedraw),
    (State::Running, Event::StdinRead, State::Running, Action::HandleStdinByte),
    (State::Running, Event::Detached, State::Exiting, Action::DetachCeremony),
    (State::Running, Event::PaneSplit, State::Running, Action::SplitPane),
    (State::Running, Event::EofStdin, State::Exiting, Action::NoOp),
    (State::Running, Event::Interrupt, State::Exiting, Action::NoOp),
    (State::Running, Event::SyncInput, State::Running, Action::ToggleSyncInput),
];

/// Look up the table entry for `(state, event)`. Absent pairs, including
/// every `(Exiting, *)`, return `(state, Action::NoOp)` unchanged.
pub fn dispatch(state: State, event: Event) -> (State, Action) {
    TABLE
        .iter()
        .find(|(s, e, _, _)| *s == state && *e == event)
        .map(|(_, _, next, action)| (*next, *action))
        .unwrap_or((state, Action::NoOp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_pair_runs_listed_transition() {
        assert_eq!(
            dispatch(State::Boot, Event::EnableRawMode),
            (State::Running, Action::InstallRawMode)
        );
    }

    #[test]
    fn unlisted_pair_is_a_no_op() {
        assert_eq!(dispatch(State::Boot, Event::Winch), (State::Boot, Action::NoOp));
    }

    #[test]
    fn exiting_absorbs_every_event() {
        assert_eq!(dispatch(State::Exiting, Event::StdinRead), (State::Exiting, Action::NoOp));
        assert_eq!(dispatch(State::Exiting, Event::Winch), (State::Exiting, Action::NoOp));
    }

    #[test]
    fn sync_input_toggles_without_leaving_running() {
        assert_eq!(
            dispatch(State::Running, Event::SyncInput),
            (State::Running, Action::ToggleSyncInput)
        );
    }
}
