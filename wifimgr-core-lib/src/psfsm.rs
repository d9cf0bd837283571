//! The two power-save machines as pure transition functions.
//!
//! IEEE-PS and Deep-Sleep-PS share one state shape and one event alphabet;
//! they differ only in which driver commands their actions name and in how
//! the sleep confirm is issued (host-sleep-configured vs plain). A transition
//! returns the next state plus the actions the outer driver must perform.
//! After every state *change* the outer driver re-invokes the machine with
//! the pseudo-event `Enter` so entry actions run, mirroring the self-call
//! structure of the firmware this manages.

use smallvec::SmallVec;

use crate::state::{CmPsState, PsMode};

/// Internal state of one power-save machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PsFsmState {
    #[default]
    Init,
    Configuring,
    Awake,
    PreSleep,
    Sleep,
    PreDisable,
    Disabling,
}

/// Event alphabet of both machines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsEvent {
    Enable,
    EnableDone,
    Awake,
    Sleep,
    SleepConfirmed,
    Disable,
    DisableDone,
    /// Pseudo-event delivered after every state change to run entry actions
    Enter,
}

/// Side effects a transition asks the outer driver to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsAction {
    /// Send the enable command for this machine (enter-PS / enter-deep-sleep)
    SendEnable,
    /// Send the disable command for this machine (exit-PS / exit-deep-sleep)
    SendDisable,
    /// Run the sleep-confirm protocol (host-sleep aware for IEEE-PS,
    /// plain confirm for Deep-Sleep-PS)
    RequestSleepConfirm,
    /// Publish the shared driver-facing sleep state
    SetCmState(CmPsState),
    /// Report PS entry to the user callback
    NotifyEnter,
    /// Report PS exit to the user callback
    NotifyExit,
}

/// One step of a machine
#[derive(Debug, Clone, Default)]
pub struct PsTransition {
    pub next: PsFsmState,
    pub actions: SmallVec<[PsAction; 4]>,
}

impl PsTransition {
    fn stay(state: PsFsmState) -> Self {
        Self {
            next: state,
            actions: SmallVec::new(),
        }
    }

    fn to(next: PsFsmState, actions: &[PsAction]) -> Self {
        Self {
            next,
            actions: SmallVec::from_slice(actions),
        }
    }
}

/// Pure transition function shared by both machines.
///
/// `sta_connected` matters only for `Disable`: with a live association the
/// firmware must be walked out of power save (PRE_DISABLE → DISABLING);
/// without one the machine resets immediately.
#[must_use]
pub fn ps_transition(
    mode: PsMode,
    state: PsFsmState,
    event: PsEvent,
    sta_connected: bool,
) -> PsTransition {
    use PsAction as A;
    use PsEvent as E;
    use PsFsmState as S;

    let _ = mode; // both machines share one shape; the action consumer
                  // resolves SendEnable/SendDisable per machine
    match (state, event) {
        (S::Init, E::Enable) => PsTransition::to(S::Init, &[A::SendEnable]),
        (S::Init, E::EnableDone) => PsTransition::to(S::Configuring, &[]),

        (S::Configuring, E::Awake) => {
            PsTransition::to(S::Awake, &[A::SetCmState(CmPsState::Awake)])
        }
        (S::Configuring, E::Sleep) => {
            PsTransition::to(S::PreSleep, &[A::SetCmState(CmPsState::PreSleep)])
        }

        (S::Awake, E::Sleep) => {
            PsTransition::to(S::PreSleep, &[A::SetCmState(CmPsState::PreSleep)])
        }
        (S::Awake, E::Enter) => PsTransition::to(S::Awake, &[A::SetCmState(CmPsState::Awake)]),

        // Entry action of PRE_SLEEP is the sleep-confirm handshake
        (S::PreSleep, E::Enter) => PsTransition::to(S::PreSleep, &[A::RequestSleepConfirm]),
        // Retried confirm attempts re-run the handshake without re-entering
        (S::PreSleep, E::Sleep) => PsTransition::to(S::PreSleep, &[A::RequestSleepConfirm]),
        (S::PreSleep, E::SleepConfirmed) => PsTransition::to(
            S::Sleep,
            &[A::SetCmState(CmPsState::Sleep), A::NotifyEnter],
        ),
        (S::PreSleep, E::Awake) => {
            PsTransition::to(S::Awake, &[A::SetCmState(CmPsState::Awake)])
        }

        (S::Sleep, E::Awake) => PsTransition::to(S::Awake, &[A::SetCmState(CmPsState::Awake)]),
        (S::Sleep, E::Sleep) => PsTransition::to(S::PreSleep, &[A::SetCmState(CmPsState::PreSleep)]),

        // Disable: walk the firmware out of PS only while associated
        (S::Sleep | S::Awake | S::Configuring | S::PreSleep, E::Disable) => {
            if sta_connected {
                PsTransition::to(S::PreDisable, &[A::SendDisable])
            } else {
                PsTransition::to(
                    S::Init,
                    &[
                        A::SendDisable,
                        A::SetCmState(CmPsState::Awake),
                        A::NotifyExit,
                    ],
                )
            }
        }
        (S::PreDisable, E::Enter) => PsTransition::to(S::Disabling, &[]),
        // The firmware may disable auto-PS on its own; treat it as a
        // completed exit from wherever the machine currently is.
        (_, E::DisableDone) if state != S::Init => PsTransition::to(
            S::Init,
            &[A::SetCmState(CmPsState::Awake), A::NotifyExit],
        ),

        // Everything else is a no-op for this machine
        _ => PsTransition::stay(state),
    }
}

/// Drive the machine through an event, running `Enter` after every state
/// change, and collect the actions in order. Shared by both machines.
pub fn ps_run(
    mode: PsMode,
    state: &mut PsFsmState,
    event: PsEvent,
    sta_connected: bool,
) -> SmallVec<[PsAction; 8]> {
    let mut actions: SmallVec<[PsAction; 8]> = SmallVec::new();
    let mut ev = event;
    // Bounded: each Enter either keeps the state (stop) or advances it, and
    // the state graph is acyclic under Enter.
    for _ in 0..8 {
        let before = *state;
        let t = ps_transition(mode, before, ev, sta_connected);
        actions.extend_from_slice(&t.actions);
        *state = t.next;
        if t.next == before {
            break;
        }
        ev = PsEvent::Enter;
    }
    actions
}
