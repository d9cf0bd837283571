//! Connection and power-save state enums.
//!
//! The atomic wrappers exist so API threads can read published state without
//! taking a lock; every store happens on the dispatcher thread.

use atomic_enum::atomic_enum;

/// STA connection state. IPv4 and IPv6 address substates are drawn from the
/// same enum and tracked independently of the headline state.
#[atomic_enum]
#[derive(PartialEq, Eq)]
pub enum StaState {
    Initializing,
    Idle,
    Scanning,
    /// Scan requested by the user rather than the connect pipeline
    ScanningUser,
    Associating,
    Associated,
    /// Address configuration requested from the IP stack
    RequestingAddress,
    /// DHCP/autoconf in progress
    ObtainingAddress,
    Connected,
}

impl StaState {
    /// Connect pipeline is past scanning but not yet connected
    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(
            self,
            Self::Associating | Self::Associated | Self::RequestingAddress | Self::ObtainingAddress
        )
    }

    /// A scan initiated by us is in flight
    #[must_use]
    pub const fn is_scanning(self) -> bool {
        matches!(self, Self::Scanning | Self::ScanningUser)
    }
}

/// Soft-AP session state
#[atomic_enum]
#[derive(PartialEq, Eq)]
pub enum UapState {
    Initializing,
    Configured,
    Started,
    IpUp,
}

/// Driver-facing sleep state, shared by both power-save machines.
/// Whichever machine acted last owns the current value.
#[atomic_enum]
#[derive(PartialEq, Eq)]
pub enum CmPsState {
    Awake,
    PreSleep,
    SleepConfirm,
    Sleep,
}

/// Which power-save machine an event or callback refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsMode {
    Ieee,
    DeepSleep,
}
