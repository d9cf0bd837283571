//! Driver-agnostic core of the wifimgr Wi-Fi connection manager.
//!
//! This crate holds everything that can be reasoned about without a radio:
//! network profile records and their validation rules, scan-result
//! descriptors with the match/select pipeline, the connection state enums,
//! the two power-save machines as pure transition functions, and the
//! command/event vocabulary spoken across the `DriverPort` seam.
//!
//! The runtime that owns a dispatcher thread and drives these types against
//! a real driver lives in `wifimgr-supervisor`.

pub mod bss;
pub mod driver;
pub mod error;
pub mod events;
pub mod profile;
pub mod psfsm;
pub mod state;

pub use bss::{
    apply_bss_params, profile_matches, security_compatible, select_bss, strongest_security,
    BssCapability, BssDescriptor, BssSecurity, ChannelList, MatchFilters, MatchVerdict,
    SelectionOutcome,
};
pub use driver::{DriverPort, EventSink, FirmwareSupplicant, Supplicant};
pub use error::WifiError;
pub use events::{
    Addr6Result, AddrResult, AddressRequest, AssocRequest, BssRole, CmdStatus, DriverCommand,
    DriverEvent, IfaceAddr, PsNotice, ScanRequest, UapStartRequest,
};
pub use profile::{
    format_mac, CipherSuite, IpConfig, LearnedParams, MacAddr, NetworkProfile, Role,
    SecurityConfig, SecurityKind, Specificity, Ssid, StaticIp, MAC_UNSPECIFIED, NAME_MAX_LEN,
    SSID_MAX_LEN,
};
pub use psfsm::{ps_run, ps_transition, PsAction, PsEvent, PsFsmState, PsTransition};
pub use state::{
    AtomicCmPsState, AtomicStaState, AtomicUapState, CmPsState, PsMode, StaState, UapState,
};
