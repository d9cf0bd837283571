//! Error type shared by every layer of the connection manager.

/// Errors returned by the user API and by internal driver/command paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiError {
    /// Caller-supplied arguments failed validation
    Invalid(&'static str),
    /// The current STA/uAP/power-save state forbids the operation
    State(&'static str),
    /// Slot or queue exhaustion
    NoMem,
    /// The driver or an OS primitive rejected the request
    Fail(&'static str),
    /// Feature disabled in this build
    NotSupported,
    /// A second host-sleep configuration with a different wakeup mask is active
    AlreadyConfigured,
    /// No profile with the given name
    NotFound,
    /// The profile is in use by an active session
    Busy,
    /// A profile with the same name already exists
    NameTaken,
}

impl std::fmt::Display for WifiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(what) => write!(f, "invalid argument: {what}"),
            Self::State(what) => write!(f, "operation not allowed in current state: {what}"),
            Self::NoMem => write!(f, "out of slots or queue space"),
            Self::Fail(what) => write!(f, "driver request failed: {what}"),
            Self::NotSupported => write!(f, "not supported in this build"),
            Self::AlreadyConfigured => write!(f, "host sleep already configured with a different mask"),
            Self::NotFound => write!(f, "no such network"),
            Self::Busy => write!(f, "network is in use"),
            Self::NameTaken => write!(f, "network name already exists"),
        }
    }
}

impl std::error::Error for WifiError {}
