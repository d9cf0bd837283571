//! Messages flowing through the dispatcher queue.
//!
//! User API calls and driver notifications are both funneled through one
//! bounded queue so all state mutation happens on the dispatcher thread.
//! Requests that need a synchronous answer carry a oneshot reply sender, the
//! same shape as a dongle request with a `response_tx`.

use enumset::EnumSet;

use wifimgr_core_lib::{DriverEvent, ScanRequest, WifiError};

use crate::WakeupCondition;

/// Callback for a user-initiated scan; receives the descriptor count.
pub type ScanCallback = Box<dyn FnOnce(usize) + Send>;

/// A user API request, posted from an arbitrary caller thread.
pub(crate) enum Request {
    Connect { index: usize },
    Reassociate,
    Disconnect,
    Scan { request: ScanRequest, callback: ScanCallback },
    StartNetwork { index: usize },
    StopNetwork { index: usize },
    IeeePsOn { conditions: EnumSet<WakeupCondition> },
    IeeePsOff,
    DeepSleepOn,
    DeepSleepOff,
    HostSleep {
        conditions: EnumSet<WakeupCondition>,
        reply: oneshot::Sender<Result<(), WifiError>>,
    },
    DtimPeriod { reply: oneshot::Sender<u8> },
    Deinit,
    Stop { reply: oneshot::Sender<()> },
}

/// Everything the dispatcher can receive.
pub(crate) enum Message {
    Request(Request),
    Driver(DriverEvent),
    /// Scheduled reconnect attempt; stale generations are ignored
    ReassocTick { generation: u32 },
    /// Neighbor report request timed out without a usable reply
    NeighborTimeout { generation: u32 },
}
