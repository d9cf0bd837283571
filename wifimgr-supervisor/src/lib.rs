//! Event-serialized supervisor for a Wi-Fi station + soft-AP pair.
//!
//! Architecture:
//! - Dispatcher task: owns every state machine (STA, uAP, IEEE-PS,
//!   Deep-Sleep-PS), receives user requests and driver events from one
//!   bounded queue, and is the only place state mutates
//! - User API (`WifiManager`): validates arguments, enqueues requests, and
//!   reads published state from atomics; the scan lock is the one blocking
//!   synchronization point it exposes
//! - Driver seam: a `DriverPort` implementation posts `DriverEvent`s through
//!   an `EventSink` into the same queue
//!
//! The user callback runs on the dispatcher thread, synchronously with the
//! event that caused it.

use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use enumset::{EnumSet, EnumSetType};
use log::{error, warn};

use wifimgr_core_lib::{
    AtomicCmPsState, AtomicStaState, AtomicUapState, BssDescriptor, CmPsState, DriverPort,
    FirmwareSupplicant, IfaceAddr, MacAddr, MatchFilters, NetworkProfile, PsMode, Role,
    ScanRequest, StaState, Supplicant, UapState, WifiError,
};

mod dispatcher;
mod events;
mod power;
mod profiles;
mod scan;
mod sta;
mod uap;

pub use events::ScanCallback;
pub use profiles::MAX_KNOWN_NETWORKS;

use events::{Message, Request};
use scan::ScanLock;

/// How many times a failed scan is retried within one connection attempt
pub const RESCAN_LIMIT: u32 = 5;

/// How many reconnect attempts are scheduled after a failed connection
pub const RECONNECT_LIMIT: u32 = 5;

/// Association attempts are paused this long after a MIC failure
pub(crate) const ASSOC_PAUSE: Duration = Duration::from_secs(60);

/// Dispatcher tick while a sleep confirm is pending
pub(crate) const SLEEP_CONFIRM_TICK: Duration = Duration::from_millis(10);

/// How long a neighbor report request stays pending
pub(crate) const NEIGHBOR_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on a blocking DTIM query
pub(crate) const DTIM_WAIT: Duration = Duration::from_millis(500);

/// Wakeup conditions for host sleep: which frames wake the host CPU.
#[derive(EnumSetType, Debug)]
pub enum WakeupCondition {
    Unicast,
    Broadcast,
    Multicast,
    ArpBroadcast,
    MacEvent,
    MgmtFrame,
}

/// Translate a wakeup mask into the firmware's flag encoding.
#[must_use]
pub(crate) fn wake_flags(conditions: EnumSet<WakeupCondition>) -> u32 {
    let mut flags = 0;
    for condition in conditions {
        flags |= match condition {
            WakeupCondition::Unicast => 0x01,
            WakeupCondition::Broadcast => 0x02,
            WakeupCondition::Multicast => 0x04,
            WakeupCondition::ArpBroadcast => 0x08,
            WakeupCondition::MacEvent => 0x10,
            WakeupCondition::MgmtFrame => 0x20,
        };
    }
    flags
}

/// Everything reported through the user callback.
#[derive(Debug, Clone, PartialEq)]
pub enum WifiNotification {
    Initialized,
    InitializationFailed,
    /// Station connected; carries the interface addressing when known
    Success(Option<IfaceAddr>),
    AuthSuccess,
    ConnectFailed,
    NetworkNotFound,
    NetworkAuthFailed,
    AddressSuccess,
    AddressFailed,
    LinkLost,
    ChanSwitch,
    UserDisconnect,
    PsEnter(PsMode),
    PsExit(PsMode),
    UapSuccess,
    UapClientAssoc(MacAddr),
    UapClientConn(MacAddr),
    UapClientDisassoc(MacAddr),
    UapStartFailed,
    UapStopFailed,
    UapStopped,
    RssiLow,
    BgScanNetworkNotFound,
}

/// User callback, invoked from the dispatcher thread only.
pub type EventCallback = Box<dyn FnMut(WifiNotification) + Send>;

/// Block-ack stream bookkeeping, visible through [`WifiManager::ba_stream_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BaStreamStats {
    pub added: u32,
    pub deleted: u32,
    pub timeouts: u32,
}

/// Tunables of the supervisor. Defaults match the firmware's behavior.
pub struct ManagerConfig {
    /// Schedule reconnect attempts after a failed connection or link loss
    pub reassoc_control: bool,
    /// React to RSSI-low / neighbor reports with a background roam scan
    pub roaming: bool,
    /// Optional 11v / MBO selection filters
    pub filters: MatchFilters,
    /// Depth of the dispatcher queue
    pub queue_depth: usize,
    /// Delay before a scheduled reconnect attempt
    pub reconnect_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reassoc_control: true,
            roaming: false,
            filters: MatchFilters::default(),
            queue_depth: 64,
            reconnect_delay: Duration::from_millis(500),
        }
    }
}

/// State shared between the user API and the dispatcher. States and indices
/// are published through atomics; only the dispatcher stores to them.
pub(crate) struct Shared {
    pub profiles: Mutex<profiles::ProfileStore>,
    pub supplicant: Mutex<Box<dyn Supplicant>>,
    pub sta_state: AtomicStaState,
    pub ipv4_state: AtomicStaState,
    pub ipv6_state: AtomicStaState,
    pub uap_state: AtomicUapState,
    pub cm_ps_state: AtomicCmPsState,
    /// Slot of the active STA / uAP profile; -1 when unused
    pub cur_sta_idx: AtomicI32,
    pub cur_uap_idx: AtomicI32,
    pub ieeeps_on: AtomicBool,
    pub deepsleep_on: AtomicBool,
    pub scan_lock: ScanLock,
    pub sta_mac: Mutex<Option<MacAddr>>,
    pub uap_mac: Mutex<Option<MacAddr>>,
    pub address: Mutex<Option<IfaceAddr>>,
    pub address6: Mutex<Option<Ipv6Addr>>,
    /// Results of the most recent completed scan
    pub scan_results: Mutex<Vec<BssDescriptor>>,
    pub ba_added: AtomicU32,
    pub ba_deleted: AtomicU32,
    pub ba_timeouts: AtomicU32,
    /// Counting wake lock; non-zero forbids deep low-power entry
    pub wake_locks: AtomicU32,
    pub running: AtomicBool,
}

impl Shared {
    fn new(supplicant: Box<dyn Supplicant>) -> Self {
        Self {
            profiles: Mutex::new(profiles::ProfileStore::default()),
            supplicant: Mutex::new(supplicant),
            sta_state: AtomicStaState::new(StaState::Initializing),
            ipv4_state: AtomicStaState::new(StaState::Initializing),
            ipv6_state: AtomicStaState::new(StaState::Initializing),
            uap_state: AtomicUapState::new(UapState::Initializing),
            cm_ps_state: AtomicCmPsState::new(CmPsState::Awake),
            cur_sta_idx: AtomicI32::new(-1),
            cur_uap_idx: AtomicI32::new(-1),
            ieeeps_on: AtomicBool::new(false),
            deepsleep_on: AtomicBool::new(false),
            scan_lock: ScanLock::default(),
            sta_mac: Mutex::new(None),
            uap_mac: Mutex::new(None),
            address: Mutex::new(None),
            address6: Mutex::new(None),
            scan_results: Mutex::new(Vec::new()),
            ba_added: AtomicU32::new(0),
            ba_deleted: AtomicU32::new(0),
            ba_timeouts: AtomicU32::new(0),
            wake_locks: AtomicU32::new(0),
            running: AtomicBool::new(false),
        }
    }

    pub fn sta_state(&self) -> StaState {
        self.sta_state.load(Ordering::Acquire)
    }

    pub fn set_sta_state(&self, state: StaState) {
        self.sta_state.store(state, Ordering::Release);
    }

    pub fn uap_state(&self) -> UapState {
        self.uap_state.load(Ordering::Acquire)
    }

    pub fn set_uap_state(&self, state: UapState) {
        self.uap_state.store(state, Ordering::Release);
    }

    pub fn cur_sta_idx(&self) -> Option<usize> {
        usize::try_from(self.cur_sta_idx.load(Ordering::Acquire)).ok()
    }

    pub fn set_cur_sta_idx(&self, idx: Option<usize>) {
        #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
        self.cur_sta_idx
            .store(idx.map_or(-1, |i| i as i32), Ordering::Release);
    }

    pub fn cur_uap_idx(&self) -> Option<usize> {
        usize::try_from(self.cur_uap_idx.load(Ordering::Acquire)).ok()
    }

    pub fn set_cur_uap_idx(&self, idx: Option<usize>) {
        #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
        self.cur_uap_idx
            .store(idx.map_or(-1, |i| i as i32), Ordering::Release);
    }

    /// Forbid deep low-power entry while a critical section runs.
    pub fn wake_lock_get(&self) {
        self.wake_locks.fetch_add(1, Ordering::AcqRel);
    }

    /// Each `wake_lock_get` is matched by exactly one put.
    pub fn wake_lock_put(&self) {
        let prev = self.wake_locks.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "wake lock underflow");
    }
}

/// Handle to a running connection manager.
///
/// Cheap operations read published state directly; everything that mutates
/// goes through the dispatcher queue. Dropping the handle stops the
/// dispatcher.
pub struct WifiManager {
    tx: SyncSender<Message>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl WifiManager {
    /// Start the supervisor with default tunables and firmware-offloaded
    /// key handling.
    pub fn start(driver: Box<dyn DriverPort>, callback: EventCallback) -> Result<Self, WifiError> {
        Self::start_with_config(ManagerConfig::default(), driver, callback)
    }

    /// Start the supervisor. Spawns the dispatcher thread; the driver is
    /// started from there and its bring-up events (MAC addresses, interface
    /// config) produce the `Initialized` notification.
    pub fn start_with_config(
        config: ManagerConfig,
        driver: Box<dyn DriverPort>,
        callback: EventCallback,
    ) -> Result<Self, WifiError> {
        Self::start_inner(config, driver, Box::new(FirmwareSupplicant), callback)
    }

    /// Start with an explicit key-management backend.
    pub fn start_with_supplicant(
        config: ManagerConfig,
        driver: Box<dyn DriverPort>,
        supplicant: Box<dyn Supplicant>,
        callback: EventCallback,
    ) -> Result<Self, WifiError> {
        Self::start_inner(config, driver, supplicant, callback)
    }

    fn start_inner(
        config: ManagerConfig,
        driver: Box<dyn DriverPort>,
        supplicant: Box<dyn Supplicant>,
        callback: EventCallback,
    ) -> Result<Self, WifiError> {
        let (tx, rx) = std::sync::mpsc::sync_channel(config.queue_depth);
        let shared = Arc::new(Shared::new(supplicant));

        let core = dispatcher::Core::new(config, driver, callback, Arc::clone(&shared), tx.clone(), rx);
        let handle = std::thread::Builder::new()
            .name("wifi_mgr".to_string())
            .spawn(move || core.run())
            .map_err(|_| WifiError::Fail("dispatcher spawn"))?;

        Ok(Self {
            tx,
            shared,
            handle: Some(handle),
        })
    }

    fn post(&self, request: Request) -> Result<(), WifiError> {
        match self.tx.try_send(Message::Request(request)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(WifiError::NoMem),
            Err(TrySendError::Disconnected(_)) => Err(WifiError::Fail("dispatcher stopped")),
        }
    }

    fn ensure_running(&self) -> Result<(), WifiError> {
        if self.shared.running.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(WifiError::State("not initialized"))
        }
    }

    /// Add a named network. STA profiles are accepted only while the
    /// station is idle, associated or connected.
    pub fn add_network(&self, profile: NetworkProfile) -> Result<(), WifiError> {
        if profile.role == Role::Sta {
            let sta = self.shared.sta_state();
            if !matches!(
                sta,
                StaState::Idle | StaState::Associated | StaState::Connected
            ) {
                return Err(WifiError::State("station is busy"));
            }
        }
        let mut store = self.shared.profiles.lock().unwrap();
        let slot = store.add(profile)?;
        // the key backend learns the profile too; without it the slot is
        // taken back
        let name = store.get(slot).map(|p| p.name.clone()).unwrap_or_default();
        let backend = self
            .shared
            .supplicant
            .lock()
            .unwrap()
            .add_profile(store.get(slot).unwrap());
        if let Err(e) = backend {
            error!("supplicant rejected profile '{name}': {e}");
            store.remove(&name).ok();
            return Err(e);
        }
        Ok(())
    }

    /// Remove a named network. Refused while the profile backs a connected
    /// station or a running soft-AP.
    pub fn remove_network(&self, name: &str) -> Result<(), WifiError> {
        let mut store = self.shared.profiles.lock().unwrap();
        let idx = store.index_of(name).ok_or(WifiError::NotFound)?;
        if Some(idx) == self.shared.cur_sta_idx() && self.shared.sta_state() == StaState::Connected
        {
            return Err(WifiError::Busy);
        }
        if Some(idx) == self.shared.cur_uap_idx() && self.shared.uap_state() == UapState::IpUp {
            return Err(WifiError::Busy);
        }
        // release keying material held by the backend
        if let Err(e) = self.shared.supplicant.lock().unwrap().remove_profile(name) {
            warn!("supplicant remove for '{name}': {e}");
        }
        store.remove(name).map(|_| ())
    }

    pub fn get_network(&self, name: &str) -> Result<NetworkProfile, WifiError> {
        let store = self.shared.profiles.lock().unwrap();
        let idx = store.index_of(name).ok_or(WifiError::NotFound)?;
        store.copy_out(idx).ok_or(WifiError::NotFound)
    }

    /// Nth known network in slot order.
    pub fn get_network_by_index(&self, n: usize) -> Result<NetworkProfile, WifiError> {
        let store = self.shared.profiles.lock().unwrap();
        let idx = store.nth(n).ok_or(WifiError::NotFound)?;
        store.copy_out(idx).ok_or(WifiError::NotFound)
    }

    pub fn network_count(&self) -> usize {
        self.shared.profiles.lock().unwrap().count()
    }

    /// Profile store snapshot as JSON (learned fields scrubbed).
    pub fn export_profiles(&self) -> Result<String, WifiError> {
        self.shared.profiles.lock().unwrap().export_json()
    }

    /// Add every profile from a JSON snapshot; each entry passes the same
    /// validation as `add_network`.
    pub fn import_profiles(&self, json: &str) -> Result<usize, WifiError> {
        self.shared.profiles.lock().unwrap().import_json(json)
    }

    /// Connect the station to a named profile. Blocks on the scan lock if a
    /// scan is in flight, then hands the attempt to the dispatcher.
    pub fn connect(&self, name: &str) -> Result<(), WifiError> {
        self.ensure_running()?;
        let index = {
            let store = self.shared.profiles.lock().unwrap();
            let idx = store.index_of(name).ok_or(WifiError::NotFound)?;
            if store.get(idx).map(|p| p.role) != Some(Role::Sta) {
                return Err(WifiError::Invalid("not a station profile"));
            }
            idx
        };
        self.shared.scan_lock.acquire();
        self.post(Request::Connect { index }).inspect_err(|_| {
            self.shared.scan_lock.release();
        })
    }

    /// Re-run the connect pipeline against the current profile.
    pub fn reassociate(&self) -> Result<(), WifiError> {
        self.ensure_running()?;
        if self.shared.cur_sta_idx().is_none() {
            return Err(WifiError::State("no station session"));
        }
        self.shared.scan_lock.acquire();
        self.post(Request::Reassociate).inspect_err(|_| {
            self.shared.scan_lock.release();
        })
    }

    /// Abort whatever the station is doing and return to idle.
    pub fn disconnect(&self) -> Result<(), WifiError> {
        if self.shared.cur_sta_idx().is_none() && self.shared.sta_state() == StaState::Idle {
            return Err(WifiError::State("no station session"));
        }
        self.post(Request::Disconnect)
    }

    /// Full-sweep scan; `callback` receives the descriptor count once the
    /// results are in.
    pub fn scan(&self, callback: ScanCallback) -> Result<(), WifiError> {
        self.scan_with_opt(ScanRequest::default(), callback)
    }

    /// Scan narrowed by SSID/BSSID/channel list.
    pub fn scan_with_opt(
        &self,
        request: ScanRequest,
        callback: ScanCallback,
    ) -> Result<(), WifiError> {
        self.ensure_running()?;
        self.shared.scan_lock.acquire();
        self.post(Request::Scan { request, callback }).inspect_err(|_| {
            self.shared.scan_lock.release();
        })
    }

    /// Descriptor `i` of the most recent completed scan.
    pub fn get_scan_result(&self, i: usize) -> Option<BssDescriptor> {
        self.shared.scan_results.lock().unwrap().get(i).cloned()
    }

    pub fn scan_result_count(&self) -> usize {
        self.shared.scan_results.lock().unwrap().len()
    }

    /// Start the soft-AP described by a named profile.
    pub fn start_network(&self, name: &str) -> Result<(), WifiError> {
        self.ensure_running()?;
        if self.shared.uap_state() != UapState::Initializing {
            return Err(WifiError::State("soft-AP already running"));
        }
        let index = {
            let store = self.shared.profiles.lock().unwrap();
            let idx = store.index_of(name).ok_or(WifiError::NotFound)?;
            if store.get(idx).map(|p| p.role) != Some(Role::Uap) {
                return Err(WifiError::Invalid("not a soft-AP profile"));
            }
            idx
        };
        self.post(Request::StartNetwork { index })
    }

    /// Stop the running soft-AP.
    pub fn stop_network(&self, name: &str) -> Result<(), WifiError> {
        let index = {
            let store = self.shared.profiles.lock().unwrap();
            store.index_of(name).ok_or(WifiError::NotFound)?
        };
        if Some(index) != self.shared.cur_uap_idx() {
            return Err(WifiError::State("network is not running"));
        }
        self.post(Request::StopNetwork { index })
    }

    /// Enable IEEE power save. The wakeup mask configures host sleep for
    /// the sleep-confirm handshake. A second enable is an error.
    pub fn ieeeps_on(&self, conditions: EnumSet<WakeupCondition>) -> Result<(), WifiError> {
        self.ensure_running()?;
        if self.shared.ieeeps_on.swap(true, Ordering::AcqRel) {
            return Err(WifiError::State("IEEE power save already enabled"));
        }
        self.post(Request::IeeePsOn { conditions }).inspect_err(|_| {
            self.shared.ieeeps_on.store(false, Ordering::Release);
        })
    }

    pub fn ieeeps_off(&self) -> Result<(), WifiError> {
        if !self.shared.ieeeps_on.load(Ordering::Acquire) {
            return Err(WifiError::State("IEEE power save not enabled"));
        }
        self.post(Request::IeeePsOff)
    }

    /// Enable deep-sleep power save.
    pub fn deepsleepps_on(&self) -> Result<(), WifiError> {
        self.ensure_running()?;
        if self.shared.deepsleep_on.swap(true, Ordering::AcqRel) {
            return Err(WifiError::State("deep sleep already enabled"));
        }
        self.post(Request::DeepSleepOn).inspect_err(|_| {
            self.shared.deepsleep_on.store(false, Ordering::Release);
        })
    }

    pub fn deepsleepps_off(&self) -> Result<(), WifiError> {
        if !self.shared.deepsleep_on.load(Ordering::Acquire) {
            return Err(WifiError::State("deep sleep not enabled"));
        }
        self.post(Request::DeepSleepOff)
    }

    /// Configure host-sleep wakeup conditions. A second configuration with
    /// a different mask while one is active is refused.
    pub fn send_host_sleep(&self, conditions: EnumSet<WakeupCondition>) -> Result<(), WifiError> {
        self.ensure_running()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(Request::HostSleep {
            conditions,
            reply: reply_tx,
        })?;
        reply_rx
            .recv()
            .map_err(|_| WifiError::Fail("dispatcher stopped"))?
    }

    /// DTIM period of the associated BSS. Waits for an in-flight scan to
    /// finish, bounded to half a second.
    pub fn get_dtim_period(&self) -> Result<u8, WifiError> {
        self.ensure_running()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(Request::DtimPeriod { reply: reply_tx })?;
        reply_rx
            .recv_timeout(DTIM_WAIT)
            .map_err(|_| WifiError::Fail("scan did not finish in time"))
    }

    pub fn get_connection_state(&self) -> StaState {
        self.shared.sta_state()
    }

    /// Address substates, `(ipv4, ipv6)`.
    pub fn get_address_states(&self) -> (StaState, StaState) {
        (
            self.shared.ipv4_state.load(Ordering::Acquire),
            self.shared.ipv6_state.load(Ordering::Acquire),
        )
    }

    pub fn get_uap_state(&self) -> UapState {
        self.shared.uap_state()
    }

    pub fn get_ps_state(&self) -> CmPsState {
        self.shared.cm_ps_state.load(Ordering::Acquire)
    }

    pub fn get_mac_address(&self, role: Role) -> Option<MacAddr> {
        match role {
            Role::Sta => *self.shared.sta_mac.lock().unwrap(),
            Role::Uap => *self.shared.uap_mac.lock().unwrap(),
        }
    }

    /// Addressing of the connected station interface.
    pub fn get_address(&self) -> Result<IfaceAddr, WifiError> {
        if self.shared.sta_state() != StaState::Connected {
            return Err(WifiError::State("station not connected"));
        }
        self.shared
            .address
            .lock()
            .unwrap()
            .ok_or(WifiError::State("no address yet"))
    }

    pub fn get_ipv6_address(&self) -> Option<Ipv6Addr> {
        *self.shared.address6.lock().unwrap()
    }

    /// The active STA profile, scrubbed like any other copy-out.
    pub fn get_current_network(&self) -> Result<NetworkProfile, WifiError> {
        let idx = self.shared.cur_sta_idx().ok_or(WifiError::NotFound)?;
        self.shared
            .profiles
            .lock()
            .unwrap()
            .copy_out(idx)
            .ok_or(WifiError::NotFound)
    }

    pub fn ba_stream_stats(&self) -> BaStreamStats {
        BaStreamStats {
            added: self.shared.ba_added.load(Ordering::Relaxed),
            deleted: self.shared.ba_deleted.load(Ordering::Relaxed),
            timeouts: self.shared.ba_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Tear down both sessions and reset the supervisor. The dispatcher
    /// keeps running; profiles are removed.
    pub fn deinit(&self) -> Result<(), WifiError> {
        self.post(Request::Deinit)
    }

    /// Stop the dispatcher and wait for it to exit.
    pub fn stop(mut self) -> Result<(), WifiError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(Request::Stop { reply: reply_tx })?;
        let _ = reply_rx.recv();
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| WifiError::Fail("dispatcher panicked"))?;
        }
        Ok(())
    }
}

impl Drop for WifiManager {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let (reply_tx, _reply_rx) = oneshot::channel();
            let _ = self.tx.try_send(Message::Request(Request::Stop { reply: reply_tx }));
            let _ = handle.join();
        }
    }
}
