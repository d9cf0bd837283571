//! Station session: the scan → select → associate → address pipeline,
//! link-loss handling, the reconnect policy, and the roam hooks.
//!
//! All of this runs on the dispatcher thread. The scan lock is held by
//! whichever thread initiated the attempt; the dispatcher only ever releases
//! it, except for its own follow-up scans which use `try_acquire`.

use std::time::Instant;

use log::{debug, info, warn};

use wifimgr_core_lib::{
    apply_bss_params, select_bss, AddrResult, AddressRequest, AssocRequest, BssDescriptor,
    ChannelList, CmdStatus, DriverCommand, IfaceAddr, IpConfig, ScanRequest, Ssid, StaState,
};

use crate::dispatcher::Core;
use crate::events::{Message, ScanCallback};
use crate::{WifiNotification, NEIGHBOR_TIMEOUT, RECONNECT_LIMIT, RESCAN_LIMIT};

/// 802.11 reason code: MIC failure
const REASON_MIC_FAILURE: u16 = 14;

/// A roam candidate must beat the serving BSS by this much (dB)
const ROAM_RSSI_MARGIN: i16 = 6;

/// Dispatcher-private station session state.
pub(crate) struct StaSession {
    /// Scans used within the current connection attempt
    pub scan_count: u32,
    /// Scheduled reconnect attempts since the last success/disconnect
    pub reassoc_count: u32,
    /// Cancels stale reconnect ticks after disconnect/new connect
    pub generation: u32,
    /// Association attempts are paused until this instant (MIC failure)
    pub assoc_paused_until: Option<Instant>,
    /// The scan in flight is the directed hidden-SSID probe
    pub hidden_probe: bool,
    pub wake_lock_held: bool,
    /// Current attempt is an 802.11r reassociation within the same ESS
    pub ft_attempt: bool,
    /// SSID + mobility domain of the last successful association
    pub last_ess: Option<(Ssid, u16)>,
    /// RSSI of the BSS we associated to, for roam comparisons
    pub last_rssi: i16,
    pub neighbor_pending: bool,
    pub neighbor_generation: u32,
    /// A background roam scan is in flight
    pub roam_scan: bool,
}

impl StaSession {
    pub fn new() -> Self {
        Self {
            scan_count: 0,
            reassoc_count: 0,
            generation: 0,
            assoc_paused_until: None,
            hidden_probe: false,
            wake_lock_held: false,
            ft_attempt: false,
            last_ess: None,
            last_rssi: i16::MIN,
            neighbor_pending: false,
            neighbor_generation: 0,
            roam_scan: false,
        }
    }
}

impl Core {
    /// USER_CONNECT: abort whatever is in progress, then start the pipeline
    /// against the chosen profile. The caller already holds the scan lock.
    pub(crate) fn handle_connect(&mut self, index: usize) {
        let state = self.shared.sta_state();
        if state.is_connecting() || state == StaState::Connected {
            // restart: deauthenticate first, then run a fresh attempt
            let _ = self.driver.submit(DriverCommand::Deauthenticate);
            self.teardown_link();
        }
        self.shared.set_cur_sta_idx(Some(index));
        self.sta.generation = self.sta.generation.wrapping_add(1);
        self.sta.scan_count = 0;
        self.sta.reassoc_count = 0;
        self.start_connect_attempt();
    }

    /// User-initiated reconnect to the current profile.
    pub(crate) fn handle_reassociate(&mut self) {
        if self.shared.cur_sta_idx().is_none() {
            self.shared.scan_lock.release();
            return;
        }
        self.sta.scan_count = 0;
        self.start_connect_attempt();
    }

    /// Kick off one scan for the current profile. Assumes the scan lock is
    /// held by the initiator of this attempt.
    pub(crate) fn start_connect_attempt(&mut self) {
        let Some(index) = self.shared.cur_sta_idx() else {
            self.fail_attempt(Some(WifiNotification::ConnectFailed));
            return;
        };

        if let Some(until) = self.sta.assoc_paused_until {
            let now = Instant::now();
            if now < until {
                // association window is paused; come back when it reopens
                info!("association paused, retrying later");
                self.shared.scan_lock.release();
                let generation = self.sta.generation;
                self.schedule(until - now, Message::ReassocTick { generation });
                return;
            }
            self.sta.assoc_paused_until = None;
        }

        if !self.sta.wake_lock_held {
            self.shared.wake_lock_get();
            self.sta.wake_lock_held = true;
        }
        self.sta.hidden_probe = false;
        self.sta.ft_attempt = false;

        let request = {
            let store = self.shared.profiles.lock().unwrap();
            let Some(profile) = store.get(index) else {
                drop(store);
                self.fail_attempt(Some(WifiNotification::ConnectFailed));
                return;
            };
            let mut request = ScanRequest::default();
            if profile.specificity.ssid {
                request.ssid = Some(profile.ssid.clone());
            }
            if profile.specificity.bssid {
                request.bssid = Some(profile.bssid);
            }
            if profile.specificity.channel {
                request.channels = ChannelList::from_slice(&[profile.channel]);
            }
            request
        };

        self.sta.scan_count += 1;
        self.shared.set_sta_state(StaState::Scanning);
        if let Err(e) = self.driver.submit(DriverCommand::Scan(request)) {
            warn!("scan command rejected: {e}");
            self.fail_attempt(Some(WifiNotification::ConnectFailed));
        }
    }

    /// Scheduled reconnect attempt fired.
    pub(crate) fn handle_reassoc_tick(&mut self, generation: u32) {
        if generation != self.sta.generation {
            return;
        }
        if self.shared.sta_state() != StaState::Idle || self.shared.cur_sta_idx().is_none() {
            return;
        }
        // the dispatcher never blocks on the scan lock; if a user scan is in
        // flight, try again after another delay
        if !self.shared.scan_lock.try_acquire() {
            debug!("reconnect deferred: scan lock busy");
            let delay = self.config.reconnect_delay;
            self.schedule(delay, Message::ReassocTick { generation });
            return;
        }
        info!(
            "reconnect attempt {}/{}",
            self.sta.reassoc_count, RECONNECT_LIMIT
        );
        self.sta.scan_count = 0;
        self.start_connect_attempt();
    }

    /// User scan request; results flow to the stashed callback instead of
    /// the selection pipeline.
    pub(crate) fn handle_user_scan(&mut self, request: ScanRequest, callback: ScanCallback) {
        let state = self.shared.sta_state();
        if state.is_connecting() {
            // mid-association scans are dropped outright
            warn!("scan request dropped: connection in progress");
            drop(callback);
            self.shared.scan_lock.release();
            return;
        }
        self.arbiter.stashed_state = state;
        self.arbiter.user_callback = Some(callback);
        self.shared.set_sta_state(StaState::ScanningUser);
        if let Err(e) = self.driver.submit(DriverCommand::Scan(request)) {
            warn!("scan command rejected: {e}");
            self.arbiter.user_callback = None;
            self.shared.set_sta_state(self.arbiter.stashed_state);
            self.shared.scan_lock.release();
        }
    }

    /// SCAN_RESULT: route by who asked for the scan.
    pub(crate) fn handle_scan_report(&mut self, descriptors: Vec<BssDescriptor>) {
        match self.shared.sta_state() {
            StaState::ScanningUser => {
                let count = descriptors.len();
                *self.shared.scan_results.lock().unwrap() = descriptors;
                if let Some(callback) = self.arbiter.user_callback.take() {
                    callback(count);
                }
                self.shared.set_sta_state(self.arbiter.stashed_state);
                self.shared.scan_lock.release();
                let dtim = self.current_dtim();
                self.arbiter.flush_dtim_waiters(dtim);
            }
            StaState::Scanning => {
                *self.shared.scan_results.lock().unwrap() = descriptors.clone();
                self.run_selection(&descriptors);
                let dtim = self.current_dtim();
                self.arbiter.flush_dtim_waiters(dtim);
            }
            _ => {
                // a scan we no longer care about; just free the lock and
                // drop any callback left over from an aborted user scan
                debug!("unsolicited scan report, releasing scan lock");
                self.arbiter.user_callback = None;
                self.shared.scan_lock.release();
                let dtim = self.current_dtim();
                self.arbiter.flush_dtim_waiters(dtim);
            }
        }
    }

    /// The selection pipeline: match → pick best RSSI → parameter update →
    /// associate, with hidden-probe and rescan fallbacks.
    fn run_selection(&mut self, descriptors: &[BssDescriptor]) {
        let Some(index) = self.shared.cur_sta_idx() else {
            self.fail_attempt(Some(WifiNotification::ConnectFailed));
            return;
        };

        let allowed = self.driver.allowed_channels();
        let outcome = {
            let store = self.shared.profiles.lock().unwrap();
            let Some(profile) = store.get(index) else {
                drop(store);
                self.fail_attempt(Some(WifiNotification::ConnectFailed));
                return;
            };
            select_bss(profile, descriptors, &allowed, self.config.filters)
        };

        if let Some(best) = outcome.best {
            self.begin_association(index, &descriptors[best]);
            return;
        }

        // the directed hidden probe fires only when nothing matched, and
        // only once per attempt
        if !outcome.hidden_channels.is_empty() && !self.sta.hidden_probe {
            let ssid = {
                let store = self.shared.profiles.lock().unwrap();
                store.get(index).map(|p| p.ssid.clone())
            };
            if let Some(ssid) = ssid {
                info!(
                    "no match; probing {} hidden channel(s)",
                    outcome.hidden_channels.len()
                );
                self.sta.hidden_probe = true;
                let request = ScanRequest::directed(ssid, &outcome.hidden_channels);
                if self.driver.submit(DriverCommand::Scan(request)).is_ok() {
                    return;
                }
            }
        }

        if self.sta.scan_count < RESCAN_LIMIT {
            self.sta.scan_count += 1;
            self.sta.hidden_probe = false;
            debug!("rescan {}/{}", self.sta.scan_count, RESCAN_LIMIT);
            let request = self.rescan_request(index);
            if self.driver.submit(DriverCommand::Scan(request)).is_ok() {
                return;
            }
        }

        self.fail_attempt(Some(WifiNotification::NetworkNotFound));
    }

    fn rescan_request(&self, index: usize) -> ScanRequest {
        let store = self.shared.profiles.lock().unwrap();
        let mut request = ScanRequest::default();
        if let Some(profile) = store.get(index) {
            if profile.specificity.ssid {
                request.ssid = Some(profile.ssid.clone());
            }
            if profile.specificity.bssid {
                request.bssid = Some(profile.bssid);
            }
            if profile.specificity.channel {
                request.channels = ChannelList::from_slice(&[profile.channel]);
            }
        }
        request
    }

    /// Parameter update + security configuration + associate command. The
    /// scan lock is released here: result processing is complete.
    fn begin_association(&mut self, index: usize, desc: &BssDescriptor) {
        let profile = {
            let mut store = self.shared.profiles.lock().unwrap();
            let Some(profile) = store.get_mut(index) else {
                drop(store);
                self.fail_attempt(Some(WifiNotification::ConnectFailed));
                return;
            };
            apply_bss_params(profile, desc);
            profile.clone()
        };

        let configure_result = self.shared.supplicant.lock().unwrap().configure(&profile);
        if let Err(e) = configure_result {
            warn!("security configuration failed: {e}");
            self.fail_attempt(Some(WifiNotification::ConnectFailed));
            return;
        }

        // same-ESS fast path: 11r reassociation skips re-addressing
        self.sta.ft_attempt = match (&self.sta.last_ess, profile.learned.mobility_domain) {
            (Some((ssid, domain)), Some(new_domain)) => {
                *domain == new_domain && ssid.as_slice() == profile.ssid.as_slice()
            }
            _ => false,
        };
        self.sta.last_rssi = desc.rssi;

        let request = AssocRequest {
            bssid: profile.bssid,
            ssid: profile.ssid.clone(),
            channel: profile.channel,
            security: profile.security.kind,
            ciphers: profile.security.ciphers,
            mfpc: profile.security.pmf_capable || profile.learned.pmf_required,
            mfpr: profile.security.pmf_required || profile.learned.pmf_required,
            owe_trans_ssid: profile.learned.owe_trans_ssid.clone(),
            ft: self.sta.ft_attempt,
        };
        info!(
            "associating to '{}' on channel {} ({:?})",
            String::from_utf8_lossy(&profile.ssid),
            profile.channel,
            profile.security.kind
        );
        self.shared.set_sta_state(StaState::Associating);
        self.shared.scan_lock.release();
        if self.driver.submit(DriverCommand::Associate(request)).is_err() {
            self.fail_attempt(Some(WifiNotification::ConnectFailed));
        }
    }

    /// ASSOCIATION event from the firmware.
    pub(crate) fn handle_association(&mut self, status: CmdStatus) {
        if self.shared.sta_state() != StaState::Associating {
            debug!("association event outside of pipeline, ignored");
            return;
        }
        match status {
            CmdStatus::Ok => self.shared.set_sta_state(StaState::Associated),
            CmdStatus::Failed => {
                // retry the scan while rescans remain
                if self.sta.scan_count < RESCAN_LIMIT && self.shared.scan_lock.try_acquire() {
                    self.sta.scan_count += 1;
                    self.sta.hidden_probe = false;
                    self.shared.set_sta_state(StaState::Scanning);
                    let index = self.shared.cur_sta_idx().unwrap_or(usize::MAX);
                    let request = self.rescan_request(index);
                    if self.driver.submit(DriverCommand::Scan(request)).is_err() {
                        self.fail_attempt(Some(WifiNotification::ConnectFailed));
                    }
                } else {
                    self.attempt_failed(Some(WifiNotification::ConnectFailed));
                }
            }
        }
    }

    /// AUTHENTICATION event: definitive auth outcome (firmware or
    /// supplicant backed).
    pub(crate) fn handle_authentication(&mut self, status: CmdStatus, reason: u16) {
        let state = self.shared.sta_state();
        if !matches!(state, StaState::Associating | StaState::Associated) {
            debug!("authentication event outside of pipeline, ignored");
            return;
        }
        match status {
            CmdStatus::Ok => {
                self.notify(WifiNotification::AuthSuccess);
                if self.sta.ft_attempt {
                    // address state carries over within the ESS
                    let addr = *self.shared.address.lock().unwrap();
                    self.finish_connected(addr);
                    return;
                }
                self.request_address();
            }
            CmdStatus::Failed => {
                let _ = self.driver.submit(DriverCommand::Deauthenticate);
                if reason == REASON_MIC_FAILURE {
                    // 60 s hold-off; hammering a MIC-failing AP makes it worse
                    self.sta.assoc_paused_until = Some(Instant::now() + crate::ASSOC_PAUSE);
                    self.notify(WifiNotification::NetworkAuthFailed);
                    self.attempt_failed(None);
                } else {
                    debug!("authentication failed, reason {reason}");
                    self.attempt_failed(Some(WifiNotification::ConnectFailed));
                }
            }
        }
    }

    /// Ask the IP stack for addressing per the profile's configuration.
    fn request_address(&mut self) {
        let Some(index) = self.shared.cur_sta_idx() else {
            self.attempt_failed(Some(WifiNotification::ConnectFailed));
            return;
        };
        let ip = {
            let store = self.shared.profiles.lock().unwrap();
            store.get(index).map(|p| p.ip)
        };
        let Some(ip) = ip else {
            self.attempt_failed(Some(WifiNotification::ConnectFailed));
            return;
        };
        self.shared
            .ipv6_state
            .store(StaState::ObtainingAddress, std::sync::atomic::Ordering::Release);
        let (state, request) = match ip {
            IpConfig::Static(addr) => (
                StaState::RequestingAddress,
                AddressRequest::Static(addr),
            ),
            IpConfig::Dhcp => (StaState::ObtainingAddress, AddressRequest::Dhcp),
        };
        self.shared.set_sta_state(state);
        self.shared
            .ipv4_state
            .store(state, std::sync::atomic::Ordering::Release);
        if self
            .driver
            .submit(DriverCommand::ConfigureStaAddress(request))
            .is_err()
        {
            self.notify(WifiNotification::AddressFailed);
            let _ = self.driver.submit(DriverCommand::Deauthenticate);
            self.attempt_failed(None);
        }
    }

    /// NET_STA_ADDR_CONFIG / NET_DHCP_CONFIG.
    pub(crate) fn handle_sta_addr(&mut self, result: AddrResult) {
        let state = self.shared.sta_state();
        match result {
            AddrResult::Obtained(addr) => {
                *self.shared.address.lock().unwrap() = Some(addr);
                self.shared
                    .ipv4_state
                    .store(StaState::Connected, std::sync::atomic::Ordering::Release);
                match state {
                    StaState::RequestingAddress | StaState::ObtainingAddress => {
                        self.finish_connected(Some(addr));
                    }
                    StaState::Connected => {
                        // renewed lease or re-applied static config
                        self.notify(WifiNotification::AddressSuccess);
                    }
                    _ => debug!("address event outside of pipeline, ignored"),
                }
            }
            AddrResult::Failed => match state {
                StaState::RequestingAddress | StaState::ObtainingAddress => {
                    self.notify(WifiNotification::AddressFailed);
                    let _ = self.driver.submit(DriverCommand::Deauthenticate);
                    self.attempt_failed(None);
                }
                StaState::Connected => self.notify(WifiNotification::AddressFailed),
                _ => {}
            },
        }
    }

    /// NET_IPV6_CONFIG: autoconfiguration result, independent of IPv4.
    pub(crate) fn handle_ipv6(&mut self, result: wifimgr_core_lib::Addr6Result) {
        match result {
            wifimgr_core_lib::Addr6Result::Obtained(addr) => {
                *self.shared.address6.lock().unwrap() = Some(addr);
                self.shared
                    .ipv6_state
                    .store(StaState::Connected, std::sync::atomic::Ordering::Release);
                if self.shared.sta_state() == StaState::Connected {
                    self.notify(WifiNotification::AddressSuccess);
                }
            }
            wifimgr_core_lib::Addr6Result::Failed => {
                self.shared
                    .ipv6_state
                    .store(StaState::Idle, std::sync::atomic::Ordering::Release);
            }
        }
    }

    /// Terminal success: publish CONNECTED and reset the retry counters.
    fn finish_connected(&mut self, addr: Option<IfaceAddr>) {
        let Some(index) = self.shared.cur_sta_idx() else {
            return;
        };
        {
            let store = self.shared.profiles.lock().unwrap();
            if let Some(profile) = store.get(index) {
                self.sta.last_ess = profile
                    .learned
                    .mobility_domain
                    .map(|domain| (profile.ssid.clone(), domain));
                info!(
                    "connected to '{}'",
                    String::from_utf8_lossy(&profile.ssid)
                );
            }
        }
        self.sta.scan_count = 0;
        self.sta.reassoc_count = 0;
        self.sta.hidden_probe = false;
        self.sta.ft_attempt = false;
        if self.sta.wake_lock_held {
            self.shared.wake_lock_put();
            self.sta.wake_lock_held = false;
        }
        self.shared.scan_lock.release();
        self.shared.set_sta_state(StaState::Connected);
        self.notify(WifiNotification::Success(addr));
    }

    /// LINK_LOSS / DISASSOCIATION / DEAUTHENTICATION from the firmware.
    pub(crate) fn handle_link_down(&mut self, reason: u16) {
        match self.shared.sta_state() {
            StaState::Connected => {
                info!("link lost (reason {reason})");
                self.teardown_link();
                self.notify(WifiNotification::LinkLost);
                self.attempt_failed(None);
            }
            StaState::RequestingAddress | StaState::ObtainingAddress => {
                self.teardown_link();
                self.notify(WifiNotification::AddressFailed);
                self.attempt_failed(None);
            }
            StaState::Associating | StaState::Associated => {
                self.attempt_failed(Some(WifiNotification::ConnectFailed));
            }
            _ => debug!("link-down event while inactive, ignored"),
        }
    }

    /// CHAN_SWITCH: the BSS moved; drop to idle and let the reconnect
    /// policy bring us back on the new channel.
    pub(crate) fn handle_chan_switch(&mut self, channel: u8) {
        if let Some(index) = self.shared.cur_sta_idx() {
            let mut store = self.shared.profiles.lock().unwrap();
            if let Some(profile) = store.get_mut(index) {
                if !profile.specificity.channel {
                    profile.channel = channel;
                }
            }
        }
        if self.shared.sta_state() == StaState::Connected {
            self.teardown_link();
            self.notify(WifiNotification::ChanSwitch);
            self.attempt_failed(None);
        }
    }

    pub(crate) fn handle_chan_switch_ann(&mut self, channel: u8) {
        debug!("channel switch announced: {channel}");
    }

    /// USER_DISCONNECT: abort everything, always lands in IDLE.
    pub(crate) fn handle_disconnect(&mut self) {
        let state = self.shared.sta_state();
        self.sta.generation = self.sta.generation.wrapping_add(1);
        self.sta.assoc_paused_until = None;
        self.sta.reassoc_count = 0;
        self.sta.scan_count = 0;
        self.sta.last_ess = None;
        if state.is_connecting() || state == StaState::Connected {
            let _ = self.driver.submit(DriverCommand::Deauthenticate);
        }
        self.teardown_link();
        self.terminal_idle();
        self.shared.set_cur_sta_idx(None);
        self.notify(WifiNotification::UserDisconnect);
    }

    /// Bring the interface down: release addressing, reset substates.
    pub(crate) fn teardown_link(&mut self) {
        let _ = self.driver.submit(DriverCommand::ReleaseStaAddress);
        *self.shared.address.lock().unwrap() = None;
        *self.shared.address6.lock().unwrap() = None;
        self.shared
            .ipv4_state
            .store(StaState::Idle, std::sync::atomic::Ordering::Release);
        self.shared
            .ipv6_state
            .store(StaState::Idle, std::sync::atomic::Ordering::Release);
    }

    /// One connection attempt is over without success. Schedules a
    /// reconnect when the policy allows, otherwise reports `terminal` (if
    /// any) and stays idle.
    pub(crate) fn attempt_failed(&mut self, terminal: Option<WifiNotification>) {
        if self.config.reassoc_control
            && self.shared.cur_sta_idx().is_some()
            && self.sta.reassoc_count < RECONNECT_LIMIT
        {
            self.sta.reassoc_count += 1;
            self.terminal_idle();
            let generation = self.sta.generation;
            let delay = self.config.reconnect_delay;
            self.schedule(delay, Message::ReassocTick { generation });
        } else {
            self.sta.reassoc_count = 0;
            self.terminal_idle();
            if let Some(notification) = terminal {
                self.notify(notification);
            }
        }
    }

    /// Hard failure without reconnect (network not found).
    pub(crate) fn fail_attempt(&mut self, terminal: Option<WifiNotification>) {
        self.terminal_idle();
        if let Some(notification) = terminal {
            self.notify(notification);
        }
    }

    /// Common terminal-state bookkeeping for every path back to IDLE.
    fn terminal_idle(&mut self) {
        self.shared.scan_lock.release();
        if self.sta.wake_lock_held {
            self.shared.wake_lock_put();
            self.sta.wake_lock_held = false;
        }
        self.sta.hidden_probe = false;
        self.sta.ft_attempt = false;
        self.shared.set_sta_state(StaState::Idle);
    }

    /// RSSI_LOW from the firmware: report it, and when roaming is enabled
    /// look for a better BSS in the same ESS.
    pub(crate) fn handle_rssi_low(&mut self) {
        self.notify(WifiNotification::RssiLow);
        if !self.config.roaming || self.shared.sta_state() != StaState::Connected {
            return;
        }
        let dot11k = self
            .shared
            .cur_sta_idx()
            .and_then(|i| {
                let store = self.shared.profiles.lock().unwrap();
                store.get(i).map(|p| p.learned.dot11k)
            })
            .unwrap_or(false);
        if dot11k && !self.sta.neighbor_pending {
            if self.driver.submit(DriverCommand::NeighborRequest).is_ok() {
                self.sta.neighbor_pending = true;
                self.sta.neighbor_generation = self.sta.neighbor_generation.wrapping_add(1);
                let generation = self.sta.neighbor_generation;
                self.schedule(NEIGHBOR_TIMEOUT, Message::NeighborTimeout { generation });
                return;
            }
        }
        self.start_roam_scan(&[]);
    }

    /// 11k/11v neighbor list arrived: probe the suggested channels.
    pub(crate) fn handle_neighbor_report(&mut self, channels: ChannelList) {
        if !self.sta.neighbor_pending {
            return;
        }
        self.sta.neighbor_pending = false;
        self.start_roam_scan(&channels);
    }

    pub(crate) fn handle_neighbor_timeout(&mut self, generation: u32) {
        if generation == self.sta.neighbor_generation && self.sta.neighbor_pending {
            debug!("neighbor report timed out");
            self.sta.neighbor_pending = false;
        }
    }

    fn start_roam_scan(&mut self, channels: &[u8]) {
        if self.sta.roam_scan {
            return;
        }
        // roam scans must not displace a user or connect scan
        if !self.shared.scan_lock.try_acquire() {
            debug!("roam scan skipped: scan lock busy");
            return;
        }
        let ssid = self.shared.cur_sta_idx().and_then(|i| {
            let store = self.shared.profiles.lock().unwrap();
            store.get(i).map(|p| p.ssid.clone())
        });
        let Some(ssid) = ssid else {
            self.shared.scan_lock.release();
            return;
        };
        let request = ScanRequest::directed(ssid, channels);
        if self.driver.submit(DriverCommand::BgScan(request)).is_ok() {
            self.sta.roam_scan = true;
        } else {
            self.shared.scan_lock.release();
        }
    }

    /// BG_SCAN_REPORT: reassociate if a sufficiently stronger same-ESS BSS
    /// showed up.
    pub(crate) fn handle_bg_scan_report(&mut self, descriptors: Vec<BssDescriptor>) {
        if !self.sta.roam_scan {
            return;
        }
        self.sta.roam_scan = false;
        self.shared.scan_lock.release();
        if self.shared.sta_state() != StaState::Connected {
            return;
        }
        let Some(index) = self.shared.cur_sta_idx() else {
            return;
        };
        let (current_bssid, outcome) = {
            let store = self.shared.profiles.lock().unwrap();
            let Some(profile) = store.get(index) else {
                return;
            };
            let allowed = self.driver.allowed_channels();
            (
                profile.bssid,
                select_bss(profile, &descriptors, &allowed, self.config.filters),
            )
        };
        let candidate = outcome.best.map(|i| &descriptors[i]).filter(|desc| {
            desc.bssid != current_bssid
                && desc.rssi > self.sta.last_rssi.saturating_add(ROAM_RSSI_MARGIN)
        });
        match candidate {
            Some(desc) => {
                info!("roaming to stronger BSS (rssi {})", desc.rssi);
                let desc = desc.clone();
                self.begin_association(index, &desc);
            }
            None => self.notify(WifiNotification::BgScanNetworkNotFound),
        }
    }

    /// DTIM period of the associated BSS, 0 when unknown.
    pub(crate) fn current_dtim(&self) -> u8 {
        self.shared
            .cur_sta_idx()
            .and_then(|i| {
                let store = self.shared.profiles.lock().unwrap();
                store.get(i).map(|p| p.learned.dtim_period)
            })
            .unwrap_or(0)
    }
}
