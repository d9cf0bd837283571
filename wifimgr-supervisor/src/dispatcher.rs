//! The dispatcher: one thread, one queue, all state.
//!
//! The loop blocks on the queue forever unless a sleep confirm was deferred,
//! in which case it polls on a 10 ms tick and retries the confirm while the
//! station stays connected. Every callback the user sees fires from here.

use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use wifimgr_core_lib::{
    DriverEvent, DriverPort, EventSink, PsEvent, PsFsmState, PsMode, StaState, UapState,
};

use crate::events::{Message, Request};
use crate::power::PowerState;
use crate::scan::ScanArbiter;
use crate::sta::StaSession;
use crate::{
    EventCallback, ManagerConfig, Shared, WifiNotification, SLEEP_CONFIRM_TICK,
};

/// Owns every state machine. Lives on the dispatcher thread.
pub(crate) struct Core {
    pub config: ManagerConfig,
    pub driver: Box<dyn DriverPort>,
    pub shared: Arc<Shared>,
    pub tx: SyncSender<Message>,
    pub arbiter: ScanArbiter,
    pub sta: StaSession,
    pub power: PowerState,
    callback: EventCallback,
    rx: Receiver<Message>,
}

impl Core {
    pub fn new(
        config: ManagerConfig,
        driver: Box<dyn DriverPort>,
        callback: EventCallback,
        shared: Arc<Shared>,
        tx: SyncSender<Message>,
        rx: Receiver<Message>,
    ) -> Self {
        Self {
            config,
            driver,
            shared,
            tx,
            arbiter: ScanArbiter::new(),
            sta: StaSession::new(),
            power: PowerState::new(),
            callback,
            rx,
        }
    }

    /// Invoke the user callback, synchronously on this thread.
    pub fn notify(&mut self, notification: WifiNotification) {
        (self.callback)(notification);
    }

    /// Post a message back to ourselves after a delay.
    pub fn schedule(&self, delay: Duration, message: Message) {
        let tx = self.tx.clone();
        let _ = std::thread::Builder::new()
            .name("wifi_timer".to_string())
            .spawn(move || {
                std::thread::sleep(delay);
                let _ = tx.try_send(message);
            });
    }

    pub fn run(mut self) {
        info!("dispatcher starting");

        let sink_tx = self.tx.clone();
        let sink = EventSink::new(move |event| {
            if sink_tx.try_send(Message::Driver(event)).is_err() {
                warn!("event queue full, dropping driver event");
            }
        });
        if let Err(e) = self.driver.start(sink) {
            error!("driver start failed: {e}");
            self.notify(WifiNotification::InitializationFailed);
        }

        loop {
            let message = if self.power.req_sleep_confirm {
                match self.rx.recv_timeout(SLEEP_CONFIRM_TICK) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match self.rx.recv() {
                    Ok(message) => Some(message),
                    Err(_) => break,
                }
            };

            let Some(message) = message else {
                // tick: retry the deferred sleep confirm
                if self.shared.sta_state() == StaState::Connected && self.power.req_sleep_confirm {
                    self.ps_event(PsMode::Ieee, PsEvent::Sleep);
                }
                continue;
            };

            match message {
                Message::Request(Request::Stop { reply }) => {
                    let _ = reply.send(());
                    break;
                }
                Message::Request(request) => self.handle_request(request),
                Message::Driver(event) => self.handle_driver_event(event),
                Message::ReassocTick { generation } => self.handle_reassoc_tick(generation),
                Message::NeighborTimeout { generation } => {
                    self.handle_neighbor_timeout(generation);
                }
            }
        }

        info!("dispatcher stopped");
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect { index } => self.handle_connect(index),
            Request::Reassociate => self.handle_reassociate(),
            Request::Disconnect => self.handle_disconnect(),
            Request::Scan { request, callback } => self.handle_user_scan(request, callback),
            Request::StartNetwork { index } => self.handle_uap_start(index),
            Request::StopNetwork { index } => self.handle_uap_stop(index),
            Request::IeeePsOn { conditions } => self.handle_ieeeps_on(conditions),
            Request::IeeePsOff => self.ps_event(PsMode::Ieee, PsEvent::Disable),
            Request::DeepSleepOn => self.handle_deepsleep_on(),
            Request::DeepSleepOff => self.ps_event(PsMode::DeepSleep, PsEvent::Disable),
            Request::HostSleep { conditions, reply } => {
                let result = self.handle_host_sleep(conditions);
                let _ = reply.send(result);
            }
            Request::DtimPeriod { reply } => {
                if self.shared.sta_state().is_scanning() {
                    self.arbiter.dtim_waiters.push(reply);
                } else {
                    let _ = reply.send(self.current_dtim());
                }
            }
            Request::Deinit => self.handle_deinit(),
            Request::Stop { .. } => unreachable!("handled in the loop"),
        }
    }

    fn handle_driver_event(&mut self, event: DriverEvent) {
        use DriverEvent as E;
        match event {
            E::ScanStart => debug!("scan started"),
            E::ScanReport(descriptors) => self.handle_scan_report(descriptors),
            E::Association(status) => self.handle_association(status),
            E::Authentication { status, reason } => self.handle_authentication(status, reason),
            E::Pmk(_) => debug!("PMK delivered to key backend"),
            E::LinkLoss { reason }
            | E::Disassociation { reason }
            | E::Deauthentication { reason } => self.handle_link_down(reason),
            E::InterfaceConfig(status) => self.handle_interface_config(status),
            E::StaAddrConfig(result) | E::DhcpConfig(result) => self.handle_sta_addr(result),
            E::Ipv6Config(result) => self.handle_ipv6(result),
            E::ChanSwitchAnn { channel } => self.handle_chan_switch_ann(channel),
            E::ChanSwitch { channel } => self.handle_chan_switch(channel),
            E::Sleep => {
                if let Some(mode) = self.power.active_mode() {
                    self.ps_event(mode, PsEvent::Sleep);
                }
            }
            E::Awake => {
                if let Some(mode) = self.power.active_mode() {
                    self.ps_event(mode, PsEvent::Awake);
                }
            }
            E::IeeePs(notice) => self.handle_ps_notice(PsMode::Ieee, notice),
            E::DeepSleep(notice) => self.handle_ps_notice(PsMode::DeepSleep, notice),
            E::HsConfig(status) => debug!("host sleep configured: {status:?}"),
            E::HsActivated => {
                debug!("host sleep activated");
                self.power.host_sleep_active = true;
            }
            E::SleepConfirmDone => {
                if let Some(mode) = self.power.active_mode() {
                    self.ps_event(mode, PsEvent::SleepConfirmed);
                }
            }
            E::AddBa => {
                self.shared.ba_added.fetch_add(1, Ordering::Relaxed);
            }
            E::DelBa => {
                self.shared.ba_deleted.fetch_add(1, Ordering::Relaxed);
            }
            E::BaStreamTimeout => {
                self.shared.ba_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            E::StaMacConfig(mac) => {
                *self.shared.sta_mac.lock().unwrap() = Some(mac);
            }
            E::UapMacConfig(mac) => {
                *self.shared.uap_mac.lock().unwrap() = Some(mac);
            }
            E::UapStarted(status) => self.handle_uap_started(status),
            E::UapStopped(status) => self.handle_uap_stopped(status),
            E::UapClientAssoc(mac) => self.notify(WifiNotification::UapClientAssoc(mac)),
            E::UapClientConn(mac) => self.notify(WifiNotification::UapClientConn(mac)),
            E::UapClientDeauth(mac) => self.notify(WifiNotification::UapClientDisassoc(mac)),
            E::UapAddrConfig(result) => self.handle_uap_addr(result),
            E::BgScanStopped => debug!("background scan stopped"),
            E::BgScanReport(descriptors) => self.handle_bg_scan_report(descriptors),
            E::MgmtFrame(frame) => debug!("management frame, {} bytes", frame.len()),
            E::NeighborListReport(channels) => self.handle_neighbor_report(channels),
            E::RssiLow => self.handle_rssi_low(),
            E::HwSpec { fw_version } => info!("firmware version {fw_version:#x}"),
        }
    }

    /// NET_INTERFACE_CONFIG: bring-up finished.
    fn handle_interface_config(&mut self, status: wifimgr_core_lib::CmdStatus) {
        match status {
            wifimgr_core_lib::CmdStatus::Ok => {
                self.shared.set_sta_state(StaState::Idle);
                self.shared.ipv4_state.store(StaState::Idle, Ordering::Release);
                self.shared.ipv6_state.store(StaState::Idle, Ordering::Release);
                self.shared.running.store(true, Ordering::Release);
                self.notify(WifiNotification::Initialized);
            }
            wifimgr_core_lib::CmdStatus::Failed => {
                self.notify(WifiNotification::InitializationFailed);
            }
        }
    }

    /// WLAN_DEINIT: tear both sessions down and reset to pre-init state.
    fn handle_deinit(&mut self) {
        info!("deinitializing");
        if self.shared.cur_sta_idx().is_some() {
            let _ = self.driver.submit(wifimgr_core_lib::DriverCommand::Deauthenticate);
            self.teardown_link();
            self.shared.set_cur_sta_idx(None);
        }
        if self.shared.cur_uap_idx().is_some() {
            let _ = self.driver.submit(wifimgr_core_lib::DriverCommand::UapStop);
            self.shared.set_uap_state(UapState::Initializing);
            self.shared.set_cur_uap_idx(None);
        }
        if self.power.ieee != PsFsmState::Init {
            let _ = self.driver.submit(wifimgr_core_lib::DriverCommand::ExitIeeePs);
        }
        if self.power.deep != PsFsmState::Init {
            let _ = self.driver.submit(wifimgr_core_lib::DriverCommand::ExitDeepSleep);
        }
        self.power = PowerState::new();
        self.sta = StaSession::new();
        self.shared.ieeeps_on.store(false, Ordering::Release);
        self.shared.deepsleep_on.store(false, Ordering::Release);
        self.shared.scan_lock.release();
        self.shared.set_sta_state(StaState::Initializing);
        self.shared.running.store(false, Ordering::Release);
        *self.shared.profiles.lock().unwrap() = crate::profiles::ProfileStore::default();
        *self.shared.address.lock().unwrap() = None;
        *self.shared.scan_results.lock().unwrap() = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    use wifimgr_core_lib::{
        BssDescriptor, BssSecurity, CmdStatus, DriverCommand, DriverEvent, IpConfig,
        NetworkProfile, PsMode, PsNotice, Role, SecurityKind, Ssid, StaState, StaticIp, UapState,
    };
    use wifimgr_mock_driver::{mock_driver, MockControl};

    use crate::{ManagerConfig, WakeupCondition, WifiError, WifiManager, WifiNotification};

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_config() -> ManagerConfig {
        ManagerConfig {
            reconnect_delay: Duration::from_millis(10),
            ..ManagerConfig::default()
        }
    }

    fn start_manager(
        config: ManagerConfig,
    ) -> (WifiManager, MockControl, mpsc::Receiver<WifiNotification>) {
        let (driver, control) = mock_driver();
        let (notif_tx, notif_rx) = mpsc::channel();
        let manager = WifiManager::start_with_config(
            config,
            Box::new(driver),
            Box::new(move |n| {
                let _ = notif_tx.send(n);
            }),
        )
        .unwrap();
        assert_eq!(
            notif_rx.recv_timeout(WAIT).unwrap(),
            WifiNotification::Initialized
        );
        (manager, control, notif_rx)
    }

    fn home_profile() -> NetworkProfile {
        let mut p = NetworkProfile::new("home", Role::Sta);
        p.ssid = Ssid::from_slice(b"Home");
        p.security.kind = SecurityKind::Wpa2;
        p.security.psk = "abcdefgh".to_string();
        p
    }

    fn home_bss(rssi: i16) -> BssDescriptor {
        let mut d = BssDescriptor::open(b"Home", [0x02, 0, 0, 0, 0, 6], 6, rssi);
        d.security = BssSecurity::Wpa2.into();
        d
    }

    fn uap_profile() -> NetworkProfile {
        let mut p = NetworkProfile::new("uap", Role::Uap);
        p.ssid = Ssid::from_slice(b"my-ap");
        p.security.kind = SecurityKind::Wpa2;
        p.security.psk = "xxxxxxxx".to_string();
        p.ip = IpConfig::Static(StaticIp {
            address: Ipv4Addr::new(192, 168, 10, 1),
            gateway: Ipv4Addr::new(192, 168, 10, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            dns1: Ipv4Addr::UNSPECIFIED,
            dns2: Ipv4Addr::UNSPECIFIED,
        });
        p
    }

    /// Poll `cond` until it holds or the deadline passes.
    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Receive notifications until `want` shows up, returning everything
    /// seen before it. Panics on timeout.
    fn recv_until(
        rx: &mpsc::Receiver<WifiNotification>,
        want: &WifiNotification,
    ) -> Vec<WifiNotification> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(n) if n == *want => return seen,
                Ok(n) => seen.push(n),
                Err(_) => panic!("timed out waiting for {want:?}, saw {seen:?}"),
            }
        }
    }

    fn count_scans(control: &MockControl) -> usize {
        control
            .commands()
            .iter()
            .filter(|c| matches!(c, DriverCommand::Scan(_)))
            .count()
    }

    fn count_associates(control: &MockControl) -> usize {
        control
            .commands()
            .iter()
            .filter(|c| matches!(c, DriverCommand::Associate(_)))
            .count()
    }

    #[test]
    fn test_happy_sta_connect_dhcp() {
        let (manager, control, notif) = start_manager(fast_config());
        manager.add_network(home_profile()).unwrap();
        control.set_scan_results(vec![home_bss(-55)]);

        manager.connect("home").unwrap();
        assert_eq!(
            notif.recv_timeout(WAIT).unwrap(),
            WifiNotification::AuthSuccess
        );
        match notif.recv_timeout(WAIT).unwrap() {
            WifiNotification::Success(Some(addr)) => {
                assert_eq!(addr.address, Ipv4Addr::new(192, 168, 1, 100));
            }
            other => panic!("expected Success, got {other:?}"),
        }
        assert_eq!(manager.get_connection_state(), StaState::Connected);
        assert_eq!(manager.get_current_network().unwrap().name, "home");
        assert!(!manager.shared.scan_lock.is_locked());
        // wake lock balanced once connected
        assert_eq!(
            manager
                .shared
                .wake_locks
                .load(std::sync::atomic::Ordering::Acquire),
            0
        );
    }

    #[test]
    fn test_connect_picks_strongest_bss() {
        let (manager, control, notif) = start_manager(fast_config());
        manager.add_network(home_profile()).unwrap();
        let strong = {
            let mut d = home_bss(-40);
            d.bssid = [0x02, 0, 0, 0, 0, 11];
            d.channel = 11;
            d
        };
        control.set_scan_results(vec![home_bss(-70), strong, home_bss(-60)]);

        manager.connect("home").unwrap();
        recv_until(&notif, &WifiNotification::AuthSuccess);
        let assoc = control
            .commands()
            .into_iter()
            .find_map(|c| match c {
                DriverCommand::Associate(r) => Some(r),
                _ => None,
            })
            .expect("an associate command");
        assert_eq!(assoc.channel, 11);
        assert_eq!(assoc.bssid, [0x02, 0, 0, 0, 0, 11]);
    }

    #[test]
    fn test_wrong_passphrase_without_reconnect() {
        let config = ManagerConfig {
            reassoc_control: false,
            ..fast_config()
        };
        let (manager, control, notif) = start_manager(config);
        manager.add_network(home_profile()).unwrap();
        control.set_scan_results(vec![home_bss(-55)]);
        // 4-way handshake timeout
        control.set_behavior(|b| b.auth_result = Some((CmdStatus::Failed, 15)));

        manager.connect("home").unwrap();
        let before = recv_until(&notif, &WifiNotification::ConnectFailed);
        assert!(!before.contains(&WifiNotification::AuthSuccess));
        assert!(wait_for(|| manager.get_connection_state() == StaState::Idle));
    }

    #[test]
    fn test_wrong_passphrase_retries_then_fails() {
        let (manager, control, notif) = start_manager(fast_config());
        manager.add_network(home_profile()).unwrap();
        control.set_scan_results(vec![home_bss(-55)]);
        control.set_behavior(|b| b.auth_result = Some((CmdStatus::Failed, 15)));

        manager.connect("home").unwrap();
        let before = recv_until(&notif, &WifiNotification::ConnectFailed);
        assert!(!before.contains(&WifiNotification::AuthSuccess));
        // initial attempt plus RECONNECT_LIMIT scheduled retries
        assert_eq!(count_associates(&control), 1 + crate::RECONNECT_LIMIT as usize);
        assert_eq!(manager.get_connection_state(), StaState::Idle);
    }

    #[test]
    fn test_network_not_found_after_rescans() {
        let (manager, control, notif) = start_manager(fast_config());
        manager.add_network(home_profile()).unwrap();
        // empty scan results, every time

        manager.connect("home").unwrap();
        recv_until(&notif, &WifiNotification::NetworkNotFound);
        assert_eq!(count_scans(&control), crate::RESCAN_LIMIT as usize);
        assert_eq!(manager.get_connection_state(), StaState::Idle);
        assert!(!manager.shared.scan_lock.is_locked());
    }

    #[test]
    fn test_disconnect_mid_scan() {
        let (manager, control, notif) = start_manager(fast_config());
        manager.add_network(home_profile()).unwrap();
        control.set_behavior(|b| b.auto_scan = false);

        manager.connect("home").unwrap();
        assert!(wait_for(|| {
            manager.get_connection_state() == StaState::Scanning
        }));
        assert!(manager.shared.scan_lock.is_locked());

        manager.disconnect().unwrap();
        recv_until(&notif, &WifiNotification::UserDisconnect);
        assert_eq!(manager.get_connection_state(), StaState::Idle);
        assert!(manager.shared.scan_lock.wait_released(WAIT));
    }

    #[test]
    fn test_scan_during_association_is_dropped() {
        let (manager, control, _notif) = start_manager(fast_config());
        manager.add_network(home_profile()).unwrap();
        control.set_scan_results(vec![home_bss(-55)]);
        // no association reply: the pipeline parks in ASSOCIATING
        control.set_behavior(|b| b.assoc_status = None);

        manager.connect("home").unwrap();
        assert!(wait_for(|| {
            manager.get_connection_state() == StaState::Associating
        }));

        let called = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let called_in_cb = std::sync::Arc::clone(&called);
        manager
            .scan(Box::new(move |_| {
                called_in_cb.store(true, std::sync::atomic::Ordering::Release);
            }))
            .unwrap();

        // dropped: callback never fires and the lock is freed
        assert!(manager.shared.scan_lock.wait_released(WAIT));
        std::thread::sleep(Duration::from_millis(50));
        assert!(!called.load(std::sync::atomic::Ordering::Acquire));
        assert_eq!(manager.get_connection_state(), StaState::Associating);
    }

    #[test]
    fn test_user_scan_delivers_count_and_caches_results() {
        let (manager, control, _notif) = start_manager(fast_config());
        control.set_scan_results(vec![home_bss(-55), home_bss(-60)]);

        let (count_tx, count_rx) = mpsc::channel();
        manager
            .scan(Box::new(move |count| {
                let _ = count_tx.send(count);
            }))
            .unwrap();
        assert_eq!(count_rx.recv_timeout(WAIT).unwrap(), 2);
        assert_eq!(manager.scan_result_count(), 2);
        assert!(manager.get_scan_result(1).is_some());
        assert!(manager.get_scan_result(2).is_none());
        // state restored and lock released
        assert!(wait_for(|| manager.get_connection_state() == StaState::Idle));
        assert!(!manager.shared.scan_lock.is_locked());
    }

    #[test]
    fn test_add_network_rejected_while_scanning() {
        let (manager, control, _notif) = start_manager(fast_config());
        manager.add_network(home_profile()).unwrap();
        control.set_behavior(|b| b.auto_scan = false);
        manager.connect("home").unwrap();
        assert!(wait_for(|| {
            manager.get_connection_state() == StaState::Scanning
        }));

        let mut other = home_profile();
        other.name = "other".to_string();
        assert_eq!(
            manager.add_network(other),
            Err(WifiError::State("station is busy"))
        );
    }

    #[test]
    fn test_remove_connected_profile_is_busy() {
        let (manager, control, notif) = start_manager(fast_config());
        manager.add_network(home_profile()).unwrap();
        control.set_scan_results(vec![home_bss(-55)]);
        manager.connect("home").unwrap();
        recv_until(&notif, &WifiNotification::AuthSuccess);
        assert!(wait_for(|| {
            manager.get_connection_state() == StaState::Connected
        }));

        assert_eq!(manager.remove_network("home"), Err(WifiError::Busy));
        manager.disconnect().unwrap();
        recv_until(&notif, &WifiNotification::UserDisconnect);
        assert!(manager.remove_network("home").is_ok());
    }

    #[test]
    fn test_uap_lifecycle() {
        let (manager, control, notif) = start_manager(fast_config());
        manager.add_network(uap_profile()).unwrap();

        manager.start_network("uap").unwrap();
        recv_until(&notif, &WifiNotification::UapSuccess);
        assert_eq!(manager.get_uap_state(), UapState::IpUp);

        let client = [0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f];
        control.inject(DriverEvent::UapClientAssoc(client));
        control.inject(DriverEvent::UapClientConn(client));
        assert_eq!(
            notif.recv_timeout(WAIT).unwrap(),
            WifiNotification::UapClientAssoc(client)
        );
        assert_eq!(
            notif.recv_timeout(WAIT).unwrap(),
            WifiNotification::UapClientConn(client)
        );

        manager.stop_network("uap").unwrap();
        recv_until(&notif, &WifiNotification::UapStopped);
        assert_eq!(manager.get_uap_state(), UapState::Initializing);
    }

    #[test]
    fn test_uap_inherits_sta_channel() {
        let (manager, control, notif) = start_manager(fast_config());
        manager.add_network(home_profile()).unwrap();
        control.set_scan_results(vec![home_bss(-55)]);
        manager.connect("home").unwrap();
        recv_until(&notif, &WifiNotification::AuthSuccess);
        assert!(wait_for(|| {
            manager.get_connection_state() == StaState::Connected
        }));

        manager.add_network(uap_profile()).unwrap();
        manager.start_network("uap").unwrap();
        recv_until(&notif, &WifiNotification::UapSuccess);

        let start = control
            .commands()
            .into_iter()
            .find_map(|c| match c {
                DriverCommand::UapStart(r) => Some(r),
                _ => None,
            })
            .expect("a uAP start command");
        // auto-channel profile rides on the station's channel
        assert_eq!(start.channel, 6);
    }

    #[test]
    fn test_ieee_ps_enter_and_exit() {
        let (manager, control, notif) = start_manager(fast_config());
        manager.add_network(home_profile()).unwrap();
        control.set_scan_results(vec![home_bss(-55)]);
        manager.connect("home").unwrap();
        recv_until(&notif, &WifiNotification::AuthSuccess);
        assert!(wait_for(|| {
            manager.get_connection_state() == StaState::Connected
        }));

        manager
            .ieeeps_on(WakeupCondition::Unicast | WakeupCondition::MacEvent)
            .unwrap();
        // a second enable is refused while the first is active
        assert!(matches!(
            manager.ieeeps_on(WakeupCondition::Unicast.into()),
            Err(WifiError::State(_))
        ));

        control.inject(DriverEvent::IeeePs(PsNotice::Sleep));
        recv_until(&notif, &WifiNotification::PsEnter(PsMode::Ieee));
        // the confirm handshake programmed host sleep first
        assert!(control
            .commands()
            .iter()
            .any(|c| matches!(c, DriverCommand::HostSleepConfig { .. })));
        assert!(control
            .commands()
            .iter()
            .any(|c| matches!(c, DriverCommand::SleepConfirm { .. })));

        control.inject(DriverEvent::IeeePs(PsNotice::DisAutoPs));
        recv_until(&notif, &WifiNotification::PsExit(PsMode::Ieee));
        // enable works again after the exit
        assert!(manager
            .ieeeps_on(WakeupCondition::Unicast | WakeupCondition::MacEvent)
            .is_ok());
    }

    #[test]
    fn test_sleep_confirm_deferred_while_bus_busy() {
        let (manager, control, notif) = start_manager(fast_config());
        manager.add_network(home_profile()).unwrap();
        control.set_scan_results(vec![home_bss(-55)]);
        manager.connect("home").unwrap();
        assert!(wait_for(|| {
            manager.get_connection_state() == StaState::Connected
        }));

        manager
            .ieeeps_on(WakeupCondition::Unicast.into())
            .unwrap();
        control.set_outstanding_transfer(true);
        control.inject(DriverEvent::IeeePs(PsNotice::Sleep));

        // no confirm while the transfer is outstanding
        std::thread::sleep(Duration::from_millis(100));
        assert!(!control
            .commands()
            .iter()
            .any(|c| matches!(c, DriverCommand::SleepConfirm { .. })));

        // once the bus clears, the 10 ms tick picks the confirm back up
        control.set_outstanding_transfer(false);
        recv_until(&notif, &WifiNotification::PsEnter(PsMode::Ieee));
    }

    #[test]
    fn test_host_sleep_mask_conflict() {
        let (manager, _control, _notif) = start_manager(fast_config());
        let mask = WakeupCondition::Unicast | WakeupCondition::ArpBroadcast;
        manager.send_host_sleep(mask).unwrap();
        // same mask again is fine
        manager.send_host_sleep(mask).unwrap();
        assert_eq!(
            manager.send_host_sleep(WakeupCondition::Broadcast.into()),
            Err(WifiError::AlreadyConfigured)
        );
    }

    #[test]
    fn test_link_loss_reports_and_reconnects() {
        let (manager, control, notif) = start_manager(fast_config());
        manager.add_network(home_profile()).unwrap();
        control.set_scan_results(vec![home_bss(-55)]);
        manager.connect("home").unwrap();
        recv_until(&notif, &WifiNotification::AuthSuccess);
        assert!(wait_for(|| {
            manager.get_connection_state() == StaState::Connected
        }));
        control.clear_commands();

        control.inject(DriverEvent::LinkLoss { reason: 4 });
        recv_until(&notif, &WifiNotification::LinkLost);
        // reconnect policy brings the station back on its own
        recv_until(&notif, &WifiNotification::AuthSuccess);
        assert!(wait_for(|| {
            manager.get_connection_state() == StaState::Connected
        }));
        assert!(count_associates(&control) >= 1);
    }

    #[test]
    fn test_hidden_ssid_directed_probe() {
        let (manager, control, notif) = start_manager(fast_config());
        manager.add_network(home_profile()).unwrap();
        // the AP hides its SSID: first sweep sees an empty-SSID BSS
        let mut hidden = home_bss(-50);
        hidden.ssid = Ssid::new();
        control.set_scan_results(vec![hidden]);

        manager.connect("home").unwrap();
        // the directed probe repeats the sweep; with the SSID still hidden
        // the attempt eventually exhausts its rescans
        recv_until(&notif, &WifiNotification::NetworkNotFound);

        let scans: Vec<_> = control
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                DriverCommand::Scan(r) => Some(r),
                _ => None,
            })
            .collect();
        // at least one scan was the directed hidden probe on channel 6
        assert!(scans
            .iter()
            .any(|r| r.channels.as_slice() == [6] && r.ssid.is_some()));
    }

    #[test]
    fn test_dtim_period_waits_for_scan() {
        let (manager, control, notif) = start_manager(fast_config());
        manager.add_network(home_profile()).unwrap();
        let mut bss = home_bss(-55);
        bss.dtim_period = 3;
        control.set_scan_results(vec![bss]);
        manager.connect("home").unwrap();
        recv_until(&notif, &WifiNotification::AuthSuccess);
        assert!(wait_for(|| {
            manager.get_connection_state() == StaState::Connected
        }));
        assert_eq!(manager.get_dtim_period().unwrap(), 3);
    }

    #[test]
    fn test_stop_shuts_dispatcher_down() {
        let (manager, _control, _notif) = start_manager(fast_config());
        manager.stop().unwrap();
    }
}
