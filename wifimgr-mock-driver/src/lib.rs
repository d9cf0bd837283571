//! Mock firmware driver for testing the connection manager.
//!
//! The mock plays the role of the firmware plus IP stack: it records every
//! command the supervisor submits and, where enabled, answers with the event
//! the real stack would send. Tests hold a [`MockControl`] to adjust the
//! canned behavior and to inject arbitrary events mid-scenario.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::debug;

use wifimgr_core_lib::{
    AddrResult, AddressRequest, BssDescriptor, ChannelList, CmdStatus, DriverCommand, DriverEvent,
    DriverPort, EventSink, IfaceAddr, PsNotice, WifiError,
};

/// STA MAC the mock reports during bring-up
pub const MOCK_STA_MAC: [u8; 6] = [0x00, 0x50, 0x43, 0x21, 0x0a, 0x01];

/// uAP MAC the mock reports during bring-up
pub const MOCK_UAP_MAC: [u8; 6] = [0x00, 0x50, 0x43, 0x21, 0x0a, 0x02];

/// Canned responses. Every `auto_*` switch can be turned off so a test can
/// inject the corresponding events by hand.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Report bring-up failure instead of a working interface
    pub fail_init: bool,
    /// Answer scan commands with `scan_results`
    pub auto_scan: bool,
    pub scan_results: Vec<BssDescriptor>,
    /// Answer associate commands with this status
    pub assoc_status: Option<CmdStatus>,
    /// Follow a successful association with this auth outcome
    pub auth_result: Option<(CmdStatus, u16)>,
    /// Answer address configuration commands
    pub auto_addr: bool,
    /// The lease handed out for DHCP requests
    pub dhcp_lease: IfaceAddr,
    /// Answer uAP start/stop/address commands
    pub auto_uap: bool,
    /// Acknowledge power-save enable/disable and sleep confirms
    pub auto_ps: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            fail_init: false,
            auto_scan: true,
            scan_results: Vec::new(),
            assoc_status: Some(CmdStatus::Ok),
            auth_result: Some((CmdStatus::Ok, 0)),
            auto_addr: true,
            dhcp_lease: IfaceAddr {
                address: [192, 168, 1, 100].into(),
                netmask: [255, 255, 255, 0].into(),
                gateway: [192, 168, 1, 1].into(),
                dns1: [192, 168, 1, 1].into(),
                dns2: [0, 0, 0, 0].into(),
            },
            auto_uap: true,
            auto_ps: true,
        }
    }
}

struct Inner {
    sink: Mutex<Option<EventSink>>,
    commands: Mutex<Vec<DriverCommand>>,
    behavior: Mutex<MockBehavior>,
    outstanding: AtomicBool,
    allowed_channels: Mutex<ChannelList>,
}

impl Inner {
    fn post(&self, event: DriverEvent) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.post(event);
        }
    }
}

/// The `DriverPort` half, handed to the supervisor.
pub struct MockDriver {
    inner: Arc<Inner>,
}

/// The test half: inspect commands, change behavior, inject events.
#[derive(Clone)]
pub struct MockControl {
    inner: Arc<Inner>,
}

/// Build a connected mock pair.
#[must_use]
pub fn mock_driver() -> (MockDriver, MockControl) {
    let inner = Arc::new(Inner {
        sink: Mutex::new(None),
        commands: Mutex::new(Vec::new()),
        behavior: Mutex::new(MockBehavior::default()),
        outstanding: AtomicBool::new(false),
        allowed_channels: Mutex::new(ChannelList::new()),
    });
    (
        MockDriver {
            inner: Arc::clone(&inner),
        },
        MockControl { inner },
    )
}

impl MockControl {
    /// Post an arbitrary event, as the firmware would.
    pub fn inject(&self, event: DriverEvent) {
        self.inner.post(event);
    }

    /// Snapshot of every command submitted so far.
    #[must_use]
    pub fn commands(&self) -> Vec<DriverCommand> {
        self.inner.commands.lock().unwrap().clone()
    }

    pub fn clear_commands(&self) {
        self.inner.commands.lock().unwrap().clear();
    }

    pub fn set_behavior(&self, adjust: impl FnOnce(&mut MockBehavior)) {
        adjust(&mut self.inner.behavior.lock().unwrap());
    }

    pub fn set_scan_results(&self, results: Vec<BssDescriptor>) {
        self.inner.behavior.lock().unwrap().scan_results = results;
    }

    /// Pretend a bus transfer is in flight (defers sleep confirms).
    pub fn set_outstanding_transfer(&self, outstanding: bool) {
        self.inner.outstanding.store(outstanding, Ordering::Release);
    }

    pub fn set_allowed_channels(&self, channels: &[u8]) {
        *self.inner.allowed_channels.lock().unwrap() = ChannelList::from_slice(channels);
    }
}

impl DriverPort for MockDriver {
    fn start(&mut self, sink: EventSink) -> Result<(), WifiError> {
        *self.inner.sink.lock().unwrap() = Some(sink);
        let fail = self.inner.behavior.lock().unwrap().fail_init;
        self.inner.post(DriverEvent::StaMacConfig(MOCK_STA_MAC));
        self.inner.post(DriverEvent::UapMacConfig(MOCK_UAP_MAC));
        self.inner.post(DriverEvent::HwSpec { fw_version: 0x0201 });
        self.inner.post(DriverEvent::InterfaceConfig(if fail {
            CmdStatus::Failed
        } else {
            CmdStatus::Ok
        }));
        Ok(())
    }

    fn submit(&mut self, cmd: DriverCommand) -> Result<(), WifiError> {
        debug!("mock driver: {cmd:?}");
        let behavior = self.inner.behavior.lock().unwrap().clone();
        self.inner.commands.lock().unwrap().push(cmd.clone());

        match cmd {
            DriverCommand::Scan(_) if behavior.auto_scan => {
                self.inner.post(DriverEvent::ScanStart);
                self.inner
                    .post(DriverEvent::ScanReport(behavior.scan_results));
            }
            DriverCommand::BgScan(_) if behavior.auto_scan => {
                self.inner
                    .post(DriverEvent::BgScanReport(behavior.scan_results));
            }
            DriverCommand::Associate(_) => {
                if let Some(status) = behavior.assoc_status {
                    self.inner.post(DriverEvent::Association(status));
                    if status == CmdStatus::Ok {
                        if let Some((auth, reason)) = behavior.auth_result {
                            self.inner.post(DriverEvent::Authentication {
                                status: auth,
                                reason,
                            });
                        }
                    }
                }
            }
            DriverCommand::ConfigureStaAddress(request) if behavior.auto_addr => match request {
                AddressRequest::Static(ip) => {
                    self.inner.post(DriverEvent::StaAddrConfig(AddrResult::Obtained(
                        IfaceAddr::from_static(&ip),
                    )));
                }
                AddressRequest::Dhcp => {
                    self.inner.post(DriverEvent::DhcpConfig(AddrResult::Obtained(
                        behavior.dhcp_lease,
                    )));
                }
            },
            DriverCommand::UapStart(_) if behavior.auto_uap => {
                self.inner.post(DriverEvent::UapStarted(CmdStatus::Ok));
            }
            DriverCommand::UapStop if behavior.auto_uap => {
                self.inner.post(DriverEvent::UapStopped(CmdStatus::Ok));
            }
            DriverCommand::ConfigureUapAddress(ip) if behavior.auto_uap => {
                self.inner.post(DriverEvent::UapAddrConfig(AddrResult::Obtained(
                    IfaceAddr::from_static(&ip),
                )));
            }
            DriverCommand::EnterIeeePs if behavior.auto_ps => {
                self.inner.post(DriverEvent::IeeePs(PsNotice::EnableDone));
            }
            DriverCommand::ExitIeeePs if behavior.auto_ps => {
                self.inner.post(DriverEvent::IeeePs(PsNotice::DisAutoPs));
            }
            DriverCommand::EnterDeepSleep if behavior.auto_ps => {
                self.inner.post(DriverEvent::DeepSleep(PsNotice::EnableDone));
            }
            DriverCommand::ExitDeepSleep if behavior.auto_ps => {
                self.inner.post(DriverEvent::DeepSleep(PsNotice::DisAutoPs));
            }
            DriverCommand::SleepConfirm { .. } if behavior.auto_ps => {
                self.inner.post(DriverEvent::SleepConfirmDone);
            }
            DriverCommand::HostSleepConfig { .. } => {
                self.inner.post(DriverEvent::HsConfig(CmdStatus::Ok));
            }
            _ => {}
        }
        Ok(())
    }

    fn outstanding_transfer(&self) -> bool {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    fn allowed_channels(&self) -> ChannelList {
        self.inner.allowed_channels.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_commands() {
        let (mut driver, control) = mock_driver();
        driver.submit(DriverCommand::Deauthenticate).unwrap();
        assert!(matches!(
            control.commands().as_slice(),
            [DriverCommand::Deauthenticate]
        ));
    }

    #[test]
    fn test_auto_scan_posts_report() {
        let (mut driver, control) = mock_driver();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        driver
            .start(EventSink::new(move |ev| {
                sink_seen.lock().unwrap().push(ev);
            }))
            .unwrap();
        control.set_scan_results(vec![BssDescriptor::open(b"x", [1; 6], 6, -40)]);

        driver
            .submit(DriverCommand::Scan(Default::default()))
            .unwrap();
        let events = seen.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, DriverEvent::ScanReport(r) if r.len() == 1)));
    }
}
