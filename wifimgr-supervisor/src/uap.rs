//! Soft-AP session: start/stop, channel inheritance, client notifications.

use log::{debug, info, warn};

use wifimgr_core_lib::{
    AddrResult, ChannelList, CmdStatus, DriverCommand, IpConfig, UapStartRequest, UapState,
    MAC_UNSPECIFIED,
};

use crate::dispatcher::Core;
use crate::WifiNotification;

impl Core {
    /// USER_START: configure and start the AP described by the profile.
    pub(crate) fn handle_uap_start(&mut self, index: usize) {
        if self.shared.uap_state() != UapState::Initializing {
            warn!("soft-AP start refused: already running");
            return;
        }
        let request = {
            let store = self.shared.profiles.lock().unwrap();
            let Some(profile) = store.get(index) else {
                drop(store);
                self.notify(WifiNotification::UapStartFailed);
                return;
            };

            // auto-channel: share the station's channel when it has one,
            // otherwise let the driver pick from the regulatory list
            let mut channel = profile.channel;
            let mut allowed = ChannelList::new();
            if channel == 0 {
                if let Some(sta_channel) = self.connected_sta_channel(&store) {
                    channel = sta_channel;
                } else {
                    allowed = self.driver.allowed_channels();
                }
            }

            UapStartRequest {
                ssid: profile.ssid.clone(),
                channel,
                allowed_channels: allowed,
                security: profile.security.kind,
                psk: profile.security.psk.clone(),
                password: profile.security.password.clone(),
            }
        };

        self.shared.set_cur_uap_idx(Some(index));
        self.shared.set_uap_state(UapState::Configured);
        info!(
            "starting soft-AP '{}' on channel {}",
            String::from_utf8_lossy(&request.ssid),
            request.channel
        );
        if let Err(e) = self.driver.submit(DriverCommand::UapStart(request)) {
            warn!("soft-AP start rejected: {e}");
            self.shared.set_uap_state(UapState::Initializing);
            self.shared.set_cur_uap_idx(None);
            self.notify(WifiNotification::UapStartFailed);
        }
    }

    fn connected_sta_channel(
        &self,
        store: &crate::profiles::ProfileStore,
    ) -> Option<u8> {
        if self.shared.sta_state() != wifimgr_core_lib::StaState::Connected {
            return None;
        }
        self.shared
            .cur_sta_idx()
            .and_then(|i| store.get(i))
            .map(|p| p.channel)
            .filter(|&c| c != 0)
    }

    /// UAP_STARTED from the firmware.
    pub(crate) fn handle_uap_started(&mut self, status: CmdStatus) {
        if self.shared.uap_state() != UapState::Configured {
            debug!("uAP start event outside of session, ignored");
            return;
        }
        match status {
            CmdStatus::Ok => {
                self.shared.set_uap_state(UapState::Started);
                let index = self.shared.cur_uap_idx();
                let static_ip = {
                    let mut store = self.shared.profiles.lock().unwrap();
                    let profile = index.and_then(|i| store.get_mut(i));
                    let Some(profile) = profile else {
                        return;
                    };
                    // record the AP MAC as the BSSID the caller left open
                    if profile.bssid == MAC_UNSPECIFIED {
                        if let Some(mac) = *self.shared.uap_mac.lock().unwrap() {
                            profile.bssid = mac;
                        }
                    }
                    match profile.ip {
                        IpConfig::Static(ip) => Some(ip),
                        IpConfig::Dhcp => None,
                    }
                };
                let Some(static_ip) = static_ip else {
                    // validation guarantees a static address; defensive only
                    self.notify(WifiNotification::AddressFailed);
                    return;
                };
                if self
                    .driver
                    .submit(DriverCommand::ConfigureUapAddress(static_ip))
                    .is_err()
                {
                    self.notify(WifiNotification::AddressFailed);
                }
            }
            CmdStatus::Failed => {
                self.shared.set_uap_state(UapState::Initializing);
                self.shared.set_cur_uap_idx(None);
                self.notify(WifiNotification::UapStartFailed);
            }
        }
    }

    /// UAP_NET_ADDR_CONFIG: the AP's own addressing is up.
    pub(crate) fn handle_uap_addr(&mut self, result: AddrResult) {
        if self.shared.uap_state() != UapState::Started {
            debug!("uAP address event outside of session, ignored");
            return;
        }
        match result {
            AddrResult::Obtained(_) => {
                self.shared.set_uap_state(UapState::IpUp);
                self.notify(WifiNotification::UapSuccess);
            }
            AddrResult::Failed => {
                // the AP stays up without addressing; the user decides
                self.notify(WifiNotification::AddressFailed);
            }
        }
    }

    /// USER_STOP.
    pub(crate) fn handle_uap_stop(&mut self, index: usize) {
        if Some(index) != self.shared.cur_uap_idx() {
            debug!("stop request for a network that is not running");
            return;
        }
        if let Err(e) = self.driver.submit(DriverCommand::UapStop) {
            warn!("soft-AP stop rejected: {e}");
            self.notify(WifiNotification::UapStopFailed);
        }
    }

    /// UAP_STOPPED from the firmware.
    pub(crate) fn handle_uap_stopped(&mut self, status: CmdStatus) {
        match status {
            CmdStatus::Ok => {
                self.shared.set_uap_state(UapState::Initializing);
                self.shared.set_cur_uap_idx(None);
                self.notify(WifiNotification::UapStopped);
            }
            CmdStatus::Failed => self.notify(WifiNotification::UapStopFailed),
        }
    }
}
