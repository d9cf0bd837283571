//! Power-save orchestration: the outer driver for the two pure FSMs, the
//! sleep-confirm handshake, and host-sleep configuration.
//!
//! The FSMs themselves live in `wifimgr_core_lib::psfsm`; this module turns
//! their actions into driver commands, published state and user callbacks.
//! A sleep confirm that cannot run yet (bus busy, host-sleep send failed) is
//! deferred: `req_sleep_confirm` switches the dispatcher to a short receive
//! timeout and the attempt is retried on every tick.

use std::net::Ipv4Addr;

use enumset::EnumSet;
use log::{debug, info, warn};

use wifimgr_core_lib::{
    ps_run, BssRole, CmPsState, DriverCommand, PsAction, PsEvent, PsFsmState, PsMode, PsNotice,
    StaState, UapState,
};

use crate::dispatcher::Core;
use crate::{wake_flags, WakeupCondition, WifiError, WifiNotification};

/// Host-sleep configuration as captured at request time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HostSleep {
    pub conditions: EnumSet<WakeupCondition>,
    pub role: BssRole,
    /// Interface address retained when the request was made
    pub address: Ipv4Addr,
}

/// Dispatcher-private power-save state.
pub(crate) struct PowerState {
    pub ieee: PsFsmState,
    pub deep: PsFsmState,
    /// A sleep confirm is pending; dispatcher polls on a short tick
    pub req_sleep_confirm: bool,
    pub host_sleep: Option<HostSleep>,
    pub host_sleep_active: bool,
    /// Suppress the first deep-sleep exit callback after a wake that raced
    /// re-initialization
    pub skip_ds_exit_cb: bool,
}

impl PowerState {
    pub fn new() -> Self {
        Self {
            ieee: PsFsmState::Init,
            deep: PsFsmState::Init,
            req_sleep_confirm: false,
            host_sleep: None,
            host_sleep_active: false,
            skip_ds_exit_cb: false,
        }
    }

    /// The machine sleep/awake notifications without an explicit mode are
    /// routed to: deep sleep wins when both are somehow active.
    pub fn active_mode(&self) -> Option<PsMode> {
        if self.deep != PsFsmState::Init {
            Some(PsMode::DeepSleep)
        } else if self.ieee != PsFsmState::Init {
            Some(PsMode::Ieee)
        } else {
            None
        }
    }
}

impl Core {
    /// Feed one event into the chosen machine and run its actions.
    pub(crate) fn ps_event(&mut self, mode: PsMode, event: PsEvent) {
        let connected = self.shared.sta_state() == StaState::Connected;
        let state = match mode {
            PsMode::Ieee => &mut self.power.ieee,
            PsMode::DeepSleep => &mut self.power.deep,
        };
        let actions = ps_run(mode, state, event, connected);
        for action in actions {
            self.apply_ps_action(mode, action);
        }
    }

    fn apply_ps_action(&mut self, mode: PsMode, action: PsAction) {
        match action {
            PsAction::SendEnable => {
                let cmd = match mode {
                    PsMode::Ieee => DriverCommand::EnterIeeePs,
                    PsMode::DeepSleep => DriverCommand::EnterDeepSleep,
                };
                if let Err(e) = self.driver.submit(cmd) {
                    warn!("power save enable rejected: {e}");
                }
            }
            PsAction::SendDisable => {
                let cmd = match mode {
                    PsMode::Ieee => DriverCommand::ExitIeeePs,
                    PsMode::DeepSleep => DriverCommand::ExitDeepSleep,
                };
                if let Err(e) = self.driver.submit(cmd) {
                    warn!("power save disable rejected: {e}");
                }
            }
            PsAction::RequestSleepConfirm => self.attempt_sleep_confirm(mode),
            PsAction::SetCmState(state) => {
                self.shared
                    .cm_ps_state
                    .store(state, std::sync::atomic::Ordering::Release);
            }
            PsAction::NotifyEnter => self.notify(WifiNotification::PsEnter(mode)),
            PsAction::NotifyExit => {
                match mode {
                    PsMode::Ieee => self
                        .shared
                        .ieeeps_on
                        .store(false, std::sync::atomic::Ordering::Release),
                    PsMode::DeepSleep => self
                        .shared
                        .deepsleep_on
                        .store(false, std::sync::atomic::Ordering::Release),
                }
                if mode == PsMode::DeepSleep && self.power.skip_ds_exit_cb {
                    // wake raced re-initialization; swallow exactly one exit
                    self.power.skip_ds_exit_cb = false;
                    debug!("suppressing first deep-sleep exit callback");
                } else {
                    self.notify(WifiNotification::PsExit(mode));
                }
            }
        }
    }

    /// The per-doze handshake. Defers (and arms the dispatcher tick) when
    /// the bus is busy or host-sleep configuration cannot be applied yet.
    pub(crate) fn attempt_sleep_confirm(&mut self, mode: PsMode) {
        if self.driver.outstanding_transfer() {
            debug!("sleep confirm deferred: transfer outstanding");
            self.power.req_sleep_confirm = true;
            return;
        }

        let sta_active = self.shared.sta_state() == StaState::Connected;
        let uap_active = self.shared.uap_state() != UapState::Initializing;

        // Deep sleep confirms without touching host-sleep configuration
        if mode == PsMode::Ieee {
            if let Some(hs) = self.power.host_sleep {
                let sent = self
                    .driver
                    .submit(DriverCommand::HostSleepConfig {
                        wake_flags: wake_flags(hs.conditions),
                        role: hs.role,
                        address: hs.address,
                    })
                    .is_ok();
                if !sent || (!sta_active && !uap_active) {
                    self.power.req_sleep_confirm = true;
                    return;
                }
            }
        }

        self.shared
            .cm_ps_state
            .store(CmPsState::SleepConfirm, std::sync::atomic::Ordering::Release);
        let role = if sta_active { BssRole::Sta } else { BssRole::Uap };
        if self.driver.submit(DriverCommand::SleepConfirm { role }).is_err() {
            self.power.req_sleep_confirm = true;
            return;
        }
        self.power.req_sleep_confirm = false;
    }

    pub(crate) fn handle_ieeeps_on(&mut self, conditions: EnumSet<WakeupCondition>) {
        info!("enabling IEEE power save");
        self.power.host_sleep = Some(self.capture_host_sleep(conditions));
        self.ps_event(PsMode::Ieee, PsEvent::Enable);
    }

    pub(crate) fn handle_deepsleep_on(&mut self) {
        info!("enabling deep sleep");
        self.ps_event(PsMode::DeepSleep, PsEvent::Enable);
    }

    /// Driver notifications for either machine.
    pub(crate) fn handle_ps_notice(&mut self, mode: PsMode, notice: PsNotice) {
        if mode == PsMode::DeepSleep
            && notice == PsNotice::Awake
            && self.shared.sta_state() == StaState::Initializing
            && self.power.deep == PsFsmState::Sleep
        {
            // Wake from deep sleep while the system is re-initializing: the
            // exit callback would reorder with Initialized, so skip it once.
            self.power.skip_ds_exit_cb = true;
        }
        let event = match notice {
            PsNotice::EnableDone => PsEvent::EnableDone,
            PsNotice::Sleep => PsEvent::Sleep,
            PsNotice::Awake => PsEvent::Awake,
            PsNotice::SleepConfirm => PsEvent::SleepConfirmed,
            PsNotice::DisAutoPs => PsEvent::DisableDone,
        };
        self.ps_event(mode, event);
    }

    /// Store host-sleep configuration for the next sleep confirm. A second
    /// configuration with a different mask while one is in place is refused.
    pub(crate) fn handle_host_sleep(
        &mut self,
        conditions: EnumSet<WakeupCondition>,
    ) -> Result<(), WifiError> {
        if let Some(existing) = self.power.host_sleep {
            if existing.conditions != conditions {
                return Err(WifiError::AlreadyConfigured);
            }
        }
        self.power.host_sleep = Some(self.capture_host_sleep(conditions));
        Ok(())
    }

    fn capture_host_sleep(&self, conditions: EnumSet<WakeupCondition>) -> HostSleep {
        let uap_active = self.shared.uap_state() != UapState::Initializing;
        let role = if self.shared.sta_state() == StaState::Connected || !uap_active {
            BssRole::Sta
        } else {
            BssRole::Uap
        };
        let address = self
            .shared
            .address
            .lock()
            .unwrap()
            .map_or(Ipv4Addr::UNSPECIFIED, |a| a.address);
        HostSleep {
            conditions,
            role,
            address,
        }
    }
}
