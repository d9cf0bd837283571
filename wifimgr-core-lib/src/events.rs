//! Events produced by the firmware driver and IP stack, and the commands the
//! connection manager issues back down.
//!
//! Payloads are owned values. Whatever buffer the driver read a notification
//! from is copied out before the event is posted, so consumers never manage
//! driver-allocated memory.

use std::net::{Ipv4Addr, Ipv6Addr};

use smallvec::SmallVec;

use crate::bss::{BssDescriptor, ChannelList};
use crate::profile::{CipherSuite, MacAddr, SecurityKind, Ssid, StaticIp};

/// Success/failure of a driver round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdStatus {
    Ok,
    Failed,
}

/// Result of an IPv4 address configuration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrResult {
    Obtained(IfaceAddr),
    Failed,
}

/// Result of IPv6 autoconfiguration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addr6Result {
    Obtained(Ipv6Addr),
    Failed,
}

/// Assigned interface addressing, reported with address events and returned
/// by the address accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfaceAddr {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns1: Ipv4Addr,
    pub dns2: Ipv4Addr,
}

impl IfaceAddr {
    #[must_use]
    pub fn from_static(ip: &StaticIp) -> Self {
        Self {
            address: ip.address,
            netmask: ip.netmask,
            gateway: ip.gateway,
            dns1: ip.dns1,
            dns2: ip.dns2,
        }
    }
}

/// Power-save notifications from the firmware, shared by IEEE-PS and
/// Deep-Sleep-PS events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsNotice {
    EnableDone,
    Sleep,
    Awake,
    /// Sleep-confirm handshake completed
    SleepConfirm,
    /// Auto power save disabled (exit complete)
    DisAutoPs,
}

/// Which interface a command or event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BssRole {
    Sta,
    Uap,
}

/// Everything the lower layers can report upward.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    ScanStart,
    ScanReport(Vec<BssDescriptor>),
    Association(CmdStatus),
    /// Authentication outcome; `reason` carries the 802.11 reason code on
    /// failure (0 on success)
    Authentication { status: CmdStatus, reason: u16 },
    Pmk(Vec<u8>),
    LinkLoss { reason: u16 },
    Disassociation { reason: u16 },
    Deauthentication { reason: u16 },
    /// Interface bring-up finished (initialization)
    InterfaceConfig(CmdStatus),
    /// Static IPv4 configuration result
    StaAddrConfig(AddrResult),
    /// DHCP lease result
    DhcpConfig(AddrResult),
    /// IPv6 autoconfiguration result
    Ipv6Config(Addr6Result),
    ChanSwitchAnn { channel: u8 },
    ChanSwitch { channel: u8 },
    Sleep,
    Awake,
    IeeePs(PsNotice),
    DeepSleep(PsNotice),
    HsConfig(CmdStatus),
    HsActivated,
    SleepConfirmDone,
    AddBa,
    DelBa,
    BaStreamTimeout,
    StaMacConfig(MacAddr),
    UapMacConfig(MacAddr),
    UapStarted(CmdStatus),
    UapStopped(CmdStatus),
    UapClientAssoc(MacAddr),
    UapClientConn(MacAddr),
    UapClientDeauth(MacAddr),
    UapAddrConfig(AddrResult),
    BgScanStopped,
    BgScanReport(Vec<BssDescriptor>),
    MgmtFrame(Vec<u8>),
    /// 11k/11v neighbor list: channels worth probing for roam candidates
    NeighborListReport(ChannelList),
    RssiLow,
    HwSpec { fw_version: u32 },
}

/// Scan parameters for both user scans and connect scans
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    /// Directed scan for this SSID only
    pub ssid: Option<Ssid>,
    /// Directed scan for this BSSID only
    pub bssid: Option<MacAddr>,
    /// Restrict to these channels; empty = full sweep
    pub channels: ChannelList,
}

impl ScanRequest {
    /// Directed probe on an explicit channel set (hidden-SSID follow-up)
    #[must_use]
    pub fn directed(ssid: Ssid, channels: &[u8]) -> Self {
        Self {
            ssid: Some(ssid),
            bssid: None,
            channels: SmallVec::from_slice(channels),
        }
    }
}

/// Association command parameters, fixed at selection time
#[derive(Debug, Clone)]
pub struct AssocRequest {
    pub bssid: MacAddr,
    pub ssid: Ssid,
    pub channel: u8,
    pub security: SecurityKind,
    pub ciphers: CipherSuite,
    pub mfpc: bool,
    pub mfpr: bool,
    pub owe_trans_ssid: Option<Ssid>,
    /// 802.11r fast transition within the current mobility domain
    pub ft: bool,
}

/// IPv4 configuration request toward the IP stack
#[derive(Debug, Clone, Copy)]
pub enum AddressRequest {
    Static(StaticIp),
    Dhcp,
}

/// Soft-AP start parameters
#[derive(Debug, Clone)]
pub struct UapStartRequest {
    pub ssid: Ssid,
    pub channel: u8,
    /// Channels the AP may pick from when `channel` is 0
    pub allowed_channels: ChannelList,
    pub security: SecurityKind,
    pub psk: String,
    pub password: String,
}

/// Commands the connection manager issues to the lower layers. The driver
/// serializes execution internally; at most one command is outstanding.
#[derive(Debug, Clone)]
pub enum DriverCommand {
    Scan(ScanRequest),
    BgScan(ScanRequest),
    Associate(AssocRequest),
    Deauthenticate,
    /// Ask the IP stack to configure the STA interface
    ConfigureStaAddress(AddressRequest),
    /// Tear down STA addressing (interface down)
    ReleaseStaAddress,
    UapStart(UapStartRequest),
    UapStop,
    /// Configure the uAP interface address
    ConfigureUapAddress(StaticIp),
    /// Enter IEEE power save
    EnterIeeePs,
    ExitIeeePs,
    EnterDeepSleep,
    ExitDeepSleep,
    /// Per-doze handshake before the radio sleeps
    SleepConfirm { role: BssRole },
    /// Program wakeup conditions and the retained IP into the firmware
    HostSleepConfig {
        wake_flags: u32,
        role: BssRole,
        address: Ipv4Addr,
    },
    /// 11k neighbor report request
    NeighborRequest,
}
