//! Network profile records and their validation rules.
//!
//! A profile is the named, RAM-persistent description of one STA or uAP
//! network: identity (SSID/BSSID/channel), security descriptor, and IP
//! configuration. Fields the caller left unset are recorded as non-specific
//! so the connection pipeline may fill them in from scan results and scrub
//! them again on copy-out.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::net::Ipv4Addr;

use crate::error::WifiError;

/// Maximum SSID length in octets (IEEE 802.11)
pub const SSID_MAX_LEN: usize = 32;

/// Maximum profile name length in characters
pub const NAME_MAX_LEN: usize = 32;

/// SSID octets, inline up to the 802.11 maximum
pub type Ssid = SmallVec<[u8; SSID_MAX_LEN]>;

/// 6-byte MAC address
pub type MacAddr = [u8; 6];

/// All-zero MAC, used as "unspecified"
pub const MAC_UNSPECIFIED: MacAddr = [0; 6];

/// Format a MAC address for log output
#[must_use]
pub fn format_mac(mac: &MacAddr) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

/// Interface role a profile describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Station (client of an AP)
    Sta,
    /// Soft-AP
    Uap,
}

/// Security mode of a profile.
///
/// `Wildcard` defers the choice to scan time: the strongest mode the BSS
/// advertises is written back into the profile on match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityKind {
    #[default]
    Wildcard,
    None,
    WepOpen,
    WepShared,
    Wpa,
    Wpa2,
    Wpa2Sha256,
    WpaWpa2Mixed,
    Wpa3Sae,
    Wpa2Wpa3Mixed,
    Owe,
}

impl SecurityKind {
    /// Modes where management frame protection is mandatory per the standard
    #[must_use]
    pub const fn pmf_mandatory(self) -> bool {
        matches!(self, Self::Wpa3Sae | Self::Owe | Self::Wpa2Sha256)
    }

    /// Modes that authenticate with a WPA/WPA2 pre-shared key
    #[must_use]
    pub const fn uses_psk(self) -> bool {
        matches!(
            self,
            Self::Wpa | Self::Wpa2 | Self::Wpa2Sha256 | Self::WpaWpa2Mixed
        )
    }

    /// Modes that authenticate with an SAE password
    #[must_use]
    pub const fn uses_sae_password(self) -> bool {
        matches!(self, Self::Wpa3Sae | Self::Wpa2Wpa3Mixed)
    }

    /// Modes that use a static WEP key
    #[must_use]
    pub const fn uses_wep_key(self) -> bool {
        matches!(self, Self::WepOpen | Self::WepShared)
    }
}

/// Pairwise/group cipher selection for WPA-family modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherSuite {
    pub ccmp: bool,
    pub tkip: bool,
}

impl Default for CipherSuite {
    fn default() -> Self {
        Self {
            ccmp: true,
            tkip: false,
        }
    }
}

/// Security descriptor of a profile
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub kind: SecurityKind,
    /// WPA/WPA2 passphrase (8..=63 ASCII) or PMK as 64 hex digits
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub psk: String,
    /// SAE password (8..=255 chars)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    /// Static WEP key (5/13 ASCII or 10/26 hex digits)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub wep_key: String,
    /// Pre-computed pairwise master key, if the caller has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmk: Option<[u8; 32]>,
    #[serde(default)]
    pub pmf_capable: bool,
    #[serde(default)]
    pub pmf_required: bool,
    #[serde(default)]
    pub ciphers: CipherSuite,
}

/// PSK bounds: 8..=63 ASCII passphrase, or exactly 64 hex digits
const PSK_MIN_LEN: usize = 8;
const PSK_MAX_LEN: usize = 63;
const PSK_HEX_LEN: usize = 64;

/// SAE password bounds
const SAE_MIN_LEN: usize = 8;
const SAE_MAX_LEN: usize = 255;

impl SecurityConfig {
    /// Check the length/format invariants for the configured mode.
    pub fn validate(&self) -> Result<(), WifiError> {
        if self.kind.uses_psk() {
            let len = self.psk.len();
            if len == PSK_HEX_LEN {
                if hex::decode(&self.psk).is_err() {
                    return Err(WifiError::Invalid("64-character PSK must be hexadecimal"));
                }
            } else if !(PSK_MIN_LEN..=PSK_MAX_LEN).contains(&len) {
                return Err(WifiError::Invalid("PSK length out of range"));
            } else if !self.psk.is_ascii() {
                return Err(WifiError::Invalid("PSK must be ASCII"));
            }
        }
        if self.kind.uses_sae_password() {
            let len = self.password.len();
            if !(SAE_MIN_LEN..=SAE_MAX_LEN).contains(&len) {
                return Err(WifiError::Invalid("password length out of range"));
            }
        }
        // OWE carries no credential, but if a password is supplied anyway it
        // must still fit the SAE bounds.
        if self.kind == SecurityKind::Owe && !self.password.is_empty() {
            let len = self.password.len();
            if !(SAE_MIN_LEN..=SAE_MAX_LEN).contains(&len) {
                return Err(WifiError::Invalid("password length out of range"));
            }
        }
        if self.kind.uses_wep_key() {
            match self.wep_key.len() {
                5 | 13 => {}
                10 | 26 => {
                    if hex::decode(&self.wep_key).is_err() {
                        return Err(WifiError::Invalid("WEP key must be hexadecimal"));
                    }
                }
                _ => return Err(WifiError::Invalid("WEP key length")),
            }
        }
        if self.kind.pmf_mandatory() && !self.pmf_capable {
            return Err(WifiError::Invalid("mode requires PMF capable"));
        }
        if matches!(self.kind, SecurityKind::Wpa3Sae | SecurityKind::Owe) && !self.pmf_required {
            return Err(WifiError::Invalid("mode requires PMF required"));
        }
        Ok(())
    }

    /// Whether the profile carries any credential at all
    #[must_use]
    pub fn has_credential(&self) -> bool {
        !self.psk.is_empty()
            || !self.password.is_empty()
            || !self.wep_key.is_empty()
            || self.pmk.is_some()
    }
}

/// Static IPv4 assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticIp {
    pub address: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
    #[serde(default = "unspecified_addr")]
    pub dns1: Ipv4Addr,
    #[serde(default = "unspecified_addr")]
    pub dns2: Ipv4Addr,
}

const fn unspecified_addr() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

/// IPv4 configuration of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum IpConfig {
    #[default]
    Dhcp,
    Static(StaticIp),
}

/// Per-field flags recording whether the caller pinned the field at add-time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Specificity {
    pub ssid: bool,
    pub bssid: bool,
    pub channel: bool,
}

/// Parameters learned from the matched BSS rather than supplied by the
/// caller. Scrubbed on copy-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LearnedParams {
    /// The chosen BSS advertised PMF-required
    pub pmf_required: bool,
    pub dot11n: bool,
    pub dot11ac: bool,
    pub dot11ax: bool,
    /// 802.11r mobility domain, when the BSS is FT-capable
    pub mobility_domain: Option<u16>,
    pub beacon_period: u16,
    pub dtim_period: u8,
    pub dot11k: bool,
    pub dot11v: bool,
    /// SSID of the open side of an OWE transition pair
    pub owe_trans_ssid: Option<Ssid>,
}

/// One named network description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub ssid: Ssid,
    #[serde(default = "mac_unspecified")]
    pub bssid: MacAddr,
    /// 0 = any
    #[serde(default)]
    pub channel: u8,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub ip: IpConfig,
    #[serde(default)]
    pub specificity: Specificity,
    #[serde(skip)]
    pub learned: LearnedParams,
}

const fn mac_unspecified() -> MacAddr {
    MAC_UNSPECIFIED
}

impl NetworkProfile {
    /// Build a profile for the given role with everything else unset.
    #[must_use]
    pub fn new(name: &str, role: Role) -> Self {
        Self {
            name: name.to_string(),
            role,
            ssid: Ssid::new(),
            bssid: MAC_UNSPECIFIED,
            channel: 0,
            security: SecurityConfig::default(),
            ip: IpConfig::default(),
            specificity: Specificity::default(),
            learned: LearnedParams::default(),
        }
    }

    /// Compute the specificity bits from which identity fields are set.
    /// Called once when the profile enters the store.
    pub fn seal_specificity(&mut self) {
        self.specificity = Specificity {
            ssid: !self.ssid.is_empty(),
            bssid: self.bssid != MAC_UNSPECIFIED,
            channel: self.channel != 0,
        };
    }

    /// Validate everything the store requires before accepting the profile.
    pub fn validate(&self) -> Result<(), WifiError> {
        if self.name.is_empty() || self.name.len() > NAME_MAX_LEN {
            return Err(WifiError::Invalid("profile name length"));
        }
        if !self.name.chars().all(|c| c.is_ascii_graphic()) {
            return Err(WifiError::Invalid("profile name must be printable"));
        }
        if self.ssid.len() > SSID_MAX_LEN {
            return Err(WifiError::Invalid("SSID too long"));
        }
        if self.ssid.is_empty() && self.bssid == MAC_UNSPECIFIED {
            return Err(WifiError::Invalid("SSID or BSSID required"));
        }
        self.security.validate()?;
        if self.role == Role::Uap {
            match self.ip {
                IpConfig::Static(ip) => {
                    if ip.gateway != ip.address {
                        return Err(WifiError::Invalid("uAP gateway must equal its address"));
                    }
                }
                IpConfig::Dhcp => {
                    return Err(WifiError::Invalid("uAP requires a static address"));
                }
            }
        }
        Ok(())
    }

    /// Drop everything that was learned at scan/association time, restoring
    /// the record to what the caller supplied. Used by copy-out so callers
    /// never see discovered parameters as if they had configured them.
    pub fn scrub_learned(&mut self) {
        if !self.specificity.ssid {
            self.ssid.clear();
        }
        if !self.specificity.bssid {
            self.bssid = MAC_UNSPECIFIED;
        }
        if !self.specificity.channel {
            self.channel = 0;
        }
        self.learned = LearnedParams::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sta_profile(psk: &str) -> NetworkProfile {
        let mut p = NetworkProfile::new("home", Role::Sta);
        p.ssid = Ssid::from_slice(b"Home");
        p.security.kind = SecurityKind::Wpa2;
        p.security.psk = psk.to_string();
        p.seal_specificity();
        p
    }

    #[test]
    fn test_psk_length_bounds() {
        assert!(sta_profile("abcdefgh").validate().is_ok());
        assert!(sta_profile(&"x".repeat(63)).validate().is_ok());
        assert!(matches!(
            sta_profile("abcdefg").validate(),
            Err(WifiError::Invalid(_))
        ));
        // 64 characters must be hex
        assert!(sta_profile(&"a1".repeat(32)).validate().is_ok());
        assert!(matches!(
            sta_profile(&"zz".repeat(32)).validate(),
            Err(WifiError::Invalid(_))
        ));
    }

    #[test]
    fn test_sae_password_bounds() {
        let mut p = NetworkProfile::new("sae", Role::Sta);
        p.ssid = Ssid::from_slice(b"Sae");
        p.security.kind = SecurityKind::Wpa3Sae;
        p.security.pmf_capable = true;
        p.security.pmf_required = true;
        p.seal_specificity();

        p.security.password = "x".repeat(8);
        assert!(p.validate().is_ok());
        p.security.password = "x".repeat(255);
        assert!(p.validate().is_ok());
        p.security.password = "x".repeat(7);
        assert!(p.validate().is_err());
        p.security.password = "x".repeat(256);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_pmf_flags_mandatory_for_sae_and_owe() {
        let mut p = NetworkProfile::new("sae", Role::Sta);
        p.ssid = Ssid::from_slice(b"Sae");
        p.security.kind = SecurityKind::Wpa3Sae;
        p.security.password = "password".to_string();
        p.seal_specificity();
        assert!(p.validate().is_err());

        p.security.pmf_capable = true;
        assert!(p.validate().is_err());
        p.security.pmf_required = true;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_identity_required() {
        let mut p = NetworkProfile::new("anon", Role::Sta);
        p.security.kind = SecurityKind::None;
        assert!(p.validate().is_err());
        p.bssid = [2, 0, 0, 0, 0, 1];
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_uap_gateway_must_equal_address() {
        let mut p = NetworkProfile::new("ap", Role::Uap);
        p.ssid = Ssid::from_slice(b"my-ap");
        p.security.kind = SecurityKind::Wpa2;
        p.security.psk = "xxxxxxxx".to_string();
        p.ip = IpConfig::Static(StaticIp {
            address: Ipv4Addr::new(192, 168, 10, 1),
            gateway: Ipv4Addr::new(192, 168, 10, 254),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            dns1: Ipv4Addr::UNSPECIFIED,
            dns2: Ipv4Addr::UNSPECIFIED,
        });
        p.seal_specificity();
        assert!(p.validate().is_err());

        if let IpConfig::Static(ref mut ip) = p.ip {
            ip.gateway = ip.address;
        }
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_specificity_from_inputs() {
        let mut p = NetworkProfile::new("n", Role::Sta);
        p.ssid = Ssid::from_slice(b"Net");
        p.channel = 6;
        p.seal_specificity();
        assert!(p.specificity.ssid);
        assert!(!p.specificity.bssid);
        assert!(p.specificity.channel);
    }

    #[test]
    fn test_scrub_resets_learned_fields() {
        let mut p = sta_profile("abcdefgh");
        // simulate a scan match filling in the rest
        p.bssid = [0xaa; 6];
        p.channel = 11;
        p.learned.dot11n = true;
        p.learned.dtim_period = 2;

        p.scrub_learned();
        assert_eq!(p.bssid, MAC_UNSPECIFIED);
        assert_eq!(p.channel, 0);
        assert_eq!(p.learned, LearnedParams::default());
        // caller-pinned SSID survives
        assert_eq!(p.ssid.as_slice(), b"Home");
    }

    #[test]
    fn test_profile_json_round_trip() {
        let p = sta_profile("abcdefgh");
        let json = serde_json::to_string(&p).unwrap();
        let back: NetworkProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
