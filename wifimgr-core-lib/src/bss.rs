//! Scan-result descriptors and the match/select pipeline.
//!
//! `select_bss` is the pure half of the connect pipeline: given the scan
//! report and the profile being connected, it applies the match predicate to
//! every descriptor, collects hidden-SSID candidate channels, and picks the
//! strongest matching BSS by RSSI. The dispatcher applies the outcome.

use enumset::{EnumSet, EnumSetType};
use smallvec::SmallVec;

use crate::profile::{MacAddr, NetworkProfile, SecurityConfig, SecurityKind, Ssid};

/// Channel numbers, inline up to a full 2.4 GHz + DFS-free 5 GHz sweep
pub type ChannelList = SmallVec<[u8; 16]>;

/// Security suites a BSS advertises in its beacon/probe response
#[derive(EnumSetType, Debug)]
pub enum BssSecurity {
    Wep,
    Wpa,
    Wpa2,
    Wpa2Sha256,
    Wpa3Sae,
    Owe,
}

/// Capability bits relevant to selection and parameter update
#[derive(EnumSetType, Debug)]
pub enum BssCapability {
    Ht,
    Vht,
    He,
    MfpCapable,
    MfpRequired,
    FastTransition,
    Dot11k,
    Dot11v,
    Mbo,
}

/// One scanned basic service set
#[derive(Debug, Clone, Default)]
pub struct BssDescriptor {
    pub bssid: MacAddr,
    pub ssid: Ssid,
    pub channel: u8,
    /// Signal strength in dBm (numerically greater = stronger)
    pub rssi: i16,
    pub security: EnumSet<BssSecurity>,
    /// WPA with TKIP as the only pairwise cipher
    pub tkip_only: bool,
    pub capabilities: EnumSet<BssCapability>,
    pub mobility_domain: Option<u16>,
    pub beacon_period: u16,
    pub dtim_period: u8,
    /// SSID of the open side of an OWE transition pair, when advertised
    pub owe_trans_ssid: Option<Ssid>,
}

impl BssDescriptor {
    /// Minimal descriptor for an open BSS; tests and mocks fill in the rest.
    #[must_use]
    pub fn open(ssid: &[u8], bssid: MacAddr, channel: u8, rssi: i16) -> Self {
        Self {
            bssid,
            ssid: Ssid::from_slice(ssid),
            channel,
            rssi,
            beacon_period: 100,
            dtim_period: 1,
            ..Self::default()
        }
    }
}

/// Optional 11v / MBO selection filters
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchFilters {
    pub require_dot11v: bool,
    pub require_mbo: bool,
}

/// Result of applying the match predicate to one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVerdict {
    Match,
    /// BSS broadcasts an empty SSID on a channel worth a directed probe
    HiddenCandidate,
    Mismatch,
}

/// Security compatibility table: can this profile associate to that BSS?
#[must_use]
pub fn security_compatible(sec: &SecurityConfig, desc: &BssDescriptor) -> bool {
    use BssSecurity as B;
    match sec.kind {
        SecurityKind::None => desc.security.is_empty(),
        // 802.11n forbids WEP pairwise ciphers
        SecurityKind::WepOpen | SecurityKind::WepShared => {
            desc.security.contains(B::Wep) && !desc.capabilities.contains(BssCapability::Ht)
        }
        // TKIP-only networks must be joined in mixed mode
        SecurityKind::Wpa => desc.security.contains(B::Wpa) && !desc.tkip_only,
        SecurityKind::Wpa2 => {
            desc.security.contains(B::Wpa2) || desc.security.contains(B::Wpa2Sha256)
        }
        SecurityKind::Wpa2Sha256 => desc.security.contains(B::Wpa2Sha256),
        SecurityKind::WpaWpa2Mixed => {
            desc.security.contains(B::Wpa) || desc.security.contains(B::Wpa2)
        }
        SecurityKind::Wpa3Sae => {
            desc.security.contains(B::Wpa3Sae) && sec.pmf_capable && sec.pmf_required
        }
        SecurityKind::Wpa2Wpa3Mixed => {
            (desc.security.contains(B::Wpa3Sae) || desc.security.contains(B::Wpa2))
                && sec.pmf_capable
                && sec.pmf_required
        }
        SecurityKind::Owe => desc.security.contains(B::Owe),
        SecurityKind::Wildcard => true,
    }
}

/// Apply the full match predicate for one descriptor.
#[must_use]
pub fn profile_matches(
    profile: &NetworkProfile,
    desc: &BssDescriptor,
    allowed_channels: &[u8],
    filters: MatchFilters,
) -> MatchVerdict {
    if profile.specificity.channel && desc.channel != profile.channel {
        return MatchVerdict::Mismatch;
    }
    if profile.specificity.bssid && desc.bssid != profile.bssid {
        return MatchVerdict::Mismatch;
    }
    if profile.specificity.ssid {
        if desc.ssid.is_empty() {
            // Hidden network; remember the channel for a directed probe
            return MatchVerdict::HiddenCandidate;
        }
        if desc.ssid.as_slice() != profile.ssid.as_slice() {
            return MatchVerdict::Mismatch;
        }
    }
    if !security_compatible(&profile.security, desc) {
        return MatchVerdict::Mismatch;
    }
    // A secured profile never joins an open BSS, wildcard or not
    if profile.security.has_credential() && desc.security.is_empty() {
        return MatchVerdict::Mismatch;
    }
    // Regulatory: empty list means no 11d restriction was learned yet
    if !allowed_channels.is_empty() && !allowed_channels.contains(&desc.channel) {
        return MatchVerdict::Mismatch;
    }
    if filters.require_dot11v && !desc.capabilities.contains(BssCapability::Dot11v) {
        return MatchVerdict::Mismatch;
    }
    if filters.require_mbo && !desc.capabilities.contains(BssCapability::Mbo) {
        return MatchVerdict::Mismatch;
    }
    MatchVerdict::Match
}

/// Outcome of one selection pass over a scan report
#[derive(Debug, Clone, Default)]
pub struct SelectionOutcome {
    /// Index of the strongest matching descriptor, if any matched
    pub best: Option<usize>,
    /// Channels of hidden-SSID BSSes collected during the pass
    pub hidden_channels: ChannelList,
}

/// Match every descriptor and pick the strongest by RSSI.
#[must_use]
pub fn select_bss(
    profile: &NetworkProfile,
    descriptors: &[BssDescriptor],
    allowed_channels: &[u8],
    filters: MatchFilters,
) -> SelectionOutcome {
    let mut outcome = SelectionOutcome::default();
    for (i, desc) in descriptors.iter().enumerate() {
        match profile_matches(profile, desc, allowed_channels, filters) {
            MatchVerdict::Match => {
                let better = match outcome.best {
                    Some(b) => desc.rssi > descriptors[b].rssi,
                    None => true,
                };
                if better {
                    outcome.best = Some(i);
                }
            }
            MatchVerdict::HiddenCandidate => {
                if !outcome.hidden_channels.contains(&desc.channel) {
                    outcome.hidden_channels.push(desc.channel);
                }
            }
            MatchVerdict::Mismatch => {}
        }
    }
    outcome
}

/// Strongest concrete mode the BSS advertises, for wildcard profiles.
#[must_use]
pub fn strongest_security(desc: &BssDescriptor) -> SecurityKind {
    use BssSecurity as B;
    if desc.security.contains(B::Wpa3Sae) && desc.security.contains(B::Wpa2) {
        SecurityKind::Wpa2Wpa3Mixed
    } else if desc.security.contains(B::Wpa3Sae) {
        SecurityKind::Wpa3Sae
    } else if desc.security.contains(B::Wpa2) || desc.security.contains(B::Wpa2Sha256) {
        SecurityKind::Wpa2
    } else if desc.security.contains(B::Wpa) {
        SecurityKind::WpaWpa2Mixed
    } else if desc.security.contains(B::Wep) {
        SecurityKind::WepOpen
    } else {
        SecurityKind::None
    }
}

/// Copy discovered parameters from the chosen BSS into the profile.
///
/// Fields the caller pinned are left alone; everything else (channel, BSSID,
/// SSID, capabilities, security for wildcard profiles) is recorded so the
/// association command and later reconnects use concrete values.
pub fn apply_bss_params(profile: &mut NetworkProfile, desc: &BssDescriptor) {
    if !profile.specificity.channel {
        profile.channel = desc.channel;
    }
    if !profile.specificity.bssid {
        profile.bssid = desc.bssid;
    }
    if !profile.specificity.ssid && !desc.ssid.is_empty() {
        profile.ssid = desc.ssid.clone();
    }
    if profile.security.kind == SecurityKind::Wildcard {
        profile.security.kind = strongest_security(desc);
    }
    let caps = desc.capabilities;
    profile.learned = crate::profile::LearnedParams {
        pmf_required: caps.contains(BssCapability::MfpRequired),
        dot11n: caps.contains(BssCapability::Ht),
        dot11ac: caps.contains(BssCapability::Vht),
        dot11ax: caps.contains(BssCapability::He),
        mobility_domain: desc.mobility_domain,
        beacon_period: desc.beacon_period,
        dtim_period: desc.dtim_period,
        dot11k: caps.contains(BssCapability::Dot11k),
        dot11v: caps.contains(BssCapability::Dot11v),
        owe_trans_ssid: desc.owe_trans_ssid.clone(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Role;

    fn wpa2_desc(ssid: &[u8], channel: u8, rssi: i16) -> BssDescriptor {
        let mut d = BssDescriptor::open(ssid, [0x02, 0, 0, 0, 0, channel], channel, rssi);
        d.security = BssSecurity::Wpa2.into();
        d
    }

    fn wpa2_profile(ssid: &[u8]) -> NetworkProfile {
        let mut p = NetworkProfile::new("net", Role::Sta);
        p.ssid = Ssid::from_slice(ssid);
        p.security.kind = SecurityKind::Wpa2;
        p.security.psk = "abcdefgh".to_string();
        p.seal_specificity();
        p
    }

    #[test]
    fn test_security_table() {
        let mut open = BssDescriptor::open(b"x", [1; 6], 1, -40);
        let mut sec = SecurityConfig::default();

        sec.kind = SecurityKind::None;
        assert!(security_compatible(&sec, &open));
        open.security = BssSecurity::Wpa2.into();
        assert!(!security_compatible(&sec, &open));

        sec.kind = SecurityKind::Wpa2;
        assert!(security_compatible(&sec, &open));
        open.security = BssSecurity::Wpa2Sha256.into();
        assert!(security_compatible(&sec, &open));

        // WPA rejects TKIP-only networks
        sec.kind = SecurityKind::Wpa;
        open.security = BssSecurity::Wpa.into();
        assert!(security_compatible(&sec, &open));
        open.tkip_only = true;
        assert!(!security_compatible(&sec, &open));

        // WEP is refused on 11n-capable networks
        sec.kind = SecurityKind::WepOpen;
        sec.wep_key = "abcde".to_string();
        open.security = BssSecurity::Wep.into();
        open.tkip_only = false;
        assert!(security_compatible(&sec, &open));
        open.capabilities |= BssCapability::Ht;
        assert!(!security_compatible(&sec, &open));
    }

    #[test]
    fn test_sae_requires_pmf_flags() {
        let mut desc = BssDescriptor::open(b"x", [1; 6], 1, -40);
        desc.security = BssSecurity::Wpa3Sae.into();

        let mut sec = SecurityConfig {
            kind: SecurityKind::Wpa3Sae,
            password: "password".to_string(),
            ..SecurityConfig::default()
        };
        assert!(!security_compatible(&sec, &desc));
        sec.pmf_capable = true;
        sec.pmf_required = true;
        assert!(security_compatible(&sec, &desc));

        // mixed accepts a WPA2-only BSS, still gated on PMF flags
        sec.kind = SecurityKind::Wpa2Wpa3Mixed;
        desc.security = BssSecurity::Wpa2.into();
        assert!(security_compatible(&sec, &desc));
        sec.pmf_required = false;
        assert!(!security_compatible(&sec, &desc));
    }

    #[test]
    fn test_select_picks_highest_rssi() {
        let profile = wpa2_profile(b"Home");
        let descs = vec![
            wpa2_desc(b"Home", 1, -70),
            wpa2_desc(b"Home", 6, -55),
            wpa2_desc(b"Other", 6, -30),
            wpa2_desc(b"Home", 11, -62),
        ];
        let out = select_bss(&profile, &descs, &[], MatchFilters::default());
        assert_eq!(out.best, Some(1));
        assert!(out.hidden_channels.is_empty());
    }

    #[test]
    fn test_hidden_channels_collected_on_no_match() {
        let profile = wpa2_profile(b"Hidden");
        let descs = vec![
            wpa2_desc(b"", 3, -50),
            wpa2_desc(b"Visible", 6, -40),
            wpa2_desc(b"", 3, -60),
            wpa2_desc(b"", 9, -45),
        ];
        let out = select_bss(&profile, &descs, &[], MatchFilters::default());
        assert_eq!(out.best, None);
        assert_eq!(out.hidden_channels.as_slice(), &[3, 9]);
    }

    #[test]
    fn test_secured_profile_rejects_open_bss() {
        let mut profile = wpa2_profile(b"Home");
        profile.security.kind = SecurityKind::Wildcard;
        let open = BssDescriptor::open(b"Home", [1; 6], 6, -40);
        assert_eq!(
            profile_matches(&profile, &open, &[], MatchFilters::default()),
            MatchVerdict::Mismatch
        );
    }

    #[test]
    fn test_regulatory_channel_filter() {
        let profile = wpa2_profile(b"Home");
        let desc = wpa2_desc(b"Home", 13, -40);
        assert_eq!(
            profile_matches(&profile, &desc, &[1, 6, 11], MatchFilters::default()),
            MatchVerdict::Mismatch
        );
        assert_eq!(
            profile_matches(&profile, &desc, &[], MatchFilters::default()),
            MatchVerdict::Match
        );
    }

    #[test]
    fn test_bssid_and_channel_pinning() {
        let mut profile = wpa2_profile(b"Home");
        profile.bssid = [0x02, 0, 0, 0, 0, 6];
        profile.channel = 6;
        profile.seal_specificity();

        assert_eq!(
            profile_matches(&profile, &wpa2_desc(b"Home", 6, -40), &[], MatchFilters::default()),
            MatchVerdict::Match
        );
        assert_eq!(
            profile_matches(&profile, &wpa2_desc(b"Home", 11, -40), &[], MatchFilters::default()),
            MatchVerdict::Mismatch
        );
    }

    #[test]
    fn test_wildcard_resolves_strongest() {
        let mut desc = wpa2_desc(b"Home", 6, -40);
        desc.security |= BssSecurity::Wpa3Sae;
        assert_eq!(strongest_security(&desc), SecurityKind::Wpa2Wpa3Mixed);

        desc.security = BssSecurity::Wpa.into();
        assert_eq!(strongest_security(&desc), SecurityKind::WpaWpa2Mixed);

        desc.security = EnumSet::empty();
        assert_eq!(strongest_security(&desc), SecurityKind::None);
    }

    #[test]
    fn test_apply_params_fills_unpinned_fields() {
        let mut profile = wpa2_profile(b"Home");
        let mut desc = wpa2_desc(b"Home", 6, -40);
        desc.capabilities |= BssCapability::Ht;
        desc.capabilities |= BssCapability::MfpRequired;
        desc.mobility_domain = Some(0x1234);
        desc.dtim_period = 2;

        apply_bss_params(&mut profile, &desc);
        assert_eq!(profile.channel, 6);
        assert_eq!(profile.bssid, desc.bssid);
        assert!(profile.learned.dot11n);
        assert!(profile.learned.pmf_required);
        assert_eq!(profile.learned.mobility_domain, Some(0x1234));
        assert_eq!(profile.learned.dtim_period, 2);
    }
}
