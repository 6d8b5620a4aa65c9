//! # Transport Property Model
//!
//! The fixed vocabulary of 16 boolean transport abilities and the
//! `Require`/`Prefer`/`Ignore`/`Avoid`/`Prohibit` preference each one can
//! carry. Mirrors `taps_transport_properties.c` and the `tapsPropertyNames`
//! table in `taps.h`: preferences are stored as four bitmasks rather than a
//! map, so the Property Reducer (`reducer.rs`) can score candidates with
//! plain bitwise ops.

use serde::{Deserialize, Serialize};

/// One of the 16 named transport abilities (`taps.h::tapsPropertyNames`).
///
/// The ordering matches the original table exactly, since catalog
/// descriptors and the bitmask layout both depend on each ability having a
/// stable bit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ability {
    Reliability,
    PreserveMsgBoundaries,
    PerMsgReliability,
    PreserveOrder,
    ZeroRttMsg,
    Multistreaming,
    FullChecksumSend,
    FullChecksumRecv,
    CongestionControl,
    KeepAlive,
    UseTemporaryLocalAddress,
    Multipath,
    AdvertisesAltaddr,
    Direction,
    SoftErrorNotify,
    ActiveReadBeforeSend,
}

/// Every ability, in catalog bit order. Used for iteration and for turning
/// the wire-format name strings in a catalog descriptor into bit positions.
pub const ALL_ABILITIES: [Ability; 16] = [
    Ability::Reliability,
    Ability::PreserveMsgBoundaries,
    Ability::PerMsgReliability,
    Ability::PreserveOrder,
    Ability::ZeroRttMsg,
    Ability::Multistreaming,
    Ability::FullChecksumSend,
    Ability::FullChecksumRecv,
    Ability::CongestionControl,
    Ability::KeepAlive,
    Ability::UseTemporaryLocalAddress,
    Ability::Multipath,
    Ability::AdvertisesAltaddr,
    Ability::Direction,
    Ability::SoftErrorNotify,
    Ability::ActiveReadBeforeSend,
];

impl Ability {
    /// The catalog/YAML name for this ability, matching
    /// `taps.h::tapsPropertyNames[]` verbatim.
    pub fn name(self) -> &'static str {
        match self {
            Ability::Reliability => "reliability",
            Ability::PreserveMsgBoundaries => "preserveMsgBoundaries",
            Ability::PerMsgReliability => "perMsgReliability",
            Ability::PreserveOrder => "preserveOrder",
            Ability::ZeroRttMsg => "zeroRttMsg",
            Ability::Multistreaming => "multistreaming",
            Ability::FullChecksumSend => "FullChecksumSend",
            Ability::FullChecksumRecv => "FullChecksumRecv",
            Ability::CongestionControl => "congestionControl",
            Ability::KeepAlive => "keepAlive",
            Ability::UseTemporaryLocalAddress => "useTemporaryLocalAddress",
            Ability::Multipath => "multipath",
            Ability::AdvertisesAltaddr => "advertises_altaddr",
            Ability::Direction => "direction",
            Ability::SoftErrorNotify => "softErrorNotify",
            Ability::ActiveReadBeforeSend => "activeReadBeforeSend",
        }
    }

    /// Parse a catalog/YAML ability name. Unknown names return `None`; the
    /// caller (the Catalog, §4.1) logs and ignores them rather than failing
    /// the whole descriptor.
    pub fn from_name(name: &str) -> Option<Ability> {
        ALL_ABILITIES.iter().copied().find(|a| a.name() == name)
    }

    /// This ability's single-bit mask in the 16-bit ability space.
    pub fn bit(self) -> u16 {
        1u16 << (ALL_ABILITIES.iter().position(|a| *a == self).unwrap())
    }
}

/// A preference for one ability, per draft-ietf-taps-interface §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preference {
    Require,
    Prefer,
    Ignore,
    Avoid,
    Prohibit,
}

/// Connection type, used to seed `TransportProperties` defaults the way
/// `tapsTransportPropertiesNew(type)` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Listener,
    Initiate,
    Rendezvous,
}

/// Multipath preference, carried alongside (not instead of) the `multipath`
/// ability bit — see Open Question in spec.md §9, resolved in DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipathPreference {
    Disabled,
    Active,
    Passive,
}

/// Directionality preference, carried alongside the `direction` ability bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Bidirectional,
    UnidirectionalSend,
    UnidirectionalReceive,
}

/// A full set of transport property preferences (spec.md §3
/// "TransportProperty set").
///
/// Each ability is a member of exactly one of the four non-`Ignore` masks at
/// any time (enforced by `set`, which always clears all four bits before
/// setting the requested one) — `Ignore` is represented by the ability's bit
/// being absent from every mask, matching `tapsTransportPropertiesSet`'s
/// clear-then-set pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportProperties {
    require: u16,
    prefer: u16,
    avoid: u16,
    prohibit: u16,
    pub multipath: MultipathPreference,
    pub direction: Direction,
    pub advertises_altaddr: bool,
    /// Per-interface preferences, keyed by interface name. Not consulted by
    /// the Property Reducer (§4.2 reduces only against the catalog); kept
    /// for parity with `taps_transport_properties.c`'s `interfaces` list and
    /// for a future path-selection pass (spec.md §9 Open Questions).
    pub interfaces: std::collections::HashMap<String, Preference>,
}

impl TransportProperties {
    /// Build the connection-type defaults from
    /// `tapsTransportPropertiesNew`: reliability, ordering and full checksum
    /// coverage are required by default; multistreaming is preferred.
    pub fn new(conn_type: ConnectionType) -> Self {
        let mut tp = TransportProperties {
            require: 0,
            prefer: 0,
            avoid: 0,
            prohibit: 0,
            multipath: MultipathPreference::Disabled,
            direction: Direction::Bidirectional,
            advertises_altaddr: false,
            interfaces: std::collections::HashMap::new(),
        };
        tp.set(Ability::Reliability, Preference::Require);
        tp.set(Ability::PreserveOrder, Preference::Require);
        tp.set(Ability::Multistreaming, Preference::Prefer);
        tp.set(Ability::FullChecksumSend, Preference::Require);
        tp.set(Ability::FullChecksumRecv, Preference::Require);
        tp.set(Ability::CongestionControl, Preference::Require);
        match conn_type {
            ConnectionType::Listener => {
                tp.set(Ability::UseTemporaryLocalAddress, Preference::Avoid);
                tp.multipath = MultipathPreference::Passive;
                tp.set(Ability::Multipath, Preference::Prefer);
            }
            ConnectionType::Initiate => {
                tp.set(Ability::UseTemporaryLocalAddress, Preference::Prefer);
                tp.multipath = MultipathPreference::Disabled;
            }
            ConnectionType::Rendezvous => {
                tp.set(Ability::UseTemporaryLocalAddress, Preference::Avoid);
                tp.multipath = MultipathPreference::Disabled;
            }
        }
        tp
    }

    /// Set (or clear, via `Ignore`) the preference for a single ability.
    /// Always clears the ability's bit from all four masks first, so the
    /// "member of exactly one bucket" invariant in spec.md §3 holds.
    pub fn set(&mut self, ability: Ability, preference: Preference) {
        let mask = ability.bit();
        self.require &= !mask;
        self.prefer &= !mask;
        self.avoid &= !mask;
        self.prohibit &= !mask;
        match preference {
            Preference::Require => self.require |= mask,
            Preference::Prefer => self.prefer |= mask,
            Preference::Avoid => self.avoid |= mask,
            Preference::Prohibit => self.prohibit |= mask,
            Preference::Ignore => {}
        }
    }

    /// Current preference for a given ability.
    pub fn get(&self, ability: Ability) -> Preference {
        let mask = ability.bit();
        if self.require & mask != 0 {
            Preference::Require
        } else if self.prefer & mask != 0 {
            Preference::Prefer
        } else if self.avoid & mask != 0 {
            Preference::Avoid
        } else if self.prohibit & mask != 0 {
            Preference::Prohibit
        } else {
            Preference::Ignore
        }
    }

    pub fn set_multipath(&mut self, preference: MultipathPreference) {
        self.multipath = preference;
        self.set(
            Ability::Multipath,
            if matches!(preference, MultipathPreference::Disabled) {
                Preference::Ignore
            } else {
                Preference::Prefer
            },
        );
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
        self.set(
            Ability::Direction,
            if matches!(direction, Direction::Bidirectional) {
                Preference::Ignore
            } else {
                Preference::Prefer
            },
        );
    }

    pub fn set_advertises_altaddr(&mut self, preference: bool) {
        self.advertises_altaddr = preference;
        self.set(
            Ability::AdvertisesAltaddr,
            if preference { Preference::Prefer } else { Preference::Ignore },
        );
    }

    pub fn require_mask(&self) -> u16 {
        self.require
    }

    pub fn prefer_mask(&self) -> u16 {
        self.prefer
    }

    pub fn avoid_mask(&self) -> u16 {
        self.avoid
    }

    pub fn prohibit_mask(&self) -> u16 {
        self.prohibit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ability_is_member_of_exactly_one_bucket() {
        let mut tp = TransportProperties::new(ConnectionType::Initiate);
        tp.set(Ability::KeepAlive, Preference::Avoid);
        assert_eq!(tp.get(Ability::KeepAlive), Preference::Avoid);
        tp.set(Ability::KeepAlive, Preference::Require);
        assert_eq!(tp.get(Ability::KeepAlive), Preference::Require);
        assert_eq!(tp.avoid_mask() & Ability::KeepAlive.bit(), 0);
    }

    #[test]
    fn listener_defaults_match_original() {
        let tp = TransportProperties::new(ConnectionType::Listener);
        assert_eq!(tp.get(Ability::Reliability), Preference::Require);
        assert_eq!(tp.get(Ability::PreserveOrder), Preference::Require);
        assert_eq!(tp.get(Ability::UseTemporaryLocalAddress), Preference::Avoid);
        assert_eq!(tp.multipath, MultipathPreference::Passive);
    }

    #[test]
    fn initiate_defaults_prefer_temporary_address() {
        let tp = TransportProperties::new(ConnectionType::Initiate);
        assert_eq!(tp.get(Ability::UseTemporaryLocalAddress), Preference::Prefer);
        assert_eq!(tp.multipath, MultipathPreference::Disabled);
    }

    #[test]
    fn ability_name_round_trip() {
        for ability in ALL_ABILITIES {
            assert_eq!(Ability::from_name(ability.name()), Some(ability));
        }
        assert_eq!(Ability::from_name("not-a-real-ability"), None);
    }
}
