//! # Property Reducer
//!
//! Reduces a `TransportProperties` preference set against a `Catalog` into a
//! ranked `CandidateList` (spec.md §4.2). Grounded on the scoring formula in
//! `taps_preconnection.c` (`numberOfSetBits`-based `score`) and the
//! require/prohibit filter duplicated in both `taps_preconnection.c` and
//! `tapsPreconnectionNew`.

use crate::catalog::{Catalog, ProtocolDescriptor};
use crate::error::{TapsError, TapsResult};
use crate::properties::TransportProperties;

/// The result of reduction: protocol descriptors that satisfy every
/// `Require`/`Prohibit` constraint, ordered by descending score
/// (spec.md §3 "CandidateList").
#[derive(Debug, Clone)]
pub struct CandidateList {
    candidates: Vec<ProtocolDescriptor>,
}

impl CandidateList {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// The top-ranked candidate, if any survived reduction. `listen`/
    /// `initiate` both only ever try this one (spec.md §4.7 "Candidate
    /// fallback is a non-goal").
    pub fn top(&self) -> Option<&ProtocolDescriptor> {
        self.candidates.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProtocolDescriptor> {
        self.candidates.iter()
    }
}

fn score(descriptor: &ProtocolDescriptor, properties: &TransportProperties) -> i32 {
    let preferred = (descriptor.supported & properties.prefer_mask()).count_ones() as i32;
    let avoided = (descriptor.supported & properties.avoid_mask()).count_ones() as i32;
    100 * preferred - avoided
}

/// Reduce `properties` against every descriptor `catalog` currently
/// provides, producing a `CandidateList` sorted by descending score with
/// ties broken by catalog order (a stable sort preserves that automatically).
///
/// # Arguments
///
/// * `properties` - the caller's preference set; supplies the
///   Require/Prohibit/Prefer/Avoid masks reduction filters and scores by.
/// * `catalog` - read at the time of the call via `Catalog::update`; not
///   retained.
///
/// # Returns
///
/// A `CandidateList` ranked best-first, or `NoViableProtocol` if no
/// descriptor survives the Require/Prohibit filter (spec.md §4.2).
pub fn reduce(properties: &TransportProperties, catalog: &dyn Catalog) -> TapsResult<CandidateList> {
    let mut descriptors = Vec::new();
    catalog.update(&mut descriptors, usize::MAX)?;
    reduce_over(properties, descriptors)
}

/// As `reduce`, but over an already-materialized descriptor list. Split out
/// so `Preconnection::new` can reduce once against a list it also wants to
/// keep around, and so tests can reduce over fixtures directly.
pub fn reduce_over(
    properties: &TransportProperties,
    descriptors: Vec<ProtocolDescriptor>,
) -> TapsResult<CandidateList> {
    let require = properties.require_mask();
    let prohibit = properties.prohibit_mask();

    let mut survivors: Vec<ProtocolDescriptor> = descriptors
        .into_iter()
        .filter(|d| d.supported & prohibit == 0 && (d.supported & require) == require)
        .collect();

    survivors.sort_by(|a, b| score(b, properties).cmp(&score(a, properties)));

    if survivors.is_empty() {
        return Err(TapsError::NoViableProtocol);
    }
    Ok(CandidateList { candidates: survivors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::properties::{Ability, ConnectionType, Preference};

    fn descriptor(name: &str, abilities: &[Ability]) -> ProtocolDescriptor {
        let mut supported = 0u16;
        for a in abilities {
            supported |= a.bit();
        }
        ProtocolDescriptor {
            name: name.to_string(),
            wire_protocol: name.to_string(),
            module_path: format!("{name}.so"),
            supported,
        }
    }

    #[test]
    fn empty_catalog_yields_no_viable_protocol() {
        let props = TransportProperties::new(ConnectionType::Initiate);
        let catalog = StaticCatalog::new(vec![]);
        let err = reduce(&props, &catalog).unwrap_err();
        assert_eq!(err, TapsError::NoViableProtocol);
    }

    #[test]
    fn require_rejects_all_when_unsupported() {
        let mut props = TransportProperties::new(ConnectionType::Initiate);
        props.set(Ability::Multipath, Preference::Require);
        let catalog = StaticCatalog::new(vec![descriptor("tcp", &[Ability::Reliability])]);
        let err = reduce(&props, &catalog).unwrap_err();
        assert_eq!(err, TapsError::NoViableProtocol);
    }

    #[test]
    fn prohibit_excludes_descriptor() {
        let mut props = TransportProperties::new(ConnectionType::Initiate);
        props.set(Ability::Reliability, Preference::Ignore);
        props.set(Ability::PreserveOrder, Preference::Ignore);
        props.set(Ability::FullChecksumSend, Preference::Ignore);
        props.set(Ability::FullChecksumRecv, Preference::Ignore);
        props.set(Ability::CongestionControl, Preference::Ignore);
        props.set(Ability::KeepAlive, Preference::Prohibit);
        let catalog = StaticCatalog::new(vec![
            descriptor("tcp", &[Ability::Reliability, Ability::KeepAlive]),
            descriptor("udp", &[Ability::PreserveMsgBoundaries]),
        ]);
        let list = reduce(&props, &catalog).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.top().unwrap().name, "udp");
    }

    #[test]
    fn candidates_sorted_by_descending_score() {
        let mut props = TransportProperties::new(ConnectionType::Initiate);
        for a in [
            Ability::Reliability,
            Ability::PreserveOrder,
            Ability::FullChecksumSend,
            Ability::FullChecksumRecv,
            Ability::CongestionControl,
            Ability::Multistreaming,
        ] {
            props.set(a, Preference::Ignore);
        }
        props.set(Ability::KeepAlive, Preference::Prefer);
        props.set(Ability::Multistreaming, Preference::Prefer);
        props.set(Ability::ZeroRttMsg, Preference::Avoid);

        let catalog = StaticCatalog::new(vec![
            descriptor("low", &[Ability::ZeroRttMsg]),
            descriptor("high", &[Ability::KeepAlive, Ability::Multistreaming]),
            descriptor("mid", &[Ability::KeepAlive]),
        ]);
        let list = reduce(&props, &catalog).unwrap();
        let names: Vec<&str> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["high", "mid", "low"]);
    }

    #[test]
    fn ties_keep_stable_catalog_order() {
        let props = TransportProperties::new(ConnectionType::Rendezvous);
        let catalog = StaticCatalog::new(vec![
            descriptor("first", &[Ability::Reliability, Ability::PreserveOrder, Ability::FullChecksumSend, Ability::FullChecksumRecv, Ability::CongestionControl]),
            descriptor("second", &[Ability::Reliability, Ability::PreserveOrder, Ability::FullChecksumSend, Ability::FullChecksumRecv, Ability::CongestionControl]),
        ]);
        let list = reduce(&props, &catalog).unwrap();
        let names: Vec<&str> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
