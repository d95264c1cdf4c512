use tracing::{debug, warn};

use crate::common::entity::{Family, Protocol};
use crate::cthelper::entity::HelperId;
use crate::redirect::entity::{HelperRef, IpsetRef, Redirect, RedirectTarget, ZoneSpec};
use crate::redirect::error::RedirectError;
use crate::state::PolicyState;
use crate::zone::entity::{ChainKind, ZoneId, ZoneRegistry};

/// Validate a record against the policy, resolving symbolic references
/// and filling defaults in place. On success the record is ready for
/// expansion; on failure it must be dropped.
///
/// Validation also marks the per-zone chains the compiled ruleset will
/// need, so it must run exactly once per accepted record.
pub fn validate(redir: &mut Redirect, state: &mut PolicyState) -> Result<(), RedirectError> {
    if !redir.enabled {
        return Err(RedirectError::Disabled);
    }

    if redir.src.invert {
        return Err(RedirectError::InvertedSource);
    }

    if redir.src.is_named() {
        redir.src_zone = Some(state.zones.lookup(&redir.src.name).ok_or_else(|| {
            RedirectError::UnknownZone {
                name: redir.src.name.clone(),
            }
        })?);
    }

    if redir.dest.is_named() {
        redir.dest_zone = Some(state.zones.lookup(&redir.dest.name).ok_or_else(|| {
            RedirectError::UnknownZone {
                name: redir.dest.name.clone(),
            }
        })?);
    }

    if let IpsetRef::Named { name, invert } = &redir.ipset {
        if state.defaults.disable_ipsets {
            return Err(RedirectError::IpsetsDisabled);
        }
        let id = state
            .ipsets
            .lookup(name)
            .ok_or_else(|| RedirectError::UnknownIpset { name: name.clone() })?;
        redir.ipset = IpsetRef::Resolved {
            id,
            invert: *invert,
        };
    }

    if let HelperRef::Named { name, invert } = &redir.helper {
        let id = state
            .helpers
            .lookup(name)
            .ok_or_else(|| RedirectError::UnknownHelper { name: name.clone() })?;
        redir.helper = HelperRef::Resolved {
            id,
            explicit: true,
            invert: *invert,
        };
    }

    check_families(redir, state)?;

    let target = match redir.target {
        Some(target) => target,
        None => {
            warn!(
                redirect = %redir.label(),
                "no target specified, defaulting to DNAT"
            );
            RedirectTarget::Dnat
        }
    };
    redir.target = Some(target);

    let direction = match target {
        RedirectTarget::Dnat => check_dnat(redir, state),
        RedirectTarget::Snat => check_snat(redir, state),
    };

    if redir.proto.is_empty() {
        warn!(
            redirect = %redir.label(),
            "does not specify a protocol, assuming TCP+UDP"
        );
        redir.proto = vec![Protocol::Tcp, Protocol::Udp];
    }

    direction?;

    if target == RedirectTarget::Dnat && redir.port_redir.is_none() {
        redir.port_redir = redir.port_dest;
    }

    Ok(())
}

fn check_families(redir: &Redirect, state: &PolicyState) -> Result<(), RedirectError> {
    if redir.family == Family::Any {
        return Ok(());
    }

    let mismatch = |field| Err(RedirectError::FamilyMismatch { field });

    if let Some(id) = redir.src_zone
        && state.zones.get(id).family.conflicts_with(redir.family)
    {
        return mismatch("source zone");
    }
    if let Some(id) = redir.dest_zone
        && state.zones.get(id).family.conflicts_with(redir.family)
    {
        return mismatch("destination zone");
    }
    if let IpsetRef::Resolved { id, .. } = redir.ipset
        && state.ipsets.get(id).family.conflicts_with(redir.family)
    {
        return mismatch("ipset");
    }
    if let HelperRef::Resolved { id, .. } = redir.helper
        && state.helpers.get(id).family.conflicts_with(redir.family)
    {
        return mismatch("conntrack helper");
    }
    if let Some(addr) = &redir.ip_src
        && addr.family().conflicts_with(redir.family)
    {
        return mismatch("source address");
    }
    if let Some(addr) = &redir.ip_dest
        && addr.family().conflicts_with(redir.family)
    {
        return mismatch("destination address");
    }
    if let Some(addr) = &redir.ip_redir
        && addr.family().conflicts_with(redir.family)
    {
        return mismatch("rewrite address");
    }
    Ok(())
}

fn check_dnat(redir: &mut Redirect, state: &mut PolicyState) -> Result<(), RedirectError> {
    if redir.src.any {
        return Err(RedirectError::WildcardSource);
    }
    let Some(src) = redir.src_zone else {
        return Err(RedirectError::MissingSource);
    };
    if matches!(redir.helper, HelperRef::Resolved { invert: true, .. }) {
        return Err(RedirectError::NegatedHelper);
    }

    state
        .zones
        .get_mut(src)
        .require_chain(Family::V4, ChainKind::Dnat);

    // A DNAT without a rewrite address redirects to the gateway.
    redir.local = redir.ip_redir.is_none();

    if !redir.local
        && !redir.dest.set
        && let Some(dest) = infer_dest(redir, &state.zones)
    {
        let name = state.zones.get(dest).name.clone();
        warn!(
            redirect = %redir.label(),
            zone = %name,
            "does not specify a destination, assuming zone from rewrite address"
        );
        redir.dest = ZoneSpec::named(name);
        redir.dest_zone = Some(dest);
    }

    if redir.reflection
        && let Some(dest) = redir.dest_zone
        && state.zones.get(src).masq
    {
        let dest_zone = state.zones.get_mut(dest);
        dest_zone.require_chain(Family::V4, ChainKind::Accept);
        dest_zone.require_chain(Family::V4, ChainKind::Dnat);
        dest_zone.require_chain(Family::V4, ChainKind::Snat);
    }

    if redir.helper.is_resolved() {
        state
            .zones
            .get_mut(src)
            .require_chain(Family::V4, ChainKind::Helper);
    }

    Ok(())
}

fn check_snat(redir: &mut Redirect, state: &mut PolicyState) -> Result<(), RedirectError> {
    if redir.dest.any {
        return Err(RedirectError::WildcardDest);
    }
    let Some(dest) = redir.dest_zone else {
        return Err(RedirectError::MissingDest);
    };
    if redir.ip_dest.is_none() {
        return Err(RedirectError::MissingSnatAddr);
    }
    if !redir.mac_src.is_empty() {
        return Err(RedirectError::MacWithSnat);
    }
    if !matches!(redir.helper, HelperRef::Unset) {
        return Err(RedirectError::HelperWithSnat);
    }

    state
        .zones
        .get_mut(dest)
        .require_chain(Family::V4, ChainKind::Snat);
    Ok(())
}

/// Find the zone whose network contains the rewrite address, walking
/// zones in declaration order. Each candidate is checked with its own
/// network mask.
fn infer_dest(redir: &Redirect, zones: &ZoneRegistry) -> Option<ZoneId> {
    let target = redir.ip_redir.as_ref()?;
    for (id, zone) in zones.iter() {
        if zone.addresses.iter().any(|a| a.contains_masked(target)) {
            return Some(id);
        }
    }
    None
}

/// Pick a conntrack helper from the rewrite port when none was
/// configured. Only adopts a helper when every protocol agrees on a
/// single candidate; ambiguity selects nothing.
pub fn select_helper(redir: &mut Redirect, state: &mut PolicyState) {
    if !state.defaults.auto_helper {
        return;
    }
    if redir.target != Some(RedirectTarget::Dnat) {
        return;
    }
    if !matches!(redir.helper, HelperRef::Unset) {
        return;
    }
    let Some(src) = redir.src_zone else {
        return;
    };
    let Some(port) = redir.port_redir else {
        return;
    };
    if port.invert {
        return;
    }

    let mut candidates: Vec<HelperId> = Vec::new();
    for proto in &redir.proto {
        if let Some(id) = state.helpers.lookup_by_proto_port(*proto, &port.range)
            && !candidates.contains(&id)
        {
            candidates.push(id);
        }
    }

    if let [id] = candidates[..] {
        debug!(
            redirect = %redir.label(),
            helper = %state.helpers.get(id).name,
            "selected conntrack helper from rewrite port"
        );
        redir.helper = HelperRef::Resolved {
            id,
            explicit: false,
            invert: false,
        };
        state
            .zones
            .get_mut(src)
            .require_chain(Family::V4, ChainKind::Helper);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::entity::{Address, PortMatch, PortRange, Protocol};
    use crate::cthelper::entity::CtHelper;
    use crate::ipset::entity::Ipset;
    use crate::state::Defaults;
    use crate::zone::entity::Zone;

    fn addr(a: [u8; 4], len: u8) -> Address {
        Address::v4(u32::from_be_bytes(a), len)
    }

    fn make_state() -> PolicyState {
        let mut state = PolicyState::new(Defaults::default());
        state.zones.push(Zone::new(
            "wan",
            Family::Any,
            true,
            vec![addr([203, 0, 113, 1], 24)],
        ));
        state.zones.push(Zone::new(
            "lan",
            Family::Any,
            false,
            vec![addr([10, 0, 0, 1], 24)],
        ));
        state.ipsets.push(Ipset::new("blocklist", Family::V4, None));
        state.helpers.push(CtHelper::new(
            "ftp",
            Family::Any,
            vec![Protocol::Tcp],
            Some(PortRange::single(21)),
        ));
        state.helpers.push(CtHelper::new(
            "sip",
            Family::Any,
            vec![Protocol::Tcp, Protocol::Udp],
            Some(PortRange::single(5060)),
        ));
        state
    }

    fn make_dnat() -> Redirect {
        let mut redir = Redirect::new(0);
        redir.target = Some(RedirectTarget::Dnat);
        redir.src = ZoneSpec::named("wan");
        redir.proto = vec![Protocol::Tcp];
        redir.port_dest = Some(PortMatch::new(80, 80));
        redir.ip_redir = Some(addr([10, 0, 0, 5], 32));
        redir
    }

    // ── rejection tests ───────────────────────────────────────────

    #[test]
    fn disabled_record_is_rejected() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.enabled = false;
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::Disabled)
        );
    }

    #[test]
    fn inverted_source_is_rejected() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.src.invert = true;
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::InvertedSource)
        );
    }

    #[test]
    fn unknown_zone_is_rejected() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.src = ZoneSpec::named("dmz");
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::UnknownZone { name: "dmz".into() })
        );
    }

    #[test]
    fn unknown_ipset_is_rejected() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.ipset = IpsetRef::named("nosuch", false);
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::UnknownIpset {
                name: "nosuch".into()
            })
        );
    }

    #[test]
    fn ipset_reference_with_support_disabled_is_rejected() {
        let mut state = make_state();
        state.defaults.disable_ipsets = true;
        let mut redir = make_dnat();
        redir.ipset = IpsetRef::named("blocklist", false);
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::IpsetsDisabled)
        );
    }

    #[test]
    fn unknown_helper_is_rejected() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.helper = HelperRef::named("h323", false);
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::UnknownHelper {
                name: "h323".into()
            })
        );
    }

    #[test]
    fn negated_helper_is_rejected_for_dnat() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.helper = HelperRef::named("ftp", true);
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::NegatedHelper)
        );
    }

    #[test]
    fn dnat_wildcard_source_is_rejected() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.src = ZoneSpec::any();
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::WildcardSource)
        );
    }

    #[test]
    fn dnat_missing_source_is_rejected() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.src = ZoneSpec::default();
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::MissingSource)
        );
    }

    // ── SNAT direction tests ──────────────────────────────────────

    fn make_snat() -> Redirect {
        let mut redir = Redirect::new(0);
        redir.target = Some(RedirectTarget::Snat);
        redir.dest = ZoneSpec::named("lan");
        redir.proto = vec![Protocol::Tcp];
        redir.ip_dest = Some(addr([10, 0, 0, 1], 32));
        redir
    }

    #[test]
    fn snat_wildcard_dest_is_rejected() {
        let mut state = make_state();
        let mut redir = make_snat();
        redir.dest = ZoneSpec::any();
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::WildcardDest)
        );
    }

    #[test]
    fn snat_missing_dest_is_rejected() {
        let mut state = make_state();
        let mut redir = make_snat();
        redir.dest = ZoneSpec::default();
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::MissingDest)
        );
    }

    #[test]
    fn snat_without_rewrite_source_is_rejected() {
        let mut state = make_state();
        let mut redir = make_snat();
        redir.ip_dest = None;
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::MissingSnatAddr)
        );
    }

    #[test]
    fn snat_with_mac_match_is_rejected() {
        let mut state = make_state();
        let mut redir = make_snat();
        redir.mac_src = vec!["00:11:22:33:44:55".parse().unwrap()];
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::MacWithSnat)
        );
    }

    #[test]
    fn snat_with_helper_is_rejected() {
        let mut state = make_state();
        let mut redir = make_snat();
        redir.helper = HelperRef::named("ftp", false);
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::HelperWithSnat)
        );
    }

    #[test]
    fn snat_marks_dest_zone_chain() {
        let mut state = make_state();
        let mut redir = make_snat();
        validate(&mut redir, &mut state).unwrap();
        let lan = state.zones.lookup("lan").unwrap();
        assert!(state.zones.get(lan).requires_chain(Family::V4, ChainKind::Snat));
    }

    // ── family consistency tests ──────────────────────────────────

    #[test]
    fn v6_record_with_v4_address_is_rejected() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.family = Family::V6;
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::FamilyMismatch {
                field: "rewrite address"
            })
        );
    }

    #[test]
    fn v6_record_with_v4_ipset_is_rejected() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.family = Family::V6;
        redir.ip_redir = None;
        redir.ipset = IpsetRef::named("blocklist", false);
        assert_eq!(
            validate(&mut redir, &mut state),
            Err(RedirectError::FamilyMismatch { field: "ipset" })
        );
    }

    #[test]
    fn wildcard_family_skips_consistency_checks() {
        let mut state = make_state();
        let mut redir = make_dnat();
        assert!(validate(&mut redir, &mut state).is_ok());
    }

    // ── defaulting tests ──────────────────────────────────────────

    #[test]
    fn target_defaults_to_dnat() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.target = None;
        validate(&mut redir, &mut state).unwrap();
        assert_eq!(redir.target, Some(RedirectTarget::Dnat));
    }

    #[test]
    fn proto_defaults_to_tcp_udp() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.proto = vec![];
        validate(&mut redir, &mut state).unwrap();
        assert_eq!(redir.proto, vec![Protocol::Tcp, Protocol::Udp]);
    }

    #[test]
    fn port_redir_defaults_to_port_dest() {
        let mut state = make_state();
        let mut redir = make_dnat();
        validate(&mut redir, &mut state).unwrap();
        assert_eq!(redir.port_redir, redir.port_dest);
    }

    #[test]
    fn explicit_port_redir_is_kept() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.port_redir = Some(PortMatch::new(8080, 8080));
        validate(&mut redir, &mut state).unwrap();
        assert_eq!(redir.port_redir, Some(PortMatch::new(8080, 8080)));
    }

    // ── destination inference and local tests ─────────────────────

    #[test]
    fn dest_zone_inferred_from_rewrite_address() {
        let mut state = make_state();
        let mut redir = make_dnat();
        validate(&mut redir, &mut state).unwrap();
        assert_eq!(redir.dest_zone, state.zones.lookup("lan"));
        assert_eq!(redir.dest.name, "lan");
        assert!(!redir.local);
    }

    #[test]
    fn dest_zone_not_inferred_outside_any_zone() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.ip_redir = Some(addr([172, 16, 0, 5], 32));
        validate(&mut redir, &mut state).unwrap();
        assert_eq!(redir.dest_zone, None);
    }

    #[test]
    fn dnat_without_rewrite_address_is_local() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.ip_redir = None;
        validate(&mut redir, &mut state).unwrap();
        assert!(redir.local);
        assert_eq!(redir.dest_zone, None);
    }

    #[test]
    fn explicit_dest_is_not_overridden() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.dest = ZoneSpec::named("wan");
        validate(&mut redir, &mut state).unwrap();
        assert_eq!(redir.dest_zone, state.zones.lookup("wan"));
    }

    // ── chain marking tests ───────────────────────────────────────

    #[test]
    fn dnat_marks_src_zone_chain() {
        let mut state = make_state();
        let mut redir = make_dnat();
        validate(&mut redir, &mut state).unwrap();
        let wan = state.zones.lookup("wan").unwrap();
        assert!(state.zones.get(wan).requires_chain(Family::V4, ChainKind::Dnat));
    }

    #[test]
    fn reflection_marks_dest_zone_chains() {
        let mut state = make_state();
        let mut redir = make_dnat();
        validate(&mut redir, &mut state).unwrap();
        let lan = state.zones.lookup("lan").unwrap();
        let zone = state.zones.get(lan);
        assert!(zone.requires_chain(Family::V4, ChainKind::Accept));
        assert!(zone.requires_chain(Family::V4, ChainKind::Dnat));
        assert!(zone.requires_chain(Family::V4, ChainKind::Snat));
    }

    #[test]
    fn no_reflection_chains_without_masquerading_source() {
        let mut state = make_state();
        state.zones.get_mut(0).masq = false;
        let mut redir = make_dnat();
        validate(&mut redir, &mut state).unwrap();
        let lan = state.zones.lookup("lan").unwrap();
        assert!(!state.zones.get(lan).requires_chain(Family::V4, ChainKind::Accept));
    }

    #[test]
    fn explicit_helper_marks_helper_chain() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.port_dest = Some(PortMatch::new(21, 21));
        redir.helper = HelperRef::named("ftp", false);
        validate(&mut redir, &mut state).unwrap();
        let wan = state.zones.lookup("wan").unwrap();
        assert!(state.zones.get(wan).requires_chain(Family::V4, ChainKind::Helper));
    }

    // ── helper auto-selection tests ───────────────────────────────

    #[test]
    fn auto_select_adopts_single_candidate() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.port_dest = Some(PortMatch::new(21, 21));
        validate(&mut redir, &mut state).unwrap();
        select_helper(&mut redir, &mut state);
        let ftp = state.helpers.lookup("ftp").unwrap();
        assert_eq!(
            redir.helper,
            HelperRef::Resolved {
                id: ftp,
                explicit: false,
                invert: false,
            }
        );
        let wan = state.zones.lookup("wan").unwrap();
        assert!(state.zones.get(wan).requires_chain(Family::V4, ChainKind::Helper));
    }

    #[test]
    fn auto_select_agreeing_protocols_adopt_shared_candidate() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.proto = vec![Protocol::Tcp, Protocol::Udp];
        redir.port_dest = Some(PortMatch::new(5060, 5060));
        validate(&mut redir, &mut state).unwrap();
        select_helper(&mut redir, &mut state);
        let sip = state.helpers.lookup("sip").unwrap();
        assert!(matches!(redir.helper, HelperRef::Resolved { id, .. } if id == sip));
    }

    #[test]
    fn auto_select_skips_ambiguous_candidates() {
        let mut state = make_state();
        state.helpers.push(CtHelper::new(
            "irc",
            Family::Any,
            vec![Protocol::Udp],
            Some(PortRange::single(21)),
        ));
        let mut redir = make_dnat();
        redir.proto = vec![Protocol::Tcp, Protocol::Udp];
        redir.port_dest = Some(PortMatch::new(21, 21));
        validate(&mut redir, &mut state).unwrap();
        select_helper(&mut redir, &mut state);
        assert_eq!(redir.helper, HelperRef::Unset);
    }

    #[test]
    fn auto_select_skips_unmatched_port() {
        let mut state = make_state();
        let mut redir = make_dnat();
        validate(&mut redir, &mut state).unwrap();
        select_helper(&mut redir, &mut state);
        assert_eq!(redir.helper, HelperRef::Unset);
    }

    #[test]
    fn auto_select_never_overrides_explicit_helper() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.port_dest = Some(PortMatch::new(21, 21));
        redir.helper = HelperRef::named("sip", false);
        validate(&mut redir, &mut state).unwrap();
        let before = redir.helper.clone();
        select_helper(&mut redir, &mut state);
        assert_eq!(redir.helper, before);
        assert!(matches!(
            redir.helper,
            HelperRef::Resolved { explicit: true, .. }
        ));
    }

    #[test]
    fn auto_select_respects_defaults_switch() {
        let mut state = make_state();
        state.defaults.auto_helper = false;
        let mut redir = make_dnat();
        redir.port_dest = Some(PortMatch::new(21, 21));
        validate(&mut redir, &mut state).unwrap();
        select_helper(&mut redir, &mut state);
        assert_eq!(redir.helper, HelperRef::Unset);
    }

    #[test]
    fn auto_select_skips_inverted_port() {
        let mut state = make_state();
        let mut redir = make_dnat();
        redir.port_dest = Some(PortMatch {
            range: PortRange::single(21),
            invert: true,
        });
        validate(&mut redir, &mut state).unwrap();
        select_helper(&mut redir, &mut state);
        assert_eq!(redir.helper, HelperRef::Unset);
    }
}
