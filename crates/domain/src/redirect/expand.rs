use tracing::{debug, info};

use crate::common::entity::{Address, Family, MacAddr, PortMatch, Protocol};
use crate::cthelper::entity::CtHelperRegistry;
use crate::ipset::entity::IpsetRegistry;
use crate::redirect::entity::{
    HelperRef, IpsetRef, Redirect, RedirectTarget, ReflectionSource,
};
use crate::rule::entity::{Match, NatAddr, Placement, Rule, RuleSink, RuleTarget, Table};
use crate::zone::entity::ZoneRegistry;

/// Expand one validated record into rules for `table`, emitting into
/// `sink`. Emission is a pure function of the validated policy: the
/// same record always yields the same rules.
///
/// Only IPv4 is supported; rewrite targets cannot be expressed for
/// IPv6 in this rule dialect.
pub fn expand(
    redir: &Redirect,
    table: Table,
    family: Family,
    zones: &ZoneRegistry,
    ipsets: &mut IpsetRegistry,
    helpers: &CtHelperRegistry,
    sink: &mut dyn RuleSink,
) {
    if family != Family::V4 {
        return;
    }

    debug!(redirect = %redir.label(), table = %table, "expanding redirect");

    let zone_applies = |id: Option<usize>| {
        id.is_none_or(|id| zones.get(id).family.applies_to(family))
    };
    if !zone_applies(redir.src_zone) || !zone_applies(redir.dest_zone) {
        info!(redirect = %redir.label(), "skipping due to different family of zone");
        return;
    }

    let addrs = [&redir.ip_src, &redir.ip_dest, &redir.ip_redir];
    if addrs
        .iter()
        .any(|a| a.is_some_and(|a| !a.family().applies_to(family)))
    {
        // Symbolic addresses that failed to resolve are skipped
        // quietly; a resolved mismatch is worth a diagnostic.
        if addrs.iter().all(|a| a.is_none_or(|a| a.resolved)) {
            info!(redirect = %redir.label(), "skipping due to different family of ip address");
        }
        return;
    }

    if let IpsetRef::Resolved { id, .. } = redir.ipset {
        let set = ipsets.get(id);
        if !set.family.applies_to(family) {
            info!(redirect = %redir.label(), "skipping due to different family of ipset");
            return;
        }
        if !set.present {
            info!(
                redirect = %redir.label(),
                ipset = %set.effective_name(),
                "skipping due to missing ipset"
            );
            return;
        }
        ipsets.get_mut(id).mark_materialized(family);
    }

    for proto in &redir.proto {
        if redir.mac_src.is_empty() {
            print_redirect(redir, table, *proto, None, zones, ipsets, helpers, sink);
        } else {
            for mac in &redir.mac_src {
                print_redirect(redir, table, *proto, Some(*mac), zones, ipsets, helpers, sink);
            }
        }
    }

    print_reflections(redir, table, family, zones, sink);
}

#[allow(clippy::too_many_arguments)]
fn print_redirect(
    redir: &Redirect,
    table: Table,
    proto: Protocol,
    mac: Option<MacAddr>,
    zones: &ZoneRegistry,
    ipsets: &IpsetRegistry,
    helpers: &CtHelperRegistry,
    sink: &mut dyn RuleSink,
) {
    match table {
        Table::Nat => {
            // SNAT matches the rewritten destination, DNAT the original.
            let (dst, dpt) = if redir.target == Some(RedirectTarget::Snat) {
                (&redir.ip_redir, &redir.port_redir)
            } else {
                (&redir.ip_dest, &redir.port_dest)
            };

            let mut matches = vec![Match::Proto(proto)];
            if let Some(a) = &redir.ip_src {
                matches.push(Match::SrcAddr(*a));
            }
            if let Some(a) = dst {
                matches.push(Match::DestAddr(*a));
            }
            if let Some(p) = &redir.port_src {
                matches.push(Match::SrcPort(*p));
            }
            if let Some(p) = dpt {
                matches.push(Match::DestPort(*p));
            }
            if let Some(mac) = mac {
                matches.push(Match::SrcMac(mac));
            }
            push_common_matches(&mut matches, redir, ipsets, helpers, true);

            let target = nat_target(redir);
            if let Some(extra) = &redir.extra {
                matches.push(Match::Extra(extra.clone()));
            }

            let chain = match redir.target {
                Some(RedirectTarget::Snat) => {
                    let Some(dest) = redir.dest_zone else { return };
                    zones.get(dest).chain("postrouting")
                }
                _ => {
                    let Some(src) = redir.src_zone else { return };
                    zones.get(src).chain("prerouting")
                }
            };

            sink.emit(Rule {
                table,
                chain,
                placement: Placement::Append,
                matches,
                target,
                comment: redir.comment(None),
            });
        }

        Table::Raw => {
            let HelperRef::Resolved { id, explicit, .. } = redir.helper else {
                return;
            };
            if redir.target != Some(RedirectTarget::Dnat) {
                return;
            }
            let helper = helpers.get(id);
            if !helper.supports_proto(proto) {
                info!(
                    redirect = %redir.label(),
                    proto = %proto,
                    helper = %helper.name,
                    "skipping protocol not supported by conntrack helper"
                );
                return;
            }
            if !explicit {
                info!(
                    redirect = %redir.label(),
                    helper = %helper.name,
                    "auto-selected conntrack helper based on proto/port"
                );
            }

            let mut matches = vec![Match::Proto(proto)];
            if let Some(a) = &redir.ip_src {
                matches.push(Match::SrcAddr(*a));
            }
            if let Some(a) = &redir.ip_redir {
                matches.push(Match::DestAddr(*a));
            }
            if let Some(p) = &redir.port_src {
                matches.push(Match::SrcPort(*p));
            }
            if let Some(p) = &redir.port_redir {
                matches.push(Match::DestPort(*p));
            }
            if let Some(mac) = mac {
                matches.push(Match::SrcMac(mac));
            }
            push_common_matches(&mut matches, redir, ipsets, helpers, false);
            matches.push(Match::CtStateDnat);

            let Some(src) = redir.src_zone else { return };
            sink.emit(Rule {
                table,
                chain: zones.get(src).chain("helper"),
                placement: Placement::Append,
                matches,
                target: RuleTarget::CtHelper {
                    name: helper.name.clone(),
                },
                comment: redir.comment(Some("CT helper")),
            });
        }

        Table::Filter => {}
    }
}

/// Matches shared by the NAT and RAW renditions. The helper match only
/// appears in the NAT rule; the RAW rule assigns the helper instead.
fn push_common_matches(
    matches: &mut Vec<Match>,
    redir: &Redirect,
    ipsets: &IpsetRegistry,
    helpers: &CtHelperRegistry,
    with_helper: bool,
) {
    if let IpsetRef::Resolved { id, invert } = redir.ipset {
        matches.push(Match::Ipset {
            name: ipsets.get(id).effective_name().to_string(),
            invert,
        });
    }
    if with_helper
        && let HelperRef::Resolved { id, invert, .. } = redir.helper
    {
        matches.push(Match::Helper {
            name: helpers.get(id).name.clone(),
            invert,
        });
    }
    if let Some(limit) = &redir.limit {
        matches.push(Match::Limit(*limit));
    }
    if redir.time.is_set() {
        matches.push(Match::Time(redir.time.clone()));
    }
    if let Some(mark) = &redir.mark {
        matches.push(Match::Mark(*mark));
    }
}

fn nat_target(redir: &Redirect) -> RuleTarget {
    if redir.local {
        return RuleTarget::Redirect {
            ports: redir.port_redir.map(|p| p.range),
        };
    }
    match redir.target {
        Some(RedirectTarget::Snat) => RuleTarget::Snat {
            to: NatAddr {
                addr: redir.ip_dest.as_ref().and_then(|a| a.net.v4_addr()),
                port: redir.port_dest.map(|p| p.range),
            },
        },
        _ => RuleTarget::Dnat {
            to: NatAddr {
                addr: redir.ip_redir.as_ref().and_then(|a| a.net.v4_addr()),
                port: redir.port_redir.map(|p| p.range),
            },
        },
    }
}

/// Hairpin NAT: let internal hosts reach a forwarded service through
/// its external address. Emits a DNAT and a SNAT rule per combination
/// of external address, internal network and protocol, in replace mode
/// so recompilation does not stack rules.
fn print_reflections(
    redir: &Redirect,
    table: Table,
    family: Family,
    zones: &ZoneRegistry,
    sink: &mut dyn RuleSink,
) {
    if table != Table::Nat {
        return;
    }
    if redir.target != Some(RedirectTarget::Dnat) || !redir.reflection || redir.local {
        return;
    }
    let (Some(src), Some(dest)) = (redir.src_zone, redir.dest_zone) else {
        return;
    };
    if !zones.get(src).masq {
        return;
    }

    let ext_addrs = zones.resolve_addresses(src, redir.ip_dest.as_ref());
    let int_addrs = zones.resolve_addresses(dest, None);
    let dest_zone = zones.get(dest);

    for ext in &ext_addrs {
        if !ext.family().applies_to(family) {
            continue;
        }
        let ext_host = ext.as_host();

        for int in &int_addrs {
            if !int.family().applies_to(family) {
                continue;
            }

            for proto in &redir.proto {
                let ref_addr = match redir.reflection_src {
                    ReflectionSource::Internal => int.as_host(),
                    ReflectionSource::External => ext_host,
                };

                // Internal host to external address: rewrite to the
                // forward target.
                sink.emit(Rule {
                    table,
                    chain: dest_zone.chain("prerouting"),
                    placement: Placement::Replace,
                    matches: reflection_matches(
                        *proto,
                        *int,
                        ext_host,
                        redir.port_dest.as_ref(),
                        redir,
                    ),
                    target: RuleTarget::Dnat {
                        to: NatAddr {
                            addr: redir.ip_redir.as_ref().and_then(|a| a.net.v4_addr()),
                            port: redir.port_redir.map(|p| p.range),
                        },
                    },
                    comment: redir.comment(Some("reflection")),
                });

                // Reply path: masquerade the internal client behind
                // the reflection address.
                sink.emit(Rule {
                    table,
                    chain: dest_zone.chain("postrouting"),
                    placement: Placement::Replace,
                    matches: reflection_matches(
                        *proto,
                        *int,
                        redir.ip_redir.unwrap_or(ext_host),
                        redir.port_redir.as_ref(),
                        redir,
                    ),
                    target: RuleTarget::Snat {
                        to: NatAddr {
                            addr: ref_addr.net.v4_addr(),
                            port: None,
                        },
                    },
                    comment: redir.comment(Some("reflection")),
                });
            }
        }
    }
}

fn reflection_matches(
    proto: Protocol,
    src: Address,
    dst: Address,
    dport: Option<&PortMatch>,
    redir: &Redirect,
) -> Vec<Match> {
    let mut matches = vec![
        Match::Proto(proto),
        Match::SrcAddr(src),
        Match::DestAddr(dst),
    ];
    if let Some(p) = dport {
        matches.push(Match::DestPort(*p));
    }
    if let Some(limit) = &redir.limit {
        matches.push(Match::Limit(*limit));
    }
    if redir.time.is_set() {
        matches.push(Match::Time(redir.time.clone()));
    }
    matches
}
