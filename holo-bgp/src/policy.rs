//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use derive_new::new;
use holo_utils::bgp::ExtComm;
use holo_utils::ip::IpNetworkExt;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::packet::attribute::{Attrs, ExtComms};

// Named route-map: an ordered list of entries evaluated until the first
// match. Routes that match no entry are rejected.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RouteMap {
    pub name: String,
    #[serde(default, rename = "entry")]
    pub entries: Vec<RouteMapEntry>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RouteMapEntry {
    pub seq: u32,
    pub action: RouteMapAction,
    #[serde(default, rename = "match")]
    pub matches: Vec<MatchCondition>,
    #[serde(default, rename = "set")]
    pub sets: Vec<SetAction>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMapAction {
    Permit,
    Deny,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchCondition {
    // Prefix equal to or more specific than the given one.
    Prefix(IpNetwork),
    ExtCommunity(ExtComm),
    SourceVrf(String),
    Nexthop(IpAddr),
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SetAction {
    LocalPref(u32),
    Med(u32),
    Nexthop(IpAddr),
    NexthopUnchanged,
    ExtCommunityAdd(ExtComm),
}

// Represents a simplified version of a path, containing only information
// relevant for the application of route-maps.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(new)]
pub struct RoutePolicyInfo {
    pub prefix: IpNetwork,
    pub attrs: Attrs,
    pub source_vrf: Option<String>,
    #[new(default)]
    pub nexthop_modified: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PolicyResult<T> {
    Accept(T),
    Reject,
}

// ===== impl RouteMap =====

impl RouteMap {
    pub fn new(name: String, mut entries: Vec<RouteMapEntry>) -> RouteMap {
        entries.sort_by_key(|entry| entry.seq);
        RouteMap { name, entries }
    }

    // Applies the route-map to a route and returns the policy result.
    pub fn apply(
        &self,
        mut rpinfo: RoutePolicyInfo,
    ) -> PolicyResult<RoutePolicyInfo> {
        let Some(entry) = self.entries.iter().find(|entry| {
            entry
                .matches
                .iter()
                .all(|condition| process_condition(&rpinfo, condition))
        }) else {
            return PolicyResult::Reject;
        };

        match entry.action {
            RouteMapAction::Permit => {
                for action in &entry.sets {
                    process_action(&mut rpinfo, action);
                }
                PolicyResult::Accept(rpinfo)
            }
            RouteMapAction::Deny => PolicyResult::Reject,
        }
    }
}

// ===== helper functions =====

fn process_condition(
    rpinfo: &RoutePolicyInfo,
    condition: &MatchCondition,
) -> bool {
    let attrs = &rpinfo.attrs;
    match condition {
        MatchCondition::Prefix(prefix) => {
            *prefix == rpinfo.prefix || prefix.covers(&rpinfo.prefix)
        }
        MatchCondition::ExtCommunity(ext_comm) => attrs
            .ext_comm
            .as_ref()
            .is_some_and(|list| list.0.contains(ext_comm)),
        MatchCondition::SourceVrf(name) => {
            rpinfo.source_vrf.as_ref() == Some(name)
        }
        MatchCondition::Nexthop(addr) => {
            attrs.base.nexthop == Some(*addr)
                || attrs.base.mp_nexthop == Some(*addr)
        }
    }
}

fn process_action(rpinfo: &mut RoutePolicyInfo, action: &SetAction) {
    let attrs = &mut rpinfo.attrs;
    match action {
        SetAction::LocalPref(local_pref) => {
            attrs.base.local_pref = Some(*local_pref);
        }
        SetAction::Med(med) => {
            attrs.base.med = Some(*med);
        }
        SetAction::Nexthop(addr) => {
            attrs.base.nexthop = Some(*addr);
            rpinfo.nexthop_modified = true;
        }
        SetAction::NexthopUnchanged => {
            rpinfo.nexthop_modified = false;
        }
        SetAction::ExtCommunityAdd(ext_comm) => {
            attrs
                .ext_comm
                .get_or_insert_with(ExtComms::default)
                .0
                .insert(*ext_comm);
        }
    }
}
