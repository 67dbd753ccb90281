//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use holo_bgp::policy::RouteMap;
use holo_utils::bgp::{ExtComm, RouteDistinguisher};
use holo_utils::srv6::Seg6LocalAction;
use ipnetwork::{IpNetwork, Ipv6Network};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub user: String,
    pub logging: Logging,
    pub srv6: Srv6,
    pub bgp: Bgp,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub journald: LoggingJournald,
    pub file: LoggingFile,
    pub stdout: LoggingStdout,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingJournald {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFile {
    pub enabled: bool,
    pub dir: String,
    pub name: String,
    pub rotation: LoggingFileRotation,
    #[serde(flatten)]
    pub fmt: LoggingFmt,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
    #[serde(flatten)]
    pub fmt: LoggingFmt,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFmt {
    pub style: LoggingFmtStyle,
    pub colors: bool,
    pub show_thread_id: bool,
    pub show_source: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFileRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFmtStyle {
    Compact,
    Full,
    Json,
    Pretty,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Srv6 {
    pub encap_source: Option<Ipv6Addr>,
    // Device seg6local routes are bound to.
    pub interface: String,
    pub locators: Vec<Srv6Locator>,
    pub static_functions: Vec<Srv6StaticFunction>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Srv6Locator {
    pub name: String,
    pub prefix: Ipv6Network,
    #[serde(default = "Srv6Locator::dflt_function_bits")]
    pub function_bits: u8,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Srv6StaticFunction {
    pub locator: String,
    // Function index. Allocated automatically when absent.
    pub index: Option<u64>,
    pub behavior: Seg6LocalAction,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Bgp {
    pub asn: u32,
    pub router_id: Option<Ipv4Addr>,
    pub route_maps: Vec<RouteMap>,
    pub vrfs: Vec<BgpVrf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BgpVrf {
    pub name: String,
    // Kernel VRF identifier. Resolved from the VRF device when absent.
    pub vrf_id: Option<u32>,
    pub table_id: u32,
    #[serde(default)]
    pub ipv4: VpnAfi,
    #[serde(default)]
    pub ipv6: VpnAfi,
    #[serde(default)]
    pub aggregates: Vec<IpNetwork>,
    #[serde(default)]
    pub routes: Vec<BgpRoute>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VpnAfi {
    pub export: bool,
    pub import: bool,
    pub vrf_to_vrf_export: bool,
    pub vrf_to_vrf_import: bool,
    pub rd: Option<RouteDistinguisher>,
    pub rt_export: Vec<ExtComm>,
    pub rt_import: Vec<ExtComm>,
    pub route_map_export: Option<String>,
    pub route_map_import: Option<String>,
    pub nexthop: Option<IpAddr>,
    pub sid: Option<VpnSid>,
    // Locator used for automatic SID allocation.
    pub locator: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize)]
#[serde(try_from = "String")]
pub enum VpnSid {
    Auto,
    Explicit(Ipv6Addr),
}

// Redistributed route.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BgpRoute {
    pub prefix: IpNetwork,
    pub nexthop: Option<IpAddr>,
    #[serde(default)]
    pub connected: bool,
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/holod.toml";

    pub(crate) fn load(config_file: Option<&str>) -> Config {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(config_file) {
            Ok(config_str) => match toml::from_str(&config_str) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("Failed to parse configuration file: {err}");
                    std::process::exit(1);
                }
            },
            Err(err) => {
                eprintln!("Failed to load configuration file: {err}");
                eprintln!("Falling back to default configuration...");
                Config::default()
            }
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            user: "holo".to_owned(),
            logging: Default::default(),
            srv6: Default::default(),
            bgp: Default::default(),
        }
    }
}

// ===== impl LoggingJournald =====

impl Default for LoggingJournald {
    fn default() -> LoggingJournald {
        LoggingJournald { enabled: false }
    }
}

// ===== impl LoggingFile =====

impl Default for LoggingFile {
    fn default() -> LoggingFile {
        LoggingFile {
            enabled: true,
            dir: "/var/log".to_owned(),
            name: "holod.log".to_owned(),
            rotation: Default::default(),
            fmt: Default::default(),
        }
    }
}

// ===== impl LoggingStdout =====

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: false,
            fmt: Default::default(),
        }
    }
}

// ===== impl LoggingFmt =====

impl Default for LoggingFmt {
    fn default() -> LoggingFmt {
        LoggingFmt {
            style: LoggingFmtStyle::Full,
            colors: false,
            show_thread_id: false,
            show_source: false,
        }
    }
}

// ===== impl Srv6 =====

impl Default for Srv6 {
    fn default() -> Srv6 {
        Srv6 {
            encap_source: None,
            interface: "sr0".to_owned(),
            locators: Default::default(),
            static_functions: Default::default(),
        }
    }
}

// ===== impl Srv6Locator =====

impl Srv6Locator {
    fn dflt_function_bits() -> u8 {
        16
    }
}

// ===== impl VpnSid =====

impl TryFrom<String> for VpnSid {
    type Error = String;

    fn try_from(value: String) -> Result<VpnSid, String> {
        if value == "auto" {
            return Ok(VpnSid::Auto);
        }
        value
            .parse()
            .map(VpnSid::Explicit)
            .map_err(|_| format!("invalid SID: {value}"))
    }
}

// ===== unit tests =====
