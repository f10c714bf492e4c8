// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Guest command channel output.
//!
//! A freshly started guest usually gets its address over DHCP, so proxforge
//! has to ask the guest itself. Virtual machines answer through the QEMU guest
//! agent (`qm guest cmd <id> network-get-interfaces`), which returns JSON.
//! Containers answer `pct exec <id> -- hostname -I` with a plain list.

use serde::Deserialize;
use std::net::Ipv4Addr;

/// Interface reported by the QEMU guest agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentInterface {
    pub name: String,

    #[serde(rename = "hardware-address", default)]
    pub hardware_address: Option<String>,

    #[serde(rename = "ip-addresses", default)]
    pub ip_addresses: Vec<AgentAddress>,
}

/// Address of an interface reported by the QEMU guest agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentAddress {
    #[serde(rename = "ip-address")]
    pub ip_address: String,

    #[serde(rename = "ip-address-type")]
    pub ip_address_type: String,

    #[serde(default)]
    pub prefix: Option<u8>,
}

/// Extract usable IPv4 addresses from guest agent interface listing.
///
/// Loopback and link-local addresses are skipped.
///
/// # Errors
///
/// - Return [`serde_json::Error`] if output is not an interface listing.
pub fn agent_ipv4_addresses(output: &str) -> Result<Vec<Ipv4Addr>, serde_json::Error> {
    let interfaces: Vec<AgentInterface> = serde_json::from_str(output)?;
    let addresses = interfaces
        .iter()
        .flat_map(|interface| interface.ip_addresses.iter())
        .filter(|address| address.ip_address_type == "ipv4")
        .filter_map(|address| address.ip_address.parse::<Ipv4Addr>().ok())
        .filter(is_usable)
        .collect();

    Ok(addresses)
}

/// Extract usable IPv4 addresses from `hostname -I` output.
pub fn hostname_ipv4_addresses(output: &str) -> Vec<Ipv4Addr> {
    output
        .split_whitespace()
        .filter_map(|word| word.parse::<Ipv4Addr>().ok())
        .filter(is_usable)
        .collect()
}

fn is_usable(address: &Ipv4Addr) -> bool {
    !address.is_loopback() && !address.is_link_local() && !address.is_unspecified()
}
