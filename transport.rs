/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Transport selection.
//!
//! Chosen once at session construction and frozen for the life of the
//! page: native cross-window messaging when the browser has it, the
//! plugin side channel when a new enough plugin is installed, and
//! otherwise a full-page fragment relay through a known receiver page.

use log::debug;
use url::Url;

use framebridge_host::HostCapabilities;

use crate::config::SdkConfig;
use crate::error::BridgeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    PostMessage,
    PluginRelay,
    Fragment,
}

impl Transport {
    /// Wire name of the transport, preserved from the original protocol
    /// (the plugin relay travels as `flash`).
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::PostMessage => "postmessage",
            Transport::PluginRelay => "flash",
            Transport::Fragment => "fragment",
        }
    }
}

/// The frozen outcome of transport selection.
#[derive(Clone, Debug)]
pub(crate) struct TransportDecision {
    pub transport: Transport,
    /// Correlation tag echoed back by the far side. A shared secret for
    /// matching, not a verified security boundary.
    pub origin: String,
    /// Receiver page for the fragment relay; `None` for the messaging
    /// transports, which relay through the proxy page instead.
    pub channel_url: Option<Url>,
}

/// Pick the best transport the page supports. Ordered preference;
/// the first capability that holds wins.
pub(crate) fn select(
    caps: &HostCapabilities,
    config: &SdkConfig,
) -> Result<TransportDecision, BridgeError> {
    if caps.native_messaging {
        let decision = TransportDecision {
            transport: Transport::PostMessage,
            origin: format!("{}/{}", caps.scheme_host, origin_suffix()),
            channel_url: None,
        };
        debug!("transport: native messaging, origin {}", decision.origin);
        return Ok(decision);
    }

    if let Some(version) = &caps.plugin_version
        && meets_min_version(version, &config.min_plugin_version)
    {
        // Plugin relay addressing is domain-scoped, not URL-scoped.
        let decision = TransportDecision {
            transport: Transport::PluginRelay,
            origin: format!("{}/{}", caps.document_domain, origin_suffix()),
            channel_url: None,
        };
        debug!(
            "transport: plugin relay {version}, origin {}",
            decision.origin
        );
        return Ok(decision);
    }

    if let Some(channel) = config.channel_url.clone().or_else(|| caps.page_url.clone()) {
        debug!("transport: fragment relay via {channel}");
        return Ok(TransportDecision {
            transport: Transport::Fragment,
            origin: format!("{}/{}", caps.scheme_host, origin_suffix()),
            channel_url: Some(channel),
        });
    }

    Err(BridgeError::NoTransport)
}

fn origin_suffix() -> String {
    format!("{:08x}", rand::random::<u32>())
}

fn meets_min_version(version: &str, min: &str) -> bool {
    let version = version_components(version);
    let min = version_components(min);
    for i in 0..version.len().max(min.len()) {
        let have = version.get(i).copied().unwrap_or(0);
        let want = min.get(i).copied().unwrap_or(0);
        if have != want {
            return have > want;
        }
    }
    true
}

fn version_components(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| part.trim().parse().unwrap_or(0))
        .collect()
}
