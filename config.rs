/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Session configuration.
//!
//! Embedders either build an [`SdkConfig`] programmatically or load one
//! from TOML. Every field has a working default except `api_key`, which
//! call preparation checks before creating any surface.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::BridgeError;

/// Byte budget for GET dialog URLs before call preparation switches to
/// the POST form strategy. Old user agents truncated somewhere above
/// this, so it is kept as a safety margin rather than a precise limit.
pub const DEFAULT_MAX_GET_URL_BYTES: usize = 2000;

const DEFAULT_PLATFORM_BASE: &str = "https://www.platform.example";
const DEFAULT_PROXY_PATH: &str = "/bridge/xd_proxy.html";

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SdkConfig {
    /// Application identifier sent with every dialog call.
    pub api_key: String,
    /// Base URL of the remote platform that serves dialog pages.
    pub platform_base: Url,
    /// Path (under `platform_base`) of the proxy page that relays
    /// fragment-encoded responses back to us.
    pub proxy_path: String,
    pub locale: String,
    /// Present when the user has an active session with the platform.
    pub session_key: Option<String>,
    /// Receiver page for the fragment-relay transport. Defaults to the
    /// embedding page's own URL at transport selection time.
    pub channel_url: Option<Url>,
    /// Minimum plugin relay version considered usable.
    pub min_plugin_version: String,
    /// Close-monitor poll cadence.
    pub poll_interval_ms: u64,
    /// Grace period between resolving a call and removing its iframe
    /// from the DOM.
    pub iframe_removal_grace_ms: u64,
    pub max_get_url_bytes: usize,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            platform_base: Url::parse(DEFAULT_PLATFORM_BASE)
                .expect("default platform base URL parses"),
            proxy_path: DEFAULT_PROXY_PATH.to_owned(),
            locale: "en_US".to_owned(),
            session_key: None,
            channel_url: None,
            min_plugin_version: "9.0.0".to_owned(),
            poll_interval_ms: 100,
            iframe_removal_grace_ms: 500,
            max_get_url_bytes: DEFAULT_MAX_GET_URL_BYTES,
        }
    }
}

impl SdkConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, BridgeError> {
        toml::from_str(source).map_err(|err| BridgeError::InvalidConfig(err.to_string()))
    }

    /// URL of the proxy page used as the base of handler URLs for the
    /// message-passing transports.
    pub fn proxy_url(&self) -> Result<Url, BridgeError> {
        self.platform_base
            .join(&self.proxy_path)
            .map_err(|err| BridgeError::InvalidConfig(format!("proxy path: {err}")))
    }

    /// Dialog page URL for a UI method path, before query parameters.
    pub fn dialog_url(&self, path: &str) -> Result<Url, BridgeError> {
        self.platform_base
            .join(path)
            .map_err(|err| BridgeError::InvalidConfig(format!("method path {path:?}: {err}")))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn iframe_removal_grace(&self) -> Duration {
        Duration::from_millis(self.iframe_removal_grace_ms)
    }
}
