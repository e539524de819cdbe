/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt;

/// Errors surfaced by the dialog core.
///
/// Configuration problems are reported here synchronously, before any
/// surface is created; transport failures at session construction are
/// unrecoverable for dialog flows. Malformed incoming messages are never
/// errors; they are dropped at the `recv` boundary.
#[derive(Debug)]
pub enum BridgeError {
    /// No messaging capability and no page URL to fall back on for the
    /// fragment relay.
    NoTransport,
    /// The requested UI method is not in the method registry.
    UnknownMethod(String),
    /// The session has no API key configured.
    MissingApiKey,
    /// The embedder refused to open a popup window (popup blocker).
    PopupBlocked(String),
    /// A configured or constructed URL failed to parse.
    InvalidConfig(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::NoTransport => {
                write!(f, "no cross-document transport could be established")
            },
            BridgeError::UnknownMethod(name) => write!(f, "unknown UI method: {name}"),
            BridgeError::MissingApiKey => write!(f, "no API key configured"),
            BridgeError::PopupBlocked(id) => write!(f, "popup window refused for call {id}"),
            BridgeError::InvalidConfig(detail) => write!(f, "invalid configuration: {detail}"),
        }
    }
}

impl std::error::Error for BridgeError {}
