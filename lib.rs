/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Cross-document dialog core for embedding platform dialogs in third
//! party pages.
//!
//! The crate implements the message-passing layer between an embedding
//! page and the popup/iframe dialogs it opens on a remote platform:
//! transport selection across browser generations, correlation of
//! pending calls, the wire codec, surface lifecycle, close detection,
//! and UI-method dispatch. Browser specifics live behind the port
//! traits in `framebridge-host`, so the whole protocol runs (and is
//! tested) against fakes.
//!
//! Entry point: build an [`SdkConfig`], capture the page's
//! [`framebridge_host::HostCapabilities`], and construct a
//! [`BridgeSession`]. Feed incoming transport payloads to
//! [`BridgeSession::recv`] and pump [`BridgeSession::tick`] from the
//! embedder's timer.

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod methods;
pub mod registry;
pub mod session;
pub mod transport;

mod frames;
mod monitor;

pub use codec::{CallOutcome, ParamBag, RESULT_SENTINEL, Relation, XdMessage};
pub use config::SdkConfig;
pub use dispatch::Display;
pub use error::BridgeError;
pub use methods::{MethodRegistry, ParamTransform, UiMethod};
pub use registry::CorrelationRegistry;
pub use session::{BridgeSession, PresentOptions, UiCallback};
pub use transport::Transport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
