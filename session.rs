/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The per-page bridge session.
//!
//! [`BridgeSession`] owns every piece of shared state the protocol
//! needs (the frozen transport decision, the correlation registry, the
//! surface map, the close monitor), so nothing in the crate is ambient
//! or global. Constructed once per page/process; the embedder pumps
//! [`BridgeSession::tick`] from its timer and feeds incoming transport
//! payloads to [`BridgeSession::recv`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, error, warn};
use url::Url;

use framebridge_host::{HostCapabilities, HostPorts};

use crate::codec::{self, CallOutcome, ParamBag, Relation, XdMessage};
use crate::config::SdkConfig;
use crate::dispatch::{self, Delivery, Display};
use crate::error::BridgeError;
use crate::frames::{IframeOptions, SurfaceManager};
use crate::methods::{MethodRegistry, UiMethod};
use crate::monitor::{CloseMonitor, MonitorState};
use crate::registry::{self, CorrelationRegistry, HandlerFn};
use crate::transport::{Transport, TransportDecision};

/// Completion callback for a UI call, invoked exactly once with the
/// decoded outcome (or a cancellation when the user closed the window).
pub type UiCallback = Box<dyn FnOnce(CallOutcome)>;

/// Presentation request for [`BridgeSession::present`], the low-level
/// surface API used by widget collaborators.
pub struct PresentOptions {
    pub display: Display,
    pub width: u32,
    pub height: u32,
    pub root_id: Option<String>,
    pub onload: Option<Box<dyn FnMut()>>,
}

pub struct BridgeSession {
    shared: Rc<SessionShared>,
}

struct SessionShared {
    config: RefCell<SdkConfig>,
    ports: HostPorts,
    /// Chosen once at construction and frozen for the session lifetime;
    /// there is no re-selection path.
    decision: TransportDecision,
    registry: RefCell<CorrelationRegistry>,
    surfaces: RefCell<SurfaceManager>,
    monitor: RefCell<CloseMonitor>,
    methods: RefCell<MethodRegistry>,
    /// Surface id → forever channel handler id, so channel handlers die
    /// with the surface that owns them.
    channels: RefCell<HashMap<String, String>>,
    recheck_hook: RefCell<Option<Box<dyn Fn()>>>,
}

impl BridgeSession {
    /// Build a session, performing the one-time transport selection.
    /// Fails with [`BridgeError::NoTransport`] when the page has no
    /// messaging capability and no URL usable as a fragment relay,
    /// which is unrecoverable for any dialog flow.
    pub fn new(
        config: SdkConfig,
        caps: HostCapabilities,
        ports: HostPorts,
    ) -> Result<Self, BridgeError> {
        let decision = crate::transport::select(&caps, &config)?;
        let surfaces = SurfaceManager::new(
            ports.windows.clone(),
            ports.dom.clone(),
            caps.engine,
            caps.screen,
            config.iframe_removal_grace(),
        );
        let monitor = CloseMonitor::new(config.poll_interval());
        Ok(Self {
            shared: Rc::new(SessionShared {
                config: RefCell::new(config),
                ports,
                decision,
                registry: RefCell::new(CorrelationRegistry::new()),
                surfaces: RefCell::new(surfaces),
                monitor: RefCell::new(monitor),
                methods: RefCell::new(MethodRegistry::new()),
                channels: RefCell::new(HashMap::new()),
                recheck_hook: RefCell::new(None),
            }),
        })
    }

    pub fn transport(&self) -> Transport {
        self.shared.decision.transport
    }

    /// The origin correlation tag the far side is expected to echo.
    pub fn origin_tag(&self) -> String {
        self.shared.decision.origin.clone()
    }

    pub fn register_method(&self, name: impl Into<String>, method: UiMethod) -> bool {
        self.shared.methods.borrow_mut().register(name, method)
    }

    pub fn set_session_key(&self, session_key: Option<String>) {
        self.shared.config.borrow_mut().session_key = session_key;
    }

    /// Hook invoked when an iframe dialog asks the embedding page to
    /// re-check its login status.
    pub fn on_session_recheck(&self, hook: Box<dyn Fn()>) {
        *self.shared.recheck_hook.borrow_mut() = Some(hook);
    }

    /// Register a raw callback and mint the handler URL the far side
    /// will message back through. This is the collaborator-facing
    /// registration API; dialog calls go through [`BridgeSession::ui`],
    /// which builds its handler URLs internally.
    pub fn handler_url(
        &self,
        callback: HandlerFn,
        forever: bool,
        relation: Relation,
    ) -> Result<String, BridgeError> {
        let id = self.shared.registry.borrow_mut().register(callback, forever);
        match self.shared.handler_url_for(&id, relation) {
            Ok(url) => Ok(url),
            Err(err) => {
                self.shared.registry.borrow_mut().remove(&id);
                Err(err)
            },
        }
    }

    /// Perform a logical UI method: prepare parameters, mint handler
    /// URLs, pick the presentation and delivery strategy, and open the
    /// backing surface. Returns the call id.
    ///
    /// When the caller supplies an explicit `next` parameter the far
    /// side redirects there on completion and `callback` is never
    /// invoked; otherwise `callback` is registered as the call's
    /// default (and cancel) handler.
    pub fn ui(
        &self,
        method_name: &str,
        mut params: ParamBag,
        callback: UiCallback,
    ) -> Result<String, BridgeError> {
        let shared = &self.shared;
        let config = shared.config.borrow().clone();
        if config.api_key.is_empty() {
            error!("UI call {method_name} aborted: no API key configured");
            return Err(BridgeError::MissingApiKey);
        }
        let methods = shared.methods.borrow();
        let Some(method) = methods.get(method_name) else {
            error!("UI call aborted: unknown method {method_name}");
            return Err(BridgeError::UnknownMethod(method_name.to_owned()));
        };

        let requested = params
            .remove("display")
            .and_then(|name| Display::from_name(&name));
        let display = dispatch::resolve_display(requested, config.session_key.is_some(), method);
        let relation = if display == Display::Popup {
            Relation::Opener
        } else {
            Relation::Parent
        };

        let explicit_next = params.remove("next");
        let explicit_cancel = params.remove("cancel_url");
        let (id, next_url, has_default) = match explicit_next {
            Some(next) => (registry::new_correlation_id(), next, false),
            None => {
                let handler = SessionShared::default_handler(shared, callback);
                let id = shared.registry.borrow_mut().register(handler, false);
                let url = match shared.handler_url_for(&id, relation) {
                    Ok(url) => codec::with_result_token(&url),
                    Err(err) => {
                        shared.registry.borrow_mut().remove(&id);
                        return Err(err);
                    },
                };
                (id, url, true)
            },
        };
        let cancel_url = explicit_cancel.unwrap_or_else(|| next_url.clone());

        // Iframe dialogs get a long-lived channel handler for
        // out-of-band signals (resize, session recheck), distinct from
        // the one-shot completion handler.
        let channel = if display.is_iframe() {
            let handler = SessionShared::channel_handler(shared);
            let channel_id = shared.registry.borrow_mut().register(handler, true);
            match shared.handler_url_for(&channel_id, Relation::Parent) {
                Ok(url) => Some((channel_id, url)),
                Err(err) => {
                    shared.registry.borrow_mut().remove(&channel_id);
                    if has_default {
                        shared.registry.borrow_mut().remove(&id);
                    }
                    return Err(err);
                },
            }
        } else {
            None
        };

        params
            .entry("api_key".to_owned())
            .or_insert_with(|| config.api_key.clone());
        params
            .entry("locale".to_owned())
            .or_insert_with(|| config.locale.clone());
        if let Some(session_key) = &config.session_key {
            params
                .entry("session_key".to_owned())
                .or_insert_with(|| session_key.clone());
        }
        params.insert("display".to_owned(), display.as_str().to_owned());
        params.insert("next".to_owned(), next_url);
        params.insert("cancel_url".to_owned(), cancel_url);
        if let Some((_, channel_url)) = &channel {
            params.insert("channel_url".to_owned(), channel_url.clone());
        }

        let params = match &method.transform {
            Some(transform) => transform(params, &config),
            None => params,
        };

        let base = config.dialog_url(&method.path)?;
        let delivery = dispatch::choose_delivery(&base, &params, config.max_get_url_bytes);

        let presented = {
            let mut surfaces = shared.surfaces.borrow_mut();
            match delivery {
                Delivery::Get(url) => {
                    if display == Display::Popup {
                        surfaces.open_popup(&id, &url, method.width, method.height)
                    } else {
                        surfaces.open_iframe(
                            &id,
                            Some(&url),
                            Self::iframe_options(display, method),
                        );
                        Ok(())
                    }
                },
                Delivery::Post { action, fields } => {
                    let opened = if display == Display::Popup {
                        surfaces.open_popup(&id, &post_bootstrap_url(), method.width, method.height)
                    } else {
                        surfaces.open_iframe(&id, None, Self::iframe_options(display, method));
                        Ok(())
                    };
                    opened.map(|()| shared.ports.dom.submit_form(&action, &fields, &id))
                },
            }
        };

        if let Err(err) = presented {
            warn!("UI call {method_name} aborted: {err}");
            if has_default {
                shared.registry.borrow_mut().remove(&id);
            }
            if let Some((channel_id, _)) = &channel {
                shared.registry.borrow_mut().remove(channel_id);
            }
            return Err(err);
        }

        if let Some((channel_id, _)) = channel {
            shared.channels.borrow_mut().insert(id.clone(), channel_id);
        }
        if display == Display::Popup && has_default {
            shared.monitor.borrow_mut().watch(&id);
        }
        Ok(id)
    }

    /// Low-level surface presentation for collaborators that manage
    /// their own handler URLs (widget iframes).
    pub fn present(&self, id: &str, url: &Url, options: PresentOptions) -> Result<(), BridgeError> {
        let mut surfaces = self.shared.surfaces.borrow_mut();
        match options.display {
            Display::Popup => surfaces.open_popup(id, url, options.width, options.height),
            Display::Dialog | Display::Hidden => {
                surfaces.open_iframe(
                    id,
                    Some(url),
                    IframeOptions {
                        width: options.width,
                        height: options.height,
                        visible: options.display == Display::Dialog,
                        root_id: options.root_id,
                        onload: options.onload,
                    },
                );
                Ok(())
            },
        }
    }

    /// Force-cleanup a surface: any pending handler under the id is
    /// resolved with a cancellation (so the call still reaches exactly
    /// one resolution), then the surface and the channel handlers it
    /// owns are released. Idempotent.
    pub fn dismiss(&self, id: &str) {
        SessionShared::resolve(&self.shared, id, XdMessage::cancellation(id));
        SessionShared::teardown_surface(&self.shared, id);
        // A forever handler registered under the surface's own id does
        // not consume itself on delivery; drop it with the surface.
        self.shared.registry.borrow_mut().remove(id);
    }

    /// Entry point for every transport: decode a raw payload, check the
    /// origin tag, and deliver to the registered handler. Malformed or
    /// unknown messages are dropped, never errors: the far side is an
    /// untrusted surface.
    ///
    /// The origin tag is a correlation secret, not a cryptographic
    /// boundary: a message carrying a tag is dropped on mismatch, but a
    /// message without one is delivered on the strength of its
    /// correlation id alone.
    pub fn recv(&self, raw: &str) -> bool {
        let Some(message) = XdMessage::parse(raw) else {
            debug!("dropping transport payload with no correlation id");
            return false;
        };
        if let Some(origin) = &message.origin
            && origin != &self.shared.decision.origin
        {
            warn!("dropping message for {}: origin tag mismatch", message.cb);
            return false;
        }
        let id = message.cb.clone();
        SessionShared::resolve(&self.shared, &id, message)
    }

    /// Fragment-relay receive helper: extract the payload out of a URL
    /// fragment (bare, full-URL, or legacy `#?=&` form) and deliver it.
    pub fn recv_fragment(&self, input: &str) -> bool {
        match codec::fragment_payload(input) {
            Some(payload) => self.recv(payload),
            None => false,
        }
    }

    /// Periodic pump: close-monitor poll plus deferred surface
    /// teardown. The embedder calls this from its timer; cadence gates
    /// are internal, so over-calling is harmless.
    pub fn tick(&self) {
        let shared = &self.shared;
        let now = shared.ports.clock.now();
        let closed = {
            let surfaces = shared.surfaces.borrow();
            shared.monitor.borrow_mut().poll(&surfaces, now)
        };
        for id in closed {
            debug!("popup {id} closed by the user; synthesizing cancellation");
            SessionShared::resolve(shared, &id, XdMessage::cancellation(&id));
            // The default handler tears the surface down; an id whose
            // handler is already gone must still release its window.
            if shared.surfaces.borrow().contains(&id) {
                SessionShared::teardown_surface(shared, &id);
            }
        }
        shared.surfaces.borrow_mut().tick(now);
    }

    pub fn has_surface(&self, id: &str) -> bool {
        self.shared.surfaces.borrow().contains(id)
    }

    pub fn pending_handlers(&self) -> usize {
        self.shared.registry.borrow().len()
    }

    pub fn is_monitoring(&self) -> bool {
        self.shared.monitor.borrow().state() == MonitorState::Monitoring
    }

    fn iframe_options(display: Display, method: &UiMethod) -> IframeOptions {
        IframeOptions {
            width: method.width,
            height: method.height,
            visible: display == Display::Dialog,
            root_id: None,
            onload: None,
        }
    }
}

impl SessionShared {
    /// Handler URL for an already-registered id: the proxy page (or the
    /// fragment channel page) with the correlation parameters in the
    /// fragment, `#?=&`-prefixed as the proxy expects.
    fn handler_url_for(&self, id: &str, relation: Relation) -> Result<String, BridgeError> {
        let base = if let (Transport::Fragment, Some(channel)) =
            (self.decision.transport, &self.decision.channel_url)
        {
            channel.clone()
        } else {
            self.config.borrow().proxy_url()?
        };
        let mut base = base;
        base.set_fragment(None);

        let mut params = ParamBag::new();
        params.insert("cb".to_owned(), id.to_owned());
        params.insert("origin".to_owned(), self.decision.origin.clone());
        params.insert("relation".to_owned(), relation.as_str().to_owned());
        params.insert(
            "transport".to_owned(),
            self.decision.transport.as_str().to_owned(),
        );
        Ok(format!("{base}#?=&{}", codec::encode(&params)))
    }

    /// One-shot completion handler for a UI call: decode the outcome,
    /// release the surface, then invoke the caller.
    fn default_handler(shared: &Rc<Self>, callback: UiCallback) -> HandlerFn {
        let weak = Rc::downgrade(shared);
        let mut callback = Some(callback);
        Box::new(move |message: XdMessage| {
            let outcome = message.result_outcome();
            if let Some(shared) = weak.upgrade() {
                SessionShared::teardown_surface(&shared, message.surface_id());
            }
            if let Some(callback) = callback.take() {
                callback(outcome);
            }
        })
    }

    /// Forever handler for an iframe dialog's out-of-band channel.
    fn channel_handler(shared: &Rc<Self>) -> HandlerFn {
        let weak = Rc::downgrade(shared);
        Box::new(move |message: XdMessage| {
            if let Some(shared) = weak.upgrade() {
                SessionShared::handle_channel_message(&shared, &message);
            }
        })
    }

    fn handle_channel_message(shared: &Rc<Self>, message: &XdMessage) {
        match message.params.get("type").map(String::as_str) {
            Some("resize") => {
                let Some(frame) = message.frame.as_deref() else {
                    debug!("resize channel message without a frame id");
                    return;
                };
                let width = message.params.get("width").and_then(|v| v.parse().ok());
                let height = message.params.get("height").and_then(|v| v.parse().ok());
                shared.surfaces.borrow_mut().resize_iframe(frame, width, height);
            },
            Some("recheck-session") => {
                if let Some(hook) = &*shared.recheck_hook.borrow() {
                    hook();
                }
            },
            other => {
                debug!("ignoring channel message of type {other:?}");
            },
        }
    }

    /// Deliver a message to the handler for `id` without holding the
    /// registry cell borrowed while the handler runs, so handlers may
    /// re-enter the session (teardown, re-registration).
    fn resolve(shared: &Rc<Self>, id: &str, message: XdMessage) -> bool {
        let handler = shared.registry.borrow_mut().take(id);
        let Some(mut handler) = handler else {
            debug!("no pending call for {id}");
            return false;
        };
        handler.invoke(message);
        if handler.forever() {
            shared.registry.borrow_mut().restore(id, handler);
        }
        true
    }

    /// Release a call's surface and every handler it owns. Runs on the
    /// open→resolved transition and is safe to repeat.
    fn teardown_surface(shared: &Rc<Self>, id: &str) {
        let now = shared.ports.clock.now();
        shared.surfaces.borrow_mut().close(id, now);
        shared.monitor.borrow_mut().unwatch(id);
        let channel_id = shared.channels.borrow_mut().remove(id);
        if let Some(channel_id) = channel_id {
            shared.registry.borrow_mut().remove(&channel_id);
        }
    }
}

fn post_bootstrap_url() -> Url {
    Url::parse("about:blank").expect("about:blank parses")
}
