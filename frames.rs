/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Surface lifecycle management.
//!
//! Every popup window and iframe backing a call is owned here, keyed by
//! the call's correlation id. Nothing else in the crate touches the
//! window or DOM ports for surface creation and teardown, so a call's
//! surface is released exactly once, on the call's resolution.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use log::debug;
use url::Url;

use framebridge_host::{
    AccessDenied, DomPort, Engine, EngineProfile, IframeHandle, IframeSpec, PopupFeatures,
    ScreenMetrics, WindowHandle, WindowPort,
};

use crate::error::BridgeError;

pub(crate) enum Surface {
    Popup(Rc<dyn WindowHandle>),
    Iframe {
        handle: Rc<dyn IframeHandle>,
        size: (u32, u32),
    },
}

pub(crate) struct IframeOptions {
    pub width: u32,
    pub height: u32,
    pub visible: bool,
    pub root_id: Option<String>,
    /// Fired exactly once, for the meaningful load. Synthetic load
    /// events from the blank insertion are suppressed.
    pub onload: Option<Box<dyn FnMut()>>,
}

pub(crate) struct SurfaceManager {
    windows: Rc<dyn WindowPort>,
    dom: Rc<dyn DomPort>,
    engine: Engine,
    screen: ScreenMetrics,
    removal_grace: Duration,
    surfaces: HashMap<String, Surface>,
    deferred_removals: Vec<(Duration, Rc<dyn IframeHandle>)>,
}

impl SurfaceManager {
    pub fn new(
        windows: Rc<dyn WindowPort>,
        dom: Rc<dyn DomPort>,
        engine: Engine,
        screen: ScreenMetrics,
        removal_grace: Duration,
    ) -> Self {
        Self {
            windows,
            dom,
            engine,
            screen,
            removal_grace,
            surfaces: HashMap::new(),
            deferred_removals: Vec::new(),
        }
    }

    /// Open a centered popup window named after the call id and track
    /// it. An embedder refusal (popup blocker) is an error the caller
    /// must unwind registrations for.
    pub fn open_popup(
        &mut self,
        id: &str,
        url: &Url,
        width: u32,
        height: u32,
    ) -> Result<(), BridgeError> {
        let features = centered_features(&self.screen, width, height);
        let Some(window) = self.windows.open(url, id, features) else {
            return Err(BridgeError::PopupBlocked(id.to_owned()));
        };
        self.surfaces.insert(id.to_owned(), Surface::Popup(window));
        Ok(())
    }

    /// Insert an iframe named after the call id, sequencing `src`
    /// assignment around the engine's insertion quirks. `url: None`
    /// leaves the frame blank, as the POST strategy requires.
    pub fn open_iframe(&mut self, id: &str, url: Option<&Url>, options: IframeOptions) {
        let profile = self.engine.profile();
        let initial_src = if profile.src_on_create {
            url.cloned()
        } else {
            None
        };
        let spec = IframeSpec {
            name: id.to_owned(),
            src: initial_src,
            width: options.width,
            height: options.height,
            visible: options.visible,
            root_id: options.root_id,
        };
        let handle = self
            .dom
            .insert_iframe(spec, deduplicated_onload(profile, options.onload));
        if !profile.src_on_create && let Some(url) = url {
            handle.set_src(url);
        }
        self.surfaces.insert(
            id.to_owned(),
            Surface::Iframe {
                handle,
                size: (options.width, options.height),
            },
        );
    }

    /// Tear down the surface for `id`. Idempotent: closing an untracked
    /// id reports `false` and does nothing. Popup close denials are
    /// swallowed; iframe removal is deferred past the grace period so an
    /// in-flight plugin response is not cut off mid-delivery.
    pub fn close(&mut self, id: &str, now: Duration) -> bool {
        match self.surfaces.remove(id) {
            None => {
                debug!("close of untracked surface {id} ignored");
                false
            },
            Some(Surface::Popup(window)) => {
                if let Err(err) = window.close() {
                    debug!("popup {id} close denied: {err}");
                }
                true
            },
            Some(Surface::Iframe { handle, .. }) => {
                self.deferred_removals
                    .push((now + self.removal_grace, handle));
                true
            },
        }
    }

    /// Process deferred iframe removals whose grace period has elapsed.
    pub fn tick(&mut self, now: Duration) {
        self.deferred_removals.retain(|(deadline, handle)| {
            if *deadline <= now {
                handle.remove();
                false
            } else {
                true
            }
        });
    }

    pub fn resize_iframe(&mut self, id: &str, width: Option<u32>, height: Option<u32>) -> bool {
        let Some(Surface::Iframe { handle, size }) = self.surfaces.get_mut(id) else {
            return false;
        };
        *size = (width.unwrap_or(size.0), height.unwrap_or(size.1));
        handle.set_size(size.0, size.1);
        true
    }

    /// Probe whether the popup for `id` has been closed by the user.
    /// `None` when `id` is not a tracked popup; `Err` when the window
    /// denies the probe (navigated cross-origin).
    pub fn probe_popup_closed(&self, id: &str) -> Option<Result<bool, AccessDenied>> {
        match self.surfaces.get(id) {
            Some(Surface::Popup(window)) => Some(window.is_closed()),
            _ => None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.surfaces.contains_key(id)
    }
}

/// Popup placement with the legacy metric fallback chain: engines that
/// predate `screenX`/`outerWidth` expose `screenLeft` and the document
/// client size instead.
pub(crate) fn centered_features(screen: &ScreenMetrics, width: u32, height: u32) -> PopupFeatures {
    let base_x = screen.screen_x.or(screen.screen_left).unwrap_or(0);
    let base_y = screen.screen_y.or(screen.screen_top).unwrap_or(0);
    let host_width = screen.outer_width.unwrap_or(screen.client_width) as i32;
    let host_height = screen.outer_height.unwrap_or(screen.client_height) as i32;
    let left = base_x + (host_width - width as i32) / 2;
    // 2.5 divisor: dialogs sit slightly above vertical center.
    let top = base_y + ((host_height - height as i32) as f32 / 2.5) as i32;
    PopupFeatures {
        width,
        height,
        left,
        top,
    }
}

/// Wrap a raw load callback so exactly one meaningful load reaches the
/// caller: synthetic loads from the blank insertion are skipped, and
/// later reloads are ignored.
fn deduplicated_onload(
    profile: EngineProfile,
    user: Option<Box<dyn FnMut()>>,
) -> framebridge_host::LoadCallback {
    let mut skip = u8::from(profile.synthetic_initial_load);
    let mut fired = false;
    let mut user = user;
    Box::new(move || {
        if skip > 0 {
            skip -= 1;
            return;
        }
        if fired {
            return;
        }
        fired = true;
        if let Some(callback) = user.as_mut() {
            callback();
        }
    })
}
