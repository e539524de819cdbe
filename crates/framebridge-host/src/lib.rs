/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Portable host boundary traits for framebridge embedders.
//!
//! The protocol core never touches a browser API directly. An embedder
//! (a real browser binding, or the recording fakes behind the
//! `test-support` feature) supplies these ports once at session
//! construction, and everything the core does to the outside world
//! (opening popups, inserting iframes, submitting POST forms, reading a
//! monotonic clock) goes through them.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use url::Url;

/// The far side refused access to a window property, typically because
/// the window has navigated to a different origin. Expected during
/// normal operation; callers treat it as "inconclusive".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessDenied;

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cross-origin window access denied")
    }
}

impl std::error::Error for AccessDenied {}

/// Rendering engine families whose iframe-insertion quirks the core has
/// to sequence around.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Engine {
    Gecko,
    WebKit,
    Trident,
    Other,
}

/// Quirk flags describing how an engine handles iframe insertion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineProfile {
    /// The `src` attribute must be present at creation time: changing it
    /// after insertion triggers the engine's navigation click sound.
    /// Every other engine gets the frame inserted blank and navigated
    /// afterwards, or it serves stale cached content for the frame.
    pub src_on_create: bool,
    /// The blank insertion emits a load event of its own that must not
    /// be mistaken for the meaningful load.
    pub synthetic_initial_load: bool,
}

impl Engine {
    pub fn profile(self) -> EngineProfile {
        match self {
            Engine::Trident => EngineProfile {
                src_on_create: true,
                synthetic_initial_load: false,
            },
            Engine::Gecko => EngineProfile {
                src_on_create: false,
                synthetic_initial_load: true,
            },
            Engine::WebKit | Engine::Other => EngineProfile {
                src_on_create: false,
                synthetic_initial_load: false,
            },
        }
    }
}

/// Window placement metrics as the embedding page sees them. Older
/// engines expose only the `screen_left`/`client_width` variants, so
/// every modern field is optional and the core applies the fallback
/// chain itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScreenMetrics {
    pub screen_x: Option<i32>,
    pub screen_y: Option<i32>,
    pub screen_left: Option<i32>,
    pub screen_top: Option<i32>,
    pub outer_width: Option<u32>,
    pub outer_height: Option<u32>,
    pub client_width: u32,
    pub client_height: u32,
}

/// Everything the transport selector and surface manager need to know
/// about the embedding page, captured once at session construction.
#[derive(Clone, Debug)]
pub struct HostCapabilities {
    /// Native cross-window message delivery with listener registration.
    pub native_messaging: bool,
    /// Installed plugin relay version (dotted), if any.
    pub plugin_version: Option<String>,
    /// `document.domain` of the embedding page.
    pub document_domain: String,
    /// Scheme and host of the embedding page, e.g. `https://apps.example.com`.
    pub scheme_host: String,
    /// Full URL of the embedding page. Absent in sandboxed documents.
    pub page_url: Option<Url>,
    pub engine: Engine,
    pub screen: ScreenMetrics,
}

/// Placement computed by the core for a popup window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PopupFeatures {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
}

/// A live popup window owned by the surface manager.
pub trait WindowHandle {
    /// Ask the window to close. May be denied once the window has
    /// navigated cross-origin.
    fn close(&self) -> Result<(), AccessDenied>;
    /// Probe whether the user has closed the window.
    fn is_closed(&self) -> Result<bool, AccessDenied>;
}

/// Opens popup windows. Returns `None` when the embedder (or a popup
/// blocker) refuses to open one.
pub trait WindowPort {
    fn open(&self, url: &Url, name: &str, features: PopupFeatures)
    -> Option<Rc<dyn WindowHandle>>;
}

/// Creation-time description of an iframe. `src: None` means the frame
/// is inserted blank and navigated later via [`IframeHandle::set_src`].
#[derive(Clone, Debug)]
pub struct IframeSpec {
    pub name: String,
    pub src: Option<Url>,
    pub width: u32,
    pub height: u32,
    pub visible: bool,
    /// DOM id of the container element; `None` appends to the body.
    pub root_id: Option<String>,
}

/// A live iframe owned by the surface manager.
pub trait IframeHandle {
    fn set_src(&self, url: &Url);
    fn set_size(&self, width: u32, height: u32);
    fn remove(&self);
}

/// Raw load-event callback handed to the embedder at iframe creation.
/// The embedder invokes it for every load event the frame emits; the
/// core is responsible for deduplicating synthetic loads.
pub type LoadCallback = Box<dyn FnMut()>;

/// Document-level operations: iframe insertion and the hidden-form POST
/// used when a dialog's parameters exceed the GET URL budget.
pub trait DomPort {
    fn insert_iframe(&self, spec: IframeSpec, on_load: LoadCallback) -> Rc<dyn IframeHandle>;
    /// Build a hidden form with one input per field, submit it with its
    /// `target` set to the named window or iframe, then discard it.
    fn submit_form(&self, action: &Url, fields: &[(String, String)], target: &str);
}

/// Monotonic time. The core never reads a wall clock or arms a real
/// timer; embedders pump tick-style entry points and supply this.
pub trait ClockPort {
    fn now(&self) -> Duration;
}

/// The port bundle a session is constructed over.
#[derive(Clone)]
pub struct HostPorts {
    pub windows: Rc<dyn WindowPort>,
    pub dom: Rc<dyn DomPort>,
    pub clock: Rc<dyn ClockPort>,
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! Recording fakes for the host ports.

    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;

    use url::Url;

    use crate::{
        AccessDenied, ClockPort, DomPort, Engine, HostCapabilities, HostPorts, IframeHandle,
        IframeSpec, LoadCallback, PopupFeatures, ScreenMetrics, WindowHandle, WindowPort,
    };

    #[derive(Default)]
    pub struct FakeClock {
        now: Cell<Duration>,
    }

    impl FakeClock {
        pub fn advance(&self, by: Duration) {
            self.now.set(self.now.get() + by);
        }
    }

    impl ClockPort for FakeClock {
        fn now(&self) -> Duration {
            self.now.get()
        }
    }

    pub struct FakePopup {
        pub name: String,
        pub url: Url,
        pub features: PopupFeatures,
        pub closed: Cell<bool>,
        pub deny_access: Cell<bool>,
        pub close_calls: Cell<u32>,
    }

    impl WindowHandle for FakePopup {
        fn close(&self) -> Result<(), AccessDenied> {
            self.close_calls.set(self.close_calls.get() + 1);
            if self.deny_access.get() {
                return Err(AccessDenied);
            }
            self.closed.set(true);
            Ok(())
        }

        fn is_closed(&self) -> Result<bool, AccessDenied> {
            if self.deny_access.get() {
                return Err(AccessDenied);
            }
            Ok(self.closed.get())
        }
    }

    #[derive(Default)]
    pub struct FakeWindowPort {
        pub opened: RefCell<Vec<Rc<FakePopup>>>,
        pub block_next: Cell<bool>,
    }

    impl FakeWindowPort {
        pub fn popup(&self, name: &str) -> Option<Rc<FakePopup>> {
            self.opened
                .borrow()
                .iter()
                .find(|popup| popup.name == name)
                .cloned()
        }
    }

    impl WindowPort for FakeWindowPort {
        fn open(
            &self,
            url: &Url,
            name: &str,
            features: PopupFeatures,
        ) -> Option<Rc<dyn WindowHandle>> {
            if self.block_next.replace(false) {
                return None;
            }
            let popup = Rc::new(FakePopup {
                name: name.to_owned(),
                url: url.clone(),
                features,
                closed: Cell::new(false),
                deny_access: Cell::new(false),
                close_calls: Cell::new(0),
            });
            self.opened.borrow_mut().push(popup.clone());
            Some(popup)
        }
    }

    pub struct FakeIframe {
        pub spec: IframeSpec,
        pub src_history: RefCell<Vec<Url>>,
        pub size: Cell<(u32, u32)>,
        pub removed: Cell<bool>,
    }

    impl IframeHandle for FakeIframe {
        fn set_src(&self, url: &Url) {
            self.src_history.borrow_mut().push(url.clone());
        }

        fn set_size(&self, width: u32, height: u32) {
            self.size.set((width, height));
        }

        fn remove(&self) {
            self.removed.set(true);
        }
    }

    pub struct SubmittedForm {
        pub action: Url,
        pub fields: Vec<(String, String)>,
        pub target: String,
    }

    #[derive(Default)]
    pub struct FakeDom {
        pub iframes: RefCell<Vec<Rc<FakeIframe>>>,
        pub forms: RefCell<Vec<SubmittedForm>>,
        load_callbacks: RefCell<Vec<LoadCallback>>,
    }

    impl FakeDom {
        pub fn iframe(&self, name: &str) -> Option<Rc<FakeIframe>> {
            self.iframes
                .borrow()
                .iter()
                .find(|frame| frame.spec.name == name)
                .cloned()
        }

        /// Simulate the embedder delivering a load event for the nth
        /// inserted iframe.
        pub fn fire_load(&self, index: usize) {
            let mut callback = {
                let mut callbacks = self.load_callbacks.borrow_mut();
                std::mem::replace(&mut callbacks[index], Box::new(|| {}))
            };
            callback();
            self.load_callbacks.borrow_mut()[index] = callback;
        }
    }

    impl DomPort for FakeDom {
        fn insert_iframe(&self, spec: IframeSpec, on_load: LoadCallback) -> Rc<dyn IframeHandle> {
            let frame = Rc::new(FakeIframe {
                size: Cell::new((spec.width, spec.height)),
                spec,
                src_history: RefCell::new(Vec::new()),
                removed: Cell::new(false),
            });
            self.iframes.borrow_mut().push(frame.clone());
            self.load_callbacks.borrow_mut().push(on_load);
            frame
        }

        fn submit_form(&self, action: &Url, fields: &[(String, String)], target: &str) {
            self.forms.borrow_mut().push(SubmittedForm {
                action: action.clone(),
                fields: fields.to_vec(),
                target: target.to_owned(),
            });
        }
    }

    pub struct FakeHost {
        pub windows: Rc<FakeWindowPort>,
        pub dom: Rc<FakeDom>,
        pub clock: Rc<FakeClock>,
    }

    impl FakeHost {
        pub fn new() -> Self {
            Self {
                windows: Rc::new(FakeWindowPort::default()),
                dom: Rc::new(FakeDom::default()),
                clock: Rc::new(FakeClock::default()),
            }
        }

        pub fn ports(&self) -> HostPorts {
            HostPorts {
                windows: self.windows.clone(),
                dom: self.dom.clone(),
                clock: self.clock.clone(),
            }
        }
    }

    impl Default for FakeHost {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Capabilities of a typical modern embedding page.
    pub fn desktop_capabilities() -> HostCapabilities {
        HostCapabilities {
            native_messaging: true,
            plugin_version: None,
            document_domain: "apps.example.com".to_owned(),
            scheme_host: "https://apps.example.com".to_owned(),
            page_url: Some(
                Url::parse("https://apps.example.com/canvas/page").expect("static URL parses"),
            ),
            engine: Engine::WebKit,
            screen: ScreenMetrics {
                screen_x: Some(40),
                screen_y: Some(30),
                screen_left: None,
                screen_top: None,
                outer_width: Some(1280),
                outer_height: Some(960),
                client_width: 1200,
                client_height: 900,
            },
        }
    }
}
