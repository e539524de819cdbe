use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use framebridge::codec::{self, ParamBag};
use framebridge::{
    BridgeSession, CallOutcome, Display, PresentOptions, Relation, SdkConfig, Transport, UiMethod,
    VERSION,
};
use framebridge_host::HostCapabilities;
use framebridge_host::test_support::{FakeHost, desktop_capabilities};
use serde_json::json;

struct DialogHarness {
    host: FakeHost,
    session: BridgeSession,
    outcomes: Rc<RefCell<Vec<CallOutcome>>>,
}

impl DialogHarness {
    fn new() -> Self {
        Self::with(Self::configured(), desktop_capabilities())
    }

    fn with(config: SdkConfig, caps: HostCapabilities) -> Self {
        let host = FakeHost::new();
        let session = BridgeSession::new(config, caps, host.ports()).expect("transport available");
        session.register_method("login", UiMethod::new("/dialog/login", 627, 326));
        session.register_method(
            "publish",
            UiMethod::new("/dialog/publish", 575, 240).allow_logged_out_iframe(),
        );
        Self {
            host,
            session,
            outcomes: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn configured() -> SdkConfig {
        SdkConfig {
            api_key: "a1b2c3d4".to_owned(),
            ..SdkConfig::default()
        }
    }

    fn call(&self, method: &str, params: ParamBag) -> String {
        let outcomes = self.outcomes.clone();
        self.session
            .ui(
                method,
                params,
                Box::new(move |outcome| outcomes.borrow_mut().push(outcome)),
            )
            .expect("call prepared")
    }

    fn advance_and_tick(&self, by: Duration) {
        self.host.clock.advance(by);
        self.session.tick();
    }
}

/// Pull one parameter out of a surface URL's query string.
fn query_param(url: &url::Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

/// Decode the correlation parameters out of a minted handler URL.
fn handler_params(handler_url: &str) -> ParamBag {
    codec::decode(codec::fragment_payload(handler_url).expect("handler URL has a payload"))
}

#[test]
fn scenarios_binary_smoke_runs() {
    assert!(!VERSION.is_empty());
}

#[test]
fn popup_login_resolves_through_transport_delivery() {
    let harness = DialogHarness::new();
    let id = harness.call("login", ParamBag::new());

    let popup = harness.host.windows.popup(&id).expect("popup opened");
    assert_eq!(query_param(&popup.url, "display").as_deref(), Some("popup"));
    assert_eq!(
        query_param(&popup.url, "api_key").as_deref(),
        Some("a1b2c3d4")
    );
    assert!(harness.session.is_monitoring());

    // The platform redirects the popup to the proxy page, which relays
    // the percent-encoded JSON result over the chosen transport.
    assert!(
        harness
            .session
            .recv(&format!("cb={id}&frame={id}&result=%7B%22ok%22%3Atrue%7D"))
    );

    assert_eq!(
        harness.outcomes.borrow().as_slice(),
        &[CallOutcome::Resolved(json!({"ok": true}))]
    );
    assert!(!harness.session.has_surface(&id));
    assert_eq!(popup.close_calls.get(), 1);
    assert!(!harness.session.is_monitoring());
}

#[test]
fn unfilled_result_template_resolves_as_cancelled() {
    let harness = DialogHarness::new();
    let id = harness.call("login", ParamBag::new());

    // The far side echoed the redirect template without substituting a
    // result: the JSON-quoted sentinel comes back literally.
    assert!(
        harness
            .session
            .recv(&format!("cb={id}&frame={id}&result=%22xxRESULTTOKENxx%22"))
    );

    assert_eq!(
        harness.outcomes.borrow().as_slice(),
        &[CallOutcome::Cancelled]
    );
    assert!(!harness.session.has_surface(&id));

    // Duplicate delivery is a no-op.
    assert!(
        !harness
            .session
            .recv(&format!("cb={id}&frame={id}&result=%22xxRESULTTOKENxx%22"))
    );
    assert_eq!(harness.outcomes.borrow().len(), 1);
}

#[test]
fn user_closing_the_popup_fires_the_default_callback_once() {
    let harness = DialogHarness::new();
    let id = harness.call("login", ParamBag::new());
    let popup = harness.host.windows.popup(&id).unwrap();

    // Nothing resolves while the window is open.
    harness.advance_and_tick(Duration::from_millis(100));
    assert!(harness.outcomes.borrow().is_empty());

    popup.closed.set(true);
    harness.advance_and_tick(Duration::from_millis(100));
    assert_eq!(
        harness.outcomes.borrow().as_slice(),
        &[CallOutcome::Cancelled]
    );
    assert!(!harness.session.has_surface(&id));

    // A second poll tick must not fire the callback again.
    harness.advance_and_tick(Duration::from_millis(100));
    assert_eq!(harness.outcomes.borrow().len(), 1);
}

#[test]
fn iframe_dialog_resizes_over_the_channel_and_tears_it_down() {
    let config = SdkConfig {
        session_key: Some("sess.key".to_owned()),
        ..DialogHarness::configured()
    };
    let harness = DialogHarness::with(config, desktop_capabilities());
    let id = harness.call("publish", ParamBag::new());

    let frame = harness.host.dom.iframe(&id).expect("iframe inserted");
    assert!(frame.spec.visible);
    let src = frame.src_history.borrow().first().cloned().expect("src set");
    assert_eq!(query_param(&src, "display").as_deref(), Some("dialog"));
    assert_eq!(
        query_param(&src, "session_key").as_deref(),
        Some("sess.key")
    );

    // The channel handler URL rides along; the dialog messages resize
    // requests through it with the surface id in `frame`.
    let channel_url = query_param(&src, "channel_url").expect("channel handler attached");
    let channel_id = handler_params(&channel_url)["cb"].clone();
    assert!(
        harness
            .session
            .recv(&format!("cb={channel_id}&frame={id}&type=resize&height=720"))
    );
    assert_eq!(frame.size.get(), (575, 720));

    // Channel handlers are forever: a second signal still lands.
    assert!(
        harness
            .session
            .recv(&format!("cb={channel_id}&frame={id}&type=resize&height=900"))
    );
    assert_eq!(frame.size.get(), (575, 900));

    // Completion removes the iframe after the grace period and takes
    // the channel handler with it.
    assert!(
        harness
            .session
            .recv(&format!("cb={id}&frame={id}&result=true"))
    );
    assert_eq!(
        harness.outcomes.borrow().as_slice(),
        &[CallOutcome::Resolved(json!(true))]
    );
    assert!(!frame.removed.get());
    harness.advance_and_tick(Duration::from_millis(500));
    assert!(frame.removed.get());
    assert!(
        !harness
            .session
            .recv(&format!("cb={channel_id}&frame={id}&type=resize&height=100"))
    );
    assert_eq!(harness.session.pending_handlers(), 0);
}

#[test]
fn oversized_parameters_post_through_a_named_surface() {
    let harness = DialogHarness::new();
    let mut params = ParamBag::new();
    params.insert("attachment".to_owned(), "x".repeat(3000));
    let id = harness.call("login", params);

    let popup = harness.host.windows.popup(&id).expect("popup opened");
    assert_eq!(popup.url.as_str(), "about:blank");

    let forms = harness.host.dom.forms.borrow();
    assert_eq!(forms.len(), 1);
    assert_eq!(forms[0].target, id);
    assert_eq!(
        forms[0].action.as_str(),
        "https://www.platform.example/dialog/login"
    );
    assert!(
        forms[0]
            .fields
            .iter()
            .any(|(key, value)| key == "attachment" && value.len() == 3000)
    );
}

#[test]
fn oversized_iframe_dialog_posts_into_a_blank_frame() {
    let config = SdkConfig {
        session_key: Some("sess.key".to_owned()),
        ..DialogHarness::configured()
    };
    let harness = DialogHarness::with(config, desktop_capabilities());
    let mut params = ParamBag::new();
    params.insert("attachment".to_owned(), "y".repeat(3000));
    let id = harness.call("publish", params);

    // The iframe is inserted without a src; the form navigates it.
    let frame = harness.host.dom.iframe(&id).expect("iframe inserted");
    assert_eq!(frame.spec.src, None);
    assert!(frame.src_history.borrow().is_empty());

    let forms = harness.host.dom.forms.borrow();
    assert_eq!(forms.len(), 1);
    assert_eq!(forms[0].target, id);
}

#[test]
fn small_parameter_sets_stay_on_get() {
    let harness = DialogHarness::new();
    let id = harness.call("login", ParamBag::new());
    let popup = harness.host.windows.popup(&id).unwrap();
    assert!(popup.url.as_str().len() <= 2000);
    assert!(harness.host.dom.forms.borrow().is_empty());
}

#[test]
fn widget_surfaces_present_and_dismiss_through_the_low_level_api() {
    let harness = DialogHarness::new();
    let url = url::Url::parse("https://www.platform.example/widgets/fan_box?profile=42").unwrap();
    let loads = Rc::new(Cell::new(0u32));
    let counter = loads.clone();
    harness
        .session
        .present(
            "widget1",
            &url,
            PresentOptions {
                display: Display::Dialog,
                width: 300,
                height: 250,
                root_id: Some("widget-slot".to_owned()),
                onload: Some(Box::new(move || counter.set(counter.get() + 1))),
            },
        )
        .expect("widget presented");

    let frame = harness.host.dom.iframe("widget1").expect("iframe inserted");
    assert_eq!(frame.spec.root_id.as_deref(), Some("widget-slot"));
    assert!(frame.spec.visible);
    harness.host.dom.fire_load(0);
    harness.host.dom.fire_load(0);
    assert_eq!(loads.get(), 1);

    harness.session.dismiss("widget1");
    assert!(!harness.session.has_surface("widget1"));
    harness.advance_and_tick(Duration::from_millis(500));
    assert!(frame.removed.get());
}

#[test]
fn fragment_relay_round_trips_through_the_page_url() {
    let mut caps = desktop_capabilities();
    caps.native_messaging = false;
    caps.plugin_version = None;
    let harness = DialogHarness::with(DialogHarness::configured(), caps);
    assert_eq!(harness.session.transport(), Transport::Fragment);

    let outcomes = harness.outcomes.clone();
    let handler_url = harness
        .session
        .handler_url(
            Box::new(move |msg| outcomes.borrow_mut().push(msg.result_outcome())),
            false,
            Relation::Opener,
        )
        .expect("handler minted");
    assert!(handler_url.starts_with("https://apps.example.com/canvas/page#?=&"));

    let params = handler_params(&handler_url);
    assert_eq!(params["transport"], "fragment");
    let id = params["cb"].clone();

    // The proxy reloads the page with the response in the fragment.
    assert!(harness.session.recv_fragment(&format!(
        "https://apps.example.com/canvas/page#?=&cb={id}&result=%22ok%22"
    )));
    assert_eq!(
        harness.outcomes.borrow().as_slice(),
        &[CallOutcome::Resolved(json!("ok"))]
    );
}
