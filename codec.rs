/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Wire codec for the flat key/value bags every transport carries.
//!
//! Encoding is deterministic (key-sorted) so handler URLs are stable and
//! signable. The legacy "no result" sentinel is preserved on the wire
//! for compatibility, but it is converted to [`CallOutcome`] the moment
//! a message crosses this boundary; nothing past the codec compares
//! against the magic string.

use std::collections::BTreeMap;

use log::warn;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Reserved result value meaning "the far side produced no result".
/// Substituted by the platform when a dialog completes without data and
/// echoed back literally when the redirect template is not filled in.
pub const RESULT_SENTINEL: &str = "xxRESULTTOKENxx";

/// Flat parameter bag. `BTreeMap` gives the sorted iteration order the
/// encoder relies on.
pub type ParamBag = BTreeMap<String, String>;

// Everything outside the encodeURIComponent unreserved set is escaped.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Encode a parameter bag as a sorted, percent-encoded query string.
pub fn encode(params: &ParamBag) -> String {
    encode_with(params, true)
}

/// Encode without percent-escaping. Used where raw bytes are required,
/// e.g. producing the canonical string a request signature is computed
/// over.
pub fn encode_raw(params: &ParamBag) -> String {
    encode_with(params, false)
}

fn encode_with(params: &ParamBag, escape: bool) -> String {
    let mut pairs = Vec::with_capacity(params.len());
    for (key, value) in params {
        if escape {
            pairs.push(format!(
                "{}={}",
                utf8_percent_encode(key, QUERY_ENCODE_SET),
                utf8_percent_encode(value, QUERY_ENCODE_SET)
            ));
        } else {
            pairs.push(format!("{key}={value}"));
        }
    }
    pairs.join("&")
}

/// Decode a query string into a parameter bag. Pairs split on the first
/// `=`; a pair with an empty key is malformed and skipped rather than
/// rejected, since the far side is not trusted to be well-formed.
pub fn decode(input: &str) -> ParamBag {
    let mut params = ParamBag::new();
    for pair in input.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key.is_empty() {
            continue;
        }
        let key = percent_decode_str(key).decode_utf8_lossy().into_owned();
        let value = percent_decode_str(value).decode_utf8_lossy().into_owned();
        params.insert(key, value);
    }
    params
}

/// Extract the transport payload from a URL fragment. Accepts a bare
/// fragment, a full URL, and the legacy `#?=&`-prefixed form the proxy
/// page produces.
pub fn fragment_payload(input: &str) -> Option<&str> {
    let fragment = match input.split_once('#') {
        Some((_, fragment)) => fragment,
        None => input,
    };
    let payload = fragment.strip_prefix("?=&").unwrap_or(fragment);
    if payload.is_empty() { None } else { Some(payload) }
}

/// Which window relation the far side should message back through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    /// The surface is a popup; we are its `opener`.
    Opener,
    /// The surface is an iframe; we are its `parent`.
    Parent,
}

impl Relation {
    pub fn as_str(self) -> &'static str {
        match self {
            Relation::Opener => "opener",
            Relation::Parent => "parent",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "opener" => Some(Relation::Opener),
            "parent" => Some(Relation::Parent),
            _ => None,
        }
    }
}

/// The decoded result of a call, tagged instead of sentinel-encoded.
/// An explicit empty string, `false`, or `0` from the far side is a
/// real [`CallOutcome::Resolved`] value, distinct from cancellation.
#[derive(Clone, Debug, PartialEq)]
pub enum CallOutcome {
    Resolved(serde_json::Value),
    Cancelled,
}

impl CallOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CallOutcome::Cancelled)
    }

    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            CallOutcome::Resolved(value) => Some(value),
            CallOutcome::Cancelled => None,
        }
    }
}

/// Typed envelope for one incoming transport message. Reserved fields
/// are lifted out of the bag; method-specific fields (`result`,
/// `session`, `type`, `height`, …) stay in `params`.
#[derive(Clone, Debug)]
pub struct XdMessage {
    /// Correlation id of the handler this message is addressed to.
    pub cb: String,
    /// Surface id; usually equal to `cb` for dialog calls.
    pub frame: Option<String>,
    /// Origin tag echoed back by the far side.
    pub origin: Option<String>,
    pub relation: Option<Relation>,
    pub params: ParamBag,
}

impl XdMessage {
    /// Parse a raw transport payload. Returns `None` when the payload
    /// carries no correlation id, which makes it undeliverable.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::from_params(decode(raw))
    }

    pub fn from_params(mut params: ParamBag) -> Option<Self> {
        let cb = params.remove("cb")?;
        let frame = params.remove("frame");
        let origin = params.remove("origin");
        let relation = params
            .remove("relation")
            .and_then(|name| Relation::from_name(&name));
        Some(Self {
            cb,
            frame,
            origin,
            relation,
            params,
        })
    }

    /// Synthesized resolution for a surface the user closed directly:
    /// just the surface id, no result, which decodes to `Cancelled`.
    pub fn cancellation(surface_id: &str) -> Self {
        Self {
            cb: surface_id.to_owned(),
            frame: Some(surface_id.to_owned()),
            origin: None,
            relation: None,
            params: ParamBag::new(),
        }
    }

    /// Surface this message refers to, falling back to the correlation
    /// id when the far side omitted `frame`.
    pub fn surface_id(&self) -> &str {
        self.frame.as_deref().unwrap_or(&self.cb)
    }

    /// Decode the `result` field into the tagged outcome. The literal
    /// sentinel (raw or JSON-quoted) and an absent field both mean
    /// cancellation; anything else is parsed as JSON. A result that
    /// fails to parse is treated as absent.
    pub fn result_outcome(&self) -> CallOutcome {
        let Some(raw) = self.params.get("result") else {
            return CallOutcome::Cancelled;
        };
        if raw == RESULT_SENTINEL {
            return CallOutcome::Cancelled;
        }
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::String(text)) if text == RESULT_SENTINEL => {
                CallOutcome::Cancelled
            },
            Ok(value) => CallOutcome::Resolved(value),
            Err(err) => {
                warn!("discarding unparseable result field for {}: {err}", self.cb);
                CallOutcome::Cancelled
            },
        }
    }
}

/// Append the result placeholder to a handler URL. The platform
/// substitutes the real JSON result for the token when redirecting; a
/// template left unfilled therefore decodes to cancellation.
pub(crate) fn with_result_token(handler_url: &str) -> String {
    format!("{handler_url}&result={RESULT_SENTINEL}")
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn bag(pairs: &[(&str, &str)]) -> ParamBag {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn encode_sorts_keys_and_escapes_values() {
        let params = bag(&[("zeta", "a&b=c"), ("alpha", "one two")]);
        assert_eq!(encode(&params), "alpha=one%20two&zeta=a%26b%3Dc");
    }

    #[test]
    fn encode_raw_leaves_reserved_bytes_alone() {
        let params = bag(&[("sig_base", "a b&c")]);
        assert_eq!(encode_raw(&params), "sig_base=a b&c");
    }

    #[test]
    fn decode_skips_empty_keys_and_splits_on_first_equals() {
        let params = decode("=orphan&a=1%3D2&&b=");
        assert_eq!(params.len(), 2);
        assert_eq!(params["a"], "1=2");
        assert_eq!(params["b"], "");
    }

    #[test]
    fn fragment_payload_strips_url_and_legacy_prefix() {
        assert_eq!(
            fragment_payload("https://p.example/xd_proxy.html#?=&cb=abc"),
            Some("cb=abc")
        );
        assert_eq!(fragment_payload("cb=abc&frame=abc"), Some("cb=abc&frame=abc"));
        assert_eq!(fragment_payload("https://p.example/page#"), None);
    }

    #[test]
    fn parse_lifts_reserved_fields_and_keeps_the_rest() {
        let msg = XdMessage::parse("cb=f1&frame=f1&origin=o%2F1&relation=opener&session=s9")
            .expect("cb present");
        assert_eq!(msg.cb, "f1");
        assert_eq!(msg.frame.as_deref(), Some("f1"));
        assert_eq!(msg.origin.as_deref(), Some("o/1"));
        assert_eq!(msg.relation, Some(Relation::Opener));
        assert_eq!(msg.params.get("session").map(String::as_str), Some("s9"));
    }

    #[test]
    fn parse_without_correlation_id_is_rejected() {
        assert!(XdMessage::parse("frame=f1&result=1").is_none());
    }

    #[test]
    fn sentinel_results_decode_to_cancelled() {
        let raw = XdMessage::parse("cb=a&result=xxRESULTTOKENxx").unwrap();
        assert_eq!(raw.result_outcome(), CallOutcome::Cancelled);

        // JSON-quoted sentinel, as produced when the redirect template
        // is percent-encoded and quoted by the far side.
        let quoted = XdMessage::parse("cb=a&result=%22xxRESULTTOKENxx%22").unwrap();
        assert_eq!(quoted.result_outcome(), CallOutcome::Cancelled);

        let absent = XdMessage::parse("cb=a").unwrap();
        assert_eq!(absent.result_outcome(), CallOutcome::Cancelled);
    }

    #[test]
    fn falsy_real_results_are_distinct_from_cancellation() {
        for (raw, expected) in [
            ("cb=a&result=%22%22", json!("")),
            ("cb=a&result=false", json!(false)),
            ("cb=a&result=0", json!(0)),
        ] {
            let msg = XdMessage::parse(raw).unwrap();
            assert_eq!(msg.result_outcome(), CallOutcome::Resolved(expected));
        }
    }

    #[test]
    fn json_results_parse_into_values() {
        let msg = XdMessage::parse("cb=a&result=%7B%22ok%22%3Atrue%7D").unwrap();
        assert_eq!(msg.result_outcome(), CallOutcome::Resolved(json!({"ok": true})));
    }

    #[test]
    fn unparseable_result_is_treated_as_absent() {
        let msg = XdMessage::parse("cb=a&result=not-json").unwrap();
        assert_eq!(msg.result_outcome(), CallOutcome::Cancelled);
    }

    #[test]
    fn result_token_appends_to_a_handler_url() {
        let url = with_result_token("https://p.example/xd_proxy.html#?=&cb=f1");
        assert!(url.ends_with("&result=xxRESULTTOKENxx"));
    }

    proptest! {
        #[test]
        fn round_trip_reproduces_the_bag(
            params in proptest::collection::btree_map(
                "[a-zA-Z][a-zA-Z0-9_]{0,11}",
                ".*",
                0..8,
            )
        ) {
            let encoded = encode(&params);
            prop_assert_eq!(decode(&encoded), params);
        }
    }
}
