/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Correlation registry: opaque call ids mapped to pending callbacks.
//!
//! This is the substrate every transport delivers into. One-shot
//! entries are consumed by their first delivery; "forever" entries
//! (channel handlers for resize and session signals) survive until the
//! surface that owns them is torn down.

use std::collections::HashMap;

use log::debug;
use uuid::Uuid;

use crate::codec::XdMessage;

pub type HandlerFn = Box<dyn FnMut(XdMessage)>;

/// Fresh opaque correlation id. Doubles as the window/iframe name of
/// the surface backing the call, so it must stay a plain identifier.
pub(crate) fn new_correlation_id() -> String {
    format!("f{}", Uuid::new_v4().simple())
}

pub struct RegisteredHandler {
    callback: HandlerFn,
    forever: bool,
}

impl RegisteredHandler {
    pub fn forever(&self) -> bool {
        self.forever
    }

    pub fn invoke(&mut self, message: XdMessage) {
        (self.callback)(message);
    }
}

#[derive(Default)]
pub struct CorrelationRegistry {
    entries: HashMap<String, RegisteredHandler>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a callback under a fresh id and return the id. The entry is
    /// in place before this returns, so a handler URL minted from the id
    /// can never race its own registration.
    pub fn register(&mut self, callback: HandlerFn, forever: bool) -> String {
        let id = new_correlation_id();
        self.entries
            .insert(id.clone(), RegisteredHandler { callback, forever });
        id
    }

    /// Deliver a message to the handler registered under `id`. Unknown
    /// ids are a no-op: the call may already be resolved, or the data
    /// may be garbage from an untrusted surface. Either way we drop it
    /// rather than fail.
    ///
    /// The entry is removed before the callback runs, so the callback
    /// may synchronously re-enter the registry. A forever entry is put
    /// back afterwards unless the callback replaced it.
    pub fn deliver(&mut self, id: &str, message: XdMessage) -> bool {
        let Some(mut handler) = self.take(id) else {
            debug!("dropping message for unknown correlation id {id}");
            return false;
        };
        handler.invoke(message);
        if handler.forever {
            self.restore(id, handler);
        }
        true
    }

    /// Detach the handler for `id`. Callers that hold the registry
    /// behind a `RefCell` use `take`/`restore` around the callback
    /// invocation instead of [`deliver`], so the cell is not borrowed
    /// while the callback re-enters the session.
    ///
    /// [`deliver`]: CorrelationRegistry::deliver
    pub fn take(&mut self, id: &str) -> Option<RegisteredHandler> {
        self.entries.remove(id)
    }

    /// Re-attach a forever handler after invocation, unless the
    /// callback registered a replacement in the meantime.
    pub fn restore(&mut self, id: &str, handler: RegisteredHandler) {
        self.entries.entry(id.to_owned()).or_insert(handler);
    }

    /// Drop an entry without invoking it. Used when the owning surface
    /// is torn down.
    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::rc::Rc;

    use super::*;

    fn counter_handler(hits: &Rc<RefCell<Vec<String>>>, tag: &str) -> HandlerFn {
        let hits = hits.clone();
        let tag = tag.to_owned();
        Box::new(move |_msg| hits.borrow_mut().push(tag.clone()))
    }

    #[test]
    fn registered_ids_are_pairwise_distinct() {
        let mut registry = CorrelationRegistry::new();
        let mut seen = HashSet::new();
        for _ in 0..256 {
            let id = registry.register(Box::new(|_| {}), false);
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn one_shot_delivery_fires_at_most_once() {
        let hits = Rc::new(RefCell::new(Vec::new()));
        let mut registry = CorrelationRegistry::new();
        let id = registry.register(counter_handler(&hits, "once"), false);

        assert!(registry.deliver(&id, XdMessage::cancellation(&id)));
        assert!(!registry.deliver(&id, XdMessage::cancellation(&id)));
        assert_eq!(hits.borrow().len(), 1);
        assert!(!registry.contains(&id));
    }

    #[test]
    fn forever_handler_survives_repeated_delivery_until_removed() {
        let hits = Rc::new(RefCell::new(Vec::new()));
        let mut registry = CorrelationRegistry::new();
        let id = registry.register(counter_handler(&hits, "channel"), true);

        for _ in 0..3 {
            assert!(registry.deliver(&id, XdMessage::cancellation(&id)));
        }
        assert_eq!(hits.borrow().len(), 3);
        assert!(registry.contains(&id));

        assert!(registry.remove(&id));
        assert!(!registry.deliver(&id, XdMessage::cancellation(&id)));
        assert_eq!(hits.borrow().len(), 3);
    }

    #[test]
    fn delivery_to_unknown_id_is_a_no_op() {
        let mut registry = CorrelationRegistry::new();
        assert!(!registry.deliver("nope", XdMessage::cancellation("nope")));
    }

    #[test]
    fn callback_may_register_during_its_own_delivery() {
        let registry = Rc::new(RefCell::new(CorrelationRegistry::new()));
        let nested_id = Rc::new(RefCell::new(None));

        let id = {
            let registry_ref = registry.clone();
            let nested_id = nested_id.clone();
            registry.borrow_mut().register(
                Box::new(move |_msg| {
                    let id = registry_ref.borrow_mut().register(Box::new(|_| {}), false);
                    *nested_id.borrow_mut() = Some(id);
                }),
                false,
            )
        };

        // Two-phase delivery: the cell must not stay borrowed while the
        // callback runs.
        let handler = registry.borrow_mut().take(&id);
        let mut handler = handler.expect("registered");
        handler.invoke(XdMessage::cancellation(&id));

        let nested = nested_id.borrow().clone().expect("nested registration");
        assert!(registry.borrow().contains(&nested));
    }
}
