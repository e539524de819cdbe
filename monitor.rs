/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Close detection for popups carrying a default callback.
//!
//! A script cannot subscribe to close events on a popup it does not
//! fully control, so the monitor polls the tracked windows' `closed`
//! state on a fixed cadence. Harvested ids are routed through the same
//! delivery path as real responses, so a user slamming the window shut
//! through OS chrome still resolves the call exactly once.

use std::collections::BTreeSet;
use std::time::Duration;

use log::debug;

use framebridge_host::AccessDenied;

use crate::frames::SurfaceManager;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MonitorState {
    Idle,
    Monitoring,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProbeOutcome {
    Closed,
    Open,
    /// The probe was denied (cross-origin). Assume still open.
    Inconclusive,
    /// Not a tracked popup any more; stop watching it.
    Gone,
}

fn classify_probe(probe: Option<Result<bool, AccessDenied>>) -> ProbeOutcome {
    match probe {
        None => ProbeOutcome::Gone,
        Some(Err(AccessDenied)) => ProbeOutcome::Inconclusive,
        Some(Ok(true)) => ProbeOutcome::Closed,
        Some(Ok(false)) => ProbeOutcome::Open,
    }
}

pub(crate) struct CloseMonitor {
    interval: Duration,
    watched: BTreeSet<String>,
    last_poll: Option<Duration>,
}

impl CloseMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            watched: BTreeSet::new(),
            last_poll: None,
        }
    }

    /// Start watching a popup id whose call has a default callback.
    pub fn watch(&mut self, id: &str) {
        self.watched.insert(id.to_owned());
    }

    pub fn unwatch(&mut self, id: &str) {
        self.watched.remove(id);
    }

    pub fn state(&self) -> MonitorState {
        if self.watched.is_empty() {
            MonitorState::Idle
        } else {
            MonitorState::Monitoring
        }
    }

    /// Probe the watched popups if the poll interval has elapsed and
    /// return the ids whose windows report closed. Each id is returned
    /// at most once; the caller resolves them through the normal
    /// delivery path. Safe to call with nothing watched; the monitor
    /// self-resets to idle.
    pub fn poll(&mut self, surfaces: &SurfaceManager, now: Duration) -> Vec<String> {
        if self.watched.is_empty() {
            self.last_poll = None;
            return Vec::new();
        }
        if let Some(last) = self.last_poll
            && now.saturating_sub(last) < self.interval
        {
            return Vec::new();
        }
        self.last_poll = Some(now);

        let mut closed = Vec::new();
        let mut stale = Vec::new();
        for id in &self.watched {
            match classify_probe(surfaces.probe_popup_closed(id)) {
                ProbeOutcome::Closed => closed.push(id.clone()),
                ProbeOutcome::Open | ProbeOutcome::Inconclusive => {},
                ProbeOutcome::Gone => stale.push(id.clone()),
            }
        }
        for id in stale {
            debug!("unwatching {id}: no longer a tracked popup");
            self.watched.remove(&id);
        }
        for id in &closed {
            self.watched.remove(id);
        }
        closed
    }
}
