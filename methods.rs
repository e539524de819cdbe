/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! UI method registry.
//!
//! Supplied by the surrounding auth/UI modules rather than baked in
//! here: each logical dialog (login, publish, …) registers its platform
//! path, default popup size, and flags, and call preparation looks the
//! method up by name.

use std::collections::HashMap;

use crate::codec::ParamBag;
use crate::config::SdkConfig;

pub type ParamTransform = Box<dyn Fn(ParamBag, &SdkConfig) -> ParamBag>;

pub struct UiMethod {
    /// Dialog path under the platform base URL.
    pub path: String,
    /// Default popup size.
    pub width: u32,
    pub height: u32,
    /// Whether the method may render in an iframe for a user with no
    /// active session. Methods that require authentication context in
    /// the frame leave this false and get downgraded to a popup.
    pub logged_out_iframe: bool,
    /// Optional last-minute rewrite of the outgoing parameters.
    pub transform: Option<ParamTransform>,
}

impl UiMethod {
    pub fn new(path: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            width,
            height,
            logged_out_iframe: false,
            transform: None,
        }
    }

    pub fn allow_logged_out_iframe(mut self) -> Self {
        self.logged_out_iframe = true;
        self
    }

    pub fn with_transform(mut self, transform: ParamTransform) -> Self {
        self.transform = Some(transform);
        self
    }
}

#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, UiMethod>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method under a logical name. Returns `false` when the
    /// name was already taken (the existing entry is replaced).
    pub fn register(&mut self, name: impl Into<String>, method: UiMethod) -> bool {
        self.methods.insert(name.into(), method).is_none()
    }

    pub fn get(&self, name: &str) -> Option<&UiMethod> {
        self.methods.get(name)
    }
}
