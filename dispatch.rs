/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Call-preparation decisions, kept as pure functions so the policies
//! (presentation mode, GET/POST strategy) are testable without a
//! session.

use log::debug;
use url::Url;

use crate::codec::{self, ParamBag};
use crate::methods::UiMethod;

/// How a dialog is presented to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Display {
    /// A separate popup window.
    Popup,
    /// A visible in-page iframe.
    Dialog,
    /// A hidden iframe; fire-and-forget surfaces.
    Hidden,
}

impl Display {
    pub fn as_str(self) -> &'static str {
        match self {
            Display::Popup => "popup",
            Display::Dialog => "dialog",
            Display::Hidden => "hidden",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "popup" => Some(Display::Popup),
            "dialog" => Some(Display::Dialog),
            "hidden" => Some(Display::Hidden),
            _ => None,
        }
    }

    pub fn is_iframe(self) -> bool {
        matches!(self, Display::Dialog | Display::Hidden)
    }
}

/// Pick the presentation for a call. Authenticated users get an in-page
/// dialog by default; without a session the default is a popup, and an
/// iframe request is downgraded to a popup unless the method explicitly
/// permits logged-out iframe use.
pub(crate) fn resolve_display(
    requested: Option<Display>,
    has_session: bool,
    method: &UiMethod,
) -> Display {
    let display = requested.unwrap_or(if has_session {
        Display::Dialog
    } else {
        Display::Popup
    });
    if display.is_iframe() && !has_session && !method.logged_out_iframe {
        debug!("downgrading {} presentation to popup: no session", display.as_str());
        return Display::Popup;
    }
    display
}

/// How the parameters travel to the dialog page.
pub(crate) enum Delivery {
    Get(Url),
    /// The encoded URL blew the GET byte budget: parameters go in a
    /// hidden form POSTed at the pre-opened surface instead.
    Post {
        action: Url,
        fields: Vec<(String, String)>,
    },
}

pub(crate) fn choose_delivery(base: &Url, params: &ParamBag, max_get_url_bytes: usize) -> Delivery {
    let mut url = base.clone();
    url.set_query(Some(&codec::encode(params)));
    if url.as_str().len() > max_get_url_bytes {
        debug!(
            "encoded URL is {} bytes, over the {} byte budget: switching to POST",
            url.as_str().len(),
            max_get_url_bytes
        );
        return Delivery::Post {
            action: base.clone(),
            fields: params
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        };
    }
    Delivery::Get(url)
}
