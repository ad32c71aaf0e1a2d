//! Interpretation of the query parameters the backend appends when it sends
//! the browser back after an authorization round-trip.

use std::str::FromStr;

use shared::domain::Platform;
use url::Url;

const SUCCESS_PARAM: &str = "oauth_success";
const ERROR_PARAM: &str = "oauth_error";
const PLATFORM_PARAM: &str = "platform";
const LEGACY_ERROR_PARAM: &str = "error";
const LEGACY_ERROR_DESCRIPTION_PARAM: &str = "error_description";
const LEGACY_CONNECTED_SUFFIX: &str = "_connected";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthCallback {
    Success {
        platform: Platform,
    },
    Error {
        code: String,
        /// Set when the backend named the platform explicitly.
        platform: Option<Platform>,
    },
}

impl OAuthCallback {
    /// Returns `None` when the URL carries no callback parameters.
    pub fn parse(url: &Url) -> Option<Self> {
        let param = |key: &str| {
            url.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(raw) = param(SUCCESS_PARAM) {
            return Some(match Platform::from_str(&raw) {
                Ok(platform) => OAuthCallback::Success { platform },
                Err(_) => OAuthCallback::Error {
                    code: "invalid_platform".into(),
                    platform: None,
                },
            });
        }

        let legacy_success = Platform::ALL.into_iter().find(|platform| {
            param(&format!("{platform}{LEGACY_CONNECTED_SUFFIX}"))
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        });
        if let Some(platform) = legacy_success {
            return Some(OAuthCallback::Success { platform });
        }

        let platform = param(PLATFORM_PARAM).and_then(|raw| Platform::from_str(&raw).ok());
        param(ERROR_PARAM)
            .or_else(|| param(LEGACY_ERROR_PARAM))
            .map(|code| OAuthCallback::Error { code, platform })
    }

    pub fn platform(&self) -> Option<Platform> {
        match self {
            OAuthCallback::Success { platform } => Some(*platform),
            OAuthCallback::Error { platform, .. } => *platform,
        }
    }

    /// Identity used to recognise the same callback arriving twice.
    pub fn fingerprint(&self) -> String {
        match self {
            OAuthCallback::Success { platform } => format!("success:{platform}"),
            OAuthCallback::Error { code, platform } => match platform {
                Some(platform) => format!("error:{code}:{platform}"),
                None => format!("error:{code}"),
            },
        }
    }
}

/// Picks the platform an error belongs to: a platform name embedded in the
/// code wins, otherwise the last platform the user tried to connect.
pub fn attribute_platform(code: &str, last_attempted: Option<Platform>) -> Option<Platform> {
    let lowered = code.to_ascii_lowercase();
    Platform::ALL
        .into_iter()
        .find(|platform| lowered.contains(platform.as_str()))
        .or(last_attempted)
}

fn is_callback_param(key: &str) -> bool {
    matches!(
        key,
        SUCCESS_PARAM | ERROR_PARAM | PLATFORM_PARAM | LEGACY_ERROR_PARAM | LEGACY_ERROR_DESCRIPTION_PARAM
    ) || key
        .strip_suffix(LEGACY_CONNECTED_SUFFIX)
        .is_some_and(|name| Platform::from_str(name).is_ok())
}

/// The URL with every callback parameter removed so a reload does not replay
/// the callback. Unrelated parameters are kept in order.
pub fn strip_callback_params(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_callback_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

#[cfg(test)]
#[path = "tests/callback_tests.rs"]
mod tests;
