//! User-facing text for OAuth error codes returned by the backend.

pub const GENERIC_FAILURE: &str = "Connection failed. Please try again.";
pub const CONNECTION_TIMED_OUT: &str = "Connection timed out. Please try again.";

const NO_WORKSPACE: &str = "No workspace selected. Choose a workspace and try again.";
const WORKSPACE_NOT_FOUND: &str =
    "This workspace could not be found. Refresh the page and try again.";
const WORKSPACE_FORBIDDEN: &str =
    "You don't have permission to manage connections for this workspace.";

const MESSAGES: &[(&str, &str)] = &[
    (
        "oauth_unauthorized",
        "This platform is not configured for your workspace yet. Contact your administrator.",
    ),
    ("no_workspace", NO_WORKSPACE),
    ("workspace_not_found", WORKSPACE_NOT_FOUND),
    ("workspace_forbidden", WORKSPACE_FORBIDDEN),
    (
        "user_denied",
        "Authorization was cancelled. Approve the requested permissions to connect.",
    ),
    (
        "access_denied",
        "Authorization was cancelled. Approve the requested permissions to connect.",
    ),
    (
        "csrf_check_failed",
        "Security check failed. Please try connecting again.",
    ),
    (
        "state_expired",
        "The authorization link has expired. Please try again.",
    ),
    (
        "token_exchange_failed",
        "Could not complete the connection with the platform. Please try again.",
    ),
    (
        "missing_code",
        "The platform did not return an authorization code. Please try again.",
    ),
    (
        "oauth_provider_error",
        "The platform reported an error during authorization. Please try again.",
    ),
    (
        "no_pages_found",
        "No Facebook Pages were found. Create a Page or make sure you manage one, then try again.",
    ),
    (
        "no_instagram_account",
        "No Instagram Business account is linked to your Facebook Pages.",
    ),
    (
        "insufficient_permissions",
        "Required permissions were not granted. Please approve all requested permissions.",
    ),
    ("invalid_platform", "This platform is not supported."),
    (
        "account_already_connected",
        "This account is already connected to another workspace.",
    ),
    (
        "credential_save_failed",
        "The account was authorized but could not be saved. Please try again.",
    ),
    (
        "rate_limited",
        "Too many connection attempts. Please wait a moment and try again.",
    ),
    (
        "session_expired",
        "Your session has expired. Please sign in again.",
    ),
    ("connection_timeout", CONNECTION_TIMED_OUT),
    (
        "server_error",
        "Something went wrong on our side. Please try again.",
    ),
];

/// Maps a backend error code to a message. Unknown codes fall back to
/// [`GENERIC_FAILURE`]; the raw code is never shown.
pub fn oauth_error_message(code: &str) -> &'static str {
    let normalized = code.trim().to_ascii_lowercase();
    if let Some((_, message)) = MESSAGES.iter().find(|(known, _)| *known == normalized) {
        return message;
    }

    if normalized.contains("workspace") {
        if normalized.contains("not found") || normalized.contains("not_found") {
            return WORKSPACE_NOT_FOUND;
        }
        if normalized.contains("permission") || normalized.contains("access") {
            return WORKSPACE_FORBIDDEN;
        }
        return NO_WORKSPACE;
    }

    GENERIC_FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_specific_messages() {
        assert_eq!(
            oauth_error_message("csrf_check_failed"),
            "Security check failed. Please try connecting again."
        );
        assert_eq!(oauth_error_message(" USER_DENIED "), oauth_error_message("user_denied"));
        assert_ne!(oauth_error_message("no_pages_found"), GENERIC_FAILURE);
        assert!(MESSAGES.len() >= 20);
    }

    #[test]
    fn workspace_phrases_fall_back_by_substring() {
        assert_eq!(oauth_error_message("Workspace not found"), WORKSPACE_NOT_FOUND);
        assert_eq!(oauth_error_message("workspace_forbidden"), WORKSPACE_FORBIDDEN);
        assert_eq!(
            oauth_error_message("no access to workspace 12"),
            WORKSPACE_FORBIDDEN
        );
        assert_eq!(oauth_error_message("missing workspace id"), NO_WORKSPACE);
    }

    #[test]
    fn unknown_codes_use_generic_message() {
        assert_eq!(oauth_error_message("xyz_unknown"), GENERIC_FAILURE);
        assert_eq!(oauth_error_message(""), GENERIC_FAILURE);
        assert!(!oauth_error_message("xyz_unknown").contains("xyz_unknown"));
    }
}
