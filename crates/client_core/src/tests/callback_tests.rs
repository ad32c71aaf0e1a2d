use super::*;

fn url(raw: &str) -> Url {
    Url::parse(raw).expect("url")
}

#[test]
fn parses_success_and_error_params() {
    assert_eq!(
        OAuthCallback::parse(&url("http://app.test/accounts?oauth_success=linkedin")),
        Some(OAuthCallback::Success {
            platform: Platform::Linkedin
        })
    );
    assert_eq!(
        OAuthCallback::parse(&url(
            "http://app.test/accounts?oauth_error=csrf_check_failed&platform=facebook"
        )),
        Some(OAuthCallback::Error {
            code: "csrf_check_failed".into(),
            platform: Some(Platform::Facebook),
        })
    );
    assert_eq!(OAuthCallback::parse(&url("http://app.test/accounts?tab=2")), None);
}

#[test]
fn parses_legacy_variants() {
    assert_eq!(
        OAuthCallback::parse(&url("http://app.test/settings?tiktok_connected=true")),
        Some(OAuthCallback::Success {
            platform: Platform::Tiktok
        })
    );
    assert_eq!(
        OAuthCallback::parse(&url("http://app.test/settings?error=token_exchange_failed")),
        Some(OAuthCallback::Error {
            code: "token_exchange_failed".into(),
            platform: None,
        })
    );
    assert_eq!(
        OAuthCallback::parse(&url("http://app.test/settings?twitter_connected=false")),
        None
    );
}

#[test]
fn unknown_success_platform_becomes_error() {
    assert_eq!(
        OAuthCallback::parse(&url("http://app.test/accounts?oauth_success=myspace")),
        Some(OAuthCallback::Error {
            code: "invalid_platform".into(),
            platform: None,
        })
    );
}

#[test]
fn attribution_prefers_code_then_last_attempt() {
    assert_eq!(
        attribute_platform("instagram_no_business_account", Some(Platform::Twitter)),
        Some(Platform::Instagram)
    );
    assert_eq!(
        attribute_platform("user_denied", Some(Platform::Twitter)),
        Some(Platform::Twitter)
    );
    assert_eq!(attribute_platform("user_denied", None), None);
}

#[test]
fn strip_removes_only_callback_params() {
    let stripped = strip_callback_params(&url(
        "http://app.test/accounts?tab=social&oauth_error=user_denied&platform=youtube&youtube_connected=true",
    ));
    assert_eq!(stripped.as_str(), "http://app.test/accounts?tab=social");

    let stripped = strip_callback_params(&url("http://app.test/accounts?oauth_success=twitter"));
    assert_eq!(stripped.as_str(), "http://app.test/accounts");
    assert!(OAuthCallback::parse(&stripped).is_none());
}

#[test]
fn fingerprint_distinguishes_outcomes() {
    let success = OAuthCallback::Success {
        platform: Platform::Linkedin,
    };
    let failure = OAuthCallback::Error {
        code: "user_denied".into(),
        platform: Some(Platform::Linkedin),
    };
    assert_ne!(success.fingerprint(), failure.fingerprint());
    assert_eq!(success.fingerprint(), success.clone().fingerprint());
}
