// Property: access policy ordering
//
// A bot user agent is denied whatever else the request carries, and an
// image-tag request with a same-site referer is allowed for any other user
// agent.

use edge_shield::config::PolicyConfig;
use edge_shield::{
    AccessPolicy, Decision, DecisionReason, EdgeRequest, RequestMode, ResourceKind, SessionToken,
    TokenValidator,
};
use proptest::prelude::*;
use std::sync::Arc;

const NOW: u64 = 1_700_000_000_000;
const SITE: &str = "https://www.abphotostudio.in";

fn policy() -> AccessPolicy {
    let config = PolicyConfig {
        serving_origin: Some(SITE.to_string()),
        allowed_origins: vec!["https://abphotostudio.in".to_string()],
        ..PolicyConfig::default()
    };
    AccessPolicy::new(Arc::new(config), TokenValidator::default())
}

fn signature_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("curl"),
        Just("Wget"),
        Just("python-requests"),
        Just("Scrapy"),
        Just("PostmanRuntime"),
        Just("Googlebot"),
        Just("crawler"),
        Just("spider"),
    ]
}

fn mode_strategy() -> impl Strategy<Value = RequestMode> {
    prop_oneof![
        Just(RequestMode::Navigate),
        Just(RequestMode::NoCors),
        Just(RequestMode::Cors),
        Just(RequestMode::SameOrigin),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Bot denial has priority over every allow path
    #[test]
    fn prop_bot_denied_with_full_credentials(
        prefix in "[A-Za-z/ .0-9]{0,12}",
        signature in signature_strategy(),
        suffix in "[A-Za-z/ .0-9]{0,12}",
        mode in mode_strategy(),
        image in any::<bool>(),
    ) {
        let user_agent = format!("{}{}{}", prefix, signature, suffix);
        let destination = if image { ResourceKind::Image } else { ResourceKind::Empty };
        let request = EdgeRequest::get(format!("{}/images/a.jpg", SITE))
            .with_destination(destination)
            .with_mode(mode)
            .with_header("user-agent", &user_agent)
            .with_header("referer", "https://www.abphotostudio.in/gallery")
            .with_header("x-image-auth", "authenticated")
            .with_header("x-protected-image", "true")
            .with_header("x-session-token", &SessionToken::mint(NOW, "n0nce"));

        let decision = policy().decide(&request, NOW);
        prop_assert_eq!(decision.decision, Decision::Deny);
        prop_assert_eq!(decision.reason, DecisionReason::BotUserAgent);
    }

    /// In-page image loads from the site itself are allowed
    #[test]
    fn prop_same_site_image_tag_allowed(
        page in "[a-z]{1,12}",
        version in 60u32..130u32,
    ) {
        let request = EdgeRequest::get(format!("{}/images/{}.jpg", SITE, page))
            .with_destination(ResourceKind::Image)
            .with_mode(RequestMode::NoCors)
            .with_header("user-agent", &format!("Mozilla/5.0 Firefox/{}.0", version))
            .with_header("referer", &format!("{}/{}", SITE, page));

        let decision = policy().decide(&request, NOW);
        prop_assert_eq!(decision.decision, Decision::Allow);
        prop_assert_eq!(decision.reason, DecisionReason::ImageTagReferer);
    }

    /// Foreign referers never unlock an image
    #[test]
    fn prop_foreign_referer_denied(host in "[a-z]{3,10}\\.(com|net|org)") {
        prop_assume!(!host.contains("localhost"));
        let request = EdgeRequest::get(format!("{}/images/a.jpg", SITE))
            .with_destination(ResourceKind::Image)
            .with_header("referer", &format!("https://{}/page", host));

        prop_assert_eq!(policy().decide(&request, NOW).decision, Decision::Deny);
    }
}
