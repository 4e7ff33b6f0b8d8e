const JWT_SOURCE: &str = include_str!("../src/auth/jwt.rs");
const MIDDLEWARE_SOURCE: &str = include_str!("../src/auth/middleware.rs");
const WS_HANDLER_SOURCE: &str = include_str!("../src/ws/handler.rs");
const WS_MOD_SOURCE: &str = include_str!("../src/ws/mod.rs");

#[test]
fn access_tokens_require_a_strong_secret_and_expire() {
    assert!(
        JWT_SOURCE.contains("jwt secret must be at least 32 characters long"),
        "short signing secrets must be refused at startup"
    );
    assert!(JWT_SOURCE.contains("validation.validate_exp = true"));
    assert!(
        JWT_SOURCE.contains("rejects_expired_tokens"),
        "JWT unit coverage must reject expired access tokens"
    );
    assert!(JWT_SOURCE.contains("rejects_tampered_tokens"));
}

#[test]
fn websocket_upgrades_are_authenticated_before_the_handshake() {
    let auth_at = WS_HANDLER_SOURCE
        .find("authenticate_upgrade(")
        .expect("upgrade handler must authenticate the caller");
    let upgrade_at = WS_HANDLER_SOURCE
        .find(".on_upgrade(")
        .expect("upgrade handler must complete the handshake");
    assert!(auth_at < upgrade_at, "authentication must happen before the socket is upgraded");

    assert!(
        WS_HANDLER_SOURCE.contains("get_user_role("),
        "only room members may open a live session"
    );
    assert!(
        MIDDLEWARE_SOURCE.contains("upgrade_auth_prefers_query_token_over_header"),
        "browser clients pass the token as a query parameter"
    );
    assert!(
        WS_MOD_SOURCE.contains("upgrade_rejections_map_to_http_statuses"),
        "rejected upgrades must be covered end to end"
    );
}
