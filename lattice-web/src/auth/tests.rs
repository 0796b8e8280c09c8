use super::*;

fn uri(s: &str) -> Uri {
    s.parse().unwrap()
}

#[test]
fn cookies_parse_across_headers() {
    let mut headers = HeaderMap::new();
    headers.append(header::COOKIE, "NAS_USER=admin; qtoken=tok123".parse().unwrap());
    headers.append(header::COOKIE, "NAS_SID=sid456".parse().unwrap());

    let cookies = parse_cookies(&headers);
    assert_eq!(cookies.get("NAS_USER").unwrap(), "admin");
    assert_eq!(cookies.get("qtoken").unwrap(), "tok123");
    assert_eq!(cookies.get("NAS_SID").unwrap(), "sid456");
    assert!(!cookies.contains_key("missing"));
}

#[test]
fn login_url_prefers_request_authority() {
    let headers = HeaderMap::new();
    assert_eq!(
        login_url(&uri("https://nas.local:8443/some/page"), &headers),
        "https://nas.local:8443/cgi-bin/authLogin.cgi"
    );
}

#[test]
fn login_url_falls_back_to_host_header() {
    let mut headers = HeaderMap::new();
    headers.insert(header::HOST, "nas.local:8080".parse().unwrap());
    assert_eq!(
        login_url(&uri("/"), &headers),
        "http://nas.local:8080/cgi-bin/authLogin.cgi"
    );
}

#[test]
fn login_url_falls_back_to_localhost() {
    let headers = HeaderMap::new();
    assert_eq!(
        login_url(&uri("/"), &headers),
        "http://localhost/cgi-bin/authLogin.cgi"
    );
}

#[test]
fn session_query_prefers_qtoken_over_sid() {
    let mut cookies = HashMap::new();
    cookies.insert("qtoken".to_string(), "tok123".to_string());
    cookies.insert("NAS_SID".to_string(), "sid456".to_string());
    assert_eq!(
        session_query(&cookies, "admin").unwrap(),
        vec![("qtoken", "tok123"), ("user", "admin")]
    );
}

#[test]
fn session_query_falls_back_to_sid() {
    let mut cookies = HashMap::new();
    cookies.insert("NAS_SID".to_string(), "sid456".to_string());
    assert_eq!(
        session_query(&cookies, "admin").unwrap(),
        vec![("sid", "sid456")]
    );
}

#[test]
fn session_query_without_credentials_is_unauthorized() {
    let mut cookies = HashMap::new();
    cookies.insert("NAS_USER".to_string(), "admin".to_string());
    assert!(matches!(
        session_query(&cookies, "admin"),
        Err(AuthError::Unauthorized(_))
    ));
}

#[test]
fn login_verdict_decodes_platform_xml() {
    let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<QDocRoot version="1.0">
    <authPassed>1</authPassed>
    <isAdmin>1</isAdmin>
    <authSid>5f2d9b1c</authSid>
    <errorValue>0</errorValue>
</QDocRoot>"#;
    let verdict = decode_login_verdict(body).unwrap();
    assert_eq!(verdict.auth_passed, 1);
    assert_eq!(verdict.is_admin, 1);
    assert_eq!(verdict.error_value, 0);
}

#[test]
fn login_verdict_defaults_missing_fields_to_denied() {
    let verdict = decode_login_verdict("<QDocRoot><errorValue>3</errorValue></QDocRoot>").unwrap();
    assert_eq!(verdict.auth_passed, 0);
    assert_eq!(verdict.is_admin, 0);
    assert_eq!(verdict.error_value, 3);
}

#[test]
fn garbage_login_response_is_unauthorized() {
    match decode_login_verdict("not xml at all <<<") {
        Err(AuthError::Unauthorized(_)) => {}
        other => panic!("expected Unauthorized, got {other:?}"),
    }
}

#[test]
fn bootstrap_only_applies_to_syno_gate() {
    let gate = AuthGate::Open;
    assert!(gate
        .token_bootstrap(&HeaderMap::new(), &uri("/"), None)
        .is_none());
}

#[test]
fn bootstrap_skipped_when_token_present() {
    let gate = AuthGate::SynoGroup(SynoGroupAuth::default());

    let mut headers = HeaderMap::new();
    headers.insert("X-Syno-Token", "tok".parse().unwrap());
    assert!(gate.token_bootstrap(&headers, &uri("/"), None).is_none());

    let headers = HeaderMap::new();
    assert!(gate
        .token_bootstrap(&headers, &uri("/?SynoToken=tok"), None)
        .is_none());
    assert!(gate
        .token_bootstrap(&headers, &uri("/"), Some("tok"))
        .is_none());
}

#[test]
fn bootstrap_emitted_when_no_token_anywhere() {
    let gate = AuthGate::SynoGroup(SynoGroupAuth::default());
    let page = gate
        .token_bootstrap(&HeaderMap::new(), &uri("/?other=1"), None)
        .expect("bootstrap page");
    assert!(page.0.contains("SynoToken"));

    // An empty token value does not count as a token
    assert!(gate
        .token_bootstrap(&HeaderMap::new(), &uri("/?SynoToken="), Some(""))
        .is_some());
}

#[cfg(unix)]
mod helper {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_helper(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("authenticate.cgi");
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn helper_output_becomes_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let helper = write_helper(tmp.path(), "#!/bin/sh\necho '  operator1  '\n");
        let gate = SynoGroupAuth::with_helper(helper, "administrators");
        assert_eq!(gate.authenticate().await.unwrap(), "operator1");
    }

    #[tokio::test]
    async fn failing_helper_is_unauthorized() {
        let tmp = tempfile::tempdir().unwrap();
        let helper = write_helper(tmp.path(), "#!/bin/sh\necho 'no session' >&2\nexit 1\n");
        let gate = SynoGroupAuth::with_helper(helper, "administrators");
        match gate.authenticate().await {
            Err(AuthError::Unauthorized(msg)) => assert!(msg.contains("no session")),
            other => panic!("expected Unauthorized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_helper_is_unauthorized() {
        let tmp = tempfile::tempdir().unwrap();
        let helper = write_helper(tmp.path(), "#!/bin/sh\nexit 0\n");
        let gate = SynoGroupAuth::with_helper(helper, "administrators");
        assert!(matches!(
            gate.authenticate().await,
            Err(AuthError::Unauthorized(_))
        ));
    }
}
