use super::*;

use lattice_protocol::protocol::{BackendState, NodeSummary};

#[test]
fn server_code_normalization() {
    assert_eq!(normalize_server_code("NOUPDATE"), None);
    assert_eq!(
        normalize_server_code(""),
        Some(DEFAULT_CONTROL_URL.to_string())
    );
    assert_eq!(
        normalize_server_code("https://ctrl.corp.example"),
        Some("https://ctrl.corp.example".to_string())
    );
    assert_eq!(
        normalize_server_code("http://10.1.2.3:8080"),
        Some("http://10.1.2.3:8080".to_string())
    );
    // bare host is assumed to be https
    assert_eq!(
        normalize_server_code("ctrl.corp.example"),
        Some("https://ctrl.corp.example".to_string())
    );
}

#[test]
fn routes_parse_and_widen() {
    let routes = calc_advertise_routes(" 10.0.0.0/8 , 192.168.1.77 ,, fd7a::/48 ", false).unwrap();
    assert_eq!(
        routes,
        vec![
            "10.0.0.0/8".parse::<IpNet>().unwrap(),
            "192.168.1.77/32".parse::<IpNet>().unwrap(),
            "fd7a::/48".parse::<IpNet>().unwrap(),
        ]
    );
}

#[test]
fn empty_routes_with_exit_node_yields_default_routes() {
    let routes = calc_advertise_routes("", true).unwrap();
    assert_eq!(
        routes,
        vec![
            "0.0.0.0/0".parse::<IpNet>().unwrap(),
            "::/0".parse::<IpNet>().unwrap(),
        ]
    );

    assert!(calc_advertise_routes("", false).unwrap().is_empty());
}

#[test]
fn bad_routes_are_rejected() {
    let err = calc_advertise_routes("10.0.0.0/8,not-a-route", false).unwrap_err();
    assert_eq!(err.route, "not-a-route");

    let err = calc_advertise_routes("10.0.0.1/8", false).unwrap_err();
    assert_eq!(err.route, "10.0.0.1/8");
    assert_eq!(err.reason, "non-zero host bits");
}

#[test]
fn state_view_folds_exit_routes() {
    let status = Status {
        backend_state: BackendState::Running,
        self_node: Some(NodeSummary {
            dns_name: "nas-box.example.lattice.net.".into(),
            ..Default::default()
        }),
        lattice_ips: vec!["100.64.0.7".parse().unwrap()],
        version: "1.44.0-t1234".into(),
        ..Default::default()
    };
    let prefs = Prefs {
        advertise_routes: vec![
            "0.0.0.0/0".parse().unwrap(),
            "10.0.0.0/8".parse().unwrap(),
            "::/0".parse().unwrap(),
            "192.168.0.0/24".parse().unwrap(),
        ],
        ..Default::default()
    };

    let view = state_view(&status, &prefs, "operator1");
    assert_eq!(view.status, "Running");
    assert_eq!(view.device_name, "nas-box");
    assert_eq!(view.ip, "100.64.0.7");
    assert_eq!(view.version, "1.44.0");
    assert!(view.advertise_exit_node);
    assert_eq!(view.advertise_routes, "10.0.0.0/8,192.168.0.0/24");
    assert_eq!(view.operator, "operator1");
    assert_eq!(view.auth_url, None);
}

#[test]
fn form_token_requires_form_content_type() {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        "application/x-www-form-urlencoded".parse().unwrap(),
    );
    assert_eq!(
        form_syno_token(&headers, b"a=1&SynoToken=tok99&b=2"),
        Some("tok99".to_string())
    );
    assert_eq!(form_syno_token(&headers, b"a=1&b=2"), None);

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
    assert_eq!(form_syno_token(&headers, b"SynoToken=tok99"), None);

    // no content type at all
    assert_eq!(form_syno_token(&HeaderMap::new(), b"SynoToken=tok99"), None);
}

#[test]
fn posted_data_accepts_sparse_bodies() {
    let posted: PostedData = serde_json::from_str(r#"{"forceLogout": true}"#).unwrap();
    assert!(posted.force_logout);
    assert!(!posted.reauthenticate);
    assert_eq!(posted.server_code, "");

    let posted: PostedData = serde_json::from_str(
        r#"{"serverCode": "ctrl.corp.example", "advertiseRoutes": "10.0.0.0/8", "advertiseExitNode": true}"#,
    )
    .unwrap();
    assert_eq!(posted.server_code, "ctrl.corp.example");
    assert!(posted.advertise_exit_node);
}
