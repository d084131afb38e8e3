//! Full updater ticks against scripted game and webhook servers.

mod common;

use rmpv::Value as Mp;
use serde_json::json;

use haruki_sekai_core::client::RegionManager;
use haruki_sekai_core::config::AssetUpdaterInfo;
use haruki_sekai_core::region::Region;

use common::*;

fn read_json(path: &std::path::Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[test]
fn cp_tick_streams_split_paths_and_publishes() {
    let cards = Mp::Array(vec![map(vec![("id", Mp::from(1))])]);

    let master_part1 = map(vec![
        ("cards", cards.clone()),
        ("events", Mp::Array(vec![map(vec![("id", Mp::from(2))])]))
    ]);

    let master_part2 = map(vec![
        ("cards", cards.clone()),
        ("stamps", Mp::Array(vec![map(vec![("id", Mp::from(3))])]))
    ]);

    let server = StubServer::start(move |request| match request.path() {
        "/api/user/123/auth" => StubResponse::octet(200, login_body("T", "1.0.1", "1.0.1", "newhash", vec![
            ("suiteMasterSplitPath", Mp::Array(vec![
                Mp::from("suite/master/part1"),
                Mp::from("/suite/master/part2")
            ]))
        ])),

        "/api/suite/master/part1" => StubResponse::octet(200, encrypted(&master_part1)),
        "/api/suite/master/part2" => StubResponse::octet(200, encrypted(&master_part2)),

        _ => StubResponse::text(404, "text/plain", "unexpected")
    });

    let webhooks = StubServer::start(|_| StubResponse::json(200, "{}"));

    let dir = tempfile::tempdir().unwrap();

    write_fixture(dir.path(), "accounts/main.json", r#"{"userId": "123", "credential": "cred"}"#);
    write_fixture(dir.path(), "versions/current.json", DEFAULT_VERSION_FILE);

    let asset_updaters = vec![AssetUpdaterInfo {
        url: format!("{}/hook", webhooks.url),
        authorization: Some(String::from("hook-token"))
    }];

    let mut manager = RegionManager::new(
        Region::En,
        server_config(&server.url, dir.path()),
        asset_updaters,
        None,
        None,
        ""
    );

    manager.init().unwrap();

    manager.check_master_update();

    // de-duplicated master artifacts, one file per entity
    assert_eq!(read_json(&dir.path().join("master/cards.json")), json!([{"id": 1}]));
    assert_eq!(read_json(&dir.path().join("master/events.json")), json!([{"id": 2}]));
    assert_eq!(read_json(&dir.path().join("master/stamps.json")), json!([{"id": 3}]));

    // the version record was rewritten in place, preserving key order,
    // with an immutable snapshot next to it
    let version = read_json(&dir.path().join("versions/current.json"));

    assert_eq!(version, json!({
        "appVersion": "4.0.0",
        "appHash": "apphash",
        "dataVersion": "1.0.1",
        "assetVersion": "1.0.1",
        "assetHash": "newhash"
    }));

    let written = std::fs::read_to_string(dir.path().join("versions/current.json")).unwrap();

    assert!(written.starts_with("{\n  \"appVersion\""));

    assert_eq!(read_json(&dir.path().join("versions/1.0.1.json")), version);

    // both split paths were fetched exactly once
    assert_eq!(server.count("/api/suite/master/part1"), 1);
    assert_eq!(server.count("/api/suite/master/part2"), 1);

    // the asset webhook fired with the bearer token and product UA
    assert!(webhooks.wait_for("/hook", 1));

    let hook = webhooks.requests().into_iter().next().unwrap();

    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&hook.body).unwrap(),
        json!({
            "server": "en",
            "assetVersion": "1.0.1",
            "assetHash": "newhash"
        })
    );

    assert_eq!(hook.headers.get("authorization").map(String::as_str), Some("Bearer hook-token"));

    assert!(hook.headers.get("user-agent").unwrap().starts_with("Haruki-Sekai-API/"));
}

#[test]
fn cp_tick_without_new_versions_is_a_no_op() {
    let server = StubServer::start(|request| match request.path() {
        "/api/user/123/auth" => StubResponse::octet(200, login_body("T", "1.0.0", "1.0.0", "apphash", vec![])),
        _ => StubResponse::text(404, "text/plain", "unexpected")
    });

    let dir = tempfile::tempdir().unwrap();

    write_fixture(dir.path(), "accounts/main.json", r#"{"userId": "123", "credential": "cred"}"#);
    write_fixture(dir.path(), "versions/current.json", DEFAULT_VERSION_FILE);

    let mut manager = RegionManager::new(Region::En, server_config(&server.url, dir.path()), Vec::new(), None, None, "");

    manager.init().unwrap();

    let before = std::fs::read_to_string(dir.path().join("versions/current.json")).unwrap();

    manager.check_master_update();

    // nothing written, nothing fetched beyond the probe login
    assert!(!dir.path().join("master").exists());
    assert_eq!(std::fs::read_to_string(dir.path().join("versions/current.json")).unwrap(), before);
}

#[test]
fn nv_tick_restores_compact_master() {
    let compact_cards = map(vec![
        ("id", Mp::Array(vec![Mp::from(1), Mp::from(2)])),
        ("kind", Mp::Array(vec![Mp::from(0), Mp::from(1)])),
        ("__ENUM__", map(vec![
            ("kind", Mp::Array(vec![Mp::from("A"), Mp::from("B")]))
        ]))
    ]);

    let master_info = map(vec![("compactCards", compact_cards)]);

    let server = StubServer::start(move |request| match request.path() {
        "/api/user/auth" => StubResponse::octet(200, login_body("T", "2.0.0", "2.0.0", "nvhash", vec![
            ("cdnVersion", Mp::from(11)),
            nv_registration(555)
        ])),

        "/nv/master-data-11.info" => StubResponse::octet(200, encrypted(&master_info)),

        _ => StubResponse::text(404, "text/plain", "unexpected")
    });

    let dir = tempfile::tempdir().unwrap();

    write_fixture(dir.path(), "accounts/main.json", r#"{"userId": "555", "accessToken": "tok"}"#);
    write_fixture(dir.path(), "structures.json", "{}");

    write_fixture(dir.path(), "versions/current.json", r#"{
        "appVersion": "4.0.0",
        "appHash": "apphash",
        "dataVersion": "1.0.0",
        "assetVersion": "1.0.0",
        "cdnVersion": 10
    }"#);

    let mut config = server_config(&server.url, dir.path());

    config.nuverse_master_data_url = format!("{}/nv", server.url);
    config.nuverse_structure_file_path = dir.path().join("structures.json");

    let mut manager = RegionManager::new(Region::Tw, config, Vec::new(), None, None, "");

    manager.init().unwrap();

    manager.check_master_update();

    // columnar entry restored into row records
    assert_eq!(read_json(&dir.path().join("master/cards.json")), json!([
        {"id": 1, "kind": "A"},
        {"id": 2, "kind": "B"}
    ]));

    // the raw compact entry is written alongside
    assert!(dir.path().join("master/compactCards.json").exists());

    let version = read_json(&dir.path().join("versions/current.json"));

    assert_eq!(version["cdnVersion"], json!(11));
    assert_eq!(version["dataVersion"], json!("2.0.0"));

    assert!(dir.path().join("versions/2.0.0.json").exists());
}
