mod common;

use common::TestEnv;
use predicates::prelude::*;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, ResponseTemplate};

const SOME_ID: &str = "4242424242424242424242424242424242424242424242424242424242424242";

#[tokio::test]
async fn test_keygen_prints_identity() {
    let env = TestEnv::new().await;
    env.fcr()
        .arg("keygen")
        .assert()
        .success()
        .stdout(predicate::str::contains("Node ID"))
        .stdout(predicate::str::contains("Wallet"));
}

#[tokio::test]
async fn test_init_writes_default_location() {
    let env = TestEnv::new().await;
    env.fcr()
        .arg("init")
        .arg("--role")
        .arg("provider")
        .assert()
        .success()
        .stdout(predicate::str::contains("Registry record"));

    let written = env.home_dir.path().join(".config").join("fcr").join("config.toml");
    let text = std::fs::read_to_string(written).unwrap();
    assert!(text.contains("role = \"provider\""));
    assert!(text.contains("offer_key"));
    assert!(text.contains("[protocol]"));
}

#[tokio::test]
async fn test_init_refuses_overwrite() {
    let env = TestEnv::new().await;
    let config = env.config_path();

    env.fcr().arg("--config").arg(&config).arg("init").assert().success();
    env.fcr()
        .arg("--config")
        .arg(&config)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    env.fcr()
        .arg("--config")
        .arg(&config)
        .arg("init")
        .arg("--force")
        .assert()
        .success();
}

#[tokio::test]
async fn test_init_rejects_unknown_role() {
    let env = TestEnv::new().await;
    env.fcr().arg("init").arg("--role").arg("miner").assert().failure();
}

#[tokio::test]
async fn test_find_offers_without_config() {
    let env = TestEnv::new().await;
    env.fcr()
        .arg("find-offers")
        .arg(SOME_ID)
        .arg("--gateway")
        .arg(SOME_ID)
        .assert()
        .failure()
        .stderr(predicate::str::contains("fcr init"));
}

#[tokio::test]
async fn test_find_offers_bad_cid() {
    let env = TestEnv::new().await;
    env.fcr_client()
        .arg("find-offers")
        .arg("not-a-cid")
        .arg("--json")
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"success\":false"))
        .stdout(predicate::str::contains("Invalid CID"));
}

#[tokio::test]
async fn test_find_offers_unknown_gateway() {
    let env = TestEnv::new().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/peers/[0-9a-f]{64}$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&env.registry)
        .await;

    env.fcr_client()
        .arg("find-offers")
        .arg(SOME_ID)
        .arg("--gateway")
        .arg(SOME_ID)
        .arg("--json")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Peer not found"));
}

#[tokio::test]
async fn test_find_offers_dht_without_gateways() {
    let env = TestEnv::new().await;
    Mock::given(method("GET"))
        .and(path("/gateways"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&env.registry)
        .await;

    env.fcr_client()
        .arg("find-offers-dht")
        .arg(SOME_ID)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No gateway available"));
}
