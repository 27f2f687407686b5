use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// `assist` running in an empty directory with no user config
fn assist(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("assist").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env_remove("ASSIST_BASE_URL")
        .env_remove("ASSIST_TIMEOUT_MS")
        .env_remove("ASSIST_PROXY");
    cmd
}

#[test]
fn version_command() {
    let home = TempDir::new().unwrap();
    assist(&home)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("assist version"));
}

#[test]
fn help_lists_commands() {
    let home = TempDir::new().unwrap();
    assist(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("fetch").and(predicate::str::contains("call")));
}

#[test]
fn config_reflects_project_file_and_env() {
    let home = TempDir::new().unwrap();
    std::fs::write(
        home.path().join(".assist.json"),
        r#"{"base_url": "http://project.local", "timeout_ms": 1500}"#,
    )
    .unwrap();

    assist(&home)
        .arg("config")
        .env("ASSIST_TIMEOUT_MS", "2500")
        .assert()
        .success()
        .stdout(
            predicate::str::contains(r#""base_url": "http://project.local""#)
                .and(predicate::str::contains(r#""timeout_ms": 2500"#)),
        );
}

#[test]
fn malformed_project_config_fails() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join(".assist.json"), "{ nope").unwrap();

    assist(&home)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains(".assist.json"));
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_prints_sse_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "event: delta\ndata: first\n\ndata: second\n\n",
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    assist(&home)
        .args(["fetch", &format!("{}/events", server.uri()), "--sse"])
        .assert()
        .success()
        .stdout(predicate::str::contains("delta: first\nsecond\n"));
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_prints_parsed_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ready": true})))
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    assist(&home)
        .args(["fetch", "/status", "--auto-parse", "--base-url"])
        .arg(format!("{}/v1", server.uri()))
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""ready": true"#));
}
