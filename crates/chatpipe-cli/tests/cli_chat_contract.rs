use axum::{routing::post, Json, Router};
use std::net::SocketAddr;

async fn stub_model_server() -> SocketAddr {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|Json(body): Json<serde_json::Value>| async move {
            let user = body["messages"][1]["content"].as_str().unwrap_or("").to_string();
            let mut sse = String::new();
            for part in ["echo: ", user.as_str()] {
                let js = serde_json::json!({"choices": [{"delta": {"content": part}}]});
                sse.push_str(&format!("data: {js}\n\n"));
            }
            sse.push_str("data: [DONE]\n\n");
            sse
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn chatpipe(config: &std::path::Path) -> std::process::Command {
    let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin!("chatpipe"));
    cmd.arg("--config")
        .arg(config)
        .env_remove("CHATPIPE_SERVER_URL")
        .env_remove("CHATPIPE_GOOGLE_API_KEY")
        .env_remove("CHATPIPE_GOOGLE_CX")
        .env_remove("CHATPIPE_SEARXNG_ENDPOINT");
    cmd
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chat_streams_reply_and_remembers_model() {
    let addr = stub_model_server().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    let mut cmd = chatpipe(&path);
    cmd.args(["--server", &format!("http://{addr}"), "chat", "--model", "m1", "hello", "there"]);
    let out = tokio::task::spawn_blocking(move || cmd.output().unwrap()).await.unwrap();

    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["ok"], true);
    assert_eq!(v["status"], "completed");
    assert_eq!(v["mode"], "none");
    assert_eq!(v["content"], "echo: hello there");

    // The run-only --server override is not persisted, the model is.
    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved["lastModel"], "m1");
    assert_eq!(saved["serverUrl"], "http://localhost:1234");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn web_turn_without_search_provider_fails_with_apology() {
    let addr = stub_model_server().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    let mut cmd = chatpipe(&path);
    cmd.args(["--server", &format!("http://{addr}"), "chat", "--model", "m1", "@web rust news"]);
    let out = tokio::task::spawn_blocking(move || cmd.output().unwrap()).await.unwrap();

    assert!(!out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["ok"], false);
    assert_eq!(v["mode"], "generic");
    assert_eq!(v["error"]["code"], "search_failed");
    assert_eq!(
        v["content"],
        "Sorry, there was an error performing the web search. Please try again."
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn template_wraps_the_subject_in_a_research_request() {
    let addr = stub_model_server().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    let mut cmd = chatpipe(&path);
    cmd.args([
        "--server",
        &format!("http://{addr}"),
        "chat",
        "--model",
        "m1",
        "--template",
        "person",
        "--max-tokens",
        "64",
        "Jane",
        "Doe",
    ]);
    let out = tokio::task::spawn_blocking(move || cmd.output().unwrap()).await.unwrap();

    // No provider in the environment, so the person lookup fails at the research step.
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["mode"], "person_lookup");
    assert_eq!(v["error"]["code"], "search_failed");

    let mut cmd = chatpipe(&path);
    cmd.args(["chat", "--template", "nope", "Jane"]);
    let out = tokio::task::spawn_blocking(move || cmd.output().unwrap()).await.unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown template"));
}
