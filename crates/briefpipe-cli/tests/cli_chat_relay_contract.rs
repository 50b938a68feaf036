use std::net::SocketAddr;

use axum::http::header;
use axum::routing::post;
use axum::Router;

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn sse(body: &'static str) -> impl axum::response::IntoResponse {
    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_streams_deltas_to_stdout_until_done() {
    let app = Router::new().route(
        "/openai/v1/chat/completions",
        post(|| async {
            sse(concat!(
                "data: {\"delta\": \"Hello\"}\n\n",
                "event: ping\n\n",
                "data: {\"delta\": {\"content\": [{\"text\": \", \"}, {\"text\": \"world\"}]}}\n\n",
                "data: [DONE]\n\n",
                // a final frame lacking its trailing delimiter must still be
                // flushed when the stream closes
                "data: {\"delta\": \"!\"}"
            ))
        }),
    );
    let addr = serve(app).await;

    let bin = assert_cmd::cargo::cargo_bin!("briefpipe");
    let out = tokio::task::spawn_blocking(move || {
        std::process::Command::new(bin)
            .args(["chat", "--prompt", "say hello"])
            .env("BRIEFPIPE_AGENT_PROVIDER", "groq")
            .env("BRIEFPIPE_GROQ_API_KEY", "groq-test-key")
            .env("BRIEFPIPE_GROQ_BASE_URL", format!("http://{addr}/openai"))
            .output()
            .expect("run briefpipe chat")
    })
    .await
    .unwrap();

    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    // The partially buffered final frame is still flushed after [DONE].
    assert_eq!(String::from_utf8_lossy(&out.stdout), "Hello, world!\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_aborts_on_an_error_frame() {
    let app = Router::new().route(
        "/openai/v1/chat/completions",
        post(|| async {
            sse(concat!(
                "data: {\"delta\": \"partial\"}\n\n",
                "data: {\"type\": \"error\", \"error\": {\"message\": \"quota exceeded\"}}\n\n",
                "data: {\"delta\": \"never seen\"}\n\n"
            ))
        }),
    );
    let addr = serve(app).await;

    let bin = assert_cmd::cargo::cargo_bin!("briefpipe");
    let out = tokio::task::spawn_blocking(move || {
        std::process::Command::new(bin)
            .args(["chat", "--prompt", "say hello"])
            .env("BRIEFPIPE_AGENT_PROVIDER", "groq")
            .env("BRIEFPIPE_GROQ_API_KEY", "groq-test-key")
            .env("BRIEFPIPE_GROQ_BASE_URL", format!("http://{addr}/openai"))
            .output()
            .expect("run briefpipe chat")
    })
    .await
    .unwrap();

    assert!(!out.status.success(), "an error frame must fail the relay");
    assert!(String::from_utf8_lossy(&out.stderr).contains("quota exceeded"));
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_without_any_vendor_fails_with_the_resolver_reason() {
    let bin = assert_cmd::cargo::cargo_bin!("briefpipe");
    let out = tokio::task::spawn_blocking(move || {
        std::process::Command::new(bin)
            .args(["chat", "--prompt", "hi"])
            .env_remove("BRIEFPIPE_OPENAI_API_KEY")
            .env_remove("OPENAI_API_KEY")
            .env_remove("BRIEFPIPE_GROQ_API_KEY")
            .env_remove("GROQ_API_KEY")
            .env_remove("BRIEFPIPE_AGENT_PROVIDER")
            .output()
            .expect("run briefpipe chat")
    })
    .await
    .unwrap();

    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("no agent provider configured"));
}
