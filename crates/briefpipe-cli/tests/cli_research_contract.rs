// These tests are designed to run without any API keys configured: the
// research command must still produce a well-formed JSON envelope with
// ok=false and a structured error object.

fn keyless_command() -> std::process::Command {
    let bin = assert_cmd::cargo::cargo_bin!("briefpipe");
    let mut cmd = std::process::Command::new(bin);
    // Ensure we don't accidentally inherit keys from the environment.
    for key in [
        "BRIEFPIPE_SEARCH_API_KEY",
        "PERPLEXITY_API_KEY",
        "BRIEFPIPE_GEMINI_API_KEY",
        "GEMINI_API_KEY",
        "GOOGLE_API_KEY",
        "BRIEFPIPE_OPENAI_API_KEY",
        "OPENAI_API_KEY",
        "BRIEFPIPE_GROQ_API_KEY",
        "GROQ_API_KEY",
        "BRIEFPIPE_AGENT_PROVIDER",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

fn run_to_json(cmd: &mut std::process::Command) -> serde_json::Value {
    let out = cmd.output().expect("run briefpipe");
    assert!(
        out.status.success(),
        "command should exit 0; stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("stdout is JSON")
}

#[test]
fn research_without_any_query_field_is_an_input_error() {
    let v = run_to_json(keyless_command().args(["research"]));
    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("research"));
    assert_eq!(v["ok"].as_bool(), Some(false));
    assert_eq!(v["error"]["code"].as_str(), Some("invalid_input"));
    assert_eq!(v["error"]["retryable"].as_bool(), Some(false));
    assert!(!v["error"]["message"].as_str().unwrap_or_default().is_empty());
}

#[test]
fn research_without_search_credentials_is_a_configuration_error() {
    let v = run_to_json(keyless_command().args(["research", "--company", "Acme Corp"]));
    assert_eq!(v["ok"].as_bool(), Some(false));
    assert_eq!(v["error"]["code"].as_str(), Some("not_configured"));
    assert!(v["error"]["message"]
        .as_str()
        .unwrap_or_default()
        .contains("BRIEFPIPE_SEARCH_API_KEY"));
}

#[test]
fn research_body_json_with_invalid_payload_is_an_input_error() {
    let tmp = tempfile::NamedTempFile::new().expect("tmp body");
    std::fs::write(tmp.path(), "{not json").unwrap();
    let mut cmd = keyless_command();
    cmd.args(["research", "--body-json"]).arg(tmp.path());
    let v = run_to_json(&mut cmd);
    assert_eq!(v["ok"].as_bool(), Some(false));
    assert_eq!(v["error"]["code"].as_str(), Some("invalid_input"));
}

#[test]
fn research_writes_the_envelope_to_the_out_path() {
    let out = tempfile::NamedTempFile::new().expect("tmp out");
    let out_path = out.path().to_path_buf();
    let mut cmd = keyless_command();
    cmd.args(["research", "--company", "Acme Corp", "--out"])
        .arg(&out_path);
    let status = cmd.status().expect("run briefpipe");
    assert!(status.success());
    let v: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
    assert_eq!(v["kind"].as_str(), Some("research"));
    assert_eq!(v["error"]["code"].as_str(), Some("not_configured"));
}
