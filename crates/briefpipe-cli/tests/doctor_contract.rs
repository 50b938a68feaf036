#[test]
fn doctor_reports_unconfigured_providers_without_leaking_secrets() {
    let bin = assert_cmd::cargo::cargo_bin!("briefpipe");
    let out = std::process::Command::new(&bin)
        .arg("doctor")
        .env_remove("BRIEFPIPE_SEARCH_API_KEY")
        .env_remove("PERPLEXITY_API_KEY")
        .env_remove("BRIEFPIPE_GEMINI_API_KEY")
        .env_remove("GEMINI_API_KEY")
        .env_remove("GOOGLE_API_KEY")
        .env_remove("BRIEFPIPE_OPENAI_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("BRIEFPIPE_GROQ_API_KEY")
        .env_remove("GROQ_API_KEY")
        .env_remove("BRIEFPIPE_AGENT_PROVIDER")
        .output()
        .expect("run doctor");
    assert!(out.status.success());

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("doctor json");
    assert_eq!(v["kind"].as_str(), Some("doctor"));
    assert_eq!(v["search"]["configured"].as_bool(), Some(false));
    assert_eq!(v["deep_research"]["configured"].as_bool(), Some(false));
    assert!(v["agent"]["provider"].is_null());
    assert!(v["agent"]["reason"]
        .as_str()
        .unwrap_or_default()
        .contains("no agent provider configured"));
}

#[test]
fn doctor_reports_the_resolved_vendor_and_never_prints_key_material() {
    let bin = assert_cmd::cargo::cargo_bin!("briefpipe");
    let out = std::process::Command::new(&bin)
        .arg("doctor")
        .env_remove("BRIEFPIPE_OPENAI_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("BRIEFPIPE_AGENT_PROVIDER")
        .env("BRIEFPIPE_GROQ_API_KEY", "gsk-supersecret123")
        .env("BRIEFPIPE_SEARCH_API_KEY", "pplx-alsosecret456")
        .output()
        .expect("run doctor");
    assert!(out.status.success());

    let text = String::from_utf8_lossy(&out.stdout);
    assert!(!text.contains("supersecret123"));
    assert!(!text.contains("alsosecret456"));

    let v: serde_json::Value = serde_json::from_str(&text).expect("doctor json");
    assert_eq!(v["search"]["configured"].as_bool(), Some(true));
    assert_eq!(v["agent"]["provider"].as_str(), Some("groq"));
    assert!(v["agent"]["reason"].is_null());
}
