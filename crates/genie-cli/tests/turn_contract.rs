use assert_cmd::Command;
use predicates::prelude::*;

const SCENARIO: &str = "My budget is 3000 USD and I'm a software engineer with 4 years experience";

fn genie() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("genie"));
    for k in [
        "GENIE_ENV_FILE",
        "GENIE_LLM_BACKEND",
        "GENIE_CATALOG",
        "GENIE_POLICY",
        "GENIE_CACHE_DIR",
        "GENIE_CACHE",
    ] {
        cmd.env_remove(k);
    }
    cmd.args(["--llm-backend", "none"]);
    cmd
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let out = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&out).expect("stdout is json")
}

#[test]
fn greeting_asks_for_profile_without_panels() {
    let v = stdout_json(genie().args(["ask", "Hi"]));
    let reply = v["reply"].as_str().unwrap();
    assert!(reply.contains("name"), "{reply}");
    assert!(reply.contains("budget"), "{reply}");
    assert_eq!(v["options"], serde_json::json!([]));
    assert!(v.get("researchContext").is_none());
}

#[test]
fn budget_and_background_produce_options() {
    let v = stdout_json(genie().args(["ask", SCENARIO]));
    let options = v["options"].as_array().unwrap();
    assert_eq!(options.len(), 3);
    for o in options {
        assert!(o["costUsd"].as_f64().unwrap() <= 3000.0);
        let name = o["name"].as_str().unwrap();
        assert!(!v["reply"].as_str().unwrap().contains(name));
        assert!(!o["reason"].as_str().unwrap().trim().is_empty());
    }
}

#[test]
fn match_command_filters_by_budget_and_background() {
    let v = stdout_json(genie().args([
        "match",
        "--budget",
        "3000",
        "--background",
        "software engineer",
    ]));
    let names: Vec<String> = v
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["name"].as_str().unwrap().to_lowercase())
        .collect();
    assert_eq!(names.len(), 3);
    assert!(names
        .iter()
        .all(|n| n.contains("tech") || n.contains("talent") || n.contains("skilled")));

    genie()
        .args(["match", "--budget", "10", "--background", "student", "--output", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No matching options."));
}

#[test]
fn conversation_file_carries_options_into_follow_up() {
    let tmp = tempfile::tempdir().unwrap();
    let conv = tmp.path().join("conv.json");

    let first = stdout_json(genie().args(["ask", SCENARIO, "--conversation"]).arg(&conv));
    let second = stdout_json(
        genie()
            .args(["ask", "tell me more about the first one", "--conversation"])
            .arg(&conv),
    );
    assert_eq!(first["options"], second["options"]);

    let saved: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&conv).unwrap()).unwrap();
    assert_eq!(saved["history"].as_array().unwrap().len(), 4);
    assert_eq!(saved["emitted"].as_array().unwrap().len(), 2);
}

#[test]
fn history_file_supplies_profile() {
    let tmp = tempfile::tempdir().unwrap();
    let history = tmp.path().join("history.json");
    std::fs::write(
        &history,
        serde_json::json!([
            {"role": "user", "text": SCENARIO},
            {"role": "model", "text": "Thanks! Where would you like to go?"}
        ])
        .to_string(),
    )
    .unwrap();
    let v = stdout_json(
        genie()
            .args(["ask", "What do you recommend for me?", "--history"])
            .arg(&history),
    );
    assert!(!v["options"].as_array().unwrap().is_empty(), "{v}");
}

#[test]
fn research_without_sources_reports_total_failure() {
    let v = stdout_json(genie().args(["research", "latest visa news"]));
    assert_eq!(v["outcome"]["kind"], "total_failure");
    assert_eq!(v["outcome"]["reason"], "no URLs");
    assert!(v["toolOutput"]["analysisSummary"]
        .as_str()
        .unwrap()
        .contains("latest visa news"));
    assert_eq!(v["extractions"], serde_json::json!([]));
}

#[test]
fn extract_rejects_non_http_urls_with_marker_text() {
    let v = stdout_json(genie().args(["extract", "--url", "ftp://example.org/a", "--goal", "fees"]));
    assert_eq!(v["sourceUrl"], "ftp://example.org/a");
    assert!(v["text"].as_str().unwrap().starts_with("Error fetching page:"));
}

#[test]
fn chat_keeps_one_conversation_until_exit() {
    let tmp = tempfile::tempdir().unwrap();
    let conv = tmp.path().join("chat.json");
    genie()
        .arg("chat")
        .arg("--conversation")
        .arg(&conv)
        .write_stdin(format!("Hi\n{SCENARIO}\nexit\nignored after exit\n"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Welcome"))
        .stdout(predicate::str::contains("Visa options:"));
    let saved: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&conv).unwrap()).unwrap();
    assert_eq!(saved["history"].as_array().unwrap().len(), 4);
}
