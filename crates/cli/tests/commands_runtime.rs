use std::env;
use std::io::Write;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use supportflow_cli::commands::{batch, config, run, stages};

#[test]
fn run_resolves_refund_ticket_with_knowledge_answer() {
    with_env(&[], || {
        let result = run::run(
            None,
            run::RunArgs {
                name: Some("Alice Smith".to_string()),
                email: Some("alice@example.com".to_string()),
                query: Some("I want a refund for my last order.".to_string()),
                priority: Some("high".to_string()),
                ticket_id: Some("TCK-1001".to_string()),
                ..run::RunArgs::default()
            },
        );
        assert_eq!(result.exit_code, 0, "expected successful run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["ticket_id"], "TCK-1001");
        assert_eq!(payload["status"], "Resolved");
        assert_eq!(
            payload["reply"],
            "Hello Alice Smith,\nRefunds are processed within 5-7 business days.\nThank you for your patience."
        );
    });
}

#[test]
fn run_without_name_uses_generic_salutation() {
    with_env(&[], || {
        let result = run::run(
            None,
            run::RunArgs {
                query: Some("my printer is on fire".to_string()),
                seed: Some(3),
                ..run::RunArgs::default()
            },
        );
        assert_eq!(result.exit_code, 0, "expected successful run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["ticket_id"], "UNASSIGNED");
        assert_eq!(payload["status"], "Escalated");
        assert_eq!(payload["reply"], "Hello there,\nYour issue has been escalated to our support team.");
    });
}

#[test]
fn run_trace_includes_run_id_and_state() {
    with_env(&[], || {
        let result = run::run(
            None,
            run::RunArgs {
                name: Some("Bob".to_string()),
                query: Some("where is my order".to_string()),
                ticket_id: Some("TCK-2002".to_string()),
                trace: true,
                ..run::RunArgs::default()
            },
        );
        assert_eq!(result.exit_code, 0, "expected successful run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert!(payload["run_id"].as_str().is_some_and(|run_id| !run_id.is_empty()));
        assert_eq!(payload["payload"]["ticket_id"], "TCK-2002");
        assert!(payload["state"].is_object());
    });
}

#[test]
fn run_reports_config_failure_for_invalid_env() {
    with_env(&[("SUPPORTFLOW_DISPATCH_MAX_ATTEMPTS", "0")], || {
        let result = run::run(None, run::RunArgs::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "run");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn batch_processes_tickets_in_input_order() {
    with_env(&[], || {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"[
                {{"name": "Alice", "query": "refund please", "ticket_id": "TCK-1"}},
                {{"name": "Bob", "query": "my printer is broken", "ticket_id": "TCK-2"}},
                {{"query": "password reset"}}
            ]"#
        )
        .expect("write tickets");

        let result = batch::run(
            None,
            batch::BatchArgs { file: file.path().to_path_buf(), seed: Some(42) },
        );
        assert_eq!(result.exit_code, 0, "expected successful batch: {}", result.output);

        let payload = parse_payload(&result.output);
        let entries = payload.as_array().expect("batch output should be a JSON array");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["ticket_id"], "TCK-1");
        assert_eq!(entries[0]["status"], "Resolved");
        assert_eq!(entries[1]["ticket_id"], "TCK-2");
        assert_eq!(entries[1]["status"], "Escalated");
        assert_eq!(entries[2]["ticket_id"], "UNASSIGNED");
        assert!(entries[2]["reply"].as_str().is_some_and(|reply| reply.starts_with("Hello there,")));
    });
}

#[test]
fn batch_rejects_malformed_input_file() {
    with_env(&[], || {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "{{\"not\": \"an array\"}}").expect("write input");

        let result = batch::run(None, batch::BatchArgs { file: file.path().to_path_buf(), seed: None });
        assert_eq!(result.exit_code, 4);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "batch");
        assert_eq!(payload["error_class"], "input");
    });
}

#[test]
fn stages_lists_the_canonical_registry() {
    with_env(&[], || {
        let result = stages::run(None);
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "stages");
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.starts_with("stage registry (canonical, 11 stages):"));
        assert!(message.contains(" 7. DECIDE (non-deterministic)"));
        assert!(message.contains("11. COMPLETE (deterministic)"));
    });
}

#[test]
fn stages_reports_invalid_stage_table_from_file() {
    with_env(&[], || {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().expect("temp file");
        write!(file, "[[stages]]\nname = \"INTAKE\"\nmode = \"deterministic\"\n")
            .expect("write config");

        let result = stages::run(Some(file.path().to_path_buf()));
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_redacts_api_keys_and_attributes_sources() {
    with_env(
        &[
            ("SUPPORTFLOW_COMMON_API_KEY", "common-secret-value"),
            ("SUPPORTFLOW_DECISION_SEED", "17"),
        ],
        || {
            let output = config::run(None);

            assert!(!output.contains("common-secret-value"));
            assert!(output.contains(
                "- providers.common.api_key = <redacted> (source: env (SUPPORTFLOW_COMMON_API_KEY))"
            ));
            assert!(output.contains("- providers.atlas.api_key = <unset> (source: default)"));
            assert!(output.contains("- decision.seed = 17 (source: env (SUPPORTFLOW_DECISION_SEED))"));
            assert!(output.contains("- stages = canonical (source: default)"));
        },
    );
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SUPPORTFLOW_COMMON_ENDPOINT",
        "SUPPORTFLOW_COMMON_API_KEY",
        "SUPPORTFLOW_ATLAS_ENDPOINT",
        "SUPPORTFLOW_ATLAS_API_KEY",
        "SUPPORTFLOW_DISPATCH_MAX_ATTEMPTS",
        "SUPPORTFLOW_DISPATCH_TIMEOUT_MS",
        "SUPPORTFLOW_DISPATCH_BACKOFF_BASE_MS",
        "SUPPORTFLOW_DISPATCH_BACKOFF_MULTIPLIER",
        "SUPPORTFLOW_DECISION_SEED",
        "SUPPORTFLOW_DECISION_UPDATE_POLICY",
        "SUPPORTFLOW_LOGGING_LEVEL",
        "SUPPORTFLOW_LOGGING_FORMAT",
        "SUPPORTFLOW_LOG_LEVEL",
        "SUPPORTFLOW_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
