use super::*;

#[test]
fn stub_round_trips_and_validates() {
    let stub = config_stub().unwrap();
    let parsed: PipelineConfig = serde_json::from_str(&stub).unwrap();
    assert_eq!(parsed, default_config());
    validate_config(&parsed).unwrap();
}

#[test]
fn missing_sections_take_defaults() {
    let parsed: PipelineConfig = serde_json::from_str(
        r#"{"schema_version": 1, "back_edges": {"per_stage": {"verify": 4}}}"#,
    )
    .unwrap();
    assert_eq!(parsed.retry, RetryConfig::default());
    assert_eq!(parsed.back_edges.max_for(Stage::Verify), 4);
    assert_eq!(parsed.back_edges.max_for(Stage::StructureGate), 2);
    assert_eq!(parsed.back_edges.run_max, 6);
}

#[test]
fn unknown_fields_are_rejected() {
    let err = serde_json::from_str::<PipelineConfig>(r#"{"schema_version": 1, "retires": {}}"#)
        .unwrap_err();
    assert!(err.to_string().contains("retires"));
}

#[test]
fn wrong_schema_version_is_rejected() {
    let mut config = default_config();
    config.schema_version = 9;
    let err = validate_config(&config).unwrap_err();
    assert!(err.to_string().contains("unsupported lgate config schema_version 9"));
}

#[test]
fn bounds_only_apply_to_gated_stages() {
    let mut config = default_config();
    config.back_edges.per_stage.insert(Stage::Classify, 3);
    assert!(validate_config(&config).is_err());
}

#[test]
fn capability_specs_are_tagged() {
    let parsed: PipelineConfig = serde_json::from_str(
        r#"{
            "schema_version": 1,
            "capabilities": {
                "primary": {"kind": "command", "command": "my-lm --json"},
                "fallback": {"kind": "chat", "base_url": "https://api.example.test/v1", "model": "m"}
            }
        }"#,
    )
    .unwrap();
    assert_eq!(
        parsed.capabilities.primary,
        Some(CapabilitySpec::Command {
            command: "my-lm --json".to_string()
        })
    );
    validate_config(&parsed).unwrap();

    let mut empty = parsed.clone();
    empty.capabilities.primary = Some(CapabilitySpec::Command {
        command: " ".to_string(),
    });
    assert!(validate_config(&empty).is_err());
}

#[test]
fn load_defaults_without_a_file_and_reads_written_config() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(load_config(dir.path()).unwrap(), default_config());

    let mut config = default_config();
    config.retrieval.k = 20;
    write_config(dir.path(), &config).unwrap();
    assert_eq!(load_config(dir.path()).unwrap().retrieval.k, 20);
}

#[test]
fn sections_convert_to_runtime_settings() {
    let config = default_config();
    assert_eq!(config.retry.policy(), RetryPolicy::default());
    assert_eq!(config.retrieval.settings(), RetrievalSettings::default());
    assert_eq!(config.gates.settings(), GateSettings::default());
}
