/*!
 * Tests for the settings file and configuration validation
 */

use std::path::PathBuf;

use vntl::app_config::{Config, EngineKind, LogLevel};
use vntl::engines::profiles::InstructionFormat;
use vntl::errors::AppError;

use crate::common;

fn with_input(engine: EngineKind) -> Config {
    Config {
        engine,
        file_to_translate: Some(PathBuf::from("script.txt")),
        ..Config::default()
    }
}

#[test]
fn test_fromSettingsFile_shouldReadLlmOptions() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(
        dir.path(),
        "settings.json",
        r#"{
            "engine": "koboldcpp",
            "instructionFormat": "chat",
            "maxLength": 200,
            "snapshotInterval": 5,
            "llmProfiles": [
                {"name": "custom", "format": "chat", "modelContains": ["tiny"], "start": "Q: ", "end": "\nA: ", "stopSequences": ["Q:"]}
            ]
        }"#,
    )
    .unwrap();
    let config = Config::from_settings_file(&path).unwrap();
    assert_eq!(config.engine, EngineKind::Koboldcpp);
    assert_eq!(config.instruction_format, Some(InstructionFormat::Chat));
    assert_eq!(config.max_length, 200);
    assert_eq!(config.snapshot_interval, 5);
    assert_eq!(config.llm_profiles.len(), 1);
    assert_eq!(config.llm_profiles[0].start, "Q: ");
}

#[test]
fn test_fromSettingsFile_withBrokenJson_shouldBeConfigError() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(dir.path(), "settings.json", "{ not json").unwrap();
    assert!(matches!(Config::from_settings_file(&path), Err(AppError::Config(_))));
}

#[test]
fn test_validate_withoutInput_shouldFail() {
    let config = Config::default();
    assert!(matches!(config.validate(), Err(AppError::Config(_))));
    assert!(with_input(EngineKind::ParseOnly).validate().is_ok());
}

#[test]
fn test_validate_withZeroBatchSize_shouldFail() {
    let config = Config { batch_size: 0, ..with_input(EngineKind::Sugoi) };
    assert!(matches!(config.validate(), Err(AppError::Config(_))));
}

#[test]
fn test_validate_withUnknownEncoding_shouldFail() {
    let config = Config {
        file_to_translate_encoding: "klingon-8".to_string(),
        ..with_input(EngineKind::ParseOnly)
    };
    assert!(matches!(config.validate(), Err(AppError::Config(_))));
}

#[test]
fn test_validate_deeplWeb_shouldBeConfigError() {
    assert!(matches!(with_input(EngineKind::DeeplWeb).validate(), Err(AppError::Config(_))));
}

#[test]
fn test_validate_deeplWithKeyInSettings_shouldPass() {
    let config = Config {
        deepl_api_key: Some("secret:fx".to_string()),
        ..with_input(EngineKind::DeeplApiFree)
    };
    assert!(config.validate().is_ok());
}

#[test]
fn test_outputPath_shouldDefaultBesideInput() {
    let config = Config {
        file_to_translate: Some(PathBuf::from("scripts/ch01.txt")),
        ..Config::default()
    };
    assert_eq!(config.output_path(), Some(PathBuf::from("scripts/ch01.translated.csv")));

    let explicit = Config {
        output_file: Some(PathBuf::from("out.xlsx")),
        ..config
    };
    assert_eq!(explicit.output_path(), Some(PathBuf::from("out.xlsx")));
}

#[test]
fn test_logLevel_shouldFollowVerbosityFlags() {
    assert_eq!(Config::default().log_level(), LogLevel::Info);
    assert_eq!(Config { verbose: true, ..Config::default() }.log_level(), LogLevel::Debug);
    assert_eq!(
        Config { verbose: true, debug: true, ..Config::default() }.log_level(),
        LogLevel::Trace
    );
}

#[test]
fn test_apiKey_shouldNeverBeSerialized() {
    let config = Config {
        deepl_api_key: Some("secret".to_string()),
        ..Config::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    assert!(!json.contains("secret"));
}

#[test]
fn test_engineKind_shouldClassifyTransport() {
    assert!(EngineKind::Sugoi.uses_local_server());
    assert!(!EngineKind::Pykakasi.uses_local_server());
    assert!(EngineKind::DeeplApiPro.is_cloud());
    assert!(!EngineKind::Koboldcpp.is_cloud());
    assert_eq!(EngineKind::Cutlet.default_port(), None);
}
