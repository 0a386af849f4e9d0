/*!
 * HTTP engines against an in-process fake server
 */

use serde_json::{json, Value};

use vntl::app_config::{Config, EngineKind};
use vntl::dictionary::CharacterNames;
use vntl::engines::profiles::InstructionFormat;
use vntl::engines::{DeepL, EngineContext, KoboldCpp, NmtServer, TransportSettings, TranslationEngine};
use vntl::errors::{AppError, EngineError};

use crate::common;
use crate::common::fake_server::{FakeServer, RecordedRequest};

fn kobold_context() -> EngineContext {
    let mut context = common::japanese_to_english();
    context.prompt = Some("Translate {sourceLanguage} to {targetLanguage}.\n{history}".to_string());
    context.character_names = CharacterNames::from_pairs([("[＠クロエ]", "Chloe")]);
    context
}

fn kobold_config(port: u16) -> Config {
    Config {
        engine: EngineKind::Koboldcpp,
        address: "http://127.0.0.1".to_string(),
        port: Some(port),
        ..Config::default()
    }
}

fn kobold_handler(completion: &'static str) -> impl Fn(&RecordedRequest) -> (u16, String) + Send + Sync + 'static {
    move |request: &RecordedRequest| match request.path.as_str() {
        "/api/v1/model" => (200, json!({"result": "koboldcpp/Mistral-7B-Instruct"}).to_string()),
        "/api/extra/version" => (200, json!({"result": "KoboldCpp", "version": "1.60"}).to_string()),
        "/api/extra/true_max_context_length" => (200, json!({"value": 4096}).to_string()),
        "/api/v1/generate" => (200, json!({"results": [{"text": completion}]}).to_string()),
        _ => (404, "{}".to_string()),
    }
}

/// Echo server for the NMT protocol; `short` drops the last result of batches
fn nmt_handler(short: bool) -> impl Fn(&RecordedRequest) -> (u16, String) + Send + Sync + 'static {
    move |request: &RecordedRequest| match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/api/v1/model") => (200, json!("m2m100").to_string()),
        ("GET", "/api/v1/version") => (200, json!("1.2").to_string()),
        ("POST", "/") => {
            let content: Vec<Value> = request.json()["content"].as_array().cloned().unwrap_or_default();
            let mut results: Vec<String> = content
                .iter()
                .map(|text| format!("EN:{}", text.as_str().unwrap_or_default()))
                .collect();
            if short && results.len() > 1 {
                results.pop();
            }
            (200, json!(results).to_string())
        }
        _ => (404, "{}".to_string()),
    }
}

fn deepl_handler(translate_status: u16) -> impl Fn(&RecordedRequest) -> (u16, String) + Send + Sync + 'static {
    move |request: &RecordedRequest| match request.path.as_str() {
        "/v2/usage" => (200, json!({"character_count": 12, "character_limit": 500000}).to_string()),
        "/v2/translate" if translate_status != 200 => (translate_status, "{}".to_string()),
        "/v2/translate" => {
            let texts: Vec<Value> = request.json()["text"].as_array().cloned().unwrap_or_default();
            let translations: Vec<Value> = texts
                .iter()
                .map(|text| json!({"detected_source_language": "JA", "text": format!("DL:{}", text.as_str().unwrap_or_default())}))
                .collect();
            (200, json!({"translations": translations}).to_string())
        }
        _ => (404, "{}".to_string()),
    }
}

#[tokio::test]
async fn test_koboldcpp_connect_shouldProbeModelAndCleanCompletion() {
    common::init_logging();
    let server = FakeServer::start(kobold_handler("Chloe: Good morning. (Note: a casual greeting)")).await;
    let engine = KoboldCpp::connect(&kobold_config(server.port()), &kobold_context(), TransportSettings::default())
        .await
        .unwrap();

    let info = engine.info();
    assert!(info.reachable);
    assert!(info.supports_history);
    assert!(!info.supports_batches);
    assert_eq!(info.model, "Mistral-7B-Instruct");
    assert_eq!(info.identity(), "koboldcpp/Mistral-7B-Instruct");
    assert_eq!(engine.format(), InstructionFormat::Instruct);

    let translated = engine.translate("Chloe「おはよう」", Some("Chloe"), &[]).await.unwrap();
    assert_eq!(translated, "Good morning.");

    let generate = server.requests_to("/api/v1/generate");
    assert_eq!(generate.len(), 1);
    let payload = generate[0].json();
    let prompt = payload["prompt"].as_str().unwrap();
    assert!(prompt.starts_with("Translate Japanese to English"));
    assert!(prompt.ends_with("[INST]Chloe「おはよう」[/INST]\n"));
    assert_eq!(payload["max_context_length"], json!(4096));
    assert_eq!(payload["trim_stop"], json!(true));
}

#[tokio::test]
async fn test_koboldcpp_emptyCompletion_shouldBeProtocolError() {
    let server = FakeServer::start(kobold_handler("   ")).await;
    let engine = KoboldCpp::connect(&kobold_config(server.port()), &kobold_context(), TransportSettings::default())
        .await
        .unwrap();
    let result = engine.translate("猫", None, &[]).await;
    assert!(matches!(result, Err(EngineError::Protocol(_))));
}

#[tokio::test]
async fn test_koboldcpp_closedPort_shouldBeUnreachable() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let engine = KoboldCpp::connect(&kobold_config(port), &kobold_context(), TransportSettings::default())
        .await
        .unwrap();
    assert!(!engine.info().reachable);
}

#[tokio::test]
async fn test_koboldcpp_withoutPrompt_shouldBeConfigError() {
    let server = FakeServer::start(kobold_handler("x")).await;
    let result = KoboldCpp::connect(
        &kobold_config(server.port()),
        &common::japanese_to_english(),
        TransportSettings::default(),
    )
    .await;
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[tokio::test]
async fn test_py3translationserver_connect_shouldReadModelAndVersion() {
    let server = FakeServer::start(nmt_handler(false)).await;
    let engine = NmtServer::connect(
        EngineKind::Py3TranslationServer,
        &server.url(),
        &common::japanese_to_english(),
        TransportSettings::default(),
    )
    .await
    .unwrap();
    let info = engine.info();
    assert!(info.reachable);
    assert_eq!(info.model, "m2m100");
    assert_eq!(info.version, "1.2");
    assert_eq!(info.identity(), "py3translationserver/m2m100");
}

#[tokio::test]
async fn test_py3translationserver_translateBatch_shouldJoinLinesAndKeepOrder() {
    let server = FakeServer::start(nmt_handler(false)).await;
    let engine = NmtServer::connect(
        EngineKind::Py3TranslationServer,
        &server.url(),
        &common::japanese_to_english(),
        TransportSettings::default(),
    )
    .await
    .unwrap();

    let texts = vec!["猫\nです".to_string(), "犬".to_string()];
    let results = engine.translate_batch(&texts).await.unwrap();
    assert_eq!(results, vec!["EN:猫 です", "EN:犬"]);

    let posts = server.requests_to("/");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].json()["message"], json!("translate sentences"));
    assert_eq!(posts[0].json()["content"], json!(["猫 です", "犬"]));
}

#[tokio::test]
async fn test_sugoi_connect_shouldProbeWithOneElementBatch() {
    let server = FakeServer::start(nmt_handler(false)).await;
    let engine = NmtServer::connect(
        EngineKind::Sugoi,
        &server.url(),
        &common::japanese_to_english(),
        TransportSettings::default(),
    )
    .await
    .unwrap();
    assert!(engine.info().reachable);
    assert_eq!(engine.info().identity(), "sugoi");
    assert!(server.requests_to("/api/v1/model").is_empty());

    let probe = &server.requests_to("/")[0];
    assert_eq!(probe.method, "POST");
    assert_eq!(probe.json()["content"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_sugoi_shortBatch_shouldBeBatchMismatch() {
    let server = FakeServer::start(nmt_handler(true)).await;
    let engine = NmtServer::connect(
        EngineKind::Sugoi,
        &server.url(),
        &common::japanese_to_english(),
        TransportSettings::default(),
    )
    .await
    .unwrap();
    let texts = vec!["一".to_string(), "二".to_string(), "三".to_string()];
    let result = engine.translate_batch(&texts).await;
    assert!(matches!(
        result,
        Err(EngineError::BatchMismatch { expected: 3, received: 2 })
    ));
    assert_eq!(engine.translate("一", None, &[]).await.unwrap(), "EN:一");
}

#[tokio::test]
async fn test_deepl_translate_shouldSendAuthKeyAndLanguageCodes() {
    let server = FakeServer::start(deepl_handler(200)).await;
    let engine = DeepL::with_base_url(
        EngineKind::DeeplApiFree,
        "secret:fx".to_string(),
        &server.url(),
        &common::japanese_to_english(),
        TransportSettings::default(),
    )
    .await
    .unwrap();
    assert!(engine.info().reachable);
    assert_eq!(engine.language_codes(), ("JA", "EN-US"));

    let texts = vec!["猫".to_string(), "犬".to_string()];
    assert_eq!(engine.translate_batch(&texts).await.unwrap(), vec!["DL:猫", "DL:犬"]);

    let request = &server.requests_to("/v2/translate")[0];
    assert_eq!(request.header("Authorization"), Some("DeepL-Auth-Key secret:fx"));
    assert_eq!(request.json()["target_lang"], json!("EN-US"));
    assert_eq!(request.json()["source_lang"], json!("JA"));
}

#[tokio::test]
async fn test_deepl_rejectedKey_shouldBeAuthenticationError() {
    let server = FakeServer::start(|_: &RecordedRequest| (403, "{}".to_string())).await;
    let result = DeepL::with_base_url(
        EngineKind::DeeplApiFree,
        "wrong".to_string(),
        &server.url(),
        &common::japanese_to_english(),
        TransportSettings::default(),
    )
    .await;
    assert!(matches!(result, Err(AppError::Engine(EngineError::Authentication(_)))));
}

#[tokio::test]
async fn test_deepl_exhaustedQuota_shouldBeFatalQuotaError() {
    let server = FakeServer::start(deepl_handler(456)).await;
    let engine = DeepL::with_base_url(
        EngineKind::DeeplApiPro,
        "secret".to_string(),
        &server.url(),
        &common::japanese_to_english(),
        TransportSettings::default(),
    )
    .await
    .unwrap();
    let error = engine.translate("猫", None, &[]).await.unwrap_err();
    assert!(matches!(error, EngineError::QuotaExceeded(_)));
    assert!(!error.is_recoverable());
}
