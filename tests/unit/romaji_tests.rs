/*!
 * Tests for the romanization engines through the engine factory
 */

use std::path::PathBuf;

use vntl::app_config::{Config, EngineKind};
use vntl::dictionary::CharacterNames;
use vntl::engines::{create_engine, EngineContext, Romanizer, TranslationEngine};
use vntl::errors::AppError;

use crate::common;

fn config(engine: EngineKind, scheme: &str) -> Config {
    Config {
        engine,
        romaji_scheme: scheme.to_string(),
        file_to_translate: Some(PathBuf::from("script.txt")),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_createEngine_pykakasi_shouldBeLocalAndBatchable() {
    let engine = create_engine(&config(EngineKind::Pykakasi, "hepburn"), &common::japanese_to_english())
        .await
        .unwrap()
        .unwrap();
    let info = engine.info();
    assert!(info.reachable);
    assert!(info.supports_batches);
    assert!(!info.requires_prompt);
    assert_eq!(info.identity(), "pykakasi/0.1/hepburn");
}

#[tokio::test]
async fn test_createEngine_cutletWithoutDictionary_shouldBeConfigError() {
    let result = create_engine(&config(EngineKind::Cutlet, "hepburn"), &common::japanese_to_english()).await;
    assert!(matches!(result, Err(AppError::Config(_))));
    assert!(config(EngineKind::Cutlet, "hepburn").validate().is_err());
}

#[tokio::test]
async fn test_cutlet_withKana_shouldFallBackToHepburn() {
    let engine = Romanizer::cutlet(common::small_analyzer(), "kana", &common::japanese_to_english());
    assert_eq!(engine.info().identity(), "cutlet/small/hepburn");
    assert_eq!(engine.translate("猫が好き。", None, &[]).await.unwrap(), "Neko ga suki.");
}

/// Names whose spellings contain `sha`, `ou` and `fu`
fn named_context() -> EngineContext {
    let mut context = common::japanese_to_english();
    context.character_names = CharacterNames::from_pairs([
        ("ゆうしゃ", "Joshua"),
        ("るいず", "Louise"),
        ("みふね", "Mifune"),
    ]);
    context
}

#[tokio::test]
async fn test_pykakasi_respelledSchemes_shouldKeepTranslatedNames() {
    for scheme in ["hepburn", "kunrei", "passport"] {
        let engine = create_engine(&config(EngineKind::Pykakasi, scheme), &named_context())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            engine.translate("ゆうしゃとるいずとみふね", None, &[]).await.unwrap(),
            "Joshua to Louise to Mifune",
            "scheme {}",
            scheme
        );
    }
}

#[tokio::test]
async fn test_pykakasi_hiraScheme_shouldKeepNamesWithoutSpacing() {
    let engine = create_engine(&config(EngineKind::Pykakasi, "hira"), &named_context())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(engine.translate("ゆうしゃとねこ", None, &[]).await.unwrap(), "Joshuaとねこ");
}

#[tokio::test]
async fn test_cutlet_kunrei_shouldKeepTranslatedNames() {
    let engine = Romanizer::cutlet(common::small_analyzer(), "kunrei", &named_context());
    assert_eq!(engine.translate("写真がゆうしゃ", None, &[]).await.unwrap(), "Syasin ga Joshua");
}

#[tokio::test]
async fn test_translate_kanaScheme_shouldProduceKatakana() {
    let engine = create_engine(&config(EngineKind::Pykakasi, "kana"), &common::japanese_to_english())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(engine.translate("ねこ", None, &[]).await.unwrap(), "ネコ");
}

#[tokio::test]
async fn test_translateBatch_shouldKeepOrder() {
    let engine = create_engine(&config(EngineKind::Pykakasi, "hira"), &common::japanese_to_english())
        .await
        .unwrap()
        .unwrap();
    let texts = vec!["すし".to_string(), "ねこ".to_string()];
    assert_eq!(engine.translate_batch(&texts).await.unwrap(), texts);
}
