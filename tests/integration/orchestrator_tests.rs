/*!
 * End-to-end runs of the controller: extraction, translation, resume and caching
 */

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use serde_json::json;
use tempfile::TempDir;

use vntl::app_config::{Config, EngineKind};
use vntl::engines::mock::MockCall;
use vntl::engines::MockEngine;
use vntl::errors::AppError;
use vntl::store::Store;
use vntl::translation::TranslationCache;
use vntl::Controller;

use crate::common;
use crate::common::fake_server::{FakeServer, RecordedRequest};

const MOCK_IDENTITY: &str = "mock/scripted";

/// `行0` … `行{n-1}`, one paragraph each
fn numbered_script(n: usize) -> String {
    (0..n).map(|i| format!("行{}\n\n", i)).collect()
}

fn setup(script: &str) -> (TempDir, Config) {
    common::init_logging();
    let dir = common::create_temp_dir().unwrap();
    let input = common::create_test_file(dir.path(), "script.txt", script).unwrap();
    let config = Config {
        file_to_translate: Some(input),
        ..Config::default()
    };
    (dir, config)
}

fn output_of(dir: &Path) -> PathBuf {
    dir.join("script.translated.csv")
}

/// Column C holds the first engine's translations
fn engine_column(store: &Store) -> Vec<Option<String>> {
    (2..=store.row_count())
        .map(|row| store.get_cell(row, "C").unwrap().map(str::to_string))
        .collect()
}

fn controller(config: Config) -> Controller {
    Controller::with_config(config).with_progress(false)
}

#[tokio::test]
async fn test_parseOnly_repeatedParagraph_shouldStoreOneRowPerDistinctUnit() {
    let (dir, config) = setup("おはよう。\n\nいい天気だね。\n\nおはよう。\n");
    let summary = controller(config).run().await.unwrap();
    assert_eq!(summary.extraction.units, 3);
    assert_eq!(summary.extraction.new_rows, 2);
    assert_eq!(summary.rows_total, 2);
    assert_eq!(summary.identity, None);

    let store = Store::import(output_of(dir.path())).unwrap();
    assert_eq!(store.get_cell(1, "A").unwrap(), Some("rawText"));
    assert_eq!(store.get_cell(2, "A").unwrap(), Some("おはよう。"));
    assert_eq!(store.get_cell(3, "A").unwrap(), Some("いい天気だね。"));
    assert_eq!(store.row_count(), 3);
}

#[tokio::test]
async fn test_run_withNamesAndIgnorePrefix_shouldSubstituteAndPassSpeaker() {
    let (dir, mut config) = setup("[＠クロエ]「おはよう」\n[comment]\nいい天気\n");
    config.character_names = Some(
        common::create_test_file(dir.path(), "names.csv", "original,translated\n[＠クロエ],Chloe\n").unwrap(),
    );
    config.parsing_definitions = Some(
        common::create_test_file(dir.path(), "parse.txt", "ignoreLinesThatStartWith=[\n").unwrap(),
    );
    let engine = MockEngine::working().with_batches(false);
    let summary = controller(config).run_with_engine(Some(&engine)).await.unwrap();
    assert_eq!(summary.rows_total, 2);

    let store = Store::import(output_of(dir.path())).unwrap();
    assert_eq!(store.get_cell(2, "A").unwrap(), Some("Chloe「おはよう」"));
    assert_eq!(store.get_cell(3, "A").unwrap(), Some("いい天気"));
    assert_eq!(store.get_cell(1, "C").unwrap(), Some(MOCK_IDENTITY));

    let speakers: Vec<Option<String>> = engine
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            MockCall::Single { speaker, .. } => Some(speaker),
            MockCall::Batch(_) => None,
        })
        .collect();
    assert_eq!(speakers, vec![Some("Chloe".to_string()), None]);
}

#[test]
fn test_parseOnly_withLineCap_shouldSplitParagraphs() {
    let (dir, mut config) = setup("一\n二\n三\n四\n五\n");
    config.parsing_definitions = Some(
        common::create_test_file(dir.path(), "parse.txt", "maximumNumberOfLinesPerParagraph=2\n").unwrap(),
    );
    tokio_test::block_on(controller(config).run_with_engine(None)).unwrap();

    let store = Store::import(output_of(dir.path())).unwrap();
    let keys: Vec<_> = store.keys().map(|(_, key)| key.to_string()).collect();
    assert_eq!(keys, vec!["一\n二", "三\n四", "五"]);
    assert_eq!(store.get_cell(2, "B").unwrap(), Some("2!false"));
    assert_eq!(store.get_cell(4, "B").unwrap(), Some("1!false"));
}

#[tokio::test]
async fn test_resume_afterFailedRows_shouldOnlyRequestMissingRows() {
    let (dir, config) = setup(&numbered_script(10));

    let first = MockEngine::intermittent(4).with_batches(false);
    let summary = controller(config.clone()).run_with_engine(Some(&first)).await.unwrap();
    assert_eq!(summary.translated, 8);
    assert_eq!(summary.skipped, 2);
    let store = Store::import(output_of(dir.path())).unwrap();
    let column = engine_column(&store);
    assert_eq!(column[3], None);
    assert_eq!(column[7], None);
    assert_eq!(column[0].as_deref(), Some("[en] 行0"));

    let second = MockEngine::working();
    let resumed = Config { resume: true, ..config };
    let summary = controller(resumed).run_with_engine(Some(&second)).await.unwrap();
    assert_eq!(summary.translated, 2);
    assert_eq!(second.calls(), vec![MockCall::Batch(vec!["行3".to_string(), "行7".to_string()])]);

    let store = Store::import(output_of(dir.path())).unwrap();
    assert_eq!(store.index_len(), 10);
    assert!(engine_column(&store).iter().all(Option::is_some));
}

/// KoboldCpp stand-in that echoes the wrapped input, failing on `fail_on`
fn kobold_server(fail_on: Option<&'static str>) -> impl Fn(&RecordedRequest) -> (u16, String) + Send + Sync + 'static {
    move |request: &RecordedRequest| match request.path.as_str() {
        "/api/v1/model" => (200, json!({"result": "koboldcpp/Mistral-7B-Instruct"}).to_string()),
        "/api/extra/version" => (200, json!({"version": "1.60"}).to_string()),
        "/api/extra/true_max_context_length" => (200, json!({"value": 4096}).to_string()),
        "/api/v1/generate" => {
            let payload = request.json();
            let prompt = payload["prompt"].as_str().unwrap_or_default().to_string();
            if fail_on.is_some_and(|marker| prompt.contains(marker)) {
                return (500, "{}".to_string());
            }
            let source = prompt
                .rsplit("[INST]")
                .next()
                .and_then(|tail| tail.split("[/INST]").next())
                .unwrap_or_default();
            (200, json!({"results": [{"text": format!("EN({})", source)}]}).to_string())
        }
        _ => (404, "{}".to_string()),
    }
}

#[tokio::test]
async fn test_resume_withKoboldcpp_shouldRetryOnlyTheFailedRow() {
    let (dir, config) = setup(&numbered_script(10));
    let prompt = common::create_test_file(dir.path(), "prompt.txt", "Translate {sourceLanguage} to {targetLanguage}.\n").unwrap();
    let config = Config {
        engine: EngineKind::Koboldcpp,
        address: "http://127.0.0.1".to_string(),
        prompt_file: Some(prompt),
        ..config
    };

    let server = FakeServer::start(kobold_server(Some("行3"))).await;
    let first = Config { port: Some(server.port()), ..config.clone() };
    let summary = controller(first).run().await.unwrap();
    assert_eq!(summary.identity.as_deref(), Some("koboldcpp/Mistral-7B-Instruct"));
    assert_eq!(summary.translated, 9);
    assert_eq!(summary.skipped, 1);
    assert_eq!(server.requests_to("/api/v1/generate").len(), 10);

    let store = Store::import(output_of(dir.path())).unwrap();
    assert_eq!(engine_column(&store)[3], None);
    assert_eq!(engine_column(&store)[4].as_deref(), Some("EN(行4)"));

    let retry = FakeServer::start(kobold_server(None)).await;
    let second = Config {
        port: Some(retry.port()),
        resume: true,
        ..config
    };
    let summary = controller(second).run().await.unwrap();
    assert_eq!(summary.translated, 1);
    let generate = retry.requests_to("/api/v1/generate");
    assert_eq!(generate.len(), 1);
    assert!(generate[0].json()["prompt"].as_str().unwrap().contains("行3"));

    let store = Store::import(output_of(dir.path())).unwrap();
    let column = engine_column(&store);
    assert_eq!(column[3].as_deref(), Some("EN(行3)"));
    assert!(column.iter().all(Option::is_some));
}

#[tokio::test]
async fn test_batchMismatch_shouldFallBackToSingleCalls() {
    let (dir, config) = setup(&numbered_script(10));
    let engine = MockEngine::batch_mismatch();
    let summary = controller(config).run_with_engine(Some(&engine)).await.unwrap();
    assert_eq!(summary.translated, 10);

    let calls = engine.calls();
    assert_eq!(calls.len(), 11);
    assert!(matches!(&calls[0], MockCall::Batch(texts) if texts.len() == 10));
    assert!(calls[1..].iter().all(|call| matches!(call, MockCall::Single { .. })));

    let store = Store::import(output_of(dir.path())).unwrap();
    let column = engine_column(&store);
    assert_eq!(column.len(), 10);
    assert_eq!(column[9].as_deref(), Some("[en] 行9"));
}

#[tokio::test]
async fn test_sugoi_shortBatches_shouldStillFillEveryRow() {
    let (dir, config) = setup(&numbered_script(10));
    let server = FakeServer::start(|request: &RecordedRequest| {
        let content: Vec<String> = request.json()["content"]
            .as_array()
            .map(|items| items.iter().filter_map(|v| v.as_str()).map(|s| format!("EN:{}", s)).collect())
            .unwrap_or_default();
        let mut results = content;
        if results.len() > 1 {
            results.pop();
        }
        (200, json!(results).to_string())
    })
    .await;
    let config = Config {
        engine: EngineKind::Sugoi,
        address: "127.0.0.1".to_string(),
        port: Some(server.port()),
        ..config
    };
    let summary = controller(config).run().await.unwrap();
    assert_eq!(summary.identity.as_deref(), Some("sugoi"));
    assert_eq!(summary.translated, 10);
    // probe, one short batch, then ten single calls
    assert_eq!(server.requests_to("/").len(), 12);

    let store = Store::import(output_of(dir.path())).unwrap();
    let column = engine_column(&store);
    assert_eq!(column[0].as_deref(), Some("EN:行0"));
    assert!(column.iter().all(Option::is_some));
}

#[tokio::test]
async fn test_history_shouldHoldMostRecentUnitsOldestFirst() {
    let (_dir, config) = setup(&numbered_script(6));
    let config = Config { history_length: 3, ..config };
    let engine = MockEngine::working().with_batches(false);
    controller(config).run_with_engine(Some(&engine)).await.unwrap();

    let calls = engine.calls();
    assert_eq!(calls.len(), 6);
    let MockCall::Single { text, history, .. } = &calls[5] else {
        panic!("expected a single call, got {:?}", calls[5]);
    };
    assert_eq!(text, "行5");
    let sources: Vec<_> = history.iter().map(|entry| entry.source.as_str()).collect();
    assert_eq!(sources, vec!["行2", "行3", "行4"]);
    assert_eq!(history[2].translation, "[en] 行4");

    let MockCall::Single { history, .. } = &calls[0] else {
        panic!("expected a single call");
    };
    assert!(history.is_empty());
}

#[tokio::test]
async fn test_engineWithoutHistory_shouldReceiveEmptyHistory() {
    let (_dir, config) = setup(&numbered_script(3));
    let engine = MockEngine::working().with_batches(false).with_history(false);
    controller(config).run_with_engine(Some(&engine)).await.unwrap();
    assert!(engine.calls().iter().all(|call| matches!(call, MockCall::Single { history, .. } if history.is_empty())));
}

#[tokio::test]
async fn test_cache_withOtherModel_shouldMissAndAddColumn() {
    let (dir, config) = setup("猫\n");
    controller(config.clone()).run_with_engine(Some(&MockEngine::working())).await.unwrap();

    let other = MockEngine::working().with_model("other");
    let summary = controller(config).run_with_engine(Some(&other)).await.unwrap();
    assert_eq!(summary.identity.as_deref(), Some("mock/other"));
    assert_eq!(summary.cache_hits, 0);
    assert_eq!(other.request_count(), 1);

    let cache = TranslationCache::load(dir.path().join("backups").join("cache.csv")).unwrap();
    assert!(cache.get("猫", MOCK_IDENTITY).is_some());
    assert!(cache.get("猫", "mock/other").is_some());
}

#[tokio::test]
async fn test_secondRun_shouldBeServedFromCache() {
    let (dir, config) = setup("猫\n\n犬\n\n鳥\n");
    let first = MockEngine::working();
    controller(config.clone()).run_with_engine(Some(&first)).await.unwrap();
    assert!(dir.path().join("backups").join("cache.csv").is_file());

    let second = MockEngine::working();
    let summary = controller(config).run_with_engine(Some(&second)).await.unwrap();
    assert_eq!(second.request_count(), 0);
    assert_eq!(summary.cache_hits, 3);
    assert_eq!(summary.translated, 3);

    let store = Store::import(output_of(dir.path())).unwrap();
    assert_eq!(engine_column(&store)[1].as_deref(), Some("[en] 犬"));
}

#[tokio::test]
async fn test_noCache_shouldCallEngineAgain() {
    let (_dir, config) = setup("猫\n");
    controller(config.clone()).run_with_engine(Some(&MockEngine::working())).await.unwrap();

    let second = MockEngine::working();
    let config = Config { no_cache: true, ..config };
    let summary = controller(config).run_with_engine(Some(&second)).await.unwrap();
    assert_eq!(second.request_count(), 1);
    assert_eq!(summary.cache_hits, 0);
}

#[tokio::test]
async fn test_postDictionary_shouldRewriteCellsButCacheRawOutput() {
    let (dir, mut config) = setup("猫\n");
    config.post_dictionary = Some(
        common::create_test_file(dir.path(), "post.csv", "find,replace\n[en],(en)\n").unwrap(),
    );
    controller(config).run_with_engine(Some(&MockEngine::working())).await.unwrap();

    let store = Store::import(output_of(dir.path())).unwrap();
    assert_eq!(store.get_cell(2, "C").unwrap(), Some("(en) 猫"));

    let cache = TranslationCache::load(dir.path().join("backups").join("cache.csv")).unwrap();
    assert_eq!(cache.get("猫", MOCK_IDENTITY).as_deref(), Some("[en] 猫"));
}

#[tokio::test]
async fn test_touchedRows_shouldBypassCache() {
    let (dir, mut config) = setup("先輩\n\n猫\n");
    config.pre_dictionary = Some(
        common::create_test_file(dir.path(), "pre.csv", "find,replace\n先輩,senpai\n").unwrap(),
    );
    controller(config.clone()).run_with_engine(Some(&MockEngine::working())).await.unwrap();

    let store = Store::import(output_of(dir.path())).unwrap();
    assert_eq!(store.get_cell(2, "A").unwrap(), Some("senpai"));
    assert_eq!(store.get_cell(2, "B").unwrap(), Some("1!true"));

    let cache = TranslationCache::load(dir.path().join("backups").join("cache.csv")).unwrap();
    assert_eq!(cache.get("senpai", MOCK_IDENTITY), None);
    assert!(cache.get("猫", MOCK_IDENTITY).is_some());

    let second = MockEngine::working().with_batches(false);
    let summary = controller(config).run_with_engine(Some(&second)).await.unwrap();
    assert_eq!(summary.cache_hits, 1);
    assert_eq!(second.request_count(), 1);
}

#[tokio::test]
async fn test_lineByLine_shouldWriteOneLinePerUnit() {
    let (dir, config) = setup("猫\n\n犬\n\n猫\n");
    let config = Config { line_by_line_mode: true, ..config };
    controller(config).run_with_engine(Some(&MockEngine::working())).await.unwrap();

    let text = std::fs::read_to_string(dir.path().join("script.translated.txt")).unwrap();
    assert_eq!(text, "[en] 猫\n[en] 犬\n[en] 猫\n");
}

#[tokio::test]
async fn test_run_withSugoiDown_shouldBeUnreachable() {
    let (_dir, config) = setup("猫\n");
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = Config {
        engine: EngineKind::Sugoi,
        address: "127.0.0.1".to_string(),
        port: Some(port),
        ..config
    };
    let result = controller(config).run().await;
    assert!(matches!(result, Err(AppError::EngineUnreachable(_))));
}

#[tokio::test]
async fn test_run_cancelledFromSpawnedTask_shouldStopEarlyAndSnapshot() {
    let (dir, config) = setup(&numbered_script(200));
    let engine = MockEngine::working().with_batches(false);
    let controller = controller(config);
    let cancel = controller.cancel_flag();
    tokio::spawn(async move {
        cancel.store(true, Ordering::SeqCst);
    });

    let result = controller.run_with_engine(Some(&engine)).await;
    assert!(matches!(result, Err(AppError::Cancelled)));
    assert!(engine.request_count() < 200);
    assert!(output_of(dir.path()).is_file());
}
