/*!
 * Common test utilities for the vntl test suite
 */

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tempfile::TempDir;

use vntl::engines::{Analyzer, EngineContext};
use vntl::language_utils::{LanguageSide, LanguageTable};

pub mod fake_server;

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Three paragraphs, the first repeated at the end
pub fn create_test_scenario(dir: &Path, filename: &str) -> Result<PathBuf> {
    create_test_file(dir, filename, "おはよう。\n\nいい天気だね。\n\nおはよう。\n")
}

/// Japanese to English context with the bundled language table
pub fn japanese_to_english() -> EngineContext {
    let table = LanguageTable::builtin().expect("bundled language table");
    EngineContext::new(
        table.resolve("Japanese", LanguageSide::Source).expect("Japanese"),
        table.resolve("English", LanguageSide::Target).expect("English"),
    )
}

/// Installs `env_logger` once so failing tests show engine logs
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Analyzer over a four-word MeCab-format dictionary
pub fn small_analyzer() -> Analyzer {
    let lexicon = "猫,0,0,100,名詞,一般,*,*,*,*,猫,ネコ,ネコ
が,0,0,100,助詞,格助詞,一般,*,*,*,が,ガ,ガ
好き,0,0,100,名詞,形容動詞語幹,*,*,*,*,好き,スキ,スキ
写真,0,0,100,名詞,一般,*,*,*,*,写真,シャシン,シャシン
";
    Analyzer::from_sources(
        "small",
        lexicon.as_bytes(),
        "1 1\n0 0 0\n".as_bytes(),
        "DEFAULT 0 0 1\n".as_bytes(),
        "DEFAULT,0,0,10000,記号,一般,*,*,*,*,*\n".as_bytes(),
    )
    .expect("small dictionary compiles")
}
