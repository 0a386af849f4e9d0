/*!
 * Tests for parse definitions and the extractor
 */

use vntl::dictionary::{CharacterNames, Dictionary};
use vntl::parsing::{ExtractionSummary, Extractor, ParagraphDelimiter, ParseDefinitions, WordWrapMode};
use vntl::store::Store;

use crate::common;

fn definitions(max_lines: usize, ignore: &[char]) -> ParseDefinitions {
    ParseDefinitions {
        max_lines_per_paragraph: max_lines,
        ignore_prefixes: ignore.to_vec(),
        ..ParseDefinitions::default()
    }
}

#[test]
fn test_extract_variousInputs_shouldCoverSurvivingLinesExactly() {
    let inputs = [
        "A\nB\nC\nD\nE\n",
        "# header\nline one\n\n\n  line two  \n# note\nline three\nline four\n",
        "\n\n\nonly\n",
        "# all ignored\n# really\n",
    ];
    let names = CharacterNames::default();
    let pre = Dictionary::default();
    for max_lines in 1..=4 {
        let rules = definitions(max_lines, &['#']);
        let extractor = Extractor::new(&rules, &names, &pre);
        for input in inputs {
            let units = extractor.extract(input);
            for unit in &units {
                assert!((1..=max_lines).contains(&unit.line_count), "{:?}", unit);
                assert_eq!(unit.text.lines().count(), unit.line_count);
            }
            let surviving: Vec<&str> = input
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .collect();
            let emitted: Vec<&str> = units.iter().flat_map(|u| u.text.lines()).collect();
            assert_eq!(emitted, surviving, "max_lines={} input={:?}", max_lines, input);
        }
    }
}

#[test]
fn test_extract_repeatedLine_shouldInsertOneRow() {
    let rules = ParseDefinitions::default();
    let names = CharacterNames::default();
    let pre = Dictionary::default();
    let mut store = Store::working_set();
    let summary = Extractor::new(&rules, &names, &pre)
        .extract_into("こんにちは\n\nこんにちは\n\nこんにちは\n", &mut store)
        .unwrap();
    assert_eq!(summary, ExtractionSummary { units: 3, new_rows: 1, touched: 0 });
    assert_eq!(store.index_len(), 1);
    assert_eq!(store.get_cell(2, "B").unwrap(), Some("1!false"));
}

#[test]
fn test_extract_withNewLineDelimiter_shouldEmitEveryLine() {
    let rules = ParseDefinitions {
        paragraph_delimiter: ParagraphDelimiter::NewLine,
        ..ParseDefinitions::default()
    };
    let names = CharacterNames::default();
    let pre = Dictionary::default();
    let units = Extractor::new(&rules, &names, &pre).extract("a\nb\nc\n");
    let keys: Vec<_> = units.iter().map(|u| u.text.as_str()).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
}

#[test]
fn test_extract_whenPreDictionaryEmptiesUnit_shouldDropIt() {
    let rules = definitions(1, &[]);
    let names = CharacterNames::default();
    let pre = Dictionary::from_pairs([("（笑）", "")]);
    let units = Extractor::new(&rules, &names, &pre).extract("（笑）\nはい\n");
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].text, "はい");
}

#[test]
fn test_extractTable_shouldReadFirstColumn() {
    let mut table = Store::with_headers(&["text", "note"]);
    table.append_row(vec![Some("[＠クロエ]「おはよう」".to_string()), Some("x".to_string())]).unwrap();
    table.append_row(vec![Some("二行目\n続き".to_string())]).unwrap();
    let rules = ParseDefinitions::default();
    let names = CharacterNames::from_pairs([("[＠クロエ]", "Chloe")]);
    let pre = Dictionary::default();
    let units = Extractor::new(&rules, &names, &pre).extract_table(&table);
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].text, "Chloe「おはよう」");
    assert_eq!(units[1].line_count, 2);
}

#[test]
fn test_load_fromFile_shouldParseEveryOption() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(
        dir.path(),
        "parse.txt",
        "paragraphDelimiter=emptyLine\nignoreLinesThatStartWith=[ ;\nmaximumNumberOfLinesPerParagraph=2\nwordWrap=40\nwordWrapMode=strict\n",
    )
    .unwrap();
    let rules = ParseDefinitions::load(&path, "utf-8").unwrap();
    assert_eq!(rules.paragraph_delimiter, ParagraphDelimiter::EmptyLine);
    assert!(rules.is_ignore_prefix('['));
    assert!(rules.is_ignore_prefix(';'));
    assert_eq!(rules.max_lines_per_paragraph, 2);
    assert_eq!(rules.word_wrap, Some(40));
    assert_eq!(rules.word_wrap_mode, WordWrapMode::Strict);
}

#[test]
fn test_dynamicWordWrap_shouldNotChangeExtraction() {
    let plain = definitions(3, &[]);
    let dynamic = ParseDefinitions {
        word_wrap: Some(10),
        word_wrap_mode: WordWrapMode::Dynamic,
        ..plain.clone()
    };
    let names = CharacterNames::default();
    let pre = Dictionary::default();
    let input = "とても長い一行のせりふがここにあります\n次\n";
    assert_eq!(
        Extractor::new(&plain, &names, &pre).extract(input),
        Extractor::new(&dynamic, &names, &pre).extract(input)
    );
}
