/*!
 * Export then import through every supported file format
 */

use vntl::errors::StoreError;
use vntl::store::Store;

use crate::common;

/// Header row plus three data rows, one with a gap and one with a line break
fn sample() -> Store {
    let mut store = Store::with_headers(&["rawText", "metadata", "sugoi"]);
    store
        .append_row(vec![Some("おはよう".to_string()), Some("1!false".to_string()), Some("Good morning".to_string())])
        .unwrap();
    store
        .append_row(vec![Some("二行\n目".to_string()), Some("2!false".to_string()), None])
        .unwrap();
    store
        .append_row(vec![
            Some("<tag> & \"quotes\"".to_string()),
            Some("1!true".to_string()),
            Some("a  b, c".to_string()),
        ])
        .unwrap();
    store.initialize_cache().unwrap();
    store
}

fn assert_same_cells(expected: &Store, actual: &Store) {
    for row in 1..=expected.row_count() {
        for column in ["A", "B", "C"] {
            assert_eq!(
                expected.get_cell(row, column).unwrap(),
                actual.get_cell(row, column).unwrap(),
                "cell {}{}",
                column,
                row
            );
        }
    }
}

fn roundtrip(extension: &str) -> Store {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join(format!("table.{}", extension));
    sample().export(&path).unwrap();
    let mut imported = Store::import(&path).unwrap();
    imported.initialize_cache().unwrap();
    imported
}

#[test]
fn test_csv_roundTrip_shouldKeepCellsAndKeyOrder() {
    let imported = roundtrip("csv");
    assert_same_cells(&sample(), &imported);
    assert_eq!(imported.search_first_column("二行\n目"), Some(3));
}

#[test]
fn test_xlsx_roundTrip_shouldKeepCellsAndSheetName() {
    let original = sample().with_sheet_name("Chapter 1");
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("table.xlsx");
    original.export(&path).unwrap();

    let imported = Store::import(&path).unwrap();
    assert_eq!(imported.sheet_name(), "Chapter 1");
    assert_same_cells(&original, &imported);
    assert_eq!(imported.get_cell(3, "C").unwrap(), None);
}

#[test]
fn test_ods_roundTrip_shouldKeepCellsAndSpaces() {
    let imported = roundtrip("ods");
    assert_same_cells(&sample(), &imported);
    assert_eq!(imported.get_cell(4, "C").unwrap(), Some("a  b, c"));
}

#[test]
fn test_text_export_shouldWriteRightMostTranslationPerRow() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("table.txt");
    sample().export(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text, "Good morning\n二行 目\na  b, c\n");

    let imported = Store::import(&path).unwrap();
    assert_eq!(imported.get_cell(1, "A").unwrap(), Some("rawText"));
    assert_eq!(imported.get_cell(3, "A").unwrap(), Some("二行 目"));
    assert_eq!(imported.row_count(), 4);
}

#[test]
fn test_xls_shouldBeUnsupported() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(dir.path(), "legacy.xls", "").unwrap();
    assert!(matches!(Store::import(&path), Err(StoreError::UnsupportedFormat(_))));
    assert!(matches!(sample().export(&path), Err(StoreError::UnsupportedFormat(_))));
}

#[test]
fn test_unknownExtension_shouldBeUnsupported() {
    let dir = common::create_temp_dir().unwrap();
    assert!(matches!(
        sample().export(dir.path().join("table.json")),
        Err(StoreError::UnsupportedFormat(_))
    ));
}
