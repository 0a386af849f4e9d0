/*!
 * Scenario parsing.
 *
 * - `definitions`: the parse-definitions file
 * - `extractor`: paragraph extraction into the store
 */

pub mod definitions;
pub mod extractor;

pub use definitions::{ParagraphDelimiter, ParseDefinitions, WordWrapMode};
pub use extractor::{parse_metadata, ExtractionSummary, Extractor, Unit};
