use crate::models::ocr::{Code, Word};

/// Drop every word whose box intersects any code box.
///
/// Engines tend to read the module pattern of a barcode or QR code as garbage
/// text, so the code detector wins wherever the two disagree.
pub fn remove_words_over_codes(words: Vec<Word>, codes: &[Code]) -> Vec<Word> {
    if codes.is_empty() {
        return words;
    }
    words
        .into_iter()
        .filter(|word| !codes.iter().any(|code| word.bounds.intersects(&code.bounds)))
        .collect()
}
