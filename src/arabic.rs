//! Arabic text normalization for search and name matching.
//!
//! Hadith texts and narrator names are entered with inconsistent diacritics
//! and letter variants. Every comparison in the catalogue goes through
//! [`normalize_arabic`] so that `أَبُو هُرَيْرَةَ` and `ابو هريره` compare equal.

/// Returns true for tashkeel marks, superscript alef and tatweel.
fn is_ignorable(c: char) -> bool {
    matches!(c, '\u{0610}'..='\u{061A}' | '\u{064B}'..='\u{065F}' | '\u{0670}' | '\u{06D6}'..='\u{06ED}' | '\u{0640}')
}

fn fold_letter(c: char) -> char {
    match c {
        'أ' | 'إ' | 'آ' | 'ٱ' => 'ا',
        'ى' => 'ي',
        'ة' => 'ه',
        'ؤ' => 'و',
        'ئ' => 'ي',
        _ => c,
    }
}

/// Remove diacritics and tatweel, leaving letters as written.
pub fn strip_diacritics(text: &str) -> String {
    text.chars().filter(|c| !is_ignorable(*c)).collect()
}

/// Normalize Arabic text for comparison.
///
/// Strips diacritics and tatweel, folds hamza/alef variants, alef maqsura
/// and ta marbuta, lowercases Latin letters, and collapses whitespace.
pub fn normalize_arabic(text: &str) -> String {
    let folded: String = text
        .chars()
        .filter(|c| !is_ignorable(*c))
        .map(fold_letter)
        .flat_map(char::to_lowercase)
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Escape `%`, `_` and `\` for use inside a `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
