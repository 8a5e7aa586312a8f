//! Rule-based isnad parser.
//!
//! Splits free-text chains into transmission paths and narrator names using
//! the conventions of classical hadith collections:
//!
//! - a standalone `ح` (tahwil) switches to another path,
//! - narration verbs (`حدثنا`, `أخبرني`, `عن`, `سمعت`, ...) introduce the
//!   next narrator,
//! - fillers (`قال`, `أنه`, `يقول`, ...) end a name without starting another,
//! - the Prophet (`رسول الله`, `النبي`) ends the chain and is not a narrator.
//!
//! Paths are returned in text order: the compiler's teacher first, the
//! companion last.

use serde::{Deserialize, Serialize};

use crate::arabic::{normalize_arabic, strip_diacritics};

/// A narrator name as extracted from text, before matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedNarrator {
    pub name: String,
    #[serde(default)]
    pub verb: Option<String>,
}

/// One transmission path, in text order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IsnadChain {
    pub narrators: Vec<ExtractedNarrator>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IsnadAnalysis {
    pub chains: Vec<IsnadChain>,
}

impl IsnadAnalysis {
    pub fn narrator_count(&self) -> usize {
        self.chains.iter().map(|c| c.narrators.len()).sum()
    }

    /// Drop empty names and empty chains.
    pub fn cleaned(mut self) -> Self {
        for chain in &mut self.chains {
            for n in &mut chain.narrators {
                n.name = n.name.split_whitespace().collect::<Vec<_>>().join(" ");
            }
            chain.narrators.retain(|n| !n.name.is_empty());
        }
        self.chains.retain(|c| !c.narrators.is_empty());
        self
    }
}

/// Normalized narration verbs.
const VERBS: &[&str] = &[
    "حدثنا", "حدثني", "حدثه", "حدثها", "حدثهم", "ثنا", "اخبرنا", "اخبرني", "اخبره", "انبانا",
    "انباني", "سمعت", "سمعنا", "سمع", "عن",
];

/// Words that end a name without introducing a new narrator.
const FILLERS: &[&str] = &[
    "قال", "قالت", "قالا", "يقول", "تقول", "انه", "انها", "انهم", "ان", "يحدث", "يذكر",
];

/// Words that end a name and count towards the gap before the matn.
/// Compared against the undotted-but-unfolded form so `على` is not `علي`.
const NAME_ENDERS: &[&str] = &["على", "في", "وهو", "يعني", "وكان", "وذلك"];

const HONORIFICS: &[&[&str]] = &[
    &["رضي", "الله", "عنه"],
    &["رضي", "الله", "عنها"],
    &["رضي", "الله", "عنهما"],
    &["رضي", "الله", "عنهم"],
    &["رحمه", "الله"],
    &["رحمها", "الله"],
];

const PROPHET: &[&[&str]] = &[&["رسول", "الله"], &["النبي"], &["نبي", "الله"]];

/// Non-filler tokens tolerated between a name and the next verb.
const MAX_GAP: usize = 3;
/// Longer "names" are matn text that slipped through.
const MAX_NAME_TOKENS: usize = 12;

const PUNCTUATION: &[char] = &[
    '،', ',', '.', ':', '؛', ';', '"', '«', '»', '(', ')', '[', ']', '-', '؟', '?', '!',
];

struct Token {
    raw: String,
    /// Diacritics removed, letters unfolded.
    bare: String,
    norm: String,
}

fn tokenize(text: &str) -> Vec<Token> {
    text.split_whitespace()
        .filter_map(|w| {
            let raw = w.trim_matches(PUNCTUATION);
            if raw.is_empty() {
                return None;
            }
            Some(Token {
                raw: raw.to_string(),
                bare: strip_diacritics(raw),
                norm: normalize_arabic(raw),
            })
        })
        .collect()
}

fn is_verb(norm: &str) -> bool {
    VERBS.contains(&norm)
}

/// Accepts a conjunctive `و` prefix (`وحدثنا`) and returns the verb as
/// written, without the prefix.
fn verb_of(tok: &Token) -> Option<String> {
    if is_verb(&tok.norm) {
        return Some(tok.raw.clone());
    }
    let stripped = tok.norm.strip_prefix('و')?;
    if !is_verb(stripped) {
        return None;
    }
    Some(tok.raw.strip_prefix('و').unwrap_or(&tok.raw).to_string())
}

fn is_tahwil(norm: &str) -> bool {
    norm == "ح"
}

fn matches_seq(tokens: &[Token], at: usize, seq: &[&str]) -> bool {
    seq.iter()
        .enumerate()
        .all(|(i, s)| tokens.get(at + i).map(|t| t.norm.as_str()) == Some(*s))
}

fn match_any(tokens: &[Token], at: usize, seqs: &[&[&str]]) -> Option<usize> {
    seqs.iter()
        .find(|s| matches_seq(tokens, at, s))
        .map(|s| s.len())
}

enum State {
    /// Before the first verb of the path.
    Preamble,
    /// Collecting a name introduced by `verb`.
    Name { verb: String, parts: Vec<String> },
    /// Between a finished name and the next verb.
    Gap(usize),
}

fn flush(chain: &mut IsnadChain, verb: String, parts: Vec<String>) {
    if !parts.is_empty() {
        chain.narrators.push(ExtractedNarrator {
            name: parts.join(" "),
            verb: Some(verb),
        });
    }
}

fn parse_path(tokens: &[Token]) -> IsnadChain {
    let mut chain = IsnadChain::default();
    let mut state = State::Preamble;
    let mut i = 0;

    while i < tokens.len() {
        if let Some(len) = match_any(tokens, i, HONORIFICS) {
            i += len;
            continue;
        }

        let tok = &tokens[i];

        if let Some(verb) = verb_of(tok) {
            if let State::Name { verb, parts } = std::mem::replace(&mut state, State::Gap(0)) {
                flush(&mut chain, verb, parts);
            }
            state = State::Name {
                verb,
                parts: Vec::new(),
            };
            i += 1;
            continue;
        }

        let at_name_start = matches!(&state, State::Name { parts, .. } if parts.is_empty());
        if (at_name_start || matches!(state, State::Gap(_)))
            && match_any(tokens, i, PROPHET).is_some()
        {
            state = State::Gap(MAX_GAP);
            break;
        }

        let is_filler = FILLERS.contains(&tok.norm.as_str());
        let is_ender = NAME_ENDERS.contains(&tok.bare.as_str());

        let (next, stop) = match state {
            State::Preamble => (State::Preamble, false),
            State::Name { verb, parts } if is_filler || (is_ender && !parts.is_empty()) => {
                flush(&mut chain, verb, parts);
                (State::Gap(usize::from(is_ender)), false)
            }
            State::Name { verb, mut parts } => {
                parts.push(tok.raw.clone());
                if parts.len() > MAX_NAME_TOKENS {
                    // Runaway name: the matn has started.
                    (State::Gap(MAX_GAP), true)
                } else {
                    (State::Name { verb, parts }, false)
                }
            }
            State::Gap(n) => {
                let n = if is_filler { n } else { n + 1 };
                (State::Gap(n), n >= MAX_GAP)
            }
        };
        state = next;
        if stop {
            break;
        }
        i += 1;
    }

    if let State::Name { verb, parts } = state {
        flush(&mut chain, verb, parts);
    }

    chain
}

/// Parse an isnad into one chain per transmission path.
///
/// When a path that precedes a tahwil ends with a narrator who also appears
/// in the final path, it inherits the final path's tail from that narrator
/// onward.
pub fn parse_isnad(text: &str) -> IsnadAnalysis {
    let tokens = tokenize(text);
    let mut chains: Vec<IsnadChain> = tokens
        .split(|t| is_tahwil(&t.norm))
        .map(parse_path)
        .filter(|c| !c.narrators.is_empty())
        .collect();

    if let Some((last, earlier)) = chains.split_last_mut() {
        for chain in earlier.iter_mut() {
            let Some(tail_name) = chain.narrators.last().map(|n| normalize_arabic(&n.name)) else {
                continue;
            };
            if let Some(j) = last
                .narrators
                .iter()
                .position(|n| normalize_arabic(&n.name) == tail_name)
            {
                chain.narrators.extend(last.narrators[j + 1..].iter().cloned());
            }
        }
    }

    IsnadAnalysis { chains }
}
