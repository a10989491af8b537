//! 説明文の正規化とトークナイズ。
use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use unicode_normalization::UnicodeNormalization;

/// Maps one free-text description to the token sequence the embedder sees.
pub trait TextNormalizer: Send + Sync {
    fn normalize(&self, text: &str) -> Vec<String>;
}

/// English normalizer: contractions expanded, URLs, punctuation and
/// digit-bearing tokens removed, stopwords and one-character tokens dropped,
/// and the surviving tokens lemmatized as nouns.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicTextNormalizer;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+|www\.\S+").expect("compile url regex"));
static DIGIT_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w*\d\w*").expect("compile digit token regex"));
static IRREGULAR_NEGATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(won|can|shan|ain)'t\b").expect("compile irregular negation regex")
});
static NEGATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w)n't\b").expect("compile negation regex"));
static PRONOUN_IS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(it|he|she|that|there|what|who|where|here|how|let)'s\b")
        .expect("compile pronoun contraction regex")
});
static SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w)'(re|ll|ve|m|d)\b").expect("compile suffix regex"));

static STOPWORDS: Lazy<FxHashSet<&'static str>> =
    Lazy::new(|| ENGLISH_STOPWORDS.iter().copied().collect());
static IRREGULAR_PLURALS: Lazy<FxHashMap<&'static str, &'static str>> =
    Lazy::new(|| IRREGULAR_NOUNS.iter().copied().collect());
static SINGULARS_IN_S: Lazy<FxHashSet<&'static str>> =
    Lazy::new(|| SINGULAR_S_WORDS.iter().copied().collect());
static IE_NOUNS: Lazy<FxHashSet<&'static str>> =
    Lazy::new(|| IE_NOUN_WORDS.iter().copied().collect());
static CHE_NOUNS: Lazy<FxHashSet<&'static str>> =
    Lazy::new(|| CHE_NOUN_WORDS.iter().copied().collect());
static OE_NOUNS: Lazy<FxHashSet<&'static str>> =
    Lazy::new(|| OE_NOUN_WORDS.iter().copied().collect());
static MEN_SINGULARS: Lazy<FxHashSet<&'static str>> =
    Lazy::new(|| MEN_SINGULAR_WORDS.iter().copied().collect());

impl TextNormalizer for BasicTextNormalizer {
    fn normalize(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let lowered = text.nfkc().collect::<String>().to_lowercase().replace('’', "'");
        let expanded = expand_contractions(&lowered);
        let without_urls = URL_RE.replace_all(&expanded, " ");
        let without_punct: String = without_urls
            .chars()
            .filter(|c| !c.is_ascii_punctuation())
            .collect();
        let without_digits = DIGIT_TOKEN_RE.replace_all(&without_punct, " ");

        without_digits
            .split_whitespace()
            .filter(|token| token.chars().count() > 1 && !STOPWORDS.contains(token))
            .map(|token| lemmatize_noun(token).into_owned())
            .collect()
    }
}

/// 名詞の複数形を単数形に戻す。複数形でないトークンはそのまま返す。
///
/// Irregular plurals come from a fixed table; regular ones follow the
/// English suffix rules (`-ies`, `-ches`, `-xes`, `-oes`, `-men`, `-s`).
#[must_use]
pub fn lemmatize_noun(token: &str) -> Cow<'_, str> {
    if let Some(lemma) = IRREGULAR_PLURALS.get(token) {
        return Cow::Borrowed(*lemma);
    }
    if token.chars().count() <= 3 || SINGULARS_IN_S.contains(token) {
        return Cow::Borrowed(token);
    }
    if let Some(stem) = token.strip_suffix("men") {
        if MEN_SINGULARS.contains(token) {
            return Cow::Borrowed(token);
        }
        return Cow::Owned(format!("{stem}man"));
    }
    if !token.ends_with('s') || ["ss", "us", "is"].iter().any(|end| token.ends_with(end)) {
        return Cow::Borrowed(token);
    }

    if let Some(stem) = token.strip_suffix("ies") {
        let ie = format!("{stem}ie");
        if stem.chars().count() < 2 || IE_NOUNS.contains(ie.as_str()) {
            return Cow::Owned(ie);
        }
        return Cow::Owned(format!("{stem}y"));
    }
    for (suffix, singular) in [("sses", "ss"), ("zzes", "z"), ("xes", "x"), ("shes", "sh")] {
        if let Some(stem) = token.strip_suffix(suffix) {
            return Cow::Owned(format!("{stem}{singular}"));
        }
    }
    if let Some(stem) = token.strip_suffix("ches") {
        let che = format!("{stem}che");
        if CHE_NOUNS.contains(che.as_str()) {
            return Cow::Owned(che);
        }
        return Cow::Owned(format!("{stem}ch"));
    }
    if let Some(stem) = token.strip_suffix("oes") {
        let oe = format!("{stem}oe");
        if stem.chars().count() >= 3 && !OE_NOUNS.contains(oe.as_str()) {
            return Cow::Owned(format!("{stem}o"));
        }
        return Cow::Owned(oe);
    }
    Cow::Borrowed(&token[..token.len() - 1])
}

fn expand_contractions(text: &str) -> String {
    let text = IRREGULAR_NEGATION_RE.replace_all(text, |caps: &regex::Captures<'_>| {
        match &caps[1] {
            "won" => "will not",
            "can" => "cannot",
            "shan" => "shall not",
            _ => "is not",
        }
    });
    let text = NEGATION_RE.replace_all(&text, "$1 not");
    let text = PRONOUN_IS_RE.replace_all(&text, |caps: &regex::Captures<'_>| {
        if &caps[1] == "let" {
            "let us".to_string()
        } else {
            format!("{} is", &caps[1])
        }
    });
    SUFFIX_RE
        .replace_all(&text, |caps: &regex::Captures<'_>| {
            let expansion = match &caps[2] {
                "re" => "are",
                "ll" => "will",
                "ve" => "have",
                "m" => "am",
                _ => "would",
            };
            format!("{} {expansion}", &caps[1])
        })
        .into_owned()
}

const ENGLISH_STOPWORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "your", "yours",
    "yourself", "yourselves", "he", "him", "his", "himself", "she", "her", "hers", "herself",
    "it", "its", "itself", "they", "them", "their", "theirs", "themselves", "what", "which",
    "who", "whom", "this", "that", "these", "those", "am", "is", "are", "was", "were", "be",
    "been", "being", "have", "has", "had", "having", "do", "does", "did", "doing", "a", "an",
    "the", "and", "but", "if", "or", "because", "as", "until", "while", "of", "at", "by",
    "for", "with", "about", "against", "between", "into", "through", "during", "before",
    "after", "above", "below", "to", "from", "up", "down", "in", "out", "on", "off", "over",
    "under", "again", "further", "then", "once", "here", "there", "when", "where", "why",
    "how", "all", "any", "both", "each", "few", "more", "most", "other", "some", "such", "no",
    "nor", "not", "only", "own", "same", "so", "than", "too", "very", "can", "will", "just",
    "should", "now", "cannot", "would", "could", "shall", "us", "also", "get", "gets",
];

const IRREGULAR_NOUNS: &[(&str, &str)] = &[
    ("children", "child"),
    ("men", "man"),
    ("people", "person"),
    ("feet", "foot"),
    ("teeth", "tooth"),
    ("geese", "goose"),
    ("mice", "mouse"),
    ("lice", "louse"),
    ("oxen", "ox"),
    ("dice", "die"),
    ("wolves", "wolf"),
    ("thieves", "thief"),
    ("lives", "life"),
    ("wives", "wife"),
    ("knives", "knife"),
    ("leaves", "leaf"),
    ("halves", "half"),
    ("shelves", "shelf"),
    ("selves", "self"),
    ("elves", "elf"),
    ("calves", "calf"),
    ("loaves", "loaf"),
    ("scarves", "scarf"),
    ("hooves", "hoof"),
    ("dwarves", "dwarf"),
    ("goes", "go"),
    ("crises", "crisis"),
    ("analyses", "analysis"),
    ("theses", "thesis"),
    ("phenomena", "phenomenon"),
    ("criteria", "criterion"),
    ("cacti", "cactus"),
    ("fungi", "fungus"),
    ("alumni", "alumnus"),
];

const SINGULAR_S_WORDS: &[&str] = &[
    "news", "series", "species", "means", "physics", "mathematics", "politics", "economics",
    "athletics", "ethics", "electronics", "graphics", "gymnastics", "olympics", "chaos",
    "atlas", "canvas", "alias", "christmas", "texas", "paris", "always", "perhaps", "towards",
    "afterwards", "backwards", "forwards", "sometimes", "besides", "whereas", "unless", "thus",
    "across", "upstairs", "downstairs", "overseas", "outdoors", "indoors", "nowadays",
    "regardless", "nevertheless", "lens", "mumps", "measles", "diabetes", "herpes", "rabies",
];

const IE_NOUN_WORDS: &[&str] = &[
    "movie", "zombie", "cookie", "rookie", "hippie", "selfie", "brownie", "calorie", "prairie",
    "auntie", "goalie", "pixie", "groupie", "genie", "newbie", "sweetie", "yuppie", "hoodie",
    "roomie", "bookie", "freebie", "indie", "junkie", "techie", "foodie", "magpie", "collie",
    "lassie", "smoothie", "hottie", "bestie", "birdie", "veggie", "boogie",
];

const CHE_NOUN_WORDS: &[&str] = &[
    "headache", "niche", "cache", "avalanche", "moustache", "mustache", "psyche", "cliche",
    "quiche", "creche", "microfiche", "earache", "toothache", "backache", "stomachache",
];

const OE_NOUN_WORDS: &[&str] = &["canoe", "oboe", "throe", "tiptoe", "sloe", "floe"];

const MEN_SINGULAR_WORDS: &[&str] = &[
    "omen", "specimen", "abdomen", "acumen", "semen", "stamen", "hymen", "regimen", "amen",
    "ramen", "yemen",
];
