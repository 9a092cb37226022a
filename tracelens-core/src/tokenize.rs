//! Word-cloud corpus tokenizer
//!
//! Turns user-authored message text into token -> occurrence counts. Code
//! blocks, URLs, and hash-like strings are stripped first so the cloud
//! reflects what people actually wrote, not what they pasted.
//!
//! Two extraction passes run over the cleaned text and are merged into one
//! count map: a latin-alphabet pass and a CJK pass that also emits sliding
//! 2-gram and 3-gram substrings so multi-character words surface without
//! segmentation.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

static FENCED_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").expect("fenced code"));
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`]*`").expect("inline code"));
static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("url"));
static LONG_HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9a-fA-F]{32,}\b").expect("long hex"));

/// Maximal runs of lowercase letters/digits/hyphen/underscore. Runs are
/// judged whole: one that does not start with a letter or falls outside
/// length 2-30 is discarded entirely, never re-matched from the inside.
static LATIN_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9_-]+").expect("latin run"));

/// Runs of 2+ contiguous CJK ideographs.
static CJK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{Han}{2,}").expect("cjk run"));

const LATIN_STOPWORDS: &[&str] = &[
    "about", "after", "again", "all", "also", "an", "and", "any", "are", "as", "at", "be",
    "because", "been", "before", "being", "but", "by", "can", "cannot", "could", "did", "do",
    "does", "doing", "done", "down", "each", "for", "from", "get", "got", "had", "has", "have",
    "he", "her", "here", "him", "his", "how", "if", "in", "into", "is", "it", "its", "just",
    "like", "make", "me", "more", "most", "my", "need", "no", "not", "now", "of", "on", "one",
    "only", "or", "other", "our", "out", "over", "please", "she", "should", "so", "some", "than",
    "that", "the", "their", "them", "then", "there", "these", "they", "this", "those", "to",
    "too", "up", "us", "use", "used", "using", "want", "was", "we", "were", "what", "when",
    "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

const CJK_STOPWORDS: &[&str] = &[
    "一个", "一下", "不是", "不要", "了吗", "什么", "他们", "但是", "你们", "使用", "可以",
    "吗", "因为", "如果", "帮我", "我们", "我的", "所以", "进行", "这个", "这样", "这些",
    "那个", "那些", "需要", "现在", "没有", "然后", "还是", "就是", "的话",
];

static LATIN_STOP_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| LATIN_STOPWORDS.iter().copied().collect());

static CJK_STOP_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| CJK_STOPWORDS.iter().copied().collect());

/// Strip code, URLs, and hash-like noise, then lowercase.
fn clean(text: &str) -> String {
    let text = FENCED_CODE.replace_all(text, " ");
    let text = INLINE_CODE.replace_all(&text, " ");
    let text = URL.replace_all(&text, " ");
    let text = LONG_HEX.replace_all(&text, " ");
    text.to_lowercase()
}

fn bump(counts: &mut HashMap<String, i64>, token: &str) {
    *counts.entry(token.to_string()).or_insert(0) += 1;
}

/// Count word-cloud tokens in user-authored text.
pub fn count_user_tokens(text: &str) -> HashMap<String, i64> {
    let cleaned = clean(text);
    let mut counts = HashMap::new();

    for m in LATIN_RUN.find_iter(&cleaned) {
        let token = m.as_str();
        if !token.starts_with(|c: char| c.is_ascii_lowercase()) {
            continue;
        }
        if token.len() < 2 || token.len() > 30 {
            continue;
        }
        if !LATIN_STOP_SET.contains(token) {
            bump(&mut counts, token);
        }
    }

    for m in CJK_RUN.find_iter(&cleaned) {
        count_cjk_run(&mut counts, m.as_str());
    }

    counts
}

/// One CJK run: the whole run counts as a token when short enough, and every
/// 2-character window counts; 3-character windows too once the run is long
/// enough for them to be informative.
fn count_cjk_run(counts: &mut HashMap<String, i64>, run: &str) {
    let chars: Vec<char> = run.chars().collect();
    let n = chars.len();

    if n <= 4 && !CJK_STOP_SET.contains(run) {
        bump(counts, run);
    }

    for window in chars.windows(2) {
        let token: String = window.iter().collect();
        if !CJK_STOP_SET.contains(token.as_str()) {
            bump(counts, &token);
        }
    }

    if n >= 4 {
        for window in chars.windows(3) {
            let token: String = window.iter().collect();
            if !CJK_STOP_SET.contains(token.as_str()) {
                bump(counts, &token);
            }
        }
    }
}
