//! Tokenisation, sentence boundaries, word splicing, and the commit merge.
//!
//! A word is any whitespace-delimited token. A sentence boundary falls after
//! every word whose final character is `.`, `!` or `?`; a trailing run of
//! words with no terminal delimiter forms one more sentence. Whitespace runs
//! are treated as single separators throughout: every function here
//! reserialises with single spaces.

use crate::protocol::status::StoreError;

/// Span of one sentence as inclusive word indexes into the token list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentence {
    pub start: usize,
    pub end: usize,
    /// Whether the last word carries a terminal delimiter.
    pub terminated: bool,
}

pub fn tokenize(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

fn is_delimited(word: &str) -> bool {
    matches!(word.chars().last(), Some('.') | Some('!') | Some('?'))
}

/// Computes sentence spans over a token list.
pub fn split_sentences(words: &[&str]) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (i, word) in words.iter().enumerate() {
        if is_delimited(word) {
            sentences.push(Sentence {
                start,
                end: i,
                terminated: true,
            });
            start = i + 1;
        }
    }
    if start < words.len() {
        sentences.push(Sentence {
            start,
            end: words.len() - 1,
            terminated: false,
        });
    }
    sentences
}

/// Number of sentence slots a WRITE may target: `[1, writable_slots]`.
///
/// The extra slot past the last sentence exists only when that sentence is
/// delimiter-terminated. An empty file has exactly one writable slot.
pub fn writable_slots(text: &str) -> usize {
    let words = tokenize(text);
    if words.is_empty() {
        return 1;
    }
    let sentences = split_sentences(&words);
    match sentences.last() {
        Some(last) if last.terminated => sentences.len() + 1,
        Some(_) => sentences.len(),
        None => 1,
    }
}

pub fn word_count(text: &str) -> i64 {
    tokenize(text).len() as i64
}

fn join(words: &[String]) -> String {
    words.join(" ")
}

/// Splices `content` into sentence `sentence_no` (1-based) of `text` at the
/// 1-based `word_idx`, returning the full rewritten text.
///
/// The target sentence's terminal delimiter, if any, is split off before
/// counting insert positions and reattached to the sentence's new last word.
/// `word_idx` must satisfy `1 <= word_idx <= words_in_sentence + 1`.
pub fn splice_words(
    text: &str,
    sentence_no: usize,
    word_idx: usize,
    content: &str,
) -> Result<String, StoreError> {
    if sentence_no < 1 {
        return Err(StoreError::BadRequest(
            "Sentence number must be positive".to_string(),
        ));
    }
    if word_idx < 1 {
        return Err(StoreError::BadRequest(
            "Word index must be positive (1-based)".to_string(),
        ));
    }

    let words = tokenize(text);
    if words.is_empty() {
        if word_idx != 1 {
            return Err(StoreError::NotFound(
                "Empty file: only word index 1 allowed".to_string(),
            ));
        }
        return Ok(tokenize(content).join(" "));
    }

    let sentences = split_sentences(&words);

    // Appending a new sentence past the current last one.
    if sentence_no > sentences.len() {
        if word_idx != 1 {
            return Err(StoreError::NotFound(
                "New sentence: only word index 1 allowed".to_string(),
            ));
        }
        let mut out: Vec<String> = words.iter().map(|w| w.to_string()).collect();
        out.extend(tokenize(content).into_iter().map(|w| w.to_string()));
        return Ok(join(&out));
    }

    let target = sentences[sentence_no - 1];

    // Split the terminal delimiter off the sentence's last word.
    let mut sentence_words: Vec<String> = words[target.start..=target.end]
        .iter()
        .map(|w| w.to_string())
        .collect();
    let mut delimiter = None;
    if target.terminated
        && let Some(last) = sentence_words.last_mut()
    {
        delimiter = last.pop();
        if last.is_empty() {
            sentence_words.pop();
        }
    }

    if word_idx > sentence_words.len() + 1 {
        return Err(StoreError::NotFound(format!(
            "Word index {} out of range. Sentence {} has {} words (positions 1-{} available)",
            word_idx,
            sentence_no,
            sentence_words.len(),
            sentence_words.len() + 1
        )));
    }

    let inserted: Vec<String> = tokenize(content).into_iter().map(|w| w.to_string()).collect();
    let mut rebuilt: Vec<String> = Vec::with_capacity(sentence_words.len() + inserted.len());
    rebuilt.extend_from_slice(&sentence_words[..word_idx - 1]);
    rebuilt.extend(inserted);
    rebuilt.extend_from_slice(&sentence_words[word_idx - 1..]);

    if let Some(d) = delimiter {
        match rebuilt.last_mut() {
            Some(last) => last.push(d),
            None => rebuilt.push(d.to_string()),
        }
    }

    let mut out: Vec<String> = words[..target.start].iter().map(|w| w.to_string()).collect();
    out.extend(rebuilt);
    out.extend(words[target.end + 1..].iter().map(|w| w.to_string()));
    Ok(join(&out))
}

/// The commit-time three-way merge.
///
/// Composes: live sentences `[1, n-1]`, then sentence `n` taken from the
/// swap (or the swap's trailing sentence appended after the live content
/// when `n` exceeds the live sentence count), then live sentences
/// `[n+1, end]`. `live` is the file as it stands at commit time, not the
/// snapshot the session started from, so commits to distinct sentences
/// compose.
pub fn merge_commit(live: &str, swap: &str, sentence_no: usize) -> String {
    let live_words = tokenize(live);
    let live_sentences = split_sentences(&live_words);

    if live_sentences.is_empty() {
        return tokenize(swap).join(" ");
    }

    let swap_words = tokenize(swap);
    let swap_sentences = split_sentences(&swap_words);

    if sentence_no > live_sentences.len() {
        let mut out: Vec<String> = live_words.iter().map(|w| w.to_string()).collect();
        if let Some(tail) = swap_sentences.last() {
            out.extend(
                swap_words[tail.start..=tail.end]
                    .iter()
                    .map(|w| w.to_string()),
            );
        }
        return join(&out);
    }

    let mut out: Vec<String> = Vec::new();
    for sentence in &live_sentences[..sentence_no - 1] {
        out.extend(
            live_words[sentence.start..=sentence.end]
                .iter()
                .map(|w| w.to_string()),
        );
    }
    if let Some(replacement) = swap_sentences.get(sentence_no - 1) {
        out.extend(
            swap_words[replacement.start..=replacement.end]
                .iter()
                .map(|w| w.to_string()),
        );
    }
    for sentence in &live_sentences[sentence_no..] {
        out.extend(
            live_words[sentence.start..=sentence.end]
                .iter()
                .map(|w| w.to_string()),
        );
    }
    join(&out)
}
