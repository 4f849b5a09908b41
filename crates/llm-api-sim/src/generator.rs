// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Deterministic content generation
//!
//! Nothing here uses real randomness: identical inputs always produce identical
//! text, lengths, identifiers and signatures, which keeps simulated responses
//! reproducible across runs and machines.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};

/// Vocabulary cycled by the filler generator
const FILLER_WORDS: &[&str] = &[
    "lorem",
    "ipsum",
    "dolor",
    "sit",
    "amet",
    "consectetur",
    "adipiscing",
    "elit",
    "sed",
    "do",
    "eiusmod",
    "tempor",
    "incididunt",
    "ut",
    "labore",
    "et",
    "dolore",
    "magna",
    "aliqua",
    "enim",
    "ad",
    "minim",
    "veniam",
    "quis",
    "nostrud",
    "exercitation",
    "ullamco",
    "laboris",
    "nisi",
    "aliquip",
    "ex",
    "ea",
    "commodo",
    "consequat",
];

/// Exactly `count` filler words joined by single spaces
pub fn filler_text(count: usize) -> String {
    let mut text = String::new();
    for (i, word) in FILLER_WORDS.iter().cycle().take(count).enumerate() {
        if i > 0 {
            text.push(' ');
        }
        text.push_str(word);
    }
    text
}

/// Reproducible word count in `min..=max` derived from `seed`
pub fn stable_length(seed: &str, min: usize, max: usize) -> usize {
    if max <= min {
        return min;
    }
    let digest = Sha256::digest(seed.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let span = (max - min + 1) as u64;
    min + (u64::from_be_bytes(prefix) % span) as usize
}

/// Opaque stand-in for a provider's reasoning signature
pub fn thinking_signature(thinking: &str) -> String {
    let digest = Sha256::digest(thinking.as_bytes());
    BASE64.encode(digest)
}

/// Opaque base64 payload standing in for encrypted reasoning content
pub fn encrypted_reasoning(reasoning: &str) -> String {
    let mut payload = Sha256::digest(reasoning.as_bytes()).to_vec();
    payload.extend_from_slice(reasoning.as_bytes());
    BASE64.encode(payload)
}

/// Identifier stable for the same `parts`, e.g. `call_3f9a…`
pub fn stable_id(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    format!("{}{}", prefix, hex::encode(&digest[..12]))
}

/// Split `text` into fragments of at most `words_per_chunk` words.
///
/// Whitespace preceding a word travels with that word, so concatenating the
/// fragments reproduces `text` exactly.
pub fn chunk_words(text: &str, words_per_chunk: usize) -> Vec<String> {
    let words_per_chunk = words_per_chunk.max(1);
    let mut fragments = Vec::new();
    let mut fragment_start = 0;
    let mut words_in_fragment = 0;
    let mut in_word = false;
    let mut gap_start = None;

    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if in_word {
                gap_start = Some(i);
            }
            in_word = false;
        } else if !in_word {
            if words_in_fragment == words_per_chunk {
                if let Some(gap) = gap_start {
                    fragments.push(text[fragment_start..gap].to_string());
                    fragment_start = gap;
                    words_in_fragment = 0;
                }
            }
            in_word = true;
            words_in_fragment += 1;
        }
    }

    if fragment_start < text.len() {
        fragments.push(text[fragment_start..].to_string());
    }
    fragments
}

/// Split `text` into slices of at most `chars_per_chunk` characters
pub fn chunk_chars(text: &str, chars_per_chunk: usize) -> Vec<&str> {
    let chars_per_chunk = chars_per_chunk.max(1);
    let mut slices = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (i, _) in text.char_indices() {
        if count == chars_per_chunk {
            slices.push(&text[start..i]);
            start = i;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        slices.push(&text[start..]);
    }
    slices
}
