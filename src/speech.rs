//! Translation and text-to-speech pass-through.
//!
//! Stateless calls to the public Google translate endpoints. Nothing is
//! cached; each request is independent.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::io::Read;
use std::sync::OnceLock;
use url::Url;

use crate::config::SpeechSettings;

/// Longest text the TTS endpoint accepts in one request.
const TTS_CHUNK_CHARS: usize = 200;
const MAX_AUDIO_BYTES: u64 = 16 * 1024 * 1024;

pub struct SpeechClient {
    agent: ureq::Agent,
    translate_url: String,
    tts_url: String,
}

impl SpeechClient {
    pub fn new(settings: &SpeechSettings) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(settings.timeout).build(),
            translate_url: settings.translate_url.clone(),
            tts_url: settings.tts_url.clone(),
        }
    }

    /// Translate `text` into `target_lang`, detecting the source language.
    pub fn translate(&self, text: &str, target_lang: &str) -> Result<String> {
        validate_language(target_lang)?;
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        let url = Url::parse_with_params(
            &self.translate_url,
            &[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target_lang),
                ("dt", "t"),
                ("q", text),
            ],
        )
        .context("build translate URL")?;
        let body = self
            .agent
            .get(url.as_str())
            .call()
            .context("translate request failed")?
            .into_string()
            .context("read translate response")?;
        parse_translation(&body)
    }

    /// Speak `text` in `lang`; returns MP3 bytes.
    pub fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>> {
        validate_language(lang)?;
        let chunks = split_for_tts(text, TTS_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(anyhow!("nothing to speak"));
        }

        let total = chunks.len().to_string();
        let mut audio = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let idx = idx.to_string();
            let textlen = chunk.chars().count().to_string();
            let url = Url::parse_with_params(
                &self.tts_url,
                &[
                    ("ie", "UTF-8"),
                    ("client", "tw-ob"),
                    ("tl", lang),
                    ("q", chunk.as_str()),
                    ("total", total.as_str()),
                    ("idx", idx.as_str()),
                    ("textlen", textlen.as_str()),
                ],
            )
            .context("build TTS URL")?;
            let response = self
                .agent
                .get(url.as_str())
                .call()
                .context("TTS request failed")?;
            response
                .into_reader()
                .take(MAX_AUDIO_BYTES)
                .read_to_end(&mut audio)
                .context("read TTS audio")?;
        }
        if audio.is_empty() {
            return Err(anyhow!("TTS service returned no audio"));
        }
        Ok(audio)
    }
}

/// Accepts `en`, `fr`, `haw`, `zh-CN`, `pt-BR`, ...
pub fn validate_language(code: &str) -> Result<()> {
    static LANG_RE: OnceLock<Regex> = OnceLock::new();
    let re = LANG_RE.get_or_init(|| {
        Regex::new(r"^[a-z]{2,3}(-[a-zA-Z]{2,4})?$").expect("language pattern is valid")
    });
    if re.is_match(code) {
        Ok(())
    } else {
        Err(anyhow!("invalid language code '{}'", code))
    }
}

/// Pull the translated sentences out of a `translate_a/single` response.
///
/// The body is `[[["<translated>", "<source>", ...], ...], ...]`.
pub fn parse_translation(body: &str) -> Result<String> {
    let value: serde_json::Value =
        serde_json::from_str(body).context("translate response was not JSON")?;
    let sentences = value
        .get(0)
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("translate response has no sentences"))?;
    let text: String = sentences
        .iter()
        .filter_map(|s| s.get(0).and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        return Err(anyhow!("translate response has no text"));
    }
    Ok(text)
}

/// Split text into chunks of at most `max_chars`, preferring whitespace.
fn split_for_tts(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word = word;
        // Words longer than a chunk are cut hard.
        while word.chars().count() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let cut = word
                .char_indices()
                .nth(max_chars)
                .map(|(i, _)| i)
                .unwrap_or(word.len());
            chunks.push(word[..cut].to_string());
            word = &word[cut..];
        }
        if word.is_empty() {
            continue;
        }
        let needed = current.chars().count() + usize::from(!current.is_empty()) + word.chars().count();
        if needed > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
