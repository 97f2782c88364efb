use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use lazy_static::lazy_static;
use log::{error, info, warn};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::TranslationConfig;

lazy_static! {
    static ref BLOCK_MARKER_RE: Regex = Regex::new(r"\[\d+\]").unwrap();
    static ref TITLE_RE: Regex = Regex::new(r"(?i)Title:\s*(.+)").unwrap();
    static ref DESCRIPTION_RE: Regex = Regex::new(r"(?i)Description:\s*(.+)").unwrap();
}

const CACHE_FILE: &str = "translations.json";

/// Separator between title and description inside a persisted cache value.
/// A control character, so it cannot occur in feed text.
const PAIR_SEPARATOR: char = '\u{1f}';

const SYSTEM_PROMPT: &str = "You are a professional Turkish translator. You translate \
movie and TV news from English to Turkish.\n\n\
Rules:\n\
1. Use natural, fluent Turkish\n\
2. Keep film jargon, technical terms and proper names intact\n\
3. Titles must stay short and punchy\n\
4. Translate every item in the same format: [number]\\nTitle: ...\\nDescription: ...\n\
5. Return only the translation, no commentary";

const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 4000;

#[derive(Debug, Error)]
pub enum TranslateError {
    /// The upstream account ran out of credit. Distinguished so operators
    /// can tell a billing problem from a transient failure.
    #[error("translation API quota exhausted")]
    Quota,
    #[error("translation API request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("translation API returned status {0}")]
    Status(StatusCode),
    #[error("empty response from translation API")]
    EmptyResponse,
}

/// One title/description pair, before or after translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationPair {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    text: String,
    timestamp: i64,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// An uncached pair waiting for the upstream call. Identical pairs within
/// one batch share a slot, so they cost a single translation.
struct PendingSlot {
    key: String,
    pair: TranslationPair,
    indices: Vec<usize>,
}

/// Batch translator with a persisted cache keyed by the raw source text.
/// Every failure mode degrades to returning the original pairs; only
/// quota exhaustion surfaces as an error, and even then the caller is
/// expected to fall back to originals.
pub struct Translator {
    client: Client,
    api_url: String,
    model: String,
    api_key: Option<String>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_path: PathBuf,
}

impl Translator {
    pub fn new(config: &TranslationConfig, cache_dir: &Path) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.is_empty());
        if api_key.is_none() {
            warn!(
                "{} not set, feed items will be served untranslated",
                config.api_key_env
            );
        }

        let cache_path = cache_dir.join(CACHE_FILE);
        let retention_ms = config.cache_retention_days * 24 * 60 * 60 * 1000;
        let cache = load_cache(&cache_path, retention_ms);

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            api_key,
            cache: Mutex::new(cache),
            cache_path,
        })
    }

    /// Translate a batch of pairs in one upstream request. The output has
    /// the same length and order as the input; entries that could not be
    /// translated keep their original text.
    pub async fn translate_batch(
        &self,
        items: &[TranslationPair],
    ) -> Result<Vec<TranslationPair>, TranslateError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let Some(api_key) = self.api_key.clone() else {
            return Ok(items.to_vec());
        };

        let (mut results, slots) = {
            let cache = self.cache.lock().await;
            partition_cached(items, &cache)
        };

        if slots.is_empty() {
            return Ok(results);
        }

        info!("Translating {} new items", slots.len());

        let prompt = build_batch_prompt(&slots);
        let response_text = match self.request_translation(&api_key, &prompt).await {
            Ok(text) => text,
            Err(TranslateError::Quota) => {
                error!("Translation API quota exhausted");
                return Err(TranslateError::Quota);
            }
            Err(err) => {
                error!("Translation failed: {err}");
                return Ok(items.to_vec());
            }
        };

        let blocks = parse_translation_response(&response_text);

        let now = Utc::now().timestamp_millis();
        let mut translated_count = 0;
        {
            let mut cache = self.cache.lock().await;
            for (slot_index, slot) in slots.iter().enumerate() {
                let Some(Some(pair)) = blocks.get(slot_index).cloned() else {
                    warn!(
                        "Translation block {} missing or malformed, keeping original",
                        slot_index + 1
                    );
                    continue;
                };
                cache.insert(
                    slot.key.clone(),
                    CacheEntry {
                        text: encode_pair(&pair),
                        timestamp: now,
                    },
                );
                for &index in &slot.indices {
                    results[index] = pair.clone();
                }
                translated_count += 1;
            }
        }

        if translated_count > 0 {
            if let Err(err) = self.persist_cache().await {
                warn!("Failed to persist translation cache: {err:#}");
            }
        }

        Ok(results)
    }

    async fn request_translation(
        &self,
        api_key: &str,
        prompt: &str,
    ) -> Result<String, TranslateError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::PAYMENT_REQUIRED {
            return Err(TranslateError::Quota);
        }
        if !status.is_success() {
            return Err(TranslateError::Status(status));
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(TranslateError::EmptyResponse);
        }
        Ok(content)
    }

    /// Write the cache to disk. The lock is held across the write so a
    /// concurrent batch cannot overwrite this snapshot with an older one.
    async fn persist_cache(&self) -> Result<()> {
        let cache = self.cache.lock().await;
        if let Some(dir) = self.cache_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&*cache)?;
        fs::write(&self.cache_path, json)?;
        Ok(())
    }

    /// Drop every cached translation, in memory and on disk.
    pub async fn clear(&self) {
        let mut cache = self.cache.lock().await;
        cache.clear();
        if self.cache_path.exists() {
            if let Err(err) = fs::remove_file(&self.cache_path) {
                warn!("Failed to remove translation cache file: {err}");
            }
        }
        info!("Translation cache cleared");
    }

    #[cfg(test)]
    pub(crate) fn set_api_key(&mut self, key: Option<&str>) {
        self.api_key = key.map(str::to_string);
    }

    #[cfg(test)]
    pub(crate) async fn seed_cache(&self, pair: &TranslationPair, translated: &TranslationPair) {
        let mut cache = self.cache.lock().await;
        cache.insert(
            cache_key(pair),
            CacheEntry {
                text: encode_pair(translated),
                timestamp: Utc::now().timestamp_millis(),
            },
        );
    }
}

fn cache_key(pair: &TranslationPair) -> String {
    format!("{}|{}", pair.title, pair.description)
}

fn encode_pair(pair: &TranslationPair) -> String {
    format!("{}{}{}", pair.title, PAIR_SEPARATOR, pair.description)
}

fn decode_pair(text: &str) -> TranslationPair {
    match text.split_once(PAIR_SEPARATOR) {
        Some((title, description)) => TranslationPair {
            title: title.to_string(),
            description: description.to_string(),
        },
        None => TranslationPair {
            title: text.to_string(),
            description: String::new(),
        },
    }
}

/// Split the input into cache hits (already written into the result list)
/// and pending slots for the upstream call, deduplicating identical pairs.
fn partition_cached(
    items: &[TranslationPair],
    cache: &HashMap<String, CacheEntry>,
) -> (Vec<TranslationPair>, Vec<PendingSlot>) {
    let mut results = items.to_vec();
    let mut slots: Vec<PendingSlot> = Vec::new();
    let mut slot_by_key: HashMap<String, usize> = HashMap::new();

    for (index, item) in items.iter().enumerate() {
        let key = cache_key(item);
        if let Some(entry) = cache.get(&key) {
            results[index] = decode_pair(&entry.text);
            continue;
        }
        match slot_by_key.get(&key) {
            Some(&slot) => slots[slot].indices.push(index),
            None => {
                slot_by_key.insert(key.clone(), slots.len());
                slots.push(PendingSlot {
                    key,
                    pair: item.clone(),
                    indices: vec![index],
                });
            }
        }
    }

    (results, slots)
}

fn build_batch_prompt(slots: &[PendingSlot]) -> String {
    let blocks: Vec<String> = slots
        .iter()
        .enumerate()
        .map(|(index, slot)| {
            format!(
                "[{}]\nTitle: {}\nDescription: {}\n",
                index + 1,
                slot.pair.title,
                slot.pair.description
            )
        })
        .collect();
    format!(
        "Translate the following movie/TV news into Turkish:\n\n{}",
        blocks.join("\n")
    )
}

/// Parse the numbered response back into pairs, position by position.
/// A block missing either field yields None so its item keeps the
/// original text; one malformed block never shifts or fails the rest.
fn parse_translation_response(text: &str) -> Vec<Option<TranslationPair>> {
    BLOCK_MARKER_RE
        .split(text)
        .skip_while(|block| block.trim().is_empty())
        .map(|block| {
            let title = TITLE_RE.captures(block)?.get(1)?.as_str().trim().to_string();
            let description = DESCRIPTION_RE
                .captures(block)?
                .get(1)?
                .as_str()
                .trim()
                .to_string();
            Some(TranslationPair { title, description })
        })
        .collect()
}

fn load_cache(path: &Path, retention_ms: i64) -> HashMap<String, CacheEntry> {
    if !path.exists() {
        return HashMap::new();
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("Failed to read translation cache: {err}");
            return HashMap::new();
        }
    };
    let entries: HashMap<String, CacheEntry> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Failed to parse translation cache: {err}");
            return HashMap::new();
        }
    };

    let now = Utc::now().timestamp_millis();
    let total = entries.len();
    let cache: HashMap<String, CacheEntry> = entries
        .into_iter()
        .filter(|(_, entry)| now - entry.timestamp < retention_ms)
        .collect();

    info!(
        "Translation cache loaded: {} entries ({} pruned)",
        cache.len(),
        total - cache.len()
    );
    cache
}
