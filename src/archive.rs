use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::ArchiveConfig;
use crate::models::{FeedItem, SourceLanguage};

const ARCHIVE_FILE: &str = "feed-archive.json";
const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedFeedItem {
    #[serde(flatten)]
    pub item: FeedItem,
    pub archived_at: i64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveFile {
    version: u32,
    retention_days: i64,
    saved_at: i64,
    items: Vec<ArchivedFeedItem>,
}

/// Long-retention store of previously seen items, keyed by link. Its job
/// is to keep translations alive across fetch-cache expiry: a link that
/// was translated once is never paid for again within the retention
/// window.
pub struct FeedArchive {
    by_link: Mutex<HashMap<String, ArchivedFeedItem>>,
    path: PathBuf,
    retention_days: i64,
    retention_ms: i64,
}

impl FeedArchive {
    pub fn new(config: &ArchiveConfig, cache_dir: &Path) -> Self {
        let path = cache_dir.join(ARCHIVE_FILE);
        let retention_ms = config.retention_days * 24 * 60 * 60 * 1000;
        let by_link = load_archive(&path, retention_ms);

        Self {
            by_link: Mutex::new(by_link),
            path,
            retention_days: config.retention_days,
            retention_ms,
        }
    }

    /// Enrich freshly fetched items with archived translations. Read-only
    /// and deterministic, so applying it twice changes nothing further.
    pub async fn hydrate(&self, items: Vec<FeedItem>) -> Vec<FeedItem> {
        let by_link = self.by_link.lock().await;
        if by_link.is_empty() {
            return items;
        }

        items
            .into_iter()
            .map(|item| {
                let Some(archived) = by_link.get(&item.link) else {
                    return item;
                };
                if archived.item.is_translated && item.source_language == SourceLanguage::En {
                    let original_title = archived
                        .item
                        .original_title
                        .clone()
                        .unwrap_or_else(|| item.title.clone());
                    let original_description = archived
                        .item
                        .original_description
                        .clone()
                        .unwrap_or_else(|| item.description.clone());
                    FeedItem {
                        title: archived.item.title.clone(),
                        description: archived.item.description.clone(),
                        is_translated: true,
                        original_title: Some(original_title),
                        original_description: Some(original_description),
                        ..item
                    }
                } else {
                    item
                }
            })
            .collect()
    }

    /// Write items into the archive and persist it. English items that
    /// are still untranslated are skipped, so a failed translation can
    /// never masquerade as a final one on the next run.
    pub async fn upsert(&self, items: &[FeedItem]) {
        let now = Utc::now().timestamp_millis();
        let mut by_link = self.by_link.lock().await;

        for item in items {
            if item.link.is_empty() {
                continue;
            }
            if item.needs_translation() {
                continue;
            }
            by_link.insert(
                item.link.clone(),
                ArchivedFeedItem {
                    item: item.clone(),
                    archived_at: now,
                },
            );
        }

        // Persist while holding the lock; a write failure only costs the
        // next process start its warm archive
        if let Err(err) = save_archive(&self.path, self.retention_days, self.retention_ms, &mut by_link) {
            warn!("Failed to persist feed archive: {err:#}");
        }
    }

    /// Drop all archive state, in memory and on disk.
    pub async fn clear(&self) {
        let mut by_link = self.by_link.lock().await;
        by_link.clear();
        if self.path.exists() {
            if let Err(err) = fs::remove_file(&self.path) {
                warn!("Failed to remove archive file: {err}");
            }
        }
        info!("Feed archive cleared");
    }
}

fn save_archive(
    path: &Path,
    retention_days: i64,
    retention_ms: i64,
    by_link: &mut HashMap<String, ArchivedFeedItem>,
) -> Result<()> {
    let now = Utc::now().timestamp_millis();
    by_link.retain(|_, archived| now - archived.archived_at <= retention_ms);

    let payload = ArchiveFile {
        version: ARCHIVE_VERSION,
        retention_days,
        saved_at: now,
        items: by_link.values().cloned().collect(),
    };

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

fn load_archive(path: &Path, retention_ms: i64) -> HashMap<String, ArchivedFeedItem> {
    if !path.exists() {
        return HashMap::new();
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("Failed to read feed archive: {err}");
            return HashMap::new();
        }
    };
    let file: ArchiveFile = match serde_json::from_str(&raw) {
        Ok(file) => file,
        Err(err) => {
            warn!("Failed to parse feed archive: {err}");
            return HashMap::new();
        }
    };

    let now = Utc::now().timestamp_millis();
    let total = file.items.len();
    let by_link: HashMap<String, ArchivedFeedItem> = file
        .items
        .into_iter()
        .filter(|archived| !archived.item.link.is_empty())
        .filter(|archived| now - archived.archived_at <= retention_ms)
        .map(|archived| (archived.item.link.clone(), archived))
        .collect();

    info!(
        "Feed archive loaded: {} entries ({} pruned)",
        by_link.len(),
        total - by_link.len()
    );
    by_link
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn item(link: &str, language: SourceLanguage, translated: bool) -> FeedItem {
        FeedItem {
            id: format!("test-{link}"),
            title: if translated { "Çeviri".to_string() } else { "Original".to_string() },
            description: if translated { "Çevrilmiş açıklama".to_string() } else { "Original text".to_string() },
            link: link.to_string(),
            pub_date: String::new(),
            image_url: None,
            source_name: "Test".to_string(),
            source_id: "test".to_string(),
            source_language: language,
            is_translated: translated,
            original_title: translated.then(|| "Original".to_string()),
            original_description: translated.then(|| "Original text".to_string()),
        }
    }

    fn archive(dir: &Path) -> FeedArchive {
        FeedArchive::new(&ArchiveConfig::default(), dir)
    }

    #[tokio::test]
    async fn hydrate_restores_archived_translation() {
        let dir = tempdir().unwrap();
        let archive = archive(dir.path());

        let translated = item("https://x/a", SourceLanguage::En, true);
        archive.upsert(&[translated]).await;

        let fresh = item("https://x/a", SourceLanguage::En, false);
        let hydrated = archive.hydrate(vec![fresh]).await;

        assert!(hydrated[0].is_translated);
        assert_eq!(hydrated[0].title, "Çeviri");
        assert_eq!(hydrated[0].original_title.as_deref(), Some("Original"));
    }

    #[tokio::test]
    async fn hydrate_is_idempotent() {
        let dir = tempdir().unwrap();
        let archive = archive(dir.path());
        archive
            .upsert(&[item("https://x/a", SourceLanguage::En, true)])
            .await;

        let fresh = vec![
            item("https://x/a", SourceLanguage::En, false),
            item("https://x/b", SourceLanguage::En, false),
        ];
        let once = archive.hydrate(fresh.clone()).await;
        let twice = archive.hydrate(once.clone()).await;
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn pending_english_items_are_never_archived() {
        let dir = tempdir().unwrap();
        let archive = archive(dir.path());

        archive
            .upsert(&[item("https://x/pending", SourceLanguage::En, false)])
            .await;

        let fresh = item("https://x/pending", SourceLanguage::En, false);
        let hydrated = archive.hydrate(vec![fresh.clone()]).await;
        assert_eq!(hydrated[0], fresh);
    }

    #[tokio::test]
    async fn turkish_items_are_archived_but_pass_through_hydration() {
        let dir = tempdir().unwrap();
        let archive = archive(dir.path());

        archive
            .upsert(&[item("https://x/tr", SourceLanguage::Tr, false)])
            .await;

        let fresh = item("https://x/tr", SourceLanguage::Tr, false);
        let hydrated = archive.hydrate(vec![fresh.clone()]).await;
        assert_eq!(hydrated[0], fresh);
    }

    #[tokio::test]
    async fn items_without_links_are_skipped() {
        let dir = tempdir().unwrap();
        let archive = archive(dir.path());
        archive.upsert(&[item("", SourceLanguage::Tr, false)]).await;

        let by_link = archive.by_link.lock().await;
        assert!(by_link.is_empty());
    }

    #[tokio::test]
    async fn archive_survives_a_reload() {
        let dir = tempdir().unwrap();
        {
            let archive = archive(dir.path());
            archive
                .upsert(&[item("https://x/a", SourceLanguage::En, true)])
                .await;
        }

        let reloaded = archive(dir.path());
        let fresh = item("https://x/a", SourceLanguage::En, false);
        let hydrated = reloaded.hydrate(vec![fresh]).await;
        assert!(hydrated[0].is_translated);
    }

    #[tokio::test]
    async fn expired_entries_are_pruned_on_save() {
        let dir = tempdir().unwrap();
        let archive = archive(dir.path());
        let expired_at = Utc::now().timestamp_millis() - 15 * 24 * 60 * 60 * 1000;
        {
            let mut by_link = archive.by_link.lock().await;
            by_link.insert(
                "https://x/old".to_string(),
                ArchivedFeedItem {
                    item: item("https://x/old", SourceLanguage::En, true),
                    archived_at: expired_at,
                },
            );
        }

        archive
            .upsert(&[item("https://x/new", SourceLanguage::En, true)])
            .await;

        let by_link = archive.by_link.lock().await;
        assert!(!by_link.contains_key("https://x/old"));
        assert!(by_link.contains_key("https://x/new"));
    }

    #[tokio::test]
    async fn clear_drops_memory_and_disk() {
        let dir = tempdir().unwrap();
        let archive = archive(dir.path());
        archive
            .upsert(&[item("https://x/a", SourceLanguage::En, true)])
            .await;
        assert!(dir.path().join(ARCHIVE_FILE).exists());

        archive.clear().await;
        assert!(!dir.path().join(ARCHIVE_FILE).exists());

        let fresh = item("https://x/a", SourceLanguage::En, false);
        let hydrated = archive.hydrate(vec![fresh.clone()]).await;
        assert_eq!(hydrated[0], fresh);
    }

    #[tokio::test]
    async fn file_format_is_versioned_camel_case() {
        let dir = tempdir().unwrap();
        let archive = archive(dir.path());
        archive
            .upsert(&[item("https://x/a", SourceLanguage::En, true)])
            .await;

        let raw = fs::read_to_string(dir.path().join(ARCHIVE_FILE)).unwrap();
        assert!(raw.contains("\"version\""));
        assert!(raw.contains("\"retentionDays\""));
        assert!(raw.contains("\"archivedAt\""));
        assert!(raw.contains("\"sourceLanguage\""));
    }
}
