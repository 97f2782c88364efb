use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use tokio::sync::Mutex;

use crate::models::{FeedSource, SourceCategory};

/// Built-in sources used until the operator saves their own list.
pub fn default_sources() -> Vec<FeedSource> {
    let entries = [
        ("beyazperde", "Beyazperde", "https://www.beyazperde.com/rss/haberler/", SourceCategory::Tr),
        ("filmloverss", "FilmLoverss", "https://filmloverss.com/feed/", SourceCategory::Tr),
        ("variety", "Variety", "https://variety.com/feed/", SourceCategory::En),
        ("collider", "Collider", "https://collider.com/feed/", SourceCategory::En),
        ("screenrant", "Screen Rant", "https://screenrant.com/feed/", SourceCategory::En),
    ];

    entries
        .into_iter()
        .map(|(id, name, url, category)| FeedSource {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            category,
            enabled: true,
        })
        .collect()
}

/// Feed source list persisted as a JSON file. Reads fall back to the
/// default list; writes propagate errors to the caller since losing an
/// operator's edit silently is worse than a 500.
pub struct SourceStore {
    path: PathBuf,
    sources: Mutex<Vec<FeedSource>>,
}

impl SourceStore {
    pub fn new(path: &Path) -> Self {
        let sources = load_sources(path);
        Self {
            path: path.to_path_buf(),
            sources: Mutex::new(sources),
        }
    }

    pub async fn list(&self) -> Vec<FeedSource> {
        self.sources.lock().await.clone()
    }

    pub async fn find(&self, id: &str) -> Option<FeedSource> {
        self.sources
            .lock()
            .await
            .iter()
            .find(|source| source.id == id)
            .cloned()
    }

    pub async fn add(&self, name: &str, url: &str) -> Result<FeedSource> {
        let source = FeedSource {
            id: format!("custom-{}", Utc::now().timestamp_millis()),
            name: name.to_string(),
            url: url.to_string(),
            category: SourceCategory::Custom,
            enabled: true,
        };

        let mut sources = self.sources.lock().await;
        sources.push(source.clone());
        save_sources(&self.path, &sources)?;
        info!("Added source {} ({})", source.name, source.id);
        Ok(source)
    }

    /// Flip the enabled flag. Unknown ids are a silent no-op.
    pub async fn toggle(&self, id: &str) -> Result<Vec<FeedSource>> {
        let mut sources = self.sources.lock().await;
        for source in sources.iter_mut() {
            if source.id == id {
                source.enabled = !source.enabled;
            }
        }
        save_sources(&self.path, &sources)?;
        Ok(sources.clone())
    }

    pub async fn delete(&self, id: &str) -> Result<Vec<FeedSource>> {
        let mut sources = self.sources.lock().await;
        sources.retain(|source| source.id != id);
        save_sources(&self.path, &sources)?;
        Ok(sources.clone())
    }

    pub async fn replace_all(&self, new_sources: Vec<FeedSource>) -> Result<Vec<FeedSource>> {
        let mut sources = self.sources.lock().await;
        *sources = new_sources;
        save_sources(&self.path, &sources)?;
        Ok(sources.clone())
    }
}

fn load_sources(path: &Path) -> Vec<FeedSource> {
    if !path.exists() {
        info!("Sources file {} not found, using defaults", path.display());
        return default_sources();
    }

    match fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|raw| serde_json::from_str::<Vec<FeedSource>>(&raw).map_err(Into::into))
    {
        Ok(sources) => {
            info!("Loaded {} sources from {}", sources.len(), path.display());
            sources
        }
        Err(err) => {
            warn!("Failed to load sources file, using defaults: {err:#}");
            default_sources()
        }
    }
}

fn save_sources(path: &Path, sources: &[FeedSource]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    fs::write(path, serde_json::to_string_pretty(sources)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let store = SourceStore::new(&dir.path().join("feeds.json"));
        let sources = store.list().await;
        assert!(!sources.is_empty());
        assert!(sources.iter().all(|source| source.enabled));
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feeds.json");
        fs::write(&path, "not json at all").unwrap();

        let store = SourceStore::new(&path);
        assert_eq!(store.list().await.len(), default_sources().len());
    }

    #[tokio::test]
    async fn added_source_is_custom_enabled_and_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feeds.json");

        let store = SourceStore::new(&path);
        let source = store.add("My Feed", "https://example.com/rss").await.unwrap();
        assert!(source.id.starts_with("custom-"));
        assert_eq!(source.category, SourceCategory::Custom);
        assert!(source.enabled);

        let reloaded = SourceStore::new(&path);
        assert!(reloaded.find(&source.id).await.is_some());
    }

    #[tokio::test]
    async fn toggle_flips_enabled_and_ignores_unknown_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feeds.json");
        let store = SourceStore::new(&path);

        let sources = store.toggle("variety").await.unwrap();
        let variety = sources.iter().find(|source| source.id == "variety").unwrap();
        assert!(!variety.enabled);

        let before = store.list().await;
        let after = store.toggle("no-such-source").await.unwrap();
        assert_eq!(before.len(), after.len());
    }

    #[tokio::test]
    async fn delete_removes_the_source() {
        let dir = tempdir().unwrap();
        let store = SourceStore::new(&dir.path().join("feeds.json"));

        let sources = store.delete("variety").await.unwrap();
        assert!(sources.iter().all(|source| source.id != "variety"));
    }

    #[tokio::test]
    async fn replace_all_swaps_the_list() {
        let dir = tempdir().unwrap();
        let store = SourceStore::new(&dir.path().join("feeds.json"));

        let replacement = vec![FeedSource {
            id: "only".to_string(),
            name: "Only".to_string(),
            url: "https://example.com/rss".to_string(),
            category: SourceCategory::En,
            enabled: false,
        }];
        let sources = store.replace_all(replacement).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, "only");
    }
}
