use serde::{Deserialize, Serialize};

/// Category a source was configured under. Determines the item language:
/// only "en" sources produce items eligible for translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    Tr,
    En,
    Custom,
}

impl SourceCategory {
    pub fn language(self) -> SourceLanguage {
        match self {
            SourceCategory::En => SourceLanguage::En,
            _ => SourceLanguage::Tr,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLanguage {
    Tr,
    En,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeedSource {
    pub id: String,
    pub name: String,
    pub url: String,
    pub category: SourceCategory,
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Canonical identity: the archive is keyed by link.
    pub link: String,
    /// RFC 3339 timestamp, or empty when the feed gave no date.
    pub pub_date: String,
    pub image_url: Option<String>,
    pub source_name: String,
    pub source_id: String,
    pub source_language: SourceLanguage,
    pub is_translated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_description: Option<String>,
}

impl FeedItem {
    pub fn needs_translation(&self) -> bool {
        self.source_language == SourceLanguage::En && !self.is_translated
    }
}
