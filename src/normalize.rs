use feed_rs::model::Entry;
use lazy_static::lazy_static;
use regex::Regex;

use crate::models::{FeedItem, FeedSource};

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
    static ref IMG_SRC_RE: Regex =
        Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["']"#).unwrap();
    static ref IMAGE_EXT_RE: Regex = Regex::new(r"(?i)\.(jpe?g|png|webp|gif)").unwrap();
}

/// Descriptions are bounded so one verbose feed cannot blow up response
/// payloads or translation cost.
const MAX_DESCRIPTION_CHARS: usize = 1800;

const MISSING_TITLE: &str = "Untitled";

/// Remove HTML tags, decode the common entities and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let text = TAG_RE.replace_all(html, "");
    // Entity order matters: &amp; must be decoded before &lt;/&gt; so
    // double-escaped feeds degrade the same way every time.
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    WHITESPACE_RE.replace_all(&text, " ").trim().to_string()
}

/// Pick a representative image for an entry, or None when the feed has
/// none. Enclosures and media:content both surface through `entry.media`.
pub fn extract_image_url(entry: &Entry) -> Option<String> {
    // Declared image enclosures, or media urls that look like an image
    // even when the feed omitted the MIME type
    for media in &entry.media {
        for content in &media.content {
            let Some(url) = content.url.as_ref() else {
                continue;
            };
            let declared_image = content
                .content_type
                .as_ref()
                .map(|mime| mime.essence_str().starts_with("image/"))
                .unwrap_or(false);
            if declared_image || IMAGE_EXT_RE.is_match(url.as_str()) {
                return Some(url.to_string());
            }
        }
    }

    // Untyped media:content references (commonly the article image)
    for media in &entry.media {
        for content in &media.content {
            if let Some(url) = content.url.as_ref() {
                if content.content_type.is_none() {
                    return Some(url.to_string());
                }
            }
        }
    }

    // media:thumbnail
    for media in &entry.media {
        if let Some(thumbnail) = media.thumbnails.first() {
            return Some(thumbnail.image.uri.clone());
        }
    }

    // Last resort: first <img src=...> embedded in the raw HTML
    let html = entry
        .content
        .as_ref()
        .and_then(|content| content.body.as_deref())
        .or_else(|| entry.summary.as_ref().map(|summary| summary.content.as_str()))
        .unwrap_or("");
    IMG_SRC_RE
        .captures(html)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// Turn one raw feed entry into a uniform item. Pure transform, no I/O.
pub fn normalize_entry(entry: &Entry, index: usize, source: &FeedSource) -> FeedItem {
    // guid, falling back to link then position, so ids stay unique within
    // a fetch even for feeds that omit guids
    let guid = if !entry.id.is_empty() {
        entry.id.clone()
    } else if let Some(link) = entry.links.first() {
        link.href.clone()
    } else {
        index.to_string()
    };

    let title = entry
        .title
        .as_ref()
        .map(|title| strip_html(&title.content))
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| MISSING_TITLE.to_string());

    // Full content wins over the summary snippet
    let description = entry
        .content
        .as_ref()
        .and_then(|content| content.body.as_deref())
        .or_else(|| entry.summary.as_ref().map(|summary| summary.content.as_str()))
        .map(|html| truncate_chars(&strip_html(html), MAX_DESCRIPTION_CHARS))
        .unwrap_or_default();

    let link = entry
        .links
        .first()
        .map(|link| link.href.clone())
        .unwrap_or_default();

    let pub_date = entry
        .published
        .or(entry.updated)
        .map(|date| date.to_rfc3339())
        .unwrap_or_default();

    FeedItem {
        id: format!("{}-{}", source.id, guid),
        title,
        description,
        link,
        pub_date,
        image_url: extract_image_url(entry),
        source_name: source.name.clone(),
        source_id: source.id.clone(),
        source_language: source.category.language(),
        is_translated: false,
        original_title: None,
        original_description: None,
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceCategory, SourceLanguage};

    fn source(category: SourceCategory) -> FeedSource {
        FeedSource {
            id: "test-source".to_string(),
            name: "Test Source".to_string(),
            url: "https://example.com/feed".to_string(),
            category,
            enabled: true,
        }
    }

    fn parse_first_entry(xml: &str) -> Entry {
        let feed = feed_rs::parser::parse(xml.as_bytes()).unwrap();
        feed.entries.into_iter().next().unwrap()
    }

    fn rss(item_body: &str) -> String {
        format!(
            "<rss version=\"2.0\" xmlns:media=\"http://search.yahoo.com/mrss/\">\
             <channel><title>Test</title><link>https://example.com</link>\
             <description>d</description><item>{}</item></channel></rss>",
            item_body
        )
    }

    #[test]
    fn strips_tags_and_decodes_entities() {
        assert_eq!(strip_html("<p>Hello &amp; welcome</p>"), "Hello & welcome");
        assert_eq!(strip_html("a&nbsp;b"), "a b");
        assert_eq!(strip_html("&lt;tag&gt; &quot;x&quot; &#39;y&#39;"), "<tag> \"x\" 'y'");
        assert_eq!(strip_html("  a \n\n  b  "), "a b");
    }

    #[test]
    fn html_description_with_embedded_image() {
        let xml = rss(
            "<title>News</title><link>https://example.com/a</link>\
             <description><![CDATA[<p>Hello &amp; welcome</p><img src=\"https://x/y.jpg\">]]></description>",
        );
        let entry = parse_first_entry(&xml);
        let item = normalize_entry(&entry, 0, &source(SourceCategory::En));

        assert_eq!(item.description, "Hello & welcome");
        assert_eq!(item.image_url.as_deref(), Some("https://x/y.jpg"));
    }

    #[test]
    fn image_enclosure_beats_embedded_image() {
        let xml = rss(
            "<title>News</title><link>https://example.com/a</link>\
             <description><![CDATA[<img src=\"https://x/embedded.jpg\">]]></description>\
             <enclosure url=\"https://x/enclosure.png\" type=\"image/png\" length=\"1\"/>",
        );
        let entry = parse_first_entry(&xml);
        assert_eq!(
            extract_image_url(&entry).as_deref(),
            Some("https://x/enclosure.png")
        );
    }

    #[test]
    fn audio_enclosure_is_not_an_image() {
        let xml = rss(
            "<title>News</title><link>https://example.com/a</link>\
             <description><![CDATA[plain text]]></description>\
             <enclosure url=\"https://x/episode.mp3\" type=\"audio/mpeg\" length=\"1\"/>",
        );
        let entry = parse_first_entry(&xml);
        assert_eq!(extract_image_url(&entry), None);
    }

    #[test]
    fn media_thumbnail_is_used_when_no_enclosure_matches() {
        let xml = rss(
            "<title>News</title><link>https://example.com/a</link>\
             <description><![CDATA[plain text]]></description>\
             <media:thumbnail url=\"https://x/thumb.jpg\"/>",
        );
        let entry = parse_first_entry(&xml);
        let url = extract_image_url(&entry).unwrap();
        assert!(url.contains("thumb.jpg"), "got {url}");
    }

    #[test]
    fn item_id_uses_guid_when_present() {
        let xml = rss(
            "<title>News</title><link>https://example.com/a</link>\
             <guid isPermaLink=\"false\">abc-123</guid>\
             <description>text</description>",
        );
        let entry = parse_first_entry(&xml);
        let item = normalize_entry(&entry, 5, &source(SourceCategory::Tr));
        assert_eq!(item.id, "test-source-abc-123");
    }

    #[test]
    fn description_is_truncated() {
        let long = "x".repeat(5000);
        let xml = rss(&format!(
            "<title>News</title><link>https://example.com/a</link>\
             <description>{long}</description>"
        ));
        let entry = parse_first_entry(&xml);
        let item = normalize_entry(&entry, 0, &source(SourceCategory::En));
        assert_eq!(item.description.chars().count(), 1800);
    }

    #[test]
    fn language_follows_source_category() {
        let xml = rss("<title>News</title><link>https://example.com/a</link>");
        let entry = parse_first_entry(&xml);

        let en = normalize_entry(&entry, 0, &source(SourceCategory::En));
        assert_eq!(en.source_language, SourceLanguage::En);
        assert!(!en.is_translated);

        let tr = normalize_entry(&entry, 0, &source(SourceCategory::Tr));
        assert_eq!(tr.source_language, SourceLanguage::Tr);

        let custom = normalize_entry(&entry, 0, &source(SourceCategory::Custom));
        assert_eq!(custom.source_language, SourceLanguage::Tr);
    }

    #[test]
    fn pub_date_is_rfc3339_or_empty() {
        let dated = rss(
            "<title>News</title><link>https://example.com/a</link>\
             <pubDate>Mon, 02 Jun 2025 10:00:00 GMT</pubDate>",
        );
        let entry = parse_first_entry(&dated);
        let item = normalize_entry(&entry, 0, &source(SourceCategory::En));
        assert!(item.pub_date.starts_with("2025-06-02T10:00:00"));

        let undated = rss("<title>News</title><link>https://example.com/a</link>");
        let entry = parse_first_entry(&undated);
        let item = normalize_entry(&entry, 0, &source(SourceCategory::En));
        assert_eq!(item.pub_date, "");
    }
}
