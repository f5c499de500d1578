use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const UNKNOWN_DOCUMENT_TITLE: &str = "Unknown document";
pub const LOCAL_DOCUMENT_TITLE: &str = "Local knowledge base document";
pub const UNKNOWN_SOURCE_TITLE: &str = "Unknown source";

// Legacy web-search sources arrive as one formatted string:
// `【Web搜索】<title>\n链接: <url>\n摘要: <content>`.
static LEGACY_WEB_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^【Web搜索】(.*?)\n链接: (.*?)\n摘要: (.*)")
        .expect("legacy web source pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Web,
    File,
}

/// Location of a cited passage inside an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FileMetadata {
    pub file_id: Option<String>,
    /// 1-based page number.
    pub page: Option<u64>,
}

/// A citation attached to an assistant message, in its one normalized shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub kind: SourceKind,
    pub title: String,
    pub url: Option<String>,
    pub content: String,
    pub file: Option<FileMetadata>,
}

impl Source {
    pub fn web(
        title: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind: SourceKind::Web,
            title: title.into(),
            url: Some(url.into()),
            content: content.into(),
            file: None,
        }
    }

    pub fn file(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::File,
            title: title.into(),
            url: None,
            content: content.into(),
            file: None,
        }
    }

    /// Normalizes either wire form (structured object or legacy string).
    ///
    /// Never fails: unrecognized shapes become an empty file source.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => match serde_json::from_value::<StructuredSource>(value) {
                Ok(structured) => structured.into_source(),
                Err(error) => {
                    tracing::warn!(error = %error, "structured source has unexpected field types");
                    Self::file(UNKNOWN_DOCUMENT_TITLE, "")
                }
            },
            Value::String(raw) => Self::from_legacy(&raw),
            _ => Self::file(UNKNOWN_SOURCE_TITLE, ""),
        }
    }

    pub fn from_legacy(raw: &str) -> Self {
        match LEGACY_WEB_SOURCE.captures(raw) {
            Some(captures) => Self::web(
                captures[1].trim(),
                captures[2].trim(),
                captures[3].trim(),
            ),
            None => Self::file(LOCAL_DOCUMENT_TITLE, raw),
        }
    }

    /// Host of the source URL without a leading `www.`.
    pub fn site_name(&self) -> Option<String> {
        let url = reqwest::Url::parse(self.url.as_deref()?).ok()?;
        let host = url.host_str()?;
        Some(host.strip_prefix("www.").unwrap_or(host).to_string())
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

#[derive(Debug, Deserialize)]
struct StructuredSource {
    #[serde(rename = "type", default)]
    kind: Option<SourceKind>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "fileMetadata")]
    metadata: Option<StructuredMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct StructuredMetadata {
    #[serde(default)]
    file_id: Option<Value>,
    #[serde(default)]
    page: Option<Value>,
}

impl StructuredSource {
    fn into_source(self) -> Source {
        let file = self.metadata.and_then(|metadata| {
            let file_id = metadata.file_id.and_then(value_to_text);
            // Wire pages are 0-based.
            let page = metadata.page.and_then(value_to_page).map(|page| page + 1);
            if file_id.is_none() && page.is_none() {
                None
            } else {
                Some(FileMetadata { file_id, page })
            }
        });

        Source {
            kind: self.kind.unwrap_or(SourceKind::File),
            title: self
                .title
                .filter(|title| !title.is_empty())
                .unwrap_or_else(|| UNKNOWN_DOCUMENT_TITLE.to_string()),
            url: self.url,
            content: self.content.unwrap_or_default(),
            file,
        }
    }
}

fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn value_to_page(value: Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|page| *page >= 0.0).map(|page| page as u64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Parses the JSON-encoded source list stored with persisted messages.
pub fn parse_encoded_sources(encoded: &str) -> Result<Vec<Source>, serde_json::Error> {
    serde_json::from_str(encoded)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn legacy_and_structured_web_sources_normalize_identically() {
        let legacy = Source::from_value(json!("【Web搜索】Title\n链接: http://x\n摘要: body"));
        let structured = Source::from_value(json!({
            "type": "web",
            "title": "Title",
            "url": "http://x",
            "content": "body",
        }));

        assert_eq!(legacy, structured);
        assert_eq!(legacy, Source::web("Title", "http://x", "body"));
    }

    #[test]
    fn legacy_web_summary_may_span_lines() {
        let source = Source::from_legacy("【Web搜索】 Rust \n链接: https://www.rust-lang.org \n摘要: line one\nline two ");

        assert_eq!(source.kind, SourceKind::Web);
        assert_eq!(source.title, "Rust");
        assert_eq!(source.content, "line one\nline two");
        assert_eq!(source.site_name().as_deref(), Some("rust-lang.org"));
    }

    #[test]
    fn plain_legacy_strings_become_local_documents() {
        let source = Source::from_value(json!("chunk of an uploaded pdf"));

        assert_eq!(source, Source::file(LOCAL_DOCUMENT_TITLE, "chunk of an uploaded pdf"));
        assert_eq!(source.site_name(), None);
    }

    #[test]
    fn structured_defaults_and_file_metadata() {
        let source = Source::from_value(json!({
            "content": "page text",
            "metadata": { "file_id": 7, "page": 0 },
        }));

        assert_eq!(source.kind, SourceKind::File);
        assert_eq!(source.title, UNKNOWN_DOCUMENT_TITLE);
        assert_eq!(
            source.file,
            Some(FileMetadata {
                file_id: Some("7".to_string()),
                page: Some(1),
            })
        );
    }

    #[test]
    fn unexpected_shapes_never_fail() {
        assert_eq!(Source::from_value(json!(12)), Source::file(UNKNOWN_SOURCE_TITLE, ""));
        assert_eq!(
            Source::from_value(json!({ "title": 5 })),
            Source::file(UNKNOWN_DOCUMENT_TITLE, "")
        );
    }

    #[test]
    fn encoded_history_sources_mix_both_forms() {
        let encoded = r#"["plain text", {"type": "web", "title": "T", "url": "https://a.io", "content": "c"}]"#;
        let sources = parse_encoded_sources(encoded).unwrap();

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].kind, SourceKind::File);
        assert_eq!(sources[1].site_name().as_deref(), Some("a.io"));
        assert!(parse_encoded_sources("not json").is_err());
    }
}
