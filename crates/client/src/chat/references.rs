use ragdesk_transport::Source;

const TITLE_MATCH_SCORE: usize = 5;
const KEYWORD_SEPARATORS: &[char] = &[',', '，', '.', '。', '?', '？', '!', '！'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedSource {
    pub source: Source,
    pub relevance: usize,
}

/// Sources split by keyword relevance to the query they answered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RankedSources {
    pub high: Vec<RankedSource>,
    pub low: Vec<RankedSource>,
}

impl RankedSources {
    pub fn len(&self) -> usize {
        self.high.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }
}

/// Keywords worth matching: separator-split words longer than one character.
pub fn query_keywords(query: &str) -> Vec<String> {
    query
        .split(|c: char| c.is_whitespace() || KEYWORD_SEPARATORS.contains(&c))
        .filter(|keyword| keyword.chars().count() > 1)
        .map(str::to_string)
        .collect()
}

fn relevance(source: &Source, keywords: &[String]) -> usize {
    let title = source.title.to_lowercase();
    let content = source.content.to_lowercase();

    keywords
        .iter()
        .map(|keyword| keyword.to_lowercase())
        .map(|keyword| {
            let title_score = if title.contains(&keyword) {
                TITLE_MATCH_SCORE
            } else {
                0
            };
            title_score + content.matches(&keyword).count()
        })
        .sum()
}

/// Orders `sources` by relevance to `query`, most relevant first.
///
/// Unmatched sources land in `low`, unless nothing matched at all, in which
/// case everything is `high`.
pub fn rank_sources(sources: &[Source], query: &str) -> RankedSources {
    let keywords = query_keywords(query);
    if query.trim().is_empty() {
        return RankedSources {
            high: sources
                .iter()
                .cloned()
                .map(|source| RankedSource { source, relevance: 0 })
                .collect(),
            low: Vec::new(),
        };
    }

    let mut scored = sources
        .iter()
        .cloned()
        .map(|source| RankedSource {
            relevance: relevance(&source, &keywords),
            source,
        })
        .collect::<Vec<_>>();
    // Stable: equal scores keep the backend's order.
    scored.sort_by(|left, right| right.relevance.cmp(&left.relevance));

    let (high, low): (Vec<_>, Vec<_>) = scored.into_iter().partition(|ranked| ranked.relevance > 0);
    if high.is_empty() {
        return RankedSources { high: low, low: Vec::new() };
    }

    RankedSources { high, low }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_split_on_mixed_punctuation_and_drop_single_characters() {
        assert_eq!(
            query_keywords("what is RAG，检索 a test?"),
            vec!["what", "is", "RAG", "检索", "test"]
        );
        assert!(query_keywords("a , 。").is_empty());
    }

    #[test]
    fn title_matches_outrank_content_matches() {
        let sources = vec![
            Source::file("notes", "rust rust rust"),
            Source::file("Rust guide", "intro"),
            Source::file("other", "nothing here"),
        ];

        let ranked = rank_sources(&sources, "rust");

        assert_eq!(ranked.high.len(), 2);
        assert_eq!(ranked.high[0].source.title, "Rust guide");
        assert_eq!(ranked.high[0].relevance, 5);
        assert_eq!(ranked.high[1].relevance, 3);
        assert_eq!(ranked.low.len(), 1);
        assert_eq!(ranked.low[0].source.title, "other");
    }

    #[test]
    fn no_matches_keeps_everything_high_in_original_order() {
        let sources = vec![Source::file("a", "x"), Source::file("b", "y")];

        let ranked = rank_sources(&sources, "unrelated words");

        assert_eq!(ranked.high.len(), 2);
        assert!(ranked.low.is_empty());
        assert_eq!(ranked.high[0].source.title, "a");
    }

    #[test]
    fn blank_query_returns_sources_unscored() {
        let sources = vec![Source::file("a", "x")];

        let ranked = rank_sources(&sources, "   ");

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked.high[0].relevance, 0);
    }
}
