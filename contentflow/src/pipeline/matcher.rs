//! Selects pipelines from free-text task descriptions.

use crate::definition::{PipelineDefinition, PipelineRegistry, RegisteredPipeline};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Score for a trigger pattern match.
pub const TRIGGER_WEIGHT: u32 = 100;
/// Score for the normalized pipeline name appearing in the text.
pub const NAME_WEIGHT: u32 = 30;
/// Score per distinct text word found in the description.
pub const WORD_WEIGHT: u32 = 5;

/// Words shorter than this are ignored for description overlap.
const MIN_WORD_LEN: usize = 3;

/// A scored candidate.
#[derive(Debug, Clone)]
pub struct PipelineMatch {
    /// The matched definition.
    pub pipeline: Arc<PipelineDefinition>,
    /// Its score, always positive.
    pub score: u32,
}

/// Scores registered pipelines against text.
#[derive(Debug, Clone)]
pub struct PipelineMatcher {
    registry: Arc<PipelineRegistry>,
}

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_WORD_LEN)
        .map(str::to_string)
        .collect()
}

fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Scores one pipeline against text.
#[must_use]
pub fn score(entry: &RegisteredPipeline, text: &str) -> u32 {
    let definition = &entry.definition;
    let mut score = 0;

    if entry.trigger.as_ref().is_some_and(|re| re.is_match(text)) {
        score += TRIGGER_WEIGHT;
    }

    let description = words(&definition.description);
    let overlap = words(text)
        .iter()
        .filter(|w| description.contains(*w))
        .count();
    score += WORD_WEIGHT.saturating_mul(u32::try_from(overlap).unwrap_or(u32::MAX));

    let name = if definition.name.is_empty() {
        &definition.id
    } else {
        &definition.name
    };
    let name = normalize_name(name);
    let normalized_text = normalize_name(text);
    if !name.is_empty() && normalized_text.contains(&name) {
        score += NAME_WEIGHT;
    }

    score
}

impl PipelineMatcher {
    /// Creates a matcher over a registry.
    #[must_use]
    pub fn new(registry: Arc<PipelineRegistry>) -> Self {
        Self { registry }
    }

    /// All pipelines with a positive score, best first.
    ///
    /// Ties keep registration order.
    #[must_use]
    pub fn match_all(&self, text: &str) -> Vec<PipelineMatch> {
        let mut matches: Vec<PipelineMatch> = self
            .registry
            .entries()
            .into_iter()
            .filter_map(|entry| {
                let score = score(&entry, text);
                (score > 0).then(|| PipelineMatch {
                    pipeline: entry.definition,
                    score,
                })
            })
            .collect();
        matches.sort_by(|a, b| b.score.cmp(&a.score));
        debug!(candidates = matches.len(), "Matched pipelines");
        matches
    }

    /// The best match, or `None` when nothing scores.
    #[must_use]
    pub fn match_pipeline(&self, text: &str) -> Option<PipelineMatch> {
        self.match_all(text).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::PipelineStep;

    fn def(id: &str, name: &str, description: &str) -> PipelineDefinition {
        PipelineDefinition::new(id, name)
            .with_description(description)
            .with_step(PipelineStep::new("one", "echo"))
    }

    fn matcher(defs: Vec<PipelineDefinition>) -> PipelineMatcher {
        let registry = PipelineRegistry::new();
        for d in defs {
            registry.register(d).unwrap();
        }
        PipelineMatcher::new(Arc::new(registry))
    }

    #[test]
    fn test_trigger_outweighs_words() {
        let m = matcher(vec![
            def("social", "Social", "write a short social media post about a product"),
            def("blog", "Blog", "long form").with_trigger_pattern(r"\bblog\b"),
        ]);
        let best = m.match_pipeline("Write a BLOG about our product").unwrap();
        assert_eq!(best.pipeline.id, "blog");
        // Trigger plus the name "blog" appearing in the text.
        assert_eq!(best.score, TRIGGER_WEIGHT + NAME_WEIGHT);

        let all = m.match_all("Write a BLOG about our product");
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].pipeline.id, "social");
        // "write", "about", "product"; "our" is not in the description.
        assert_eq!(all[1].score, 3 * WORD_WEIGHT);
    }

    #[test]
    fn test_name_match() {
        let m = matcher(vec![def("pp", "product-launch", "")]);
        let best = m.match_pipeline("plan our product launch next week").unwrap();
        assert_eq!(best.score, NAME_WEIGHT);
    }

    #[test]
    fn test_no_match_returns_none() {
        let m = matcher(vec![def("blog", "Blog", "long form article")]);
        assert!(m.match_pipeline("zzz qqq").is_none());
        assert!(m.match_all("").is_empty());
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let m = matcher(vec![
            def("first", "Alpha", "newsletter digest"),
            def("second", "Beta", "newsletter digest"),
        ]);
        let ids: Vec<_> = m
            .match_all("weekly newsletter")
            .into_iter()
            .map(|m| m.pipeline.id.clone())
            .collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn test_short_and_repeated_words_count_once() {
        let m = matcher(vec![def("p", "Zed", "an ad for video video")]);
        let best = m.match_pipeline("video video an ad").unwrap();
        assert_eq!(best.score, WORD_WEIGHT);
    }
}
