//! Prompt classification for adaptive retrieval.
//!
//! A [`PromptClassifier`] decides, once per request and before any
//! retrieval I/O, whether a prompt needs passages from the knowledge base.
//! [`KeywordClassifier`] is the built-in, deterministic implementation:
//! its verdict depends only on the prompt and its own configuration.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;

/// Outcome of classifying one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub retrieve: bool,
    /// Short human-readable explanation, logged with the decision.
    pub reason: String,
}

impl Verdict {
    pub fn retrieve(reason: impl Into<String>) -> Self {
        Self {
            retrieve: true,
            reason: reason.into(),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            retrieve: false,
            reason: reason.into(),
        }
    }
}

/// Decides whether a prompt should trigger retrieval.
#[async_trait]
pub trait PromptClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, prompt: &str) -> Result<Verdict>;
}

/// Words that make up purely conversational prompts.
pub const DEFAULT_GREETINGS: &[&str] = &[
    "hello", "hi", "hey", "yo", "hiya", "howdy", "greetings", "good", "morning", "afternoon",
    "evening", "night", "thanks", "thank", "you", "thx", "ty", "bye", "goodbye", "see", "later",
    "ok", "okay", "cool", "great", "nice", "there", "everyone", "again", "so", "much", "a", "lot",
    "xin", "chào", "chao", "cảm", "ơn", "cám", "bạn", "tạm", "biệt", "alo",
];

/// Phrases that mark a prompt as domain-specific.
pub const DEFAULT_DOMAIN_KEYWORDS: &[&str] = &[
    "đại học", "điểm chuẩn", "tuyển sinh", "ngành học", "trường", "khoa", "bách khoa",
    "kinh tế", "luật", "y khoa", "xét tuyển", "học phí", "đề án", "chỉ tiêu",
    "university", "college", "admission", "degree", "course", "career", "job", "education",
    "study", "learn", "score", "tuition", "major",
];

const QUESTION_WORDS: &[&str] = &[
    "what", "how", "which", "when", "where", "who", "why", "whom", "whose", "gì", "nào",
    "sao", "đâu", "bao", "nhiêu", "không",
];

/// Keyword heuristic classifier.
///
/// Rules, first match wins:
///
/// 1. A domain keyword appears anywhere in the prompt → retrieve.
/// 2. The prompt has no words, or every word is conversational → skip.
/// 3. The prompt contains `?` or a question word → retrieve.
/// 4. Otherwise → `default_retrieve`.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    greetings: HashSet<String>,
    domain_keywords: Vec<String>,
    default_retrieve: bool,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_GREETINGS.iter().map(|s| s.to_string()),
            DEFAULT_DOMAIN_KEYWORDS.iter().map(|s| s.to_string()),
            true,
        )
    }
}

impl KeywordClassifier {
    pub fn new(
        greetings: impl IntoIterator<Item = String>,
        domain_keywords: impl IntoIterator<Item = String>,
        default_retrieve: bool,
    ) -> Self {
        Self {
            greetings: greetings.into_iter().map(|g| g.to_lowercase()).collect(),
            domain_keywords: domain_keywords
                .into_iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            default_retrieve,
        }
    }

    /// Pure decision function behind [`PromptClassifier::classify`].
    pub fn decide(&self, prompt: &str) -> Verdict {
        let lower = prompt.to_lowercase();

        if let Some(keyword) = self.domain_keywords.iter().find(|k| lower.contains(k.as_str())) {
            return Verdict::retrieve(format!("domain keyword '{}'", keyword));
        }

        let words = words(&lower);
        if words.is_empty() {
            return Verdict::skip("no words");
        }
        if words.iter().all(|w| self.greetings.contains(*w)) {
            return Verdict::skip("conversational");
        }

        if lower.contains('?') || words.iter().any(|w| QUESTION_WORDS.contains(w)) {
            return Verdict::retrieve("question");
        }

        if self.default_retrieve {
            Verdict::retrieve("default")
        } else {
            Verdict::skip("default")
        }
    }
}

#[async_trait]
impl PromptClassifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(&self, prompt: &str) -> Result<Verdict> {
        Ok(self.decide(prompt))
    }
}

/// Split lowercase text into alphanumeric words.
pub fn words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greetings_skip_retrieval() {
        let c = KeywordClassifier::default();
        assert!(!c.decide("Hello!").retrieve);
        assert!(!c.decide("hi there, thanks so much").retrieve);
        assert!(!c.decide("Xin chào bạn").retrieve);
        assert!(!c.decide("   ").retrieve);
    }

    #[test]
    fn test_domain_keywords_retrieve() {
        let c = KeywordClassifier::default();
        let v = c.decide("Điểm chuẩn Bách Khoa năm nay");
        assert!(v.retrieve);
        assert!(v.reason.contains("điểm chuẩn"));
        assert!(c.decide("Hello, which university should I pick").retrieve);
    }

    #[test]
    fn test_questions_retrieve() {
        let c = KeywordClassifier::new(Vec::new(), Vec::new(), false);
        assert!(c.decide("Is it raining?").retrieve);
        assert!(c.decide("how do I apply").retrieve);
        assert!(!c.decide("tell me a joke").retrieve);
    }

    #[test]
    fn test_default_decision_is_configurable() {
        let on = KeywordClassifier::new(Vec::new(), Vec::new(), true);
        let off = KeywordClassifier::new(Vec::new(), Vec::new(), false);
        assert!(on.decide("tell me a joke").retrieve);
        assert!(!off.decide("tell me a joke").retrieve);
    }

    #[tokio::test]
    async fn test_repeated_classification_is_stable() {
        let c = KeywordClassifier::default();
        let prompts = ["Hello!", "What is the tuition?", "random words here"];
        for p in prompts {
            let first = c.classify(p).await.unwrap();
            for _ in 0..10 {
                assert_eq!(c.classify(p).await.unwrap(), first);
            }
        }
    }
}
