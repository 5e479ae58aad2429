//! Prompt envelopes, context blocks, and relevance grading.
//!
//! Retrieved passages are interpolated into a language-matched template:
//! prompts written with Vietnamese diacritics get a Vietnamese envelope,
//! everything else gets the English one. Each template has a
//! "with context" form (numbered `[Source i - label]` blocks) and a
//! "no context" form used when retrieval ran but nothing relevant came back.

use std::collections::HashSet;

use serde::Serialize;

use crate::classify::words;
use crate::models::ScoredChunk;

/// What is sent to the generation provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptEnvelope {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl PromptEnvelope {
    pub fn new(prompt: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            temperature,
            max_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Vietnamese,
}

const VIETNAMESE_CHARS: &str = "àáạảãâầấậẩẫăằắặẳẵèéẹẻẽêềếệểễìíịỉĩòóọỏõôồốộổỗơờớợởỡùúụủũưừứựửữỳýỵỷỹđ";

/// Detect the prompt language from Vietnamese-specific letters.
pub fn detect_language(text: &str) -> Language {
    let lower = text.to_lowercase();
    if lower.chars().any(|c| VIETNAMESE_CHARS.contains(c)) {
        Language::Vietnamese
    } else {
        Language::English
    }
}

/// Build the augmented prompt for a question and its graded passages.
pub fn build_rag_prompt(question: &str, passages: &[ScoredChunk]) -> String {
    match detect_language(question) {
        Language::Vietnamese => vietnamese_prompt(question, passages),
        Language::English => english_prompt(question, passages),
    }
}

/// Render passages as numbered source blocks.
pub fn context_block(passages: &[ScoredChunk], default_source: &str, label: &str) -> String {
    let mut out = String::new();
    for (i, passage) in passages.iter().enumerate() {
        let source = passage
            .chunk
            .metadata
            .get("source")
            .map(String::as_str)
            .unwrap_or(default_source);
        out.push_str(&format!(
            "\n[{} {} - {}]:\n{}\n",
            label,
            i + 1,
            source,
            passage.chunk.text
        ));
    }
    out
}

fn english_prompt(question: &str, passages: &[ScoredChunk]) -> String {
    if passages.is_empty() {
        return format!(
            "You are an AI assistant helping with career guidance and educational content.\n\
             I don't have specific context available for this question, so I'll provide a general response based on my knowledge.\n\n\
             Question: {}\n\nAnswer:",
            question
        );
    }
    format!(
        "You are an AI assistant helping with career guidance and educational content.\n\
         Use the following retrieved context to answer the question accurately and helpfully.\n\
         If the context doesn't contain enough information, say so clearly.\n\
         Keep your answer concise but comprehensive.\n\n\
         Context from retrieved sources:{}\n\
         Question: {}\n\nAnswer:",
        context_block(passages, "knowledge base", "Source"),
        question
    )
}

fn vietnamese_prompt(question: &str, passages: &[ScoredChunk]) -> String {
    if passages.is_empty() {
        return format!(
            "Bạn là một trợ lý AI chuyên về hướng nghiệp và giáo dục tại Việt Nam.\n\
             Tôi không có thông tin cụ thể cho câu hỏi này, vì vậy tôi sẽ cung cấp câu trả lời chung dựa trên kiến thức của mình.\n\n\
             Câu hỏi: {}\n\nTrả lời:",
            question
        );
    }
    format!(
        "Bạn là một trợ lý AI chuyên về hướng nghiệp và giáo dục tại Việt Nam.\n\
         Sử dụng thông tin từ các nguồn được cung cấp để trả lời câu hỏi một cách chính xác và hữu ích.\n\
         Nếu thông tin không đủ, hãy nói rõ và cung cấp câu trả lời tổng quát.\n\
         Giữ câu trả lời súc tích nhưng đầy đủ thông tin.\n\n\
         Thông tin tham khảo:{}\n\
         Câu hỏi: {}\n\nTrả lời:",
        context_block(passages, "cơ sở dữ liệu", "Nguồn"),
        question
    )
}

/// Fraction of the prompt's distinct words that also occur in `text`.
pub fn relevance(prompt: &str, text: &str) -> f32 {
    let prompt_lower = prompt.to_lowercase();
    let query: HashSet<&str> = words(&prompt_lower).into_iter().collect();
    if query.is_empty() {
        return 0.0;
    }
    let text_lower = text.to_lowercase();
    let content: HashSet<&str> = words(&text_lower).into_iter().collect();
    query.intersection(&content).count() as f32 / query.len() as f32
}

/// Keep passages whose keyword overlap with the prompt reaches `min_relevance`.
pub fn grade_passages(prompt: &str, passages: Vec<ScoredChunk>, min_relevance: f32) -> Vec<ScoredChunk> {
    passages
        .into_iter()
        .filter(|p| relevance(prompt, &p.chunk.text) >= min_relevance)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Metadata};

    fn passage(text: &str, source: Option<&str>) -> ScoredChunk {
        let mut metadata = Metadata::new();
        if let Some(s) = source {
            metadata.insert("source".to_string(), s.to_string());
        }
        ScoredChunk {
            chunk: Chunk {
                chunk_id: "d_0".into(),
                document_id: "d".into(),
                collection: "c".into(),
                ordinal: 0,
                text: text.to_string(),
                metadata,
            },
            score: 0.9,
        }
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(detect_language("Điểm chuẩn là bao nhiêu?"), Language::Vietnamese);
        assert_eq!(detect_language("What is the cutoff score?"), Language::English);
    }

    #[test]
    fn test_english_prompt_numbers_sources() {
        let prompt = build_rag_prompt(
            "What score does Bach Khoa need?",
            &[passage("Bach Khoa requires 28.5", Some("moet.gov.vn")), passage("Other", None)],
        );
        assert!(prompt.contains("[Source 1 - moet.gov.vn]:\nBach Khoa requires 28.5"));
        assert!(prompt.contains("[Source 2 - knowledge base]:\nOther"));
        assert!(prompt.ends_with("Question: What score does Bach Khoa need?\n\nAnswer:"));
    }

    #[test]
    fn test_no_context_templates() {
        let en = build_rag_prompt("Hello!", &[]);
        assert!(en.contains("I don't have specific context"));
        let vi = build_rag_prompt("Xin chào!", &[]);
        assert!(vi.contains("Câu hỏi: Xin chào!"));
    }

    #[test]
    fn test_vietnamese_prompt_uses_vietnamese_labels() {
        let prompt = build_rag_prompt("Học phí bao nhiêu?", &[passage("30 triệu", None)]);
        assert!(prompt.contains("[Nguồn 1 - cơ sở dữ liệu]"));
    }

    #[test]
    fn test_grading_filters_unrelated_passages() {
        let kept = grade_passages(
            "bach khoa admission score",
            vec![
                passage("The admission score for Bach Khoa is 28.5", None),
                passage("Weather is sunny today", None),
            ],
            0.1,
        );
        assert_eq!(kept.len(), 1);
        assert!(kept[0].chunk.text.contains("28.5"));
        assert_eq!(relevance("", "anything"), 0.0);
    }
}
