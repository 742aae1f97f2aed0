//! Conversational context assembly for the answer generator.
//!
//! Builds the system policy and user payload handed to the external
//! answer-generation service: bounded rolling history, a kind-specific
//! instructional envelope on the first message, and retrieved fragments
//! numbered as `[Source N]`. The grounding policy (answer only from the
//! numbered sources, surface partially-related material, state when
//! nothing relevant exists) is an external contract enforced by
//! instruction; this module only guarantees the framing is present.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::models::AnalysisKind;
use crate::models::{ChatMessage, Sender};
use crate::rank::RankedFragment;

/// How many prior (question, answer) pairs are carried into a turn.
pub const MAX_HISTORY_PAIRS: usize = 3;

/// An external text-completion service that produces the final answer.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

/// A prior exchange in the session.
#[derive(Debug, Clone)]
pub struct HistoryPair {
    pub question: String,
    pub answer: String,
}

/// The two strings handed to the answer generator.
#[derive(Debug, Clone)]
pub struct PromptBundle {
    pub system: String,
    pub user: String,
}

/// A numbered source reference matching the citation markers the answer
/// is instructed to use.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub number: usize,
    pub fragment_id: Uuid,
    pub document_id: Uuid,
    pub document_name: String,
    pub score: f64,
    pub preview: String,
    pub relevance_reason: String,
}

/// Everything a single turn's prompt is built from.
#[derive(Debug)]
pub struct PromptInputs<'a> {
    pub query: &'a str,
    pub kind: AnalysisKind,
    pub results: &'a [RankedFragment],
    pub history: &'a [HistoryPair],
    pub is_first_message: bool,
    /// Total documents in the corpus; negative when unknown.
    pub corpus_size: i64,
}

const SYSTEM_POLICY: &str = "\
You are an AI assistant for police case analysis. CRITICAL RULES:
1. ONLY use information from the document excerpts provided in the user's message
2. NEVER use external knowledge, internet information, or general legal knowledge
3. If EXACT information is not in the provided documents but RELATED information exists, explain what you found and how it relates
4. If NO related information exists at all, clearly state it's not available
5. Always cite sources when referencing information (e.g., \"According to Source 1...\")
6. Be helpful by explaining what information IS available, even if it doesn't match every detail of the query
7. Stay strictly within the bounds of the uploaded document context";

/// Instructional envelope shown to the user on the first message of a
/// session, scoped to its analysis kind.
pub fn kind_envelope(kind: AnalysisKind) -> &'static str {
    match kind {
        AnalysisKind::CaseSection => {
            "I'm here to help you analyze legal cases and sections. You can ask me about \
             specific legal provisions, case studies, or legal procedures related to police cases."
        }
        AnalysisKind::Bail => {
            "I'm here to help you with bail-related analysis. You can ask me about bail \
             procedures, bail conditions, or legal provisions related to bail in criminal cases."
        }
        AnalysisKind::HumanRights => {
            "I'm here to help you with human rights analysis in legal cases. You can ask me \
             about human rights violations, legal protections, or related legal provisions."
        }
    }
}

/// Plain greetings get a welcome framing instead of the question framing.
pub fn is_greeting(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "hi" | "hello" | "hey" | "start"
    )
}

/// Pair each user message with the assistant reply that follows it and
/// keep the most recent [`MAX_HISTORY_PAIRS`] pairs.
pub fn history_pairs(messages: &[ChatMessage]) -> Vec<HistoryPair> {
    let mut pairs = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        if messages[i].sender == Sender::User {
            if let Some(next) = messages.get(i + 1) {
                if next.sender == Sender::Assistant {
                    pairs.push(HistoryPair {
                        question: messages[i].text.clone(),
                        answer: next.text.clone(),
                    });
                    i += 2;
                    continue;
                }
            }
        }
        i += 1;
    }

    if pairs.len() > MAX_HISTORY_PAIRS {
        pairs.split_off(pairs.len() - MAX_HISTORY_PAIRS)
    } else {
        pairs
    }
}

/// Number the retrieved fragments in result order; the numbers match
/// the `[Source N]` markers in the prompt.
pub fn number_sources(results: &[RankedFragment]) -> Vec<SourceRef> {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| SourceRef {
            number: i + 1,
            fragment_id: r.fragment_id,
            document_id: r.document_id,
            document_name: r.document_name.clone(),
            score: r.final_score,
            preview: r.preview.clone(),
            relevance_reason: r.relevance_reason.clone(),
        })
        .collect()
}

/// Assemble the system policy and user payload for one turn.
pub fn build_prompt(inputs: &PromptInputs<'_>) -> PromptBundle {
    let context = context_block(inputs.results, inputs.corpus_size);
    let history = history_block(inputs.history);
    let envelope = kind_envelope(inputs.kind);

    let user = if inputs.is_first_message && is_greeting(inputs.query) {
        format!(
            "You are an AI assistant specializing in legal analysis for police cases. You can \
             ONLY provide information based on the documents uploaded to this system.\n\n\
             {envelope}\n\n\
             The user has greeted you with: \"{query}\"\n\n\
             Please respond with a warm, professional greeting and explain that you can help \
             them analyze their uploaded legal documents. Emphasize that you will only use \
             information from their uploaded documents, not from the internet or general \
             knowledge.",
            query = inputs.query,
        )
    } else if inputs.is_first_message {
        format!(
            "You are an AI assistant specializing in legal analysis for police cases. You can \
             ONLY answer questions using information from the uploaded documents provided \
             below. Do NOT use any information from the internet, general knowledge, or \
             external sources.\n\n\
             {envelope}\n\n\
             IMPORTANT: Base your answer ONLY on the following document excerpts. If the EXACT \
             information is not found but RELATED information exists, explain what you found \
             and how it relates to the question.\n\n\
             Context from uploaded documents:\n{context}\n\n\
             User's question: \"{query}\"\n\n\
             Instructions:\n\
             1. Only use information from the document excerpts above\n\
             2. If the exact answer is not in the documents but related information exists, explain what you found\n\
             3. If NO related information exists at all, say \"This information is not available in your uploaded documents\"\n\
             4. Always cite which source you're referencing (e.g., \"According to Source 1...\")\n\
             5. Be helpful by explaining what information IS available, even if it's not a perfect match\n\
             6. Do not add any external knowledge or internet information",
            query = inputs.query,
        )
    } else {
        format!(
            "You are an AI assistant specializing in police case analysis. You can ONLY answer \
             questions using information from the uploaded documents provided below. Do NOT use \
             any information from the internet, general knowledge, or external sources.\n\n\
             CRITICAL INSTRUCTIONS:\n\
             1. ONLY use information from the document excerpts below\n\
             2. Do NOT add any external knowledge, internet information, or general legal knowledge\n\
             3. If the EXACT answer is not in the provided documents, but RELATED information exists, acknowledge the related information and explain what you found\n\
             4. If NO related information exists, say \"This information is not available in your uploaded documents\"\n\
             5. Always reference sources when providing information (e.g., \"According to Source 1...\")\n\
             6. Be helpful by explaining what information IS available, even if it's not a perfect match\n\n\
             Context from uploaded documents:\n{context}{history}\n\n\
             User's question: \"{query}\"",
            query = inputs.query,
        )
    };

    PromptBundle {
        system: SYSTEM_POLICY.to_string(),
        user,
    }
}

fn context_block(results: &[RankedFragment], corpus_size: i64) -> String {
    if results.is_empty() {
        return if corpus_size == 0 {
            "No documents have been uploaded to the system yet. Please upload relevant \
             documents to get answers based on your files."
                .to_string()
        } else if corpus_size > 0 {
            format!(
                "No relevant documents found for this query in your {corpus_size} uploaded \
                 files. The query might be too specific or the documents may not contain \
                 related information."
            )
        } else {
            "No relevant documents found for this query.".to_string()
        };
    }

    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[Source {}]: {}", i + 1, r.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn history_block(history: &[HistoryPair]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\nPrevious conversation:\n");
    for pair in history {
        out.push_str(&format!("Q: {}\nA: {}\n", pair.question, pair.answer));
    }
    out
}
