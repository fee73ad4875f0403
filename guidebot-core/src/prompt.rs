//! Token-budgeted system prompt assembly.
//!
//! The system prompt is a fixed rule text plus a context section built from
//! retrieved reference material. The context must fit whatever token budget is
//! left after the rules and the user's question, so this module does all the
//! budget arithmetic and the token-exact truncation. The budget can go
//! negative when the rules and question alone blow the target; that case is
//! answered with a fixed notice and the tokenizer is never asked to truncate
//! to a negative length.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::BudgetConfig;
use crate::token_counter::TokenCounter;
use crate::types::ContextItem;

/// Rule text used when no rules file is configured or it cannot be read.
pub const DEFAULT_PROMPT_RULES: &str = "\
1. Priority Criteria: Base every answer on the provided document content first. \
Company SOPs take precedence over general GMP guidance; regulations (PIC/S, EU GMP \
Annex 11, 21 CFR Part 11) take precedence over both when they conflict.
2. Grounding: If the provided documents do not contain the answer, say so clearly \
and do not guess. Never invent SOP numbers, revision dates, or clause references.
3. Citations: When an answer relies on a provided document, name the source file \
in the answer.
4. Safety: Never relax quality or data-integrity requirements in an answer. When \
in doubt, direct the user to the QA department.
5. Language: Answer in the language the question was asked in, keeping terminology \
consistent with the source documents.
6. Format: Prefer short numbered steps for procedures, and quote limits and ranges \
exactly as written in the source.";

/// Context section when the rules and question alone exhaust the budget.
pub const CONTEXT_BUDGET_EXHAUSTED: &str = "Cannot include context (token limit).";

/// Context section when no usable reference material was found.
pub const NO_REFERENCE_DOCUMENTS: &str = "No reference documents currently available.";

/// Appended to a context section that was cut to fit the budget.
pub const TRUNCATION_MARKER: &str = "\n(...more content, may be truncated.)";

/// Context section when truncated tokens could not be decoded back to text.
pub const CONTEXT_DECODE_FAILED: &str = "[Error: Context decode failed]";

const CONTEXT_SLOT: &str = "{context}";
const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Read the prompt rules from `path`, falling back to the built-in default
/// when no path is configured or the file cannot be read.
pub fn load_prompt_rules(path: Option<&Path>) -> String {
    let Some(path) = path else {
        debug!("No prompt rules file configured, using built-in rules");
        return DEFAULT_PROMPT_RULES.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(rules) => {
            debug!(path = %path.display(), "Loaded prompt rules");
            rules
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read prompt rules, using built-in rules");
            DEFAULT_PROMPT_RULES.to_string()
        }
    }
}

fn prompt_template(rules: &str) -> String {
    format!(
        "{rules}\n\nStrictly adhere to the rules above. The following is document content to help answer the user's question:\n<Document Start>\n{{context}}\n<Document End>"
    )
}

/// A fully assembled system prompt plus the numbers behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    /// The complete system prompt handed to the chat model.
    pub system_prompt: String,
    /// The context section spliced into the template.
    pub context: String,
    pub base_tokens: usize,
    pub query_tokens: usize,
    /// Remaining budget for context. Negative when rules + query overflow.
    pub max_context_tokens: i64,
    /// Tokens of the final system prompt plus the question.
    pub final_input_tokens: usize,
    pub truncated: bool,
    pub warnings: Vec<String>,
}

/// Builds bounded system prompts from rule text and retrieved context.
///
/// The template and its empty-slot token cost are computed once at
/// construction; per call only the question and the context are counted.
pub struct PromptAssembler {
    counter: Arc<TokenCounter>,
    template: String,
    base_tokens: usize,
    target_input_tokens: i64,
    max_input_tokens: usize,
}

impl PromptAssembler {
    pub fn new(counter: Arc<TokenCounter>, rules: &str, budget: &BudgetConfig) -> Self {
        let template = prompt_template(rules);
        let base_tokens = counter.count(&template.replace(CONTEXT_SLOT, ""));
        Self {
            counter,
            template,
            base_tokens,
            target_input_tokens: budget.target_input_tokens(),
            max_input_tokens: budget.max_input_tokens,
        }
    }

    /// Signed token budget left for context once the template and `query`
    /// are paid for. Not clamped at zero, so callers can see how far over
    /// budget a question is; nothing retrieved can be included unless this
    /// is positive.
    pub fn context_budget(&self, query: &str) -> i64 {
        self.budget_after(self.counter.count(query))
    }

    fn budget_after(&self, query_tokens: usize) -> i64 {
        self.target_input_tokens - self.base_tokens as i64 - query_tokens as i64
    }

    /// Assemble the system prompt for one question over the given context
    /// items. Duplicate and whitespace-only items are dropped here, so the
    /// caller may pass the retrieval output as-is.
    pub fn assemble(&self, query: &str, items: &[ContextItem]) -> AssembledPrompt {
        let query_tokens = self.counter.count(query);
        let max_context_tokens = self.budget_after(query_tokens);

        let mut warnings = Vec::new();
        let mut truncated = false;

        let context = if max_context_tokens <= 0 {
            warn!(
                base_tokens = self.base_tokens,
                query_tokens, "Rules and query alone exhaust the input budget"
            );
            warnings.push(
                "Input token limit reached by prompt rules and query alone. No additional context can be included."
                    .to_string(),
            );
            CONTEXT_BUDGET_EXHAUSTED.to_string()
        } else {
            let blocks = format_context_blocks(items);
            if blocks.is_empty() {
                NO_REFERENCE_DOCUMENTS.to_string()
            } else {
                let joined = blocks.join(CONTEXT_SEPARATOR);
                let budget = max_context_tokens as usize;
                if self.counter.count(&joined) > budget {
                    match self.counter.truncate_exact(&joined, budget) {
                        Ok(cut) => {
                            truncated = true;
                            debug!(budget, "Context truncated to fit token budget");
                            format!("{cut}{TRUNCATION_MARKER}")
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to decode truncated context tokens");
                            CONTEXT_DECODE_FAILED.to_string()
                        }
                    }
                } else {
                    joined
                }
            }
        };

        let system_prompt = self.template.replace(CONTEXT_SLOT, &context);
        let final_input_tokens = self.counter.count(&system_prompt) + query_tokens;
        if final_input_tokens > self.max_input_tokens {
            error!(
                final_input_tokens,
                max_input_tokens = self.max_input_tokens,
                "Final prompt exceeds the model input ceiling, sending anyway"
            );
        } else {
            debug!(final_input_tokens, "Assembled system prompt");
        }

        AssembledPrompt {
            system_prompt,
            context,
            base_tokens: self.base_tokens,
            query_tokens,
            max_context_tokens,
            final_input_tokens,
            truncated,
            warnings,
        }
    }
}

/// Format each usable item as a labeled block. Whitespace-only content is
/// dropped; duplicate trimmed content keeps only its first occurrence, and
/// with it the first item's source label. Block bodies carry the content
/// untrimmed.
fn format_context_blocks(items: &[ContextItem]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut blocks = Vec::new();
    for item in items {
        let trimmed = item.content.trim();
        if trimmed.is_empty() || !seen.insert(trimmed.to_string()) {
            continue;
        }
        if item.is_image_description {
            blocks.push(format!("[Image Description: {}]\n{}", item.source, item.content));
        } else {
            blocks.push(format!("[Source: {}]\n{}", item.source, item.content));
        }
    }
    blocks
}
