//! Prompt book: Handlebars templates for every model call
//!
//! Templates are registered once and rendered with HTML escaping disabled.
//! Text that must be shortened is cut in Rust ([`excerpt`]) before it
//! reaches a template.

use handlebars::Handlebars;
use serde::Serialize;

use rag_core::RagError;

pub const CLASSIFY: &str = "classify";
pub const PLAN: &str = "plan";
pub const FORMULATE_QUERIES: &str = "formulate_queries";
pub const GRADE: &str = "grade";
pub const GENERATE_GROUNDED: &str = "generate_grounded";
pub const VALIDATE: &str = "validate";

pub const SYSTEM_ANSWER: &str = "You are a helpful customer support assistant.
Guidelines:
- Answer using only the provided context
- Be accurate and specific
- Cite sources with [Source N] notation
- Be concise but complete
- If the context is insufficient, say so plainly
- Keep a professional, friendly tone";

pub const SYSTEM_COMPARE: &str = "You are a customer support assistant.
Compare the information in the provided sources.
Guidelines:
- Go through the sources systematically
- Point out similarities and differences
- Use specific details from each source
- Cite sources with [Source N] notation
- If the context is insufficient for a comparison, say so plainly";

pub const SYSTEM_SYNTHESIZE: &str = "You are a customer support assistant.
Combine the information in the provided sources into one coherent answer.
Guidelines:
- Merge the information logically
- Resolve contradictions between sources explicitly
- Cite sources with [Source N] notation
- Stay faithful to the source material
- If the context is insufficient, say so plainly";

const CLASSIFY_TEMPLATE: &str = r#"Classify this customer support query.
{{#if history}}
Conversation so far:
{{#each history}}{{this.role}}: {{this.text}}
{{/each}}
{{/if}}
Query: "{{query}}"

Decide:
1. category: product_info, policy, order_tracking, technical_support, shipping, general_conversation or out_of_scope
2. complexity: simple (direct lookup), medium (some reasoning), complex (multi-step or comparison)
3. requires_retrieval: whether the knowledge base must be consulted
4. suggested_strategy: direct, multi_hop, comparison or conversational

Reply with one JSON object:
{"category": "...", "complexity": "simple|medium|complex", "requires_retrieval": true|false, "suggested_strategy": "...", "reasoning": "...", "confidence": 0.0-1.0}"#;

const PLAN_TEMPLATE: &str = r#"Create a step-by-step execution plan for this query.

Query: "{{query}}"
Category: {{category}}
Complexity: {{complexity}}
Strategy: {{strategy}}

Allowed actions (use no others):
{{#each actions}}- {{this}}
{{/each}}
retrieve steps name what to look up in "target" and may set "params": {"top_k": N, "multi_query": true}.

Reply with one JSON object:
{"plan": [{"step": 1, "action": "...", "target": "...", "description": "...", "params": {} }], "plan_type": "single|multi_hop|comparison", "expected_iterations": N}"#;

const FORMULATE_QUERIES_TEMPLATE: &str = r#"Write between 1 and {{max_queries}} focused search queries for a knowledge base.

Original query: "{{query}}"
Current step: {{step}}
Target: {{target}}

Each query must be a short, specific search phrase.
Reply with one JSON object:
{"queries": ["..."], "reasoning": "..."}"#;

const GRADE_TEMPLATE: &str = r#"Grade how relevant this document is to the query.

Query: "{{query}}"

Document:
{{content}}

Consider whether it helps answer the query, whether it is sufficient, and whether it is specific.
Reply with one JSON object:
{"is_relevant": true|false, "relevance_score": 0.0-1.0, "reasoning": "...", "key_points": ["..."]}"#;

const GENERATE_GROUNDED_TEMPLATE: &str = r#"Context:
{{context}}
Question: {{query}}

Answer the question using the context above."#;

const VALIDATE_TEMPLATE: &str = r#"Validate this answer to a customer support query.

Query: "{{query}}"

Sources used:
{{#if sources}}{{#each sources}}Source {{this.index}}: {{this.excerpt}}
{{/each}}{{else}}No sources (conversational response)
{{/if}}
Answer:
{{answer}}

Score each dimension from 0.0 to 1.0:
1. grounded: every claim is supported by the sources
2. complete: the question is fully answered
3. useful: the answer helps the customer
4. accurate: details such as prices and dates are correct
5. clarity: the answer is clear and organized

Reply with one JSON object:
{"grounded": {"score": 0.0, "is_acceptable": true, "issues": []}, "complete": {"score": 0.0, "is_acceptable": true, "missing": []}, "useful": {"score": 0.0, "is_acceptable": true, "issues": []}, "accurate": {"score": 0.0, "is_acceptable": true, "errors": []}, "clarity": {"score": 0.0, "is_acceptable": true, "issues": []}, "overall_quality": "excellent|good|acceptable|poor", "is_valid": true|false, "recommendation": "accept|regenerate|retrieve_more|clarify_query", "reasoning": "..."}"#;

/// Compiled prompt templates
pub struct PromptBook {
    handlebars: Handlebars<'static>,
}

impl PromptBook {
    pub fn new() -> Result<Self, RagError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);

        let templates = [
            (CLASSIFY, CLASSIFY_TEMPLATE),
            (PLAN, PLAN_TEMPLATE),
            (FORMULATE_QUERIES, FORMULATE_QUERIES_TEMPLATE),
            (GRADE, GRADE_TEMPLATE),
            (GENERATE_GROUNDED, GENERATE_GROUNDED_TEMPLATE),
            (VALIDATE, VALIDATE_TEMPLATE),
        ];
        for (name, template) in templates {
            handlebars
                .register_template_string(name, template)
                .map_err(|e| RagError::Prompt(format!("{}: {}", name, e)))?;
        }

        Ok(Self { handlebars })
    }

    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<String, RagError> {
        self.handlebars
            .render(name, data)
            .map_err(|e| RagError::Prompt(format!("{}: {}", name, e)))
    }

    #[cfg(test)]
    pub(crate) fn unregister(&mut self, name: &str) {
        self.handlebars.unregister_template(name);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .handlebars
            .get_templates()
            .keys()
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }
}

/// First `max_chars` characters of `text`, with `...` appended when cut
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
