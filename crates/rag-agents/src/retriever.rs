//! Retriever: query formulation, search, dedup-merge and rerank
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use rag_core::config::RetrievalConfig;
use rag_core::{
    complete_structured, CompletionRequest, Document, DocumentSet, EntryOutcome,
    ExecutionContext, Metadata, ModelTier, Purpose, RagConfig, RagError, Reasoner, Reranker,
    Search, Services, StageName, Step,
};

use crate::prompts::{self, PromptBook};

const ACTION: &str = "retrieve";

#[derive(Debug, Deserialize)]
struct QueriesReply {
    #[serde(default)]
    queries: Vec<String>,
}

pub struct Retriever {
    reasoner: Arc<dyn Reasoner>,
    search: Arc<dyn Search>,
    reranker: Arc<dyn Reranker>,
    prompts: Arc<PromptBook>,
    config: RetrievalConfig,
    temperature: f32,
}

impl Retriever {
    pub fn new(services: &Services, prompts: Arc<PromptBook>, config: &RagConfig) -> Self {
        Self {
            reasoner: services.reasoner.clone(),
            search: services.search.clone(),
            reranker: services.reranker.clone(),
            prompts,
            config: config.retrieval.clone(),
            temperature: config.reasoner.temperature,
        }
    }

    /// Run one retrieve step and merge the result into `ctx.retrieved`.
    /// Returns how many documents were new. On failure the context's set is
    /// left as it was and a degraded trace entry is written.
    pub async fn retrieve(
        &self,
        ctx: &mut ExecutionContext,
        step: &Step,
    ) -> Result<usize, RagError> {
        match self.collect(ctx.query(), step).await {
            Ok((queries, docs, reranked)) => {
                let found = docs.len();
                let added = ctx.retrieved.merge(docs);
                debug!(
                    trace_id = %ctx.trace_id,
                    found,
                    added,
                    total = ctx.retrieved.len(),
                    "retrieved"
                );
                ctx.record(
                    StageName::Retriever,
                    ACTION,
                    EntryOutcome::Ok,
                    json!({
                        "queries": queries,
                        "found": found,
                        "added": added,
                        "total": ctx.retrieved.len(),
                        "reranked": reranked,
                    }),
                );
                Ok(added)
            }
            Err(err) => {
                warn!(trace_id = %ctx.trace_id, error = %err, "retrieval degraded");
                ctx.record_failure(StageName::Retriever, ACTION, EntryOutcome::Degraded, &err);
                Err(err)
            }
        }
    }

    async fn collect(
        &self,
        query: &str,
        step: &Step,
    ) -> Result<(Vec<String>, Vec<Document>, bool), RagError> {
        let (top_k, filter) = match step {
            Step::Retrieve { params, .. } => (
                params.top_k.unwrap_or(self.config.default_top_k),
                params.filter.as_ref(),
            ),
            _ => (self.config.default_top_k, None),
        };

        let queries = self.formulate_queries(query, step).await?;
        let mut merged = DocumentSet::new();
        for text in &queries {
            merged.merge(self.search_once(text, top_k, filter).await?);
        }

        let mut docs = merged.into_vec();
        let reranked = docs.len() > self.config.rerank_threshold;
        if reranked {
            docs = rerank(self.reranker.as_ref(), query, docs, self.config.rerank_limit).await?;
        }
        Ok((queries, docs, reranked))
    }

    /// Search strings for a step: the target verbatim for a plain retrieve,
    /// model-written sub-queries otherwise (at most `max_search_queries`).
    pub async fn formulate_queries(
        &self,
        query: &str,
        step: &Step,
    ) -> Result<Vec<String>, RagError> {
        let target = step.target().unwrap_or(query).to_string();
        let multi_query = match step {
            Step::Retrieve { params, .. } => params.multi_query,
            _ => true,
        };
        if !multi_query {
            return Ok(vec![target]);
        }

        let prompt = self
            .prompts
            .render(
                prompts::FORMULATE_QUERIES,
                &json!({
                    "query": query,
                    "step": step.description().unwrap_or(step.action().as_str()),
                    "target": target,
                    "max_queries": self.config.max_search_queries,
                }),
            )
            .map_err(|e| RagError::RetrievalFailure(e.to_string()))?;
        let request = CompletionRequest::new(Purpose::FormulateQueries, ModelTier::Fast, prompt)
            .with_temperature(self.temperature);

        let reply: QueriesReply = complete_structured(self.reasoner.as_ref(), request)
            .await
            .map_err(|e| RagError::RetrievalFailure(e.to_string()))?;

        let mut queries: Vec<String> = reply
            .queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        queries.truncate(self.config.max_search_queries);
        if queries.is_empty() {
            queries.push(target);
        }
        Ok(queries)
    }

    pub async fn search_once(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<Document>, RagError> {
        let hits = self
            .search
            .query(text, top_k, filter)
            .await
            .map_err(|e| RagError::RetrievalFailure(e.to_string()))?;
        Ok(hits.into_iter().map(Document::from).collect())
    }

    pub async fn rerank_documents(
        &self,
        query: &str,
        docs: Vec<Document>,
        limit: usize,
    ) -> Result<Vec<Document>, RagError> {
        rerank(self.reranker.as_ref(), query, docs, limit).await
    }
}

/// Score `docs` against `query`, sort by descending score (stable) and keep
/// the first `limit`. Each kept document carries its `rerank_score`.
pub async fn rerank(
    reranker: &dyn Reranker,
    query: &str,
    docs: Vec<Document>,
    limit: usize,
) -> Result<Vec<Document>, RagError> {
    if docs.is_empty() {
        return Ok(docs);
    }

    let texts: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
    let scores = reranker
        .score(query, &texts)
        .await
        .map_err(|e| RagError::RerankUnavailable(e.to_string()))?;
    if scores.len() != docs.len() {
        return Err(RagError::RerankUnavailable(format!(
            "expected {} scores, got {}",
            docs.len(),
            scores.len()
        )));
    }

    let mut scored: Vec<Document> = docs
        .into_iter()
        .zip(scores)
        .map(|(mut doc, score)| {
            doc.rerank_score = Some(score);
            doc
        })
        .collect();
    scored.sort_by(|a, b| {
        let a = a.rerank_score.unwrap_or(f32::MIN);
        let b = b.rerank_score.unwrap_or(f32::MIN);
        b.total_cmp(&a)
    });
    scored.truncate(limit);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_core::{RetrieveParams, StepInfo};
    use rag_testkit::{hit, hits, queries_json, Doubles, FixedReranker, ScriptedReasoner, StaticSearch};

    fn retriever(doubles: &Doubles) -> Retriever {
        let prompts = Arc::new(PromptBook::new().unwrap());
        Retriever::new(&doubles.services(), prompts, &RagConfig::default())
    }

    fn multi_query_step(target: &str) -> Step {
        Step::Retrieve {
            info: StepInfo {
                target: Some(target.to_string()),
                description: Some("find both policies".to_string()),
            },
            params: RetrieveParams {
                top_k: Some(4),
                multi_query: true,
                filter: None,
            },
        }
    }

    #[tokio::test]
    async fn test_plain_retrieve_uses_target_verbatim() {
        let doubles = Doubles::new(
            ScriptedReasoner::new(),
            StaticSearch::new(hits("kb", 3)),
            FixedReranker::uniform(0.5),
        );
        let mut ctx = ExecutionContext::new("What is the return policy?", vec![]);

        let added = retriever(&doubles)
            .retrieve(&mut ctx, &Step::retrieve("return policy", Some(5)))
            .await
            .unwrap();

        assert_eq!(added, 3);
        assert_eq!(doubles.search.calls()[0].text, "return policy");
        assert_eq!(doubles.search.calls()[0].top_k, 5);
        assert!(doubles.reasoner.calls().is_empty());
        // three documents do not trigger a rerank
        assert_eq!(doubles.reranker.call_count(), 0);
        assert_eq!(ctx.retrieved.ids(), vec!["kb-1", "kb-2", "kb-3"]);
    }

    #[tokio::test]
    async fn test_multi_query_dedups_and_truncates() {
        let reasoner = ScriptedReasoner::new();
        reasoner.push_json(
            Purpose::FormulateQueries,
            queries_json(&["electronics returns", "clothing returns", "refunds", "exchanges"]),
        );
        let search = StaticSearch::with_sequence(vec![
            vec![hit("A", "electronics", 0.9), hit("B", "shared", 0.8)],
            vec![hit("B", "shared", 0.7), hit("C", "clothing", 0.6)],
            vec![hit("D", "refunds", 0.5)],
        ]);
        let doubles = Doubles::new(reasoner, search, FixedReranker::uniform(0.5));
        let mut ctx = ExecutionContext::new("Compare returns", vec![]);

        retriever(&doubles)
            .retrieve(&mut ctx, &multi_query_step("return policies"))
            .await
            .unwrap();

        let searched: Vec<String> = doubles.search.calls().into_iter().map(|c| c.text).collect();
        assert_eq!(searched, vec!["electronics returns", "clothing returns", "refunds"]);
        // uniform scores keep the merge order
        assert_eq!(ctx.retrieved.ids(), vec!["A", "B", "C", "D"]);
        assert_eq!(doubles.reranker.call_count(), 1);
        assert_eq!(ctx.retrieved.get("B").unwrap().similarity, Some(0.8));
    }

    #[tokio::test]
    async fn test_empty_formulation_falls_back_to_target() {
        let reasoner = ScriptedReasoner::new();
        reasoner.push_json(Purpose::FormulateQueries, queries_json(&[]));
        let doubles = Doubles::new(reasoner, StaticSearch::new(vec![]), FixedReranker::uniform(0.5));
        let mut ctx = ExecutionContext::new("q", vec![]);

        retriever(&doubles)
            .retrieve(&mut ctx, &multi_query_step("warranty"))
            .await
            .unwrap();
        assert_eq!(doubles.search.calls()[0].text, "warranty");
    }

    #[tokio::test]
    async fn test_rerank_orders_and_truncates() {
        let doubles = Doubles::new(
            ScriptedReasoner::new(),
            StaticSearch::new(vec![
                hit("A", "alpha", 0.9),
                hit("B", "beta", 0.8),
                hit("C", "gamma", 0.7),
                hit("D", "delta", 0.6),
            ]),
            FixedReranker::by_content(&[("delta", 0.9), ("beta", 0.6), ("alpha", 0.6)]),
        );
        let docs = retriever(&doubles).search_once("q", 10, None).await.unwrap();

        let ranked = rerank(doubles.reranker.as_ref(), "q", docs, 3).await.unwrap();

        let ids: Vec<&str> = ranked.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["D", "A", "B"]);
        assert_eq!(ranked[0].rerank_score, Some(0.9));
    }

    #[tokio::test]
    async fn test_search_outage_leaves_context_untouched() {
        let doubles = Doubles::new(
            ScriptedReasoner::new(),
            StaticSearch::failing(),
            FixedReranker::uniform(0.5),
        );
        let mut ctx = ExecutionContext::new("q", vec![]);
        ctx.retrieved.insert(Document::new("kept", "earlier"));

        let err = retriever(&doubles)
            .retrieve(&mut ctx, &Step::retrieve("q", None))
            .await
            .unwrap_err();

        assert!(matches!(err, RagError::RetrievalFailure(_)));
        assert!(err.is_degraded());
        assert_eq!(ctx.retrieved.ids(), vec!["kept"]);
        assert_eq!(ctx.trace().entries()[0].outcome, EntryOutcome::Degraded);
    }

    #[tokio::test]
    async fn test_rerank_length_mismatch_is_unavailable() {
        let doubles = Doubles::new(
            ScriptedReasoner::new(),
            StaticSearch::new(hits("kb", 6)),
            FixedReranker::wrong_length(),
        );
        let mut ctx = ExecutionContext::new("q", vec![]);

        let err = retriever(&doubles)
            .retrieve(&mut ctx, &Step::retrieve("q", None))
            .await
            .unwrap_err();

        assert!(matches!(err, RagError::RerankUnavailable(_)));
        assert!(ctx.retrieved.is_empty());
    }
}
