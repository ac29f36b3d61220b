//! RAG API /v1: endpoints REST
//!
//! ```text
//! POST /v1/answer             → Orchestrator (adaptive)
//! POST /v1/answer/linear      → LinearPipeline
//! POST /v1/answer/self-check  → SelfCheckingLoop
//! GET  /v1/health
//! GET  /metrics
//! ```
pub mod handlers;
pub mod metrics;
pub mod middleware;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use rag_agents::{AnswerEngine, LinearPipeline, Orchestrator, SelfCheckingLoop};
use rag_core::{KnowledgeBase, KnowledgeRecord, RagConfig, Search, Services};
use rag_services::{
    InMemoryIndex, JsonDirKnowledgeBase, LexicalReranker, OpenAiEmbeddings, OpenAiReasoner,
    VectorIndex,
};

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub adaptive: Arc<dyn AnswerEngine>,
    pub linear: Arc<dyn AnswerEngine>,
    pub self_check: Arc<dyn AnswerEngine>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Build the three answering designs over one set of collaborators.
    pub fn new(services: &Services, config: &RagConfig) -> anyhow::Result<Self> {
        Ok(Self {
            adaptive: Arc::new(Orchestrator::new(services, config)?),
            linear: Arc::new(LinearPipeline::new(services, config)?),
            self_check: Arc::new(SelfCheckingLoop::new(services, config)?),
            metrics: Arc::new(Metrics::new()?),
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/v1/answer", post(handlers::answer))
        .route("/v1/answer/linear", post(handlers::answer_linear))
        .route("/v1/answer/self-check", post(handlers::answer_self_check))
        .route("/v1/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(axum::middleware::from_fn(middleware::log_requests))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::cors())
        .with_state(state)
}

/// Default collaborators: JSON knowledge base, OpenAI-compatible reasoner
/// and lexical reranker. Search is the embedding index when an API key is
/// configured and the lexical index otherwise, or when embedding fails.
pub async fn build_services(config: &RagConfig) -> anyhow::Result<Services> {
    let kb = JsonDirKnowledgeBase::new(&config.server.knowledge_base_dir);
    let records = kb
        .load_all()
        .await
        .with_context(|| format!("loading {}", kb.dir().display()))?;

    let search = match &config.reasoner.api_key {
        Some(_) => {
            let embedder = Arc::new(OpenAiEmbeddings::new(&config.reasoner)?);
            match VectorIndex::from_records(records.clone(), embedder).await {
                Ok(index) => Arc::new(index) as Arc<dyn Search>,
                Err(err) => {
                    warn!(error = %err, "embedding index unavailable, using lexical index");
                    lexical(records)
                }
            }
        }
        None => {
            warn!("no reasoner API key configured; requests go out unauthenticated");
            lexical(records)
        }
    };
    let reasoner = OpenAiReasoner::new(&config.reasoner)?;

    Ok(Services::new(
        Arc::new(reasoner),
        search,
        Arc::new(LexicalReranker::new()),
    ))
}

fn lexical(records: Vec<KnowledgeRecord>) -> Arc<dyn Search> {
    let index = InMemoryIndex::from_records(records);
    info!(documents = index.len(), "lexical index ready");
    Arc::new(index)
}

pub async fn run(config: RagConfig) -> anyhow::Result<()> {
    let services = build_services(&config).await?;
    let app = create_app(AppState::new(&services, &config)?);

    let addr = config.server.addr.as_str();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("RAG API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
