//! Binary entrypoint for the RAG API server.
use anyhow::Context;
use tracing_subscriber::EnvFilter;

use rag_core::RagConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // RAG_CONFIG points at a YAML file; RAG_ADDR, RAG_KB_DIR and OPENAI_API_KEY override it
    let mut config = match std::env::var("RAG_CONFIG") {
        Ok(path) => RagConfig::load(&path).with_context(|| format!("loading {path}"))?,
        Err(_) => RagConfig::default(),
    };
    config.apply_env();
    config.validate()?;

    rag_api::run(config).await
}
