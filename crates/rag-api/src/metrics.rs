//! Prometheus registry behind `/metrics`
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

use rag_agents::Design;
use rag_core::QueryResult;

pub struct Metrics {
    registry: Registry,
    queries: IntCounterVec,
    iterations: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let queries = IntCounterVec::new(
            Opts::new("rag_queries_total", "Queries answered, by design and outcome"),
            &["design", "outcome"],
        )?;
        let iterations = HistogramVec::new(
            HistogramOpts::new("rag_iterations", "Generate/validate iterations per query")
                .buckets(vec![0.0, 1.0, 2.0, 3.0, 5.0, 8.0]),
            &["design"],
        )?;
        registry.register(Box::new(queries.clone()))?;
        registry.register(Box::new(iterations.clone()))?;
        Ok(Self {
            registry,
            queries,
            iterations,
        })
    }

    pub fn observe(&self, design: Design, result: &QueryResult) {
        self.queries
            .with_label_values(&[design.as_str(), result.outcome.as_str()])
            .inc();
        self.iterations
            .with_label_values(&[design.as_str()])
            .observe(f64::from(result.iterations));
    }

    /// Count a query that ended in an error instead of a result
    pub fn observe_error(&self, design: Design) {
        self.queries
            .with_label_values(&[design.as_str(), "error"])
            .inc();
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
