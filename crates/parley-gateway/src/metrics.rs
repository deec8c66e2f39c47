//! Prometheus metrics for Parley Gateway

use lazy_static::lazy_static;
use parley_runtime::Reply;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram, Counter,
    CounterVec, GaugeVec, Histogram,
};

lazy_static! {
    /// Conversation requests by outcome
    pub static ref CONVERSATION_REQUESTS: CounterVec = register_counter_vec!(
        "parley_conversation_requests_total",
        "Conversation requests by outcome",
        &["outcome"]
    )
    .expect("metric can be registered");

    /// Time from request to finished reply
    pub static ref GENERATION_LATENCY: Histogram = register_histogram!(
        "parley_generation_latency_seconds",
        "Reply generation latency in seconds",
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .expect("metric can be registered");

    /// Prompt size after windowing
    pub static ref PROMPT_TOKENS: Histogram = register_histogram!(
        "parley_prompt_tokens",
        "Encoded prompt length after windowing",
        vec![64.0, 256.0, 512.0, 1024.0, 2048.0, 4096.0, 8192.0, 16384.0]
    )
    .expect("metric can be registered");

    pub static ref RESPONSE_TOKENS_TOTAL: Counter = register_counter!(
        "parley_response_tokens_total",
        "Total tokens streamed back from the backend"
    )
    .expect("metric can be registered");

    pub static ref CONTEXT_REBUILDS_TOTAL: Counter = register_counter!(
        "parley_context_rebuilds_total",
        "Prompts rebuilt after the backend reported a full context"
    )
    .expect("metric can be registered");

    pub static ref TURNS_DROPPED_TOTAL: Counter = register_counter!(
        "parley_turns_dropped_total",
        "Conversation turns trimmed to fit the prompt budget"
    )
    .expect("metric can be registered");

    pub static ref BUILD_INFO: GaugeVec = register_gauge_vec!(
        "parley_build_info",
        "Build information",
        &["version", "commit"]
    )
    .expect("metric can be registered");
}

/// Initialize metrics with build info
pub fn init_metrics() {
    BUILD_INFO
        .with_label_values(&[
            env!("CARGO_PKG_VERSION"),
            option_env!("GIT_COMMIT_SHA").unwrap_or("unknown"),
        ])
        .set(1.0);
}

pub fn record_reply(reply: &Reply) {
    CONVERSATION_REQUESTS.with_label_values(&["ok"]).inc();
    PROMPT_TOKENS.observe(reply.prompt_tokens as f64);
    RESPONSE_TOKENS_TOTAL.inc_by(reply.response_tokens as f64);
    CONTEXT_REBUILDS_TOTAL.inc_by(reply.rebuilds as f64);
    TURNS_DROPPED_TOTAL.inc_by(reply.turns_dropped as f64);
}

pub fn record_failure(kind: &str) {
    CONVERSATION_REQUESTS.with_label_values(&[kind]).inc();
}

/// Export metrics in Prometheus format
pub fn export() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parley_context::Turn;
    use parley_runtime::FinishReason;

    use super::*;

    #[test]
    fn reply_metrics_are_exported() {
        record_reply(&Reply {
            turn: Turn::assistant("hi"),
            response_tokens: 2,
            prompt_tokens: 40,
            turns_dropped: 2,
            rebuilds: 1,
            finish: FinishReason::EndOfSequence,
            elapsed: Duration::from_millis(20),
        });
        record_failure("context_overflow");

        let exported = export();
        assert!(exported.contains("parley_conversation_requests_total"));
        assert!(exported.contains("parley_context_rebuilds_total"));
        assert!(exported.contains("context_overflow"));
    }
}
