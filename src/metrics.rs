use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::thread;

// Prefix metrics with `lanledger_` for better namespacing.
pub static PEERS_KNOWN: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("lanledger_peers_known", "Peers currently in the directory").expect("metric"));
pub static ENVELOPES_RECEIVED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("lanledger_envelopes_received_total", "Envelopes decoded and routed").expect("metric"));
pub static ENVELOPES_MALFORMED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("lanledger_envelopes_malformed_total", "Inbound envelopes dropped as malformed").expect("metric")
});
pub static SENDS_FAILED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("lanledger_sends_failed_total", "Outbound sends to unreachable peers").expect("metric"));
pub static TRANSACTIONS_APPLIED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("lanledger_transactions_applied_total", "Remote transactions written to the ledger").expect("metric")
});
pub static TRANSACTIONS_DUPLICATE: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("lanledger_transactions_duplicate_total", "Remote transactions dropped as already known").expect("metric")
});
pub static PEERS_EVICTED: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("lanledger_peers_evicted_total", "Peers evicted as stale").expect("metric"));

fn registry() -> Result<Registry> {
    let registry = Registry::new();
    registry.register(Box::new(PEERS_KNOWN.clone()))?;
    registry.register(Box::new(ENVELOPES_RECEIVED.clone()))?;
    registry.register(Box::new(ENVELOPES_MALFORMED.clone()))?;
    registry.register(Box::new(SENDS_FAILED.clone()))?;
    registry.register(Box::new(TRANSACTIONS_APPLIED.clone()))?;
    registry.register(Box::new(TRANSACTIONS_DUPLICATE.clone()))?;
    registry.register(Box::new(PEERS_EVICTED.clone()))?;
    Ok(registry)
}

pub fn serve(cfg: crate::config::Metrics) -> Result<()> {
    let registry = registry()?;
    let bind_addr = cfg.bind.clone();
    thread::Builder::new().name("metrics".into()).spawn(move || {
        let server = match tiny_http::Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("🔥 Could not start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };
        tracing::info!("📈 Metrics served on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            let mut buffer = vec![];
            let encoder = TextEncoder::new();
            if encoder.encode(&registry.gather(), &mut buffer).is_err() {
                tracing::warn!("🔥 Could not encode metrics");
                continue;
            }
            let mut response = tiny_http::Response::from_data(buffer);
            if let Ok(header) = "Content-Type: text/plain; version=0.0.4; charset=utf-8".parse::<tiny_http::Header>() {
                response = response.with_header(header);
            }
            let _ = request.respond(response);
        }
    })?;
    Ok(())
}
