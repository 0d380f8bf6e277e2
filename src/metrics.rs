use tracing::trace;

// Counters are emitted as trace events; a subscriber can aggregate them.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "repricer.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn upstream_call(endpoint: &'static str, status: Option<u16>, elapsed_ms: u128) {
    trace!(
        target = "repricer.metrics",
        endpoint = endpoint,
        status = status.unwrap_or(0),
        elapsed_ms = elapsed_ms as u64,
        "upstream_call"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "repricer.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn write_attempt(strategy: &'static str, outcome: &'static str) {
    trace!(
        target = "repricer.metrics",
        strategy = strategy,
        outcome = outcome,
        "price_write_attempt"
    );
}
