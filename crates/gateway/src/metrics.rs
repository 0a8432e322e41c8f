use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static ACCESS_DECISIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "portal_gateway_http_requests_total",
                    "Portal gateway HTTP request count.",
                ),
                &["route", "method", "status"],
            )
            .expect("create portal_gateway_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "portal_gateway_http_request_duration_seconds",
                    "Portal gateway HTTP request duration in seconds.",
                )
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
                &["route", "method", "outcome"],
            )
            .expect("create portal_gateway_http_request_duration_seconds"),
        )
    })
}

fn access_decisions_total() -> &'static IntCounterVec {
    ACCESS_DECISIONS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "portal_gateway_access_decisions_total",
                    "Page access decisions by page and outcome.",
                ),
                &["page", "outcome"],
            )
            .expect("create portal_gateway_access_decisions_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    // Redirects are the normal deny path, not failures.
    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

pub fn observe_access_decision(page: &str, outcome: &str) {
    access_decisions_total()
        .with_label_values(&[page, outcome])
        .inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = http_requests_total();
    let _ = access_decisions_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_observed_decisions() {
        observe_access_decision("investor_statements", "combined");
        observe_http_request("/investor/statements", "GET", 303, Duration::from_millis(3));

        let (body, content_type) = render().expect("metrics render");
        let text = String::from_utf8(body).expect("utf8 exposition");
        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("portal_gateway_access_decisions_total"));
        assert!(text.contains("outcome=\"combined\""));
        assert!(text.contains("portal_gateway_http_request_duration_seconds"));
    }
}
