//! # Prometheus Metrics
//!
//! Exposes operational metrics for the server. Scraped by Prometheus at the
//! `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the server.
///
/// Clone-friendly (prometheus handles are reference-counted) so it can be
/// shared across request handlers.
#[derive(Clone)]
pub struct ServerMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Registration requests received, valid or not.
    pub registrations_requested_total: IntCounter,
    /// Fresh invoices obtained from the gateway.
    pub invoices_issued_total: IntCounter,
    /// Requests answered with a previously issued invoice.
    pub invoices_reused_total: IntCounter,
    /// Registrations finalized by a payment webhook.
    pub payments_confirmed_total: IntCounter,
    /// Webhook calls rejected for an unknown or spent nonce.
    pub webhook_rejections_total: IntCounter,
    /// Documents served, by source (`local` or `remote`).
    pub resolutions_total: IntCounterVec,
    /// Clients currently waiting on a payment stream.
    pub payment_streams_active: IntGauge,
    /// Latency of `/resolve` lookups in seconds.
    pub resolve_latency_seconds: Histogram,
}

impl ServerMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("didsrv".into()), None)?;

        let registrations_requested_total = IntCounter::new(
            "registrations_requested_total",
            "Total number of registration requests received",
        )?;
        registry.register(Box::new(registrations_requested_total.clone()))?;

        let invoices_issued_total = IntCounter::new(
            "invoices_issued_total",
            "Total number of invoices created at the payment gateway",
        )?;
        registry.register(Box::new(invoices_issued_total.clone()))?;

        let invoices_reused_total = IntCounter::new(
            "invoices_reused_total",
            "Total number of registration requests answered with an existing invoice",
        )?;
        registry.register(Box::new(invoices_reused_total.clone()))?;

        let payments_confirmed_total = IntCounter::new(
            "payments_confirmed_total",
            "Total number of registrations finalized after payment",
        )?;
        registry.register(Box::new(payments_confirmed_total.clone()))?;

        let webhook_rejections_total = IntCounter::new(
            "webhook_rejections_total",
            "Total number of payment webhooks rejected for an unknown nonce",
        )?;
        registry.register(Box::new(webhook_rejections_total.clone()))?;

        let resolutions_total = IntCounterVec::new(
            Opts::new("resolutions_total", "Total number of documents served"),
            &["source"],
        )?;
        registry.register(Box::new(resolutions_total.clone()))?;

        let payment_streams_active = IntGauge::new(
            "payment_streams_active",
            "Number of clients currently waiting on a payment stream",
        )?;
        registry.register(Box::new(payment_streams_active.clone()))?;

        let resolve_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "resolve_latency_seconds",
                "Latency of identifier resolution in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0,
            ]),
        )?;
        registry.register(Box::new(resolve_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            registrations_requested_total,
            invoices_issued_total,
            invoices_reused_total,
            payments_confirmed_total,
            webhook_rejections_total,
            resolutions_total,
            payment_streams_active,
            resolve_latency_seconds,
        })
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<ServerMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
