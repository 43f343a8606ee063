// ABOUTME: Metrics initialization and recording helpers for the pipeline
// ABOUTME: Installs the Prometheus recorder and names every series in one place

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global Prometheus recorder and registers descriptions.
/// Call once at startup; the handle renders the scrape payload.
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        "confab_events_received_total",
        "Inbound webhook events by kind"
    );
    describe_counter!(
        "confab_events_deduplicated_total",
        "Message events dropped as redeliveries"
    );
    describe_counter!(
        "confab_special_commands_total",
        "Special commands answered without buffering"
    );
    describe_counter!(
        "confab_bursts_flushed_total",
        "Settled bursts handed to the turn builder"
    );
    describe_histogram!(
        "confab_burst_events",
        "Events per settled burst"
    );
    describe_counter!(
        "confab_dispatches_total",
        "Dispatch attempts by outcome"
    );
    describe_histogram!(
        "confab_backend_duration_seconds",
        "Wall-clock duration of backend invocations"
    );
    describe_counter!(
        "confab_backend_failures_total",
        "Backend invocations that produced no reply, by reason"
    );
    describe_counter!(
        "confab_replies_delivered_total",
        "Successful deliveries by method"
    );
    describe_counter!(
        "confab_delivery_failures_total",
        "Failed delivery attempts by stage"
    );
    describe_counter!(
        "confab_reply_chunks_total",
        "Outbound reply chunks sent"
    );
    describe_gauge!(
        "confab_pending_conversations",
        "Conversations currently collecting a burst"
    );

    Ok(handle)
}

pub fn record_event_received(kind: &'static str) {
    counter!("confab_events_received_total", "kind" => kind).increment(1);
}

pub fn record_event_deduplicated() {
    counter!("confab_events_deduplicated_total").increment(1);
}

pub fn record_special_command(command: &'static str) {
    counter!("confab_special_commands_total", "command" => command).increment(1);
}

pub fn record_burst_flushed(events: usize) {
    counter!("confab_bursts_flushed_total").increment(1);
    histogram!("confab_burst_events").record(events as f64);
}

pub fn record_dispatch(outcome: &'static str) {
    counter!("confab_dispatches_total", "outcome" => outcome).increment(1);
}

pub fn record_backend_duration(seconds: f64) {
    histogram!("confab_backend_duration_seconds").record(seconds);
}

pub fn record_backend_failure(reason: &'static str) {
    counter!("confab_backend_failures_total", "reason" => reason).increment(1);
}

pub fn record_delivery(method: &'static str) {
    counter!("confab_replies_delivered_total", "method" => method).increment(1);
}

pub fn record_delivery_failure(stage: &'static str) {
    counter!("confab_delivery_failures_total", "stage" => stage).increment(1);
}

pub fn record_reply_chunks(count: usize) {
    counter!("confab_reply_chunks_total").increment(count as u64);
}

pub fn set_pending_conversations(count: usize) {
    gauge!("confab_pending_conversations").set(count as f64);
}
