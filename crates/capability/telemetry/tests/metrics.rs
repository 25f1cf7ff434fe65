use bridge_telemetry::{
    TelemetryMetrics, level_directive, metrics, record_flush_latency_ms,
    record_message_received, record_reading_emitted,
};

#[test]
fn level_names_map_to_filter_directives() {
    assert_eq!(level_directive("WARNING"), "warn");
    assert_eq!(level_directive("critical"), "error");
    assert_eq!(level_directive(" Debug "), "debug");
    assert_eq!(level_directive("INFO"), "info");
    assert_eq!(level_directive("verbose"), "info");
}

#[test]
fn fresh_metrics_start_at_zero() {
    let snapshot = TelemetryMetrics::new().snapshot();
    assert_eq!(snapshot, Default::default());
}

#[test]
fn global_counters_only_grow() {
    let before = metrics().snapshot();
    record_message_received();
    record_reading_emitted();
    record_reading_emitted();
    record_flush_latency_ms(12);
    let after = metrics().snapshot();

    assert!(after.messages_received >= before.messages_received + 1);
    assert!(after.readings_emitted >= before.readings_emitted + 2);
    assert!(after.flush_latency_ms_total >= before.flush_latency_ms_total + 12);
    assert!(after.flush_latency_ms_count >= before.flush_latency_ms_count + 1);
}
