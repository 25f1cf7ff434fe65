use domain::{EffectiveTopic, InboundMessage, Number};

#[test]
fn effective_topic_formats_sub_value() {
    let topic = EffectiveTopic::with_sub("dt/myapp/room/esp32/temperature", "indoor");
    assert_eq!(topic.to_string(), "dt/myapp/room/esp32/temperature:indoor");
    assert_eq!(topic.sub(), Some("indoor"));
    assert_eq!(topic.to_base(), EffectiveTopic::new("dt/myapp/room/esp32/temperature"));
}

#[test]
fn effective_topic_keeps_colon_in_base() {
    let plain = EffectiveTopic::new("a/b:c");
    let sub = EffectiveTopic::with_sub("a/b", "c");
    assert_eq!(plain.to_string(), sub.to_string());
    assert_ne!(plain, sub);
}

#[test]
fn received_at_truncates_to_seconds() {
    let message = InboundMessage::new("a", "1", 1_700_000_000_999);
    assert_eq!(message.received_at_secs(), 1_700_000_000);
}

#[test]
fn number_display() {
    assert_eq!(Number::Int(25).to_string(), "25");
    assert_eq!(Number::Float(25.5).to_string(), "25.5");
    assert_eq!(Number::Int(3).as_f64(), 3.0);
}
