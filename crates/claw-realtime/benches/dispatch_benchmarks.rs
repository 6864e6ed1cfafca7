//! Benchmarks for claw-realtime.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use claw_realtime::{
    BroadcastBus, EventDispatcher, Frame, ReconnectPolicy, SessionEventKind, SessionUpdateEvent,
};

fn benchmark_decode_frame(c: &mut Criterion) {
    let text = json!({
        "event": "session_update",
        "data": {"type": "Delta", "sessionId": "s-1", "text": "hello world"}
    })
    .to_string();

    c.bench_function("decode_session_frame", |b| {
        b.iter(|| {
            let _ = Frame::from_json(black_box(&text));
        });
    });
}

fn benchmark_dispatch_no_subscribers(c: &mut Criterion) {
    let dispatcher = EventDispatcher::new(Arc::new(BroadcastBus::new()));
    let event = SessionUpdateEvent::new(SessionEventKind::Delta, "s-1").with_field("text", "hi");

    c.bench_function("dispatch_no_subscribers", |b| {
        b.iter(|| {
            let _ = dispatcher.dispatch(black_box(event.clone()));
        });
    });
}

fn benchmark_dispatch_with_subscriber(c: &mut Criterion) {
    let bus = Arc::new(BroadcastBus::new());
    let mut subscription = bus.on(SessionEventKind::ToolCall.channel());
    let dispatcher = EventDispatcher::new(bus);
    let value = json!({"type": "ToolCall", "sessionId": "s-1", "name": "search"});

    c.bench_function("dispatch_value_with_subscriber", |b| {
        b.iter(|| {
            let _ = dispatcher.dispatch_value(black_box(value.clone()));
            let _ = subscription.try_recv();
        });
    });
}

fn benchmark_backoff(c: &mut Criterion) {
    let policy = ReconnectPolicy::default();

    c.bench_function("reconnect_delay_for", |b| {
        b.iter(|| {
            for attempt in 1..=10 {
                let _ = policy.delay_for(black_box(attempt));
            }
        });
    });
}

criterion_group!(
    benches,
    benchmark_decode_frame,
    benchmark_dispatch_no_subscribers,
    benchmark_dispatch_with_subscriber,
    benchmark_backoff,
);
criterion_main!(benches);
