#![forbid(unsafe_code)]

//! Log capture tests for the mounting pipeline.
//!
//! Mutations run on the UI lane's runner thread, so the capture layer is
//! installed as the global subscriber. This binary therefore holds a single
//! test.
//!
//! # Running Tests
//!
//! ```sh
//! cargo test -p ftui-mount --test tracing_tests
//! ```
//!
//! # Invariants
//!
//! 1. **Skips are visible**: every skipped mutation emits one WARN event
//! 2. **Span nesting**: skip warnings are recorded inside `mount_transaction`
//! 3. **Teardown summary**: teardown emits one INFO event with the destroy count

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ftui_mount::{MemoryHost, MountSession, Mutation, MutationBatch, NodeDescriptor};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;

// ============================================================================
// Test Infrastructure
// ============================================================================

/// A captured event with its fields and enclosing span.
#[derive(Debug, Clone)]
struct CapturedEvent {
    level: Level,
    message: String,
    fields: HashMap<String, String>,
    span: Option<String>,
}

struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

struct FieldVisitor(Vec<(String, String)>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.push((field.name().to_string(), format!("{value:?}")));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.push((field.name().to_string(), value.to_string()));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.push((field.name().to_string(), value.to_string()));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
}

impl<S> tracing_subscriber::Layer<S> for EventCapture
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor(Vec::new());
        event.record(&mut visitor);
        let mut fields: HashMap<String, String> = visitor.0.into_iter().collect();
        let message = fields.remove("message").unwrap_or_default();
        let span = ctx.event_span(event).map(|span| span.name().to_string());
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message,
            fields,
            span,
        });
    }
}

fn install_capture() -> Arc<Mutex<Vec<CapturedEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let layer = EventCapture {
        events: events.clone(),
    };
    let subscriber = tracing_subscriber::registry().with(layer);
    tracing::subscriber::set_global_default(subscriber).unwrap();
    events
}

fn with_message(events: &[CapturedEvent], message: &str) -> Vec<CapturedEvent> {
    events
        .iter()
        .filter(|e| e.message == message)
        .cloned()
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn pipeline_logs_skips_inside_transaction_and_teardown_summary() {
    let events = install_capture();

    let host = Arc::new(MemoryHost::new());
    let session = MountSession::new(host.clone()).unwrap();

    let batch = MutationBatch::new(3)
        .with(Mutation::create(NodeDescriptor::new(1, "View")))
        .with(Mutation::update(NodeDescriptor::new(42, "Text")))
        .with(Mutation::insert(1, NodeDescriptor::new(99, "Text"), 0))
        .with(Mutation::create(NodeDescriptor::new(2, "Text")));
    session.deliver_mutation_batch(batch).unwrap();
    session.flush().unwrap();

    let destroyed = session.teardown().unwrap();
    assert_eq!(destroyed, 2);

    let captured = events.lock().unwrap().clone();

    // 1. One WARN per skipped mutation, carrying its index and tag.
    let skipped = with_message(&captured, "mutation skipped");
    assert_eq!(skipped.len(), 2, "captured: {captured:#?}");
    assert!(skipped.iter().all(|e| e.level == Level::WARN));
    assert_eq!(skipped[0].fields.get("index").map(String::as_str), Some("1"));
    assert_eq!(skipped[0].fields.get("tag").map(String::as_str), Some("#42"));
    assert_eq!(skipped[1].fields.get("index").map(String::as_str), Some("2"));
    assert_eq!(skipped[1].fields.get("tag").map(String::as_str), Some("#99"));

    // 2. Both were emitted while the transaction span was entered.
    assert!(
        skipped
            .iter()
            .all(|e| e.span.as_deref() == Some("mount_transaction"))
    );

    // 3. Teardown reports what it destroyed.
    let teardown = with_message(&captured, "mount session torn down");
    assert_eq!(teardown.len(), 1);
    assert_eq!(teardown[0].level, Level::INFO);
    assert_eq!(
        teardown[0].fields.get("destroyed").map(String::as_str),
        Some("2")
    );
}
