#![cfg(feature = "tracing-compat")]

use std::sync::{Arc, Mutex};

use debug_allocator::{CallSite, Tracker};
use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_subscriber::{layer::Context, layer::SubscriberExt, Layer, Registry};

#[derive(Clone, Debug)]
struct Captured {
    level: Level,
    message: String,
    kind: Option<String>,
}

#[derive(Clone, Default)]
struct CaptureLayer {
    events: Arc<Mutex<Vec<Captured>>>,
}

impl CaptureLayer {
    fn events(&self) -> Vec<Captured> {
        self.events.lock().expect("capture lock poisoned").clone()
    }
}

struct Fields {
    message: String,
    kind: Option<String>,
}

impl Visit for Fields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "kind" {
            self.kind = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = Fields {
            message: String::new(),
            kind: None,
        };
        event.record(&mut fields);
        self.events
            .lock()
            .expect("capture lock poisoned")
            .push(Captured {
                level: *event.metadata().level(),
                message: fields.message,
                kind: fields.kind,
            });
    }
}

fn capture<F: FnOnce()>(f: F) -> Vec<Captured> {
    let layer = CaptureLayer::default();
    let subscriber = Registry::default().with(layer.clone());
    tracing::subscriber::with_default(subscriber, f);
    layer.events()
}

#[test]
fn tracked_operations_emit_trace_events() {
    let tracker = Tracker::system();
    let events = capture(|| {
        let block = tracker.allocate_at(8, CallSite::new("src/traced.rs", 3));
        let block = tracker.reallocate(block, 16);
        tracker.free(block);
        tracker.reset();
    });

    let messages = events
        .iter()
        .filter(|event| event.level == Level::TRACE)
        .map(|event| event.message.as_str())
        .collect::<Vec<_>>();
    // Reallocation frees the old block before announcing itself.
    assert_eq!(
        messages,
        vec!["allocated", "freed", "reallocated", "freed", "ledger reset"]
    );
}

#[test]
fn overrun_on_free_emits_an_error_event() {
    let tracker = Tracker::system();
    let events = capture(|| {
        let block = tracker.allocate_at(4, CallSite::new("src/overrun.rs", 9));
        unsafe { *block.add(4) = 0 };
        tracker.free(block);
    });

    let errors = events
        .iter()
        .filter(|event| event.level == Level::ERROR)
        .collect::<Vec<_>>();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind.as_deref(), Some("overflow"));
    assert!(errors[0]
        .message
        .starts_with("overshoot at line 9 in file src/overrun.rs"));
}

#[test]
fn untracked_sites_are_only_traced() {
    let tracker = Tracker::system();
    let events = capture(|| {
        for line in 0..debug_allocator::SITE_CAPACITY as u32 {
            tracker.allocate_at(1, CallSite::new("src/fanout.rs", line));
        }
        tracker.allocate_at(1, CallSite::new("src/overflow.rs", 1));
    });

    assert!(events.iter().all(|event| event.level != Level::ERROR));
    assert!(events
        .iter()
        .any(|event| event.message.starts_with("site capacity reached")));
}
