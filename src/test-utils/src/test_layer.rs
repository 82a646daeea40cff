// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, Once, PoisonError};
use tracing::{Event, Level, Subscriber, field, span};
use tracing_subscriber::{Layer, layer::Context, prelude::*, registry::LookupSpan};

const ROOT_SPAN: &str = "test_layer";

/// A tracing event captured by the [TestLayer].
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub target: String,
    /// The formatted message, empty if the event has no message.
    pub message: String,
    /// The event fields, other than the message, as strings.
    pub fields: HashMap<String, String>,
    /// The test ID associated with this event.
    pub test_id: Option<String>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Converts the event fields to strings.
struct TestVisitor<'a> {
    message: &'a mut String,
    fields: &'a mut HashMap<String, String>,
}

impl field::Visit for TestVisitor<'_> {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = format!("{value:?}");
            return;
        }
        self.fields
            .insert(field.name().to_string(), format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &field::Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_u64(&mut self, field: &field::Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_bool(&mut self, field: &field::Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }
}

struct CapturedEventLog {
    events: Mutex<Vec<CapturedEvent>>,
}

impl CapturedEventLog {
    const fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    // A failed assertion in one test must not break the other tests.
    fn lock(&self) -> MutexGuard<'_, Vec<CapturedEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event: CapturedEvent) {
        self.lock().push(event);
    }

    fn take_by_test_id(&self, test_id: &str) -> Vec<CapturedEvent> {
        let mut events = self.lock();
        let (taken, kept): (Vec<_>, Vec<_>) = events
            .drain(..)
            .partition(|e| e.test_id.as_deref() == Some(test_id));
        *events = kept;
        taken
    }

    fn clear_by_test_id(&self, test_id: &str) {
        self.lock()
            .retain(|e| e.test_id.as_deref() != Some(test_id));
    }
}

static EVENT_LOG: CapturedEventLog = CapturedEventLog::new();
static INIT: Once = Once::new();

#[derive(Clone, Debug)]
struct TestId(String);

/// A tracing layer for capturing events within tests.
///
/// The layer is installed as the global subscriber. It associates each event
/// with the test that emitted it via a root span, so tests can run in
/// parallel without seeing each other's events.
///
/// Events emitted from spawned tasks are only captured if the task is
/// instrumented with a span nested in the test's root span.
///
/// # Example
///
/// ```
/// use arm_test_utils::test_layer::TestLayer;
///
/// const TEST_ID: &str = "doc_example";
/// let _guard = TestLayer::initialize(TEST_ID);
/// tracing::info!(answer = 42, "the answer");
///
/// let captured = TestLayer::capture(TEST_ID);
/// assert_eq!(captured.len(), 1);
/// assert_eq!(captured[0].message, "the answer");
/// assert_eq!(captured[0].field("answer"), Some("42"));
/// ```
#[derive(Clone, Default)]
pub struct TestLayer;

impl TestLayer {
    /// Initializes the layer for the current test scope.
    ///
    /// Returns a guard, the layer captures events for `test_id` while the
    /// guard is in scope.
    pub fn initialize(test_id: &'static str) -> tracing::span::EnteredSpan {
        INIT.call_once(|| {
            let subscriber = tracing_subscriber::registry().with(TestLayer);
            if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!("cannot install the test layer: {e}");
            }
        });
        EVENT_LOG.clear_by_test_id(test_id);
        tracing::span!(Level::INFO, ROOT_SPAN, test_id = test_id).entered()
    }

    /// Retrieves, and removes, all the events captured for `test_id`.
    pub fn capture(test_id: &str) -> Vec<CapturedEvent> {
        EVENT_LOG.take_by_test_id(test_id)
    }
}

impl<S> Layer<S> for TestLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        if attrs.metadata().name() != ROOT_SPAN {
            return;
        }
        let mut message = String::new();
        let mut fields = HashMap::new();
        attrs.record(&mut TestVisitor {
            message: &mut message,
            fields: &mut fields,
        });
        if let (Some(span), Some(test_id)) = (ctx.span(id), fields.remove("test_id")) {
            span.extensions_mut().insert(TestId(test_id));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let test_id = ctx.event_scope(event).and_then(|scope| {
            scope
                .from_root()
                .find_map(|s| s.extensions().get::<TestId>().map(|t| t.0.clone()))
        });
        let mut message = String::new();
        let mut fields = HashMap::new();
        event.record(&mut TestVisitor {
            message: &mut message,
            fields: &mut fields,
        });
        EVENT_LOG.push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message,
            fields,
            test_id,
        });
    }
}
