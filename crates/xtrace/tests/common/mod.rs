// Common test utilities for integration tests
//
// Classes get unique names so tests can run in parallel against the
// process-wide class registry, and every engine writes to its own
// MemorySink.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use xtrace::{MemorySink, TraceConfig, Xtrace};
use xtrace_runtime::{Class, Frame, Imp, Method, Object, Selector};

static CLASS_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Creates a root class with a unique name derived from `prefix`
pub fn unique_class(prefix: &str) -> Class {
    let n = CLASS_COUNTER.fetch_add(1, Ordering::Relaxed);
    Class::new_root(&format!("{prefix}{n}")).expect("Failed to create test class")
}

/// Creates a subclass with a unique name derived from `prefix`
pub fn unique_subclass(prefix: &str, parent: &Class) -> Class {
    let n = CLASS_COUNTER.fetch_add(1, Ordering::Relaxed);
    Class::new(&format!("{prefix}{n}"), parent).expect("Failed to create test subclass")
}

/// Creates a test selector from a string
pub fn sel(name: &str) -> Selector {
    Selector::from_str(name).expect("Failed to create test selector")
}

/// Adds a method and returns its selector
pub fn add_method(class: &Class, name: &str, types: &str, imp: Imp) -> Selector {
    let selector = sel(name);
    class
        .add_method(Method::new(selector, types, imp).expect("Invalid test encoding"))
        .expect("Failed to add test method");
    selector
}

/// Implementation that returns a fixed int
pub fn returning_int(value: i32) -> Imp {
    Imp::new(move |_, _, _| Frame::returning(value))
}

/// Implementation that returns nothing
pub fn void_imp() -> Imp {
    Imp::new(|_, _, _| Frame::new())
}

/// Implementation that returns its int argument doubled and counts calls
pub fn counting_doubler(calls: Arc<AtomicUsize>) -> Imp {
    Imp::new(move |_, _, args| {
        calls.fetch_add(1, Ordering::SeqCst);
        Frame::returning(args.read::<i32>(0).unwrap_or_default() * 2)
    })
}

/// Engine writing to a fresh in-memory sink
pub fn engine(config: TraceConfig) -> (Xtrace, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (Xtrace::with_sink(config, sink.clone()), sink)
}

/// Sends `selector` with no arguments and reads an int result
pub fn send_int(obj: &Object, selector: &Selector) -> Option<i32> {
    obj.send(selector, &Frame::new()).expect("Send failed").read::<i32>(0)
}

/// Sends `selector` with one int argument and reads an int result
pub fn send_int_arg(obj: &Object, selector: &Selector, arg: i32) -> Option<i32> {
    obj.send(selector, &Frame::new().with(arg))
        .expect("Send failed")
        .read::<i32>(0)
}

/// `<Class#id>` label the tracer prints for `obj`
pub fn label(obj: &Object) -> String {
    format!("<{}#{}>", obj.class().name(), obj.id())
}

/// Delegate class whose `xtrace:forInstance:` collects every line it gets
pub fn collecting_delegate(prefix: &str) -> (Object, Arc<Mutex<Vec<String>>>) {
    let class = unique_class(prefix);
    let lines = Arc::new(Mutex::new(Vec::new()));
    let collected = Arc::clone(&lines);
    add_method(
        &class,
        "xtrace:forInstance:",
        "v@:*@",
        Imp::new(move |_, _, frame| {
            if let Some(line) = frame.read_cstr(0) {
                collected.lock().push(line.to_string());
            }
            Frame::new()
        }),
    );
    (Object::new(&class), lines)
}
