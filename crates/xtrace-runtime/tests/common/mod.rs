// Common test utilities for integration tests
//
// This module provides shared helper functions and test fixtures
// for use across all integration tests.

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use xtrace_runtime::{Class, Frame, Imp, Method, Selector};

static CLASS_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Routes runtime log output through the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a root class with a unique name derived from `prefix`
pub fn unique_class(prefix: &str) -> Class {
    init_logging();
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
