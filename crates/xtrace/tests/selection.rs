// Trace Selection Integration Tests
//
// These tests verify class and instance selection: depth limits, method
// and type filters, property accessors, exclusions, instance priority and
// per-instance options.

mod common;

use xtrace::{Depth, HookKind, InstallOutcome, InstanceOptions, TraceConfig};
use xtrace_runtime::{Frame, Imp, Object};

/// Test that depth limits how far up the chain methods are traced
#[test]
fn test_trace_class_depth() {
    let grand = common::unique_class("DepthGrand");
    let parent = common::unique_subclass("DepthParent", &grand);
    let child = common::unique_subclass("DepthChild", &parent);
    let g = common::add_method(&grand, "grand", "v@:", common::void_imp());
    let p = common::add_method(&parent, "parent", "v@:", common::void_imp());
    let c = common::add_method(&child, "child", "v@:", common::void_imp());
    let (xtrace, _sink) = common::engine(TraceConfig::default());

    assert_eq!(xtrace.trace_class(&child, Depth::Levels(1)), 1);
    assert!(xtrace.is_installed(&child, &c));
    assert!(!xtrace.is_installed(&parent, &p));

    assert_eq!(xtrace.trace_class(&child, Depth::Levels(2)), 2);
    assert!(!xtrace.is_installed(&grand, &g));
    assert_eq!(xtrace.info_for(&parent, &p).unwrap().depth, 1);

    assert_eq!(xtrace.trace_class(&child, Depth::All), 3);
    assert_eq!(xtrace.info_for(&grand, &g).unwrap().depth, 2);
}

/// Test that tracing the same class twice changes nothing
#[test]
fn test_trace_class_idempotent() {
    let class = common::unique_class("TraceTwice");
    common::add_method(&class, "a", "v@:", common::void_imp());
    common::add_method(&class, "b", "v@:", common::void_imp());
    let (xtrace, sink) = common::engine(TraceConfig::default());

    assert_eq!(xtrace.trace_class(&class, Depth::All), 2);
    assert_eq!(xtrace.trace_class(&class, Depth::All), 2);
    assert_eq!(xtrace.installed_count(), 2);

    Object::new(&class)
        .send(&common::sel("a"), &Frame::new())
        .unwrap();
    assert_eq!(sink.lines().len(), 2);
}

/// Test include and exclude method patterns
#[test]
fn test_method_filters() {
    let class = common::unique_class("MethodFilters");
    let set_value = common::add_method(&class, "setValue:", "v@:i", common::void_imp());
    let set_internal =
        common::add_method(&class, "setInternalFlag:", "v@:B", common::void_imp());
    let value = common::add_method(&class, "value", "i@:", common::returning_int(0));
    let config = TraceConfig::default()
        .with_include_methods("^set")
        .unwrap()
        .with_exclude_methods("^setInternal")
        .unwrap();
    let (xtrace, _sink) = common::engine(config);

    assert_eq!(xtrace.trace_class(&class, Depth::All), 1);
    assert!(xtrace.is_installed(&class, &set_value));
    assert!(!xtrace.is_installed(&class, &set_internal));
    assert!(!xtrace.is_installed(&class, &value));
}

/// Test that messages with an excluded argument or return type are skipped
#[test]
fn test_type_filter() {
    let class = common::unique_class("TypeFilter");
    let move_to = common::add_method(&class, "moveTo:", "v@:{Point=dd}", common::void_imp());
    let origin = common::add_method(&class, "origin", "{Point=dd}@:", common::void_imp());
    let name = common::add_method(&class, "name", "*@:", common::void_imp());
    let config = TraceConfig::default().with_exclude_types("Point").unwrap();
    let (xtrace, _sink) = common::engine(config);

    assert_eq!(xtrace.trace_class(&class, Depth::All), 1);
    assert!(!xtrace.is_installed(&class, &move_to));
    assert!(!xtrace.is_installed(&class, &origin));
    assert!(xtrace.is_installed(&class, &name));
}

/// Test that declared property accessors are skipped unless included
#[test]
fn test_property_accessors() {
    let parent = common::unique_class("PropertyParent");
    let child = common::unique_subclass("PropertyChild", &parent);
    parent.add_property("title", false).unwrap();
    let getter = common::add_method(&child, "title", "*@:", common::void_imp());
    let setter = common::add_method(&child, "setTitle:", "v@:*", common::void_imp());
    let render = common::add_method(&child, "render", "v@:", common::void_imp());

    let (xtrace, _sink) = common::engine(TraceConfig::default());
    assert_eq!(xtrace.trace_class(&child, Depth::All), 1);
    assert!(xtrace.is_installed(&child, &render));
    assert!(!xtrace.is_installed(&child, &getter));

    let (xtrace, _sink) = common::engine(TraceConfig::default().with_include_properties(true));
    assert_eq!(xtrace.trace_class(&child, Depth::All), 3);
    assert!(xtrace.is_installed(&child, &setter));
}

/// Test that exclusion wins over class tracing and explicit installs
#[test]
fn test_exclusion_precedence() {
    let parent = common::unique_class("ExcludedParent");
    let child = common::unique_subclass("ExcludedChild", &parent);
    let inherited = common::add_method(&parent, "inherited", "v@:", common::void_imp());
    let own = common::add_method(&child, "own", "v@:", common::void_imp());
    let (xtrace, _sink) = common::engine(TraceConfig::default());

    xtrace.dont_trace(&parent);
    assert!(xtrace.is_excluded(&parent));
    assert_eq!(xtrace.trace_class(&child, Depth::All), 1);
    assert!(xtrace.is_installed(&child, &own));
    assert!(!xtrace.is_installed(&parent, &inherited));

    assert_eq!(
        xtrace.install(&parent, &inherited, None, HookKind::Log).unwrap(),
        InstallOutcome::Excluded
    );
    assert!(!xtrace.is_installed(&parent, &inherited));
}

/// Test that excluding a class leaves its existing records alone
#[test]
fn test_exclusion_keeps_existing_records() {
    let class = common::unique_class("ExcludeLater");
    let sel = common::add_method(&class, "run", "v@:", common::void_imp());
    let (xtrace, sink) = common::engine(TraceConfig::default());

    xtrace.trace_class(&class, Depth::All);
    xtrace.dont_trace(&class);
    assert!(xtrace.is_installed(&class, &sel));

    Object::new(&class).send(&sel, &Frame::new()).unwrap();
    assert_eq!(sink.lines().len(), 2);
}

/// Test that untracing a class restores what only it traced
#[test]
fn test_untrace_class() {
    let class = common::unique_class("Untrace");
    let original = common::void_imp();
    let sel = common::add_method(&class, "run", "v@:", original.clone());
    let (xtrace, sink) = common::engine(TraceConfig::default());

    xtrace.trace_class(&class, Depth::All);
    assert_eq!(xtrace.untrace_class(&class), 1);
    assert_eq!(xtrace.installed_count(), 0);
    assert!(class.method(&sel).unwrap().imp.ptr_eq(&original));

    Object::new(&class).send(&sel, &Frame::new()).unwrap();
    assert!(sink.lines().is_empty());
    assert_eq!(xtrace.untrace_class(&class), 0);
}

/// Test that untracing keeps records that still carry hooks, without logging
#[test]
fn test_untrace_class_keeps_hooked_records() {
    let class = common::unique_class("UntraceHooked");
    let sel = common::add_method(&class, "run", "v@:", common::void_imp());
    let (delegate, _lines) = common::collecting_delegate("UntraceHookedDelegate");
    let hook = common::add_method(&delegate.class(), "beforeRun:", "v@:@", common::void_imp());
    let (xtrace, sink) = common::engine(TraceConfig::default());
    xtrace.set_delegate(&delegate);

    xtrace.trace_class(&class, Depth::All);
    xtrace.hook(&class, &sel, HookKind::Before, &hook).unwrap();
    xtrace.untrace_class(&class);
    xtrace.clear_delegate();

    assert!(xtrace.is_installed(&class, &sel));
    let info = xtrace.info_for(&class, &sel).unwrap();
    assert!(info.has_before);
    assert!(info.owners.is_empty());

    Object::new(&class).send(&sel, &Frame::new()).unwrap();
    assert!(sink.lines().is_empty(), "Hook-only records do not log");
}

/// Test that only traced instances log while instance tracing is active
#[test]
fn test_instance_priority() {
    let class = common::unique_class("InstancePriority");
    let sel = common::add_method(&class, "ping", "i@:", common::returning_int(1));
    let (xtrace, sink) = common::engine(TraceConfig::default());
    xtrace.trace_class(&class, Depth::All);

    let traced = Object::new(&class);
    let other = Object::new(&class);
    xtrace.trace_instance(&traced);
    assert!(xtrace.is_instance_traced(&traced));
    assert!(!xtrace.is_instance_traced(&other));

    common::send_int(&other, &sel);
    assert!(sink.lines().is_empty(), "Untagged receiver must not log");
    common::send_int(&traced, &sel);
    assert_eq!(sink.lines().len(), 2);
    assert!(sink.events().iter().all(|e| e.receiver == traced.id()));

    // Hooks and stats still see every receiver
    assert_eq!(xtrace.info_for(&class, &sel).unwrap().stats.call_count, 2);

    assert!(xtrace.untrace_instance(&traced));
    sink.clear();
    common::send_int(&other, &sel);
    assert_eq!(sink.lines().len(), 2, "Class tracing resumes");
}

/// Test that tracing an instance traces its class until it is untraced
#[test]
fn test_trace_instance_implicit_class() {
    let parent = common::unique_class("ImplicitParent");
    let class = common::unique_subclass("ImplicitChild", &parent);
    let original = common::returning_int(3);
    let sel = common::add_method(&parent, "value", "i@:", original.clone());
    let (xtrace, sink) = common::engine(TraceConfig::default());

    let obj = Object::new(&class);
    xtrace.trace_instance(&obj);
    assert_eq!(xtrace.installed_count(), 1);
    assert_eq!(common::send_int(&obj, &sel), Some(3));
    assert_eq!(sink.lines().len(), 2);

    assert!(xtrace.untrace_instance(&obj));
    assert!(!xtrace.is_instance_traced(&obj));
    assert_eq!(xtrace.installed_count(), 0);
    assert!(parent.method(&sel).unwrap().imp.ptr_eq(&original));
    assert!(!xtrace.untrace_instance(&obj));
}

/// Test that an explicit trace_class survives untracing the instance
#[test]
fn test_explicit_class_outlives_instance() {
    let class = common::unique_class("ExplicitAfterInstance");
    common::add_method(&class, "value", "i@:", common::returning_int(3));
    let (xtrace, _sink) = common::engine(TraceConfig::default());

    let obj = Object::new(&class);
    xtrace.trace_instance(&obj);
    xtrace.trace_class(&class, Depth::All);
    xtrace.untrace_instance(&obj);
    assert_eq!(xtrace.installed_count(), 1);
}

/// Test that dropped traced instances stop gating other receivers
#[test]
fn test_dead_instances_pruned() {
    let class = common::unique_class("DeadInstance");
    let sel = common::add_method(&class, "ping", "i@:", common::returning_int(1));
    let (xtrace, sink) = common::engine(TraceConfig::default());
    xtrace.trace_class(&class, Depth::All);

    let short_lived = Object::new(&class);
    xtrace.trace_instance(&short_lived);
    common::send_int(&Object::new(&class), &sel);
    assert!(sink.take().is_empty(), "Untagged receivers are quiet");

    drop(short_lived);
    common::send_int(&Object::new(&class), &sel);
    assert_eq!(sink.lines().len(), 2, "No live traced instance is left");
}

/// Test that dropping the last traced instance releases its implicit root
#[test]
fn test_dead_instance_releases_implicit_root() {
    let class = common::unique_class("DeadImplicit");
    let sel = common::add_method(&class, "ping", "i@:", common::returning_int(1));
    let (xtrace, sink) = common::engine(TraceConfig::default());

    let obj = Object::new(&class);
    xtrace.trace_instance(&obj);
    assert_eq!(xtrace.installed_count(), 1);

    drop(obj);
    assert_eq!(xtrace.installed_count(), 0);
    assert!(!xtrace.is_installed(&class, &sel));

    assert_eq!(common::send_int(&Object::new(&class), &sel), Some(1));
    assert!(sink.lines().is_empty());
}

/// Test that re-tagging an instance keeps it traced
#[test]
fn test_retrace_instance_keeps_it_traced() {
    let class = common::unique_class("Retrace");
    let sel = common::add_method(&class, "ping", "i@:", common::returning_int(1));
    let (xtrace, sink) = common::engine(TraceConfig::default());

    let obj = Object::new(&class);
    xtrace.trace_instance(&obj);
    xtrace.trace_instance_with(&obj, InstanceOptions::default().with_hide_returns(true));
    assert!(xtrace.is_instance_traced(&obj));
    assert_eq!(xtrace.installed_count(), 1);

    common::send_int(&obj, &sel);
    assert_eq!(sink.lines(), vec![format!("[{} ping]", common::label(&obj))]);

    assert!(xtrace.untrace_instance(&obj));
    assert!(!xtrace.untrace_instance(&obj));
    assert_eq!(xtrace.installed_count(), 0);
}

/// Test per-instance formatting overrides
#[test]
fn test_instance_options() {
    let class = common::unique_class("InstanceOptions");
    let sel = common::add_method(&class, "double:", "i@:i", common::returning_int(0));
    let (xtrace, sink) = common::engine(TraceConfig::default().with_hide_returns(true));

    let verbose = Object::new(&class);
    let quiet = Object::new(&class);
    xtrace.trace_instance_with(
        &verbose,
        InstanceOptions::default()
            .with_show_arguments(true)
            .with_hide_returns(false),
    );
    xtrace.trace_instance(&quiet);

    common::send_int_arg(&verbose, &sel, 4);
    let lines = sink.take();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].line, format!("[{} double:4]", common::label(&verbose)));

    common::send_int_arg(&quiet, &sel, 4);
    let lines = sink.lines();
    assert_eq!(lines, vec![format!("[{} double:]", common::label(&quiet))]);
}

/// Test that objects render through description when asked to
#[test]
fn test_describe_values() {
    let class = common::unique_class("Describe");
    common::add_method(
        &class,
        "description",
        "*@:",
        Imp::new(|_, _, _| Frame::new().with_cstr(Some("a described value"))),
    );
    let sel = common::add_method(&class, "myself", "@@:", Imp::new(|receiver, _, _| {
        Frame::new().with_object(Some(receiver))
    }));
    let (xtrace, sink) = common::engine(TraceConfig::default().with_describe_values(true));
    assert_eq!(xtrace.trace_class(&class, Depth::All), 1);

    let obj = Object::new(&class);
    obj.send(&sel, &Frame::new()).unwrap();
    let lines = sink.lines();
    assert_eq!(lines.len(), 2, "description itself is never traced");
    assert!(lines[1].starts_with("-> a described value ("));
}
