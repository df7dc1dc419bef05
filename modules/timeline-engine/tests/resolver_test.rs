//! Integration tests for module resolution and construction.

use std::cell::Cell;
use std::rc::Rc;

use timeline_engine::{
    Construct, Dep, Dependencies, Module, ModuleDescriptor, ModuleInfo, ModuleResolver,
    ResolveError, RunContext, Runtime,
};
use timeline_events::Event;

thread_local! {
    static BUILT: Cell<usize> = const { Cell::new(0) };
}

fn built() -> usize {
    BUILT.with(Cell::get)
}

fn mark_built() {
    BUILT.with(|b| b.set(b.get() + 1));
}

// ---------------------------------------------------------------------------
// Alias scenario: basic, renamed_target, dependent
// ---------------------------------------------------------------------------

struct Basic;

impl ModuleInfo for Basic {
    const HANDLE: &'static str = "basic";
}

impl Module<Event> for Basic {
    fn build(_ctx: &Construct<'_, Self, Event>) -> Self {
        mark_built();
        Basic
    }
}

struct RenamedTarget {
    label: &'static str,
}

impl ModuleInfo for RenamedTarget {
    const HANDLE: &'static str = "renamed_target";
}

impl Module<Event> for RenamedTarget {
    fn build(_ctx: &Construct<'_, Self, Event>) -> Self {
        mark_built();
        RenamedTarget { label: "target" }
    }
}

struct Dependent {
    basic: Option<Dep<Basic>>,
    renamed: Option<Dep<RenamedTarget>>,
}

impl ModuleInfo for Dependent {
    const HANDLE: &'static str = "dependent";

    fn dependencies() -> Dependencies {
        Dependencies::new()
            .named("basic")
            .aliased("renamed_target", "renamed")
    }
}

impl Module<Event> for Dependent {
    fn build(ctx: &Construct<'_, Self, Event>) -> Self {
        mark_built();
        Dependent {
            basic: ctx.dependency("basic"),
            renamed: ctx.dependency("renamed"),
        }
    }
}

/// Fresh runtime with the build counter zeroed, so counts only cover the
/// current test whichever thread it lands on.
fn runtime() -> Runtime<Event> {
    BUILT.with(|b| b.set(0));
    Runtime::new(RunContext::default())
}

#[test]
fn aliased_dependency_is_the_constructed_instance() {
    let runtime = runtime();
    let resolved = ModuleResolver::build(
        vec![
            ModuleDescriptor::of::<Dependent>(),
            ModuleDescriptor::of::<Basic>(),
            ModuleDescriptor::of::<RenamedTarget>(),
        ],
        &runtime,
    )
    .unwrap();

    let position = |h: &str| resolved.order.iter().position(|o| o == h).unwrap();
    assert!(position("renamed_target") < position("dependent"));
    assert!(position("basic") < position("dependent"));

    let dependent = resolved.container.get::<Dependent>("dependent").unwrap();
    let target = resolved.container.get::<RenamedTarget>("renamed_target").unwrap();
    let basic = resolved.container.get::<Basic>("basic").unwrap();

    let dependent = dependent.borrow();
    let renamed = dependent.renamed.as_ref().unwrap();
    assert!(Rc::ptr_eq(renamed, &target));
    assert!(Rc::ptr_eq(dependent.basic.as_ref().unwrap(), &basic));
    assert_eq!(renamed.borrow().label, "target");
}

#[test]
fn container_lookup_checks_the_type() {
    let runtime = runtime();
    let resolved = ModuleResolver::build(vec![ModuleDescriptor::of::<Basic>()], &runtime).unwrap();

    assert!(resolved.container.get::<Basic>("basic").is_some());
    assert!(resolved.container.get::<RenamedTarget>("basic").is_none());
    assert!(resolved.container.get::<Basic>("missing").is_none());
}

#[test]
fn every_module_registers_an_init_hook() {
    let runtime = runtime();
    ModuleResolver::build(
        vec![ModuleDescriptor::of::<Basic>(), ModuleDescriptor::of::<RenamedTarget>()],
        &runtime,
    )
    .unwrap();

    assert_eq!(runtime.dispatcher().event_hook_count("basic"), 1);
    assert_eq!(runtime.dispatcher().event_hook_count("renamed_target"), 1);
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

macro_rules! chain_module {
    ($name:ident, $handle:literal $(, $dep:literal)*) => {
        struct $name;

        impl ModuleInfo for $name {
            const HANDLE: &'static str = $handle;

            fn dependencies() -> Dependencies {
                Dependencies::new()$(.named($dep))*
            }
        }

        impl Module<Event> for $name {
            fn build(_ctx: &Construct<'_, Self, Event>) -> Self {
                mark_built();
                $name
            }
        }
    };
}

chain_module!(Top, "top", "mid", "leaf");
chain_module!(Mid, "mid", "bottom");
chain_module!(Bottom, "bottom");
chain_module!(Leaf, "leaf");

chain_module!(CycleA, "a", "b");
chain_module!(CycleB, "b", "c");
chain_module!(CycleC, "c", "a");
chain_module!(Outside, "outside");

chain_module!(Orphan, "orphan", "nobody");

#[test]
fn dependencies_are_constructed_first() {
    let runtime = runtime();
    let descriptors = vec![
        ModuleDescriptor::of::<Top>(),
        ModuleDescriptor::of::<Mid>(),
        ModuleDescriptor::of::<Bottom>(),
        ModuleDescriptor::of::<Leaf>(),
    ];
    let resolved = ModuleResolver::build(descriptors.clone(), &runtime).unwrap();

    for descriptor in &descriptors {
        let me = resolved.order.iter().position(|h| h == descriptor.handle()).unwrap();
        for entry in descriptor.dependencies().resolve(descriptor.handle()).unwrap() {
            let dep = resolved.order.iter().position(|h| *h == entry.handle).unwrap();
            assert!(dep < me, "{} must come after {}", descriptor.handle(), entry.handle);
        }
    }

    // Ties keep declaration order.
    assert_eq!(resolved.order, vec!["bottom", "leaf", "mid", "top"]);
    assert_eq!(built(), 4);
}

#[test]
fn build_count_covers_only_the_latest_run() {
    let first = runtime();
    ModuleResolver::build(vec![ModuleDescriptor::of::<Basic>()], &first).unwrap();
    assert_eq!(built(), 1);

    let second = runtime();
    let err = ModuleResolver::build(vec![ModuleDescriptor::of::<Orphan>()], &second);
    assert!(err.is_err());
    assert_eq!(built(), 0);
}

#[test]
fn cycle_fails_before_anything_is_built() {
    let runtime = runtime();
    let err = ModuleResolver::build(
        vec![
            ModuleDescriptor::of::<Outside>(),
            ModuleDescriptor::of::<CycleA>(),
            ModuleDescriptor::of::<CycleB>(),
            ModuleDescriptor::of::<CycleC>(),
        ],
        &runtime,
    )
    .err()
    .unwrap();

    match err {
        ResolveError::Cycle { involved } => {
            assert_eq!(involved, vec!["a", "b", "c"]);
        }
        other => panic!("expected cycle, got {other}"),
    }
    assert_eq!(built(), 0);
    assert_eq!(runtime.dispatcher().event_hook_count("outside"), 0);
}

#[test]
fn unknown_dependency_is_fatal() {
    let runtime = runtime();
    let err = ModuleResolver::build(vec![ModuleDescriptor::of::<Orphan>()], &runtime)
        .err()
        .unwrap();

    assert!(matches!(
        err,
        ResolveError::UnknownDependency { ref module, ref dependency }
            if module == "orphan" && dependency == "nobody"
    ));
    assert_eq!(built(), 0);
}

#[test]
fn duplicate_handles_are_rejected() {
    let runtime = runtime();
    let err = ModuleResolver::build(
        vec![ModuleDescriptor::of::<Basic>(), ModuleDescriptor::of::<Basic>()],
        &runtime,
    )
    .err()
    .unwrap();

    assert!(matches!(err, ResolveError::DuplicateHandle(ref h) if h == "basic"));
    assert_eq!(built(), 0);
}
