use std::sync::{Arc, Mutex, OnceLock};

use kiln_di::{
    arg, BuildError, ConfigError, ConstructorSpec, DirectStrategy, Instance, Kernel, Lifetime,
    MemberSpec, ObjectDescription, ObserverChange, OverrideParameters, ParameterSpec,
    RecipeStrategy, Registration, RegistrationRequest, ResolveError, TypeRecipe,
};

#[derive(Debug)]
struct Db {
    tag: i32,
}

#[derive(Debug)]
struct Cache {
    db: Arc<Db>,
}

struct Service {
    db: Arc<Db>,
    cache: Arc<Cache>,
}

fn db_strategy(tag: i32) -> DirectStrategy {
    DirectStrategy::infallible(move |_| Db { tag })
}

fn cache_strategy() -> RecipeStrategy {
    RecipeStrategy::new(
        TypeRecipe::of::<Cache>().constructor(ConstructorSpec::new(
            vec![ParameterSpec::of::<Db>("db")],
            |args| {
                Ok(Instance::new(Cache {
                    db: arg::<Db>(args, 0)?,
                }))
            },
        )),
    )
}

fn service_strategy() -> RecipeStrategy {
    RecipeStrategy::new(
        TypeRecipe::of::<Service>().constructor(ConstructorSpec::new(
            vec![
                ParameterSpec::of::<Db>("db"),
                ParameterSpec::of::<Cache>("cache"),
            ],
            |args| {
                Ok(Instance::new(Service {
                    db: arg::<Db>(args, 0)?,
                    cache: arg::<Cache>(args, 1)?,
                }))
            },
        )),
    )
}

fn register_stack(kernel: &Kernel) -> Registration {
    let db = kernel.register(
        ObjectDescription::of::<Db>(),
        db_strategy(1),
        Lifetime::Transient,
    );
    kernel.register(
        ObjectDescription::of::<Cache>(),
        cache_strategy(),
        Lifetime::Transient,
    );
    kernel.register(
        ObjectDescription::of::<Service>(),
        service_strategy(),
        Lifetime::Transient,
    );
    db
}

#[test]
fn acyclic_graph_builds_one_instance_per_description() {
    let kernel = Kernel::new();
    register_stack(&kernel);

    // Db is reachable twice (directly and through Cache) but is built once
    let service = kernel.resolve::<Service>().unwrap();
    assert!(Arc::ptr_eq(&service.db, &service.cache.db));

    // Transient: a second resolution is a fresh graph
    let second = kernel.resolve::<Service>().unwrap();
    assert!(!Arc::ptr_eq(&service.db, &second.db));
    assert!(Arc::ptr_eq(&second.db, &second.cache.db));
}

#[derive(Debug)]
struct Tick {
    _tock: Arc<Tock>,
}
#[derive(Debug)]
struct Tock {
    _tick: Arc<Tick>,
}

#[test]
fn constructor_cycle_is_reported_with_its_chain() {
    let kernel = Kernel::new();
    kernel.register_batch(vec![
        RegistrationRequest::new(
            ObjectDescription::of::<Tick>(),
            RecipeStrategy::new(TypeRecipe::of::<Tick>().constructor(ConstructorSpec::new(
                vec![ParameterSpec::of::<Tock>("tock")],
                |args| {
                    Ok(Instance::new(Tick {
                        _tock: arg::<Tock>(args, 0)?,
                    }))
                },
            ))),
            Lifetime::Transient,
        ),
        RegistrationRequest::new(
            ObjectDescription::of::<Tock>(),
            RecipeStrategy::new(TypeRecipe::of::<Tock>().constructor(ConstructorSpec::new(
                vec![ParameterSpec::of::<Tick>("tick")],
                |args| {
                    Ok(Instance::new(Tock {
                        _tick: arg::<Tick>(args, 0)?,
                    }))
                },
            ))),
            Lifetime::Transient,
        ),
    ]);

    let error = kernel.resolve::<Tick>().unwrap_err();
    match error {
        ResolveError::Build(BuildError::Cyclic { chain }) => {
            assert!(chain.len() >= 3);
            assert_eq!(chain.first(), chain.last());
        }
        other => panic!("expected a cycle error, got: {other}"),
    }
}

struct Ping {
    pong: Arc<Pong>,
}
struct Pong {
    ping: OnceLock<Arc<Ping>>,
}

#[test]
fn property_back_reference_closes_the_loop() {
    let kernel = Kernel::new();
    kernel.register_batch(vec![
        RegistrationRequest::new(
            ObjectDescription::of::<Ping>(),
            RecipeStrategy::new(TypeRecipe::of::<Ping>().constructor(ConstructorSpec::new(
                vec![ParameterSpec::of::<Pong>("pong")],
                |args| {
                    Ok(Instance::new(Ping {
                        pong: arg::<Pong>(args, 0)?,
                    }))
                },
            ))),
            Lifetime::Transient,
        ),
        RegistrationRequest::new(
            ObjectDescription::of::<Pong>(),
            RecipeStrategy::new(
                TypeRecipe::of::<Pong>()
                    .constructor(ConstructorSpec::new(vec![], |_| {
                        Ok(Instance::new(Pong {
                            ping: OnceLock::new(),
                        }))
                    }))
                    .member(MemberSpec::property::<Pong, Ping>("ping", |owner, value| {
                        let _ = owner.ping.set(value);
                    })),
            ),
            Lifetime::Transient,
        ),
    ]);

    let ping = kernel.resolve::<Ping>().unwrap();
    let back = ping.pong.ping.get().expect("member was injected");
    assert!(Arc::ptr_eq(back, &ping));
}

#[test]
fn ranked_candidates_resolve_in_ascending_order() {
    let kernel = Kernel::new();
    for ranking in [5, 1, 3] {
        kernel.register(
            ObjectDescription::of::<Db>().with_ranking(ranking),
            db_strategy(ranking),
            Lifetime::Transient,
        );
    }

    let tags: Vec<i32> = kernel
        .resolve_all::<Db>()
        .unwrap()
        .iter()
        .map(|db| db.tag)
        .collect();
    assert_eq!(tags, vec![1, 3, 5]);

    let error = kernel.resolve::<Db>().unwrap_err();
    assert!(matches!(error, ResolveError::Ambiguous { count: 3, .. }));
}

#[test]
fn unregistering_a_dependency_deactivates_and_reactivates_dependents() {
    let kernel = Kernel::new();
    let db = kernel.register(
        ObjectDescription::of::<Db>(),
        db_strategy(1),
        Lifetime::Transient,
    );
    kernel.register(
        ObjectDescription::of::<Cache>(),
        cache_strategy(),
        Lifetime::Transient,
    );
    assert!(kernel.resolve::<Cache>().is_ok());

    kernel.unregister(db);
    let error = kernel.resolve::<Cache>().unwrap_err();
    assert!(matches!(error, ResolveError::NotFound(_)));

    // A compatible replacement wakes the dormant dependent
    kernel.register(
        ObjectDescription::of::<Db>(),
        db_strategy(2),
        Lifetime::Transient,
    );
    let cache = kernel.resolve::<Cache>().unwrap();
    assert_eq!(cache.db.tag, 2);
}

#[test]
fn scoped_instances_are_isolated_between_sibling_scopes() {
    let kernel = Kernel::new();
    kernel.register(
        ObjectDescription::of::<Db>(),
        db_strategy(1),
        Lifetime::Scoped,
    );

    let first = kernel.begin_scope();
    let a = first.resolve::<Db>().unwrap();
    let b = first.resolve::<Db>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let second = kernel.begin_scope();
    let c = second.resolve::<Db>().unwrap();
    assert!(!Arc::ptr_eq(&a, &c));

    first.dispose();
    let d = second.resolve::<Db>().unwrap();
    assert!(Arc::ptr_eq(&c, &d));
}

#[test]
fn named_override_beats_the_autowired_candidate() {
    let kernel = Kernel::new();
    register_stack(&kernel);

    let cache = kernel
        .resolve_with::<Cache>(&OverrideParameters::one_named("db", Db { tag: 42 }))
        .unwrap();
    assert_eq!(cache.db.tag, 42);

    // Without the override the registered candidate wins
    let cache = kernel.resolve::<Cache>().unwrap();
    assert_eq!(cache.db.tag, 1);
}

#[test]
fn surplus_positional_overrides_are_rejected() {
    let kernel = Kernel::new();
    register_stack(&kernel);

    let overrides = OverrideParameters::positional([
        Instance::new(Db { tag: 1 }),
        Instance::new(Db { tag: 2 }),
    ]);
    let error = kernel.resolve_with::<Cache>(&overrides).unwrap_err();
    assert!(matches!(
        error,
        ResolveError::Build(BuildError::Configuration(ConfigError::ParameterCount {
            supplied: 2,
            declared: 1,
        }))
    ));
}

struct Theme;
struct Widget {
    theme: OnceLock<Arc<Theme>>,
}

#[test]
fn optional_member_tolerates_an_empty_catalog() {
    let kernel = Kernel::new();
    kernel.register(
        ObjectDescription::of::<Widget>(),
        RecipeStrategy::new(
            TypeRecipe::of::<Widget>()
                .constructor(ConstructorSpec::new(vec![], |_| {
                    Ok(Instance::new(Widget {
                        theme: OnceLock::new(),
                    }))
                }))
                .member(
                    MemberSpec::property::<Widget, Theme>("theme", |owner, value| {
                        let _ = owner.theme.set(value);
                    })
                    .optional(),
                ),
        ),
        Lifetime::Transient,
    );

    let widget = kernel.resolve::<Widget>().unwrap();
    assert!(widget.theme.get().is_none());

    kernel.register(
        ObjectDescription::of::<Theme>(),
        DirectStrategy::infallible(|_| Theme),
        Lifetime::Transient,
    );
    let widget = kernel.resolve::<Widget>().unwrap();
    assert!(widget.theme.get().is_some());
}

#[test]
fn observers_see_added_and_removed_candidates() {
    let kernel = Kernel::new();
    let changes = Arc::new(Mutex::new(Vec::new()));

    let sink = changes.clone();
    let handle = kernel.observe::<Db>(move |event| {
        sink.lock().unwrap().push(event.change);
    });
    assert!(handle.current().is_empty());

    let low = kernel.register(
        ObjectDescription::of::<Db>().with_ranking(5),
        db_strategy(5),
        Lifetime::Transient,
    );
    kernel.register(
        ObjectDescription::of::<Db>().with_ranking(1),
        db_strategy(1),
        Lifetime::Transient,
    );
    assert_eq!(handle.current().len(), 2);

    kernel.unregister(low);
    assert_eq!(handle.current().len(), 1);

    let seen = changes.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            ObserverChange::Added { position: 0 },
            // Lower ranking sorts ahead of the existing candidate
            ObserverChange::Added { position: 0 },
            ObserverChange::Removed { position: 1 },
        ]
    );
}

#[test]
fn late_registered_candidate_keeps_the_cascade_reachable() {
    let kernel = Kernel::new();
    let first = kernel.register(
        ObjectDescription::of::<Db>().with_ranking(1),
        db_strategy(1),
        Lifetime::Transient,
    );
    kernel.register(
        ObjectDescription::of::<Cache>(),
        cache_strategy(),
        Lifetime::Transient,
    );
    // Arrives after Cache is already active
    let second = kernel.register(
        ObjectDescription::of::<Db>().with_ranking(2),
        db_strategy(2),
        Lifetime::Transient,
    );

    // The surviving candidate keeps Cache alive, recompiled against it
    kernel.unregister(first);
    assert_eq!(kernel.resolve::<Cache>().unwrap().db.tag, 2);

    // Losing the last candidate must deactivate Cache, not leave it
    // registered with an unsatisfiable constructor
    kernel.unregister(second);
    assert!(matches!(
        kernel.resolve::<Cache>(),
        Err(ResolveError::NotFound(_))
    ));
}

#[test]
fn observers_track_usability_across_the_cascade() {
    let kernel = Kernel::new();
    let changes = Arc::new(Mutex::new(Vec::new()));

    let sink = changes.clone();
    let handle = kernel.observe::<Cache>(move |event| {
        sink.lock().unwrap().push(event.change);
    });

    // Dormant registration: the usable set is unchanged, no delta
    kernel.register(
        ObjectDescription::of::<Cache>(),
        cache_strategy(),
        Lifetime::Transient,
    );
    assert!(changes.lock().unwrap().is_empty());
    assert!(handle.current().is_empty());

    // Db's arrival wakes Cache
    let db = kernel.register(
        ObjectDescription::of::<Db>(),
        db_strategy(1),
        Lifetime::Transient,
    );
    assert_eq!(handle.current().len(), 1);

    // Deactivation through the cascade counts as a removal
    kernel.unregister(db);
    assert!(handle.current().is_empty());

    let seen = changes.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            ObserverChange::Added { position: 0 },
            ObserverChange::Removed { position: 0 },
        ]
    );
}

#[test]
fn deactivation_purges_scoped_caches() {
    let kernel = Kernel::new();
    let db = kernel.register(
        ObjectDescription::of::<Db>(),
        db_strategy(1),
        Lifetime::Transient,
    );
    kernel.register(
        ObjectDescription::of::<Cache>(),
        cache_strategy(),
        Lifetime::Scoped,
    );

    let scope = kernel.begin_scope();
    let before = scope.resolve::<Cache>().unwrap();
    assert_eq!(before.db.tag, 1);

    // Deactivate and reactivate Cache with a replacement dependency
    kernel.unregister(db);
    kernel.register(
        ObjectDescription::of::<Db>(),
        db_strategy(2),
        Lifetime::Transient,
    );

    // The live scope must not keep handing out the stale instance
    let after = scope.resolve::<Cache>().unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(after.db.tag, 2);
}

#[test]
fn captured_builder_references_go_stale_on_unregister() {
    let kernel = Kernel::new();
    let handle = kernel.observe::<Db>(|_| {});
    let registration = kernel.register(
        ObjectDescription::of::<Db>(),
        db_strategy(7),
        Lifetime::Transient,
    );

    let candidates = handle.current();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].resolve::<Db>().unwrap().tag, 7);

    kernel.unregister(registration);
    let error = candidates[0].resolve::<Db>().unwrap_err();
    assert!(matches!(error, ResolveError::Obsolete(_)));
}

#[test]
fn deep_cascade_deactivates_transitive_dependents() {
    let kernel = Kernel::new();
    let db = register_stack(&kernel);
    assert!(kernel.resolve::<Service>().is_ok());

    kernel.unregister(db);
    assert!(matches!(
        kernel.resolve::<Service>(),
        Err(ResolveError::NotFound(_))
    ));
    assert!(matches!(
        kernel.resolve::<Cache>(),
        Err(ResolveError::NotFound(_))
    ));

    kernel.register(
        ObjectDescription::of::<Db>(),
        db_strategy(9),
        Lifetime::Transient,
    );
    let service = kernel.resolve::<Service>().unwrap();
    assert_eq!(service.db.tag, 9);
    assert_eq!(service.cache.db.tag, 9);
}
