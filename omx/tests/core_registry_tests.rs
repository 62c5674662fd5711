// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Reference counting of codec core modules.
//!
//! Every test uses its own [`CoreRegistry`] over a [`common::FakeCore`], so the
//! init/deinit counters only see the calls made by that test.

mod common;

use std::sync::{Arc, atomic::Ordering};

use common::{CORE_PATH, FakeCore, FakeLoader, PortSetup, init_logging};
use omx::{CoreRegistry, Error};

fn registry() -> (CoreRegistry, Arc<FakeCore>, FakeLoader) {
    init_logging();
    let core = FakeCore::new(vec![PortSetup::input(2), PortSetup::output(2)]);
    let loader = FakeLoader::new(core.clone());
    (CoreRegistry::new(loader.clone()), core, loader)
}

/// Init runs on the first acquisition only, deinit on the last release only.
#[test]
fn init_and_deinit_follow_the_user_count() {
    let (registry, core, loader) = registry();

    let first = registry.acquire(CORE_PATH).unwrap();
    let second = registry.acquire(CORE_PATH).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.user_count(), 2);
    assert_eq!(core.inits.load(Ordering::SeqCst), 1);
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    assert_eq!(registry.len(), 1);

    registry.release(&first);
    assert_eq!(core.deinits.load(Ordering::SeqCst), 0);
    assert!(registry.is_loaded(CORE_PATH));

    registry.release(&second);
    assert_eq!(core.deinits.load(Ordering::SeqCst), 1);
    assert!(!registry.is_loaded(CORE_PATH));
    assert!(registry.is_empty());

    // A new acquisition loads and initializes the module again.
    let third = registry.acquire(CORE_PATH).unwrap();
    assert_eq!(core.inits.load(Ordering::SeqCst), 2);
    assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    registry.release(&third);
    assert_eq!(core.violations.load(Ordering::SeqCst), 0);
}

#[test]
fn load_failure_leaves_nothing_registered() {
    let (registry, core, _loader) = registry();

    let result = registry.acquire("/fake/missing/libOmxCore.so");
    assert!(matches!(result, Err(Error::Load { .. })));
    assert!(registry.is_empty());
    assert_eq!(core.inits.load(Ordering::SeqCst), 0);
}

#[test]
fn init_failure_rolls_back_the_registration() {
    let (registry, core, _loader) = registry();
    core.fail_init.store(true, Ordering::SeqCst);

    match registry.acquire(CORE_PATH) {
        Err(Error::Init { code, .. }) => assert_eq!(code, omx::ErrorCode::INSUFFICIENT_RESOURCES),
        other => panic!("expected init error, got {:?}", other.map(|_| ())),
    }
    assert!(!registry.is_loaded(CORE_PATH));

    core.fail_init.store(false, Ordering::SeqCst);
    let module = registry.acquire(CORE_PATH).unwrap();
    assert_eq!(module.user_count(), 1);
    assert_eq!(core.inits.load(Ordering::SeqCst), 1);
    registry.release(&module);
    assert_eq!(core.deinits.load(Ordering::SeqCst), 1);
}

#[test]
fn extra_release_is_ignored() {
    let (registry, core, _loader) = registry();

    let module = registry.acquire(CORE_PATH).unwrap();
    registry.release(&module);
    registry.release(&module);
    assert_eq!(core.deinits.load(Ordering::SeqCst), 1);
    assert_eq!(module.user_count(), 0);
    assert_eq!(core.violations.load(Ordering::SeqCst), 0);
}

/// Concurrent acquire/release pairs never initialize an initialized module or
/// deinitialize an uninitialized one.
#[test]
fn concurrent_users_init_exactly_once_per_transition() {
    let (registry, core, _loader) = registry();

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let module = registry.acquire(CORE_PATH).unwrap();
                    std::thread::yield_now();
                    registry.release(&module);
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let inits = core.inits.load(Ordering::SeqCst);
    assert!(inits >= 1);
    assert_eq!(inits, core.deinits.load(Ordering::SeqCst));
    assert_eq!(core.violations.load(Ordering::SeqCst), 0);
    assert!(registry.is_empty());
}
