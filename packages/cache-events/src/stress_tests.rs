//! Stress tests designed to break the dispatcher.
//!
//! These tests exercise concurrent registration, unregistration and dispatch
//! from many threads at once.

#[cfg(test)]
mod stress_tests {
    use crate::cache::{Entry, EntryInsertedEvent};
    use crate::core::SharedEvent;
    use crate::dispatch::EventDispatcher;
    use crate::executor::TokioExecutor;
    use crate::filter::{CacheNameFilter, FilterKey, MatchAll};
    use crate::handler::{handler_fn, AsyncHandler, EventHandler, HandlerLifecycle, HandlerRef};
    use crate::testing::{CountingHandler, EventLatch};
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    // ==========================================================================
    // Test Types
    // ==========================================================================

    fn inserted(cache: &str) -> SharedEvent {
        Arc::new(EntryInsertedEvent::new(cache, Entry::new(0u64, 0u64)))
    }

    /// Counts hook invocations so they can be balanced against return values.
    #[derive(Default)]
    struct HookCounter {
        before: AtomicUsize,
        registered: AtomicUsize,
        unregistered: AtomicUsize,
        // Widens the window between the duplicate check and publication.
        before_delay: Option<Duration>,
    }

    impl EventHandler for HookCounter {
        fn process(&self, _: &EventDispatcher, _: &SharedEvent) -> Result<()> {
            Ok(())
        }

        fn lifecycle(&self) -> Option<&dyn HandlerLifecycle> {
            Some(self)
        }
    }

    impl HandlerLifecycle for HookCounter {
        fn before_registered(&self, _: &EventDispatcher, _: &FilterKey) {
            self.before.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.before_delay {
                thread::sleep(delay);
            }
        }

        fn after_registered(&self, _: &EventDispatcher, _: &FilterKey) {
            self.registered.fetch_add(1, Ordering::SeqCst);
        }

        fn after_unregistered(&self, _: &EventDispatcher, _: &FilterKey) {
            self.unregistered.fetch_add(1, Ordering::SeqCst);
        }
    }

    // ==========================================================================
    // TEST: Duplicate registration race
    // ==========================================================================
    //
    // Many threads register the same pair at the same moment. Exactly one
    // must win, and the loser path must not leave a second copy behind.

    #[test]
    fn test_duplicate_registration_race() {
        for _ in 0..200 {
            let dispatcher = EventDispatcher::new();
            let handler: HandlerRef = Arc::new(CountingHandler::new());
            let threads = 8;
            let barrier = Arc::new(Barrier::new(threads));
            let wins = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let dispatcher = dispatcher.clone();
                    let handler = handler.clone();
                    let barrier = barrier.clone();
                    let wins = wins.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        if dispatcher.register(CacheNameFilter::new("dist-*"), handler) {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }

            assert_eq!(wins.load(Ordering::SeqCst), 1, "exactly one registration must win");
            assert_eq!(dispatcher.handler_count(), 1);
        }
    }

    // ==========================================================================
    // TEST: Losers of a registration race never see before_registered
    // ==========================================================================

    #[test]
    fn test_registration_race_fires_before_hook_once() {
        for _ in 0..20 {
            let dispatcher = EventDispatcher::new();
            let counter = Arc::new(HookCounter {
                before_delay: Some(Duration::from_millis(2)),
                ..HookCounter::default()
            });
            let handler: HandlerRef = counter.clone();
            let threads = 8;
            let barrier = Arc::new(Barrier::new(threads));
            let wins = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let dispatcher = dispatcher.clone();
                    let handler = handler.clone();
                    let barrier = barrier.clone();
                    let wins = wins.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        if dispatcher.register(MatchAll, handler) {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }

            assert_eq!(wins.load(Ordering::SeqCst), 1);
            assert_eq!(counter.before.load(Ordering::SeqCst), 1);
            assert_eq!(counter.registered.load(Ordering::SeqCst), 1);
            assert_eq!(dispatcher.handler_count(), 1);
        }
    }

    // ==========================================================================
    // TEST: Concurrent dispatch delivers exactly once
    // ==========================================================================

    #[test]
    fn test_concurrent_dispatch_exactly_once() {
        let dispatcher = EventDispatcher::new();
        let counter = Arc::new(CountingHandler::new());
        dispatcher.register(MatchAll, counter.clone());

        let threads = 8;
        let per_thread = 2_000;
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                thread::spawn(move || {
                    let event = inserted("orders");
                    for _ in 0..per_thread {
                        dispatcher.dispatch(&event).unwrap();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counter.count(), threads * per_thread);
    }

    // ==========================================================================
    // TEST: Churn in a bucket never disturbs a stable handler
    // ==========================================================================
    //
    // One handler stays registered while other handlers are added to and
    // removed from the same bucket. Every dispatch must still reach it once.

    #[test]
    fn test_churn_does_not_disturb_stable_handler() {
        let dispatcher = EventDispatcher::new();
        let stable = Arc::new(CountingHandler::new());
        dispatcher.register(MatchAll, stable.clone());

        let dispatches = 5_000;
        let churners = 4;
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let churn_handles: Vec<_> = (0..churners)
            .map(|seed| {
                let dispatcher = dispatcher.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let mut rng = fastrand::Rng::with_seed(seed);
                    let pool: Vec<HandlerRef> =
                        (0..16).map(|_| Arc::new(CountingHandler::new()) as HandlerRef).collect();
                    while !done.load(Ordering::SeqCst) {
                        let handler = &pool[rng.usize(..pool.len())];
                        if rng.bool() {
                            dispatcher.register(MatchAll, handler.clone());
                        } else {
                            dispatcher.unregister(MatchAll, handler);
                        }
                    }
                    for handler in &pool {
                        dispatcher.unregister(MatchAll, handler);
                    }
                })
            })
            .collect();

        let event = inserted("orders");
        for _ in 0..dispatches {
            dispatcher.dispatch(&event).unwrap();
        }
        done.store(true, Ordering::SeqCst);

        for h in churn_handles {
            h.join().unwrap();
        }

        assert_eq!(stable.count(), dispatches);
        assert_eq!(dispatcher.handler_count(), 1);
        assert_eq!(dispatcher.filter_count(), 1);
    }

    // ==========================================================================
    // TEST: Lifecycle hooks balance under random churn
    // ==========================================================================
    //
    // Every `true` from register must be matched by one after_registered, and
    // every `true` from unregister by one after_unregistered. A `false` from
    // register fires no hook at all.

    #[test]
    fn test_hooks_balance_under_churn() {
        let dispatcher = EventDispatcher::new();
        let probes: Vec<Arc<HookCounter>> = (0..8).map(|_| Arc::new(HookCounter::default())).collect();
        let filters = ["a*", "b*", "*"];
        let threads = 6;
        let ops = 3_000;

        let registered = Arc::new(AtomicUsize::new(0));
        let unregistered = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..threads)
            .map(|seed| {
                let dispatcher = dispatcher.clone();
                let probes = probes.clone();
                let registered = registered.clone();
                let unregistered = unregistered.clone();
                thread::spawn(move || {
                    let mut rng = fastrand::Rng::with_seed(1_000 + seed);
                    for _ in 0..ops {
                        let probe: HandlerRef = probes[rng.usize(..probes.len())].clone();
                        let filter = CacheNameFilter::new(filters[rng.usize(..filters.len())]);
                        match rng.u8(..3) {
                            0 => {
                                if dispatcher.register(filter, probe) {
                                    registered.fetch_add(1, Ordering::SeqCst);
                                }
                            }
                            1 => {
                                if dispatcher.unregister(filter, &probe) {
                                    unregistered.fetch_add(1, Ordering::SeqCst);
                                }
                            }
                            _ => {
                                dispatcher.dispatch(&inserted("abc")).unwrap();
                            }
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let hook_before: usize = probes.iter().map(|p| p.before.load(Ordering::SeqCst)).sum();
        let hook_registered: usize = probes.iter().map(|p| p.registered.load(Ordering::SeqCst)).sum();
        let hook_unregistered: usize =
            probes.iter().map(|p| p.unregistered.load(Ordering::SeqCst)).sum();

        assert_eq!(hook_before, registered.load(Ordering::SeqCst));
        assert_eq!(hook_registered, registered.load(Ordering::SeqCst));
        assert_eq!(hook_unregistered, unregistered.load(Ordering::SeqCst));
        assert_eq!(
            dispatcher.handler_count(),
            registered.load(Ordering::SeqCst) - unregistered.load(Ordering::SeqCst)
        );
    }

    // ==========================================================================
    // TEST: Deferred dispatch flood
    // ==========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_deferred_dispatch_flood() {
        let dispatcher = EventDispatcher::builder()
            .with_executor(Arc::new(TokioExecutor::current().unwrap()))
            .build();
        let total = 1_000;
        let latch = Arc::new(EventLatch::new(total));

        dispatcher.register(
            MatchAll,
            handler_fn("latch", {
                let latch = latch.clone();
                move |_, _| {
                    latch.dec();
                    Ok(())
                }
            }),
        );

        for i in 0..total {
            dispatcher
                .dispatch_later(inserted(&format!("cache-{i}")))
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(30), latch.await_zero())
            .await
            .expect("deferred deliveries went missing");
    }

    // ==========================================================================
    // TEST: Async handlers fail independently
    // ==========================================================================
    //
    // Half of the asynchronous deliveries fail or panic. The producer never
    // sees an error and every healthy delivery still lands.

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_async_failures_are_isolated() {
        let dispatcher = EventDispatcher::builder()
            .with_executor(Arc::new(TokioExecutor::current().unwrap()))
            .build();
        let total = 200;
        let latch = Arc::new(EventLatch::new(total));
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.register(
            MatchAll,
            AsyncHandler::wrap(handler_fn("flaky", {
                let calls = calls.clone();
                move |_, _| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    match n % 4 {
                        0 => anyhow::bail!("flaky failure {n}"),
                        1 => panic!("flaky panic {n}"),
                        _ => Ok(()),
                    }
                }
            })),
        );
        dispatcher.register(
            MatchAll,
            AsyncHandler::wrap(handler_fn("healthy", {
                let latch = latch.clone();
                move |_, _| {
                    latch.dec();
                    Ok(())
                }
            })),
        );

        let event = inserted("orders");
        for _ in 0..total {
            dispatcher.dispatch(&event).unwrap();
        }

        tokio::time::timeout(Duration::from_secs(30), latch.await_zero())
            .await
            .expect("healthy async deliveries went missing");
    }
}
