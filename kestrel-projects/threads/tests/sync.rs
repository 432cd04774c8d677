use kestrel::{
    sync::atomic::{AtomicBool, AtomicUsize},
    thread::{Current, JoinHandle, ThreadBuilder},
};
use kestrel_threads::sync::{ConditionVariable, Mutex, Semaphore};
use std::sync::Arc;

mod mutex {
    use super::*;

    fn smoke() {
        const LENGTH: usize = 32;
        let output = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<JoinHandle> = (0..LENGTH)
            .map(|i| {
                let counter = counter.clone();
                let output = output.clone();
                ThreadBuilder::new("smoker")
                    .spawn(move || {
                        counter.fetch_add(1);
                        let mut d = output.lock();
                        d.push(i);
                        d.unlock();
                    })
                    .unwrap()
            })
            .collect();
        for h in handles {
            assert_eq!(h.join(), 0);
        }

        assert_eq!(counter.load(), LENGTH);
        let mut output = output.lock();
        output.sort();
        assert_eq!(&*output, &(0..LENGTH).collect::<Vec<_>>());
        output.unlock();
    }

    #[test]
    fn smoke_many() {
        for _ in 0..10 {
            smoke()
        }
    }

    #[test]
    fn counter_is_not_torn() {
        let data = Arc::new(Mutex::new(0usize));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let data = data.clone();
                ThreadBuilder::new("incr")
                    .spawn(move || {
                        for _ in 0..200 {
                            let mut guard = data.lock();
                            let v = *guard;
                            Current::yield_now();
                            *guard = v + 1;
                            guard.unlock();
                        }
                    })
                    .unwrap()
            })
            .collect();
        for h in handles {
            h.join();
        }
        assert_eq!(Arc::try_unwrap(data).ok().map(Mutex::into_inner), Some(1600));
    }

    #[test]
    fn contended_lock_parks() {
        let mutex = Arc::new(Mutex::new(()));
        let guard = mutex.lock();
        let spawned = Arc::new(AtomicBool::new(false));

        let blockee = {
            let (spawned, mutex) = (spawned.clone(), mutex.clone());
            ThreadBuilder::new("blockee")
                .spawn(move || {
                    spawned.store(true);
                    let guard = mutex.lock();
                    assert!(mutex.is_held_by_current_thread());
                    guard.unlock();
                })
                .unwrap()
        };

        while !spawned.load() {
            Current::yield_now();
        }
        assert!(mutex.try_lock().is_err());
        assert!(mutex.is_held_by_current_thread());
        guard.unlock();
        assert_eq!(blockee.join(), 0);
        assert!(!mutex.is_held_by_current_thread());
        assert!(mutex.try_lock().is_ok());
    }
}

mod condition_variable {
    use super::*;

    const MAX: usize = 2;
    const ITEMS: usize = 10;

    struct BufferInner {
        item: [usize; MAX],
        front: usize,
        len: usize,
    }

    struct Buffer {
        inner: Mutex<BufferInner>,
        not_full: ConditionVariable,
        not_empty: ConditionVariable,
    }

    impl Buffer {
        fn new() -> Self {
            let inner = Mutex::new(BufferInner {
                item: [0; MAX],
                front: 0,
                len: 0,
            });
            let not_full = ConditionVariable::new(&inner);
            let not_empty = ConditionVariable::new(&inner);
            Self {
                inner,
                not_full,
                not_empty,
            }
        }

        fn put(&self, val: usize) {
            let mut guard = self
                .not_full
                .wait_while(self.inner.lock(), |b| b.len == MAX);
            let tail = (guard.front + guard.len) % MAX;
            guard.item[tail] = val;
            guard.len += 1;
            self.not_empty.signal(&guard);
            guard.unlock();
        }

        fn get(&self) -> usize {
            let mut guard = self.not_empty.wait_while(self.inner.lock(), |b| b.len == 0);
            let item = guard.item[guard.front];
            guard.front = (guard.front + 1) % MAX;
            guard.len -= 1;
            self.not_full.signal(&guard);
            guard.unlock();
            item
        }
    }

    #[test]
    fn bounded_buffer() {
        let buffer = Arc::new(Buffer::new());
        let output = Arc::new(Mutex::new(Vec::new()));

        let consumers: Vec<_> = (0..ITEMS)
            .map(|_| {
                let (buffer, output) = (buffer.clone(), output.clone());
                ThreadBuilder::new("consumer")
                    .spawn(move || {
                        let d = buffer.get();
                        let mut guard = output.lock();
                        guard.push(d);
                        guard.unlock();
                    })
                    .unwrap()
            })
            .collect();

        let producer = {
            let buffer = buffer.clone();
            ThreadBuilder::new("producer")
                .spawn(move || {
                    for i in 0..ITEMS {
                        buffer.put(i);
                    }
                })
                .unwrap()
        };

        for consumer in consumers {
            consumer.join();
        }
        producer.join();

        let mut output = output.lock();
        output.sort();
        assert_eq!(&*output, &(0..ITEMS).collect::<Vec<_>>());
        output.unlock();
    }

    #[test]
    fn signal_without_waiter_is_noop() {
        let mutex = Mutex::new(0);
        let cond = ConditionVariable::new(&mutex);
        let guard = mutex.lock();
        cond.signal(&guard);
        cond.broadcast(&guard);
        assert_eq!(cond.waiters(), 0);
        guard.unlock();
        // A later waiter is not woken by the earlier signals.
        assert!(mutex.try_lock().is_ok());
    }

    #[test]
    fn broadcast_wakes_everyone() {
        const N: usize = 6;
        let state = Arc::new(Mutex::new(false));
        let cond = Arc::new(ConditionVariable::new(&state));
        let handles: Vec<_> = (0..N)
            .map(|_| {
                let (state, cond) = (state.clone(), cond.clone());
                ThreadBuilder::new("waiter")
                    .spawn(move || {
                        let guard = cond.wait_while(state.lock(), |go| !*go);
                        guard.unlock();
                    })
                    .unwrap()
            })
            .collect();
        while cond.waiters() != N {
            Current::yield_now();
        }
        let mut guard = state.lock();
        *guard = true;
        cond.broadcast(&guard);
        guard.unlock();
        for h in handles {
            assert_eq!(h.join(), 0);
        }
        assert_eq!(cond.waiters(), 0);
    }

    #[test]
    #[should_panic(expected = "not bound")]
    fn foreign_mutex_panics() {
        let a = Mutex::new(());
        let b = Mutex::new(());
        let cond = ConditionVariable::new(&a);
        let guard = b.lock();
        cond.signal(&guard);
    }
}

mod semaphore {
    use super::*;

    #[test]
    fn limits_concurrency() {
        const PERMITS: usize = 3;
        let sema = Arc::new(Semaphore::new(PERMITS, AtomicUsize::new(0)));
        let peak = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..12)
            .map(|_| {
                let (sema, peak) = (sema.clone(), peak.clone());
                ThreadBuilder::new("worker")
                    .spawn(move || {
                        let inside = sema.wait();
                        let now = inside.fetch_add(1) + 1;
                        let mut prev = peak.load();
                        while now > prev {
                            match peak.compare_exchange(prev, now) {
                                Ok(_) => break,
                                Err(p) => prev = p,
                            }
                        }
                        Current::yield_now();
                        inside.fetch_sub(1);
                    })
                    .unwrap()
            })
            .collect();
        for h in handles {
            h.join();
        }
        assert!(peak.load() <= PERMITS);
        assert_eq!(sema.permits(), PERMITS);
    }

    #[test]
    fn zero_permit_semaphore_signals_an_event() {
        let sema = Arc::new(Semaphore::new(0, ()));
        let waiter = {
            let sema = sema.clone();
            ThreadBuilder::new("event")
                .spawn(move || sema.wait().forget())
                .unwrap()
        };
        sema.signal();
        assert_eq!(waiter.join(), 0);
        assert_eq!(sema.permits(), 0);
    }
}
