//! Producer/consumer over a bounded ring buffer guarded by three
//! semaphores (`empty`, `full`, `mutex`) — the workload
//! `original_source/tests/test_pc.c` exercises against the C runtime's
//! (never-shipped) semaphore API, scaled down from its
//! `BUF_SIZE=10, N_PRODUCE=100, N_PRODUCER=N_CONSUMER=400` so the test
//! suite finishes quickly while keeping the same shape: more producers
//! and consumers than slots, and more total items than any one producer
//! makes alone.

extern crate gpm_co;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use gpm_co::Semaphore;

const BUF_SIZE: isize = 4;
const N_PRODUCE: usize = 40;
const N_PRODUCERS: usize = 4;
const N_CONSUMERS: usize = 4;

struct Channel {
    buf: Mutex<VecDeque<i32>>,
    empty: Semaphore,
    full: Semaphore,
    mutex: Semaphore,
}

#[test]
fn bounded_buffer_delivers_every_item_exactly_once() {
    let _rt = gpm_co::init_with_config(gpm_co::Config {
        parallelism: 4,
        log_on_shutdown: false,
    });

    let chan = Arc::new(Channel {
        buf: Mutex::new(VecDeque::new()),
        empty: Semaphore::new(),
        full: Semaphore::new(),
        mutex: Semaphore::new(),
    });
    gpm_co::sem_init(&chan.empty, BUF_SIZE);
    gpm_co::sem_init(&chan.full, 0);
    gpm_co::sem_init(&chan.mutex, 1);

    let produced = Arc::new(AtomicUsize::new(0));
    let consumed_items: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();

    for producer_id in 0..N_PRODUCERS {
        let chan = chan.clone();
        let produced = produced.clone();
        handles.push(gpm_co::start(&format!("producer-{}", producer_id), move || {
            loop {
                let n = produced.fetch_add(1, Ordering::SeqCst);
                if n >= N_PRODUCE {
                    break;
                }
                let item = n as i32;

                gpm_co::sem_wait(&chan.empty);
                gpm_co::sem_wait(&chan.mutex);
                chan.buf.lock().unwrap().push_back(item);
                gpm_co::sem_post(&chan.mutex);
                gpm_co::sem_post(&chan.full);
            }
        }));
    }

    // Consumers claim a slot in the total item count before calling
    // `sem_wait(&chan.full)`, so across every consumer there are exactly
    // `N_PRODUCE` waits on `full` — matching the exactly `N_PRODUCE`
    // posts producers make. Without this, a consumer racing past the
    // last item would block on `full` forever once producers stop.
    let claimed = Arc::new(AtomicUsize::new(0));

    for consumer_id in 0..N_CONSUMERS {
        let chan = chan.clone();
        let claimed = claimed.clone();
        let consumed_items = consumed_items.clone();
        handles.push(gpm_co::start(&format!("consumer-{}", consumer_id), move || loop {
            let n = claimed.fetch_add(1, Ordering::SeqCst);
            if n >= N_PRODUCE {
                break;
            }

            gpm_co::sem_wait(&chan.full);
            gpm_co::sem_wait(&chan.mutex);
            let item = chan
                .buf
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("full permit granted with an empty buffer"));
            gpm_co::sem_post(&chan.mutex);
            gpm_co::sem_post(&chan.empty);

            consumed_items.lock().unwrap().push(item);
        }));
    }

    for h in &handles {
        gpm_co::wait(h);
    }
    for h in handles {
        gpm_co::free(h);
    }

    let mut items = consumed_items.lock().unwrap();
    assert_eq!(items.len(), N_PRODUCE);
    items.sort();
    let expected: Vec<i32> = (0..N_PRODUCE as i32).collect();
    assert_eq!(*items, expected);
}
