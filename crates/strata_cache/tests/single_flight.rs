//! Concurrency properties of the adapter's entry protocol.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use strata_cache::{CacheAdapter, EntryStatus, PipelineBinaryCache, RuntimeSettings};
use strata_common::{CacheId, PlatformKey};

fn adapter() -> Arc<CacheAdapter> {
    let mut settings = RuntimeSettings::new("single-flight-test");
    settings.create_archive_layers = false;
    let cache = PipelineBinaryCache::new(
        PlatformKey::new(0x1002, 0x744c, [7u8; 16], b"fingerprint"),
        &settings,
    )
    .unwrap();
    Arc::new(CacheAdapter::new(Arc::new(cache)))
}

#[test]
fn one_producer_many_waiters() {
    const THREADS: usize = 8;
    let adapter = adapter();
    let id = CacheId::from_contents(b"hot pipeline");
    let producers = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let adapter = Arc::clone(&adapter);
            let producers = Arc::clone(&producers);
            thread::spawn(move || {
                let (handle, status) = adapter.get_entry(&id, true).unwrap();
                let status = match status {
                    EntryStatus::Pending => adapter.wait_for_entry(handle).unwrap(),
                    other => other,
                };
                match status {
                    EntryStatus::MustPopulate => {
                        producers.fetch_add(1, Ordering::SeqCst);
                        adapter.set_value(handle, true, b"compiled once").unwrap();
                    }
                    EntryStatus::Ready => {}
                    EntryStatus::Pending => unreachable!("wait resolved to pending"),
                }
                let value = adapter.get_value(handle).unwrap();
                adapter.release_entry(handle).unwrap();
                value
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), b"compiled once");
    }
    assert_eq!(producers.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_producer_unblocks_a_successor() {
    let adapter = adapter();
    let id = CacheId::from_contents(b"flaky pipeline");

    let (producer, status) = adapter.get_entry(&id, true).unwrap();
    assert_eq!(status, EntryStatus::MustPopulate);

    let waiter = {
        let adapter = Arc::clone(&adapter);
        thread::spawn(move || {
            let (handle, status) = adapter.get_entry(&id, true).unwrap();
            assert_eq!(status, EntryStatus::Pending);
            let status = adapter.wait_for_entry(handle).unwrap();
            // The first producer failed, so the waiter inherits the job.
            assert_eq!(status, EntryStatus::MustPopulate);
            adapter.set_value(handle, true, b"second try").unwrap();
            let value = adapter.get_value(handle).unwrap();
            adapter.release_entry(handle).unwrap();
            value
        })
    };

    // Give the waiter time to block, then fail the first production.
    thread::sleep(std::time::Duration::from_millis(30));
    adapter.set_value(producer, false, &[]).unwrap();
    adapter.release_entry(producer).unwrap();

    assert_eq!(waiter.join().unwrap(), b"second try");
}

#[test]
fn zero_copy_value_survives_release() {
    let adapter = adapter();
    let id = CacheId::from_contents(b"zero copy");

    let (producer, _) = adapter.get_entry(&id, true).unwrap();
    adapter.set_value(producer, true, b"shared payload").unwrap();

    let data = adapter.get_value_zero_copy(producer).unwrap();
    adapter.release_entry(producer).unwrap();
    assert_eq!(&data[..], b"shared payload");
}
