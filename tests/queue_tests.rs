use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use orpheus::queue::{HandoffQueue, SlotState, StorageFault};
use orpheus::sector::SECTOR_SIZE;

#[test]
fn test_publish_and_consume_in_order() {
    let queue = HandoffQueue::new(8, 4);
    for n in 0..3u64 {
        let mut slot = queue.acquire_for_write().unwrap();
        slot.payload_mut()[0] = n as u8;
        slot.publish(n * 16, 2, SlotState::Full);
    }
    for n in 0..3u64 {
        let slot = queue.acquire_for_read();
        assert_eq!(slot.state(), SlotState::Full);
        assert_eq!(slot.first_sector(), n * 16);
        assert_eq!(slot.count(), 2);
        assert_eq!(slot.payload().len(), 2 * SECTOR_SIZE);
        assert_eq!(slot.payload()[0], n as u8);
        slot.release();
    }
}

#[test]
fn test_cross_thread_ordering() {
    let queue = HandoffQueue::new(4, 1);
    thread::scope(|scope| {
        scope.spawn(|| {
            for n in 0..50u64 {
                let mut slot = queue.acquire_for_write().unwrap();
                slot.payload_mut()[0] = (n % 251) as u8;
                slot.publish(n, 1, SlotState::Full);
            }
            queue.send_eof();
        });
        let mut expected = 0u64;
        loop {
            let slot = queue.acquire_for_read();
            if slot.state() == SlotState::Eof {
                break;
            }
            assert_eq!(slot.first_sector(), expected);
            assert_eq!(slot.payload()[0], (expected % 251) as u8);
            expected += 1;
            slot.release();
        }
        assert_eq!(expected, 50);
    });
}

#[test]
fn test_producer_blocks_when_full() {
    let queue = HandoffQueue::new(2, 1);
    let published = AtomicUsize::new(0);
    thread::scope(|scope| {
        scope.spawn(|| {
            for n in 0..4u64 {
                let slot = queue.acquire_for_write().unwrap();
                slot.publish(n, 1, SlotState::Full);
                published.fetch_add(1, Ordering::SeqCst);
            }
        });
        thread::sleep(Duration::from_millis(100));
        assert!(published.load(Ordering::SeqCst) <= 2);
        for n in 0..4u64 {
            let slot = queue.acquire_for_read();
            assert_eq!(slot.first_sector(), n);
            slot.release();
        }
    });
    assert_eq!(published.load(Ordering::SeqCst), 4);
}

#[test]
fn test_eof_is_terminal() {
    let queue = HandoffQueue::new(4, 1);
    let slot = queue.acquire_for_write().unwrap();
    slot.publish(7, 1, SlotState::Dead);
    queue.send_eof();
    let slot = queue.acquire_for_read();
    assert_eq!(slot.state(), SlotState::Dead);
    assert_eq!(slot.first_sector(), 7);
    slot.release();
    assert_eq!(queue.acquire_for_read().state(), SlotState::Eof);
    // the marker stays in place for repeated observers
    assert_eq!(queue.acquire_for_read().state(), SlotState::Eof);
}

#[test]
fn test_fault_unblocks_producer() {
    let queue = HandoffQueue::new(2, 1);
    for n in 0..2u64 {
        let slot = queue.acquire_for_write().unwrap();
        slot.publish(n, 1, SlotState::Full);
    }
    thread::scope(|scope| {
        let blocked = scope.spawn(|| queue.acquire_for_write());
        thread::sleep(Duration::from_millis(50));
        queue.fail(StorageFault {
            sector: 1,
            detail: "disk full".to_string(),
        });
        let result = blocked.join().unwrap();
        assert!(result.is_err());
        assert_eq!(result.err().unwrap().sector, 1);
    });
    assert!(queue.fault().is_some());
}

#[test]
fn test_fault_short_circuits_eof() {
    let queue = HandoffQueue::new(2, 1);
    for n in 0..2u64 {
        let slot = queue.acquire_for_write().unwrap();
        slot.publish(n, 1, SlotState::Full);
    }
    queue.fail(StorageFault {
        sector: 0,
        detail: "io error".to_string(),
    });
    // queue is full and nobody is draining, this must still return
    queue.send_eof();
}

#[test]
fn test_first_fault_wins() {
    let queue = HandoffQueue::new(2, 1);
    queue.fail(StorageFault {
        sector: 3,
        detail: "first".to_string(),
    });
    queue.fail(StorageFault {
        sector: 9,
        detail: "second".to_string(),
    });
    let fault = queue.fault().unwrap();
    assert_eq!(fault.sector, 3);
    assert_eq!(fault.detail, "first");
}

#[test]
fn test_abandon_frees_the_slot() {
    let queue = HandoffQueue::new(2, 1);
    let mut slot = queue.acquire_for_write().unwrap();
    slot.payload_mut()[0] = 0xaa;
    slot.abandon();
    let slot = queue.acquire_for_write().unwrap();
    slot.publish(42, 1, SlotState::Full);
    let slot = queue.acquire_for_read();
    assert_eq!(slot.first_sector(), 42);
    slot.release();
}

#[test]
fn test_counters() {
    let queue = HandoffQueue::new(2, 1);
    assert_eq!(queue.crc_errors(), 0);
    assert_eq!(queue.dead_written(), 0);
    queue.add_crc_errors(3);
    queue.add_crc_errors(2);
    queue.add_dead_written(16);
    assert_eq!(queue.crc_errors(), 5);
    assert_eq!(queue.dead_written(), 16);
}

#[test]
fn test_storage_fault_message() {
    let fault = StorageFault {
        sector: 128,
        detail: "no space left".to_string(),
    };
    assert_eq!(
        fault.to_string(),
        "image storage failed near sector 128: no space left"
    );
}
