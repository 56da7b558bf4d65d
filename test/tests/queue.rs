/// Distributed queues: every item reaches exactly one slave
use std::{
    collections::BTreeSet,
    thread,
    time::{Duration, Instant},
};

use coterie_node::{QueueError, QueueMaster, QueueSlave};
use coterie_shared::QueueConfig;
use coterie_test::{wait_for, TestNode};

#[test]
fn two_slaves_share_three_items() {
    let master_node = TestNode::new();
    let first_node = TestNode::new();
    let second_node = TestNode::new();
    let queue = QueueMaster::<String>::new(&master_node).unwrap();
    for item in ["A", "B", "C"] {
        queue.push(&item.to_string());
    }

    let master_id = first_node.connect_to(&master_node).id();
    second_node.connect_to(&master_node);
    let first = QueueSlave::<String>::map(&first_node, queue.id(), &master_id).unwrap();
    let second = QueueSlave::<String>::map(&second_node, queue.id(), &master_id).unwrap();

    assert_eq!(first.pop(), Ok(Some("A".to_string())));
    assert_eq!(second.pop(), Ok(Some("B".to_string())));
    assert_eq!(first.pop(), Ok(Some("C".to_string())));
    assert_eq!(second.pop(), Ok(None));
    assert_eq!(first.pop(), Ok(None));
    assert!(queue.is_empty());
}

#[test]
fn concurrent_slaves_never_share_an_item() {
    const ITEMS: u32 = 300;
    let master_node = TestNode::new();
    let queue = QueueMaster::<u32>::new(&master_node).unwrap();
    for item in 0..ITEMS {
        queue.push(&item);
    }

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let node = TestNode::new();
            let master_id = node.connect_to(&master_node).id();
            let queue_id = queue.id();
            thread::spawn(move || {
                let slave = QueueSlave::<u32>::map(&node, queue_id, &master_id).unwrap();
                let mut popped = Vec::new();
                while let Some(item) = slave.pop().unwrap() {
                    popped.push(item);
                }
                drop(slave);
                drop(node);
                popped
            })
        })
        .collect();

    let mut seen = BTreeSet::new();
    let mut total = 0;
    for consumer in consumers {
        for item in consumer.join().unwrap() {
            total += 1;
            assert!(seen.insert(item), "item {} delivered twice", item);
        }
    }
    assert_eq!(total, ITEMS as usize);
    assert_eq!(seen.into_iter().collect::<Vec<_>>(), (0..ITEMS).collect::<Vec<_>>());
}

#[test]
fn prefetch_requests_several_items() {
    let master_node = TestNode::new();
    let slave_node = TestNode::new();
    let queue = QueueMaster::<u64>::new(&master_node).unwrap();
    for item in 0..10u64 {
        queue.push(&item);
    }
    let master_id = slave_node.connect_to(&master_node).id();
    let slave = QueueSlave::<u64>::map_with_config(
        &slave_node,
        queue.id(),
        &master_id,
        QueueConfig {
            prefetch_mark: 0,
            prefetch_amount: 4,
        },
    )
    .unwrap();

    assert_eq!(slave.pop(), Ok(Some(0)));
    assert!(wait_for!(Duration::from_secs(2), slave.buffered() == 3));
    assert_eq!(queue.len(), 6);
    for expected in 1..4 {
        assert_eq!(slave.pop(), Ok(Some(expected)));
    }
}

#[test]
fn prefetch_mark_keeps_items_in_reserve() {
    let master_node = TestNode::new();
    let slave_node = TestNode::new();
    let queue = QueueMaster::<u64>::new(&master_node).unwrap();
    for item in 0..10u64 {
        queue.push(&item);
    }
    let master_id = slave_node.connect_to(&master_node).id();
    let slave = QueueSlave::<u64>::map_with_config(
        &slave_node,
        queue.id(),
        &master_id,
        QueueConfig {
            prefetch_mark: 2,
            prefetch_amount: 3,
        },
    )
    .unwrap();

    assert_eq!(slave.pop(), Ok(Some(0)));
    // the rest of the first batch, maybe with the next one behind it
    assert!(wait_for!(Duration::from_secs(2), slave.buffered() >= 2));
    assert!(queue.len() <= 7);

    for expected in 1..10 {
        assert_eq!(slave.pop(), Ok(Some(expected)));
    }
    assert_eq!(slave.pop(), Ok(None));
    assert!(queue.is_empty());
}

#[test]
fn empty_queue_pops_none() {
    let master_node = TestNode::new();
    let slave_node = TestNode::new();
    let queue = QueueMaster::<u32>::new(&master_node).unwrap();
    let master_id = slave_node.connect_to(&master_node).id();
    let slave = QueueSlave::<u32>::map(&slave_node, queue.id(), &master_id).unwrap();

    assert_eq!(slave.pop_timeout(Duration::from_secs(2)), Ok(None));
    queue.push(&5);
    assert_eq!(slave.pop_timeout(Duration::from_secs(2)), Ok(Some(5)));
}

#[test]
fn cleared_items_are_gone() {
    let master_node = TestNode::new();
    let slave_node = TestNode::new();
    let queue = QueueMaster::<u32>::new(&master_node).unwrap();
    queue.push(&1);
    queue.push(&2);
    queue.clear();
    let master_id = slave_node.connect_to(&master_node).id();
    let slave = QueueSlave::<u32>::map(&slave_node, queue.id(), &master_id).unwrap();
    assert_eq!(slave.pop(), Ok(None));
}

#[test]
fn lost_master_fails_the_pop() {
    let master_node = TestNode::new();
    let slave_node = TestNode::new();
    let queue = QueueMaster::<u32>::new(&master_node).unwrap();
    let master_id = slave_node.connect_to(&master_node).id();
    let slave = QueueSlave::<u32>::map(&slave_node, queue.id(), &master_id).unwrap();

    drop(queue);
    drop(master_node);
    assert!(wait_for!(
        Duration::from_secs(2),
        slave_node.connected_nodes().is_empty()
    ));
    assert!(slave.pop_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn failed_request_is_not_left_outstanding() {
    let master_node = TestNode::new();
    let slave_node = TestNode::new();
    let queue = QueueMaster::<u32>::new(&master_node).unwrap();
    let master_id = slave_node.connect_to(&master_node).id();
    let slave = QueueSlave::<u32>::map(&slave_node, queue.id(), &master_id).unwrap();

    slave_node.disconnect(&master_id).unwrap();
    for _ in 0..3 {
        let started = Instant::now();
        assert!(matches!(
            slave.pop_timeout(Duration::from_secs(10)),
            Err(QueueError::Node(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
