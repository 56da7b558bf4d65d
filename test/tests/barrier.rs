/// Barriers spanning several nodes
use std::{thread, time::Duration};

use coterie_node::{Barrier, BarrierError, ERROR_BARRIER_TIMEOUT};
use coterie_shared::VERSION_HEAD;
use coterie_test::{assert_error_code, TestNode};

fn master_with_slaves(
    height: u32,
    slaves: usize,
) -> (TestNode, Vec<TestNode>, Barrier, Vec<Barrier>) {
    let master_node = TestNode::new();
    let barrier = Barrier::new(&master_node, height).unwrap();
    let nodes: Vec<TestNode> = (0..slaves).map(|_| TestNode::new()).collect();
    let mapped = nodes
        .iter()
        .map(|node| {
            let master_id = node.connect_to(&master_node).id();
            Barrier::map(node, barrier.id(), &master_id, VERSION_HEAD).unwrap()
        })
        .collect();
    (master_node, nodes, barrier, mapped)
}

#[test]
fn all_participants_leave_together() {
    let (_master_node, _nodes, barrier, mapped) = master_with_slaves(3, 2);
    assert_eq!(mapped[0].height(), 3);
    assert_eq!(mapped[0].master_node(), barrier.master_node());

    let handles: Vec<_> = mapped
        .into_iter()
        .map(|slave| thread::spawn(move || slave.enter().map(|_| slave)))
        .collect();
    barrier.enter().unwrap();
    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }
}

#[test]
fn nobody_leaves_before_the_last_entry() {
    let (_master_node, _nodes, barrier, mut mapped) = master_with_slaves(2, 1);
    let slave = mapped.remove(0);

    let waiting = thread::spawn(move || {
        let result = slave.enter();
        (result, slave)
    });
    thread::sleep(Duration::from_millis(100));
    assert!(!waiting.is_finished());

    barrier.enter().unwrap();
    let (result, _slave) = waiting.join().unwrap();
    assert!(result.is_ok());
}

#[test]
fn barrier_is_reusable() {
    let (_master_node, _nodes, barrier, mut mapped) = master_with_slaves(2, 1);
    let slave = mapped.remove(0);

    let rounds = thread::spawn(move || {
        for _ in 0..5 {
            slave.enter().unwrap();
        }
        slave
    });
    for _ in 0..5 {
        barrier.enter().unwrap();
    }
    rounds.join().unwrap();
}

#[test]
fn enter_times_out_when_participants_are_missing() {
    let (_master_node, nodes, _barrier, mapped) = master_with_slaves(3, 1);
    let error = mapped[0]
        .enter_timeout(Duration::from_millis(100))
        .unwrap_err();
    assert_eq!(
        error,
        BarrierError::Timeout {
            object_id: mapped[0].id(),
            version: 0
        }
    );
    assert_error_code!(nodes[0], error, ERROR_BARRIER_TIMEOUT);
}

#[test]
fn new_height_applies_to_the_next_version() {
    let (_master_node, _nodes, mut barrier, mut mapped) = master_with_slaves(3, 1);
    barrier.set_height(2);
    assert_eq!(barrier.commit(), Ok(1));

    let mut slave = mapped.remove(0);
    let entered = thread::spawn(move || {
        slave.sync(1).unwrap();
        assert_eq!(slave.height(), 2);
        slave.enter().map(|_| slave)
    });
    barrier.enter().unwrap();
    assert!(entered.join().unwrap().is_ok());
}

#[test]
fn single_participant_barrier_never_blocks() {
    let node = TestNode::new();
    let barrier = Barrier::new(&node, 1).unwrap();
    for _ in 0..3 {
        barrier.enter().unwrap();
    }
}
