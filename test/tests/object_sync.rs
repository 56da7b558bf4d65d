/// Masters committing versions and slaves on other nodes syncing to them
use std::time::Duration;

use coterie_node::{
    ChangeType, ObjectError, ERROR_OBJECT_NOT_FOUND, ERROR_OBJECT_SYNC_TIMEOUT,
    ERROR_OBJECT_VERSION_GAP, ERROR_OBJECT_VERSION_UNAVAILABLE,
};
use coterie_shared::{NodeConfig, ObjectConfig, ObjectId, VERSION_HEAD, VERSION_OLDEST};
use coterie_test::{assert_error_code, connected_pair, short_timeouts, wait_for, Counter, TestNode};

#[test]
fn slave_follows_master_from_zero_to_five() {
    let (client, server, server_id) = connected_pair();
    let mut master = server.register_object(Counter::new(0)).unwrap();
    let mut slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    assert!(!slave.is_master());
    assert_eq!(slave.version(), 0);
    assert_eq!(slave.value(), 0);
    assert_eq!(slave.master_node(), server_id);

    for value in 1..=5 {
        master.set_value(value);
        assert_eq!(master.commit(), Ok(value as u64));
    }
    assert_eq!(slave.sync(5), Ok(5));
    assert_eq!(slave.value(), 5);
    assert_eq!(slave.version(), 5);
    assert_eq!(master.subscribers(), vec![client.id()]);
}

#[test]
fn sync_stops_at_the_requested_version() {
    let (client, server, server_id) = connected_pair();
    let mut master = server.register_object(Counter::new(0)).unwrap();
    let mut slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();

    for value in 1..=3 {
        master.set_value(value * 10);
        master.commit().unwrap();
    }
    assert_eq!(slave.sync(2), Ok(2));
    assert_eq!(slave.value(), 20);

    client.ping(&server_id).unwrap();
    assert_eq!(slave.head_version(), 3);
    assert_eq!(slave.sync(VERSION_HEAD), Ok(3));
    assert_eq!(slave.value(), 30);
}

#[test]
fn mapping_at_head_sees_the_latest_state() {
    let (client, server, server_id) = connected_pair();
    let mut master = server.register_object(Counter::new(1)).unwrap();
    master.set_label("committed");
    master.set_value(2);
    master.commit().unwrap();

    let slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    assert_eq!(slave.version(), 1);
    assert_eq!(slave.value(), 2);
    assert_eq!(slave.label(), "committed");
}

#[test]
fn mapping_at_oldest_replays_retained_history() {
    let (client, server, server_id) = connected_pair();
    let mut master = server
        .register_object_with_config(
            ObjectId::generate(),
            Counter::new(0),
            &ObjectConfig { auto_obsolete: 2 },
        )
        .unwrap();
    for value in 1..=4 {
        master.set_value(value);
        master.commit().unwrap();
    }
    assert_eq!(master.oldest_version(), Some(2));

    let mut slave = client
        .map_object(master.id(), VERSION_OLDEST, &server_id, Counter::default())
        .unwrap();
    assert_eq!(slave.version(), 2);
    assert_eq!(slave.value(), 2);

    assert_eq!(slave.sync(3), Ok(3));
    assert_eq!(slave.value(), 3);
    assert_eq!(slave.sync(4), Ok(4));
    assert_eq!(slave.value(), 4);
}

#[test]
fn obsolete_versions_cannot_be_mapped() {
    let (client, server, server_id) = connected_pair();
    let mut master = server.register_object(Counter::new(0)).unwrap();
    master.set_value(1);
    master.commit().unwrap();
    master.set_value(2);
    master.commit().unwrap();

    let error = client
        .map_object(master.id(), 1, &server_id, Counter::default())
        .unwrap_err();
    assert_eq!(
        error,
        ObjectError::VersionUnavailable {
            object_id: master.id(),
            version: 1
        }
    );
    assert_error_code!(client, error, ERROR_OBJECT_VERSION_UNAVAILABLE);
    assert!(!client.session().contains(&master.id()));
}

#[test]
fn unknown_objects_are_not_found() {
    let (client, _server, server_id) = connected_pair();
    let object_id = ObjectId::generate();
    let error = client
        .map_object(object_id, VERSION_HEAD, &server_id, Counter::default())
        .unwrap_err();
    assert_eq!(error, ObjectError::NotFound { object_id });
    assert_error_code!(client, error, ERROR_OBJECT_NOT_FOUND);
}

#[test]
fn mapping_completes_asynchronously() {
    let (client, server, server_id) = connected_pair();
    let master = server.register_object(Counter::new(42)).unwrap();
    let request = client
        .map_object_nb(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    assert_eq!(request.object_id(), master.id());
    assert!(client.session().contains(&master.id()));

    let slave = client.map_object_sync(request).unwrap();
    assert_eq!(slave.value(), 42);
}

#[test]
fn instance_objects_send_full_state() {
    let (client, server, server_id) = connected_pair();
    let mut master = server
        .register_object(Counter::new(0).with_change_type(ChangeType::Instance))
        .unwrap();
    master.set_label("full");
    master.commit().unwrap();

    let mut slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    master.set_value(9);
    assert_eq!(master.commit(), Ok(2));
    assert_eq!(slave.sync(2), Ok(2));
    assert_eq!((slave.value(), slave.label()), (9, "full"));
}

#[test]
fn static_objects_map_but_never_commit() {
    let (client, server, server_id) = connected_pair();
    let mut master = server
        .register_object(Counter::new(5).with_change_type(ChangeType::Static))
        .unwrap();
    master.set_value(6);
    assert_eq!(
        master.commit(),
        Err(ObjectError::NotVersioned {
            object_id: master.id()
        })
    );

    let slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    assert_eq!(slave.value(), 5);
}

#[test]
fn slaves_cannot_commit() {
    let (client, server, server_id) = connected_pair();
    let master = server.register_object(Counter::new(0)).unwrap();
    let mut slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    slave.set_value(3);
    assert_eq!(
        slave.commit(),
        Err(ObjectError::NotMaster {
            object_id: master.id()
        })
    );
    assert!(slave.set_auto_obsolete(3).is_err());
}

#[test]
fn sync_times_out_without_commits() {
    let (client, server, server_id) = connected_pair();
    let master = server.register_object(Counter::new(0)).unwrap();
    let mut slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();

    let error = slave.sync(1).unwrap_err();
    assert_eq!(
        error,
        ObjectError::SyncTimeout {
            object_id: master.id(),
            version: 1
        }
    );
    assert_error_code!(client, error, ERROR_OBJECT_SYNC_TIMEOUT);
    assert_eq!(slave.sync(VERSION_HEAD), Ok(0));
}

#[test]
fn sync_cannot_go_back() {
    let (client, server, server_id) = connected_pair();
    let mut master = server.register_object(Counter::new(0)).unwrap();
    let mut slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    master.set_value(1);
    master.commit().unwrap();
    slave.sync(1).unwrap();

    assert_eq!(
        slave.sync(0),
        Err(ObjectError::VersionRegression {
            object_id: master.id(),
            current: 1,
            requested: 0
        })
    );
}

#[test]
fn overflowing_the_delta_buffer_reports_a_gap() {
    let client = TestNode::with_config(NodeConfig {
        max_buffered_versions: 3,
        ..short_timeouts()
    });
    let server = TestNode::new();
    let server_id = client.connect_to(&server).id();

    let mut master = server.register_object(Counter::new(0)).unwrap();
    let mut slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    for value in 1..=5 {
        master.set_value(value);
        master.commit().unwrap();
    }
    // the ping reply travels behind every delta
    client.ping(&server_id).unwrap();
    assert_eq!(slave.head_version(), 3);

    let error = slave.sync(5).unwrap_err();
    assert_eq!(
        error,
        ObjectError::VersionGap {
            object_id: master.id(),
            version: 4
        }
    );
    assert_error_code!(client, error, ERROR_OBJECT_VERSION_GAP);
    assert_eq!(slave.value(), 3);
}

#[test]
fn unmap_unsubscribes_from_the_master() {
    let (client, server, server_id) = connected_pair();
    let mut master = server.register_object(Counter::new(0)).unwrap();
    let mut slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    assert_eq!(master.subscribers().len(), 1);

    slave.unmap();
    slave.unmap();
    assert!(!client.session().contains(&master.id()));
    assert!(wait_for!(
        Duration::from_secs(2),
        master.subscribers().is_empty()
    ));
    assert_eq!(
        slave.sync(VERSION_HEAD),
        Err(ObjectError::NotMapped {
            object_id: master.id()
        })
    );

    master.set_value(1);
    assert_eq!(master.commit(), Ok(1));
}

#[test]
fn dropping_a_slave_unsubscribes() {
    let (client, server, server_id) = connected_pair();
    let master = server.register_object(Counter::new(0)).unwrap();
    {
        let _slave = client
            .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
            .unwrap();
        assert_eq!(master.subscribers().len(), 1);
    }
    assert!(wait_for!(
        Duration::from_secs(2),
        master.subscribers().is_empty()
    ));
}

#[test]
fn deregistered_masters_are_not_found() {
    let (client, server, server_id) = connected_pair();
    let mut master = server.register_object(Counter::new(0)).unwrap();
    let object_id = master.id();
    master.deregister();

    assert_eq!(
        client
            .map_object(object_id, VERSION_HEAD, &server_id, Counter::default())
            .unwrap_err(),
        ObjectError::NotFound { object_id }
    );
}

#[test]
fn one_master_many_slaves() {
    let server = TestNode::new();
    let clients: Vec<TestNode> = (0..3).map(|_| TestNode::new()).collect();
    let mut master = server.register_object(Counter::new(0)).unwrap();

    let mut slaves: Vec<_> = clients
        .iter()
        .map(|client| {
            let server_id = client.connect_to(&server).id();
            client
                .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
                .unwrap()
        })
        .collect();
    assert_eq!(master.subscribers().len(), 3);

    master.set_value(77);
    master.set_label("all");
    let version = master.commit().unwrap();
    for slave in &mut slaves {
        assert_eq!(slave.sync(version), Ok(version));
        assert_eq!((slave.value(), slave.label()), (77, "all"));
    }
}
