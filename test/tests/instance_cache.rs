/// Instance data received from a master is cached and spares the master
/// from sending it again when the object is mapped later
use std::time::Duration;

use coterie_node::{ChangeType, ObjectError};
use coterie_shared::{NodeConfig, VERSION_HEAD};
use coterie_test::{connected_pair, loopback_group, short_timeouts, wait_for, Counter, TestNode};

#[test]
fn remapping_uses_cached_instance_data() {
    let (client, server, server_id) = connected_pair();
    let mut master = server.register_object(Counter::new(7)).unwrap();
    master.set_label("cached");
    master.commit().unwrap();

    let slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    let cached = client.instance_cache().get(&master.id()).unwrap();
    assert_eq!(cached.from, server_id);
    assert_eq!(cached.last_version(), Some(1));
    assert_eq!(client.instance_cache().hits(), 0);
    drop(slave);

    let again = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    assert_eq!(client.instance_cache().hits(), 1);
    assert_eq!(again.version(), 1);
    assert_eq!(again.value(), 7);
    assert_eq!(again.label(), "cached");
}

#[test]
fn versions_outside_the_cache_come_from_the_master() {
    let (client, server, server_id) = connected_pair();
    let mut master = server.register_object(Counter::new(1)).unwrap();
    drop(
        client
            .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
            .unwrap(),
    );

    master.set_value(2);
    master.commit().unwrap();
    let slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    assert_eq!(client.instance_cache().hits(), 0);
    assert_eq!(slave.value(), 2);
    // the new version starts right after the cached one and joins the run
    let cached = client.instance_cache().get(&master.id()).unwrap();
    assert_eq!((cached.first_version(), cached.last_version()), (Some(0), Some(1)));
}

#[test]
fn reregistered_master_sends_its_own_data() {
    let (client, server, server_id) = connected_pair();
    let master = server.register_object(Counter::new(1)).unwrap();
    let object_id = master.id();
    drop(
        client
            .map_object(object_id, VERSION_HEAD, &server_id, Counter::default())
            .unwrap(),
    );
    drop(master);

    // versions restart at zero, which the stale cached run also holds
    let _master = server
        .register_object_with_id(object_id, Counter::new(9))
        .unwrap();
    let slave = client
        .map_object(object_id, VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    assert_eq!(client.instance_cache().hits(), 0);
    assert_eq!(slave.version(), 0);
    assert_eq!(slave.value(), 9);
}

#[test]
fn instance_commits_fill_the_cache() {
    let (client, server, server_id) = connected_pair();
    let mut master = server
        .register_object(Counter::new(0).with_change_type(ChangeType::Instance))
        .unwrap();
    let mut slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();

    for value in 1..=3 {
        master.set_value(value);
        master.commit().unwrap();
    }
    assert_eq!(slave.sync(3), Ok(3));
    let cached = client.instance_cache().get(&master.id()).unwrap();
    assert_eq!((cached.first_version(), cached.last_version()), (Some(0), Some(3)));
    drop(slave);

    let again = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    assert_eq!(client.instance_cache().hits(), 1);
    assert_eq!(again.value(), 3);
}

#[test]
fn pushed_instance_is_used_for_mapping() {
    let (client, server, server_id) = connected_pair();
    let mut master = server.register_object(Counter::new(0)).unwrap();
    master.set_value(41);
    master.commit().unwrap();

    assert_eq!(master.push(&[client.id()]), Ok(1));
    assert!(wait_for!(
        Duration::from_secs(5),
        client.instance_cache().get(&master.id()).is_some()
    ));

    let slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    assert_eq!(client.instance_cache().hits(), 1);
    assert_eq!(slave.value(), 41);
    assert_eq!(master.subscribers(), vec![client.id()]);
}

#[test]
fn push_reaches_group_members() {
    let group = loopback_group();
    let server = TestNode::with_multicast(group.clone());
    let first = TestNode::with_multicast(group.clone());
    let second = TestNode::with_multicast(group);
    first.connect_to(&server);
    second.connect_to(&server);
    let master = server.register_object(Counter::new(5)).unwrap();

    master.push(&[first.id(), second.id()]).unwrap();
    for member in [&first, &second] {
        assert!(wait_for!(
            Duration::from_secs(5),
            member.instance_cache().get(&master.id()).is_some()
        ));
        let slave = member
            .map_object(master.id(), VERSION_HEAD, &server.id(), Counter::default())
            .unwrap();
        assert_eq!(slave.value(), 5);
        assert_eq!(member.instance_cache().hits(), 1);
    }
}

#[test]
fn only_masters_push() {
    let (client, server, server_id) = connected_pair();
    let master = server.register_object(Counter::new(0)).unwrap();
    let slave = client
        .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
        .unwrap();
    assert_eq!(
        slave.push(&[server_id]),
        Err(ObjectError::NotMaster {
            object_id: master.id()
        })
    );
}

#[test]
fn disconnect_drops_cached_data() {
    let (client, server, server_id) = connected_pair();
    let master = server.register_object(Counter::new(0)).unwrap();
    drop(
        client
            .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
            .unwrap(),
    );
    assert!(!client.instance_cache().is_empty());

    client.disconnect(&server_id).unwrap();
    assert!(client.instance_cache().is_empty());
}

#[test]
fn disabled_cache_maps_from_the_master() {
    let client = TestNode::with_config(NodeConfig {
        instance_cache_size: 0,
        ..short_timeouts()
    });
    let server = TestNode::new();
    let server_id = client.connect_to(&server).id();
    let master = server.register_object(Counter::new(3)).unwrap();

    for _ in 0..2 {
        let slave = client
            .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
            .unwrap();
        assert_eq!(slave.value(), 3);
    }
    assert!(client.instance_cache().is_empty());
    assert_eq!(client.instance_cache().hits(), 0);
}
