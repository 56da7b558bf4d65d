/// PROPERTY-BASED TESTS: delta distribution
///
/// Whatever sequence of field changes a master commits, a slave synced to
/// the master's version holds the same state.
use proptest::prelude::*;

use coterie_node::Distributable;
use coterie_shared::VERSION_HEAD;
use coterie_test::{connected_pair, Counter};

#[derive(Debug, Clone)]
enum Change {
    Value(i64),
    Label(String),
    Both(i64, String),
    Nothing,
}

fn change_strategy() -> impl Strategy<Value = Change> {
    prop_oneof![
        any::<i64>().prop_map(Change::Value),
        "[a-z]{0,12}".prop_map(Change::Label),
        (any::<i64>(), "[a-z]{0,12}").prop_map(|(value, label)| Change::Both(value, label)),
        Just(Change::Nothing),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_slave_matches_master(changes in prop::collection::vec(change_strategy(), 1..24)) {
        let (client, server, server_id) = connected_pair();
        let mut master = server.register_object(Counter::new(0)).unwrap();
        let mut slave = client
            .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
            .unwrap();

        let mut expected_version = 0;
        for change in changes {
            match change {
                Change::Value(value) => master.set_value(value),
                Change::Label(label) => master.set_label(&label),
                Change::Both(value, label) => {
                    master.set_value(value);
                    master.set_label(&label);
                }
                Change::Nothing => {}
            }
            let changed = !master.dirty_bits().is_empty();
            let version = master.commit().unwrap();
            if changed {
                expected_version += 1;
            }
            prop_assert_eq!(version, expected_version);
        }

        prop_assert_eq!(slave.sync(expected_version), Ok(expected_version));
        prop_assert_eq!(slave.value(), master.value());
        prop_assert_eq!(slave.label(), master.label());
    }

    /// Slaves mapping late start from the head and catch up the same way
    #[test]
    fn prop_late_slave_matches_master(
        before in prop::collection::vec(any::<i64>(), 0..8),
        after in prop::collection::vec(any::<i64>(), 0..8),
    ) {
        let (client, server, server_id) = connected_pair();
        let mut master = server.register_object(Counter::new(-1)).unwrap();
        for value in before {
            master.set_value(value);
            master.commit().unwrap();
        }
        let mut slave = client
            .map_object(master.id(), VERSION_HEAD, &server_id, Counter::default())
            .unwrap();
        prop_assert_eq!(slave.version(), master.version());

        for value in after {
            master.set_value(value);
            master.commit().unwrap();
        }
        prop_assert_eq!(slave.sync(master.version()), Ok(master.version()));
        prop_assert_eq!(slave.value(), master.value());
    }
}
