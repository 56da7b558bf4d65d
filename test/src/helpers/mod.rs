pub mod assertions;
pub mod counter;
pub mod test_node;

pub use counter::{Counter, DIRTY_LABEL, DIRTY_VALUE};
pub use test_node::{connected_pair, init_logger, loopback_group, short_timeouts, TestNode};
