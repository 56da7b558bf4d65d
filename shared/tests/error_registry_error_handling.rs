/// Integration tests for the error registry
///
/// Every runtime error carries a numeric code; the registry turns codes
/// into text and is shared by every node created from one context.
use std::{sync::Arc, thread};

use coterie_shared::{
    ConnectionError, Context, DispatchError, ErrorCoded, ErrorRegistry, PacketError, PacketType,
    ERROR_CONNECTION_CONNECT, ERROR_CUSTOM, ERROR_DISPATCH_REJECTED, ERROR_NONE,
};

#[test]
fn test_default_registry_has_no_error_entry() {
    let registry = ErrorRegistry::new();
    assert_eq!(registry.get_string(ERROR_NONE).as_deref(), Some("No error"));
    assert!(!registry.is_empty());
}

#[test]
fn test_empty_registry_describes_unknown_codes() {
    let registry = ErrorRegistry::empty();
    assert_eq!(registry.get_string(ERROR_CONNECTION_CONNECT), None);
    assert_eq!(registry.describe(0x0100), "Unknown error 0x100");
}

#[test]
fn test_codes_are_distinct_across_families() {
    let codes = [
        ConnectionError::Closed.code(),
        ConnectionError::NoPendingRead.code(),
        DispatchError::QueueClosed { command: 0 }.code(),
        DispatchError::UnknownCommand {
            packet_type: PacketType::Node,
            command: 0,
        }
        .code(),
        DispatchError::Packet(PacketError::MissingObjectId { size: 0 }).code(),
    ];
    for (index, code) in codes.iter().enumerate() {
        assert!(*code < ERROR_CUSTOM);
        assert!(!codes[index + 1..].contains(code), "duplicate code {:x}", code);
    }
}

#[test]
fn test_application_strings_override_defaults() {
    let registry = ErrorRegistry::new();
    let code = DispatchError::Rejected {
        command: 1,
        reason: String::new(),
    }
    .code();
    assert_eq!(code, ERROR_DISPATCH_REJECTED);

    registry.set_string(code, "Refused by application");
    assert_eq!(registry.describe(code), "Refused by application");
}

#[test]
fn test_bulk_registration() {
    let registry = ErrorRegistry::empty();
    registry.set_strings(&[(ERROR_CUSTOM, "First"), (ERROR_CUSTOM + 1, "Second")]);
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.describe(ERROR_CUSTOM + 1), "Second");
}

#[test]
fn test_registry_is_shared_between_threads() {
    let context = Context::new();
    let registry_context = context.clone();
    let writer = thread::spawn(move || {
        registry_context
            .errors()
            .set_string(ERROR_CUSTOM + 7, "Set from another thread");
    });
    writer.join().unwrap();
    assert_eq!(
        context.errors().describe(ERROR_CUSTOM + 7),
        "Set from another thread"
    );

    let registry = Arc::new(ErrorRegistry::empty());
    let handles: Vec<_> = (0..4)
        .map(|index| {
            let registry = registry.clone();
            thread::spawn(move || registry.set_string(ERROR_CUSTOM + index, "x"))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(registry.len(), 4);
}
