/// Assert that an error resolves to the expected code and that the node's
/// error registry describes it
#[macro_export]
macro_rules! assert_error_code {
    ($node:expr, $error:expr, $code:expr) => {{
        use coterie_shared::ErrorCoded;
        let error = &$error;
        assert_eq!(error.code(), $code, "unexpected code for {:?}", error);
        assert!(
            $node.context().errors().get_string($code).is_some(),
            "no description registered for code 0x{:x}",
            $code
        );
    }};
}

/// Polls `$condition` until it holds or `$timeout` passes
#[macro_export]
macro_rules! wait_for {
    ($timeout:expr, $condition:expr) => {{
        let deadline = std::time::Instant::now() + $timeout;
        loop {
            if $condition {
                break true;
            }
            if std::time::Instant::now() > deadline {
                break false;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }};
}
