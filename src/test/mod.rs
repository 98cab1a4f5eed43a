
pub(crate) use fake_server::FakeServer;

/// Routes driver logs into the test harness output.
pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}
