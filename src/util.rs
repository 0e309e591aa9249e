//! Small helpers shared across the crate.

/// Open a named profiling span that lasts until the end of the enclosing scope.
///
/// Spans are only recorded when the `tracy` feature is enabled
/// and a Tracy client is running, otherwise this does nothing.
#[macro_export]
macro_rules! tracy_span {
    ($name:expr, $fn_name:expr) => {
        tracy_client::Client::running()
            .map(|client| client.span_alloc(Some($name), $fn_name, file!(), line!(), 0))
    };
}
