pub mod fixtures;

pub use assertions::{assert_contains, assert_path_missing};
pub use fixtures::FakeCli;

#[ctor::ctor]
fn init() {
    ccli_e2e::init_test_logging();
}

#[macro_export]
macro_rules! test_log {
    ($($arg:tt)*) => {
        tracing::info!(target: "test", $($arg)*);
    };
}
