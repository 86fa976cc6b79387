//! Shared plumbing for the `dapico-load` and `dapico-reboot` binaries.

/// `-v` turns on debug output; otherwise `RUST_LOG` applies, defaulting to
/// warnings only.
pub fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}
