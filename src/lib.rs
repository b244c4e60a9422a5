pub mod mumble;
pub mod transport;

/// Default verbosity when `RUST_LOG` is unset.
#[cfg(debug_assertions)]
pub fn log_level() -> log::LevelFilter {
    log::LevelFilter::Debug
}

#[cfg(not(debug_assertions))]
pub fn log_level() -> log::LevelFilter {
    log::LevelFilter::Info
}
