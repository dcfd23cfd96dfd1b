pub mod auth;
pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod forward;
pub mod limiter;
pub mod local_cache;
pub mod logger;
pub mod pipeline;
pub mod pricing;
pub mod redis_store;
pub mod registry;
pub mod server;

/// Install a panic hook that logs through the structured logger before the
/// default handler prints to stderr, so a crash is visible in `/status`'s
/// log table even when nothing is watching the process's stderr.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        crate::logger::error(
            "panic",
            &format!("panic: message='{}', location='{}'", message, location),
        );
        eprintln!("FATAL PANIC: {} at {}", message, location);
    }));
}
