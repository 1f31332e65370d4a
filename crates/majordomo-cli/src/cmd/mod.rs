//! Command implementations by role.

pub mod broker;
pub mod client;
pub mod worker;

/// Runtime for the async commands.
pub(crate) fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            crate::ui::fail(&format!("Failed to create Tokio runtime: {e}"));
            std::process::exit(1);
        }
    }
}
