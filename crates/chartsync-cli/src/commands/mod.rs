pub mod cleanup;
pub mod common;
pub mod conflicts;
pub mod config;
pub mod export;
pub mod queue;
pub mod status;

pub use cleanup::{run_cleanup, run_clear};
pub use conflicts::{run_conflicts, run_resolve};
pub use config::run_config;
pub use export::{run_export, run_import};
pub use queue::{run_discard, run_queue, run_retry};
pub use status::run_status;
