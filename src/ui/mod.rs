pub mod icons;
pub mod render;
pub mod run_progress;

pub use run_progress::{RunUI, UiMode};
