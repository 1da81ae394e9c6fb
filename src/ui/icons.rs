//! Shared UI icons and emojis.
//!
//! Each icon has a plain-text fallback for terminals without emoji support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");
pub static PAUSE: Emoji<'_, '_> = Emoji("⏸️  ", "[PAUSE]");
pub static BLOCKER: Emoji<'_, '_> = Emoji("🚧 ", "[BLOCK]");
pub static WAITING: Emoji<'_, '_> = Emoji("⏳ ", "[WAIT]");

// TDD stages
pub static RED: Emoji<'_, '_> = Emoji("🔴 ", "[RED]");
pub static GREEN: Emoji<'_, '_> = Emoji("🟢 ", "[GREEN]");
pub static REFACTOR: Emoji<'_, '_> = Emoji("🔵 ", "[REFACTOR]");
pub static COMMIT: Emoji<'_, '_> = Emoji("📦 ", "[COMMIT]");

// Run and graph indicators
pub static GATE: Emoji<'_, '_> = Emoji("🚦 ", "[GATE]");
pub static WAVE: Emoji<'_, '_> = Emoji("🌊 ", "[W]");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
pub static PROGRESS: Emoji<'_, '_> = Emoji("📊 ", "[PROG]");
pub static FILE: Emoji<'_, '_> = Emoji("📄 ", "-");
