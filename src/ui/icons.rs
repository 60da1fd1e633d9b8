//! Shared UI icons.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");

// Mission flow
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static RETRY: Emoji<'_, '_> = Emoji("🔄 ", "[RETRY]");
pub static HAND: Emoji<'_, '_> = Emoji("✋ ", "[WAIT]");
pub static PAUSE: Emoji<'_, '_> = Emoji("⏸️  ", "[PAUSE]");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "[STOP]");
pub static RECOVERY: Emoji<'_, '_> = Emoji("🚑 ", "[RECOVER]");
