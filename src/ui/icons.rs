//! Shared UI icons.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("\u{2705} ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("\u{274C} ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("\u{2728} ", "*");
pub static SKIP: Emoji<'_, '_> = Emoji("\u{23ED}\u{FE0F}  ", "[SKIP]");

// Session events
pub static BLOCKER: Emoji<'_, '_> = Emoji("\u{1F6A7} ", "[BLOCK]");
pub static PIVOT: Emoji<'_, '_> = Emoji("\u{1F504} ", "[PIVOT]");
pub static QUESTION: Emoji<'_, '_> = Emoji("\u{2753} ", "[?]");
pub static SAVE: Emoji<'_, '_> = Emoji("\u{1F4BE} ", "[SAVE]");
pub static LINK: Emoji<'_, '_> = Emoji("\u{1F517} ", "[PR]");
pub static PAUSE: Emoji<'_, '_> = Emoji("\u{23F8}\u{FE0F}  ", "[||]");

// Progress indicators
pub static PROGRESS: Emoji<'_, '_> = Emoji("\u{1F4CA} ", "[PROG]");
pub static RUNNING: Emoji<'_, '_> = Emoji("\u{25B6}\u{FE0F}  ", "[>]");
pub static CLOCK: Emoji<'_, '_> = Emoji("\u{23F1}\u{FE0F}  ", "[T]");
