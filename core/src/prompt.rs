//! Recognizes the runtime's interactive permission prompt.
//!
//! The prompt wording is not a schema the runtime guarantees, so everything
//! that touches it is confined to this module: a wording change upstream
//! fails a specific test here instead of silently misclassifying requests.
//!
//! On Deno < 1.31.0 a prompt looks like
//!
//! ```text
//! ⚠️  ┌ Deno requests net access to "0.0.0.0:8080".
//!    ├ Requested by `Deno.listen()` API
//!    ├ Run again with --allow-net to bypass this prompt.
//!    └ Allow? [y/n] (y = yes, allow; n = no, deny) >
//! ```
//!
//! and on Deno >= 1.31.0 like
//!
//! ```text
//! ┌ ⚠️  Deno requests net access to "0.0.0.0:8080".
//! ├ Requested by `Deno.listen()` API
//! ├ Run again with --allow-net to bypass this prompt.
//! └ Allow? [y/n] (y = yes, allow; n = no, deny) >
//! ```

use std::sync::LazyLock;

use regex::Regex;

use crate::permission::PermissionDescriptor;

/// First-line markers of a permission prompt block, one per known wording.
pub const PROMPT_START_MARKERS: [&str; 2] = ["⚠️  ┌ Deno requests ", "┌ ⚠️  Deno requests "];

/// The runtime stops and waits for a `y`/`n` line after printing this.
pub const PROMPT_TERMINATOR: &str = "(y = yes, allow; n = no, deny) > ";

static HRTIME: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::expect_used)]
    Regex::new(r"Deno requests access to high precision time\.").expect("prompt regex is valid")
});

static ACCESS_TO: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::expect_used)]
    Regex::new(r#"Deno requests (.+) access to "(.+)"\."#).expect("prompt regex is valid")
});

static ALL_ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::expect_used)]
    Regex::new(r"Deno requests (.+) access\.").expect("prompt regex is valid")
});

/// True when `line` opens a permission prompt block.
pub fn is_prompt_start(line: &str) -> bool {
    PROMPT_START_MARKERS
        .iter()
        .any(|marker| line.starts_with(marker))
}

/// Matches one diagnostic line against the fixed prompt templates.
/// `None` means "not a recognizable permission request".
pub fn parse_prompt_line(line: &str) -> Option<PermissionDescriptor> {
    if HRTIME.is_match(line) {
        return Some(PermissionDescriptor::hrtime());
    }

    if let Some(captures) = ACCESS_TO.captures(line) {
        let name = captures.get(1)?.as_str();
        let target = captures.get(2)?.as_str();
        return PermissionDescriptor::from_parts(name, target);
    }

    if let Some(captures) = ALL_ACCESS.captures(line) {
        let name = captures.get(1)?.as_str();
        return PermissionDescriptor::from_parts(name, "");
    }

    None
}
