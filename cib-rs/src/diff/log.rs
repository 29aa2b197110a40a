//! Human readable rendering of diffs for the log.

use tracing::{debug, error, info, trace, warn, Level};

use super::Diff;
use crate::constants::{ATTR_HIDDEN, DIFF_MARKER};
use crate::node::Element;

/// Renders `diff` as log lines.
///
/// Removed content is prefixed with `-` and added content with `+`. The
/// root of each actual change is marked with a doubled sign (`--`, `++`)
/// and shown in full. In `short` mode the unchanged ancestors leading to a
/// change are left out.
pub fn format_diff(diff: &Diff, short: bool) -> Vec<String> {
    let mut lines = Vec::new();
    let sections = [(diff.removed_section(), '-'), (diff.added_section(), '+')];
    for (section, sign) in sections {
        let Some(section) = section else { continue };
        for (i, change) in section.children().iter().enumerate() {
            if i > 0 {
                lines.push(format!(" {sign}{sign}{sign} "));
            }
            let mut writer = DiffWriter {
                lines: &mut lines,
                sign,
                short,
            };
            writer.element(change, 0, false);
        }
    }
    lines
}

/// Logs `diff` at `level`, one event per line.
///
/// Below DEBUG the short form is used.
pub fn log_diff(level: Level, diff: &Diff) {
    if !level_enabled(level) {
        return;
    }
    let short = level < Level::DEBUG;
    for line in format_diff(diff, short) {
        match level {
            Level::ERROR => error!("{}", line),
            Level::WARN => warn!("{}", line),
            Level::INFO => info!("{}", line),
            Level::DEBUG => debug!("{}", line),
            _ => trace!("{}", line),
        }
    }
}

fn level_enabled(level: Level) -> bool {
    match level {
        Level::ERROR => tracing::enabled!(Level::ERROR),
        Level::WARN => tracing::enabled!(Level::WARN),
        Level::INFO => tracing::enabled!(Level::INFO),
        Level::DEBUG => tracing::enabled!(Level::DEBUG),
        _ => tracing::enabled!(Level::TRACE),
    }
}

struct DiffWriter<'a> {
    lines: &'a mut Vec<String>,
    sign: char,
    short: bool,
}

impl DiffWriter<'_> {
    fn element(&mut self, element: &Element, depth: usize, mut in_change: bool) {
        if !in_change && (!element.has_children() || element.has_attr(DIFF_MARKER)) {
            in_change = true;
        }

        if self.short && !in_change {
            for child in element.children() {
                self.element(child, depth + 1, in_change);
            }
            return;
        }

        let prefix = self.prefix(in_change);
        let indent = "  ".repeat(depth);
        let mut line = format!("{prefix}{indent}<{}", element.name());

        let hidden: Vec<&str> = element
            .attr(ATTR_HIDDEN)
            .map(|h| {
                h.split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        for (name, value) in element.attributes() {
            if name == DIFF_MARKER {
                continue;
            }
            let value = if hidden.contains(&name) { "*****" } else { value };
            line.push_str(&format!(" {name}=\"{value}\""));
        }

        if !element.has_children() {
            line.push_str("/>");
            self.lines.push(line);
            return;
        }

        line.push('>');
        self.lines.push(line);
        for child in element.children() {
            self.element(child, depth + 1, in_change);
        }
        self.lines
            .push(format!("{prefix}{indent}</{}>", element.name()));
    }

    fn prefix(&self, in_change: bool) -> String {
        if in_change {
            format!("{0}{0} ", self.sign)
        } else {
            format!("{} ", self.sign)
        }
    }
}
