//! In-process unified diff, whitespace tolerant like `diff -w`.
//!
//! Lines are compared with all whitespace removed, but hunks print the
//! original lines.

use std::fmt::Write as _;
use std::ops::Range;

use nu_ansi_term::{Color, Style};
use similar::{capture_diff_slices, group_diff_ops, Algorithm, DiffTag};

const CONTEXT_RADIUS: usize = 3;

/// Unified diff of `old` against `new`. Returns an empty string when the two
/// only differ in whitespace.
pub fn unified_diff(old: &str, new: &str, old_label: &str, new_label: &str, color: bool) -> String {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let old_keys: Vec<String> = old_lines.iter().map(|l| squash(l)).collect();
    let new_keys: Vec<String> = new_lines.iter().map(|l| squash(l)).collect();

    let ops = capture_diff_slices(Algorithm::Myers, &old_keys, &new_keys);
    let groups = group_diff_ops(ops, CONTEXT_RADIUS);
    if groups.is_empty() {
        return String::new();
    }

    let paint = Painter { color };
    let mut out = String::new();
    paint.line(&mut out, Style::new().bold(), &format!("--- {old_label}"));
    paint.line(&mut out, Style::new().bold(), &format!("+++ {new_label}"));
    for group in groups {
        let (Some(first), Some(last)) = (group.first(), group.last()) else { continue };
        let old_range = first.old_range().start..last.old_range().end;
        let new_range = first.new_range().start..last.new_range().end;
        paint.line(
            &mut out,
            Color::Cyan.normal(),
            &format!("@@ -{} +{} @@", hunk_range(&old_range), hunk_range(&new_range)),
        );
        for op in &group {
            let (tag, o, n) = op.as_tag_tuple();
            match tag {
                DiffTag::Equal => {
                    for l in &old_lines[o] {
                        paint.line(&mut out, Style::new(), &format!(" {l}"));
                    }
                }
                DiffTag::Delete | DiffTag::Insert | DiffTag::Replace => {
                    for l in &old_lines[o] {
                        paint.line(&mut out, Color::Red.normal(), &format!("-{l}"));
                    }
                    for l in &new_lines[n] {
                        paint.line(&mut out, Color::Green.normal(), &format!("+{l}"));
                    }
                }
            }
        }
    }
    out
}

fn squash(line: &str) -> String {
    line.chars().filter(|c| !c.is_whitespace()).collect()
}

/// `start,len` in 1-based unified notation; an empty range points at the
/// line before it.
fn hunk_range(r: &Range<usize>) -> String {
    match r.len() {
        0 => format!("{},0", r.start),
        1 => format!("{}", r.start + 1),
        n => format!("{},{}", r.start + 1, n),
    }
}

struct Painter {
    color: bool,
}

impl Painter {
    fn line(&self, out: &mut String, style: Style, text: &str) {
        if self.color {
            let _ = writeln!(out, "{}", style.paint(text));
        } else {
            let _ = writeln!(out, "{text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_change_has_context() {
        let old = "a\nb\nc\nd\n";
        let new = "a\nb\nX\nd\n";
        let d = unified_diff(old, new, "old/x", "new/x", false);
        assert_eq!(d, "--- old/x\n+++ new/x\n@@ -1,4 +1,4 @@\n a\n b\n-c\n+X\n d\n");
    }

    #[test]
    fn whitespace_only_changes_are_ignored() {
        assert_eq!(unified_diff("a: 1\n", "a:    1\n", "o", "n", false), "");
        assert_eq!(unified_diff("same\n", "same\n", "o", "n", false), "");
    }

    #[test]
    fn pure_insertion_uses_empty_old_range() {
        let d = unified_diff("", "new\n", "o", "n", false);
        assert!(d.contains("@@ -0,0 +1 @@\n+new\n"), "d={d}");
    }

    #[test]
    fn colour_wraps_changed_lines() {
        let d = unified_diff("a\n", "b\n", "o", "n", true);
        assert!(d.contains(&Color::Red.normal().paint("-a").to_string()), "d={d:?}");
        assert!(d.contains(&Color::Green.normal().paint("+b").to_string()), "d={d:?}");
        assert!(d.contains("\u{1b}["));
    }
}
