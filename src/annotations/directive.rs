// Inline limit directive: `#[competition_bench(min, max)]`
//
// Forms understood:
//
//   #[competition_bench]                 no limit stored yet
//   #[competition_bench(0.95, 1.20)]     stored limit
//   #[competition_bench(IGNORE, 1.20)]   ignored lower bound
//   #[competition_bench(_, 1.20)]        unset lower bound
//   #[competition_bench(baseline)]       baseline marker, never patched
//
// Bounds are written with two decimals. Only the text between the
// parentheses is ever replaced.

use crate::metrics::{MetricRange, IGNORED_VALUE};
use std::ops::Range;

pub const DIRECTIVE_NAME: &str = "competition_bench";
pub const IGNORED_LITERAL: &str = "IGNORE";
pub const EMPTY_LITERAL: &str = "_";
pub const BASELINE_LITERAL: &str = "baseline";

/// Decimals used for stored bounds
const STORED_DIGITS: usize = 2;

/// Parsed directive arguments
#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveArgs {
    /// `#[competition_bench]`
    None,
    /// `#[competition_bench(baseline)]`
    Baseline,
    /// `#[competition_bench(min, max)]`
    Limits(MetricRange),
}

/// A directive found in a source document
#[derive(Debug, Clone, PartialEq)]
pub struct DirectiveMatch {
    /// 0-based index of the line holding the directive
    pub line_index: usize,

    /// Parsed arguments, or the reason they could not be parsed
    pub args: Result<DirectiveArgs, String>,

    /// Byte range of the argument text (inside the parentheses), or the
    /// insertion point right after the directive name when there are none
    span: Range<usize>,

    has_parens: bool,
}

impl DirectiveMatch {
    /// Rewrite `line` so the directive stores `range`, leaving every other
    /// byte untouched
    pub fn patch_line(&self, line: &str, range: &MetricRange) -> String {
        let args = render_args(range);
        if self.has_parens {
            format!("{}{}{}", &line[..self.span.start], args, &line[self.span.end..])
        } else {
            format!("{}({}){}", &line[..self.span.start], args, &line[self.span.start..])
        }
    }
}

/// Find the directive for a method defined at `method_line` (1-based)
///
/// Walks up from the reported line to the `fn` line, then through the
/// attribute block above it (attributes, comments, blank lines).
pub fn find_directive(lines: &[String], method_line: u32) -> Option<DirectiveMatch> {
    if lines.is_empty() {
        return None;
    }
    let start = (method_line.max(1) as usize - 1).min(lines.len() - 1);

    let fn_index = (0..=start)
        .rev()
        .find(|&i| match_line(&lines[i]).is_some() || contains_fn_keyword(&lines[i]))?;

    for index in (0..=fn_index).rev() {
        let text = lines[index].trim();
        if index != fn_index && !is_attribute_block_line(text) {
            break;
        }
        if let Some(mut found) = match_line(&lines[index]) {
            found.line_index = index;
            return Some(found);
        }
    }
    None
}

/// Parse the text between the directive's parentheses
pub fn parse_args(text: &str) -> Result<DirectiveArgs, String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(DirectiveArgs::None);
    }
    if text == BASELINE_LITERAL {
        return Ok(DirectiveArgs::Baseline);
    }

    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    let [min, max] = parts.as_slice() else {
        return Err(format!(
            "expected two bounds or '{BASELINE_LITERAL}', got '{text}'"
        ));
    };

    let range = MetricRange::new(parse_bound(min)?, parse_bound(max)?).map_err(|e| e.to_string())?;
    Ok(DirectiveArgs::Limits(range))
}

/// Render the argument text for a range, e.g. `0.95, 1.20`
pub fn render_args(range: &MetricRange) -> String {
    format!("{}, {}", format_bound(range.min()), format_bound(range.max()))
}

/// Render one stored bound
pub fn format_bound(value: f64) -> String {
    if value.is_nan() {
        EMPTY_LITERAL.to_string()
    } else if value.is_infinite() {
        (if value > 0.0 { "inf" } else { "-inf" }).to_string()
    } else if value < 0.0 {
        IGNORED_LITERAL.to_string()
    } else {
        format!("{:.*}", STORED_DIGITS, value)
    }
}

fn parse_bound(text: &str) -> Result<f64, String> {
    match text {
        EMPTY_LITERAL => Ok(f64::NAN),
        IGNORED_LITERAL => Ok(IGNORED_VALUE),
        "inf" | "+inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        _ => text
            .parse::<f64>()
            .map_err(|_| format!("invalid bound '{text}'")),
    }
}

fn match_line(line: &str) -> Option<DirectiveMatch> {
    let name_pos = line.find(DIRECTIVE_NAME)?;
    if !line[..name_pos].trim_end().ends_with("#[") {
        return None;
    }

    let name_end = name_pos + DIRECTIVE_NAME.len();
    let rest = &line[name_end..];
    let trimmed = rest.trim_start();
    let offset = name_end + (rest.len() - trimmed.len());

    if trimmed.starts_with(']') {
        return Some(DirectiveMatch {
            line_index: 0,
            args: Ok(DirectiveArgs::None),
            span: name_end..name_end,
            has_parens: false,
        });
    }

    if trimmed.starts_with('(') {
        let open = offset + 1;
        let close = open + line[open..].find(')')?;
        return Some(DirectiveMatch {
            line_index: 0,
            args: parse_args(&line[open..close]),
            span: open..close,
            has_parens: true,
        });
    }

    None
}

fn contains_fn_keyword(line: &str) -> bool {
    let code = line.split("//").next().unwrap_or("");
    code.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|word| word == "fn")
}

fn is_attribute_block_line(text: &str) -> bool {
    text.is_empty()
        || text.starts_with("#[")
        || text.starts_with("//")
        || text.starts_with("/*")
        || text.starts_with('*')
}
