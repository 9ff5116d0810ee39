//! Line command parser.
//!
//! A structured crow line carries one or more subcommands separated by `^^`:
//!
//! ```text
//! line    := subcmd ('^^' subcmd)*
//! subcmd  := name '(' arglist ')'
//! arglist := arg (',' arg)*
//! ```
//!
//! Arguments stay strings. Splitting is literal: a `,` inside a nested
//! expression still splits, and every trailing `)` is stripped rather than
//! only the balancing one. Handlers downstream rely on exactly this split.

/// Separator between subcommands on one line.
pub const SEPARATOR: &str = "^^";

/// One `name(args)` unit parsed out of a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subcommand {
    pub name: String,
    pub args: Vec<String>,
}

impl Subcommand {
    /// Parse a single segment. Returns `None` when the segment has no `(`.
    pub fn parse(segment: &str) -> Option<Self> {
        let (name, rest) = segment.trim_end().split_once('(')?;
        let args = rest
            .trim_end_matches(')')
            .split(',')
            .map(str::to_string)
            .collect();

        Some(Self {
            name: name.to_string(),
            args,
        })
    }

    /// First argument parsed as a 1-based channel number.
    pub fn channel(&self) -> Option<usize> {
        let index: i64 = self.args.first()?.trim().parse().ok()?;
        usize::try_from(index).ok().filter(|&i| i >= 1)
    }
}

/// Whether a line is structured (contains the subcommand separator).
pub fn is_structured(line: &str) -> bool {
    line.contains(SEPARATOR)
}

/// Split a line into its subcommands.
///
/// Lines without `^^` yield nothing; they are free-form result text.
/// Segments without a `(` are skipped.
pub fn parse_line(line: &str) -> Vec<Subcommand> {
    if !is_structured(line) {
        return Vec::new();
    }

    line.split(SEPARATOR).filter_map(Subcommand::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sub(name: &str, args: &[&str]) -> Subcommand {
        Subcommand {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_basic() {
        assert_eq!(
            Subcommand::parse("name(a,b,c)"),
            Some(sub("name", &["a", "b", "c"]))
        );
    }

    #[test]
    fn test_parse_empty_args_yields_single_empty_string() {
        assert_eq!(Subcommand::parse("ready()"), Some(sub("ready", &[""])));
    }

    #[test]
    fn test_parse_without_paren_is_skipped() {
        assert_eq!(Subcommand::parse("hello"), None);
        assert_eq!(Subcommand::parse(""), None);
    }

    #[test]
    fn test_parse_trims_trailing_whitespace_only() {
        assert_eq!(
            Subcommand::parse("stream(1, 2.5) \r"),
            Some(sub("stream", &["1", " 2.5"]))
        );
    }

    #[test]
    fn test_parse_keeps_literal_commas_and_strips_all_trailing_parens() {
        // Nested expressions are not paren-aware.
        assert_eq!(
            Subcommand::parse("f(g(1,2))"),
            Some(sub("f", &["g(1", "2"]))
        );
    }

    #[test]
    fn test_parse_missing_close_paren() {
        assert_eq!(Subcommand::parse("pub(x"), Some(sub("pub", &["x"])));
    }

    #[test]
    fn test_parse_line_multiple() {
        assert_eq!(
            parse_line("stream(1,2.5)^^change(2,3)"),
            vec![sub("stream", &["1", "2.5"]), sub("change", &["2", "3"])]
        );
    }

    #[test]
    fn test_parse_line_leading_separator() {
        assert_eq!(
            parse_line("^^ii.jf.event(1,0)"),
            vec![sub("ii.jf.event", &["1", "0"])]
        );
    }

    #[test]
    fn test_parse_line_free_text_yields_nothing() {
        assert!(parse_line("> ready").is_empty());
        assert!(parse_line("print(1)").is_empty());
        assert!(parse_line("").is_empty());
    }

    #[test]
    fn test_parse_line_skips_malformed_segments() {
        assert_eq!(
            parse_line("junk^^ready()^^more junk"),
            vec![sub("ready", &[""])]
        );
    }

    #[test]
    fn test_channel() {
        assert_eq!(sub("stream", &["1", "0.5"]).channel(), Some(1));
        assert_eq!(sub("stream", &["12"]).channel(), Some(12));
        assert_eq!(sub("stream", &[" 2"]).channel(), Some(2));
        assert_eq!(sub("stream", &["0"]).channel(), None);
        assert_eq!(sub("stream", &["-1"]).channel(), None);
        assert_eq!(sub("stream", &["x"]).channel(), None);
        assert_eq!(sub("stream", &["1.5"]).channel(), None);
        assert_eq!(sub("stream", &[]).channel(), None);
    }
}
