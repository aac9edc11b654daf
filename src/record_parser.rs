//! Record parsing for profiler dot output
//!
//! The profiler's dot renderer (`pprof -dot`) prints one graph element per
//! line. Four line shapes carry information:
//!
//! ```text
//! N1 [label="main\n12 (1.2%)\rof 840 (84.0%)\r" id="node1" ...];   node, self + inclusive
//! N7 [label="memcpy\n55 (5.5%)\r" id="node7" ...];                 node, self only
//! N1 -> N7 [label=55, weight=...];                                  edge
//! Legend [shape=box,...,label="app\lTotal samples: 1000\l..."];     legend
//! ```
//!
//! Patterns are tried strictly in priority order and matching stops at the
//! first success. The self-only node pattern also matches lines of the
//! inclusive shape, so the order must not change.

use regex::{Captures, Regex};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Node declaration carrying both self and inclusive sample counts
pub const NODE_WITH_INCLUSIVE_PATTERN: &str =
    r#"^(N.*)\s\[label="(.*?)\\n([0-9]*)\s\((.*)%\)\\rof\s(.*)\s\((.*)%\)\\r"#;

/// Node declaration carrying only self sample counts
pub const NODE_SELF_ONLY_PATTERN: &str = r#"^(N.*)\s\[label="(.*)\\n([0-9]*)\s\((.*)%\)\\r"#;

/// Edge declaration with the call-count weight
pub const EDGE_PATTERN: &str = r"^(N.*)\s->\s(N.*)\s\[label=([0-9]*),";

/// Legend line with the run's total sample count
pub const LEGEND_PATTERN: &str = r"^Legend\s\[.*Total samples:\s([0-9]*).*\]";

/// Default pattern list, in priority order
pub const DEFAULT_PATTERNS: [&str; 4] = [
    NODE_WITH_INCLUSIVE_PATTERN,
    NODE_SELF_ONLY_PATTERN,
    EDGE_PATTERN,
    LEGEND_PATTERN,
];

/// Errors raised while classifying a line
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid record pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Line {line}: malformed {field} `{value}` in {kind} record")]
    MalformedField {
        line: usize,
        kind: RecordKind,
        field: &'static str,
        value: String,
    },
}

/// Classification of a line, indexed by pattern priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Pattern 0
    NodeWithInclusive,
    /// Pattern 1
    NodeSelfOnly,
    /// Pattern 2
    Edge,
    /// Pattern 3
    Legend,
    /// No pattern matched
    Ignore,
}

impl RecordKind {
    /// Map a pattern index to its classification
    pub fn from_priority(index: usize) -> Self {
        match index {
            0 => RecordKind::NodeWithInclusive,
            1 => RecordKind::NodeSelfOnly,
            2 => RecordKind::Edge,
            3 => RecordKind::Legend,
            _ => RecordKind::Ignore,
        }
    }

    /// Position of this kind in the pattern list (`None` for ignored lines)
    pub fn priority(self) -> Option<usize> {
        match self {
            RecordKind::NodeWithInclusive => Some(0),
            RecordKind::NodeSelfOnly => Some(1),
            RecordKind::Edge => Some(2),
            RecordKind::Legend => Some(3),
            RecordKind::Ignore => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::NodeWithInclusive => "node (self+inclusive)",
            RecordKind::NodeSelfOnly => "node (self)",
            RecordKind::Edge => "edge",
            RecordKind::Legend => "legend",
            RecordKind::Ignore => "ignored",
        };
        f.write_str(name)
    }
}

/// A node declaration
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// Profiler-assigned id (e.g. `N12`)
    pub id: String,
    /// Symbol name as printed by the renderer
    pub name: String,
    /// Absolute self amount, when it reads as a number
    pub self_samples: Option<f64>,
    /// Self sample percentage
    pub self_pct: f64,
    /// Line carried an inclusive amount (pattern 0)
    pub has_inclusive: bool,
    /// Absolute inclusive amount, when it reads as a number
    pub inclusive_samples: Option<f64>,
    /// Inclusive percentage (equal to `self_pct` for self-only records)
    pub coverage_pct: f64,
}

/// An edge declaration
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    pub from: String,
    pub to: String,
    pub weight: u64,
}

/// Typed event produced from one line of renderer output
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Node(NodeRecord),
    Edge(EdgeRecord),
    Legend { total_samples: u64 },
    Ignore,
}

impl Record {
    /// Classification of this record
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Node(node) if node.has_inclusive => {
                RecordKind::NodeWithInclusive
            }
            Record::Node(_) => RecordKind::NodeSelfOnly,
            Record::Edge(_) => RecordKind::Edge,
            Record::Legend { .. } => RecordKind::Legend,
            Record::Ignore => RecordKind::Ignore,
        }
    }
}

/// Ordered list of line matchers
#[derive(Debug, Clone)]
pub struct RecordParser {
    patterns: Vec<Regex>,
}

impl RecordParser {
    /// Create a parser with the default renderer patterns
    pub fn new() -> Result<Self, ParseError> {
        Self::with_patterns(DEFAULT_PATTERNS)
    }

    /// Create a parser from a custom pattern list
    ///
    /// Capture groups must follow the layout of the default patterns.
    pub fn with_patterns(patterns: [&str; 4]) -> Result<Self, ParseError> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Return the first matching pattern and its classification
    pub fn match_line<'t>(&self, line: &'t str) -> Option<(RecordKind, Captures<'t>)> {
        self.patterns
            .iter()
            .enumerate()
            .find_map(|(index, re)| re.captures(line).map(|caps| (index, caps)))
            .map(|(index, caps)| (RecordKind::from_priority(index), caps))
    }

    /// Classify a raw output line into a typed record
    ///
    /// `line_no` is only used for diagnostics. Lines matching no pattern
    /// yield [`Record::Ignore`]; a matching line with an unparsable number
    /// is an error.
    pub fn parse_line(&self, line_no: usize, line: &[u8]) -> Result<Record, ParseError> {
        let text = String::from_utf8_lossy(line);
        let Some((kind, caps)) = self.match_line(&text) else {
            return Ok(Record::Ignore);
        };

        let field = |group: usize| caps.get(group).map_or("", |m| m.as_str());
        let count = |group: usize, name: &'static str| parse_count(line_no, kind, name, field(group));
        let percent =
            |group: usize, name: &'static str| parse_percent(line_no, kind, name, field(group));

        let record = match kind {
            RecordKind::NodeWithInclusive => Record::Node(NodeRecord {
                id: field(1).to_string(),
                name: field(2).to_string(),
                self_samples: parse_amount(field(3)),
                self_pct: percent(4, "self percentage")?,
                has_inclusive: true,
                inclusive_samples: parse_amount(field(5)),
                coverage_pct: percent(6, "inclusive percentage")?,
            }),
            RecordKind::NodeSelfOnly => {
                let self_pct = percent(4, "self percentage")?;
                Record::Node(NodeRecord {
                    id: field(1).to_string(),
                    name: field(2).to_string(),
                    self_samples: parse_amount(field(3)),
                    self_pct,
                    has_inclusive: false,
                    inclusive_samples: None,
                    coverage_pct: self_pct,
                })
            }
            RecordKind::Edge => Record::Edge(EdgeRecord {
                from: field(1).to_string(),
                to: field(2).to_string(),
                weight: count(3, "call count")?,
            }),
            RecordKind::Legend => Record::Legend {
                total_samples: count(1, "total samples")?,
            },
            RecordKind::Ignore => Record::Ignore,
        };
        Ok(record)
    }
}

fn parse_count(
    line: usize,
    kind: RecordKind,
    field: &'static str,
    value: &str,
) -> Result<u64, ParseError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ParseError::MalformedField {
            line,
            kind,
            field,
            value: value.to_string(),
        })
}

/// Absolute amounts are informational; only percentages feed the graph
fn parse_amount(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|amount| amount.is_finite() && *amount >= 0.0)
}

fn parse_percent(
    line: usize,
    kind: RecordKind,
    field: &'static str,
    value: &str,
) -> Result<f64, ParseError> {
    match value.trim().parse::<f64>() {
        Ok(pct) if pct.is_finite() && pct >= 0.0 => Ok(pct),
        _ => Err(ParseError::MalformedField {
            line,
            kind,
            field,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> RecordParser {
        RecordParser::new().unwrap()
    }

    #[test]
    fn test_node_with_inclusive_counts() {
        let line = br#"N1 [label="main\n12 (1.2%)\rof 840 (84.0%)\r" id="node1" fontsize=10.0 shape=box];"#;
        let record = parser().parse_line(1, line).unwrap();

        assert_eq!(record.kind(), RecordKind::NodeWithInclusive);
        match record {
            Record::Node(node) => {
                assert_eq!(node.id, "N1");
                assert_eq!(node.name, "main");
                assert_eq!(node.self_samples, Some(12.0));
                assert_eq!(node.self_pct, 1.2);
                assert_eq!(node.inclusive_samples, Some(840.0));
                assert_eq!(node.coverage_pct, 84.0);
            }
            other => panic!("expected node record, got {:?}", other),
        }
    }

    #[test]
    fn test_node_self_only_uses_self_as_coverage() {
        let line = br#"N7 [label="memcpy\n55 (5.5%)\r" id="node7" fontsize=14.2 shape=box];"#;
        let record = parser().parse_line(7, line).unwrap();

        assert_eq!(record.kind(), RecordKind::NodeSelfOnly);
        match record {
            Record::Node(node) => {
                assert_eq!(node.id, "N7");
                assert_eq!(node.name, "memcpy");
                assert_eq!(node.self_samples, Some(55.0));
                assert_eq!(node.inclusive_samples, None);
                assert_eq!(node.coverage_pct, 5.5);
            }
            other => panic!("expected node record, got {:?}", other),
        }
    }

    #[test]
    fn test_fractional_inclusive_amount() {
        let line = br#"N1 [label="main\n12 (1.2%)\rof 840.5 (84.0%)\r"];"#;
        let record = parser().parse_line(1, line).unwrap();

        assert_eq!(record.kind(), RecordKind::NodeWithInclusive);
        match record {
            Record::Node(node) => {
                assert_eq!(node.inclusive_samples, Some(840.5));
                assert_eq!(node.coverage_pct, 84.0);
            }
            other => panic!("expected node record, got {:?}", other),
        }
    }

    #[test]
    fn test_unreadable_amount_is_not_fatal() {
        let line = br#"N2 [label="alloc\n (0.5%)\rof 1.2MB (3.0%)\r"];"#;
        match parser().parse_line(1, line).unwrap() {
            Record::Node(node) => {
                assert!(node.has_inclusive);
                assert_eq!(node.self_samples, None);
                assert_eq!(node.inclusive_samples, None);
                assert_eq!(node.self_pct, 0.5);
                assert_eq!(node.coverage_pct, 3.0);
            }
            other => panic!("expected node record, got {:?}", other),
        }
    }

    #[test]
    fn test_inclusive_pattern_takes_priority() {
        let line = r#"N3 [label="foo\n1 (0.1%)\rof 2 (0.2%)\r"];"#;
        let (kind, _) = parser().match_line(line).unwrap();
        assert_eq!(kind, RecordKind::NodeWithInclusive);
    }

    #[test]
    fn test_multiline_symbol_name() {
        let line = br#"N4 [label="std\nvector\npush_back\n3 (0.3%)\rof 9 (0.9%)\r"];"#;
        match parser().parse_line(4, line).unwrap() {
            Record::Node(node) => {
                assert_eq!(node.name, r"std\nvector\npush_back");
                assert_eq!(node.self_samples, Some(3.0));
                assert_eq!(node.coverage_pct, 0.9);
            }
            other => panic!("expected node record, got {:?}", other),
        }
    }

    #[test]
    fn test_edge_record() {
        let line = br#"N1 -> N7 [label=55, weight=100, style="setlinewidth(2.0)"];"#;
        let record = parser().parse_line(9, line).unwrap();
        assert_eq!(
            record,
            Record::Edge(EdgeRecord {
                from: "N1".to_string(),
                to: "N7".to_string(),
                weight: 55,
            })
        );
    }

    #[test]
    fn test_legend_record() {
        let line = br#"Legend [shape=box,fontsize=24,shape=plaintext,label="app\lTotal samples: 1000\lFocusing on: 1000\l"];"#;
        let record = parser().parse_line(2, line).unwrap();
        assert_eq!(
            record,
            Record::Legend {
                total_samples: 1000
            }
        );
    }

    #[test]
    fn test_unmatched_lines_are_ignored() {
        let p = parser();
        for line in [
            "digraph \"app; 1000 samples\" {",
            "node [width=0.375,height=0.25];",
            "}",
            "",
        ] {
            assert_eq!(p.parse_line(1, line.as_bytes()).unwrap(), Record::Ignore);
        }
    }

    #[test]
    fn test_malformed_count_is_an_error() {
        let line = br#"N1 -> N2 [label=, weight=3];"#;
        let err = parser().parse_line(42, line).unwrap_err();
        match err {
            ParseError::MalformedField { line, kind, field, .. } => {
                assert_eq!(line, 42);
                assert_eq!(kind, RecordKind::Edge);
                assert_eq!(field, "call count");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_malformed_percentage_is_an_error() {
        let line = br#"N1 [label="main\n12 (abc%)\r"];"#;
        let err = parser().parse_line(3, line).unwrap_err();
        assert!(err.to_string().contains("self percentage"));
    }

    #[test]
    fn test_invalid_custom_pattern() {
        let result = RecordParser::with_patterns(["(", "a", "b", "c"]);
        assert!(matches!(result, Err(ParseError::Pattern(_))));
    }

    #[test]
    fn test_priority_round_trip() {
        for index in 0..4 {
            assert_eq!(RecordKind::from_priority(index).priority(), Some(index));
        }
        assert_eq!(RecordKind::from_priority(9), RecordKind::Ignore);
    }
}
