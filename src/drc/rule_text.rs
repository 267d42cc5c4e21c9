//! Rule-line text format, shared by factory tables and override deltas
//!
//! One rule per line; `#` starts a comment. The first token is the rule kind,
//! followed by its operands (layers or node prototype), its value(s), and
//! optional `key=value` or flag qualifiers:
//!
//! ```text
//! minarea metal-1 4 name=M1.A.1
//! spacing metal-1 metal-1 3 name=M1.S.1 connected
//! spacing via via 2 name=V.S.2 multicut=4 unconnected warning
//! nodesize pin 2 2 name=PIN.SZ
//! delete minarea metal-2        # override-only
//! ```

use thiserror::Error;

use super::rules::{
    Connectivity, EdgeRule, ExtensionRule, ForbiddenNode, LayerLimit, NodeSizeRule, Rule, RuleKind,
    SpacingRule,
};
use super::types::Severity;
use crate::layout::{LayerId, Technology};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuleError {
    #[error("rule line {line} `{text}`: {reason}")]
    Malformed {
        line: usize,
        text: String,
        reason: String,
    },
    #[error("rule line {line}: unknown layer `{layer}`")]
    UnknownLayer { line: usize, layer: String },
    #[error("rule line {line}: no rule matching `{key}` to delete")]
    NoSuchRule { line: usize, key: String },
    #[error("technology `{technology}` has no foundry `{foundry}`")]
    UnknownFoundry { technology: String, foundry: String },
}

/// One parsed line
#[derive(Debug, Clone, PartialEq)]
pub enum RuleLine {
    Set(Rule),
    /// Remove the rule with this identity
    Delete(String),
}

/// Strip comments and collapse whitespace; empty result means "no content"
fn normalize_line(text: &str) -> String {
    let content = text.split('#').next().unwrap_or("");
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct LineParser<'a> {
    line: usize,
    text: &'a str,
    tech: &'a Technology,
}

impl<'a> LineParser<'a> {
    fn malformed<T>(&self, reason: impl Into<String>) -> Result<T, RuleError> {
        Err(RuleError::Malformed {
            line: self.line,
            text: self.text.to_string(),
            reason: reason.into(),
        })
    }

    fn layer(&self, token: Option<&str>) -> Result<LayerId, RuleError> {
        let Some(token) = token else {
            return self.malformed("missing layer");
        };
        let id = LayerId::from(token);
        if self.tech.layer(&id).is_none() {
            return Err(RuleError::UnknownLayer {
                line: self.line,
                layer: token.to_string(),
            });
        }
        Ok(id)
    }

    fn node(&self, token: Option<&str>) -> Result<String, RuleError> {
        match token {
            Some(t) => Ok(t.to_string()),
            None => self.malformed("missing node prototype"),
        }
    }

    fn number(&self, token: Option<&str>) -> Result<f64, RuleError> {
        let Some(token) = token else {
            return self.malformed("missing value");
        };
        match token.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
            _ => self.malformed(format!("invalid value `{}`", token)),
        }
    }

    fn parse(&self, with_values: bool, tokens: &[&str]) -> Result<Rule, RuleError> {
        let Some((&head, rest)) = tokens.split_first() else {
            return self.malformed("empty rule");
        };
        let Some(kind) = RuleKind::from_keyword(head) else {
            return self.malformed(format!("unknown rule kind `{}`", head));
        };
        let mut it = rest.iter().copied();

        // Operands, then values
        let mut layers: Vec<LayerId> = Vec::new();
        let mut node = None;
        let operand_layers = match kind {
            RuleKind::MinWidth | RuleKind::MinArea | RuleKind::MinEnclosedArea => 1,
            RuleKind::Spacing | RuleKind::Extension | RuleKind::Edge => 2,
            RuleKind::Forbidden | RuleKind::NodeSize => 0,
        };
        for _ in 0..operand_layers {
            layers.push(self.layer(it.next())?);
        }
        if matches!(kind, RuleKind::Forbidden | RuleKind::NodeSize) {
            node = Some(self.node(it.next())?);
        }
        let value_count = match kind {
            RuleKind::Forbidden => 0,
            RuleKind::NodeSize => 2,
            _ => 1,
        };
        let mut values = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            values.push(if with_values { self.number(it.next())? } else { 0.0 });
        }

        // Qualifiers
        let mut name = None;
        let mut severity = Severity::Error;
        let mut connectivity = Connectivity::Any;
        let mut multi_cut = None;
        let mut min_width = None;
        let mut min_length = None;
        let mut node_qualifier = None;
        let mut gate = false;
        for token in it {
            let (key, val) = match token.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (token, None),
            };
            let spacing_only = |this: &Self| {
                if kind == RuleKind::Spacing {
                    Ok(())
                } else {
                    this.malformed(format!("`{}` only applies to spacing rules", key))
                }
            };
            match (key.to_ascii_lowercase().as_str(), val) {
                ("name", Some(v)) if !v.is_empty() => name = Some(v.to_string()),
                ("warning", None) => severity = Severity::Warning,
                ("connected", None) => {
                    spacing_only(self)?;
                    connectivity = Connectivity::Connected;
                }
                ("unconnected", None) => {
                    spacing_only(self)?;
                    connectivity = Connectivity::Unconnected;
                }
                ("multicut", Some(v)) => {
                    spacing_only(self)?;
                    match v.parse::<u32>() {
                        Ok(n) => multi_cut = Some(n),
                        Err(_) => return self.malformed(format!("invalid cut count `{}`", v)),
                    }
                }
                ("width", Some(v)) => {
                    spacing_only(self)?;
                    min_width = Some(self.number(Some(v))?);
                }
                ("length", Some(v)) => {
                    spacing_only(self)?;
                    min_length = Some(self.number(Some(v))?);
                }
                ("node", Some(v)) if !v.is_empty() => {
                    spacing_only(self)?;
                    node_qualifier = Some(v.to_string());
                }
                ("gate", None) if kind == RuleKind::Extension => gate = true,
                _ => return self.malformed(format!("unexpected token `{}`", token)),
            }
        }

        let mut operands: Vec<String> = layers.iter().map(|l| l.to_string()).collect();
        operands.extend(node.clone());
        let name = name.unwrap_or_else(|| format!("{} {}", kind, operands.join(" ")));
        let pair = || (layers[0].clone(), layers[1].clone());

        Ok(match kind {
            RuleKind::MinWidth | RuleKind::MinArea | RuleKind::MinEnclosedArea => {
                let limit = LayerLimit {
                    layer: layers[0].clone(),
                    value: values[0],
                    name,
                    severity,
                };
                match kind {
                    RuleKind::MinWidth => Rule::MinWidth(limit),
                    RuleKind::MinArea => Rule::MinArea(limit),
                    _ => Rule::MinEnclosedArea(limit),
                }
            }
            RuleKind::Spacing => Rule::Spacing(SpacingRule {
                layers: pair(),
                value: values[0],
                name,
                severity,
                connectivity,
                multi_cut,
                min_width,
                min_length,
                node: node_qualifier,
            }),
            RuleKind::Extension => Rule::Extension(ExtensionRule {
                layers: pair(),
                value: values[0],
                name,
                severity,
                gate,
            }),
            RuleKind::Edge => Rule::Edge(EdgeRule {
                layers: pair(),
                value: values[0],
                name,
                severity,
            }),
            RuleKind::Forbidden => Rule::Forbidden(ForbiddenNode {
                node: node.unwrap_or_default(),
                name,
                severity,
            }),
            RuleKind::NodeSize => Rule::NodeSize(NodeSizeRule {
                node: node.unwrap_or_default(),
                width: values[0],
                height: values[1],
                name,
                severity,
            }),
        })
    }
}

/// Parse one line (1-based `line` for messages). `Ok(None)` for blank/comment lines.
pub fn parse_rule_line(line: usize, text: &str, tech: &Technology) -> Result<Option<RuleLine>, RuleError> {
    let normalized = normalize_line(text);
    if normalized.is_empty() {
        return Ok(None);
    }
    let tokens: Vec<&str> = normalized.split(' ').collect();
    let parser = LineParser { line, text, tech };
    if tokens[0].eq_ignore_ascii_case("delete") {
        let rule = parser.parse(false, &tokens[1..])?;
        return Ok(Some(RuleLine::Delete(rule.identity())));
    }
    parser.parse(true, &tokens).map(|r| Some(RuleLine::Set(r)))
}

/// Parse a factory rule table. `delete` lines are not allowed here.
pub fn parse_rule_table(text: &str, tech: &Technology) -> Result<Vec<Rule>, RuleError> {
    let mut rules: Vec<Rule> = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        match parse_rule_line(i + 1, raw, tech)? {
            Some(RuleLine::Set(rule)) => upsert(&mut rules, rule),
            Some(RuleLine::Delete(_)) => {
                return Err(RuleError::Malformed {
                    line: i + 1,
                    text: raw.to_string(),
                    reason: "delete is only valid in overrides".to_string(),
                })
            }
            None => {}
        }
    }
    Ok(rules)
}

fn upsert(rules: &mut Vec<Rule>, rule: Rule) {
    let key = rule.identity();
    match rules.iter_mut().find(|r| r.identity() == key) {
        Some(existing) => *existing = rule,
        None => rules.push(rule),
    }
}

/// Ordered override deltas for one technology.
///
/// Two sets are equal iff their serialized difference strings are equal.
#[derive(Debug, Clone, Default)]
pub struct RuleOverrideSet {
    /// Non-empty normalized lines with their 1-based line in the source text
    lines: Vec<(usize, String)>,
}

impl RuleOverrideSet {
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text
                .lines()
                .enumerate()
                .map(|(i, l)| (i + 1, normalize_line(l)))
                .filter(|(_, l)| !l.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Canonical serialized difference string
    pub fn diff_string(&self) -> String {
        self.lines
            .iter()
            .map(|(_, l)| l.as_str())
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Apply the deltas, in order, on top of `base`
    pub fn apply(&self, base: Vec<Rule>, tech: &Technology) -> Result<Vec<Rule>, RuleError> {
        let mut rules = base;
        for (line_no, line) in &self.lines {
            let line_no = *line_no;
            match parse_rule_line(line_no, line, tech)? {
                Some(RuleLine::Set(rule)) => upsert(&mut rules, rule),
                Some(RuleLine::Delete(key)) => {
                    let before = rules.len();
                    rules.retain(|r| r.identity() != key);
                    if rules.len() == before {
                        return Err(RuleError::NoSuchRule { line: line_no, key });
                    }
                }
                None => {}
            }
        }
        Ok(rules)
    }
}

impl PartialEq for RuleOverrideSet {
    fn eq(&self, other: &Self) -> bool {
        self.diff_string() == other.diff_string()
    }
}

impl Eq for RuleOverrideSet {}
