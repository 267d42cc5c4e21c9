//! Design rules and rule-set lookups
//!
//! Each rule kind carries only the fields it needs. A `RuleSet` is the
//! resolved, immutable rule table for one technology under its selected
//! foundry with overrides applied.

use serde::Serialize;
use std::fmt;

use super::types::Severity;
use crate::layout::LayerId;

/// Rule kinds, also the leading keyword of a rule line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    MinWidth,
    MinArea,
    MinEnclosedArea,
    Spacing,
    Extension,
    Edge,
    Forbidden,
    NodeSize,
}

impl RuleKind {
    pub const ALL: [RuleKind; 8] = [
        RuleKind::MinWidth,
        RuleKind::MinArea,
        RuleKind::MinEnclosedArea,
        RuleKind::Spacing,
        RuleKind::Extension,
        RuleKind::Edge,
        RuleKind::Forbidden,
        RuleKind::NodeSize,
    ];

    pub fn keyword(&self) -> &'static str {
        match self {
            RuleKind::MinWidth => "minwidth",
            RuleKind::MinArea => "minarea",
            RuleKind::MinEnclosedArea => "minenclosedarea",
            RuleKind::Spacing => "spacing",
            RuleKind::Extension => "extension",
            RuleKind::Edge => "edge",
            RuleKind::Forbidden => "forbidden",
            RuleKind::NodeSize => "nodesize",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.keyword().eq_ignore_ascii_case(word))
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Single-layer threshold (minimum width, area or enclosed area)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerLimit {
    pub layer: LayerId,
    pub value: f64,
    pub name: String,
    pub severity: Severity,
}

/// Connectivity qualifier of a spacing rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    #[default]
    Any,
    Connected,
    Unconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpacingRule {
    pub layers: (LayerId, LayerId),
    pub value: f64,
    pub name: String,
    pub severity: Severity,
    pub connectivity: Connectivity,
    /// Applies when at least this many cuts are involved
    pub multi_cut: Option<u32>,
    /// Wide-metal variant: applies when the widest dimension reaches this
    pub min_width: Option<f64>,
    /// Applies when the parallel run length reaches this
    pub min_length: Option<f64>,
    /// Restricts the rule to geometry belonging to this node prototype
    pub node: Option<String>,
}

impl SpacingRule {
    fn applies(
        &self,
        ctx1: Option<&str>,
        ctx2: Option<&str>,
        connected: bool,
        multi_cut_count: u32,
        widest: f64,
        length: f64,
    ) -> bool {
        let conn_ok = match self.connectivity {
            Connectivity::Any => true,
            Connectivity::Connected => connected,
            Connectivity::Unconnected => !connected,
        };
        conn_ok
            && self.multi_cut.map_or(true, |n| multi_cut_count >= n)
            && self.min_width.map_or(true, |w| widest >= w)
            && self.min_length.map_or(true, |l| length >= l)
            && self
                .node
                .as_deref()
                .map_or(true, |n| ctx1 == Some(n) || ctx2 == Some(n))
    }

    /// Number of qualifiers; more qualifiers means a more specific rule
    fn specificity(&self) -> usize {
        usize::from(self.connectivity != Connectivity::Any)
            + usize::from(self.multi_cut.is_some())
            + usize::from(self.min_width.is_some())
            + usize::from(self.min_length.is_some())
            + usize::from(self.node.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtensionRule {
    pub layers: (LayerId, LayerId),
    pub value: f64,
    pub name: String,
    pub severity: Severity,
    /// Transistor-gate extension rather than a generic extension
    pub gate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeRule {
    pub layers: (LayerId, LayerId),
    pub value: f64,
    pub name: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForbiddenNode {
    pub node: String,
    pub name: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSizeRule {
    pub node: String,
    pub width: f64,
    pub height: f64,
    pub name: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    MinWidth(LayerLimit),
    MinArea(LayerLimit),
    MinEnclosedArea(LayerLimit),
    Spacing(SpacingRule),
    Extension(ExtensionRule),
    Edge(EdgeRule),
    Forbidden(ForbiddenNode),
    NodeSize(NodeSizeRule),
}

fn pair_key(pair: &(LayerId, LayerId)) -> String {
    if pair.0 <= pair.1 {
        format!("{} {}", pair.0, pair.1)
    } else {
        format!("{} {}", pair.1, pair.0)
    }
}

fn same_pair(pair: &(LayerId, LayerId), a: &LayerId, b: &LayerId) -> bool {
    (&pair.0 == a && &pair.1 == b) || (&pair.0 == b && &pair.1 == a)
}

impl Rule {
    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::MinWidth(_) => RuleKind::MinWidth,
            Rule::MinArea(_) => RuleKind::MinArea,
            Rule::MinEnclosedArea(_) => RuleKind::MinEnclosedArea,
            Rule::Spacing(_) => RuleKind::Spacing,
            Rule::Extension(_) => RuleKind::Extension,
            Rule::Edge(_) => RuleKind::Edge,
            Rule::Forbidden(_) => RuleKind::Forbidden,
            Rule::NodeSize(_) => RuleKind::NodeSize,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Rule::MinWidth(r) | Rule::MinArea(r) | Rule::MinEnclosedArea(r) => &r.name,
            Rule::Spacing(r) => &r.name,
            Rule::Extension(r) => &r.name,
            Rule::Edge(r) => &r.name,
            Rule::Forbidden(r) => &r.name,
            Rule::NodeSize(r) => &r.name,
        }
    }

    /// Identity used when an override replaces a factory rule: kind, operands
    /// (layer pairs unordered) and qualifiers, but not values or names.
    pub fn identity(&self) -> String {
        let kind = self.kind().keyword();
        match self {
            Rule::MinWidth(r) | Rule::MinArea(r) | Rule::MinEnclosedArea(r) => {
                format!("{} {}", kind, r.layer)
            }
            Rule::Spacing(r) => {
                let mut key = format!("{} {}", kind, pair_key(&r.layers));
                match r.connectivity {
                    Connectivity::Any => {}
                    Connectivity::Connected => key.push_str(" connected"),
                    Connectivity::Unconnected => key.push_str(" unconnected"),
                }
                if let Some(n) = r.multi_cut {
                    key.push_str(&format!(" multicut={}", n));
                }
                if let Some(w) = r.min_width {
                    key.push_str(&format!(" width={}", w));
                }
                if let Some(l) = r.min_length {
                    key.push_str(&format!(" length={}", l));
                }
                if let Some(n) = &r.node {
                    key.push_str(&format!(" node={}", n));
                }
                key
            }
            Rule::Extension(r) => {
                // Extension is directional: layer1 extends past layer2
                let mut key = format!("{} {} {}", kind, r.layers.0, r.layers.1);
                if r.gate {
                    key.push_str(" gate");
                }
                key
            }
            Rule::Edge(r) => format!("{} {}", kind, pair_key(&r.layers)),
            Rule::Forbidden(r) => format!("{} {}", kind, r.node),
            Rule::NodeSize(r) => format!("{} {}", kind, r.node),
        }
    }
}

/// The three rules a per-layer area task applies
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayerAreaRules {
    pub min_area: Option<LayerLimit>,
    pub min_enclosed_area: Option<LayerLimit>,
    /// Same-layer spacing, used as the notch width inside holes
    pub notch: Option<SpacingRule>,
}

impl LayerAreaRules {
    pub fn is_empty(&self) -> bool {
        self.min_area.is_none() && self.min_enclosed_area.is_none() && self.notch.is_none()
    }
}

/// Resolved rule table for one technology
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RuleSet {
    pub foundry: String,
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(foundry: &str, rules: Vec<Rule>) -> Self {
        Self {
            foundry: foundry.to_string(),
            rules,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Minimum width, area or enclosed-area rule of a layer
    pub fn min_value(&self, layer: &LayerId, kind: RuleKind) -> Option<&LayerLimit> {
        self.rules.iter().find_map(|r| match (r, kind) {
            (Rule::MinWidth(l), RuleKind::MinWidth)
            | (Rule::MinArea(l), RuleKind::MinArea)
            | (Rule::MinEnclosedArea(l), RuleKind::MinEnclosedArea)
                if &l.layer == layer =>
            {
                Some(l)
            }
            _ => None,
        })
    }

    /// Most specific applicable spacing rule between two pieces of geometry.
    /// Ties between equally specific rules go to the larger spacing.
    #[allow(clippy::too_many_arguments)]
    pub fn spacing_rule(
        &self,
        layer1: &LayerId,
        ctx1: Option<&str>,
        layer2: &LayerId,
        ctx2: Option<&str>,
        connected: bool,
        multi_cut_count: u32,
        widest: f64,
        length: f64,
    ) -> Option<&SpacingRule> {
        self.rules
            .iter()
            .filter_map(|r| match r {
                Rule::Spacing(s) if same_pair(&s.layers, layer1, layer2) => Some(s),
                _ => None,
            })
            .filter(|s| s.applies(ctx1, ctx2, connected, multi_cut_count, widest, length))
            .max_by(|a, b| {
                a.specificity()
                    .cmp(&b.specificity())
                    .then(a.value.total_cmp(&b.value))
            })
    }

    pub fn extension_rule(&self, layer1: &LayerId, layer2: &LayerId, gate: bool) -> Option<&ExtensionRule> {
        self.rules.iter().find_map(|r| match r {
            Rule::Extension(e) if &e.layers.0 == layer1 && &e.layers.1 == layer2 && e.gate == gate => {
                Some(e)
            }
            _ => None,
        })
    }

    pub fn edge_rule(&self, layer1: &LayerId, layer2: &LayerId) -> Option<&EdgeRule> {
        self.rules.iter().find_map(|r| match r {
            Rule::Edge(e) if same_pair(&e.layers, layer1, layer2) => Some(e),
            _ => None,
        })
    }

    pub fn is_forbidden_node(&self, proto: &str) -> Option<&ForbiddenNode> {
        self.rules.iter().find_map(|r| match r {
            Rule::Forbidden(f) if f.node.eq_ignore_ascii_case(proto) => Some(f),
            _ => None,
        })
    }

    pub fn node_size(&self, proto: &str) -> Option<&NodeSizeRule> {
        self.rules.iter().find_map(|r| match r {
            Rule::NodeSize(n) if n.node.eq_ignore_ascii_case(proto) => Some(n),
            _ => None,
        })
    }

    /// Area, enclosed-area and notch rules for one layer; `None` when the
    /// layer has none of them and needs no merge at all.
    pub fn area_rules(&self, layer: &LayerId) -> Option<LayerAreaRules> {
        let rules = LayerAreaRules {
            min_area: self.min_value(layer, RuleKind::MinArea).cloned(),
            min_enclosed_area: self.min_value(layer, RuleKind::MinEnclosedArea).cloned(),
            notch: self
                .spacing_rule(layer, None, layer, None, true, 0, 0.0, 0.0)
                .cloned(),
        };
        if rules.is_empty() {
            None
        } else {
            Some(rules)
        }
    }
}
