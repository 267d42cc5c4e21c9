//! Technology definitions: layers, foundries and rule-table text
//!
//! The checker loads these; it never computes them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Layer identifier, scoped to a technology
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub String);

impl LayerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LayerId {
    fn from(s: &str) -> Self {
        LayerId(s.to_string())
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fabrication function of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerFunction {
    Diffusion,
    Polysilicon,
    Metal,
    Implant,
    Contact,
    Well,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub function: LayerFunction,
    /// Pseudo layers carry no fabricated geometry and are never checked
    #[serde(default)]
    pub pseudo: bool,
    /// Transistor-gate layer, checked together with ordinary polysilicon
    #[serde(default)]
    pub gate: bool,
}

/// A named manufacturing rule variant and its factory rule table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Foundry {
    pub name: String,
    /// Factory rules in rule-line text form
    #[serde(default)]
    pub rules: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Technology {
    pub name: String,
    pub layers: Vec<Layer>,
    pub foundries: Vec<Foundry>,
    pub selected_foundry: String,
    /// Override deltas persisted as a technology preference, one rule line each
    #[serde(default)]
    pub overrides: String,
}

impl Technology {
    pub fn layer(&self, id: &LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| &l.id == id)
    }

    pub fn foundry_index(&self, name: &str) -> Option<usize> {
        self.foundries
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn selected_foundry_index(&self) -> Option<usize> {
        self.foundry_index(&self.selected_foundry)
    }

    pub fn selected_foundry(&self) -> Option<&Foundry> {
        self.selected_foundry_index().map(|i| &self.foundries[i])
    }

    /// The layer whose bucket geometry on `id` is merged into, or `None` if
    /// the layer is unknown or pseudo. Gate polysilicon maps onto the first
    /// ordinary polysilicon layer so both are area-checked together.
    pub fn check_layer(&self, id: &LayerId) -> Option<LayerId> {
        let layer = self.layer(id)?;
        if layer.pseudo {
            return None;
        }
        if layer.gate && layer.function == LayerFunction::Polysilicon {
            if let Some(poly) = self.layers.iter().find(|l| {
                l.function == LayerFunction::Polysilicon && !l.gate && !l.pseudo
            }) {
                return Some(poly.id.clone());
            }
        }
        Some(layer.id.clone())
    }
}
