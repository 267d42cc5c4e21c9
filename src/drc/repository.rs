//! Rule repository: resolves and caches the rule set of each technology
//!
//! A cached set is reused until the technology's selected foundry or its
//! override diff string changes. Rebuilds swap the whole `Arc<RuleSet>`; a
//! set already handed to a running check is never mutated.

use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::rule_text::{parse_rule_table, RuleError, RuleOverrideSet};
use super::rules::RuleSet;
use crate::layout::Technology;

struct CachedRules {
    foundry: String,
    diff: String,
    rules: Arc<RuleSet>,
}

#[derive(Default)]
pub struct RuleRepository {
    cache: RwLock<HashMap<String, CachedRules>>,
}

impl RuleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory rules of the selected foundry with `overrides` applied
    pub fn build(tech: &Technology, overrides: &RuleOverrideSet) -> Result<RuleSet, RuleError> {
        let foundry = tech.selected_foundry().ok_or_else(|| RuleError::UnknownFoundry {
            technology: tech.name.clone(),
            foundry: tech.selected_foundry.clone(),
        })?;
        let factory = parse_rule_table(&foundry.rules, tech)?;
        let rules = overrides.apply(factory, tech)?;
        Ok(RuleSet::new(&foundry.name, rules))
    }

    /// Resolved rules for `tech`, rebuilding only when its foundry or overrides changed.
    /// On error the previously cached set stays in place.
    pub fn rules(&self, tech: &Technology) -> Result<Arc<RuleSet>, RuleError> {
        let overrides = RuleOverrideSet::from_text(&tech.overrides);
        let diff = overrides.diff_string();
        {
            let cache = self.cache.read().expect("rule cache lock poisoned");
            if let Some(cached) = cache.get(&tech.name) {
                if cached.foundry.eq_ignore_ascii_case(&tech.selected_foundry) && cached.diff == diff {
                    return Ok(Arc::clone(&cached.rules));
                }
            }
        }

        let rules = match Self::build(tech, &overrides) {
            Ok(r) => Arc::new(r),
            Err(e) => {
                warn!("[DRC Rules] Keeping previous rules for {}: {}", tech.name, e);
                return Err(e);
            }
        };
        info!(
            "[DRC Rules] Rebuilt {} rules for {} (foundry {}, {} override lines)",
            rules.len(),
            tech.name,
            rules.foundry,
            if diff.is_empty() { 0 } else { diff.split(';').count() }
        );
        let mut cache = self.cache.write().expect("rule cache lock poisoned");
        cache.insert(
            tech.name.clone(),
            CachedRules {
                foundry: tech.selected_foundry.clone(),
                diff,
                rules: Arc::clone(&rules),
            },
        );
        Ok(rules)
    }

    /// Check that `text` would produce a valid rule set for `tech` without
    /// installing anything.
    pub fn validate_overrides(tech: &Technology, text: &str) -> Result<RuleOverrideSet, RuleError> {
        let overrides = RuleOverrideSet::from_text(text);
        Self::build(tech, &overrides)?;
        Ok(overrides)
    }

    /// Currently cached set, if any
    pub fn cached(&self, technology: &str) -> Option<Arc<RuleSet>> {
        let cache = self.cache.read().expect("rule cache lock poisoned");
        cache.get(technology).map(|c| Arc::clone(&c.rules))
    }

    pub fn invalidate(&self, technology: &str) {
        let mut cache = self.cache.write().expect("rule cache lock poisoned");
        cache.remove(technology);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drc::rules::RuleKind;
    use crate::layout::{Foundry, Layer, LayerFunction, LayerId};

    fn tech() -> Technology {
        Technology {
            name: "mocmos".to_string(),
            layers: vec![Layer {
                id: LayerId::from("metal-1"),
                function: LayerFunction::Metal,
                pseudo: false,
                gate: false,
            }],
            foundries: vec![
                Foundry { name: "MOSIS".to_string(), rules: "minarea metal-1 4 name=M.A".to_string() },
                Foundry { name: "TSMC".to_string(), rules: "minarea metal-1 6 name=T.A".to_string() },
            ],
            selected_foundry: "MOSIS".to_string(),
            overrides: String::new(),
        }
    }

    #[test]
    fn test_cache_reuse_and_rebuild() {
        let repo = RuleRepository::new();
        let mut t = tech();
        let m1 = LayerId::from("metal-1");

        let first = repo.rules(&t).unwrap();
        let again = repo.rules(&t).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        t.selected_foundry = "TSMC".to_string();
        let tsmc = repo.rules(&t).unwrap();
        assert!(!Arc::ptr_eq(&first, &tsmc));
        assert_eq!(tsmc.min_value(&m1, RuleKind::MinArea).map(|r| r.value), Some(6.0));

        t.overrides = "minarea metal-1 9".to_string();
        let overridden = repo.rules(&t).unwrap();
        assert_eq!(overridden.min_value(&m1, RuleKind::MinArea).map(|r| r.value), Some(9.0));
    }

    #[test]
    fn test_bad_overrides_keep_previous() {
        let repo = RuleRepository::new();
        let mut t = tech();
        let good = repo.rules(&t).unwrap();

        t.overrides = "minarea metal-1 nine".to_string();
        assert!(repo.rules(&t).is_err());
        assert!(RuleRepository::validate_overrides(&t, &t.overrides).is_err());
        let still = repo.cached("mocmos").unwrap();
        assert!(Arc::ptr_eq(&good, &still));
    }

    #[test]
    fn test_unknown_foundry() {
        let mut t = tech();
        t.selected_foundry = "nowhere".to_string();
        assert!(matches!(
            RuleRepository::new().rules(&t),
            Err(RuleError::UnknownFoundry { .. })
        ));
    }
}
