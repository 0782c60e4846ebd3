//! Model spec parsing and the flexible matching rule.
//!
//! Specs are written `[provider/]baseId[$alias]`; request contexts allow a
//! comma-joined fallback list. A configured spec `b$a` answers to `b`, `a`
//! and `b$a`, and to nothing else.

use serde::{Deserialize, Serialize};

/// One configured model entry on a provider: `baseId[$alias]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub base_id: String,
    pub alias: Option<String>,
}

impl ModelSpec {
    /// Parse `baseId[$alias]`. The alias is everything after the *last* `$`.
    pub fn parse(spec: &str) -> Self {
        match spec.rsplit_once('$') {
            Some((base, alias)) if !alias.is_empty() => Self {
                base_id: base.to_string(),
                alias: Some(alias.to_string()),
            },
            _ => Self {
                base_id: spec.to_string(),
                alias: None,
            },
        }
    }

    /// Apply the flexible matching rule, returning the resolved base id that
    /// goes to the upstream.
    pub fn resolve(&self, query: &ModelQuery) -> Option<&str> {
        let alias_agrees = match (&query.alias, &self.alias) {
            (None, _) => true,
            (Some(requested), Some(configured)) => requested == configured,
            (Some(_), None) => false,
        };
        if query.base_id == self.base_id && alias_agrees {
            return Some(&self.base_id);
        }
        // Alias-as-identifier: a bare request for the alias name.
        if query.alias.is_none()
            && self
                .alias
                .as_deref()
                .is_some_and(|alias| alias == query.base_id)
        {
            return Some(&self.base_id);
        }
        None
    }
}

impl std::fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{}${}", self.base_id, alias),
            None => f.write_str(&self.base_id),
        }
    }
}

/// One entry of a request's fallback list: `[provider/]baseId[$alias]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelQuery {
    pub provider: Option<String>,
    pub base_id: String,
    pub alias: Option<String>,
}

impl ModelQuery {
    pub fn parse(spec: &str) -> Self {
        let (provider, rest) = match spec.split_once('/') {
            Some((provider, rest)) if !provider.is_empty() => {
                (Some(provider.to_string()), rest)
            }
            _ => (None, spec),
        };
        let parsed = ModelSpec::parse(rest);
        Self {
            provider,
            base_id: parsed.base_id,
            alias: parsed.alias,
        }
    }
}

/// Split a request's model field into its ordered fallback entries.
pub fn split_fallbacks(field: &str) -> Vec<String> {
    field
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Apply a key's `availableModels` overrides to its provider's model list.
/// Plain entries add, `-` prefixed entries remove (by base id or alias).
pub fn apply_overrides(models: &[ModelSpec], overrides: Option<&[String]>) -> Vec<ModelSpec> {
    let Some(overrides) = overrides.filter(|entries| !entries.is_empty()) else {
        return models.to_vec();
    };

    let mut effective = models.to_vec();
    for entry in overrides {
        if let Some(removed) = entry.strip_prefix('-') {
            let target = ModelSpec::parse(removed);
            effective.retain(|spec| {
                spec.base_id != target.base_id
                    && spec.alias.as_deref() != Some(target.base_id.as_str())
            });
        } else {
            let added = ModelSpec::parse(entry);
            if !effective.contains(&added) {
                effective.push(added);
            }
        }
    }
    effective
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsing_splits_provider_and_alias() {
        let query = ModelQuery::parse("GEMINI_CODE_ASSIST/gemini-2.5-pro$best");
        assert_eq!(query.provider.as_deref(), Some("GEMINI_CODE_ASSIST"));
        assert_eq!(query.base_id, "gemini-2.5-pro");
        assert_eq!(query.alias.as_deref(), Some("best"));

        let query = ModelQuery::parse("gemini-2.5-flash");
        assert_eq!(query.provider, None);
        assert_eq!(query.alias, None);
    }

    #[test]
    fn alias_is_after_last_dollar() {
        let spec = ModelSpec::parse("weird$base$fast");
        assert_eq!(spec.base_id, "weird$base");
        assert_eq!(spec.alias.as_deref(), Some("fast"));
    }

    #[test]
    fn aliased_config_matches_exactly_three_forms() {
        let spec = ModelSpec::parse("gemini-2.5-flash$fast");
        for matching in ["gemini-2.5-flash", "fast", "gemini-2.5-flash$fast"] {
            let query = ModelQuery::parse(matching);
            assert_eq!(spec.resolve(&query), Some("gemini-2.5-flash"), "{matching}");
        }
        for rejected in ["gemini-2.5-flash$slow", "fast$fast", "gemini-2.5-pro"] {
            let query = ModelQuery::parse(rejected);
            assert_eq!(spec.resolve(&query), None, "{rejected}");
        }
    }

    #[test]
    fn bare_config_matches_only_itself() {
        let spec = ModelSpec::parse("gpt-4o");
        assert_eq!(spec.resolve(&ModelQuery::parse("gpt-4o")), Some("gpt-4o"));
        assert_eq!(spec.resolve(&ModelQuery::parse("gpt-4o$x")), None);
        assert_eq!(spec.resolve(&ModelQuery::parse("gpt-4")), None);
    }

    #[test]
    fn fallback_split_trims_and_drops_empties() {
        assert_eq!(
            split_fallbacks("a, b ,,c"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn overrides_add_and_subtract() {
        let models = vec![
            ModelSpec::parse("gemini-2.5-pro$best"),
            ModelSpec::parse("gemini-2.5-flash"),
        ];
        let overrides = vec!["-best".to_string(), "gemini-2.0-flash".to_string()];
        let effective = apply_overrides(&models, Some(&overrides));
        assert_eq!(
            effective,
            vec![
                ModelSpec::parse("gemini-2.5-flash"),
                ModelSpec::parse("gemini-2.0-flash"),
            ]
        );
    }
}
