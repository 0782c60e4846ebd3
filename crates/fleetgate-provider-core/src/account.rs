use std::collections::HashMap;

use crate::key::KeyRecord;

/// A gateway tenant with eagerly loaded keys.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    /// Primary token, prefix `sk-`.
    pub token: String,
    pub name: Option<String>,
    /// Alias → model-spec string (which may itself carry provider prefixes,
    /// fallback commas and `$alias` suffixes).
    pub model_aliases: HashMap<String, String>,
    pub keys: Vec<KeyRecord>,
}

impl User {
    /// Substitute the requested model through the alias map, once. The
    /// mapped value is never re-resolved, so resolution is idempotent.
    pub fn resolve_model_alias<'a>(&'a self, requested: &'a str) -> &'a str {
        self.model_aliases
            .get(requested)
            .map(String::as_str)
            .unwrap_or(requested)
    }
}

/// Secondary token (prefix `sk-api-`) authenticating as its owning user but
/// barred from management surfaces.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub id: i64,
    pub token: String,
    pub user_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_alias(alias: &str, target: &str) -> User {
        User {
            id: 1,
            token: "sk-user".to_string(),
            name: None,
            model_aliases: HashMap::from([(alias.to_string(), target.to_string())]),
            keys: Vec::new(),
        }
    }

    #[test]
    fn alias_substitutes_once() {
        let user = user_with_alias("gpt-4", "GEMINI_CODE_ASSIST/gemini-2.5-pro,gemini-2.5-flash");
        assert_eq!(
            user.resolve_model_alias("gpt-4"),
            "GEMINI_CODE_ASSIST/gemini-2.5-pro,gemini-2.5-flash"
        );
        assert_eq!(user.resolve_model_alias("other"), "other");
    }

    #[test]
    fn alias_resolution_is_idempotent() {
        let user = user_with_alias("gpt-4", "GEMINI_CODE_ASSIST/gemini-2.5-pro$best");
        let once = user.resolve_model_alias("gpt-4");
        // The mapped value is not itself expanded again.
        assert_eq!(user.resolve_model_alias(once), once);
    }
}
