use std::sync::Arc;

use fleetgate_provider_core::HandlerRegistry;
use fleetgate_storage::ProviderSeed;

use crate::providers::{
    AiStudioHandler, CodeBuddyHandler, GeminiCodeAssistHandler, OpenAiCompatHandler,
};

/// Build the read-only handler map. Called once at startup.
pub fn build_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(GeminiCodeAssistHandler::new()));
    registry.register(Arc::new(CodeBuddyHandler::new()));
    registry.register(Arc::new(AiStudioHandler::new()));
    registry.register(Arc::new(OpenAiCompatHandler::new()));
    registry
}

/// Default provider rows installed at bootstrap when missing, so a fresh
/// database can route as soon as keys are added.
pub fn provider_seeds() -> Vec<ProviderSeed> {
    vec![
        ProviderSeed {
            name: "GEMINI_CODE_ASSIST",
            display_name: "Gemini Code Assist",
            throttle_mode: "BY_MODEL",
            min_throttle_minutes: 1,
            max_throttle_minutes: 30,
            models: vec![
                "gemini-2.5-pro$pro",
                "gemini-2.5-flash$flash",
                "gemini-2.0-flash",
            ],
            native_protocols: vec!["gemini"],
        },
        ProviderSeed {
            name: "CODEBUDDY",
            display_name: "CodeBuddy",
            throttle_mode: "BY_KEY",
            min_throttle_minutes: 1,
            max_throttle_minutes: 15,
            models: vec!["claude-4.0", "gpt-5"],
            native_protocols: vec!["openai"],
        },
        ProviderSeed {
            name: "GOOGLE_AI_STUDIO",
            display_name: "Google AI Studio",
            throttle_mode: "BY_MODEL",
            min_throttle_minutes: 1,
            max_throttle_minutes: 60,
            models: vec!["gemini-2.5-pro", "gemini-2.5-flash", "gemini-2.0-flash"],
            native_protocols: vec!["gemini"],
        },
        ProviderSeed {
            name: "OPENAI_COMPATIBLE",
            display_name: "OpenAI compatible",
            throttle_mode: "BY_KEY",
            min_throttle_minutes: 1,
            max_throttle_minutes: 15,
            models: vec!["gpt-4o", "gpt-4o-mini", "o4-mini"],
            native_protocols: vec!["openai"],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_builtin_handlers_are_registered() {
        let registry = build_registry();
        assert_eq!(
            registry.names(),
            vec![
                "CODEBUDDY",
                "GEMINI_CODE_ASSIST",
                "GOOGLE_AI_STUDIO",
                "OPENAI_COMPATIBLE",
            ]
        );
    }

    #[test]
    fn every_seed_has_a_handler() {
        let registry = build_registry();
        for seed in provider_seeds() {
            assert!(registry.get(seed.name).is_some(), "{}", seed.name);
        }
    }
}
