//! Model parameter presets
//!
//! Presets come from the agent-configuration layer; the router only consumes
//! them to resolve the effective parameters for a request. Resolution order:
//! named preset, else a use-case-matched preset, else the balanced default,
//! with request-level overrides applied on top (overrides always win).

use serde::{Deserialize, Serialize};

/// Resolved model parameters sent along with a route decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Sampling temperature
    pub temperature: f32,
    /// Completion token ceiling
    pub max_tokens: u32,
    /// Nucleus sampling cutoff
    pub top_p: f32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
            top_p: 1.0,
        }
    }
}

/// Request-level parameter overrides (applied after preset resolution)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamOverrides {
    /// Temperature override
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Max tokens override
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Top-p override
    #[serde(default)]
    pub top_p: Option<f32>,
}

impl ParamOverrides {
    /// Apply these overrides on top of resolved parameters
    #[must_use]
    pub fn apply(&self, mut params: ModelParams) -> ModelParams {
        if let Some(t) = self.temperature {
            params.temperature = t;
        }
        if let Some(m) = self.max_tokens {
            params.max_tokens = m;
        }
        if let Some(p) = self.top_p {
            params.top_p = p;
        }
        params
    }
}

/// A named parameter preset with the use cases it covers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamPreset {
    /// Preset name (e.g. "balanced", "deterministic")
    pub name: String,
    /// Use-case labels this preset matches (e.g. "extraction")
    pub use_cases: Vec<String>,
    /// The parameters the preset resolves to
    pub params: ModelParams,
}

impl ParamPreset {
    /// Create a preset
    #[must_use]
    pub fn new(name: impl Into<String>, params: ModelParams) -> Self {
        Self {
            name: name.into(),
            use_cases: Vec::new(),
            params,
        }
    }

    /// Attach use-case labels
    #[must_use]
    pub fn with_use_cases(mut self, use_cases: &[&str]) -> Self {
        self.use_cases = use_cases.iter().map(|s| (*s).to_string()).collect();
        self
    }
}

/// The preset catalog consulted during parameter resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetCatalog {
    presets: Vec<ParamPreset>,
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self {
            presets: vec![
                ParamPreset::new(
                    "deterministic",
                    ModelParams {
                        temperature: 0.0,
                        max_tokens: 1024,
                        top_p: 1.0,
                    },
                )
                .with_use_cases(&["extraction", "classification", "validation"]),
                ParamPreset::new(
                    "precise",
                    ModelParams {
                        temperature: 0.2,
                        max_tokens: 4096,
                        top_p: 0.9,
                    },
                )
                .with_use_cases(&["code", "analysis", "review"]),
                ParamPreset::new(
                    "balanced",
                    ModelParams {
                        temperature: 0.7,
                        max_tokens: 2048,
                        top_p: 1.0,
                    },
                )
                .with_use_cases(&["conversation", "general"]),
                ParamPreset::new(
                    "creative",
                    ModelParams {
                        temperature: 1.0,
                        max_tokens: 4096,
                        top_p: 1.0,
                    },
                )
                .with_use_cases(&["writing", "brainstorming"]),
            ],
        }
    }
}

impl PresetCatalog {
    /// Build a catalog from explicit presets
    #[must_use]
    pub fn new(presets: Vec<ParamPreset>) -> Self {
        Self { presets }
    }

    /// Look up a preset by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamPreset> {
        self.presets.iter().find(|p| p.name == name)
    }

    /// Look up the first preset matching a use-case label
    #[must_use]
    pub fn match_use_case(&self, use_case: &str) -> Option<&ParamPreset> {
        self.presets
            .iter()
            .find(|p| p.use_cases.iter().any(|u| u == use_case))
    }

    /// Resolve effective parameters: named preset, else use-case match,
    /// else the balanced default; overrides win over all of them.
    #[must_use]
    pub fn resolve(
        &self,
        preset_name: Option<&str>,
        use_case: Option<&str>,
        overrides: &ParamOverrides,
    ) -> ModelParams {
        let base = preset_name
            .and_then(|name| self.get(name))
            .or_else(|| use_case.and_then(|uc| self.match_use_case(uc)))
            .map(|p| p.params.clone())
            .unwrap_or_default();
        overrides.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_named_preset() {
        let catalog = PresetCatalog::default();
        let params = catalog.resolve(Some("deterministic"), None, &ParamOverrides::default());
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.max_tokens, 1024);
    }

    #[test]
    fn test_named_preset_beats_use_case() {
        let catalog = PresetCatalog::default();
        let params = catalog.resolve(
            Some("creative"),
            Some("extraction"),
            &ParamOverrides::default(),
        );
        assert_eq!(params.temperature, 1.0);
    }

    #[test]
    fn test_resolve_use_case_match() {
        let catalog = PresetCatalog::default();
        let params = catalog.resolve(None, Some("code"), &ParamOverrides::default());
        assert_eq!(params.temperature, 0.2);
        assert_eq!(params.max_tokens, 4096);
    }

    #[test]
    fn test_resolve_balanced_default() {
        let catalog = PresetCatalog::default();
        let params = catalog.resolve(None, Some("nonexistent-use-case"), &ParamOverrides::default());
        assert_eq!(params, ModelParams::default());
    }

    #[test]
    fn test_overrides_always_win() {
        let catalog = PresetCatalog::default();
        let overrides = ParamOverrides {
            temperature: Some(0.33),
            max_tokens: Some(123),
            top_p: None,
        };
        let params = catalog.resolve(Some("deterministic"), None, &overrides);
        assert_eq!(params.temperature, 0.33);
        assert_eq!(params.max_tokens, 123);
        // untouched field keeps the preset value
        assert_eq!(params.top_p, 1.0);
    }

    #[test]
    fn test_unknown_named_preset_falls_through() {
        let catalog = PresetCatalog::default();
        let params = catalog.resolve(Some("no-such"), Some("writing"), &ParamOverrides::default());
        assert_eq!(params.temperature, 1.0);
    }
}
