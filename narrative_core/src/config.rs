//! Pipeline configuration, loadable from TOML.
//!
//! Every section and field has a default, so an empty file is a valid config.
//!
//! ```toml
//! [search]
//! max_rounds = 2
//! per_round_limit = 4
//!
//! [heuristics]
//! long_text_threshold = 160
//!
//! [generation]
//! initial_characters = 4
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub search: SearchConfig,
    pub validation: ValidationConfig,
    pub completion: CompletionConfig,
    pub heuristics: HeuristicConfig,
    pub generation: GenerationConfig,
}

/// Bounds for the search/read loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum rounds per accumulation pass.
    pub max_rounds: u32,

    /// Maximum new world nodes, and separately new characters, read per round.
    pub per_round_limit: usize,

    /// Maximum characters per candidate line shown to the model.
    pub line_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_rounds: 2,
            per_round_limit: 4,
            line_limit: 320,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Propose/judge cycles before falling back to best-effort execution.
    pub max_rounds: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { max_rounds: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Extra attempts when the service returns an empty or error reply.
    pub empty_reply_retries: u32,

    /// Extra attempts when a profile reply contains no JSON object.
    pub profile_retries: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            empty_reply_retries: 1,
            profile_retries: 1,
        }
    }
}

/// Initial world and roster generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Fewest names a region or polity list should hold before it is accepted
    /// without asking again.
    pub min_names: usize,

    /// Names beyond this are ignored.
    pub max_names: usize,

    /// Extra attempts when a name list is unreadable or too short.
    pub name_retries: u32,

    /// Characters created for a fresh world.
    pub initial_characters: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            min_names: 2,
            max_names: 7,
            name_retries: 2,
            initial_characters: 6,
        }
    }
}

/// Vocabulary used when model replies cannot be parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    /// Narratives longer than this (in characters) default to updating both stores
    /// when no keyword matches.
    pub long_text_threshold: usize,

    /// How many nodes' keys are scanned when classifying scope.
    pub key_scan_limit: usize,

    pub world_keywords: Vec<String>,
    pub character_keywords: Vec<String>,
    pub merge_keywords: Vec<String>,
    pub polity_keywords: Vec<String>,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            long_text_threshold: 120,
            key_scan_limit: 50,
            world_keywords: words(&[
                "world", "region", "province", "territory", "realm", "kingdom", "polity",
                "nation", "empire", "republic", "federation", "confederacy", "duchy",
                "principality", "city", "city-state", "faction", "regime", "government",
                "institution", "law", "war", "disaster", "resource", "technology", "treaty",
                "border", "世界", "地区", "区域", "国家", "城市", "城邦", "王国", "政权",
                "势力", "战争", "灾难", "制度", "法律", "资源", "技术", "共和国", "联邦",
                "帝国", "公国",
            ]),
            character_keywords: words(&[
                "character", "persona", "protagonist", "companion", "ally", "enemy", "hero",
                "villain", "mentor", "rival", "角色", "人物", "主角", "同伴", "敌人", "盟友",
            ]),
            merge_keywords: words(&[
                "merge", "merged", "merging", "merger", "absorb", "absorbed", "absorbing",
                "absorption", "annex", "annexed", "annexation", "unite", "united",
                "unification", "unify", "unified", "amalgamate", "amalgamated", "合并",
                "并入", "吞并", "并吞", "并为", "归并",
            ]),
            polity_keywords: words(&[
                "polity", "kingdom", "nation", "state", "empire", "republic", "federation",
                "confederacy", "duchy", "principality", "city-state", "政权", "国家", "王国",
                "城邦", "共和国", "联邦", "帝国", "公国",
            ]),
        }
    }
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| PipelineError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, falling back to defaults when it is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No pipeline config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject caps that would stop the pipeline from ever running a round.
    pub fn validate(&self) -> Result<()> {
        let zero_caps = [
            ("search.max_rounds", self.search.max_rounds as usize),
            ("search.per_round_limit", self.search.per_round_limit),
            ("search.line_limit", self.search.line_limit),
            ("validation.max_rounds", self.validation.max_rounds as usize),
            ("generation.max_names", self.generation.max_names),
        ];
        for (name, value) in zero_caps {
            if value == 0 {
                return Err(PipelineError::Config {
                    message: format!("{} must be greater than zero", name),
                });
            }
        }
        if self.generation.min_names > self.generation.max_names {
            return Err(PipelineError::Config {
                message: "generation.min_names must not exceed generation.max_names".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.search.max_rounds, 2);
        assert_eq!(config.search.per_round_limit, 4);
        assert_eq!(config.search.line_limit, 320);
        assert_eq!(config.validation.max_rounds, 2);
        assert_eq!(config.heuristics.long_text_threshold, 120);
        assert!(config.heuristics.merge_keywords.iter().any(|k| k == "absorbed"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            "[search]\nper_round_limit = 6\n\n[heuristics]\nlong_text_threshold = 200\n",
        )
        .unwrap();
        assert_eq!(config.search.per_round_limit, 6);
        assert_eq!(config.search.max_rounds, 2);
        assert_eq!(config.heuristics.long_text_threshold, 200);
        assert!(!config.heuristics.world_keywords.is_empty());
    }

    #[test]
    fn test_zero_cap_rejected() {
        let result = PipelineConfig::from_toml_str("[validation]\nmax_rounds = 0\n");
        assert!(matches!(result, Err(PipelineError::Config { .. })));
    }

    #[test]
    fn test_generation_section() {
        let config = PipelineConfig::from_toml_str("[generation]\ninitial_characters = 3\n").unwrap();
        assert_eq!(config.generation.initial_characters, 3);
        assert_eq!(config.generation.max_names, 7);

        let result = PipelineConfig::from_toml_str("[generation]\nmin_names = 5\nmax_names = 3\n");
        assert!(matches!(result, Err(PipelineError::Config { .. })));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let result = PipelineConfig::from_toml_str("[search\nmax_rounds = ");
        assert!(matches!(result, Err(PipelineError::Config { .. })));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load(&dir.path().join("pipeline.toml")).unwrap();
        assert_eq!(config.search.max_rounds, 2);
    }
}
