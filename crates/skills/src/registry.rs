//! Skill registry: manifests, stage filtering, and tool exposure.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::{
    Result, SkillError,
    manifest::AppManifest,
    schema::tool_definition,
    types::{SkillSpec, SkillStage},
};

/// All declared skills across apps, keyed `"{app_id}-{skill_id}"`.
pub struct SkillRegistry {
    skills: HashMap<String, (String, SkillSpec)>,
    production: bool,
}

impl SkillRegistry {
    pub fn new(production: bool) -> Self {
        Self {
            skills: HashMap::new(),
            production,
        }
    }

    /// Register every stage-eligible skill from a manifest. Planning-stage
    /// skills are never callable; development-stage skills only outside
    /// production.
    pub fn register_app(&mut self, manifest: &AppManifest) {
        for skill in &manifest.skills {
            let callable = match skill.stage {
                SkillStage::Planning => false,
                SkillStage::Development => !self.production,
                SkillStage::Production => true,
            };
            if !callable {
                debug!(
                    app = %manifest.id,
                    skill = %skill.id,
                    stage = ?skill.stage,
                    "skill not callable in this environment"
                );
                continue;
            }
            let key = format!("{}-{}", manifest.id, skill.id);
            self.skills.insert(key, (manifest.id.clone(), skill.clone()));
        }
    }

    pub fn register_app_yaml(&mut self, yaml: &str) -> Result<()> {
        let manifest = AppManifest::from_yaml(yaml)?;
        self.register_app(&manifest);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<&(String, SkillSpec)> {
        self.skills
            .get(key)
            .ok_or_else(|| SkillError::UnknownSkill(key.to_string()))
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.skills.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Tool definitions for one turn, filtered by the preprocessor's
    /// preselection set.
    ///
    /// `None` means the preprocessor never ran — that is an architecture
    /// violation upstream, logged and treated as the empty set.
    pub fn tools_for_preselection(
        &self,
        preselected: Option<&HashSet<String>>,
    ) -> Vec<serde_json::Value> {
        let Some(preselected) = preselected else {
            warn!("preselected_skills is missing (architecture violation), exposing no tools");
            return Vec::new();
        };

        let mut keys: Vec<&String> = self
            .skills
            .keys()
            .filter(|key| preselected.contains(key.as_str()))
            .collect();
        keys.sort();

        keys.into_iter()
            .filter_map(|key| self.skills.get(key).map(|entry| (key, entry)))
            .map(|(_, (app_id, spec))| {
                tool_definition(
                    app_id,
                    &spec.id,
                    spec.description.as_deref(),
                    spec.tool_schema.clone(),
                )
            })
            .collect()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
id: videos
skills:
  - id: transcript
    stage: production
    tool_schema: { type: object }
  - id: draft
    stage: development
    tool_schema: { type: object }
  - id: someday
    stage: planning
    tool_schema: { type: object }
"#;

    #[test]
    fn production_filters_development_skills() {
        let mut registry = SkillRegistry::new(true);
        registry.register_app_yaml(MANIFEST).unwrap();
        assert_eq!(registry.keys(), vec!["videos-transcript".to_string()]);
    }

    #[test]
    fn development_includes_development_skills() {
        let mut registry = SkillRegistry::new(false);
        registry.register_app_yaml(MANIFEST).unwrap();
        assert_eq!(registry.keys(), vec![
            "videos-draft".to_string(),
            "videos-transcript".to_string()
        ]);
    }

    #[test]
    fn planning_skills_are_never_callable() {
        let mut registry = SkillRegistry::new(false);
        registry.register_app_yaml(MANIFEST).unwrap();
        assert!(registry.get("videos-someday").is_err());
    }

    #[test]
    fn empty_preselection_exposes_no_tools() {
        let mut registry = SkillRegistry::new(false);
        registry.register_app_yaml(MANIFEST).unwrap();

        let tools = registry.tools_for_preselection(Some(&HashSet::new()));
        assert!(tools.is_empty());
    }

    #[test]
    fn missing_preselection_is_treated_as_empty() {
        let mut registry = SkillRegistry::new(false);
        registry.register_app_yaml(MANIFEST).unwrap();
        assert!(registry.tools_for_preselection(None).is_empty());
    }

    #[test]
    fn preselection_filters_tools() {
        let mut registry = SkillRegistry::new(false);
        registry.register_app_yaml(MANIFEST).unwrap();

        let selected: HashSet<String> = ["videos-transcript".to_string()].into();
        let tools = registry.tools_for_preselection(Some(&selected));
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "videos-transcript");
    }
}
