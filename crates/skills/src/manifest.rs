//! App manifest parsing (`app.yml`).

use serde::{Deserialize, Serialize};

use crate::{Result, types::SkillSpec};

/// One app's manifest: identity plus its declared skills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppManifest {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub skills: Vec<SkillSpec>,
}

impl AppManifest {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn find_skill(&self, skill_id: &str) -> Option<&SkillSpec> {
        self.skills.iter().find(|s| s.id == skill_id)
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SkillStage;

    const MANIFEST: &str = r#"
id: videos
name: Videos
skills:
  - id: transcript
    description: Fetch video transcripts
    stage: production
    pricing_credits: 2
    tool_schema:
      type: object
      properties:
        requests:
          type: array
          items:
            type: object
            properties:
              url: { type: string }
  - id: summarize
    stage: development
    tool_schema:
      type: object
"#;

    #[test]
    fn parses_manifest_with_skills() {
        let manifest = AppManifest::from_yaml(MANIFEST).unwrap();
        assert_eq!(manifest.id, "videos");
        assert_eq!(manifest.skills.len(), 2);

        let transcript = manifest.find_skill("transcript").unwrap();
        assert_eq!(transcript.stage, SkillStage::Production);
        assert_eq!(transcript.pricing_credits, Some(2));
        assert!(manifest.find_skill("missing").is_none());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(AppManifest::from_yaml("id: [broken").is_err());
    }
}
