use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use tracing::{info, warn};

/// A loaded SKILL file: free-form instructions the agent folds into its
/// system prompt when relevant.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub instructions: String,
}

#[derive(Debug, Deserialize)]
struct SkillFrontmatter {
    name: Option<String>,
    description: Option<String>,
}

/// External SKILL collaborator. Skills are markdown files under `skills/`,
/// either `skills/<name>.md` or `skills/<name>/SKILL.md`, with optional YAML
/// frontmatter carrying name and description.
pub struct SkillSet {
    skills: Vec<Skill>,
}

impl SkillSet {
    pub fn load(dir: &Path) -> Result<Self> {
        let mut skills = Vec::new();
        if !dir.is_dir() {
            return Ok(Self { skills });
        }

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                paths.push(path);
            } else if path.is_dir() {
                let nested = path.join("SKILL.md");
                if nested.exists() {
                    paths.push(nested);
                }
            }
        }
        paths.sort();

        for path in paths {
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    if let Some(skill) = parse_skill(&path, &text) {
                        skills.push(skill);
                    }
                }
                Err(e) => warn!("unreadable skill file {:?}: {}", path, e),
            }
        }

        info!("loaded {} skills", skills.len());
        Ok(Self { skills })
    }

    pub fn count(&self) -> usize {
        self.skills.len()
    }

    pub fn all(&self) -> &[Skill] {
        &self.skills
    }

    /// Catalog embedded into the system prompt. Empty when no skills exist.
    pub fn catalog(&self) -> String {
        if self.skills.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        for skill in &self.skills {
            out.push_str(&format!("### {} - {}\n", skill.name, skill.description));
            out.push_str(skill.instructions.trim());
            out.push_str("\n\n");
        }
        out
    }
}

fn parse_skill(path: &Path, text: &str) -> Option<Skill> {
    let fallback_name = if path.file_name().map(|f| f == "SKILL.md").unwrap_or(false) {
        path.parent()?.file_name()?.to_string_lossy().to_string()
    } else {
        path.file_stem()?.to_string_lossy().to_string()
    };

    let (frontmatter, body) = match split_frontmatter(text) {
        Some((yaml, body)) => (serde_yaml::from_str::<SkillFrontmatter>(yaml).ok(), body),
        None => (None, text),
    };

    let frontmatter = frontmatter.unwrap_or(SkillFrontmatter {
        name: None,
        description: None,
    });

    Some(Skill {
        name: frontmatter.name.unwrap_or(fallback_name),
        description: frontmatter.description.unwrap_or_default(),
        instructions: body.trim().to_string(),
    })
}

fn split_frontmatter(text: &str) -> Option<(&str, &str)> {
    let rest = text.trim_start().strip_prefix("---")?;
    let end = rest.find("\n---")?;
    Some((&rest[..end], rest[end + 4..].trim_start_matches('\n')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_flat_and_nested_skill_files() {
        let tmp = tempdir().unwrap();
        std::fs::write(
            tmp.path().join("git-etiquette.md"),
            "---\nname: git-etiquette\ndescription: How to write commits here\n---\nUse imperative subjects.",
        )
        .unwrap();
        std::fs::create_dir(tmp.path().join("deploys")).unwrap();
        std::fs::write(
            tmp.path().join("deploys").join("SKILL.md"),
            "Deploy only from main.",
        )
        .unwrap();

        let set = SkillSet::load(tmp.path()).unwrap();
        assert_eq!(set.count(), 2);

        let catalog = set.catalog();
        assert!(catalog.contains("git-etiquette - How to write commits here"));
        assert!(catalog.contains("Use imperative subjects."));
        assert!(catalog.contains("deploys"));
        assert!(catalog.contains("Deploy only from main."));
    }

    #[test]
    fn missing_directory_loads_empty() {
        let set = SkillSet::load(Path::new("/nonexistent/skills")).unwrap();
        assert_eq!(set.count(), 0);
        assert!(set.catalog().is_empty());
    }

    #[test]
    fn frontmatter_is_optional() {
        let tmp = tempdir().unwrap();
        std::fs::write(tmp.path().join("plain.md"), "Just instructions.").unwrap();
        let set = SkillSet::load(tmp.path()).unwrap();
        assert_eq!(set.all()[0].name, "plain");
        assert_eq!(set.all()[0].instructions, "Just instructions.");
    }
}
