//! Stage outdir resolver
//!
//! Maps grid-production stage names to their output directories by reading project
//! XML files. `<!ENTITY>` declarations accumulate across files in load order and are
//! substituted into the document body before parsing.

use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// Nested entity references are expanded at most this many times
const MAX_ENTITY_PASSES: usize = 8;

/// Project XML errors
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Cannot read {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Cannot parse {0}: {1}")]
    Parse(PathBuf, String),

    #[error("Could not find <project> in XML '{0}'")]
    MissingProject(PathBuf),
}

fn entity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<!ENTITY\s+([^\s]+)\s+"([^"]+)">"#).expect("invalid entity pattern")
    })
}

fn doctype_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<!DOCTYPE[^\[>]*(\[.*?\]\s*)?>").expect("invalid doctype pattern")
    })
}

/// Entity declarations in document order
pub fn parse_entities(content: &str) -> Vec<(String, String)> {
    entity_regex()
        .captures_iter(content)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

/// Stage name → output directory
#[derive(Debug, Clone, Default)]
pub struct StageOutdirs {
    outdirs: HashMap<String, PathBuf>,
}

impl StageOutdirs {
    /// Load every readable project file; unreadable or malformed files are skipped
    pub fn from_xml_files(paths: &[PathBuf]) -> Self {
        let mut entities = HashMap::new();
        let mut outdirs = HashMap::new();

        for path in paths {
            match load_project_file(path, &mut entities) {
                Ok(stages) => {
                    tracing::debug!(path = %path.display(), stages = stages.len(), "Loaded project XML");
                    outdirs.extend(stages);
                }
                Err(e) => tracing::error!("{}", e),
            }
        }

        Self { outdirs }
    }

    pub fn resolve(&self, stage_name: &str) -> Option<&Path> {
        self.outdirs.get(stage_name).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.outdirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outdirs.is_empty()
    }
}

impl FromIterator<(String, PathBuf)> for StageOutdirs {
    fn from_iter<I: IntoIterator<Item = (String, PathBuf)>>(iter: I) -> Self {
        Self {
            outdirs: iter.into_iter().collect(),
        }
    }
}

fn load_project_file(
    path: &Path,
    entities: &mut HashMap<String, String>,
) -> Result<Vec<(String, PathBuf)>, StageError> {
    let text = std::fs::read_to_string(path).map_err(|e| StageError::Read(path.to_path_buf(), e))?;
    entities.extend(parse_entities(&text));

    let body = doctype_regex().replace(&text, "");
    let body = substitute_entities(&body, entities);

    let doc = roxmltree::Document::parse(&body)
        .map_err(|e| StageError::Parse(path.to_path_buf(), e.to_string()))?;

    let root = doc.root_element();
    let project = if root.has_tag_name("project") {
        Some(root)
    } else {
        root.children().find(|n| n.has_tag_name("project"))
    }
    .ok_or_else(|| StageError::MissingProject(path.to_path_buf()))?;

    let stages = project
        .children()
        .filter(|n| n.has_tag_name("stage"))
        .filter_map(|stage| {
            let name = stage.attribute("name")?;
            let outdir = stage
                .children()
                .find(|n| n.has_tag_name("outdir"))
                .and_then(|n| n.text())
                .unwrap_or("")
                .trim();
            Some((name.to_string(), PathBuf::from(outdir)))
        })
        .collect();

    Ok(stages)
}

/// Replace `&name;` references with declared values, expanding nested references
fn substitute_entities(text: &str, entities: &HashMap<String, String>) -> String {
    let mut current = text.to_string();
    for _ in 0..MAX_ENTITY_PASSES {
        let mut next = current.clone();
        for (name, value) in entities {
            next = next.replace(&format!("&{};", name), value);
        }
        if next == current {
            break;
        }
        current = next;
    }
    current
}
