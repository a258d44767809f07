//! Per-stage model settings.
//!
//! The file is markdown-ish:
//!
//! ```text
//! ## QueryStepper
//! APIKey: abc123
//! ModelID: gemini-2.0-flash
//! Context: stepper.md, /abs/shared.md
//! ImportContext: true
//! ```

use crate::access::FileAccessor;
use crate::error::Result;
use crate::model::StageRole;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSettings {
    pub api_key: String,
    /// Empty means "use the role default"
    pub model_id: String,
    pub context_files: Vec<PathBuf>,
    pub import_context: bool,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model_id: String::new(),
            context_files: Vec::new(),
            import_context: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StageSettingsMap {
    stages: HashMap<StageRole, StageSettings>,
}

/// Split the file into `section -> key -> value`.
///
/// Lines before the first `## ` header are ignored, as are lines without a
/// colon. Only the first colon separates key from value.
pub fn parse_sections(text: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix("## ") {
            let name = header.trim().to_string();
            debug!("Parsing stage config section: {}", name);
            sections.insert(name.clone(), BTreeMap::new());
            current = Some(name);
        } else if let (Some(section), Some((key, value))) = (&current, trimmed.split_once(':')) {
            if let Some(entries) = sections.get_mut(section) {
                entries.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    sections
}

impl StageSettingsMap {
    /// Parse the config text; relative context paths resolve against `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Self {
        let mut stages = HashMap::new();

        for (name, entries) in parse_sections(text) {
            let Some(role) = StageRole::from_section_name(&name) else {
                warn!("Ignoring unknown stage config section: {}", name);
                continue;
            };
            stages.insert(role, Self::settings_from(&entries, base_dir));
        }

        Self { stages }
    }

    /// Read and parse the config file through the file accessor.
    pub async fn load(accessor: &dyn FileAccessor, path: &Path) -> Result<Self> {
        let text = accessor.read(path).await?;
        if text.trim().is_empty() {
            warn!("Stage config is empty: {}", path.display());
        }
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self::parse(&text, base_dir))
    }

    fn settings_from(entries: &BTreeMap<String, String>, base_dir: &Path) -> StageSettings {
        let context_files = entries
            .get("Context")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|path| !path.is_empty())
                    .map(|path| {
                        let path = Path::new(path);
                        if path.is_absolute() {
                            path.to_path_buf()
                        } else {
                            base_dir.join(path)
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        StageSettings {
            api_key: entries.get("APIKey").cloned().unwrap_or_default(),
            model_id: entries.get("ModelID").cloned().unwrap_or_default(),
            context_files,
            import_context: entries
                .get("ImportContext")
                .map(|value| !value.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        }
    }

    pub fn get(&self, role: StageRole) -> Option<&StageSettings> {
        self.stages.get(&role)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
