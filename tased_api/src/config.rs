use std::{fs, io, sync::Arc};

use serde::{Deserialize, Serialize};
use tased_timeline::TimelineConfig;

use crate::Error;

/// Which optional sections are written to a project file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSections {
    /// Save markers and their notes.
    pub markers: bool,
    /// Save branch slots and the branch forest.
    pub branches: bool,
    /// Save the lag log and checkpoints.
    pub greenzone: bool,
    /// Save undo history.
    pub history: bool,
}

impl Default for ProjectSections {
    fn default() -> Self {
        Self {
            markers: true,
            branches: true,
            greenzone: true,
            history: true,
        }
    }
}

/// Editor settings, as stored in a JSON config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Settings for history, greenzone and branches.
    pub timeline: TimelineConfig,
    /// Which optional sections are written to project files.
    pub project_sections: ProjectSections,
}

/// Load editor settings from a JSON file.
///
/// A missing file yields the default settings, as do missing fields.
pub fn load_config(filename: &str) -> Result<EditorConfig, Error> {
    let text = match fs::read_to_string(filename) {
        Ok(text) => text,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            tracing::info!("no config at {}, using defaults", filename);
            return Ok(EditorConfig::default());
        }
        Err(error) => {
            return Err(Error::ConfigReadError {
                filename: filename.to_string(),
                error: Arc::new(error),
            })
        }
    };
    serde_json::from_str(&text).map_err(|error| Error::ConfigParseError {
        filename: filename.to_string(),
        error: Arc::new(error),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use tased_timeline::GreenzoneSaveMode;

    #[test]
    fn test_partial_config() {
        let config: EditorConfig = serde_json::from_str(
            r#"{
                "timeline": { "max_undo_levels": 5, "greenzone_save_mode": { "EveryNth": 16 } },
                "project_sections": { "history": false }
            }"#,
        )
        .unwrap();
        assert_eq!(config.timeline.max_undo_levels, 5);
        assert_eq!(
            config.timeline.greenzone_save_mode,
            GreenzoneSaveMode::EveryNth(16)
        );
        assert!(config.timeline.enable_hot_changes);
        assert!(!config.project_sections.history);
        assert!(config.project_sections.markers);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config("/nonexistent/tased/config.json").unwrap();
        assert_eq!(config, EditorConfig::default());
    }
}
