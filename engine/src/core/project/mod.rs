//! Project Files
//!
//! A project is a JSON document holding the media library, the timeline and
//! the export settings. Relative media paths resolve against the directory
//! containing the project file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::{
    fs::atomic_write_json_pretty,
    media::{MediaLibrary, MediaSource},
    pipeline::ExportRequest,
    render::{check_media_references, ExportSettings},
    timeline::Timeline,
    CoreError, CoreResult,
};

/// Current project file format version
pub const PROJECT_VERSION: u32 = 1;

/// Project document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default = "default_version")]
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub media: Vec<MediaSource>,
    #[serde(default)]
    pub timeline: Timeline,
    #[serde(default)]
    pub export: ExportSettings,
}

fn default_version() -> u32 {
    PROJECT_VERSION
}

impl Project {
    pub fn new(name: &str) -> Self {
        Self {
            version: PROJECT_VERSION,
            name: name.to_string(),
            media: Vec::new(),
            timeline: Timeline::new(),
            export: ExportSettings::default(),
        }
    }

    /// Loads a project file.
    ///
    /// Unreadable JSON, an unknown version or duplicate media ids are
    /// reported as `ProjectCorrupted`.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut project: Project = serde_json::from_str(&content).map_err(|e| {
            CoreError::ProjectCorrupted(format!("{}: {}", path.display(), e))
        })?;

        if project.version > PROJECT_VERSION {
            return Err(CoreError::ProjectCorrupted(format!(
                "unsupported project version {} (max {})",
                project.version, PROJECT_VERSION
            )));
        }

        let mut seen = HashSet::new();
        for source in &project.media {
            if !seen.insert(source.id.as_str()) {
                return Err(CoreError::ProjectCorrupted(format!(
                    "duplicate media id: {}",
                    source.id
                )));
            }
        }

        if let Some(base) = path.parent() {
            project.resolve_relative_paths(base);
        }

        info!(
            name = %project.name,
            media = project.media.len(),
            items = project.timeline.item_count(),
            "Project loaded"
        );
        Ok(project)
    }

    /// Writes the project atomically as pretty JSON
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        atomic_write_json_pretty(path, self)?;
        debug!(path = %path.display(), "Project saved");
        Ok(())
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        for source in &mut self.media {
            if source.path.is_relative() {
                source.path = base.join(&source.path);
            }
        }
    }

    pub fn library(&self) -> MediaLibrary {
        self.media.iter().cloned().collect()
    }

    /// Checks settings, timeline structure and media references
    pub fn validate(&self) -> CoreResult<()> {
        self.export.validate()?;
        self.timeline.validate()?;
        check_media_references(&self.timeline, &self.library())
    }

    /// Builds an export request writing to `output_path`
    pub fn export_request(&self, output_path: impl Into<PathBuf>) -> ExportRequest {
        ExportRequest {
            timeline: self.timeline.clone(),
            media: self.library(),
            settings: self.export.clone(),
            output_path: output_path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::timeline::TimelineItem;
    use tempfile::TempDir;

    fn sample(dir: &TempDir) -> Project {
        let clip = dir.path().join("clip.mp4");
        std::fs::write(&clip, b"fake").unwrap();

        let mut project = Project::new("Demo");
        project.media.push(MediaSource::resolve("clip", &clip).unwrap());
        project
            .timeline
            .add(TimelineItem::video("v1", "clip", 0.0, 4.0))
            .unwrap();
        project
            .timeline
            .add(TimelineItem::text("t1", "Title", 0.5, 2.0))
            .unwrap();
        project
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let project = sample(&dir);
        let path = dir.path().join("demo.clipweave.json");

        project.save(&path).unwrap();
        let loaded = Project::load(&path).unwrap();

        assert_eq!(loaded, project);
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn test_relative_media_paths_resolve_against_project_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"fake").unwrap();
        let path = dir.path().join("p.json");
        std::fs::write(
            &path,
            r#"{"name":"Rel","media":[{"id":"clip","path":"clip.mp4","kind":"video"}]}"#,
        )
        .unwrap();

        let project = Project::load(&path).unwrap();
        assert_eq!(project.version, PROJECT_VERSION);
        assert_eq!(project.media[0].path, dir.path().join("clip.mp4"));
        assert_eq!(project.library().len(), 1);
    }

    #[test]
    fn test_load_orders_hand_edited_items() {
        let dir = TempDir::new().unwrap();
        let project = {
            let mut p = sample(&dir);
            p.timeline
                .add(TimelineItem::video("v1", "clip", 5.0, 2.0).with_id("late"))
                .unwrap();
            p
        };
        let mut json = serde_json::to_value(&project).unwrap();
        let track = json["timeline"]["tracks"]
            .as_array_mut()
            .unwrap()
            .iter_mut()
            .find(|t| t["id"] == "v1")
            .unwrap();
        track["items"].as_array_mut().unwrap().reverse();
        assert_eq!(track["items"][0]["id"], "late");

        let path = dir.path().join("edited.json");
        std::fs::write(&path, serde_json::to_string_pretty(&json).unwrap()).unwrap();
        let loaded = Project::load(&path).unwrap();

        assert!(loaded.validate().is_ok());
        assert_eq!(loaded.timeline.items_at("v1", 1.0).len(), 1);
        assert_eq!(loaded.timeline.items_at("v1", 5.5)[0].id, "late");
    }

    #[test]
    fn test_corrupted_project() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Project::load(&path),
            Err(CoreError::ProjectCorrupted(_))
        ));
    }

    #[test]
    fn test_duplicate_media_ids_rejected() {
        let dir = TempDir::new().unwrap();
        let mut project = sample(&dir);
        project.media.push(project.media[0].clone());
        let path = dir.path().join("dup.json");
        project.save(&path).unwrap();

        let err = Project::load(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate media id"));
    }

    #[test]
    fn test_validate_reports_missing_media() {
        let dir = TempDir::new().unwrap();
        let mut project = sample(&dir);
        std::fs::remove_file(dir.path().join("clip.mp4")).unwrap();

        assert!(matches!(
            project.validate(),
            Err(CoreError::MediaNotFound(_))
        ));
    }

    #[test]
    fn test_export_request() {
        let dir = TempDir::new().unwrap();
        let project = sample(&dir);
        let request = project.export_request(dir.path().join("out.mp4"));

        assert_eq!(request.media.len(), 1);
        assert_eq!(request.timeline.item_count(), 2);
        assert_eq!(request.settings, project.export);
    }
}
