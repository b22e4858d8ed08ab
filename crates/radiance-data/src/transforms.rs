//! Camera transform metadata (`transforms.json`)

use anyhow::{Context, Result};
use radiance_train::CameraPose;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One posed frame
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameEntry {
    /// Image path relative to the metadata file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Row-major camera-to-world matrix
    pub transform_matrix: [[f32; 4]; 4],
}

/// Transform metadata for a set of training views
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransformsFile {
    /// Half of the horizontal field of view, radians
    pub camera_angle_x: f32,
    pub frames: Vec<FrameEntry>,
}

impl TransformsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse transform metadata {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Validated pose of frame `index`
    pub fn pose(&self, index: usize, tolerance: f32) -> Result<CameraPose> {
        let frame = self
            .frames
            .get(index)
            .with_context(|| format!("Frame {} out of range ({} frames)", index, self.len()))?;
        CameraPose::from_rows_with_tolerance(frame.transform_matrix, tolerance)
            .with_context(|| format!("Frame {} has a malformed transform", index))
    }

    /// Validated poses of all frames, failing on the first malformed one
    pub fn poses(&self, tolerance: f32) -> Result<Vec<CameraPose>> {
        (0..self.len()).map(|i| self.pose(i, tolerance)).collect()
    }

    /// Image path of frame `index`, resolved against `base_dir`
    pub fn image_path(&self, base_dir: &Path, index: usize) -> PathBuf {
        match self.frames.get(index).and_then(|f| f.file_path.as_deref()) {
            Some(rel) => {
                let path = base_dir.join(rel);
                if path.extension().is_none() {
                    path.with_extension("png")
                } else {
                    path
                }
            }
            None => base_dir.join("train").join(format!("r_{}.png", index)),
        }
    }
}

/// Directory that relative image paths in `metadata_path` are resolved against
pub fn base_dir(metadata_path: &Path) -> PathBuf {
    metadata_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    const SAMPLE: &str = r#"{
        "camera_angle_x": 0.6911112070083618,
        "frames": [
            {
                "file_path": "./train/r_0",
                "transform_matrix": [
                    [1.0, 0.0, 0.0, 0.0],
                    [0.0, 1.0, 0.0, 0.0],
                    [0.0, 0.0, 1.0, 4.0],
                    [0.0, 0.0, 0.0, 1.0]
                ]
            },
            {
                "transform_matrix": [
                    [0.0, 0.0, 1.0, 4.0],
                    [1.0, 0.0, 0.0, 0.0],
                    [0.0, 1.0, 0.0, 0.0],
                    [0.0, 0.0, 0.0, 1.0]
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_and_poses() {
        let file: TransformsFile = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(file.len(), 2);
        assert_relative_eq!(file.camera_angle_x, 0.6911112);

        let poses = file.poses(1e-3).unwrap();
        assert_eq!(poses[0].position(), Vec3::new(0.0, 0.0, 4.0));
        assert_relative_eq!(poses[0].forward().z, -1.0);
        // second frame: back axis is +x, so it looks along -x toward the origin
        assert_relative_eq!(poses[1].forward().x, -1.0);
        assert_eq!(poses[1].position(), Vec3::new(4.0, 0.0, 0.0));
    }

    #[test]
    fn test_malformed_pose_rejected() {
        let mut file: TransformsFile = serde_json::from_str(SAMPLE).unwrap();
        file.frames[1].transform_matrix[0][0] = 2.0;
        assert!(file.pose(0, 1e-3).is_ok());
        let err = file.poses(1e-3).unwrap_err();
        assert!(format!("{:#}", err).contains("Frame 1"));
        assert!(file.pose(5, 1e-3).is_err());
    }

    #[test]
    fn test_image_paths() {
        let file: TransformsFile = serde_json::from_str(SAMPLE).unwrap();
        let base = Path::new("/data/lego");
        assert_eq!(file.image_path(base, 0), base.join("./train/r_0.png"));
        assert_eq!(file.image_path(base, 1), base.join("train").join("r_1.png"));
        assert_eq!(
            base_dir(Path::new("/data/lego/transforms.json")),
            PathBuf::from("/data/lego")
        );
    }

    #[test]
    fn test_load_save() {
        let dir = std::env::temp_dir().join(format!("radiance_transforms_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("transforms.json");

        let file: TransformsFile = serde_json::from_str(SAMPLE).unwrap();
        file.save(&path).unwrap();
        let loaded = TransformsFile::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.frames[0].file_path.as_deref(), Some("./train/r_0"));
        assert!(loaded.frames[1].file_path.is_none());

        assert!(TransformsFile::load(&dir.join("missing.json")).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
