//! Camera poses for ray generation

use glam::{Mat3, Mat4, Vec3};
use std::f32::consts::PI;

use crate::error::{SceneError, SceneResult};

/// Tolerance used when checking that a pose basis is orthonormal.
///
/// Poses exported from DCC tools are stored as 32-bit floats, so exact
/// orthonormality is not expected.
pub const DEFAULT_POSE_TOLERANCE: f32 = 1e-3;

/// Camera-to-world transform
///
/// The rotation columns are the camera's right (+x), up (+y) and back (+z)
/// axes in world space. The camera looks along its local -z.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraPose {
    rotation: Mat3,
    translation: Vec3,
}

impl CameraPose {
    /// Build a pose, rejecting non-orthonormal or non-finite bases.
    pub fn new(rotation: Mat3, translation: Vec3) -> SceneResult<Self> {
        let pose = Self { rotation, translation };
        pose.validate(DEFAULT_POSE_TOLERANCE)?;
        Ok(pose)
    }

    /// Build a pose from a row-major 4x4 camera-to-world matrix.
    pub fn from_rows(rows: [[f32; 4]; 4]) -> SceneResult<Self> {
        Self::from_rows_with_tolerance(rows, DEFAULT_POSE_TOLERANCE)
    }

    pub fn from_rows_with_tolerance(rows: [[f32; 4]; 4], tolerance: f32) -> SceneResult<Self> {
        let last = rows[3];
        let expected = [0.0, 0.0, 0.0, 1.0];
        if last
            .iter()
            .zip(expected.iter())
            .any(|(v, e)| !v.is_finite() || (v - e).abs() > tolerance)
        {
            return Err(SceneError::MalformedPose(format!(
                "last row must be [0, 0, 0, 1], got {:?}",
                last
            )));
        }

        let column = |c: usize| Vec3::new(rows[0][c], rows[1][c], rows[2][c]);
        let pose = Self {
            rotation: Mat3::from_cols(column(0), column(1), column(2)),
            translation: column(3),
        };
        pose.validate(tolerance)?;
        Ok(pose)
    }

    /// Camera at `eye` looking at `target`.
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> SceneResult<Self> {
        let forward = (target - eye).normalize_or_zero();
        if forward == Vec3::ZERO {
            return Err(SceneError::MalformedPose(
                "eye and target coincide".to_string(),
            ));
        }

        let right = forward.cross(up);
        if right.length_squared() < 1e-12 {
            return Err(SceneError::MalformedPose(
                "up vector is parallel to the view direction".to_string(),
            ));
        }
        let right = right.normalize();
        let cam_up = right.cross(forward);

        Self::new(Mat3::from_cols(right, cam_up, -forward), eye)
    }

    /// Turntable camera looking at the origin with +z up.
    ///
    /// `t` is the azimuth in radians; the polar angle sweeps between
    /// `0.1π` and `0.45π` as `t` advances so the orbit bobs up and down.
    pub fn orbit(t: f32, radius: f32) -> SceneResult<Self> {
        let blend = ((0.6 * t).cos() + 1.0) / 2.0;
        let polar = lerp(0.1 * PI, 0.45 * PI, blend);
        let eye = Vec3::new(
            polar.sin() * t.sin(),
            polar.sin() * t.cos(),
            polar.cos(),
        ) * radius;

        Self::look_at(eye, Vec3::ZERO, Vec3::Z)
    }

    /// Check that the basis is orthonormal and every entry is finite.
    pub fn validate(&self, tolerance: f32) -> SceneResult<()> {
        if !self.rotation.is_finite() || !self.translation.is_finite() {
            return Err(SceneError::MalformedPose(
                "pose contains non-finite values".to_string(),
            ));
        }

        let axes = [self.rotation.x_axis, self.rotation.y_axis, self.rotation.z_axis];
        for (i, axis) in axes.iter().enumerate() {
            let len = axis.length();
            if (len - 1.0).abs() > tolerance {
                return Err(SceneError::MalformedPose(format!(
                    "basis vector {} has length {}",
                    i, len
                )));
            }
        }
        for (i, j) in [(0, 1), (0, 2), (1, 2)] {
            let dot = axes[i].dot(axes[j]);
            if dot.abs() > tolerance {
                return Err(SceneError::MalformedPose(format!(
                    "basis vectors {} and {} are not orthogonal (dot = {})",
                    i, j, dot
                )));
            }
        }

        Ok(())
    }

    pub fn rotation(&self) -> Mat3 {
        self.rotation
    }

    /// Camera position in world space
    pub fn position(&self) -> Vec3 {
        self.translation
    }

    pub fn right(&self) -> Vec3 {
        self.rotation.x_axis
    }

    pub fn up(&self) -> Vec3 {
        self.rotation.y_axis
    }

    /// Viewing direction (local -z)
    pub fn forward(&self) -> Vec3 {
        -self.rotation.z_axis
    }

    /// 4x4 world transform with last row [0, 0, 0, 1]
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_cols(
            self.rotation.x_axis.extend(0.0),
            self.rotation.y_axis.extend(0.0),
            self.rotation.z_axis.extend(0.0),
            self.translation.extend(1.0),
        )
    }

    /// Unit direction from the camera towards the world origin.
    pub fn direction_to_origin(&self) -> Vec3 {
        (-self.translation).normalize_or_zero()
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
