pub mod camera;
pub mod dataset;
pub mod error;
pub mod loss;
pub mod model;
pub mod rays;
pub mod session;
pub mod trainer;
pub mod view;

pub use camera::CameraPose;
pub use dataset::{Dataset, TargetImage, TrainingExample};
pub use error::{SceneError, SceneResult};
pub use model::{ActivationKind, ImplicitModel, ImplicitModelConfig};
pub use rays::RayField;
pub use session::{SceneSession, TickReport, TrainingBurst};
pub use trainer::{StepOutcome, TrainConfig, Trainer};
pub use view::{PreviewImage, RefreshReason, ViewCache, ViewStats};
