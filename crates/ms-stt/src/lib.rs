pub mod kubernetes;
pub mod local;
pub mod options;
pub mod progress;
pub mod prompt;
pub mod remote;

pub use kubernetes::KubernetesBackend;
pub use local::LocalProcessBackend;
pub use progress::ProgressReporter;
pub use remote::RestRemoteBackend;

use ms_core::agent::CorrectionAgent;
use ms_core::backend::TranscriptionBackend;
use ms_core::config::{DeploymentMode, PipelineConfig};
use ms_core::error::{MeetscribeError, Result};
use std::sync::Arc;

/// Build the transcription backend selected by `deployment_mode`.
pub async fn build_backend(
    config: &PipelineConfig,
    agent: Arc<dyn CorrectionAgent>,
    reporter: ProgressReporter,
) -> Result<Arc<dyn TranscriptionBackend>> {
    match config.deployment_mode {
        DeploymentMode::KubernetesJob => {
            tracing::info!("Using in-cluster batch jobs for transcription");
            let backend = KubernetesBackend::new(config.clone(), agent, reporter).await?;
            Ok(Arc::new(backend))
        }
        DeploymentMode::RestRemote => {
            let base_url = config.rest_remote_url.clone().ok_or_else(|| {
                MeetscribeError::Config("rest_remote mode requires rest_remote_url".to_string())
            })?;
            tracing::info!("Using remote transcription service at {}", base_url);
            Ok(Arc::new(RestRemoteBackend::new(base_url, config.clone(), agent, reporter)))
        }
        DeploymentMode::LocalSubprocess => {
            tracing::info!(
                "Using local transcriber binary {}",
                config.transcriber_binary.display()
            );
            Ok(Arc::new(LocalProcessBackend::new(config.clone(), agent, reporter)))
        }
    }
}
