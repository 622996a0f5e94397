//! Step execution inside a container.

use container_env::{ContainerError, ContainerRuntime, ExecOutput};
use tracing::{debug, warn};

use crate::stage::StepConfig;
use crate::transcript::Transcript;

/// Issues steps into a named container and records them.
pub struct StepRunner;

impl StepRunner {
    /// Execute one step and append it to `transcript`.
    ///
    /// A non-zero exit is returned as `Ok`; callers decide what it means.
    pub async fn execute(
        runtime: &dyn ContainerRuntime,
        container: &str,
        config: &StepConfig,
        transcript: &mut Transcript,
    ) -> Result<ExecOutput, ContainerError> {
        let command_line = config.command.join(" ");
        debug!(container = %container, step = %config.name, command = %command_line, "Executing step");

        match runtime.exec(container, &config.to_request()).await {
            Ok(output) => {
                transcript.record(&config.name, &command_line, &output);
                if !output.passed() {
                    warn!(
                        container = %container,
                        step = %config.name,
                        exit_code = output.exit_code,
                        "Step exited non-zero"
                    );
                }
                Ok(output)
            }
            Err(e) => {
                transcript.record_error(&config.name, &command_line, &e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use container_env::fakes::FakeRuntime;
    use container_env::ContainerSpec;

    fn config(command: &[&str]) -> StepConfig {
        StepConfig {
            name: "probe".to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
            workdir: Some("/project".to_string()),
            timeout_secs: 10,
        }
    }

    #[tokio::test]
    async fn test_execute_records_success() {
        let rt = FakeRuntime::new();
        rt.run(&ContainerSpec::new("c1", "img")).await.unwrap();
        let mut transcript = Transcript::new("sed");

        let out = StepRunner::execute(&rt, "c1", &config(&["true"]), &mut transcript)
            .await
            .unwrap();
        assert!(out.passed());
        assert_eq!(transcript.len(), 1);
    }

    #[tokio::test]
    async fn test_execute_returns_nonzero_exit() {
        let rt = FakeRuntime::new().with_failing_exec("false", 1);
        rt.run(&ContainerSpec::new("c1", "img")).await.unwrap();
        let mut transcript = Transcript::new("sed");

        let out = StepRunner::execute(&rt, "c1", &config(&["false"]), &mut transcript)
            .await
            .unwrap();
        assert_eq!(out.exit_code, 1);
        assert!(transcript.render().contains("exit 1"));
    }

    #[tokio::test]
    async fn test_execute_records_runtime_error() {
        let rt = FakeRuntime::new();
        let mut transcript = Transcript::new("sed");

        let err = StepRunner::execute(&rt, "missing", &config(&["true"]), &mut transcript)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No such container"));
        assert!(transcript.render().contains("not run"));
    }
}
