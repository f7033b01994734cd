#[cfg(test)]
mod integration_tests {
    use crate::configuration::Config;
    use crate::container_management::DockerCli;
    use crate::controller::Controller;
    use crate::executor::{ExecutionRequest, ExecutionStatus};
    use crate::preview::{PreviewRequest, StopOutcome};
    use crate::registry::MemoryStore;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn is_docker_available() -> bool {
        std::process::Command::new("docker")
            .arg("info")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Containers left behind by executions, found through their labels.
    fn leftover_execution_containers() -> Vec<String> {
        std::process::Command::new("docker")
            .args(["ps", "-aq", "--filter", "label=sandboxd.kind=execution"])
            .output()
            .map(|output| {
                String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn docker_controller(config: Config) -> Controller {
        let runtime = DockerCli::connect(&config.runtime.binary)
            .await
            .expect("Failed to connect to docker");
        Controller::with_parts(config, Arc::new(runtime), Arc::new(MemoryStore::new()))
            .await
            .expect("Failed to create controller")
    }

    fn project(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_python_execution_end_to_end() {
        if !is_docker_available() {
            return;
        }
        let controller = docker_controller(Config::default()).await;

        let request = ExecutionRequest::new(project(&[("main.py", "print('hi')")]), "python")
            .with_timeout(Duration::from_secs(60));
        let result = controller.executor.run(request).await.expect("Execution failed");

        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.timed_out);
        assert!(leftover_execution_containers().is_empty());
        assert!(controller.registry.is_empty().await);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_infinite_loop_is_killed() {
        if !is_docker_available() {
            return;
        }
        let controller = docker_controller(Config::default()).await;

        let started = Instant::now();
        let request =
            ExecutionRequest::new(project(&[("main.py", "while True:\n    pass\n")]), "python")
                .with_timeout(Duration::from_secs(2));
        let result = controller.executor.run(request).await.expect("Execution failed");

        assert!(result.timed_out);
        assert_eq!(result.status(), ExecutionStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(leftover_execution_containers().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_execution_has_no_network() {
        if !is_docker_available() {
            return;
        }
        let controller = docker_controller(Config::default()).await;

        let code = "import socket\nsocket.create_connection(('1.1.1.1', 80), timeout=3)\nprint('reached')\n";
        let request = ExecutionRequest::new(project(&[("main.py", code)]), "python")
            .with_timeout(Duration::from_secs(30));
        let result = controller.executor.run(request).await.expect("Execution failed");

        assert!(!result.stdout.contains("reached"));
        assert_ne!(result.exit_code, Some(0));
    }

    #[tokio::test]
    #[ignore = "requires docker and network access"]
    async fn test_flask_preview_lifecycle() {
        if !is_docker_available() {
            return;
        }
        let mut config = Config::default();
        config.preview.readiness_timeout_secs = 180;
        let controller = docker_controller(config).await;

        let app = "from flask import Flask\napp = Flask(__name__)\n\n@app.route('/')\ndef index():\n    return 'hello'\n";
        let request = PreviewRequest::new(
            project(&[("app.py", app), ("requirements.txt", "flask\n")]),
            "python",
        )
        .with_framework("flask");
        let started = controller
            .previews
            .start(request)
            .await
            .expect("Preview failed to start");
        assert!(started.url.ends_with(&started.port.to_string()));

        let container = controller
            .registry
            .get(&started.id)
            .await
            .and_then(|record| record.runtime_id)
            .expect("Preview has no container");
        assert!(controller.runtime.inspect(&container).await.unwrap().is_some());

        assert_eq!(
            controller.previews.stop(&started.id).await.unwrap(),
            StopOutcome::Stopped
        );
        assert!(controller.runtime.inspect(&container).await.unwrap().is_none());
        assert!(!controller.previews.logs(&started.id, None).await.is_empty());
    }
}
