#[cfg(test)]
mod tests {
    use crate::configuration::Config;
    use crate::container_management::fake_runtime::{FakeProgram, FakeRuntime};
    use crate::container_management::runtime::ContainerRuntime;
    use crate::container_management::types::{ContainerSpec, NetworkPolicy, PortBinding};
    use crate::error_handling::types::{ExecutionError, PreviewError};
    use crate::executor::{ExecutionPhase, ExecutionRequest, ExecutionStatus, Executor};
    use crate::languages::{Framework, Language};
    use crate::port_allocator::PortAllocator;
    use crate::preview::{
        ExtendOutcome, LogArchive, PreviewManager, PreviewRequest, StopOutcome,
    };
    use crate::reaper::{Reaper, ReaperSettings};
    use crate::registry::{ContainerKind, ContainerRecord, ContainerStatus, Registry};
    use crate::teardown::Teardown;
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    struct Harness {
        runtime: Arc<FakeRuntime>,
        registry: Arc<Registry>,
        ports: Arc<PortAllocator>,
        executor: Executor,
        previews: PreviewManager,
        reaper: Arc<Reaper>,
    }

    fn test_config(port: u16) -> Config {
        let mut config = Config::default();
        config.ports.start = port;
        config.ports.end = port;
        config.ports.probe_host = false;
        config.preview.readiness_timeout_secs = 1;
        config.preview.readiness_interval_ms = 20;
        config.runtime.stop_grace_secs = 0;
        config
    }

    fn harness(runtime: FakeRuntime, config: Config) -> Harness {
        let runtime = Arc::new(runtime);
        let dyn_runtime: Arc<dyn ContainerRuntime> = runtime.clone();
        let registry = Arc::new(Registry::in_memory());
        let ports = Arc::new(PortAllocator::new(config.ports.start, config.ports.end));
        let archive = Arc::new(LogArchive::new(config.preview.log_snapshot_capacity));

        let executor = Executor::new(dyn_runtime.clone(), registry.clone(), config.clone());
        let previews = PreviewManager::new(
            dyn_runtime.clone(),
            registry.clone(),
            ports.clone(),
            archive.clone(),
            config.clone(),
        );
        let teardown = Teardown {
            runtime: dyn_runtime,
            registry: registry.clone(),
            ports: ports.clone(),
            archive,
            grace: Duration::ZERO,
            log_tail: config.preview.log_tail_lines,
        };
        let reaper = Arc::new(Reaper::new(teardown, ReaperSettings::from_config(&config)));

        Harness {
            runtime,
            registry,
            ports,
            executor,
            previews,
            reaper,
        }
    }

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn flask_app() -> BTreeMap<String, String> {
        files(&[
            ("app.py", "from flask import Flask\napp = Flask(__name__)\n"),
            ("requirements.txt", "flask\n"),
        ])
    }

    /// Stand-in for a preview app: answers every connection with a tiny response.
    fn serve(listener: TcpListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Ok((mut socket, _)) = listener.accept().await {
                    let _ = socket.write_all(b"HTTP/1.0 200 OK\r\n\r\nok").await;
                }
            }
        })
    }

    async fn http_listener() -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (port, serve(listener))
    }

    /// Answering listeners on `count` consecutive ports; returns the first one.
    async fn http_listeners(count: u16) -> (u16, Vec<JoinHandle<()>>) {
        for _ in 0..100 {
            let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = first.local_addr().unwrap().port();
            if u32::from(base) + u32::from(count) > 65536 {
                continue;
            }
            let mut listeners = vec![first];
            for offset in 1..count {
                match TcpListener::bind(("127.0.0.1", base + offset)).await {
                    Ok(listener) => listeners.push(listener),
                    Err(_) => break,
                }
            }
            if listeners.len() == usize::from(count) {
                return (base, listeners.into_iter().map(serve).collect());
            }
        }
        panic!("no {} consecutive free ports on 127.0.0.1", count);
    }

    /// A port nothing listens on.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn serving() -> FakeRuntime {
        FakeRuntime::with_behavior(|_| FakeProgram::Serve)
    }

    // ---- Execution ----

    #[tokio::test]
    async fn test_execution_captures_output_and_removes_container() {
        let runtime = FakeRuntime::with_behavior(|spec: &ContainerSpec| {
            if spec.script() == "python main.py" {
                FakeProgram::exit(0, "hi\n", "")
            } else {
                FakeProgram::exit(127, "", "unexpected command")
            }
        });
        let h = harness(runtime, test_config(8100));

        let request = ExecutionRequest::new(files(&[("main.py", "print('hi')")]), "python")
            .with_timeout(Duration::from_secs(5));
        let result = tokio_test::assert_ok!(h.executor.run(request).await);

        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.stderr, "");
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.timed_out);
        assert_eq!(result.status(), ExecutionStatus::Success);

        assert_eq!(h.runtime.created_count(), 1);
        assert_eq!(h.runtime.live_count(), 0);
        assert!(h.registry.is_empty().await);

        let spec = &h.runtime.specs()[0];
        assert_eq!(spec.network, NetworkPolicy::Disabled);
        assert_eq!(spec.port, None);
        assert_eq!(spec.limits.memory, "512m");
    }

    #[tokio::test]
    async fn test_execution_timeout_kills_and_removes_container() {
        let h = harness(FakeRuntime::with_behavior(|_| FakeProgram::Hang), test_config(8100));

        let request = ExecutionRequest::new(files(&[("main.py", "while True: pass")]), "python")
            .with_timeout(Duration::from_millis(100));
        let result = h.executor.run(request).await.unwrap();

        assert!(result.timed_out);
        assert_ne!(result.exit_code, Some(0));
        assert_eq!(result.status(), ExecutionStatus::Timeout);
        assert!(result.message.unwrap().contains("timed out"));
        assert_eq!(h.runtime.live_count(), 0);
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_language_is_detected_when_omitted() {
        let runtime = FakeRuntime::with_behavior(|_| FakeProgram::exit(0, "hi\n", ""));
        let h = harness(runtime, test_config(8100));

        let result = h
            .executor
            .run(ExecutionRequest::detected(files(&[("main.py", "print('hi')")])))
            .await
            .unwrap();
        assert_eq!(result.language, Language::Python);
        assert_eq!(result.entry_file, "main.py");
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(h.runtime.specs()[0].script(), "python main.py");
    }

    #[tokio::test]
    async fn test_undetectable_projects_are_unsupported() {
        let h = harness(FakeRuntime::new(), test_config(8100));

        let frontend = files(&[
            ("package.json", r#"{"dependencies": {"react": "^18.2.0"}}"#),
            ("src/App.js", "export default function App() {}"),
        ]);
        let err = h
            .executor
            .run(ExecutionRequest::detected(frontend))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::UnsupportedLanguage(_)));

        let err = h
            .executor
            .run(ExecutionRequest::detected(files(&[("README.md", "# notes")])))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::UnsupportedLanguage(_)));
        assert_eq!(h.runtime.created_count(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_language_creates_nothing() {
        let h = harness(FakeRuntime::new(), test_config(8100));

        let err = h
            .executor
            .run(ExecutionRequest::new(files(&[("main.rb", "puts 1")]), "ruby"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::UnsupportedLanguage(_)));

        let err = h
            .executor
            .run(ExecutionRequest::new(files(&[("README.md", "")]), "python"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::NoEntryFile(_)));
        assert_eq!(h.runtime.created_count(), 0);
    }

    #[tokio::test]
    async fn test_escaping_paths_are_rejected_before_any_container() {
        let h = harness(FakeRuntime::new(), test_config(8100));
        let request = ExecutionRequest::new(
            files(&[("main.py", "print(1)"), ("../evil.py", "")]),
            "python",
        );
        assert!(matches!(
            h.executor.run(request).await,
            Err(ExecutionError::Workspace(_))
        ));
        assert_eq!(h.runtime.created_count(), 0);
    }

    #[tokio::test]
    async fn test_dependencies_install_in_separate_networked_container() {
        let runtime = FakeRuntime::with_behavior(|spec: &ContainerSpec| {
            if spec.script().starts_with("pip install") {
                FakeProgram::exit(0, "", "")
            } else {
                FakeProgram::exit(0, "200\n", "")
            }
        });
        let h = harness(runtime, test_config(8100));

        let request = ExecutionRequest::new(
            files(&[("main.py", "import requests\nprint(requests.get('x').status_code)\n")]),
            "python",
        );
        let result = h.executor.run(request).await.unwrap();
        assert_eq!(result.status(), ExecutionStatus::Success);
        assert_eq!(result.stdout, "200\n");

        let specs = h.runtime.specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].network, NetworkPolicy::Bridge);
        assert!(specs[0].script().contains("requests"));
        assert_eq!(specs[1].network, NetworkPolicy::Disabled);
        assert!(specs[1]
            .env
            .contains(&("PYTHONPATH".to_string(), "/app/.deps".to_string())));
        assert_eq!(h.runtime.live_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_install_reports_install_phase() {
        let runtime = FakeRuntime::with_behavior(|spec: &ContainerSpec| {
            if spec.script().starts_with("npm install") {
                FakeProgram::exit(1, "", "npm ERR! 404 left-pad-9000\n")
            } else {
                FakeProgram::exit(0, "never runs", "")
            }
        });
        let h = harness(runtime, test_config(8100));

        let request = ExecutionRequest::new(
            files(&[("package.json", "{}"), ("index.js", "console.log(1)")]),
            "javascript",
        );
        let result = h.executor.run(request).await.unwrap();
        assert_eq!(result.phase, ExecutionPhase::Install);
        assert_eq!(result.exit_code, Some(1));
        assert!(result.stderr.contains("npm ERR!"));
        assert_eq!(result.status(), ExecutionStatus::Error);
        assert_eq!(h.runtime.created_count(), 1);
        assert_eq!(h.runtime.live_count(), 0);
    }

    #[tokio::test]
    async fn test_runaway_output_is_truncated() {
        let mut config = test_config(8100);
        config.execution.output_limit_bytes = 32;
        let runtime =
            FakeRuntime::with_behavior(|_| FakeProgram::exit(0, &"y\n".repeat(10_000), ""));
        let h = harness(runtime, config);

        let result = h
            .executor
            .run(ExecutionRequest::new(files(&[("main.py", "")]), "python"))
            .await
            .unwrap();
        assert!(result.stdout.starts_with("y\ny\n"));
        assert!(result.stdout.ends_with("[output truncated after 32 bytes]\n"));
    }

    // ---- Preview ----

    #[tokio::test]
    async fn test_preview_becomes_running_with_reachable_url() {
        let (port, _app) = http_listener().await;
        let h = harness(serving(), test_config(port));

        let started = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python").with_framework("flask"))
            .await
            .unwrap();

        assert_eq!(started.url, format!("http://localhost:{}", port));
        assert_eq!(started.port, port);
        let record = h.registry.get(&started.id).await.unwrap();
        assert_eq!(record.status, ContainerStatus::Running);
        assert_eq!(record.port, Some(port));
        assert!(record.runtime_id.is_some());
        assert!(Utc::now() < record.expires_at.unwrap());

        let spec = &h.runtime.specs()[0];
        assert_eq!(spec.network, NetworkPolicy::Bridge);
        assert_eq!(
            spec.port,
            Some(PortBinding {
                host_port: port,
                container_port: 5000
            })
        );
        assert!(spec.script().starts_with("pip install -q -r requirements.txt && flask"));
        assert_eq!(h.runtime.live_count(), 1);
    }

    #[tokio::test]
    async fn test_preview_language_and_framework_detected_from_files() {
        let (port, _app) = http_listener().await;
        let h = harness(serving(), test_config(port));

        let started = h
            .previews
            .start(PreviewRequest::detected(flask_app()))
            .await
            .unwrap();
        assert_eq!(started.framework, Framework::Flask);
        let record = h.registry.get(&started.id).await.unwrap();
        assert_eq!(record.language, Language::Python.as_str());

        let err = h
            .previews
            .start(PreviewRequest::detected(files(&[("notes.txt", "hello")])))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::UnsupportedLanguage(_)));

        let err = h
            .previews
            .start(PreviewRequest::detected(files(&[("main.py", "print(1)")])))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::UnsupportedFramework(_)));
        assert_eq!(h.runtime.created_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_start_during_pull_keeps_port_free() {
        let (port, _app) = http_listener().await;
        let h = harness(serving(), test_config(port));
        h.runtime.set_pull_delay(Duration::from_secs(5));

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            h.previews.start(PreviewRequest::new(flask_app(), "python")),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(h.registry.is_empty().await);
        assert!(!h.ports.is_reserved(port));
        assert_eq!(h.runtime.created_count(), 0);

        h.runtime.set_pull_delay(Duration::ZERO);
        let started = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python"))
            .await
            .unwrap();
        assert_eq!(started.port, port);
    }

    #[tokio::test]
    async fn test_concurrent_starts_get_distinct_ports_and_reuse_freed_ones() {
        let (first, _apps) = http_listeners(3).await;
        let mut config = test_config(first);
        config.ports.end = first + 2;
        let h = harness(serving(), config);

        let start = || h.previews.start(PreviewRequest::new(flask_app(), "python"));
        let (a, b, c) = tokio::join!(start(), start(), start());
        let started = vec![a.unwrap(), b.unwrap(), c.unwrap()];

        let mut ports: Vec<u16> = started.iter().map(|s| s.port).collect();
        ports.sort_unstable();
        assert_eq!(ports, vec![first, first + 1, first + 2]);
        assert_eq!(
            h.registry.ports_in_use().await,
            BTreeSet::from([first, first + 1, first + 2])
        );

        let err = start().await.unwrap_err();
        assert!(matches!(err, PreviewError::PortsExhausted(_)));
        assert_eq!(h.runtime.created_count(), 3);

        let middle = started.iter().find(|s| s.port == first + 1).unwrap();
        assert_eq!(h.previews.stop(&middle.id).await.unwrap(), StopOutcome::Stopped);

        let again = start().await.unwrap();
        assert_eq!(again.port, first + 1);
    }

    #[tokio::test]
    async fn test_ports_exhausted_touches_nothing() {
        let mut config = test_config(8100);
        config.ports.end = 8200;
        let h = harness(serving(), config);
        for port in 8100..=8200 {
            let mut record = ContainerRecord::new(ContainerKind::Preview, "python", "img");
            record.port = Some(port);
            record.status = ContainerStatus::Running;
            h.registry.create(record).await.unwrap();
        }

        let err = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python").with_framework("flask"))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::PortsExhausted(_)));
        assert_eq!(h.runtime.created_count(), 0);
        assert_eq!(h.registry.len().await, 101);
    }

    #[tokio::test]
    async fn test_crashing_app_fails_fast_with_logs_and_cleans_up() {
        let port = closed_port().await;
        let runtime = FakeRuntime::with_behavior(|_| {
            FakeProgram::exit(1, "", "ModuleNotFoundError: No module named 'flask'\n")
        });
        let mut config = test_config(port);
        config.preview.readiness_timeout_secs = 30;
        let h = harness(runtime, config);

        let err = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python").with_framework("flask"))
            .await
            .unwrap_err();
        match &err {
            PreviewError::StartupFailed { reason, logs } => {
                assert!(reason.contains("exited"));
                assert!(logs.contains("ModuleNotFoundError"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert_eq!(h.runtime.live_count(), 0);
        assert!(h.registry.is_empty().await);
        assert!(!h.ports.is_reserved(port));
        assert_eq!(h.ports.allocate(&BTreeSet::new()), Ok(port));

        let id = h.runtime.specs()[0].name.clone();
        assert!(h.previews.logs(&id, None).await.contains("ModuleNotFoundError"));
    }

    #[tokio::test]
    async fn test_app_that_never_listens_times_out() {
        let port = closed_port().await;
        let h = harness(serving(), test_config(port));

        let err = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python").with_framework("flask"))
            .await
            .unwrap_err();
        assert!(matches!(&err, PreviewError::StartupFailed { reason, .. } if reason.contains("did not answer")));
        assert_eq!(h.runtime.live_count(), 0);
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unsupported_frameworks_are_rejected_up_front() {
        let h = harness(serving(), test_config(8100));

        let err = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python").with_framework("rails"))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::UnsupportedFramework(_)));

        let err = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python").with_framework("express"))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::UnsupportedFramework(_)));

        let err = h
            .previews
            .start(PreviewRequest::new(files(&[("main.py", "print(1)")]), "python"))
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::UnsupportedFramework(_)));

        assert_eq!(h.runtime.created_count(), 0);
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_keeps_logs() {
        let (port, _app) = http_listener().await;
        let h = harness(serving(), test_config(port));
        let started = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python"))
            .await
            .unwrap();

        assert_eq!(h.previews.stop(&started.id).await.unwrap(), StopOutcome::Stopped);
        assert_eq!(h.previews.stop(&started.id).await.unwrap(), StopOutcome::NotFound);

        assert_eq!(h.runtime.live_count(), 0);
        assert!(h.registry.get(&started.id).await.is_none());
        assert!(h.previews.logs(&started.id, None).await.contains("serving"));
        assert_eq!(h.previews.logs("never-existed", None).await, "");
    }

    #[tokio::test]
    async fn test_extend_outcomes() {
        let (port, _app) = http_listener().await;
        let h = harness(serving(), test_config(port));
        let started = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python").with_ttl(Duration::from_secs(5 * 60)))
            .await
            .unwrap();

        let before = Utc::now();
        match h
            .previews
            .extend(&started.id, Duration::from_secs(60 * 60))
            .await
            .unwrap()
        {
            ExtendOutcome::Extended { expires_at } => {
                assert!(expires_at > started.expires_at);
                assert!(expires_at <= Utc::now() + chrono::Duration::minutes(30));
                assert!(expires_at >= before + chrono::Duration::minutes(9));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        h.registry
            .update(&started.id, |r| {
                r.expires_at = Some(Utc::now() - chrono::Duration::seconds(1))
            })
            .await
            .unwrap();
        assert_eq!(
            h.previews
                .extend(&started.id, Duration::from_secs(600))
                .await
                .unwrap(),
            ExtendOutcome::AlreadyExpired
        );
        assert_eq!(
            h.previews.extend("missing", Duration::from_secs(600)).await.unwrap(),
            ExtendOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_one_live_preview_per_session() {
        let (port, _app) = http_listener().await;
        let h = harness(serving(), test_config(port));
        let first = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python").with_session("chat-7"))
            .await
            .unwrap();

        let err = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python").with_session("chat-7"))
            .await
            .unwrap_err();
        match err {
            PreviewError::AlreadyRunning { id, url } => {
                assert_eq!(id, first.id);
                assert_eq!(url, first.url);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(h.runtime.created_count(), 1);
    }

    #[tokio::test]
    async fn test_status_promotes_ready_starting_record() {
        let (port, _app) = http_listener().await;
        let runtime = serving();
        let spec = ContainerSpec::shell(
            "orphan",
            "python:3.11-slim",
            "python app.py",
            Config::default().execution.limits(),
        );
        let container = runtime.create(&spec).await.unwrap();
        runtime.start(&container).await.unwrap();
        let h = harness(runtime, test_config(port));

        let mut record = ContainerRecord::new(ContainerKind::Preview, "python", "img");
        record.runtime_id = Some(container);
        record.port = Some(port);
        record.expires_at = Some(Utc::now() + chrono::Duration::minutes(10));
        let id = record.id.clone();
        h.registry.create(record).await.unwrap();

        let info = h.previews.status(&id).await.unwrap();
        assert_eq!(info.status, ContainerStatus::Running);
        assert!(info.seconds_remaining.unwrap() > 500);
        assert!(info.time_remaining.unwrap().starts_with("9m"));
        assert_eq!(h.previews.list().await.len(), 1);
        assert!(h.previews.status("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_stop_all_clears_every_preview() {
        let (port, _app) = http_listener().await;
        let h = harness(serving(), test_config(port));
        h.previews
            .start(PreviewRequest::new(flask_app(), "python"))
            .await
            .unwrap();

        assert_eq!(h.previews.stop_all().await, 1);
        assert_eq!(h.runtime.live_count(), 0);
        assert!(h.registry.is_empty().await);
    }

    // ---- Reaper ----

    #[tokio::test]
    async fn test_sweep_after_expiry_frees_port() {
        let (port, _app) = http_listener().await;
        let h = harness(serving(), test_config(port));
        let started = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python"))
            .await
            .unwrap();

        let early = h.reaper.sweep_at(Utc::now()).await;
        assert_eq!(early.reaped(), 0);
        assert_eq!(h.registry.len().await, 1);

        let report = h
            .reaper
            .sweep_at(started.expires_at + chrono::Duration::seconds(1))
            .await;
        assert_eq!(report.expired, 1);
        assert!(h.registry.is_empty().await);
        assert_eq!(h.runtime.live_count(), 0);
        assert_eq!(
            h.ports.allocate(&h.registry.ports_in_use().await),
            Ok(port)
        );
    }

    #[tokio::test]
    async fn test_sweep_reaps_externally_killed_container() {
        let (port, _app) = http_listener().await;
        let h = harness(serving(), test_config(port));
        let started = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python"))
            .await
            .unwrap();
        let container = h.registry.get(&started.id).await.unwrap().runtime_id.unwrap();

        h.runtime.kill_externally(&container);
        let report = h.reaper.sweep().await;
        assert_eq!(report.vanished, 1);
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_cleanup_failure_still_drops_record() {
        let (port, _app) = http_listener().await;
        let h = harness(serving(), test_config(port));
        let started = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python"))
            .await
            .unwrap();

        h.runtime.set_fail_remove(true);
        let report = h
            .reaper
            .sweep_at(started.expires_at + chrono::Duration::minutes(1))
            .await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.failed_cleanup, 1);
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unverifiable_records_go_stale() {
        let (port, _app) = http_listener().await;
        let h = harness(serving(), test_config(port));
        let started = h
            .previews
            .start(PreviewRequest::new(flask_app(), "python").with_ttl(Duration::from_secs(30 * 60)))
            .await
            .unwrap();

        h.runtime.set_fail_inspect(true);
        let now = Utc::now();
        assert_eq!(h.reaper.sweep_at(now).await.reaped(), 0);
        assert_eq!(h.registry.len().await, 1);

        let report = h.reaper.sweep_at(now + chrono::Duration::minutes(6)).await;
        assert_eq!(report.stale, 1);
        assert!(h.registry.get(&started.id).await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_isolates_records_and_ages_executions() {
        let h = harness(serving(), test_config(8100));
        let now = Utc::now();

        let young_exec = ContainerRecord::new(ContainerKind::Execution, "python", "img");
        let mut old_exec = ContainerRecord::new(ContainerKind::Execution, "python", "img");
        old_exec.created_at = now - chrono::Duration::hours(1);
        let creating = ContainerRecord::new(ContainerKind::Preview, "python", "img");
        let mut stuck = ContainerRecord::new(ContainerKind::Preview, "python", "img");
        stuck.created_at = now - chrono::Duration::minutes(10);
        let mut stopped = ContainerRecord::new(ContainerKind::Preview, "node", "img");
        stopped.status = ContainerStatus::Stopped;

        let young_id = young_exec.id.clone();
        let creating_id = creating.id.clone();
        for record in [young_exec, old_exec, creating, stuck, stopped] {
            h.registry.create(record).await.unwrap();
        }

        let report = h.reaper.sweep_at(now).await;
        assert_eq!(report.checked, 5);
        assert_eq!(report.stale, 2);
        assert_eq!(report.purged_terminal, 1);

        let left: Vec<String> = h.registry.list(None).await.into_iter().map(|r| r.id).collect();
        assert_eq!(left.len(), 2);
        assert!(left.contains(&young_id));
        assert!(left.contains(&creating_id));
    }

    #[tokio::test]
    async fn test_spawned_reaper_sweeps_until_shutdown() {
        let h = harness(serving(), test_config(8100));
        let mut record = ContainerRecord::new(ContainerKind::Preview, "python", "img");
        record.status = ContainerStatus::Expired;
        h.registry.create(record).await.unwrap();

        let mut settings = ReaperSettings::from_config(&test_config(8100));
        settings.interval = Duration::from_millis(10);
        let teardown = Teardown {
            runtime: h.runtime.clone(),
            registry: h.registry.clone(),
            ports: h.ports.clone(),
            archive: Arc::new(LogArchive::new(4)),
            grace: Duration::ZERO,
            log_tail: 10,
        };
        let handle = Arc::new(Reaper::new(teardown, settings)).spawn();

        for _ in 0..100 {
            if h.registry.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.registry.is_empty().await);
        handle.shutdown().await;
    }
}
