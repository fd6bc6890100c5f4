//! Per-run state machine transitions and cleanup

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codegen::{validate_files, CodegenError};
use crate::runtime::{BuildSpec, LogSink, RunSpec, RuntimeError, BUILD_PHASE_DELIMITER, CONTAINER_APP_PORT};
use crate::store::{LogBuffer, Run, RunStatus};

use super::{health, Engine, RunError, STOP_GRACE};

/// Drive a run from `queued` to `ready`.
///
/// Any error return is either `Cancelled` (the kill path owns the terminal
/// state) or a failure the caller publishes via [`fail`]. Resources acquired
/// but not yet recorded in the store are released locally before returning,
/// so the cleanup paths only ever see what the store knows about.
pub(super) async fn execute(
    engine: &Arc<Engine>,
    run_id: &str,
    cancel: &CancellationToken,
) -> Result<(), RunError> {
    // queued -> generating
    let run = advance(engine, run_id, RunStatus::Generating, |r| {
        r.started_at = Some(Utc::now());
    })?;

    let files = engine
        .generator
        .generate(&prompt_of(engine, &run), run.provider, &run.model, cancel)
        .await
        .map_err(|e| match e {
            CodegenError::Cancelled => RunError::Cancelled,
            e => RunError::Generation(e.to_string()),
        })?;

    validate_files(&files)?;

    // generating -> installing
    let run = advance(engine, run_id, RunStatus::Installing, |_| {})?;
    let workspace = engine.workspaces.materialize(run_id, &files).await?;

    // One build container covers install and compile; the sink flips the
    // run to `building` when the phase delimiter streams past.
    let sink = build_sink(
        engine.clone(),
        run_id.to_string(),
        run.logs_install.clone(),
        run.logs_build.clone(),
    );
    let build_spec = BuildSpec {
        run_id: run_id.to_string(),
        workspace: workspace.clone(),
        image: engine.docker.build_image.clone(),
        env: HashMap::from([("CI".to_string(), "true".to_string())]),
    };
    let exit_code = engine
        .runtime
        .build_exec(build_spec, sink, cancel.clone())
        .await
        .map_err(|e| match e {
            RuntimeError::Cancelled => RunError::Cancelled,
            e => RunError::Engine(e),
        })?;

    if exit_code != 0 {
        let tail = if run.logs_build.is_empty() {
            run.logs_install.tail(500)
        } else {
            run.logs_build.tail(500)
        };
        return Err(RunError::Build { exit_code, tail });
    }

    // building -> starting
    let port = engine.ports.allocate()?;
    let run_spec = RunSpec {
        run_id: run_id.to_string(),
        workspace,
        image: engine.docker.runtime_image.clone(),
        env: HashMap::from([
            ("NODE_ENV".to_string(), "production".to_string()),
            ("PORT".to_string(), CONTAINER_APP_PORT.to_string()),
            ("HOSTNAME".to_string(), "0.0.0.0".to_string()),
        ]),
        network: engine.docker.network.clone(),
        host_port: port,
    };

    let handle = match engine.runtime.run_exec(run_spec, cancel.clone()).await {
        Ok(handle) => handle,
        Err(e) => {
            // The port was never published; release it before the failure is
            // visible to anyone
            engine.ports.release(port);
            return Err(match e {
                RuntimeError::Cancelled => RunError::Cancelled,
                RuntimeError::StartFailed(message) => RunError::Start(message),
                e => RunError::Engine(e),
            });
        }
    };

    let internal_url = format!("http://{}:{}", engine.docker.public_host, handle.host_port);
    let container_id = handle.id.clone();

    let advanced = advance(engine, run_id, RunStatus::Starting, |r| {
        r.port = Some(port);
        r.container_id = Some(container_id.clone());
        r.internal_url = Some(internal_url.clone());
    });
    if advanced.is_err() {
        // A kill committed before the handle reached the store; it cannot
        // know about these resources, so release them here.
        if let Err(e) = engine.runtime.stop(&handle.id, Duration::ZERO).await {
            warn!("Failed to stop orphaned container {}: {}", handle.id, e);
        }
        engine.ports.release(port);
        let _ = engine.workspaces.remove(run_id).await;
        return Err(RunError::Cancelled);
    }

    // starting -> healthy
    match health::probe(&engine.probe_client, &internal_url, &engine.health, cancel).await {
        Ok(_) => {}
        Err(health::ProbeError::Cancelled) => return Err(RunError::Cancelled),
        Err(health::ProbeError::Exhausted { attempts }) => {
            let mut message = format!(
                "health check failed after {} attempts against {}",
                attempts, internal_url
            );
            // A dead container is more informative than a silent port
            if let Ok(state) = engine.runtime.inspect(&container_id).await {
                if !state.running {
                    match state.exit_code {
                        Some(code) => {
                            message.push_str(&format!(" (container exited with code {})", code))
                        }
                        None => message.push_str(" (container is not running)"),
                    }
                }
            }
            return Err(RunError::Health(message));
        }
    }

    advance(engine, run_id, RunStatus::Healthy, |_| {})?;

    // healthy -> ready. Registration happens first so any reader that sees
    // `ready` in the store finds the registry entry.
    engine.registry.register(run_id, internal_url.clone());
    if advance(engine, run_id, RunStatus::Ready, |r| {
        r.completed_at = Some(Utc::now());
    })
    .is_err()
    {
        engine.registry.unregister(run_id);
        return Err(RunError::Cancelled);
    }

    Ok(())
}

/// Publish a run failure: record the error, then run the uniform cleanup
pub(super) async fn fail(engine: &Arc<Engine>, run_id: &str, error: RunError) {
    let message = error.to_string();
    warn!("Run {} failed: {}", run_id, message);

    if let Some(run) = engine.store.run(run_id) {
        // Keep the runtime container's output for the postmortem before the
        // container is removed
        if let Some(container) = &run.container_id {
            if let Ok(logs) = engine.runtime.logs(container).await {
                run.logs_start.append(&logs);
            }
        }
        run.logs_error.append(&format!("{}\n", message));
    }

    cleanup(engine, run_id).await;

    if let Some(updated) = engine.store.transition(run_id, RunStatus::Failed, |r| {
        r.error = Some(message);
        r.completed_at = Some(Utc::now());
    }) {
        engine.notify(updated);
    }
}

/// Uniform resource cleanup; every step is idempotent and tolerates racing
/// cleaners
pub(super) async fn cleanup(engine: &Arc<Engine>, run_id: &str) {
    let _ = cleanup_with_errors(engine, run_id).await;
}

pub(super) async fn cleanup_with_errors(engine: &Engine, run_id: &str) -> Vec<String> {
    let mut errors = Vec::new();

    // Unregister before any terminal state becomes visible
    engine.registry.unregister(run_id);

    if let Some(container) = engine.store.take_container(run_id) {
        if let Err(e) = engine.runtime.stop(&container, STOP_GRACE).await {
            errors.push(format!("stop {}: {}", container, e));
        }
    }

    // A one-shot build container is never recorded in the store; remove it
    // by name in case the run was interrupted mid-build.
    let build_container = format!("build-{}", run_id);
    if let Err(e) = engine.runtime.stop(&build_container, Duration::ZERO).await {
        match e {
            RuntimeError::ContainerNotFound(_) => {}
            e => debug!("Build container sweep for {}: {}", run_id, e),
        }
    }

    if let Some(port) = engine.store.take_port(run_id) {
        engine.ports.release(port);
    }

    if let Err(e) = engine.workspaces.remove(run_id).await {
        errors.push(format!("workspace: {}", e));
    }

    errors
}

fn prompt_of(engine: &Engine, run: &Run) -> String {
    engine
        .store
        .session(&run.session_id)
        .map(|session| session.prompt)
        .unwrap_or_default()
}

/// Transition helper: store update, log line, UI notification.
///
/// A rejected transition means a kill won the race; the caller unwinds with
/// `Cancelled`.
fn advance<F>(
    engine: &Arc<Engine>,
    run_id: &str,
    status: RunStatus,
    mutate: F,
) -> Result<Run, RunError>
where
    F: FnOnce(&mut Run),
{
    let run = engine
        .store
        .transition(run_id, status, mutate)
        .ok_or(RunError::Cancelled)?;

    info!("Run {} -> {}", run_id, status);
    engine.notify(run.clone());
    Ok(run)
}

/// Sink splitting the combined build stream at the phase delimiter.
///
/// Output before the delimiter is install output, after it build output; the
/// first sighting flips the run to `building`.
fn build_sink(
    engine: Arc<Engine>,
    run_id: String,
    install: LogBuffer,
    build: LogBuffer,
) -> LogSink {
    let in_build = Arc::new(AtomicBool::new(false));

    Arc::new(move |chunk: &str| {
        if in_build.load(Ordering::Relaxed) {
            build.append(chunk);
            return;
        }

        let Some(index) = chunk.find(BUILD_PHASE_DELIMITER) else {
            install.append(chunk);
            return;
        };

        install.append(&chunk[..index]);

        let rest = &chunk[index + BUILD_PHASE_DELIMITER.len()..];
        let rest = rest
            .strip_prefix("\r\n")
            .or_else(|| rest.strip_prefix('\n'))
            .unwrap_or(rest);
        build.append(rest);

        in_build.store(true, Ordering::Relaxed);
        if let Some(run) = engine.store.transition(&run_id, RunStatus::Building, |_| {}) {
            engine.notify(run);
        }
    })
}
