//! Docker-backed sandbox runtime.
//!
//! Talks to the local Docker daemon through bollard. Sandboxes are plain
//! containers running `/bin/sh -c <command>` with `AutoRemove` set, so the
//! daemon reclaims them on exit.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bollard::Docker;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, EventMessage, HostConfig};
use bollard::query_parameters::{
    AttachContainerOptionsBuilder, CreateContainerOptionsBuilder, CreateImageOptionsBuilder,
    EventsOptions, InspectContainerOptions, ListImagesOptionsBuilder, RemoveContainerOptionsBuilder,
    StartContainerOptions, WaitContainerOptionsBuilder,
};
use futures::{StreamExt, TryStreamExt};
use tracing::debug;

use crate::error::{SandboxError, SandboxResult};
use crate::runtime::{
    OutputChunk, OutputStream, RuntimeFuture, SandboxExit, SandboxRuntime, SandboxSpec,
};

/// Shell used as the fixed entrypoint of every sandbox.
const ENTRYPOINT: [&str; 2] = ["/bin/sh", "-c"];

/// Sandbox runtime backed by the Docker Engine API.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform default socket.
    pub fn connect_local() -> SandboxResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::Connect(e.to_string()))?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Container configuration for a sandbox spec.
    fn container_body(spec: &SandboxSpec) -> ContainerCreateBody {
        ContainerCreateBody {
            image: Some(spec.image.clone()),
            entrypoint: Some(ENTRYPOINT.iter().map(|s| s.to_string()).collect()),
            cmd: Some(vec![spec.command.clone()]),
            attach_stdin: Some(false),
            open_stdin: Some(false),
            stdin_once: Some(false),
            tty: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(HostConfig {
                auto_remove: Some(true),
                ..HostConfig::default()
            }),
            ..ContainerCreateBody::default()
        }
    }
}

/// Append `:latest` to references that carry neither a tag nor a digest.
pub fn normalize_image_ref(image: &str) -> String {
    let (_, tag) = split_reference(image);
    if tag.is_empty() && !image.contains('@') {
        format!("{image}:latest")
    } else {
        image.to_string()
    }
}

/// Split `repo[:tag]` or `repo[:tag]@digest` into the repository and the
/// tag or digest to pull, without mistaking a registry port for a tag.
pub fn split_reference(image: &str) -> (&str, &str) {
    if let Some((name, digest)) = image.split_once('@') {
        return (split_tag(name).0, digest);
    }
    split_tag(image)
}

fn split_tag(image: &str) -> (&str, &str) {
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, ""),
    }
}

/// Exit status from the newest `die` event in `events`.
fn exit_from_events(events: &[EventMessage]) -> Option<SandboxExit> {
    events.iter().rev().find_map(|event| {
        if event.action.as_deref() != Some("die") {
            return None;
        }
        let attributes = event.actor.as_ref()?.attributes.as_ref()?;
        let status_code = attributes.get("exitCode")?.parse::<i64>().ok()?;
        Some(SandboxExit {
            status_code,
            error: None,
        })
    })
}

fn unix_secs(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

fn is_not_found_error(error: &BollardError) -> bool {
    match error {
        BollardError::DockerResponseServerError { status_code, .. } => *status_code == 404,
        _ => false,
    }
}

impl SandboxRuntime for DockerRuntime {
    fn list_image_tags(&self) -> RuntimeFuture<'_, Vec<String>> {
        Box::pin(async move {
            let images = self
                .docker
                .list_images(Some(ListImagesOptionsBuilder::new().all(false).build()))
                .await
                .map_err(|e| SandboxError::runtime("list_images", "local", e))?;
            Ok(images.into_iter().flat_map(|img| img.repo_tags).collect())
        })
    }

    fn pull_image<'a>(&'a self, image: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let (from_image, tag) = split_reference(image);
            let tag = if tag.is_empty() { "latest" } else { tag };
            debug!(%image, "pulling image");
            self.docker
                .create_image(
                    Some(
                        CreateImageOptionsBuilder::new()
                            .from_image(from_image)
                            .tag(tag)
                            .build(),
                    ),
                    None,
                    None,
                )
                .try_collect::<Vec<_>>()
                .await
                .map_err(|e| SandboxError::runtime("pull_image", image, e))?;
            Ok(())
        })
    }

    fn sandbox_exists<'a>(&'a self, identity: &'a str) -> RuntimeFuture<'a, bool> {
        Box::pin(async move {
            match self
                .docker
                .inspect_container(identity, None::<InspectContainerOptions>)
                .await
            {
                Ok(_) => Ok(true),
                Err(e) if is_not_found_error(&e) => Ok(false),
                Err(e) => Err(SandboxError::runtime("inspect_container", identity, e)),
            }
        })
    }

    fn remove_sandbox<'a>(&'a self, identity: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.docker
                .remove_container(
                    identity,
                    Some(RemoveContainerOptionsBuilder::new().force(true).build()),
                )
                .await
                .map_err(|e| {
                    if is_not_found_error(&e) {
                        SandboxError::NotFound(identity.to_string())
                    } else {
                        SandboxError::runtime("remove_container", identity, e)
                    }
                })
        })
    }

    fn create_sandbox<'a>(&'a self, spec: &'a SandboxSpec) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.docker
                .create_container(
                    Some(CreateContainerOptionsBuilder::new().name(&spec.identity).build()),
                    Self::container_body(spec),
                )
                .await
                .map_err(|e| SandboxError::runtime("create_container", &spec.identity, e))?;
            Ok(())
        })
    }

    fn attach_output<'a>(&'a self, identity: &'a str) -> RuntimeFuture<'a, OutputStream> {
        Box::pin(async move {
            let attached = self
                .docker
                .attach_container(
                    identity,
                    Some(
                        AttachContainerOptionsBuilder::new()
                            .stdout(true)
                            .stderr(true)
                            .stream(true)
                            .logs(true)
                            .build(),
                    ),
                )
                .await
                .map_err(|e| SandboxError::runtime("attach_container", identity, e))?;

            let target = identity.to_string();
            let stream = attached.output.filter_map(move |item| {
                let chunk = match item {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(OutputChunk::stdout(message)))
                    }
                    Ok(LogOutput::StdErr { message }) => Some(Ok(OutputChunk::stderr(message))),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(SandboxError::runtime("read_output", &target, e))),
                };
                futures::future::ready(chunk)
            });
            Ok(Box::pin(stream) as OutputStream)
        })
    }

    fn start_sandbox<'a>(&'a self, identity: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.docker
                .start_container(identity, None::<StartContainerOptions>)
                .await
                .map_err(|e| SandboxError::runtime("start_container", identity, e))
        })
    }

    fn wait_sandbox<'a>(&'a self, identity: &'a str) -> RuntimeFuture<'a, SandboxExit> {
        Box::pin(async move {
            // With AutoRemove set, "removed" still reports the exit code. A
            // 404 here means the sandbox was gone before the wait arrived.
            let mut responses = Box::pin(self.docker.wait_container(
                identity,
                Some(WaitContainerOptionsBuilder::new().condition("removed").build()),
            ));
            match responses.next().await {
                Some(Ok(resp)) => Ok(SandboxExit {
                    status_code: resp.status_code,
                    error: resp
                        .error
                        .and_then(|e| e.message)
                        .filter(|m| !m.is_empty()),
                }),
                // bollard reports a non-zero exit as an error carrying the code.
                Some(Err(BollardError::DockerContainerWaitError { error, code })) => {
                    Ok(SandboxExit {
                        status_code: code,
                        error: Some(error).filter(|m| !m.is_empty()),
                    })
                }
                Some(Err(e)) if is_not_found_error(&e) => {
                    Err(SandboxError::NotFound(identity.to_string()))
                }
                Some(Err(e)) => Err(SandboxError::runtime("wait_container", identity, e)),
                None => Err(SandboxError::runtime(
                    "wait_container",
                    identity,
                    "wait stream ended without a status",
                )),
            }
        })
    }

    fn recover_exit<'a>(
        &'a self,
        identity: &'a str,
        since: SystemTime,
    ) -> RuntimeFuture<'a, Option<SandboxExit>> {
        Box::pin(async move {
            // Event times have second resolution; widen the window by one
            // second on each side. A bounded `until` makes the stream end.
            let filters = HashMap::from([
                ("type".to_string(), vec!["container".to_string()]),
                ("container".to_string(), vec![identity.to_string()]),
                ("event".to_string(), vec!["die".to_string()]),
            ]);
            let options = EventsOptions {
                since: Some(unix_secs(since).saturating_sub(1).to_string()),
                until: Some((unix_secs(SystemTime::now()) + 1).to_string()),
                filters: Some(filters),
                ..EventsOptions::default()
            };
            let events: Vec<EventMessage> = self
                .docker
                .events(Some(options))
                .try_collect()
                .await
                .map_err(|e| SandboxError::runtime("events", identity, e))?;
            Ok(exit_from_events(&events))
        })
    }
}
