//! Container runtime used to run builds and export build images

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace};

use crate::archive::partial_path;

/// Mount point of the build directory inside the container.
pub const BUILD_MOUNT: &str = "/home/gradle";
/// Unprivileged user the build runs as.
pub const BUILD_USER: &str = "1000";
/// Tool cache directory, relative to the mounted build directory.
pub const TOOL_CACHE_DIR: &str = "gradle_cache";

/// One build tool invocation inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInvocation {
    pub image: String,
    /// Host directory mounted read-write at [`BUILD_MOUNT`]
    pub workdir: PathBuf,
    pub command: String,
}

impl RunInvocation {
    /// Shell line run in the container: the build command with the tool cache
    /// redirected into the mounted directory.
    pub fn shell_line(&self) -> String {
        format!(
            "export GRADLE_USER_HOME={cache} && {cmd} -g {cache} -q",
            cache = TOOL_CACHE_DIR,
            cmd = self.command
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn run(&self, invocation: &RunInvocation) -> Result<RunOutput>;

    /// Writes `image` as a tar archive to `dest`.
    async fn save_image(&self, image: &str, dest: &Path) -> Result<()>;
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        info!(image, "Pulling build image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            let progress = progress.with_context(|| format!("Failed to pull image {}", image))?;
            if let Some(status) = progress.status {
                trace!(image, status = %status, "Pull progress");
            }
        }
        Ok(())
    }

    async fn collect_logs(&self, id: &str) -> (String, String) {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut stream = self.docker.logs(id, Some(options));
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdErr { message }) => {
                    stderr.push_str(&String::from_utf8_lossy(&message))
                }
                Ok(output) => stdout.push_str(&output.to_string()),
                Err(e) => {
                    debug!(container = id, error = %e, "Log stream ended early");
                    break;
                }
            }
        }
        (stdout, stderr)
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let mut wait = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);
        match wait.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // non-zero exits surface as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e).context("Failed to wait for build container"),
            None => anyhow::bail!("No wait result for container {}", id),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, invocation: &RunInvocation) -> Result<RunOutput> {
        self.ensure_image(&invocation.image).await?;

        let workdir = std::fs::canonicalize(&invocation.workdir).with_context(|| {
            format!("Build directory {} not found", invocation.workdir.display())
        })?;
        let bind = format!("{}:{}", workdir.display(), BUILD_MOUNT);

        let config = Config {
            image: Some(invocation.image.clone()),
            user: Some(BUILD_USER.to_string()),
            working_dir: Some(BUILD_MOUNT.to_string()),
            cmd: Some(vec![
                "bash".to_string(),
                "-c".to_string(),
                invocation.shell_line(),
            ]),
            host_config: Some(HostConfig {
                binds: Some(vec![bind]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .context("Failed to create build container")?;
        debug!(container = %container.id, image = %invocation.image, "Created build container");

        let result = async {
            self.docker
                .start_container(&container.id, None::<StartContainerOptions<String>>)
                .await
                .context("Failed to start build container")?;
            let exit_code = self.wait(&container.id).await?;
            let (stdout, stderr) = self.collect_logs(&container.id).await;
            Ok(RunOutput {
                exit_code,
                stdout,
                stderr,
            })
        }
        .await;

        let _ = self
            .docker
            .remove_container(
                &container.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;

        result
    }

    async fn save_image(&self, image: &str, dest: &Path) -> Result<()> {
        let partial = partial_path(dest);
        let mut file = tokio::fs::File::create(&partial)
            .await
            .with_context(|| format!("Failed to create {}", partial.display()))?;

        let mut stream = self.docker.export_image(image);
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(e).with_context(|| format!("Failed to export image {}", image));
                }
            };
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", partial.display()))?;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, dest)
            .await
            .with_context(|| format!("Failed to move image archive to {}", dest.display()))?;
        debug!(image, dest = %dest.display(), "Saved build image");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_line() {
        let invocation = RunInvocation {
            image: "gradle:7.4.2-jdk11".to_string(),
            workdir: PathBuf::from("/tmp/build"),
            command: "gradle build -x test".to_string(),
        };
        assert_eq!(
            invocation.shell_line(),
            "export GRADLE_USER_HOME=gradle_cache && gradle build -x test -g gradle_cache -q"
        );
    }

    #[test]
    fn test_run_output_success() {
        assert!(RunOutput::default().success());
        assert!(!RunOutput {
            exit_code: 1,
            ..Default::default()
        }
        .success());
    }
}
