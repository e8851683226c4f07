use super::descriptor::{self, BuildDescriptor};
use super::mirror;
use super::runtime::{ContainerRuntime, RunInvocation, RunOutput};
use super::{sanitize_image_name, BuildError, BUILD_FILE, SETTINGS_FILE};
use crate::config::{MirrorConfig, ProxySettings};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

const CORE_PLUGINS_MARKER: &str = "gradle core plugins";

/// When the mirror repository is written into the build scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPolicy {
    pub url: String,
    /// Inject before the first attempt
    pub force: bool,
    /// Inject and retry once after a failed attempt
    pub auto: bool,
}

#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub descriptor_name: String,
    pub mirror: Option<MirrorPolicy>,
    pub proxy: Option<ProxySettings>,
}

impl BuildSettings {
    pub fn from_config(config: &MirrorConfig) -> Self {
        let mirror = config.mirror_enabled().then(|| MirrorPolicy {
            url: config.nexus_maven_url.clone(),
            force: config.nexus_force_add_to_gradle,
            auto: config.nexus_auto_add_to_gradle,
        });
        Self {
            descriptor_name: config.build_descriptor.clone(),
            mirror,
            proxy: config.proxy_settings(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub descriptor: BuildDescriptor,
    /// Directory holding the descriptor; the build ran with it mounted
    pub descriptor_dir: PathBuf,
    pub retried: bool,
    pub retry_succeeded: bool,
}

pub struct BuildExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    settings: BuildSettings,
}

impl BuildExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: BuildSettings) -> Self {
        Self { runtime, settings }
    }

    /// Finds the descriptor directory under `source_root` and checks the main
    /// build file sits next to it.
    pub fn locate(&self, source_root: &Path) -> Result<PathBuf, BuildError> {
        let name = &self.settings.descriptor_name;
        let path = descriptor::find(source_root, name).ok_or_else(|| {
            BuildError::DescriptorNotFound {
                name: name.clone(),
                root: source_root.to_path_buf(),
            }
        })?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| source_root.to_path_buf());

        let build_file = dir.join(BUILD_FILE);
        if !build_file.is_file() {
            return Err(BuildError::BuildFileMissing(build_file));
        }
        Ok(dir)
    }

    /// Builds the service extracted under `source_root` and collects the
    /// build image and scripts into `service_dir`.
    pub async fn build(
        &self,
        source_root: &Path,
        service_dir: &Path,
    ) -> Result<BuildOutcome, BuildError> {
        let start = Instant::now();
        let dir = self.locate(source_root)?;
        let descriptor_path = dir.join(&self.settings.descriptor_name);
        let content = fs::read_to_string(&descriptor_path)
            .map_err(|e| BuildError::io(&descriptor_path, e))?;

        let mut parsed = descriptor::parse(&content)?;
        if let Some(proxy) = &self.settings.proxy {
            parsed.command = descriptor::with_proxy(&parsed.command, proxy);
        }
        info!(
            image = %parsed.image,
            tool_version = %parsed.tool_version,
            "Building in {}",
            dir.display()
        );

        if let Some(mirror) = self.settings.mirror.as_ref().filter(|m| m.force) {
            self.inject_mirror(&dir, mirror, &parsed.tool_version, true)?;
        }

        let invocation = RunInvocation {
            image: parsed.image.clone(),
            workdir: dir.clone(),
            command: parsed.command.clone(),
        };

        let first = self.run(&invocation).await?;
        let mut retried = false;
        if !first.success() {
            let Some(mirror) = self.settings.mirror.as_ref().filter(|m| m.auto) else {
                log_failure(&invocation, &first);
                return Err(BuildError::BuildFailed {
                    image: parsed.image,
                    exit_code: first.exit_code,
                    retried: false,
                });
            };

            debug!("Build failed, retrying with mirror repository");
            let touch_settings = first.stderr.to_lowercase().contains(CORE_PLUGINS_MARKER);
            self.inject_mirror(&dir, mirror, &parsed.tool_version, touch_settings)?;
            retried = true;

            let second = self.run(&invocation).await?;
            if !second.success() {
                log_failure(&invocation, &second);
                return Err(BuildError::BuildFailed {
                    image: parsed.image,
                    exit_code: second.exit_code,
                    retried: true,
                });
            }
            trace!(stdout = %second.stdout, stderr = %second.stderr, "Build output");
        } else {
            trace!(stdout = %first.stdout, stderr = %first.stderr, "Build output");
        }

        self.collect(&dir, service_dir, &parsed.image).await?;
        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            retried,
            "Build complete"
        );

        Ok(BuildOutcome {
            descriptor: parsed,
            descriptor_dir: dir,
            retried,
            retry_succeeded: retried,
        })
    }

    async fn run(&self, invocation: &RunInvocation) -> Result<RunOutput, BuildError> {
        debug!(command = %invocation.shell_line(), "Running build");
        self.runtime
            .run(invocation)
            .await
            .map_err(BuildError::runtime)
    }

    fn inject_mirror(
        &self,
        dir: &Path,
        mirror: &MirrorPolicy,
        tool_version: &str,
        settings_too: bool,
    ) -> Result<(), BuildError> {
        let build_file = dir.join(BUILD_FILE);
        mirror::inject_build_file(&build_file, &mirror.url, tool_version)
            .map_err(|e| BuildError::io(&build_file, e))?;
        if settings_too {
            let settings = dir.join(SETTINGS_FILE);
            mirror::inject_settings_file(&settings, &mirror.url, tool_version)
                .map_err(|e| BuildError::io(&settings, e))?;
        }
        Ok(())
    }

    /// Exports the build image and copies the build scripts.
    async fn collect(&self, dir: &Path, service_dir: &Path, image: &str) -> Result<(), BuildError> {
        let images = service_dir.join("docker_images");
        let configs = service_dir.join("gradle_configs");
        for area in [&images, &configs] {
            fs::create_dir_all(area).map_err(|e| BuildError::io(area, e))?;
        }

        let image_file = images.join(format!("{}.tar", sanitize_image_name(image)));
        self.runtime
            .save_image(image, &image_file)
            .await
            .map_err(BuildError::runtime)?;

        for name in [BUILD_FILE, SETTINGS_FILE] {
            let src = dir.join(name);
            if !src.is_file() {
                warn!(file = %src.display(), "Build script missing, not copied");
                continue;
            }
            let dest = configs.join(name);
            fs::copy(&src, &dest).map_err(|e| BuildError::io(&dest, e))?;
        }
        Ok(())
    }
}

fn log_failure(invocation: &RunInvocation, output: &RunOutput) {
    error!(
        image = %invocation.image,
        exit_code = output.exit_code,
        stdout = %output.stdout,
        stderr = %output.stderr,
        "Build failed"
    );
}
