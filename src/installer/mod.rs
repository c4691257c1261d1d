// file: src/installer/mod.rs
// version: 2.0.0
// guid: 6f1a3d8e-2c47-4b9a-8e52-1d7c9b4a0f36

//! Installation pipeline
//!
//! Every installation walks the same eight stages. What happens in a stage
//! depends on the installer family of the OS: a family implements
//! [`InstallerFamily`], overriding only the hooks where it differs from the
//! defaults, and [`Pipeline::run`] drives the stages in order. The first
//! failing stage aborts the run; cleanup is left to the caller.

pub mod agama;
pub mod anaconda;
pub mod autofile;
pub mod autoyast;
pub mod checker;
pub mod cmdline;
pub mod context;
pub mod debian;
pub mod events;
pub mod logtail;
pub mod subiquity;

pub use autofile::Autofile;
pub use checker::{InstallationChecker, SshPostInstallChecker};
pub use context::RenderContext;
pub use events::{EventSource, WebhookEventSource};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::logging::with_async_operation_span;
use crate::model::{InstallJob, OperatingSystem};
use crate::network::{connect_with_retry, RemoteShell, RetryPolicy, SshConnector, SshTarget};
use crate::platform::Platform;
use crate::{AutoinstallError, Result};

/// Installer families, keyed by the OS type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallerKind {
    Anaconda,
    Autoyast,
    DebianInstaller,
    Subiquity,
    Agama,
}

impl InstallerKind {
    pub const ALL: [InstallerKind; 5] = [
        InstallerKind::Anaconda,
        InstallerKind::Autoyast,
        InstallerKind::DebianInstaller,
        InstallerKind::Subiquity,
        InstallerKind::Agama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallerKind::Anaconda => "anaconda",
            InstallerKind::Autoyast => "autoyast",
            InstallerKind::DebianInstaller => "debian-installer",
            InstallerKind::Subiquity => "subiquity",
            InstallerKind::Agama => "agama",
        }
    }

    /// Installer family installing `os`
    ///
    /// Debian family releases from 20.04 on use subiquity unless the legacy
    /// installer was requested.
    pub fn for_os(os: &OperatingSystem, legacy_installer: bool) -> Result<Self> {
        let kind = match os.os_type.as_str() {
            "redhat" => InstallerKind::Anaconda,
            "suse" => InstallerKind::Autoyast,
            "debian" if os.major >= 2004 => {
                if legacy_installer {
                    info!("NOTE: legacy installer requested for {}", os.pretty_name);
                    InstallerKind::DebianInstaller
                } else {
                    InstallerKind::Subiquity
                }
            }
            "debian" => InstallerKind::DebianInstaller,
            "subiquity" => InstallerKind::Subiquity,
            "agama" => InstallerKind::Agama,
            other => {
                return Err(AutoinstallError::value(format!(
                    "OS type '{}' is not supported for installation",
                    other
                )))
            }
        };
        Ok(kind)
    }
}

impl fmt::Display for InstallerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    CollectInfo,
    CreateAutofile,
    TargetBoot,
    WaitInstall,
    TargetReboot,
    CheckInstallation,
    PostInstall,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Init,
        Stage::CollectInfo,
        Stage::CreateAutofile,
        Stage::TargetBoot,
        Stage::WaitInstall,
        Stage::TargetReboot,
        Stage::CheckInstallation,
        Stage::PostInstall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::CollectInfo => "collect_info",
            Stage::CreateAutofile => "create_autofile",
            Stage::TargetBoot => "target_boot",
            Stage::WaitInstall => "wait_install",
            Stage::TargetReboot => "target_reboot",
            Stage::CheckInstallation => "check_installation",
            Stage::PostInstall => "post_install",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a family needs to drive one installation
pub struct InstallerEnv {
    pub job: InstallJob,
    pub platform: Box<dyn Platform>,
    pub ssh: Arc<dyn SshConnector>,
    pub config: Arc<EngineConfig>,
    pub checker: Option<Arc<dyn InstallationChecker>>,
    pub autofile: Autofile,
    info: Option<RenderContext>,
}

impl InstallerEnv {
    pub fn new(
        job: InstallJob,
        platform: Box<dyn Platform>,
        ssh: Arc<dyn SshConnector>,
        config: Arc<EngineConfig>,
        checker: Option<Arc<dyn InstallationChecker>>,
    ) -> Self {
        let autofile = Autofile::for_job(&job, &config);
        Self {
            job,
            platform,
            ssh,
            config,
            checker,
            autofile,
            info: None,
        }
    }

    /// Rendering context, available once `collect_info` ran
    pub fn info(&self) -> Result<&RenderContext> {
        self.info
            .as_ref()
            .ok_or_else(|| AutoinstallError::runtime("Installation information not collected"))
    }

    pub fn info_mut(&mut self) -> Result<&mut RenderContext> {
        self.info
            .as_mut()
            .ok_or_else(|| AutoinstallError::runtime("Installation information not collected"))
    }

    pub fn command_timeout(&self) -> Duration {
        self.config.timeouts.command()
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.timeouts.poll_interval()
    }

    /// Deadline of an installation starting now
    pub fn install_deadline(&self) -> Instant {
        Instant::now() + self.config.timeouts.install()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let t = &self.config.timeouts;
        RetryPolicy {
            budget: t.connection(),
            backoff: t.connection_retry(),
            attempt_timeout: t.command(),
        }
    }

    /// Shell on the installer environment
    pub async fn installer_shell(&self) -> Result<Box<dyn RemoteShell>> {
        self.shell(SshTarget::installer(&self.job)).await
    }

    /// Shell on the installed system
    pub async fn installed_shell(&self) -> Result<Box<dyn RemoteShell>> {
        self.shell(SshTarget::installed(&self.job)).await
    }

    async fn shell(&self, target: SshTarget) -> Result<Box<dyn RemoteShell>> {
        info!(
            "Waiting for connection to be available ({} secs)",
            self.config.timeouts.connection
        );
        connect_with_retry(self.ssh.as_ref(), &target, self.retry_policy()).await
    }

    /// Build the base rendering context
    pub fn collect_info(&mut self) -> Result<()> {
        let info = context::collect_info(&self.job, &self.autofile.url)?;
        self.info = Some(info);
        Ok(())
    }

    /// Render the job's autofile template
    pub fn render_autofile(&self) -> Result<String> {
        let template = self
            .job
            .template
            .as_ref()
            .ok_or_else(|| AutoinstallError::value("No autoinstallation template specified"))?;
        info!("autotemplate will be used: '{}'", template.name);
        cmdline::render(template, self.info()?)
    }

    pub async fn create_autofile(&self) -> Result<()> {
        info!("generating autofile");
        let content = self.render_autofile()?;
        self.autofile.write(&content).await
    }

    /// Render the installer cmdline and boot the target with it
    pub async fn boot_installer(&self) -> Result<()> {
        let template = self.job.installer_template.as_ref().ok_or_else(|| {
            AutoinstallError::value("No installer command line template specified")
        })?;
        let kargs = cmdline::installer_cmdline(
            template,
            self.info()?,
            self.job.installer_cmdline.as_deref(),
        )?;
        info!("kernel cmdline for installer is: {}", kargs);
        self.platform.boot(&kargs).await
    }

    /// Point the platform at the boot device of the installed system
    pub async fn set_boot_device(&self) -> Result<()> {
        let device = self
            .job
            .system_profile
            .boot_device()
            .ok_or_else(|| AutoinstallError::value("No boot device available"))?;
        info!("Setting boot device to: {}", device);
        self.platform.set_boot_device(device).await
    }

    pub async fn reboot_target(&self) -> Result<()> {
        self.set_boot_device().await?;
        self.platform.reboot().await
    }

    /// Liveness check of the installed system followed by the checker
    pub async fn check_installation(&self) -> Result<()> {
        let Some(checker) = &self.checker else {
            info!("No installation checker configured, skipping verification");
            return Ok(());
        };

        let mut shell = self.installed_shell().await?;
        let result = shell.run("echo 1", self.command_timeout()).await;
        shell.close().await;
        let (ret, _) = result?;
        if ret != 0 {
            return Err(AutoinstallError::runtime(
                "Error while checking the installed system.",
            ));
        }

        info!("Verifying if installed system match expected parameters");
        checker.verify(&self.job).await
    }
}

/// Stage hooks of an installer family
///
/// Only `wait_install` has no default; how completion is detected is what
/// sets the families apart.
#[async_trait::async_trait]
pub trait InstallerFamily: Send {
    fn kind(&self) -> InstallerKind;

    fn env(&self) -> &InstallerEnv;

    fn env_mut(&mut self) -> &mut InstallerEnv;

    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    async fn collect_info(&mut self) -> Result<()> {
        self.env_mut().collect_info()
    }

    async fn create_autofile(&mut self) -> Result<()> {
        self.env().create_autofile().await
    }

    async fn target_boot(&mut self) -> Result<()> {
        self.env().boot_installer().await
    }

    async fn wait_install(&mut self) -> Result<()>;

    async fn target_reboot(&mut self) -> Result<()> {
        self.env().reboot_target().await
    }

    async fn check_installation(&mut self) -> Result<()> {
        self.env().check_installation().await
    }

    async fn post_install(&mut self) -> Result<()> {
        Ok(())
    }

    /// Remove generated artifacts, safe to call more than once
    async fn cleanup(&mut self) -> Result<()> {
        self.env().autofile.remove().await
    }
}

/// Build the installer family for `kind`
pub fn create_installer(
    kind: InstallerKind,
    env: InstallerEnv,
    events: Arc<dyn EventSource>,
) -> Result<Box<dyn InstallerFamily>> {
    let installer: Box<dyn InstallerFamily> = match kind {
        InstallerKind::Anaconda => Box::new(anaconda::AnacondaInstaller::new(env)?),
        InstallerKind::Autoyast => Box::new(autoyast::AutoyastInstaller::new(env)?),
        InstallerKind::DebianInstaller => Box::new(debian::DebianInstaller::new(env)),
        InstallerKind::Subiquity => Box::new(subiquity::SubiquityInstaller::new(env, events)),
        InstallerKind::Agama => Box::new(agama::AgamaInstaller::new(env)),
    };
    Ok(installer)
}

/// Overall state of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    Preparing,
    Running,
    Completed,
    Failed,
}

/// Progress of a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub session_id: Uuid,
    pub stage: Option<Stage>,
    pub status: PipelineStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Drives installer families through the stages
pub struct Pipeline {
    state: Arc<RwLock<PipelineState>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PipelineState {
                session_id: Uuid::new_v4(),
                stage: None,
                status: PipelineStatus::Preparing,
                started_at: Utc::now(),
                completed_at: None,
                error_message: None,
            })),
        }
    }

    /// Shared view of the run's progress
    pub fn state(&self) -> Arc<RwLock<PipelineState>> {
        self.state.clone()
    }

    /// Run every stage of `family` in order
    pub async fn run(&self, family: &mut dyn InstallerFamily) -> Result<()> {
        let session_id = {
            let mut state = self.state.write().await;
            state.status = PipelineStatus::Running;
            state.started_at = Utc::now();
            state.session_id
        };
        info!(
            "Starting {} installation, session {}",
            family.kind(),
            session_id
        );

        let result = self.run_stages(family).await;

        let mut state = self.state.write().await;
        state.completed_at = Some(Utc::now());
        match &result {
            Ok(()) => {
                state.status = PipelineStatus::Completed;
                info!("Installation finished successfully");
            }
            Err(e) => {
                state.status = PipelineStatus::Failed;
                state.error_message = Some(e.to_string());
                error!(
                    "Installation failed in stage {}: {}",
                    state.stage.map(|s| s.as_str()).unwrap_or("none"),
                    e
                );
            }
        }
        result
    }

    async fn run_stages(&self, family: &mut dyn InstallerFamily) -> Result<()> {
        for stage in Stage::ALL {
            self.state.write().await.stage = Some(stage);
            info!("new state: {}", stage);
            let family = &mut *family;
            with_async_operation_span(stage.as_str(), move || run_stage(family, stage)).await?;
        }
        Ok(())
    }
}

async fn run_stage(family: &mut dyn InstallerFamily, stage: Stage) -> Result<()> {
    match stage {
        Stage::Init => family.init().await,
        Stage::CollectInfo => family.collect_info().await,
        Stage::CreateAutofile => family.create_autofile().await,
        Stage::TargetBoot => family.target_boot().await,
        Stage::WaitInstall => family.wait_install().await,
        Stage::TargetReboot => family.target_reboot().await,
        Stage::CheckInstallation => family.check_installation().await,
        Stage::PostInstall => family.post_install().await,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Collaborator doubles for installer tests

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::model::{HypervisorKind, Volume};

    /// Platform recording the calls made to it
    #[derive(Default)]
    pub struct RecordingPlatform {
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Platform for RecordingPlatform {
        fn kind(&self) -> HypervisorKind {
            HypervisorKind::Hmc
        }

        async fn boot(&self, kargs: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("boot {}", kargs));
            Ok(())
        }

        async fn reboot(&self) -> Result<()> {
            self.calls.lock().unwrap().push("reboot".to_string());
            Ok(())
        }

        async fn set_boot_device(&self, device: &Volume) -> Result<()> {
            self.calls.lock().unwrap().push(format!("set_boot_device {}", device));
            Ok(())
        }
    }

    /// Replies handed out by [`ScriptedShell`]: substring of the command
    /// and the queue of answers for it
    pub type Script = Arc<Mutex<Vec<(String, VecDeque<(i32, String)>)>>>;

    /// Shell answering commands from a script; unknown commands succeed
    pub struct ScriptedShell {
        pub script: Script,
        pub commands: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl RemoteShell for ScriptedShell {
        async fn run(&mut self, command: &str, _timeout: Duration) -> Result<(i32, String)> {
            self.commands.lock().unwrap().push(command.to_string());
            let mut script = self.script.lock().unwrap();
            for (pattern, replies) in script.iter_mut() {
                if command.contains(pattern.as_str()) {
                    if replies.len() > 1 {
                        return Ok(replies.pop_front().unwrap_or_default());
                    }
                    return Ok(replies.front().cloned().unwrap_or_default());
                }
            }
            Ok((0, String::new()))
        }

        async fn close(&mut self) {}
    }

    /// Connector handing out [`ScriptedShell`]s sharing one script
    #[derive(Default)]
    pub struct ScriptedConnector {
        pub script: Script,
        pub commands: Arc<Mutex<Vec<String>>>,
        pub logins: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl ScriptedConnector {
        /// Answer commands containing `pattern` with `replies` in order,
        /// repeating the last one
        pub fn on(&self, pattern: &str, replies: &[(i32, &str)]) {
            self.script.lock().unwrap().push((
                pattern.to_string(),
                replies.iter().map(|(r, o)| (*r, o.to_string())).collect(),
            ));
        }

        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl SshConnector for ScriptedConnector {
        async fn login(
            &self,
            host: &str,
            _user: &str,
            password: &str,
            _timeout: Duration,
        ) -> Result<Box<dyn RemoteShell>> {
            self.logins
                .lock()
                .unwrap()
                .push((host.to_string(), password.to_string()));
            Ok(Box::new(ScriptedShell {
                script: self.script.clone(),
                commands: self.commands.clone(),
            }))
        }
    }

    /// Event source handing out prepared batches, one per read
    #[derive(Default)]
    pub struct ScriptedEvents {
        batches: Mutex<VecDeque<Vec<String>>>,
        opened: Mutex<Vec<events::WebhookSession>>,
        starts: Mutex<Vec<usize>>,
        closed: Mutex<Vec<String>>,
    }

    impl ScriptedEvents {
        pub fn with_batches(batches: Vec<Vec<String>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                ..Default::default()
            }
        }

        pub fn opened(&self) -> Vec<events::WebhookSession> {
            self.opened.lock().unwrap().clone()
        }

        /// Start offsets of the reads that returned events
        pub fn starts(&self) -> Vec<usize> {
            self.starts.lock().unwrap().clone()
        }

        pub fn closed(&self) -> Vec<String> {
            self.closed.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl EventSource for ScriptedEvents {
        async fn open_session(&self, session: &events::WebhookSession) -> Result<()> {
            self.opened.lock().unwrap().push(session.clone());
            Ok(())
        }

        async fn read_events(&self, _session_id: &str, start: usize) -> Result<Vec<String>> {
            let batch = self.batches.lock().unwrap().pop_front().unwrap_or_default();
            if !batch.is_empty() {
                self.starts.lock().unwrap().push(start);
            }
            Ok(batch)
        }

        async fn close_session(&self, session_id: &str) -> Result<()> {
            self.closed.lock().unwrap().push(session_id.to_string());
            Ok(())
        }
    }

    /// Configuration with millisecond budgets rooted in `dir`
    pub fn fast_config(dir: &std::path::Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.auto_install.url = "http://install.example.com/static".to_string();
        config.auto_install.dir = dir.join("static");
        config.work_dir = dir.join("job");
        let t = &mut config.timeouts;
        t.connection = 0.05;
        t.connection_retry = 0.001;
        t.install = 0.5;
        t.logfile = 0.05;
        t.poll_interval = 0.001;
        t.event_poll = 0.001;
        t.failure_drain = 0.01;
        t.reboot_settle = 0.001;
        t.command = 1.0;
        config
    }

    pub fn env(
        job: InstallJob,
        dir: &std::path::Path,
        ssh: Arc<ScriptedConnector>,
        platform: RecordingPlatform,
    ) -> InstallerEnv {
        InstallerEnv::new(
            job,
            Box::new(platform),
            ssh,
            Arc::new(fast_config(dir)),
            None,
        )
    }
}
