// file: src/machine.rs
// version: 1.0.0
// guid: 8d3f6b1a-5c27-4e9d-a0b4-7e2c9f1d6a53

//! Orchestrator facade
//!
//! [`parse_request`] turns a job request into the resource claim used by
//! the job scheduler. [`AutoInstallMachine`] resolves the request against
//! the inventory, picks the platform adapter and installer family, runs the
//! pipeline and records the outcome back in the inventory.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use crate::config::EngineConfig;
use crate::data::InventoryStore;
use crate::installer::{
    cmdline, create_installer, EventSource, InstallationChecker, InstallerEnv, InstallerFamily,
    InstallerKind, Pipeline, PipelineState, SshPostInstallChecker, WebhookEventSource,
};
use crate::logging::Verbosity;
use crate::model::{HypervisorKind, InstallJob, OperatingSystem, SystemProfile, Template};
use crate::network::{RetryPolicy, Ssh2Connector, SshConnector};
use crate::platform::{create_platform, CommandControlFactory, ControlClientFactory, PlatformDeps};
use crate::{AutoinstallError, Result};

/// Parameters of an installation job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct JobRequest {
    #[validate(length(min = 1))]
    pub os: String,
    #[validate(length(min = 1))]
    pub system: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repos: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<Verbosity>,
}

impl JobRequest {
    /// Decode and validate a JSON request
    pub fn from_json(json: &str) -> Result<Self> {
        let request: JobRequest = serde_json::from_str(json).map_err(|e| {
            tracing::debug!("Request decoding failed: {}", e);
            AutoinstallError::syntax("Invalid request parameters")
        })?;
        request.validate().map_err(|e| {
            tracing::debug!("Request validation failed: {}", e);
            AutoinstallError::syntax("Invalid request parameters")
        })?;
        Ok(request)
    }
}

/// Resources a job needs, consumed by the scheduler for mutual exclusion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub exclusive: Vec<String>,
    /// Hosting chain of the target, closest hypervisor first
    pub shared: Vec<String>,
}

/// Result of parsing a job request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceClaim {
    pub resources: Resources,
    pub description: String,
    pub params: JobRequest,
}

/// Validate a job request and compute the resources it claims
///
/// Nothing is changed anywhere; every lookup the job will need later is
/// tried here so that bad requests fail before they are scheduled.
pub async fn parse_request(store: &dyn InventoryStore, json: &str) -> Result<ResourceClaim> {
    let request = JobRequest::from_json(json)?;

    let (os, _) = store.get_operating_system(&request.os).await?;
    resolve_template(store, &os, request.template.as_deref()).await?;
    // legacy selection does not change whether the OS type is supported
    InstallerKind::for_os(&os, false)?;

    let profile = store
        .get_system(&request.system, request.profile.as_deref())
        .await?;
    check_gateway(&profile)?;

    let chain = store.get_hosting_chain(&request.system).await?;
    if chain.is_empty() {
        return Err(AutoinstallError::value(format!(
            "System {} cannot be installed because it has no hypervisor defined",
            request.system
        )));
    }
    let mut shared: Vec<String> = Vec::with_capacity(chain.len());
    for name in chain {
        if !shared.contains(&name) {
            shared.push(name);
        }
    }

    Ok(ResourceClaim {
        resources: Resources {
            exclusive: vec![request.system.clone()],
            shared,
        },
        description: format!("Autoinstall {} with OS {}", request.system, request.os),
        params: request,
    })
}

/// Make sure an interface is available to reach the network
fn check_gateway(profile: &SystemProfile) -> Result<()> {
    if profile.gateway_interface().is_some() {
        return Ok(());
    }
    let iface = profile.ifaces.first().ok_or_else(|| {
        AutoinstallError::value("No network interface attached to perform installation")
    })?;
    let subnet = iface.subnets.first().ok_or_else(|| {
        AutoinstallError::value(format!(
            "Gateway network interface <{}> has no IP address assigned",
            iface.os_device_name
        ))
    })?;
    if !subnet.has_gateway_route() {
        return Err(AutoinstallError::value(format!(
            "Subnet <{}> of the gateway network interface <{}> has no gateway route defined",
            subnet.subnet, iface.os_device_name
        )));
    }
    Ok(())
}

/// Autofile template named in the request, or the OS default
async fn resolve_template(
    store: &dyn InventoryStore,
    os: &OperatingSystem,
    name: Option<&str>,
) -> Result<Template> {
    if let Some(name) = name.filter(|n| !n.is_empty()) {
        return store.get_template(name).await;
    }
    let default = os.template_name.as_deref().ok_or_else(|| {
        AutoinstallError::value(format!("OS {} has no default template defined", os.name))
    })?;
    store.get_template(default).await
}

/// Installer cmdline template for a family
///
/// Only the classic installers can take theirs from the inventory.
async fn resolve_installer_template(
    store: &dyn InventoryStore,
    os: &OperatingSystem,
    kind: InstallerKind,
) -> Result<Template> {
    let custom = match kind {
        InstallerKind::Anaconda | InstallerKind::Autoyast | InstallerKind::DebianInstaller => {
            store.get_installer_template(os).await?
        }
        InstallerKind::Subiquity | InstallerKind::Agama => None,
    };
    Ok(custom.unwrap_or_else(|| cmdline::builtin_template(kind)))
}

/// Assemble and validate the installation model of `request`
///
/// Returns the job together with the installer family that will run it.
/// Nothing outside the process is touched.
pub async fn build_job(
    store: &dyn InventoryStore,
    request: &JobRequest,
) -> Result<(InstallJob, InstallerKind)> {
    let (os, os_repos) = store.get_operating_system(&request.os).await?;
    let template = resolve_template(store, &os, request.template.as_deref()).await?;
    let profile = store
        .get_system(&request.system, request.profile.as_deref())
        .await?;
    let options = store
        .get_install_options(&request.system, request.profile.as_deref())
        .await?;
    let (custom_os_repos, custom_package_repos) =
        store.get_custom_repositories(&request.repos).await?;

    let mut job = InstallJob::new(
        os,
        os_repos,
        Some(template),
        None,
        custom_os_repos,
        custom_package_repos,
        profile,
        options,
    );
    let kind = InstallerKind::for_os(&job.operating_system, job.legacy_installer)?;
    if job.legacy_installer {
        info!("NOTE: please make sure that repo and template are set accordingly");
    }
    job.installer_template =
        Some(resolve_installer_template(store, &job.operating_system, kind).await?);
    job.validate()?;
    Ok((job, kind))
}

/// Collaborators of a machine
#[derive(Clone)]
pub struct MachineDeps {
    pub store: Arc<dyn InventoryStore>,
    pub config: Arc<EngineConfig>,
    pub ssh: Arc<dyn SshConnector>,
    pub control: Arc<dyn ControlClientFactory>,
    pub events: Arc<dyn EventSource>,
}

impl MachineDeps {
    /// Production collaborators: real SSH, command driven control, webhook events
    pub fn new(store: Arc<dyn InventoryStore>, config: Arc<EngineConfig>) -> Self {
        let control = Arc::new(CommandControlFactory::new(config.clone()));
        let events = Arc::new(WebhookEventSource::new(
            config.installer_webhook.control_endpoint(),
        ));
        Self {
            store,
            config,
            ssh: Arc::new(Ssh2Connector::new()),
            control,
            events,
        }
    }
}

/// One installation job
pub struct AutoInstallMachine {
    store: Arc<dyn InventoryStore>,
    installer: Box<dyn InstallerFamily>,
    pipeline: Pipeline,
    request: JobRequest,
    cleaned_up: bool,
}

impl AutoInstallMachine {
    /// Resolve `request` and prepare every component of the installation
    pub async fn new(deps: MachineDeps, request: JobRequest) -> Result<Self> {
        let store = deps.store.clone();
        let (mut job, kind) = build_job(store.as_ref(), &request).await?;

        let platform_deps = PlatformDeps {
            config: deps.config.clone(),
            control: deps.control.clone(),
            ssh: deps.ssh.clone(),
        };
        let platform = create_platform(&mut job, &platform_deps).await?;
        let updated = store.update_device_definitions(&job).await?;
        if updated > 0 {
            info!("Stored {} generated device definitions", updated);
        }

        let checker = post_install_checker(&job, &deps);
        let env = InstallerEnv::new(job, platform, deps.ssh.clone(), deps.config.clone(), checker);
        let installer = create_installer(kind, env, deps.events.clone())?;
        info!(
            "Autoinstall {} with OS {} using the {} installer",
            request.system, request.os, kind
        );

        Ok(Self {
            store,
            installer,
            pipeline: Pipeline::new(),
            request,
            cleaned_up: false,
        })
    }

    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    pub fn kind(&self) -> InstallerKind {
        self.installer.kind()
    }

    pub fn job(&self) -> &InstallJob {
        &self.installer.env().job
    }

    /// Progress of the pipeline
    pub async fn state(&self) -> PipelineState {
        self.pipeline.state().read().await.clone()
    }

    /// Run the installation and record its outcome
    ///
    /// A failed run clears the OS recorded for the profile. Cleanup always
    /// runs before returning.
    pub async fn start(&mut self) -> Result<()> {
        let result = match self.pipeline.run(self.installer.as_mut()).await {
            Ok(()) => self.store.set_target_operating_system(self.job()).await,
            Err(e) => {
                if let Err(clear) = self.store.clear_target_operating_system(self.job()).await {
                    warn!("Failed to clear the operating system of the profile: {}", clear);
                }
                Err(e)
            }
        };
        let cleanup = self.cleanup().await;
        result?;
        cleanup
    }

    /// Remove what the installation generated; later calls do nothing
    pub async fn cleanup(&mut self) -> Result<()> {
        if self.cleaned_up {
            return Ok(());
        }
        self.cleaned_up = true;
        info!("AutoInstall cleanup is running");
        self.installer.cleanup().await
    }
}

/// Post-install checker for the job, KVM guests are not verified
fn post_install_checker(
    job: &InstallJob,
    deps: &MachineDeps,
) -> Option<Arc<dyn InstallationChecker>> {
    if job.system_profile.hypervisor.kind() == HypervisorKind::Kvm {
        info!("Skipping installation check as KVM guests are currently unsupported");
        return None;
    }
    let t = &deps.config.timeouts;
    let policy = RetryPolicy {
        budget: t.connection(),
        backoff: t.connection_retry(),
        attempt_timeout: t.command(),
    };
    Some(Arc::new(SshPostInstallChecker::new(
        deps.ssh.clone(),
        policy,
        t.command(),
        true,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FileInventory;
    use crate::installer::testing::{fast_config, ScriptedConnector, ScriptedEvents};
    use crate::platform::testing::RecordingFactory;
    use std::io::Write;

    const INVENTORY: &str = r#"
systems:
  - name: cpc3
  - name: lpar3
    hostname: lpar3.example.com
    hypervisor: cpc3
    profiles:
      - name: kvm-host
        default: true
        memory: 8192
        hypervisor:
          name: cpc3
          type: hmc
          hmc_address: hmc.example.com
          credentials: {user: admin, password: pw}
  - name: guest01
    hostname: guest01.example.com
    hypervisor: lpar3
    profiles:
      - name: default
        default: true
        cpus: 2
        memory: 4096
        hypervisor:
          name: lpar3
          type: kvm
          kvm_host: lpar3.example.com
          credentials: {user: root, password: pw}
        credentials:
          user: root
          password: rootpw
        volumes:
          - type: dasd
            device_id: "3956"
            size: 20000
            partitions:
              - {mount_point: /, size: 10000, filesystem: ext4}
        interfaces:
          - type: macvtap_host
            hostiface: enc1000
            os_device_name: eth0
            mac_address: "52:54:00:aa:bb:cc"
            gateway: true
            subnets:
              - ip_address: 10.0.0.5
                subnet: 10.0.0.0/24
                gateway: 10.0.0.1
operating_systems:
  - name: rhel9.2
    type: redhat
    major: 9
    minor: 2
    pretty_name: Red Hat Enterprise Linux 9.2
    template_name: rhel-default
  - name: plan9
    type: plan9
    major: 4
    pretty_name: Plan 9
    template_name: rhel-default
  - name: bare
    type: redhat
    major: 9
    pretty_name: Bare
repositories:
  - name: rhel92
    url: http://repo.example.com/rhel92
    kernel: images/kernel.img
    initrd: images/initrd.img
    installable_os: rhel9.2
templates:
  - name: rhel-default
    content: "rootpw {{ config.credentials.password }}\nnetwork --hostname={{ config.hostname }}\n"
"#;

    async fn inventory() -> (tempfile::NamedTempFile, Arc<FileInventory>) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(INVENTORY.as_bytes()).unwrap();
        let inv = FileInventory::load(file.path()).await.unwrap();
        (file, Arc::new(inv))
    }

    fn deps(
        store: Arc<FileInventory>,
        dir: &std::path::Path,
        ssh: Arc<ScriptedConnector>,
        control: Arc<RecordingFactory>,
    ) -> MachineDeps {
        MachineDeps {
            store,
            config: Arc::new(fast_config(dir)),
            ssh,
            control,
            events: Arc::new(ScriptedEvents::default()),
        }
    }

    #[test]
    fn test_request_schema() {
        let request =
            JobRequest::from_json(r#"{"os": "rhel9.2", "system": "guest01", "verbosity": "DEBUG"}"#)
                .unwrap();
        assert_eq!(request.verbosity, Some(Verbosity::Debug));
        assert!(request.repos.is_empty());

        for bad in [
            r#"{"system": "guest01"}"#,
            r#"{"os": "rhel9.2", "system": "guest01", "extra": 1}"#,
            r#"{"os": "rhel9.2", "system": "guest01", "verbosity": "LOUD"}"#,
            r#"{"os": "", "system": "guest01"}"#,
            r#"{"os": "rhel9.2", "system": "guest01", "repos": "tools"}"#,
            "not json",
        ] {
            let err = JobRequest::from_json(bad).unwrap_err();
            assert!(matches!(err, AutoinstallError::Syntax(_)), "{}", bad);
            assert_eq!(err.to_string(), "Invalid request parameters");
        }
    }

    #[tokio::test]
    async fn test_claim_walks_hosting_chain() {
        let (_file, inv) = inventory().await;
        let claim = parse_request(inv.as_ref(), r#"{"os": "rhel9.2", "system": "guest01"}"#)
            .await
            .unwrap();
        assert_eq!(claim.resources.exclusive, vec!["guest01"]);
        assert_eq!(claim.resources.shared, vec!["lpar3", "cpc3"]);
        assert_eq!(claim.description, "Autoinstall guest01 with OS rhel9.2");

        let out = serde_json::to_value(&claim).unwrap();
        assert_eq!(out["params"]["os"], "rhel9.2");
    }

    #[tokio::test]
    async fn test_claim_lookup_errors() {
        let (_file, inv) = inventory().await;
        let cases = [
            (r#"{"os": "sles", "system": "guest01"}"#, "OS sles not found"),
            (
                r#"{"os": "bare", "system": "guest01"}"#,
                "OS bare has no default template defined",
            ),
            (
                r#"{"os": "rhel9.2", "system": "guest01", "template": "none"}"#,
                "Template none not found",
            ),
            (
                r#"{"os": "plan9", "system": "guest01"}"#,
                "OS type 'plan9' is not supported for installation",
            ),
            (
                r#"{"os": "rhel9.2", "system": "guest01", "profile": "big"}"#,
                "Profile big not found",
            ),
        ];
        for (request, message) in cases {
            let err = parse_request(inv.as_ref(), request).await.unwrap_err();
            assert!(matches!(err, AutoinstallError::Value(_)));
            assert_eq!(err.to_string(), message);
        }
    }

    #[tokio::test]
    async fn test_successful_run_records_os() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (file, inv) = inventory().await;
        let ssh = Arc::new(ScriptedConnector::default());
        ssh.on(
            "tail -n +",
            &[(0, "INF threading: Thread Done: AnaConfigurationThread (1)\n")],
        );
        let control = Arc::new(RecordingFactory::default());
        let request = JobRequest::from_json(r#"{"os": "rhel9.2", "system": "guest01"}"#).unwrap();

        let mut machine = AutoInstallMachine::new(
            deps(inv.clone(), tmp.path(), ssh, control.clone()),
            request,
        )
        .await
        .unwrap();
        assert_eq!(machine.kind(), InstallerKind::Anaconda);
        // the generated libvirt definition was stored right away
        let doc = FileInventory::load(file.path()).await.unwrap().document().await;
        assert!(doc.systems[2].profiles[0].volumes[0].device_definition.is_some());

        machine.start().await.unwrap();
        let calls = control.client.calls();
        assert!(calls.contains(&"start guest01".to_string()));
        assert!(calls.contains(&"reboot guest01".to_string()));

        let doc = FileInventory::load(file.path()).await.unwrap().document().await;
        assert_eq!(
            doc.systems[2].profiles[0].operating_system.as_deref(),
            Some("rhel9.2")
        );
        assert!(!tmp.path().join("static/guest01-default").exists());
        assert_eq!(
            machine.state().await.status,
            crate::installer::PipelineStatus::Completed
        );
        // cleanup already ran inside start
        machine.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_run_clears_os_and_cleans_up() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (file, inv) = inventory().await;
        let ssh = Arc::new(ScriptedConnector::default());
        ssh.on(
            "tail -n +",
            &[(0, "ERR anaconda: storage configuration failed: no disks\n")],
        );
        let request = JobRequest::from_json(r#"{"os": "rhel9.2", "system": "guest01"}"#).unwrap();
        let mut machine = AutoInstallMachine::new(
            deps(inv, tmp.path(), ssh, Arc::new(RecordingFactory::default())),
            request,
        )
        .await
        .unwrap();

        let err = machine.start().await.unwrap_err();
        assert!(err.to_string().contains("storage configuration"));
        let doc = FileInventory::load(file.path()).await.unwrap().document().await;
        assert_eq!(doc.systems[2].profiles[0].operating_system, None);
        assert!(!tmp.path().join("static/guest01-default").exists());
        assert!(tmp.path().join("job/guest01-default").exists());
    }
}
