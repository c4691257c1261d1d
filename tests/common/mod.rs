// file: tests/common/mod.rs
// version: 1.0.0
// guid: 3b9e7d2c-6a41-4f58-9c0d-2e8a5f1b7c64

//! Collaborator stubs shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use autoinstall_engine::config::EngineConfig;
use autoinstall_engine::data::FileInventory;
use autoinstall_engine::installer::events::WebhookSession;
use autoinstall_engine::installer::EventSource;
use autoinstall_engine::machine::MachineDeps;
use autoinstall_engine::model::HypervisorKind;
use autoinstall_engine::network::{RemoteShell, SshConnector};
use autoinstall_engine::platform::{ControlClient, ControlClientFactory, ControlCredentials};
use autoinstall_engine::Result;
use serde_json::Value;
use tokio::sync::oneshot;

/// Inventory with a KVM guest hosted on an LPAR of a CPC
pub const INVENTORY: &str = r##"
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
            device_id: "1000"
            size: 20000
            device_definition: |
              <disk type="block" device="disk">
                <source dev="/dev/disk/by-path/ccw-0.0.1000"/>
                <target dev="vda" bus="virtio"/>
                <address type="ccw" cssid="0xfe" ssid="0x0" devno="0x0001"/>
              </disk>
          - type: dasd
            device_id: "1001"
            size: 20000
            partitions:
              - {mount_point: /, size: 10000, filesystem: ext4}
          - type: dasd
            device_id: "1002"
            size: 20000
            device_definition: |
              <disk type="block" device="disk">
                <source dev="/dev/disk/by-path/ccw-0.0.1002"/>
                <target dev="vdc" bus="virtio"/>
                <address type="ccw" cssid="0xfe" ssid="0x0" devno="0x0002"/>
              </disk>
          - type: dasd
            device_id: "1003"
            size: 20000
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
    template_name: kickstart
  - name: ubuntu22.04
    type: debian
    major: 2204
    pretty_name: Ubuntu 22.04 LTS
    template_name: cloud-config
repositories:
  - name: rhel92
    url: http://repo.example.com/rhel92
    kernel: images/kernel.img
    initrd: images/initrd.img
    installable_os: rhel9.2
  - name: ubuntu2204
    url: http://repo.example.com/ubuntu2204
    kernel: casper/vmlinuz
    initrd: casper/initrd
    install_image: ubuntu-22.04-live-server-s390x.iso
    installable_os: ubuntu22.04
templates:
  - name: kickstart
    content: "rootpw {{ config.credentials.password }}\nnetwork --hostname={{ config.hostname }}\n"
  - name: cloud-config
    content: "#cloud-config\nautoinstall:\n  version: 1\n  identity:\n    hostname: {{ config.hostname }}\n"
"##;

/// Write the inventory into `dir` and load it
pub async fn inventory(dir: &Path) -> Arc<FileInventory> {
    let path = dir.join("inventory.yaml");
    std::fs::write(&path, INVENTORY).unwrap();
    Arc::new(FileInventory::load(&path).await.unwrap())
}

/// Configuration with millisecond budgets rooted in `dir`
pub fn fast_config(dir: &Path) -> EngineConfig {
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

type Script = Arc<Mutex<Vec<(String, VecDeque<(i32, String)>)>>>;

struct ScriptedShell {
    script: Script,
    commands: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl RemoteShell for ScriptedShell {
    async fn run(&mut self, command: &str, _timeout: Duration) -> Result<(i32, String)> {
        self.commands.lock().unwrap().push(command.to_string());
        let mut script = self.script.lock().unwrap();
        for (pattern, replies) in script.iter_mut() {
            if command.contains(pattern.as_str()) {
                if replies.len() > 1 {
                    return Ok(replies.pop_front().unwrap());
                }
                return Ok(replies.front().cloned().unwrap_or_default());
            }
        }
        Ok((0, String::new()))
    }

    async fn close(&mut self) {}
}

/// SSH connector answering from a script; unknown commands succeed
#[derive(Default)]
pub struct ScriptedSsh {
    script: Script,
    commands: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSsh {
    /// Answer commands containing `pattern` in order, repeating the last reply
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
impl SshConnector for ScriptedSsh {
    async fn login(
        &self,
        _host: &str,
        _user: &str,
        _password: &str,
        _timeout: Duration,
    ) -> Result<Box<dyn RemoteShell>> {
        Ok(Box::new(ScriptedShell {
            script: self.script.clone(),
            commands: self.commands.clone(),
        }))
    }
}

/// Control client recording calls; `start` notifies right away
#[derive(Default)]
pub struct RecordingControl {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl ControlClient for RecordingControl {
    async fn login(&self, credentials: &ControlCredentials) -> Result<()> {
        self.calls.lock().unwrap().push(format!("login {}", credentials.name));
        Ok(())
    }

    async fn logoff(&self) -> Result<()> {
        self.calls.lock().unwrap().push("logoff".to_string());
        Ok(())
    }

    async fn start(
        &self,
        guest: &str,
        _cpus: u32,
        _memory: u64,
        _params: &Value,
        notify: Option<oneshot::Sender<()>>,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(format!("start {}", guest));
        if let Some(tx) = notify {
            let _ = tx.send(());
        }
        Ok(())
    }

    async fn reboot(&self, guest: &str, _params: &Value) -> Result<()> {
        self.calls.lock().unwrap().push(format!("reboot {}", guest));
        Ok(())
    }

    async fn set_boot_device(&self, guest: &str, _params: &Value) -> Result<()> {
        self.calls.lock().unwrap().push(format!("set_boot_device {}", guest));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingFactory {
    pub client: Arc<RecordingControl>,
}

impl RecordingFactory {
    pub fn calls(&self) -> Vec<String> {
        self.client.calls.lock().unwrap().clone()
    }
}

impl ControlClientFactory for RecordingFactory {
    fn create(&self, _kind: HypervisorKind) -> Result<Arc<dyn ControlClient>> {
        Ok(self.client.clone())
    }
}

/// Event source replaying prepared batches, one per read
#[derive(Default)]
pub struct StubEvents {
    batches: Mutex<VecDeque<Vec<String>>>,
    pub closed: Mutex<Vec<String>>,
}

impl StubEvents {
    pub fn with_batches(batches: Vec<Vec<&str>>) -> Self {
        let batches = batches
            .into_iter()
            .map(|b| b.into_iter().map(str::to_string).collect())
            .collect();
        Self {
            batches: Mutex::new(batches),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl EventSource for StubEvents {
    async fn open_session(&self, _session: &WebhookSession) -> Result<()> {
        Ok(())
    }

    async fn read_events(&self, _session_id: &str, _start: usize) -> Result<Vec<String>> {
        Ok(self.batches.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn close_session(&self, session_id: &str) -> Result<()> {
        self.closed.lock().unwrap().push(session_id.to_string());
        Ok(())
    }
}

/// Machine collaborators built from the stubs
pub fn deps(
    store: Arc<FileInventory>,
    dir: &Path,
    ssh: Arc<ScriptedSsh>,
    control: Arc<RecordingFactory>,
    events: Arc<StubEvents>,
) -> MachineDeps {
    MachineDeps {
        store,
        config: Arc::new(fast_config(dir)),
        ssh,
        control,
        events,
    }
}
