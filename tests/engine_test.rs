// file: tests/engine_test.rs
// version: 1.0.0
// guid: 5c2a8f4e-1d97-4b36-a0e8-7f3b9c6d2e15

//! End-to-end tests of the engine driven through the machine facade

mod common;

use std::sync::Arc;

use autoinstall_engine::data::FileInventory;
use autoinstall_engine::installer::cmdline::merge_kernel_cmdline;
use autoinstall_engine::installer::context::kernel_device_name;
use autoinstall_engine::installer::InstallerKind;
use autoinstall_engine::machine::{parse_request, AutoInstallMachine, JobRequest};
use autoinstall_engine::platform::kvm::{parse_disk_definition, DevpathScheme};
use autoinstall_engine::AutoinstallError;
use common::*;
use tempfile::TempDir;

const RHEL_JOB: &str = r#"{"os": "rhel9.2", "system": "guest01"}"#;
const UBUNTU_JOB: &str = r#"{"os": "ubuntu22.04", "system": "guest01"}"#;

const ANACONDA_DONE: &str =
    "12:05:00,000 INF threading: Thread Done: AnaConfigurationThread (1)\n";
const STORAGE_FAILED: &str =
    "12:01:02,000 ERR anaconda: storage configuration failed: not enough space\n";

#[test]
fn test_kernel_cmdline_merge() {
    assert_eq!(
        merge_kernel_cmdline("foo=1 bar=2", "bar=9 baz=3"),
        "foo=1 bar=9 baz=3"
    );
}

#[test]
fn test_device_name_truncation_keeps_vlan_suffix() {
    let name = kernel_device_name("encf500abcdefgh", Some(100));
    assert!(name.len() + ".100".len() <= 15);
    assert!("encf500abcdefgh".starts_with(&name));
}

#[tokio::test]
async fn test_resource_claim_for_three_level_chain() {
    let tmp = TempDir::new().unwrap();
    let inv = inventory(tmp.path()).await;

    let claim = parse_request(inv.as_ref(), RHEL_JOB).await.unwrap();
    assert_eq!(claim.resources.exclusive, vec!["guest01"]);
    assert_eq!(claim.resources.shared, vec!["lpar3", "cpc3"]);
    assert_eq!(claim.description, "Autoinstall guest01 with OS rhel9.2");
}

#[tokio::test]
async fn test_anaconda_installation_succeeds() {
    let tmp = TempDir::new().unwrap();
    let inv = inventory(tmp.path()).await;
    let ssh = Arc::new(ScriptedSsh::default());
    ssh.on("tail -n +", &[(0, "INF anaconda: starting\n"), (0, ANACONDA_DONE)]);
    let control = Arc::new(RecordingFactory::default());
    let events = Arc::new(StubEvents::default());

    let request = JobRequest::from_json(RHEL_JOB).unwrap();
    let mut machine = AutoInstallMachine::new(
        deps(inv, tmp.path(), ssh.clone(), control.clone(), events),
        request,
    )
    .await
    .unwrap();
    assert_eq!(machine.kind(), InstallerKind::Anaconda);
    machine.start().await.unwrap();

    assert_eq!(
        control.calls(),
        vec!["login lpar3", "start guest01", "reboot guest01"]
    );
    assert!(ssh.commands().contains(&"[ -f \"/tmp/anaconda.log\" ]".to_string()));
    // the autofile is gone from the served directory, the job copy stays
    assert!(!tmp.path().join("static/guest01-default").exists());
    let kickstart = std::fs::read_to_string(tmp.path().join("job/guest01-default")).unwrap();
    assert!(kickstart.contains("network --hostname=guest01.example.com"));

    let doc = FileInventory::load(tmp.path().join("inventory.yaml"))
        .await
        .unwrap()
        .document()
        .await;
    assert_eq!(
        doc.systems[2].profiles[0].operating_system.as_deref(),
        Some("rhel9.2")
    );
}

#[tokio::test]
async fn test_anaconda_storage_failure() {
    let tmp = TempDir::new().unwrap();
    let inv = inventory(tmp.path()).await;
    let ssh = Arc::new(ScriptedSsh::default());
    ssh.on("tail -n +", &[(0, STORAGE_FAILED)]);
    let control = Arc::new(RecordingFactory::default());

    let request = JobRequest::from_json(RHEL_JOB).unwrap();
    let mut machine = AutoInstallMachine::new(
        deps(inv, tmp.path(), ssh, control.clone(), Arc::new(StubEvents::default())),
        request,
    )
    .await
    .unwrap();

    let err = machine.start().await.unwrap_err();
    assert!(matches!(err, AutoinstallError::Runtime { .. }));
    assert!(err.to_string().contains("storage configuration"));
    // the target was never rebooted
    assert_eq!(control.calls(), vec!["login lpar3", "start guest01"]);
    assert!(!tmp.path().join("static/guest01-default").exists());
}

#[tokio::test]
async fn test_kvm_generated_disks_avoid_authored_ones() {
    let tmp = TempDir::new().unwrap();
    let inv = inventory(tmp.path()).await;

    let request = JobRequest::from_json(RHEL_JOB).unwrap();
    let machine = AutoInstallMachine::new(
        deps(
            inv,
            tmp.path(),
            Arc::new(ScriptedSsh::default()),
            Arc::new(RecordingFactory::default()),
            Arc::new(StubEvents::default()),
        ),
        request,
    )
    .await
    .unwrap();

    let volumes = &machine.job().system_profile.volumes;
    let parsed: Vec<_> = volumes
        .iter()
        .map(|v| {
            parse_disk_definition(v.device_definition.as_deref().unwrap(), DevpathScheme::Ccw)
                .unwrap()
        })
        .collect();
    assert_eq!(parsed[0].devno, 0x0001);
    assert_eq!(parsed[2].devno, 0x0002);

    let generated = [&parsed[1], &parsed[3]];
    for disk in generated {
        assert!(![0x0001, 0x0002].contains(&disk.devno));
        assert!(!["vda", "vdc"].contains(&disk.dev.as_str()));
    }
    assert_ne!(generated[0].devno, generated[1].devno);
    assert_ne!(generated[0].dev, generated[1].dev);
}

#[tokio::test]
async fn test_subiquity_crash_beats_later_success() {
    let tmp = TempDir::new().unwrap();
    let inv = inventory(tmp.path()).await;
    let events = Arc::new(StubEvents::with_batches(vec![
        vec![r#"{"name": "subiquity/Install", "origin": "curtin", "event_type": "start"}"#],
        vec![
            r#"{"name": "subiquity/Error/1", "origin": "curtin", "event_type": "finish", "description": "saved to /var/crash/1.crash"}"#,
            r#"{"name": "subiquity/Shutdown/copy_logs_to_target", "result": "SUCCESS", "event_type": "finish"}"#,
        ],
    ]));

    let request = JobRequest::from_json(UBUNTU_JOB).unwrap();
    let mut machine = AutoInstallMachine::new(
        deps(
            inv,
            tmp.path(),
            Arc::new(ScriptedSsh::default()),
            Arc::new(RecordingFactory::default()),
            events.clone(),
        ),
        request,
    )
    .await
    .unwrap();
    assert_eq!(machine.kind(), InstallerKind::Subiquity);

    let err = machine.start().await.unwrap_err();
    assert!(matches!(err, AutoinstallError::Runtime { .. }));
    assert_eq!(*events.closed.lock().unwrap(), vec!["guest01-default"]);

    let doc = FileInventory::load(tmp.path().join("inventory.yaml"))
        .await
        .unwrap()
        .document()
        .await;
    assert_eq!(doc.systems[2].profiles[0].operating_system, None);
}
