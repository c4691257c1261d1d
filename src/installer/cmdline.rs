// file: src/installer/cmdline.rs
// version: 1.0.0
// guid: 0c5b8e2f-7a19-4d63-b4e1-5f9a3c7d2b86

//! Installer kernel command lines
//!
//! Each installer family ships a built-in cmdline template; the inventory
//! can provide its own per OS. User supplied parameters are merged on top
//! of the rendered line.

use minijinja::Environment;

use super::context::RenderContext;
use super::InstallerKind;
use crate::model::Template;
use crate::Result;

const ANACONDA_CMDLINE: &str = include_str!("../../templates/cmdline/redhat.cmdline.jinja");
const AUTOYAST_CMDLINE: &str = include_str!("../../templates/cmdline/suse.cmdline.jinja");
const DEBIAN_CMDLINE: &str = include_str!("../../templates/cmdline/debian.cmdline.jinja");
const SUBIQUITY_CMDLINE: &str = include_str!("../../templates/cmdline/subiquity.cmdline.jinja");
const AGAMA_CMDLINE: &str = include_str!("../../templates/cmdline/agama.cmdline.jinja");

/// Built-in cmdline template of an installer family
pub fn builtin_template(kind: InstallerKind) -> Template {
    let (name, content) = match kind {
        InstallerKind::Anaconda => ("redhat.cmdline", ANACONDA_CMDLINE),
        InstallerKind::Autoyast => ("suse.cmdline", AUTOYAST_CMDLINE),
        InstallerKind::DebianInstaller => ("debian.cmdline", DEBIAN_CMDLINE),
        InstallerKind::Subiquity => ("subiquity.cmdline", SUBIQUITY_CMDLINE),
        InstallerKind::Agama => ("agama.cmdline", AGAMA_CMDLINE),
    };
    Template {
        name: name.to_string(),
        content: content.to_string(),
    }
}

/// Render a template with `info` bound to `config`
pub fn render(template: &Template, info: &RenderContext) -> Result<String> {
    let mut env = Environment::new();
    env.add_template(&template.name, &template.content)?;
    let rendered = env
        .get_template(&template.name)?
        .render(minijinja::context! { config => info })?;
    Ok(rendered)
}

/// Render an installer cmdline and apply user overrides
pub fn installer_cmdline(
    template: &Template,
    info: &RenderContext,
    overrides: Option<&str>,
) -> Result<String> {
    let rendered = render(template, info)?;
    Ok(merge_kernel_cmdline(&rendered, overrides.unwrap_or_default()))
}

fn param_key(token: &str) -> &str {
    token.split_once('=').map(|(key, _)| key).unwrap_or(token)
}

/// Merge `overrides` into the kernel parameters of `base`
///
/// A parameter already present keeps its position and takes the new value,
/// new parameters are appended. Each key appears once in the result.
pub fn merge_kernel_cmdline(base: &str, overrides: &str) -> String {
    let mut params: Vec<&str> = Vec::new();
    for token in base.split_whitespace().chain(overrides.split_whitespace()) {
        let key = param_key(token);
        match params.iter().position(|p| param_key(p) == key) {
            Some(idx) => params[idx] = token,
            None => params.push(token),
        }
    }
    params.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_replaces_in_place_and_appends() {
        assert_eq!(
            merge_kernel_cmdline("foo=1 bar=2", "bar=9 baz=3"),
            "foo=1 bar=9 baz=3"
        );
    }

    #[test]
    fn test_merge_collapses_whitespace_and_flags() {
        assert_eq!(
            merge_kernel_cmdline("  ro\n quiet  console=ttyS0 ", "quiet console=tty1"),
            "ro quiet console=tty1"
        );
        assert_eq!(merge_kernel_cmdline("a=1", ""), "a=1");
        assert_eq!(merge_kernel_cmdline("", "a=1 a=2"), "a=2");
    }

    #[test]
    fn test_render_uses_config_namespace() {
        let template = Template {
            name: "t".to_string(),
            content: "ip={{ config.ip }}{% if config.vlan %} vlan={{ config.vlan }}{% endif %}"
                .to_string(),
        };
        let info = json!({"ip": "10.0.0.2", "vlan": null});
        let rendered = render(&template, info.as_object().unwrap()).unwrap();
        assert_eq!(rendered, "ip=10.0.0.2");
    }

    #[test]
    fn test_builtin_templates_render() {
        use crate::installer::context::collect_info;
        use crate::model::fixtures::*;

        let mut job = job(
            operating_system("ubuntu22.04", "debian", 2204, "Ubuntu 22.04 LTS"),
            profile(kvm_hypervisor()),
        );
        job.system_profile.ifaces[0].subnets[0].vlan = Some(100);
        let mut info = collect_info(&job, "http://install.example.com/static/guest01-default")
            .unwrap();
        info.insert("gw_iface".into(), {
            let mut gw = info["gw_iface"].clone();
            gw["systemd_osname"] = json!("encf500");
            gw
        });
        info.insert(
            "repos".into(),
            json!([{"url": "http://repo", "iso_path": "http://repo/ubuntu.iso", "os": true}]),
        );

        for kind in InstallerKind::ALL {
            let line = installer_cmdline(&builtin_template(kind), &info, Some("quiet")).unwrap();
            assert!(!line.contains('\n'), "{:?}: {}", kind, line);
            assert!(line.ends_with("quiet"), "{:?}: {}", kind, line);
            assert!(line.contains("10.1.2.3"), "{:?}: {}", kind, line);
        }
    }
}
