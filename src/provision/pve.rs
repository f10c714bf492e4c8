// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provisioning through the Proxmox VE command line tools.

use crate::{
    config::GuestKind,
    provision::{
        guest::{agent_ipv4_addresses, hostname_ipv4_addresses},
        render_command, Address, CommandOutput, CommandRunner, GuestSpec, NetworkSpec,
        ProvisionError, Provisioner, Result, StorageStatus, SystemRunner,
    },
};

use serde::Deserialize;
use std::{io::Write, net::Ipv4Addr, path::Path};
use tracing::{debug, instrument, warn};

/// Provisioner backed by `pct`, `qm`, `pveam`, `pvesm` and `pvesh`.
#[derive(Debug, Default)]
pub struct PveCli<R = SystemRunner>
where
    R: CommandRunner,
{
    runner: R,
}

impl<R> PveCli<R>
where
    R: CommandRunner,
{
    /// Construct new provisioner over command runner.
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Command runner every call goes through.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn call_unchecked(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        self.runner
            .run(program, args)
            .map_err(|err| ProvisionError::Spawn {
                program: program.into(),
                source: err,
            })
    }

    // INVARIANT: Every non-zero exit surfaces as an error with its code intact.
    fn call(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let output = self.call_unchecked(program, args)?;
        if !output.success() {
            return Err(ProvisionError::Command {
                command: render_command(program, args),
                code: output.code,
                stderr: output.stderr,
            });
        }

        Ok(output)
    }

    /// Arguments of `pct create` for a container specification.
    pub fn container_args(spec: &GuestSpec, template: &str, ssh_keys: Option<&Path>) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            spec.id.to_string(),
            format!("{}:vztmpl/{template}", spec.template_storage),
            "--hostname".into(),
            spec.hostname.clone(),
            "--cores".into(),
            spec.cores.to_string(),
            "--memory".into(),
            spec.memory.to_string(),
            "--rootfs".into(),
            format!("{}:{}", spec.storage, spec.disk),
            "--net0".into(),
            container_net(&spec.network),
            "--ostype".into(),
            spec.os.clone(),
            "--unprivileged".into(),
            u8::from(spec.unprivileged).to_string(),
            "--features".into(),
            "nesting=1".into(),
            "--onboot".into(),
            "1".into(),
        ];

        if !spec.tags.is_empty() {
            args.extend(["--tags".into(), spec.tags.join(";")]);
        }

        if let Some(password) = &spec.password {
            args.extend(["--password".into(), password.clone()]);
        }

        if let Some(path) = ssh_keys {
            args.extend([
                "--ssh-public-keys".into(),
                path.to_string_lossy().into_owned(),
            ]);
        }

        args
    }

    /// Arguments of `qm create` for a virtual machine specification.
    pub fn vm_args(spec: &GuestSpec, ssh_keys: Option<&Path>) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            spec.id.to_string(),
            "--name".into(),
            spec.hostname.clone(),
            "--cores".into(),
            spec.cores.to_string(),
            "--memory".into(),
            spec.memory.to_string(),
            "--net0".into(),
            vm_net(&spec.network),
            "--scsihw".into(),
            "virtio-scsi-pci".into(),
            "--scsi0".into(),
            format!("{}:{}", spec.storage, spec.disk),
            "--ide2".into(),
            format!("{}:cloudinit", spec.storage),
            "--boot".into(),
            "order=scsi0".into(),
            "--agent".into(),
            "enabled=1".into(),
            "--ostype".into(),
            "l26".into(),
            "--onboot".into(),
            "1".into(),
            "--ipconfig0".into(),
            vm_ipconfig(&spec.network),
        ];

        if !spec.tags.is_empty() {
            args.extend(["--tags".into(), spec.tags.join(";")]);
        }

        if let Some(password) = &spec.password {
            args.extend([
                "--ciuser".into(),
                "root".into(),
                "--cipassword".into(),
                password.clone(),
            ]);
        }

        if let Some(path) = ssh_keys {
            args.extend(["--sshkeys".into(), path.to_string_lossy().into_owned()]);
        }

        args
    }

    fn with_ssh_keys<T>(
        &self,
        spec: &GuestSpec,
        body: impl FnOnce(Option<&Path>) -> Result<T>,
    ) -> Result<T> {
        let Some(key) = spec.ssh_key.as_deref().filter(|_| spec.ssh) else {
            return body(None);
        };

        // INVARIANT: Key is staged in a fresh file created exclusively with
        //   mode 0600, never at a path somebody else could have planted.
        let mut staged = tempfile::Builder::new()
            .prefix("proxforge-")
            .suffix(".pub")
            .tempfile()
            .map_err(|err| ProvisionError::failed(1, format!("cannot stage ssh key: {err}")))?;
        writeln!(staged, "{key}")
            .and_then(|()| staged.flush())
            .map_err(|err| {
                ProvisionError::failed(
                    1,
                    format!("cannot stage ssh key at {}: {err}", staged.path().display()),
                )
            })?;

        let result = body(Some(staged.path()));
        if let Err(err) = staged.close() {
            warn!("cannot remove staged ssh key: {err}");
        }

        result
    }
}

impl<R> Provisioner for PveCli<R>
where
    R: CommandRunner,
{
    // INVARIANT: A standalone node has no cluster, so `pvecm` failing is fine.
    #[instrument(skip(self), level = "debug")]
    fn is_quorate(&self) -> Result<bool> {
        let output = self.call_unchecked("pvecm", &args(["status"]))?;
        if !output.success() {
            debug!("pvecm status failed, assuming standalone node");
            return Ok(true);
        }

        Ok(!output
            .stdout
            .lines()
            .any(|line| line.trim().starts_with("Quorate:") && line.contains("No")))
    }

    #[instrument(skip(self), level = "debug")]
    fn next_id(&self) -> Result<u32> {
        let output = self.call("pvesh", &args(["get", "/cluster/nextid"]))?;
        let id = output.stdout.trim().trim_matches('"');
        id.parse().map_err(|_| ProvisionError::Output {
            program: "pvesh".into(),
            message: format!("expected guest id, got {id:?}"),
        })
    }

    #[instrument(skip(self), level = "debug")]
    fn id_in_use(&self, id: u32) -> Result<bool> {
        let output = self.call(
            "pvesh",
            &args([
                "get",
                "/cluster/resources",
                "--type",
                "vm",
                "--output-format",
                "json",
            ]),
        )?;

        let resources: Vec<ClusterResource> =
            serde_json::from_str(&output.stdout).map_err(|err| ProvisionError::Output {
                program: "pvesh".into(),
                message: err.to_string(),
            })?;

        Ok(resources.iter().any(|resource| resource.vmid == Some(id)))
    }

    #[instrument(skip(self), level = "debug")]
    fn storage_status(&self, storage: &str, content: &str) -> Result<Option<StorageStatus>> {
        let output = self.call("pvesm", &args(["status", "--content", content]))?;
        Ok(parse_storage_status(&output.stdout)
            .into_iter()
            .find(|status| status.name == storage))
    }

    #[instrument(skip(self), level = "debug")]
    fn local_templates(&self, storage: &str) -> Result<Vec<String>> {
        let output = self.call("pveam", &args(["list", storage]))?;
        Ok(parse_template_list(&output.stdout))
    }

    #[instrument(skip(self), level = "debug")]
    fn available_templates(&self) -> Result<Vec<String>> {
        self.call("pveam", &args(["update"]))?;
        let output = self.call("pveam", &args(["available", "--section", "system"]))?;
        Ok(parse_available_templates(&output.stdout))
    }

    #[instrument(skip(self), level = "debug")]
    fn download_template(&self, storage: &str, template: &str) -> Result<()> {
        self.call("pveam", &args(["download", storage, template]))
            .map_err(|err| ProvisionError::failed(222, format!("template download failed: {err}")))?;
        Ok(())
    }

    #[instrument(skip(self, spec), fields(id = spec.id), level = "debug")]
    fn create_container(&self, spec: &GuestSpec, template: &str) -> Result<()> {
        self.with_ssh_keys(spec, |ssh_keys| {
            self.call("pct", &Self::container_args(spec, template, ssh_keys))
        })?;

        // INVARIANT: A created container is listed and has a root filesystem.
        let id = spec.id.to_string();
        let config = self
            .call("pct", &args(["config", id.as_str()]))
            .map_err(|_| {
                ProvisionError::failed(215, format!("container {id} created but not listed"))
            })?;
        if !config.stdout.lines().any(|line| line.starts_with("rootfs:")) {
            return Err(ProvisionError::failed(
                216,
                format!("container {id} has no rootfs entry"),
            ));
        }

        Ok(())
    }

    #[instrument(skip(self, spec), fields(id = spec.id), level = "debug")]
    fn create_vm(&self, spec: &GuestSpec) -> Result<()> {
        self.with_ssh_keys(spec, |ssh_keys| {
            self.call("qm", &Self::vm_args(spec, ssh_keys))
        })?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn start(&self, kind: GuestKind, id: u32) -> Result<()> {
        self.call(tool(kind), &args(["start", id.to_string().as_str()]))?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn guest_addresses(&self, kind: GuestKind, id: u32) -> Result<Vec<Ipv4Addr>> {
        let id = id.to_string();
        match kind {
            GuestKind::Container => {
                let output =
                    self.call("pct", &args(["exec", id.as_str(), "--", "hostname", "-I"]))?;
                Ok(hostname_ipv4_addresses(&output.stdout))
            }
            GuestKind::VirtualMachine => {
                let output = self
                    .call(
                        "qm",
                        &args(["guest", "cmd", id.as_str(), "network-get-interfaces"]),
                    )
                    .map_err(|err| {
                        ProvisionError::failed(231, format!("guest agent not responding: {err}"))
                    })?;
                agent_ipv4_addresses(&output.stdout).map_err(|err| {
                    ProvisionError::failed(231, format!("guest agent gave bad answer: {err}"))
                })
            }
        }
    }
}

fn args<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.into_iter().map(str::to_owned).collect()
}

fn tool(kind: GuestKind) -> &'static str {
    match kind {
        GuestKind::Container => "pct",
        GuestKind::VirtualMachine => "qm",
    }
}

fn container_net(network: &NetworkSpec) -> String {
    let mut net = format!("name=eth0,bridge={},ip={}", network.bridge, network.address);
    if let Some(gateway) = network.gateway {
        net.push_str(&format!(",gw={gateway}"));
    }
    if let Some(vlan) = network.vlan {
        net.push_str(&format!(",tag={vlan}"));
    }
    if let Some(mtu) = network.mtu {
        net.push_str(&format!(",mtu={mtu}"));
    }
    if let Some(mac) = &network.mac {
        net.push_str(&format!(",hwaddr={mac}"));
    }

    net
}

fn vm_net(network: &NetworkSpec) -> String {
    let mut net = format!("virtio,bridge={}", network.bridge);
    if let Some(mac) = &network.mac {
        net = format!("virtio={mac},bridge={}", network.bridge);
    }
    if let Some(vlan) = network.vlan {
        net.push_str(&format!(",tag={vlan}"));
    }
    if let Some(mtu) = network.mtu {
        net.push_str(&format!(",mtu={mtu}"));
    }

    net
}

fn vm_ipconfig(network: &NetworkSpec) -> String {
    match (&network.address, network.gateway) {
        (Address::Dhcp, _) => "ip=dhcp".into(),
        (Address::Static(cidr), Some(gateway)) => format!("ip={cidr},gw={gateway}"),
        (Address::Static(cidr), None) => format!("ip={cidr}"),
    }
}

#[derive(Debug, Deserialize)]
struct ClusterResource {
    #[serde(default)]
    vmid: Option<u32>,
}

fn parse_storage_status(output: &str) -> Vec<StorageStatus> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let columns = line.split_whitespace().collect::<Vec<_>>();
            if columns.len() < 6 {
                return None;
            }

            Some(StorageStatus {
                name: columns[0].into(),
                active: columns[2] == "active",
                available_kib: columns[5].parse().ok()?,
            })
        })
        .collect()
}

fn parse_template_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|volume| volume.split_once("vztmpl/").map(|(_, name)| name.to_owned()))
        .collect()
}

fn parse_available_templates(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            match (columns.next(), columns.next()) {
                (Some("system"), Some(template)) => Some(template.to_owned()),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::tests::{spec, ScriptedRunner};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::{cell::RefCell, os::unix::fs::PermissionsExt, path::PathBuf};

    /// Runner that inspects the staged key file while `pct create` runs.
    #[derive(Debug, Default)]
    struct KeyInspector {
        staged: RefCell<Option<(PathBuf, String, u32)>>,
    }

    impl CommandRunner for KeyInspector {
        fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
            if let Some(index) = args.iter().position(|arg| arg == "--ssh-public-keys") {
                let path = PathBuf::from(&args[index + 1]);
                let metadata = std::fs::symlink_metadata(&path)?;
                let content = std::fs::read_to_string(&path)?;
                *self.staged.borrow_mut() =
                    Some((path, content, metadata.permissions().mode() & 0o777));
            }

            let stdout = match (program, args.first().map(String::as_str)) {
                ("pct", Some("config")) => "rootfs: local-lvm:vm-4242-disk-0,size=8G\n",
                _ => "",
            };
            Ok(CommandOutput {
                code: 0,
                stdout: stdout.into(),
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn ssh_key_staging_never_follows_planted_paths() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let victim = dir.path().join("victim.txt");
        std::fs::write(&victim, "ORIGINAL")?;
        let planted = std::env::temp_dir().join("proxforge-4242.pub");
        let _ = std::fs::remove_file(&planted);
        std::os::unix::fs::symlink(&victim, &planted)?;

        let mut spec = spec(GuestKind::Container);
        spec.id = 4242;
        spec.ssh = true;
        spec.ssh_key = Some("ssh-ed25519 AAAAC3Nza ops@example".into());
        let cli = PveCli::new(KeyInspector::default());
        let result = cli.create_container(&spec, "debian-12-standard_12.7-1_amd64.tar.zst");
        std::fs::remove_file(&planted)?;
        result?;

        assert_eq!(std::fs::read_to_string(&victim)?, "ORIGINAL");
        let (path, content, mode) = cli.runner().staged.borrow_mut().take().unwrap();
        assert_ne!(path, planted);
        assert_eq!(content, "ssh-ed25519 AAAAC3Nza ops@example\n");
        assert_eq!(mode, 0o600);
        assert!(!path.exists());

        Ok(())
    }

    #[test]
    fn container_create_arguments() {
        let mut spec = spec(GuestKind::Container);
        spec.password = Some("hunter22".into());
        let args = PveCli::<ScriptedRunner>::container_args(
            &spec,
            "debian-12-standard_12.7-1_amd64.tar.zst",
            None,
        );

        let expect = "pct create 120 local:vztmpl/debian-12-standard_12.7-1_amd64.tar.zst \
            --hostname jellyfin --cores 2 --memory 2048 --rootfs local-lvm:8 \
            --net0 name=eth0,bridge=vmbr0,ip=dhcp,tag=30 --ostype debian --unprivileged 1 \
            --features nesting=1 --onboot 1 --tags media;arr --password ********";
        assert_eq!(render_command("pct", &args), expect);
    }

    #[test]
    fn vm_create_arguments() {
        let mut spec = spec(GuestKind::VirtualMachine);
        spec.network.address = Address::Static("10.0.0.9/24".into());
        spec.network.gateway = Some(Ipv4Addr::new(10, 0, 0, 1));
        spec.network.mac = Some("02:00:00:aa:bb:cc".into());
        let args = PveCli::<ScriptedRunner>::vm_args(&spec, None);

        assert!(args.contains(&"virtio=02:00:00:aa:bb:cc,bridge=vmbr0,tag=30".to_string()));
        assert!(args.contains(&"ip=10.0.0.9/24,gw=10.0.0.1".to_string()));
        assert!(args.contains(&"local-lvm:cloudinit".to_string()));
    }

    #[test]
    fn nonzero_exit_keeps_code() {
        let cli = PveCli::new(ScriptedRunner::default().reply("pct start", 206, ""));
        let result = cli.start(GuestKind::Container, 120);
        match result {
            Err(error @ ProvisionError::Command { .. }) => assert_eq!(error.exit_code(), 206),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn id_in_use_reads_cluster_resources() -> anyhow::Result<()> {
        let resources = r#"[{"vmid":100,"type":"lxc"},{"vmid":120,"type":"qemu"},{"type":"storage"}]"#;
        let cli = PveCli::new(ScriptedRunner::default().reply("pvesh get /cluster/resources", 0, resources));

        assert!(cli.id_in_use(120)?);
        assert!(!cli.id_in_use(121)?);

        Ok(())
    }

    #[test]
    fn next_id_trims_quotes() -> anyhow::Result<()> {
        let cli = PveCli::new(ScriptedRunner::default().reply("pvesh get /cluster/nextid", 0, "\"104\"\n"));
        assert_eq!(cli.next_id()?, 104);
        Ok(())
    }

    #[test]
    fn parse_pvesm_status() {
        let output = indoc! {"
            Name             Type     Status           Total            Used       Available        %
            local             dir     active        98497780        12345678        81088152   12.53%
            local-lvm     lvmthin   inactive       832888832        41644441       791244390    5.00%
        "};

        let result = parse_storage_status(output);
        assert_eq!(
            result,
            vec![
                StorageStatus {
                    name: "local".into(),
                    active: true,
                    available_kib: 81_088_152,
                },
                StorageStatus {
                    name: "local-lvm".into(),
                    active: false,
                    available_kib: 791_244_390,
                },
            ]
        );
    }

    #[test]
    fn parse_pveam_listings() {
        let list = indoc! {"
            NAME                                                         SIZE
            local:vztmpl/debian-12-standard_12.7-1_amd64.tar.zst       120.29MB
        "};
        assert_eq!(
            parse_template_list(list),
            vec!["debian-12-standard_12.7-1_amd64.tar.zst"]
        );

        let available = indoc! {"
            mail            proxmox-mail-gateway-8.1-standard_8.1-1_amd64.tar.zst
            system          alpine-3.20-default_20240908_amd64.tar.xz
            system          debian-12-standard_12.7-1_amd64.tar.zst
        "};
        assert_eq!(
            parse_available_templates(available),
            vec![
                "alpine-3.20-default_20240908_amd64.tar.xz",
                "debian-12-standard_12.7-1_amd64.tar.zst",
            ]
        );
    }

    #[test]
    fn container_without_rootfs_is_rejected() {
        let runner = ScriptedRunner::default().reply("pct config 120", 0, "hostname: jellyfin\n");
        let cli = PveCli::new(runner);
        let spec = spec(GuestKind::Container);

        let result = cli.create_container(&spec, "debian-12-standard_12.7-1_amd64.tar.zst");
        match result {
            Err(error) => assert_eq!(error.exit_code(), 216),
            Ok(()) => panic!("container without rootfs accepted"),
        }
    }

    #[test]
    fn silent_guest_agent_reports_231() {
        let runner = ScriptedRunner::default().reply("qm guest cmd", 255, "");
        let cli = PveCli::new(runner);
        let result = cli.guest_addresses(GuestKind::VirtualMachine, 120);
        assert_eq!(result.map_err(|error| error.exit_code()), Err(231));
    }
}
