use std::path::{Path, PathBuf};
use tokio::process::Command;
use crate::platforms::CommandOutput;

/// Connection details for reaching a slice node through the FABRIC bastion host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BastionRoute {
    pub host: String,
    pub username: String,
    pub key_location: PathBuf,
}

/// Runs commands on slice nodes. Like the rest of the tool this shells out to the `ssh` binary
/// rather than linking an ssh library, all we need is to run a remote command and read its output.
#[derive(Debug, Clone)]
pub struct SSHClient {
    bastion: BastionRoute,
    node_key_location: PathBuf,
}

impl SSHClient {
    pub fn new(bastion: BastionRoute, node_key_location: PathBuf) -> Self {
        Self { bastion, node_key_location }
    }

    /// Run a command on a node, a non zero exit status is reported in the output rather than as an
    /// error so callers can decide if the failure matters.
    pub async fn run_node_command(
        &self,
        username: &str,
        management_ip: &str,
        remote_cmd: &str,
    ) -> anyhow::Result<CommandOutput> {
        let args = node_command_args(&self.bastion, &self.node_key_location, username, management_ip, remote_cmd);
        tracing::debug!("running remote command on {management_ip}: {remote_cmd}");
        tracing::trace!("ssh {args:?}");

        let sub_process = Command::new("ssh")
            .args(&args)
            .output()
            .await?;

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&sub_process.stdout).to_string(),
            stderr: String::from_utf8_lossy(&sub_process.stderr).to_string(),
            success: sub_process.status.success(),
        };
        if !output.success {
            tracing::debug!("remote command ({remote_cmd}) on {management_ip} failed: {}", output.stderr.trim());
        }
        Ok(output)
    }
}

fn ssh_opts() -> Vec<&'static str> {
    // node addresses are recycled between slices so their host keys are never pinned
    vec!["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=no", "-o", "UserKnownHostsFile=/dev/null"]
}

fn node_command_args(
    bastion: &BastionRoute,
    node_key: &Path,
    username: &str,
    management_ip: &str,
    remote_cmd: &str,
) -> Vec<String> {
    let proxy = format!(
        "ProxyCommand=ssh -i {} {} -W %h:%p {}@{}",
        bastion.key_location.display(),
        ssh_opts().join(" "),
        bastion.username,
        bastion.host,
    );
    let mut args = vec![
        "-i".to_string(),
        node_key.display().to_string(),
        "-o".to_string(),
        proxy,
    ];
    args.extend(ssh_opts().into_iter().map(String::from));
    args.push(format!("{username}@{management_ip}"));
    args.push(remote_cmd.to_string());
    args
}
