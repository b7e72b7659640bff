//! Runtime client backed by the `docker` command-line interface.
//!
//! Every call spawns the CLI with `tokio::process`, classifies its stderr
//! into a [`RuntimeError`], and parses `inspect` output with `serde_json`.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use labnet_common::types::ContainerId;
use serde::Deserialize;
use tokio::process::Command;

use super::{
    ContainerHandle, ContainerSpec, NetworkHandle, NetworkSpec, RuntimeClient, RuntimeError,
    RuntimeResult, RuntimeStatus,
};

/// Runtime client that shells out to the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    /// Creates a client invoking `binary` (usually `docker`).
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, ctx: &CallContext<'_>, args: &[String]) -> RuntimeResult<String> {
        tracing::debug!(operation = ctx.operation, ?args, "invoking runtime cli");
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RuntimeError::Unavailable {
                message: format!("failed to run {}: {e}", self.binary),
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify(ctx, stderr.trim()))
    }

    async fn inspect_container(&self, id: &str, network: &str) -> RuntimeResult<ContainerHandle> {
        let ctx = CallContext::container("inspect", id);
        let stdout = self
            .run(&ctx, &strings(&["container", "inspect", id]))
            .await?;
        parse_container_inspect(&stdout, network)
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new(labnet_common::constants::DEFAULT_DOCKER_BINARY)
    }
}

#[async_trait]
impl RuntimeClient for DockerCli {
    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        let ctx = CallContext {
            operation: "pull",
            kind: "image",
            subject: image,
            image: Some(image),
        };
        let _ = self.run(&ctx, &strings(&["image", "pull", "--", image])).await?;
        Ok(())
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerHandle> {
        let ctx = CallContext {
            operation: "create",
            kind: "container",
            subject: &spec.name,
            image: Some(&spec.image),
        };
        let stdout = self.run(&ctx, &run_args(spec)).await?;
        let id = stdout.trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::Failed {
                operation: "create",
                message: "runtime returned no container id".into(),
            });
        }

        match self.inspect_container(&id, &spec.network).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                // The container exists but cannot be described; do not leave it behind.
                let rm = CallContext::container("remove", &id);
                if let Err(rm_err) = self
                    .run(&rm, &strings(&["container", "rm", "--force", &id]))
                    .await
                {
                    tracing::warn!(id = %id, error = %rm_err, "failed to remove uninspectable container");
                }
                Err(e)
            }
        }
    }

    async fn status(&self, id: &ContainerId) -> RuntimeResult<RuntimeStatus> {
        let ctx = CallContext::container("status", id.as_str());
        let stdout = self
            .run(
                &ctx,
                &strings(&[
                    "container",
                    "inspect",
                    "--format",
                    "{{.State.Status}}",
                    id.as_str(),
                ]),
            )
            .await?;
        Ok(RuntimeStatus::parse(&stdout))
    }

    async fn force_remove(&self, id: &ContainerId) -> RuntimeResult<()> {
        let ctx = CallContext::container("remove", id.as_str());
        let _ = self
            .run(&ctx, &strings(&["container", "rm", "--force", id.as_str()]))
            .await?;
        Ok(())
    }

    async fn fetch_logs(&self, id: &ContainerId, tail: usize) -> RuntimeResult<String> {
        let ctx = CallContext::container("logs", id.as_str());
        let output = Command::new(&self.binary)
            .args(["container", "logs", "--tail", &tail.to_string(), id.as_str()])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RuntimeError::Unavailable {
                message: format!("failed to run {}: {e}", self.binary),
            })?;

        // Container stderr is replayed on our stderr, so both streams are logs.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(classify(&ctx, stderr.trim()));
        }
        Ok(format!("{stdout}{stderr}"))
    }

    async fn find_network(&self, name: &str) -> RuntimeResult<Option<NetworkHandle>> {
        let ctx = CallContext::network("inspect", name);
        match self.run(&ctx, &strings(&["network", "inspect", name])).await {
            Ok(stdout) => parse_network_inspect(&stdout),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_network(&self, spec: &NetworkSpec) -> RuntimeResult<NetworkHandle> {
        let ctx = CallContext::network("create-network", &spec.name);
        let subnet = spec.subnet.to_string();
        let gateway = spec.gateway.to_string();
        let stdout = self
            .run(
                &ctx,
                &strings(&[
                    "network",
                    "create",
                    "--driver",
                    "bridge",
                    "--attachable",
                    "--subnet",
                    &subnet,
                    "--gateway",
                    &gateway,
                    &spec.name,
                ]),
            )
            .await?;
        Ok(NetworkHandle {
            id: stdout.trim().to_string(),
            name: spec.name.clone(),
            driver: "bridge".into(),
            subnet: Some(spec.subnet),
            gateway: Some(spec.gateway),
        })
    }

    fn is_available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }
}

/// What a CLI call was about, for error classification.
struct CallContext<'a> {
    operation: &'static str,
    kind: &'static str,
    subject: &'a str,
    image: Option<&'a str>,
}

impl<'a> CallContext<'a> {
    const fn container(operation: &'static str, id: &'a str) -> Self {
        Self {
            operation,
            kind: "container",
            subject: id,
            image: None,
        }
    }

    const fn network(operation: &'static str, name: &'a str) -> Self {
        Self {
            operation,
            kind: "network",
            subject: name,
            image: None,
        }
    }
}

const IMAGE_MISSING_MARKERS: &[&str] = &[
    "unable to find image",
    "pull access denied",
    "manifest unknown",
    "no such image",
    "repository does not exist",
    "not found: manifest",
];

const UNAVAILABLE_MARKERS: &[&str] = &[
    "cannot connect to the docker daemon",
    "is the docker daemon running",
    "error during connect",
];

fn classify(ctx: &CallContext<'_>, stderr: &str) -> RuntimeError {
    let lower = stderr.to_ascii_lowercase();
    let subject = ctx.subject.to_string();

    if UNAVAILABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return RuntimeError::Unavailable {
            message: stderr.to_string(),
        };
    }
    if let Some(image) = ctx.image {
        if IMAGE_MISSING_MARKERS.iter().any(|m| lower.contains(m)) {
            return RuntimeError::ImageNotFound {
                image: image.to_string(),
            };
        }
    }
    if lower.contains("no such container")
        || lower.contains("no such object")
        || lower.contains("no such network")
        || (ctx.kind == "network" && lower.contains("not found"))
    {
        return RuntimeError::NotFound {
            kind: ctx.kind,
            id: subject,
        };
    }
    if lower.contains("already exists")
        || lower.contains("is already in use")
        || lower.contains("conflict")
    {
        return RuntimeError::AlreadyExists {
            kind: ctx.kind,
            name: subject,
        };
    }
    RuntimeError::Failed {
        operation: ctx.operation,
        message: if stderr.is_empty() {
            "runtime exited with an error".to_string()
        } else {
            stderr.to_string()
        },
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_string()).collect()
}

/// Builds the `docker run` argument list for a spec.
fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = strings(&[
        "run",
        "--detach",
        "--name",
        &spec.name,
        "--network",
        &spec.network,
        "--ip",
    ]);
    args.push(spec.address.to_string());
    for (key, value) in &spec.env {
        args.push("--env".into());
        args.push(format!("{key}={value}"));
    }
    for (host, container) in &spec.volumes {
        args.push("--volume".into());
        args.push(format!("{host}:{container}"));
    }
    // Everything after the image belongs to the container, never to `docker run`.
    args.push("--".into());
    args.push(spec.image.clone());
    if let Some(command) = &spec.command {
        args.extend(command.iter().cloned());
    }
    args
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedContainer {
    id: String,
    state: InspectedState,
    #[serde(default)]
    config: InspectedConfig,
    #[serde(default)]
    network_settings: InspectedNetworkSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedState {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedConfig {
    #[serde(default)]
    exposed_ports: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedNetworkSettings {
    #[serde(default)]
    networks: Option<BTreeMap<String, InspectedEndpoint>>,
}

#[derive(Debug, Deserialize)]
struct InspectedEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedNetwork {
    id: String,
    name: String,
    driver: String,
    #[serde(rename = "IPAM", default)]
    ipam: InspectedIpam,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedIpam {
    #[serde(default)]
    config: Option<Vec<InspectedIpamConfig>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedIpamConfig {
    #[serde(default)]
    subnet: Option<String>,
    #[serde(default)]
    gateway: Option<String>,
}

fn malformed(what: &str, e: &serde_json::Error) -> RuntimeError {
    RuntimeError::Failed {
        operation: "inspect",
        message: format!("malformed {what} inspect output: {e}"),
    }
}

/// Parses `docker container inspect` output into a handle.
fn parse_container_inspect(json: &str, network: &str) -> RuntimeResult<ContainerHandle> {
    let mut entries: Vec<InspectedContainer> =
        serde_json::from_str(json).map_err(|e| malformed("container", &e))?;
    let entry = entries.pop().ok_or_else(|| RuntimeError::Failed {
        operation: "inspect",
        message: "empty container inspect output".into(),
    })?;

    let address = entry
        .network_settings
        .networks
        .as_ref()
        .and_then(|networks| networks.get(network))
        .and_then(|endpoint| endpoint.ip_address.parse::<Ipv4Addr>().ok());
    let exposed_ports = entry
        .config
        .exposed_ports
        .map(|ports| ports.into_keys().collect())
        .unwrap_or_default();

    Ok(ContainerHandle {
        id: ContainerId::new(entry.id),
        address,
        status: RuntimeStatus::parse(&entry.state.status),
        exposed_ports,
    })
}

/// Parses `docker network inspect` output.
fn parse_network_inspect(json: &str) -> RuntimeResult<Option<NetworkHandle>> {
    let mut entries: Vec<InspectedNetwork> =
        serde_json::from_str(json).map_err(|e| malformed("network", &e))?;
    let Some(entry) = entries.pop() else {
        return Ok(None);
    };
    let pool = entry
        .ipam
        .config
        .and_then(|configs| configs.into_iter().next());
    let subnet = pool
        .as_ref()
        .and_then(|p| p.subnet.as_deref())
        .and_then(|s| s.parse::<Ipv4Net>().ok());
    let gateway = pool
        .as_ref()
        .and_then(|p| p.gateway.as_deref())
        .and_then(|g| g.parse::<Ipv4Addr>().ok());

    Ok(Some(NetworkHandle {
        id: entry.id,
        name: entry.name,
        driver: entry.driver,
        subnet,
        gateway,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "lab-container-1700000000".into(),
            image: "nginx:alpine".into(),
            network: "lab-network".into(),
            address: Ipv4Addr::new(172, 20, 0, 2),
            env: BTreeMap::from([("MODE".to_string(), "lab".to_string())]),
            volumes: BTreeMap::from([("/srv/data".to_string(), "/data:ro".to_string())]),
            command: Some(vec!["nginx".into(), "-g".into(), "daemon off;".into()]),
        }
    }

    #[test]
    fn run_args_attach_static_address_without_publishing_ports() {
        let args = run_args(&spec());
        let joined = args.join(" ");
        assert!(joined.starts_with("run --detach --name lab-container-1700000000"));
        assert!(joined.contains("--network lab-network --ip 172.20.0.2"));
        assert!(joined.contains("--env MODE=lab"));
        assert!(joined.contains("--volume /srv/data:/data:ro"));
        assert!(!args.iter().any(|a| a == "-p" || a == "--publish"));
        assert_eq!(args.last().map(String::as_str), Some("daemon off;"));
    }

    #[test]
    fn run_args_end_options_before_image() {
        let spec = ContainerSpec {
            image: "--publish=8080:80".into(),
            command: Some(vec!["nginx:alpine".into()]),
            ..spec()
        };
        let args = run_args(&spec);
        let image_at = args.iter().position(|a| a == "--publish=8080:80").unwrap();
        assert_eq!(args[image_at - 1], "--");
        assert_eq!(args.iter().filter(|a| *a == "--").count(), 1);
        assert!(args[..image_at - 1].iter().all(|a| !a.starts_with("--publish")));
        assert_eq!(args[image_at + 1], "nginx:alpine");
    }

    #[test]
    fn image_errors_only_classified_when_image_is_involved() {
        let ctx = CallContext {
            operation: "create",
            kind: "container",
            subject: "web",
            image: Some("ghost:latest"),
        };
        let err = classify(
            &ctx,
            "Unable to find image 'ghost:latest' locally\nError response from daemon: pull access denied",
        );
        assert_eq!(
            err,
            RuntimeError::ImageNotFound {
                image: "ghost:latest".into()
            }
        );
    }

    #[test]
    fn missing_container_is_not_found() {
        let ctx = CallContext::container("remove", "abc123");
        let err = classify(&ctx, "Error response from daemon: No such container: abc123");
        assert!(err.is_not_found());
    }

    #[test]
    fn name_conflict_is_already_exists() {
        let ctx = CallContext {
            operation: "create",
            kind: "container",
            subject: "web",
            image: Some("nginx"),
        };
        let err = classify(
            &ctx,
            r#"docker: Error response from daemon: Conflict. The container name "/web" is already in use by container "f00"."#,
        );
        assert!(matches!(err, RuntimeError::AlreadyExists { kind: "container", .. }));
    }

    #[test]
    fn daemon_down_is_unavailable() {
        let ctx = CallContext::container("status", "abc");
        let err = classify(
            &ctx,
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?",
        );
        assert!(matches!(err, RuntimeError::Unavailable { .. }));
    }

    #[test]
    fn parses_container_inspect_address_and_ports() {
        let json = r#"[{
            "Id": "4f2a9c0e1b7d",
            "State": { "Status": "running" },
            "Config": { "ExposedPorts": { "80/tcp": {}, "443/tcp": {} } },
            "NetworkSettings": { "Networks": { "lab-network": { "IPAddress": "172.20.0.2" } } }
        }]"#;
        let handle = parse_container_inspect(json, "lab-network").unwrap();
        assert_eq!(handle.id.as_str(), "4f2a9c0e1b7d");
        assert_eq!(handle.address, Some(Ipv4Addr::new(172, 20, 0, 2)));
        assert_eq!(handle.status, RuntimeStatus::Running);
        assert_eq!(handle.exposed_ports, vec!["443/tcp", "80/tcp"]);
    }

    #[test]
    fn container_on_other_network_has_no_address() {
        let json = r#"[{
            "Id": "abc",
            "State": { "Status": "running" },
            "Config": { "ExposedPorts": null },
            "NetworkSettings": { "Networks": { "bridge": { "IPAddress": "172.17.0.5" } } }
        }]"#;
        let handle = parse_container_inspect(json, "lab-network").unwrap();
        assert_eq!(handle.address, None);
        assert!(handle.exposed_ports.is_empty());
    }

    #[test]
    fn parses_network_inspect_ipam() {
        let json = r#"[{
            "Name": "lab-network",
            "Id": "9e1d",
            "Driver": "bridge",
            "IPAM": { "Driver": "default", "Config": [ { "Subnet": "172.20.0.0/16", "Gateway": "172.20.0.1" } ] }
        }]"#;
        let handle = parse_network_inspect(json).unwrap().unwrap();
        assert_eq!(handle.name, "lab-network");
        assert_eq!(handle.subnet, Some("172.20.0.0/16".parse().unwrap()));
        assert_eq!(handle.gateway, Some(Ipv4Addr::new(172, 20, 0, 1)));
    }

    #[test]
    fn malformed_inspect_output_is_failed() {
        assert!(matches!(
            parse_network_inspect("not json"),
            Err(RuntimeError::Failed { .. })
        ));
    }
}
