use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use tracing::{debug, warn};

use crate::provider::{
    ApplyRequest, ContextSnapshot, DeploymentRecord, DeploymentStatus, ParameterSource,
    ProvisioningApi, ResourceGroupInfo,
};

const ARM_PARAMETERS_SCHEMA: &str =
    "https://schema.management.azure.com/schemas/2019-04-01/deploymentParameters.json#";

/// [`ProvisioningApi`] backed by the Azure CLI (`az`).
///
/// Account switches are kept per calling thread and passed to every command as
/// `--subscription`, so parallel workers never touch the CLI's shared default
/// account.
#[derive(Debug)]
pub struct AzCliProvider {
    bin: PathBuf,
    accounts: Mutex<HashMap<ThreadId, String>>,
}

struct AzOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl AzCliProvider {
    /// Uses `STRATUS_AZ_BIN` when set, else `az` on `PATH`.
    pub fn from_env() -> Self {
        Self::with_binary(az_bin())
    }

    pub fn with_binary(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            accounts: Mutex::new(HashMap::new()),
        }
    }

    fn thread_account(&self) -> Option<String> {
        self.accounts
            .lock()
            .ok()
            .and_then(|m| m.get(&thread::current().id()).cloned())
    }

    fn set_thread_account(&self, account: Option<&str>) -> Result<()> {
        let mut m = self
            .accounts
            .lock()
            .map_err(|_| anyhow!("az account map lock poisoned"))?;
        let id = thread::current().id();
        match account {
            Some(a) => m.insert(id, a.to_string()),
            None => m.remove(&id),
        };
        Ok(())
    }

    fn exec(&self, args: &[String]) -> Result<AzOutput> {
        let mut full: Vec<String> = args.to_vec();
        if let Some(account) = self.thread_account() {
            if !args.first().is_some_and(|a| a == "login") {
                full.push("--subscription".to_string());
                full.push(account);
            }
        }
        debug!(command = %full.join(" "), "invoking az");

        let out = Command::new(&self.bin)
            .args(&full)
            .output()
            .with_context(|| {
                format!(
                    "failed to spawn `{}` (is the Azure CLI installed and on PATH?)",
                    self.bin.display()
                )
            })?;

        Ok(AzOutput {
            success: out.status.success(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        })
    }

    fn run_json(&self, args: &[String]) -> Result<JsonValue> {
        let out = self.exec(args)?;
        if !out.success {
            return Err(anyhow!("az {} failed: {}", args_label(args), out.stderr));
        }
        parse_json(&out.stdout)
            .with_context(|| format!("az {} returned invalid JSON", args_label(args)))
    }

    fn write_inline_parameters(
        &self,
        request: &ApplyRequest<'_>,
        params: &BTreeMap<String, JsonValue>,
    ) -> Result<PathBuf> {
        let dir = scratch_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create scratch dir '{}'", dir.display()))?;

        let wrapped: serde_json::Map<String, JsonValue> = params
            .iter()
            .map(|(k, v)| (k.clone(), json!({ "value": v })))
            .collect();
        let doc = json!({
            "$schema": ARM_PARAMETERS_SCHEMA,
            "contentVersion": "1.0.0.0",
            "parameters": wrapped,
        });

        let path = scratch_parameters_path(request.resource_group, request.deployment_name);
        let body = serde_json::to_vec_pretty(&doc).context("failed to encode parameters")?;
        fs::write(&path, body)
            .with_context(|| format!("failed to write '{}'", path.display()))?;
        Ok(path)
    }
}

impl ProvisioningApi for AzCliProvider {
    fn is_authenticated(&self) -> Result<bool> {
        let out = self.exec(&args(&["account", "show", "-o", "json"]))?;
        Ok(out.success)
    }

    fn authenticate(&self) -> Result<()> {
        let out = self.exec(&args(&["login", "-o", "none"]))?;
        if !out.success {
            return Err(anyhow!("az login failed: {}", out.stderr));
        }
        Ok(())
    }

    fn resource_group(&self, name: &str) -> Result<Option<ResourceGroupInfo>> {
        let a = args(&["group", "show", "--name", name, "-o", "json"]);
        let out = self.exec(&a)?;
        if !out.success {
            if is_not_found(&out.stderr) {
                return Ok(None);
            }
            return Err(anyhow!("az {} failed: {}", args_label(&a), out.stderr));
        }
        let v = parse_json(&out.stdout).context("az group show returned invalid JSON")?;
        Ok(Some(group_info(&v, name)))
    }

    fn create_resource_group(
        &self,
        name: &str,
        location: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<ResourceGroupInfo> {
        let mut a = args(&["group", "create", "--name", name, "--location", location]);
        if !tags.is_empty() {
            a.push("--tags".to_string());
            a.extend(tags.iter().map(|(k, v)| format!("{k}={v}")));
        }
        a.extend(args(&["-o", "json"]));
        let v = self.run_json(&a)?;
        Ok(group_info(&v, name))
    }

    fn apply_template(&self, request: &ApplyRequest<'_>) -> Result<DeploymentRecord> {
        let verb = if request.dry_run { "what-if" } else { "create" };
        let template = path_arg(request.template_file)?;
        let mut a = args(&[
            "deployment",
            "group",
            verb,
            "--name",
            request.deployment_name,
            "--resource-group",
            request.resource_group,
            "--template-file",
            template,
            "--mode",
            request.mode.as_str(),
        ]);

        // Inline values may hold secrets; the file must not outlive the call.
        let scratch = match request.parameters {
            ParameterSource::Inline(map) => {
                Some(ScratchFile(self.write_inline_parameters(request, map)?))
            }
            _ => None,
        };
        let params_path = match (&scratch, request.parameters) {
            (Some(file), _) => Some(file.0.as_path()),
            (None, ParameterSource::File(p)) => Some(p),
            _ => None,
        };
        if let Some(p) = params_path {
            a.push("--parameters".to_string());
            a.push(format!("@{}", path_arg(p)?));
        }
        if request.dry_run {
            a.push("--no-pretty-print".to_string());
        }
        a.extend(args(&["-o", "json"]));

        let v = self.run_json(&a)?;
        let status = provisioning_state(&v)
            .map(DeploymentStatus::parse)
            .unwrap_or(DeploymentStatus::Succeeded);
        let name = v
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or(request.deployment_name)
            .to_string();
        Ok(DeploymentRecord { name, status })
    }

    fn deployment_status(
        &self,
        resource_group: &str,
        deployment: &str,
    ) -> Result<Option<DeploymentStatus>> {
        let a = args(&[
            "deployment",
            "group",
            "show",
            "--name",
            deployment,
            "--resource-group",
            resource_group,
            "-o",
            "json",
        ]);
        let out = self.exec(&a)?;
        if !out.success {
            if is_not_found(&out.stderr) {
                return Ok(None);
            }
            return Err(anyhow!("az {} failed: {}", args_label(&a), out.stderr));
        }
        let v = parse_json(&out.stdout).context("az deployment group show returned invalid JSON")?;
        Ok(provisioning_state(&v).map(DeploymentStatus::parse))
    }

    fn switch_account(&self, account_id: &str) -> Result<()> {
        // Validate the account before pinning it to this thread.
        let a = args(&["account", "show", "--subscription", account_id, "-o", "json"]);
        let out = Command::new(&self.bin)
            .args(&a)
            .output()
            .with_context(|| format!("failed to spawn `{}`", self.bin.display()))?;
        if !out.status.success() {
            return Err(anyhow!(
                "cannot switch to account '{account_id}': {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        self.set_thread_account(Some(account_id))
    }

    fn capture_context(&self) -> Result<ContextSnapshot> {
        if let Some(account) = self.thread_account() {
            return Ok(ContextSnapshot::new(Some(account)));
        }
        let out = self.exec(&args(&["account", "show", "-o", "json"]))?;
        if !out.success {
            return Ok(ContextSnapshot::default());
        }
        let v = parse_json(&out.stdout).context("az account show returned invalid JSON")?;
        Ok(ContextSnapshot::new(
            v.get("id").and_then(|id| id.as_str()).map(str::to_string),
        ))
    }

    fn restore_context(&self, snapshot: &ContextSnapshot) -> Result<()> {
        self.set_thread_account(snapshot.account_id.as_deref())
    }

    fn release_context(&self) -> Result<()> {
        self.set_thread_account(None)
    }
}

/// Removes the file on drop, whatever the outcome of the command.
struct ScratchFile(PathBuf);

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.0) {
            warn!(path = %self.0.display(), error = %err, "failed to remove scratch parameter file");
        }
    }
}

/// Where inline parameters for a deployment are staged.
pub fn scratch_parameters_path(resource_group: &str, deployment: &str) -> PathBuf {
    scratch_dir().join(format!("{resource_group}-{deployment}.parameters.json"))
}

fn scratch_dir() -> PathBuf {
    env::temp_dir().join(format!("stratus-{}", std::process::id()))
}

fn az_bin() -> PathBuf {
    env::var_os("STRATUS_AZ_BIN")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("az"))
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn args_label(args: &[String]) -> String {
    args.iter()
        .take_while(|a| !a.starts_with("--"))
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

fn path_arg(p: &Path) -> Result<&str> {
    p.to_str()
        .ok_or_else(|| anyhow!("path must be valid UTF-8: '{}'", p.display()))
}

fn parse_json(stdout: &str) -> Result<JsonValue> {
    serde_json::from_str(stdout.trim()).map_err(|e| anyhow!("{e}"))
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("NotFound") || stderr.contains("could not be found")
}

fn provisioning_state(v: &JsonValue) -> Option<&str> {
    v.pointer("/properties/provisioningState")
        .or_else(|| v.get("status"))
        .and_then(|s| s.as_str())
}

fn group_info(v: &JsonValue, fallback_name: &str) -> ResourceGroupInfo {
    let tags = v
        .get("tags")
        .and_then(|t| t.as_object())
        .map(|t| {
            t.iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                .collect()
        })
        .unwrap_or_default();
    ResourceGroupInfo {
        name: v
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or(fallback_name)
            .to_string(),
        location: v
            .get("location")
            .and_then(|l| l.as_str())
            .unwrap_or_default()
            .to_string(),
        tags,
    }
}
