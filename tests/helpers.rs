#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::Value as JsonValue;

use stratus::normalize::{
    DeploymentMode, DeploymentUnit, Parameters, PreChecks, ResourceGroup, RetryPolicy, Template,
};
use stratus::provider::{
    ApplyRequest, ContextSnapshot, DeploymentRecord, DeploymentStatus, ParameterSource,
    ProvisioningApi, ResourceGroupInfo,
};
use stratus::retry::Sleeper;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn env_lock() -> MutexGuard<'static, ()> {
    match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(g) => g,
        // A panicking test must not wedge the rest of the suite.
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Fresh, empty directory unique to this process and call.
pub fn unique_test_temp_dir(prefix: &str) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = env::temp_dir().join(format!("stratus-test-{prefix}-{}-{n}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn write_file(dir: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

pub fn write_executable(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).unwrap();
    }
}

/// Mock `az` that appends its argv to `log` and answers like the real CLI.
///
/// `group show` and `deployment group what-if` report NotFound unless the
/// group is in `existing_groups`; `deployment group create|show` report
/// `state`. Parameter files passed as `@path` are copied to
/// `last-parameters.json` next to the log.
pub fn mock_az(dir: &Path, existing_groups: &[&str], state: &str) -> (PathBuf, PathBuf) {
    let log = dir.join("az-calls.log");
    let bin = dir.join("mock_az.sh");
    let groups = existing_groups.join(" ");
    let script = format!(
        r#"#!/bin/sh
echo "$*" >> "{log}"
for a in "$@"; do
  case "$a" in
    @*) cat "${{a#@}}" > "{captured}" ;;
  esac
done
case "$1 $2" in
  "account show")
    echo '{{"id": "sub-main", "name": "Main"}}'
    ;;
  "group show")
    for g in {groups}; do
      if [ "$g" = "$4" ]; then
        echo "{{\"name\": \"$4\", \"location\": \"westeurope\", \"tags\": {{}}}}"
        exit 0
      fi
    done
    echo "ERROR: (ResourceGroupNotFound) Resource group '$4' could not be found." 1>&2
    exit 3
    ;;
  "group create")
    echo "{{\"name\": \"$4\", \"location\": \"$6\", \"tags\": {{\"env\": \"test\"}}}}"
    ;;
  "deployment group")
    case "$3" in
      create|show)
        echo "{{\"name\": \"$5\", \"properties\": {{\"provisioningState\": \"{state}\"}}}}"
        ;;
      what-if)
        for g in {groups}; do
          if [ "$g" = "$7" ]; then
            echo '{{"status": "Succeeded", "changes": []}}'
            exit 0
          fi
        done
        echo "ERROR: (ResourceGroupNotFound) Resource group '$7' could not be found." 1>&2
        exit 3
        ;;
    esac
    ;;
  *)
    echo "unexpected az call: $*" 1>&2
    exit 9
    ;;
esac
"#,
        log = log.display(),
        captured = dir.join("last-parameters.json").display(),
    );
    write_executable(&bin, &script);
    (bin, log)
}

pub fn read_log(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// RAII guard for test-only env var mutation, serialized by a global lock.
#[must_use]
pub struct EnvVarGuard {
    key: String,
    old: Option<OsString>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvVarGuard {
    pub fn set<K: Into<String>, V: AsRef<OsStr>>(key: K, value: V) -> Self {
        let key = key.into();
        let lock = env_lock();
        let old = env::var_os(&key);
        unsafe {
            env::set_var(&key, value);
        }
        Self {
            key,
            old,
            _lock: lock,
        }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        unsafe {
            match &self.old {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }
}

/// A unit whose template exists on disk under `dir`.
pub fn unit_in(dir: &Path, name: &str) -> DeploymentUnit {
    let template = write_file(dir, &format!("{name}.template.json"), r#"{ "resources": [] }"#);
    DeploymentUnit {
        name: name.to_string(),
        resource_group: ResourceGroup {
            name: format!("rg-{name}"),
            location: "westeurope".to_string(),
            tags: BTreeMap::from([("env".to_string(), "test".to_string())]),
        },
        template: Template {
            file: template,
            checksum: None,
        },
        parameters: Parameters::default(),
        mode: DeploymentMode::Incremental,
        pre_checks: PreChecks::default(),
        retry_policy: RetryPolicy {
            max_attempts: 3,
            delay_seconds: 1,
            backoff_factor: 2,
        },
        subscription_id: None,
    }
}

#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppliedParameters {
    Inline(BTreeMap<String, JsonValue>),
    File(PathBuf),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    IsAuthenticated,
    Authenticate,
    ResourceGroup(String),
    CreateResourceGroup(String),
    Apply {
        deployment: String,
        resource_group: String,
        mode: DeploymentMode,
        parameters: AppliedParameters,
        dry_run: bool,
    },
    DeploymentStatus(String),
    SwitchAccount(String),
    CaptureContext,
    RestoreContext(Option<String>),
    ReleaseContext,
}

/// In-memory provisioning API with scripted failures.
///
/// Apply calls succeed unless a failure budget was set for the deployment;
/// successful non-dry-run applies are reported as `Succeeded` by
/// `deployment_status` unless a status override exists.
#[derive(Debug, Default)]
pub struct ScriptedApi {
    calls: Mutex<Vec<Call>>,
    existing_groups: Mutex<HashSet<String>>,
    apply_failures: Mutex<HashMap<String, u32>>,
    applied: Mutex<HashSet<String>>,
    statuses: HashMap<String, Option<DeploymentStatus>>,
    unauthenticated: AtomicBool,
    account: Option<String>,
    apply_delay: Option<Duration>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing_group(self, name: &str) -> Self {
        self.existing_groups.lock().unwrap().insert(name.to_string());
        self
    }

    /// Fail the first `times` apply calls for `deployment`.
    pub fn failing_apply(self, deployment: &str, times: u32) -> Self {
        self.apply_failures
            .lock()
            .unwrap()
            .insert(deployment.to_string(), times);
        self
    }

    pub fn always_failing(self, deployment: &str) -> Self {
        self.failing_apply(deployment, u32::MAX)
    }

    pub fn with_status(mut self, deployment: &str, status: Option<DeploymentStatus>) -> Self {
        self.statuses.insert(deployment.to_string(), status);
        self
    }

    pub fn unauthenticated(self) -> Self {
        self.unauthenticated.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_account(mut self, account: &str) -> Self {
        self.account = Some(account.to_string());
        self
    }

    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn apply_attempts(&self, deployment: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Apply { deployment: d, .. } if d == deployment))
            .count()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ProvisioningApi for ScriptedApi {
    fn is_authenticated(&self) -> Result<bool> {
        self.record(Call::IsAuthenticated);
        Ok(!self.unauthenticated.load(Ordering::SeqCst))
    }

    fn authenticate(&self) -> Result<()> {
        self.record(Call::Authenticate);
        self.unauthenticated.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn resource_group(&self, name: &str) -> Result<Option<ResourceGroupInfo>> {
        self.record(Call::ResourceGroup(name.to_string()));
        let exists = self.existing_groups.lock().unwrap().contains(name);
        Ok(exists.then(|| ResourceGroupInfo {
            name: name.to_string(),
            location: "westeurope".to_string(),
            tags: BTreeMap::new(),
        }))
    }

    fn create_resource_group(
        &self,
        name: &str,
        location: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<ResourceGroupInfo> {
        self.record(Call::CreateResourceGroup(name.to_string()));
        self.existing_groups.lock().unwrap().insert(name.to_string());
        Ok(ResourceGroupInfo {
            name: name.to_string(),
            location: location.to_string(),
            tags: tags.clone(),
        })
    }

    fn apply_template(&self, request: &ApplyRequest<'_>) -> Result<DeploymentRecord> {
        let parameters = match request.parameters {
            ParameterSource::Inline(map) => AppliedParameters::Inline(map.clone()),
            ParameterSource::File(p) => AppliedParameters::File(p.to_path_buf()),
            ParameterSource::None => AppliedParameters::None,
        };
        self.record(Call::Apply {
            deployment: request.deployment_name.to_string(),
            resource_group: request.resource_group.to_string(),
            mode: request.mode,
            parameters,
            dry_run: request.dry_run,
        });

        if let Some(delay) = self.apply_delay {
            std::thread::sleep(delay);
        }

        let group_exists = self
            .existing_groups
            .lock()
            .unwrap()
            .contains(request.resource_group);
        if request.dry_run && !group_exists {
            return Err(anyhow!(
                "ResourceGroupNotFound: resource group '{}' could not be found",
                request.resource_group
            ));
        }

        {
            let mut failures = self.apply_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(request.deployment_name) {
                if *left > 0 {
                    if *left != u32::MAX {
                        *left -= 1;
                    }
                    return Err(anyhow!(
                        "InternalServerError: transient failure for '{}'",
                        request.deployment_name
                    ));
                }
            }
        }

        if !request.dry_run {
            self.applied
                .lock()
                .unwrap()
                .insert(request.deployment_name.to_string());
        }
        Ok(DeploymentRecord {
            name: request.deployment_name.to_string(),
            status: DeploymentStatus::Succeeded,
        })
    }

    fn deployment_status(
        &self,
        _resource_group: &str,
        deployment: &str,
    ) -> Result<Option<DeploymentStatus>> {
        self.record(Call::DeploymentStatus(deployment.to_string()));
        if let Some(status) = self.statuses.get(deployment) {
            return Ok(status.clone());
        }
        let applied = self.applied.lock().unwrap().contains(deployment);
        Ok(applied.then_some(DeploymentStatus::Succeeded))
    }

    fn switch_account(&self, account_id: &str) -> Result<()> {
        self.record(Call::SwitchAccount(account_id.to_string()));
        Ok(())
    }

    fn capture_context(&self) -> Result<ContextSnapshot> {
        self.record(Call::CaptureContext);
        Ok(ContextSnapshot::new(self.account.clone()))
    }

    fn restore_context(&self, snapshot: &ContextSnapshot) -> Result<()> {
        self.record(Call::RestoreContext(snapshot.account_id.clone()));
        Ok(())
    }

    fn release_context(&self) -> Result<()> {
        self.record(Call::ReleaseContext);
        Ok(())
    }
}
