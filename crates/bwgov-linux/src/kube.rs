use std::process::Command;

use log::debug;
use serde_json::{json, Value};

use bwgov_core::WorkloadRef;
use bwgov_hal::{PatchError, WorkloadPatcher};

/// Drives the orchestration API through `kubectl`.
pub struct KubectlPatcher {
    kubectl: String,
    context: Option<String>,
    kind: String,
}

impl KubectlPatcher {
    pub fn new(kubectl: &str, context: Option<&str>) -> Self {
        Self {
            kubectl: kubectl.to_string(),
            context: context.map(str::to_string),
            kind: "deployment".to_string(),
        }
    }

    fn command(&self, target: &WorkloadRef) -> Command {
        let mut cmd = Command::new(&self.kubectl);
        if let Some(ctx) = &self.context {
            cmd.args(["--context", ctx]);
        }
        cmd.args(["-n", &target.namespace]);
        cmd
    }

    fn run(&self, mut cmd: Command) -> Result<String, PatchError> {
        let output = cmd
            .output()
            .map_err(|e| PatchError::Failed(format!("cannot run {}: {}", self.kubectl, e)))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_failure(&String::from_utf8_lossy(&output.stderr)))
        }
    }
}

/// Merge-patch body setting one pod-template annotation.
pub fn patch_body(key: &str, value: &str) -> String {
    json!({
        "spec": { "template": { "metadata": { "annotations": { key: value } } } }
    })
    .to_string()
}

/// Maps kubectl's stderr onto the retry taxonomy.
pub fn classify_failure(stderr: &str) -> PatchError {
    if stderr.contains("Conflict") || stderr.contains("the object has been modified") {
        PatchError::Conflict
    } else if stderr.contains("NotFound") || stderr.contains("not found") {
        PatchError::NotFound(stderr.trim().to_string())
    } else {
        PatchError::Failed(stderr.trim().to_string())
    }
}

/// Extracts a pod-template annotation from `kubectl get -o json` output.
pub fn annotation_from_json(body: &str, key: &str) -> Result<Option<String>, PatchError> {
    let v: Value = serde_json::from_str(body)
        .map_err(|e| PatchError::Failed(format!("bad kubectl json: {}", e)))?;
    Ok(v["spec"]["template"]["metadata"]["annotations"][key]
        .as_str()
        .map(str::to_string))
}

impl WorkloadPatcher for KubectlPatcher {
    fn patch_annotation(&mut self, target: &WorkloadRef, key: &str, value: &str) -> Result<(), PatchError> {
        let body = patch_body(key, value);
        let mut cmd = self.command(target);
        cmd.args(["patch", &self.kind, &target.name, "--type", "merge", "-p", &body]);
        debug!("kubectl patch {} {}: {}", self.kind, target, body);
        self.run(cmd).map(|_| ())
    }

    fn read_annotation(&mut self, target: &WorkloadRef, key: &str) -> Result<Option<String>, PatchError> {
        let mut cmd = self.command(target);
        cmd.args(["get", &self.kind, &target.name, "-o", "json"]);
        let out = self.run(cmd)?;
        annotation_from_json(&out, key)
    }
}
