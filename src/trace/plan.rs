//! Trace dropin rendering and the per-reconcile action plan.

use crate::constants::{TRACE_DROPIN_PATH, TRACE_LOG_ROOT};
use crate::crd::OpenLibertyTraceSpec;
use crate::sharing::xml::escape_attr;

/// Log directory of a traced pod
pub fn log_directory(namespace: &str, pod: &str) -> String {
    format!("{TRACE_LOG_ROOT}/{namespace}/{pod}")
}

/// `<logging>` dropin enabling the trace specification
pub fn trace_xml(spec: &OpenLibertyTraceSpec, namespace: &str) -> String {
    let mut attrs = format!(
        "traceSpecification=\"{}\" logDirectory=\"{}\"",
        escape_attr(&spec.trace_specification),
        escape_attr(&log_directory(namespace, &spec.pod_name))
    );
    if let Some(max_file_size) = spec.max_file_size {
        attrs.push_str(&format!(" maxFileSize=\"{max_file_size}\""));
    }
    if let Some(max_files) = spec.max_files {
        attrs.push_str(&format!(" maxFiles=\"{max_files}\""));
    }
    format!("<server>\n  <logging {attrs}/>\n</server>\n")
}

/// Wrap `value` in single quotes for `sh -c`
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Command creating the log directory and writing the dropin in one exec
pub fn write_dropin_command(xml: &str, log_directory: &str) -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!(
            "mkdir -p {} && printf '%s' {} > {TRACE_DROPIN_PATH}",
            shell_quote(log_directory),
            shell_quote(xml)
        ),
    ]
}

/// Command removing the dropin; succeeds when it is already gone
pub fn remove_dropin_command() -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!("rm -f {TRACE_DROPIN_PATH}"),
    ]
}

/// What the trace reconcile does to the requested pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceAction {
    /// Write the dropin
    Enable,
    /// Trace is disabled; `remove` when the dropin was written to this pod before
    Disable { remove: bool },
    /// The pod is missing or not running
    PodUnavailable,
}

/// Steps of one trace reconcile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracePlan {
    /// Previously traced pod to clean up first
    pub remove_from: Option<String>,
    pub action: TraceAction,
}

/// Plan a trace reconcile from the recorded pod and whether trace was enabled on it
pub fn plan(
    spec: &OpenLibertyTraceSpec,
    previous_pod: Option<&str>,
    previously_enabled: bool,
    pod_running: bool,
    disabled: bool,
) -> TracePlan {
    let same_pod = previous_pod == Some(spec.pod_name.as_str());
    let remove_from = previous_pod
        .filter(|_| previously_enabled && !same_pod)
        .map(str::to_string);
    let action = if !pod_running {
        TraceAction::PodUnavailable
    } else if disabled {
        TraceAction::Disable {
            remove: previously_enabled && same_pod,
        }
    } else {
        TraceAction::Enable
    };
    TracePlan {
        remove_from,
        action,
    }
}
