//! Trace controller reconcile.

use super::factory::TraceFactory;
use super::plan::{log_directory, plan, remove_dropin_command, trace_xml, write_dropin_command, TraceAction};
use crate::constants::{APP_CONTAINER, TRACE_FINALIZER};
use crate::controller::reconciler::finalizer::{add_finalizer, finalize, record_cleanup, remove_finalizer};
use crate::controller::reconciler::status::{update_trace_status, CONDITION_ENABLED};
use crate::controller::reconciler::Reconciler;
use crate::controller::Error;
use crate::crd::{find_condition, set_condition, Condition, OpenLibertyTrace, OperatedResource};
use crate::observability::metrics;
use crate::sharing::{lease_shared_resource, remove_from_tracker};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, info_span, warn, Instrument};

const CONTROLLER: &str = "trace";

/// Run `command` in the `app` container of `pod`
///
/// # Errors
///
/// Returns [`Error::Exec`] when the exec cannot be started or does not report success.
pub async fn exec_in_app(pods: &Api<Pod>, pod: &str, command: Vec<String>) -> Result<(), Error> {
    let exec_error = |message: String| Error::Exec {
        pod: pod.to_string(),
        message,
    };
    let params = AttachParams::default()
        .container(APP_CONTAINER)
        .stdout(false)
        .stderr(true);
    let mut attached = pods
        .exec(pod, command, &params)
        .await
        .map_err(|e| exec_error(e.to_string()))?;

    let mut stderr = String::new();
    if let Some(mut reader) = attached.stderr() {
        // Output is advisory; a read failure leaves the message empty
        if let Err(e) = reader.read_to_string(&mut stderr).await {
            debug!("Failed to read exec stderr from {}: {}", pod, e);
        }
    }
    let status = match attached.take_status() {
        Some(status) => status.await,
        None => None,
    };
    if let Err(e) = attached.join().await {
        return Err(exec_error(e.to_string()));
    }
    match status {
        Some(s) if s.status.as_deref() == Some("Success") => Ok(()),
        Some(s) => Err(exec_error(
            s.message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| stderr.trim().to_string()),
        )),
        None => Err(exec_error("no exec status returned".to_string())),
    }
}

/// Remove the dropin, tolerating an unreachable pod
async fn remove_dropin_best_effort(pods: &Api<Pod>, pod: &str) {
    match exec_in_app(pods, pod, remove_dropin_command()).await {
        Ok(()) => {
            metrics::increment_trace_operations("remove");
            info!("🧹 Removed trace dropin from pod {}", pod);
        }
        Err(e) => warn!("Could not remove trace dropin from pod {}: {}", pod, e),
    }
}

fn is_running(pod: Option<&Pod>) -> bool {
    pod.and_then(|p| p.status.as_ref())
        .and_then(|s| s.phase.as_deref())
        == Some("Running")
}

/// Reconcile one `OpenLibertyTrace`
///
/// # Errors
///
/// Returns tracker, exec and API errors; they are recorded on the `Enabled` condition first.
pub async fn reconcile_trace(trace: Arc<OpenLibertyTrace>, ctx: Arc<Reconciler>) -> Result<Action, Error> {
    let start = Instant::now();
    metrics::increment_reconciliations(CONTROLLER);
    let name = trace.name_any();
    let namespace = trace
        .namespace()
        .ok_or_else(|| Error::Validation("OpenLibertyTrace must be namespaced".to_string()))?;

    let span = info_span!(
        "controller.trace.reconcile",
        resource.name = %name,
        resource.namespace = %namespace
    );
    reconcile_instrumented(trace, ctx, namespace, name, start)
        .instrument(span)
        .await
}

async fn reconcile_instrumented(
    trace: Arc<OpenLibertyTrace>,
    ctx: Arc<Reconciler>,
    namespace: String,
    name: String,
    start: Instant,
) -> Result<Action, Error> {
    let traces: Api<OpenLibertyTrace> = Api::namespaced(ctx.client.clone(), &namespace);
    let result = if trace.metadata.deletion_timestamp.is_some() {
        cleanup_trace(&ctx, &traces, &trace, &namespace).await
    } else {
        match add_finalizer(&traces, trace.as_ref(), TRACE_FINALIZER).await {
            Ok(_) => apply_trace(&ctx, &trace, &namespace).await,
            Err(e) => Err(e),
        }
    };
    metrics::observe_reconciliation_duration(CONTROLLER, start.elapsed().as_secs_f64());

    match result {
        Ok(action) => {
            ctx.reset_backoff(&format!("{CONTROLLER}/{namespace}/{name}"));
            Ok(action)
        }
        Err(e) => {
            if trace.metadata.deletion_timestamp.is_none() {
                let mut status = trace.status.clone().unwrap_or_default();
                set_condition(
                    &mut status.conditions,
                    Condition::new(CONDITION_ENABLED, false, "Error", e.to_string()),
                );
                if let Err(status_error) = update_trace_status(&ctx.client, &trace, &status).await {
                    warn!("Failed to record trace error for {}: {}", name, status_error);
                }
            }
            Err(e)
        }
    }
}

async fn apply_trace(ctx: &Reconciler, trace: &OpenLibertyTrace, namespace: &str) -> Result<Action, Error> {
    let name = trace.name_any();
    let spec = &trace.spec;
    let mut status = trace.status.clone().unwrap_or_default();
    let previous_pod = status
        .operated_resource
        .as_ref()
        .map(|r| r.resource_name.clone());
    let previously_enabled = find_condition(&status.conditions, CONDITION_ENABLED).is_some_and(Condition::is_true);

    let factory = TraceFactory::new(&spec.pod_name, previous_pod.as_deref());
    let lease = lease_shared_resource(
        &ctx.client,
        namespace,
        &name,
        &factory,
        &ctx.assets,
        ctx.config.sublease_eviction,
    )
    .await?;
    if !lease.is_leader() {
        set_condition(
            &mut status.conditions,
            Condition::new(
                CONDITION_ENABLED,
                false,
                "Error",
                format!(
                    "pod {} is already traced by OpenLibertyTrace {}",
                    spec.pod_name,
                    lease.leader()
                ),
            ),
        );
        update_trace_status(&ctx.client, trace, &status).await?;
        return Ok(Action::requeue(Duration::from_secs(ctx.config.resync_secs)));
    }

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
    let pod = pods.get_opt(&spec.pod_name).await?;
    let steps = plan(
        spec,
        previous_pod.as_deref(),
        previously_enabled,
        is_running(pod.as_ref()),
        trace.is_disabled(),
    );

    if let Some(previous) = &steps.remove_from {
        remove_dropin_best_effort(&pods, previous).await;
    }

    let condition = match steps.action {
        TraceAction::PodUnavailable => Condition::new(
            CONDITION_ENABLED,
            false,
            "Error",
            format!("pod {} was not found or is not running", spec.pod_name),
        ),
        TraceAction::Disable { remove } => {
            if remove {
                exec_in_app(&pods, &spec.pod_name, remove_dropin_command()).await?;
                metrics::increment_trace_operations("disable");
                info!("⏹️  Disabled trace on pod {}/{}", namespace, spec.pod_name);
            }
            Condition::new(CONDITION_ENABLED, false, "", "Trace is disabled")
        }
        TraceAction::Enable => {
            let xml = trace_xml(spec, namespace);
            let command = write_dropin_command(&xml, &log_directory(namespace, &spec.pod_name));
            exec_in_app(&pods, &spec.pod_name, command).await?;
            metrics::increment_trace_operations("enable");
            info!("🔍 Enabled trace on pod {}/{}", namespace, spec.pod_name);
            Condition::new(CONDITION_ENABLED, true, "", "Trace is enabled")
        }
    };

    // A new pod is a new transition even when the status is unchanged
    if previous_pod.as_deref() != Some(spec.pod_name.as_str()) {
        status.conditions.retain(|c| c.r#type != CONDITION_ENABLED);
    }
    set_condition(&mut status.conditions, condition);
    status.operated_resource = Some(OperatedResource {
        resource_type: "pod".to_string(),
        resource_name: spec.pod_name.clone(),
    });
    status.observed_generation = trace.metadata.generation;
    update_trace_status(&ctx.client, trace, &status).await?;

    Ok(Action::await_change())
}

async fn cleanup_trace(
    ctx: &Reconciler,
    traces: &Api<OpenLibertyTrace>,
    trace: &OpenLibertyTrace,
    namespace: &str,
) -> Result<Action, Error> {
    let name = trace.name_any();
    if let Some(status) = &trace.status {
        let enabled = find_condition(&status.conditions, CONDITION_ENABLED).is_some_and(Condition::is_true);
        if let (true, Some(operated)) = (enabled, &status.operated_resource) {
            let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
            remove_dropin_best_effort(&pods, &operated.resource_name).await;
        }
    }
    let factory = TraceFactory::new(&trace.spec.pod_name, None);
    let release = async {
        let mut failures = Vec::new();
        record_cleanup(
            &mut failures,
            "release traced pod",
            remove_from_tracker(&ctx.client, namespace, &name, &factory, &ctx.assets).await,
        );
        failures
    };
    finalize(
        &format!("{namespace}/{name}"),
        release,
        remove_finalizer(traces, trace, TRACE_FINALIZER),
    )
    .await?;
    info!("🗑️  Finalized OpenLibertyTrace {}/{}", namespace, name);
    Ok(Action::await_change())
}
