use chrono::{DateTime, Utc};
use global_placeholders::global;
use macros_rs::{string, ternary};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use utoipa::ToSchema;

use rocket::{
    get,
    response::stream::{Event, EventStream},
    serde::{json::Json, Deserialize, Serialize},
};

use std::{thread::sleep, time::Duration};

use super::{structs::ErrorMessage, Token, HTTP_COUNTER, HTTP_REQ_HISTOGRAM};
use crate::daemon::pid;

use srvman::{
    helpers, process,
    store::{projects, scripts, tasks},
};

#[derive(Serialize, ToSchema)]
pub(crate) struct HealthResponse {
    #[schema(example = "ok")]
    status: String,
    #[schema(example = "v0.1.0")]
    version: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub(crate) struct MetricsRoot {
    pub(crate) raw: Raw,
    pub(crate) version: Version,
    pub(crate) daemon: Daemon,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub(crate) struct Raw {
    pub(crate) memory_usage: Option<u64>,
    pub(crate) cpu_percent: Option<f32>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub(crate) struct Version {
    #[schema(example = "v1.0.0")]
    pub(crate) pkg: String,
    pub(crate) hash: Option<String>,
    #[schema(example = "2000-01-01")]
    pub(crate) build_date: String,
    #[schema(example = "release")]
    pub(crate) target: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub(crate) struct Daemon {
    pub(crate) pid: Option<i32>,
    #[schema(example = true)]
    pub(crate) running: bool,
    pub(crate) uptime: String,
    pub(crate) scripts_running: usize,
    pub(crate) tasks_scheduled: usize,
    #[schema(example = "default")]
    pub(crate) daemon_type: String,
    pub(crate) stats: Stats,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub(crate) struct Stats {
    pub(crate) memory_usage: String,
    pub(crate) cpu_percent: String,
}

#[derive(Serialize)]
struct LiveSnapshot {
    time: DateTime<Utc>,
    scripts: Vec<LiveEntry>,
    projects: Vec<LiveEntry>,
}

#[derive(Serialize)]
struct LiveEntry {
    id: String,
    running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<i32>,
}

// One cheap pass over the pid files, no OS probes beyond kill(pid, 0)
fn live_entry(id: String, pid_id: &str) -> LiveEntry {
    let pid = process::pid::read(pid_id).filter(|pid| process::unix::alive(*pid));
    LiveEntry { running: pid.is_some(), pid, id }
}

fn snapshot() -> LiveSnapshot {
    let scripts = scripts::list()
        .unwrap_or_default()
        .into_iter()
        .map(|script| {
            let pid_id = script.id.clone();
            live_entry(script.id, &pid_id)
        })
        .collect();

    let projects = projects::list()
        .unwrap_or_default()
        .into_iter()
        .map(|project| {
            let pid_id = format!("project-{}", project.id);
            live_entry(project.id, &pid_id)
        })
        .collect();

    LiveSnapshot { time: Utc::now(), scripts, projects }
}

pub async fn get_metrics() -> MetricsRoot {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["metrics"]).start_timer();

    let mut daemon_pid: Option<i32> = None;
    let mut cpu_percent: Option<f32> = None;
    let mut uptime: Option<DateTime<Utc>> = None;
    let mut memory_usage: Option<u64> = None;

    HTTP_COUNTER.inc();
    if pid::exists() {
        if let Ok(process_id) = pid::read() {
            if let Some(metrics) = process::unix::metrics(process_id) {
                daemon_pid = Some(process_id);
                uptime = pid::uptime().ok();
                memory_usage = Some(metrics.memory);
                cpu_percent = Some(metrics.cpu);
            }
        }
    }

    let memory_usage_fmt = match memory_usage {
        Some(usage) => helpers::format_memory(usage),
        None => string!("0b"),
    };

    let cpu_percent_fmt = match cpu_percent {
        Some(percent) => format!("{:.2}%", percent),
        None => string!("0.00%"),
    };

    let uptime_fmt = match uptime {
        Some(uptime) => helpers::format_duration(uptime),
        None => string!("none"),
    };

    let scripts_running = scripts::list().unwrap_or_default().iter().filter(|script| process::alive(&script.id)).count();
    let tasks_scheduled = tasks::list().unwrap_or_default().iter().filter(|task| task.active).count();

    timer.observe_duration();
    MetricsRoot {
        raw: Raw { memory_usage, cpu_percent },
        version: Version {
            target: env!("PROFILE").into(),
            build_date: env!("BUILD_DATE").into(),
            pkg: format!("v{}", env!("CARGO_PKG_VERSION")),
            hash: ternary!(env!("GIT_HASH_FULL") == "unknown", None, Some(env!("GIT_HASH_FULL").into())),
        },
        daemon: Daemon {
            pid: daemon_pid,
            uptime: uptime_fmt,
            running: pid::exists(),
            scripts_running,
            tasks_scheduled,
            daemon_type: global!("srvman.daemon.kind"),
            stats: Stats { memory_usage: memory_usage_fmt, cpu_percent: cpu_percent_fmt },
        },
    }
}

#[get("/health")]
#[utoipa::path(get, tag = "Daemon", path = "/health",
    responses((status = 200, description = "Liveness probe, no auth required", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: string!("ok"), version: format!("v{}", env!("CARGO_PKG_VERSION")) })
}

#[get("/daemon/prometheus")]
#[utoipa::path(get, tag = "Daemon", path = "/daemon/prometheus", security((), ("api_key" = [])),
    responses(
        (
            description = "Get prometheus metrics", body = String, status = 200,
            example = json!("# HELP daemon_cpu_percentage The cpu usage graph of the daemon.\n# TYPE daemon_cpu_percentage histogram\ndaemon_cpu_percentage_bucket{le=\"0.005\"} 0"),
        ),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn prometheus_handler(_t: Token) -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::<u8>::new();
    let metric_families = prometheus::gather();

    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer.clone()).unwrap()
}

#[get("/daemon/metrics")]
#[utoipa::path(get, tag = "Daemon", path = "/daemon/metrics", security((), ("api_key" = [])),
    responses(
        (status = 200, description = "Get daemon metrics", body = MetricsRoot),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn metrics_handler(_t: Token) -> Json<MetricsRoot> {
    Json(get_metrics().await)
}

#[get("/live/status")]
pub async fn live_status_handler(_t: Token) -> EventStream![] {
    EventStream! {
        loop {
            yield Event::data(serde_json::to_string(&snapshot()).unwrap());
            sleep(Duration::from_millis(1000));
        }
    }
}
