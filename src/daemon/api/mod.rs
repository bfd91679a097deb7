pub mod auth;
pub mod cron;
pub mod helpers;
pub mod live;
pub mod projects;
pub mod scripts;
pub mod services;
pub mod structs;
pub mod system;

use macros_rs::string;
use once_cell::sync::Lazy;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use prometheus::{
    register_gauge, register_histogram, register_histogram_vec, register_int_counter, Gauge,
    Histogram, HistogramVec, IntCounter,
};

use rocket::{
    catch, catchers,
    fs::FileServer,
    get,
    http::Status,
    request::{FromRequest, Outcome, Request},
    routes,
    serde::json::Json,
};

use srvman::config;
use structs::ErrorMessage;

pub static HTTP_COUNTER: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("http_requests_total", "Number of HTTP requests made.").unwrap());
pub static DAEMON_START_TIME: Lazy<Gauge> =
    Lazy::new(|| register_gauge!("daemon_start_time_millis", "The start time of the daemon.").unwrap());
pub static DAEMON_MEM_USAGE: Lazy<Histogram> =
    Lazy::new(|| register_histogram!("daemon_memory_usage", "The memory usage graph of the daemon.").unwrap());
pub static DAEMON_CPU_PERCENTAGE: Lazy<Histogram> =
    Lazy::new(|| register_histogram!("daemon_cpu_percentage", "The cpu usage graph of the daemon.").unwrap());
pub static HTTP_REQ_HISTOGRAM: Lazy<HistogramVec> =
    Lazy::new(|| register_histogram_vec!("http_request_duration_seconds", "The HTTP request latencies in seconds.", &["handler"]).unwrap());

/// Authenticated caller. `srvman::auth::verify` resolves both session tokens
/// from `/auth/login` and the static `daemon.web.token` from the config. The
/// query fallback exists for EventSource clients that cannot set headers.
pub(crate) struct Token {
    pub(crate) identity: srvman::auth::Identity,
    pub(crate) raw: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Token {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let header = request
            .headers()
            .get_one("Authorization")
            .and_then(|value| value.strip_prefix("Bearer "));
        let query = request.query_value::<&str>("token").and_then(Result::ok);

        let raw = match header.or(query) {
            Some(token) => token.to_string(),
            None => return Outcome::Error((Status::Unauthorized, ())),
        };

        match srvman::auth::verify(&raw) {
            Some(identity) => Outcome::Success(Token { identity, raw }),
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

#[catch(401)]
pub fn unauthorized_catcher() -> Json<ErrorMessage> {
    Json(ErrorMessage { code: 401, message: string!("Unauthorized") })
}

#[catch(404)]
pub fn not_found_catcher() -> Json<ErrorMessage> {
    Json(ErrorMessage { code: 404, message: string!("Route not found") })
}

#[catch(500)]
pub fn internal_error_catcher() -> Json<ErrorMessage> {
    Json(ErrorMessage { code: 500, message: string!("Internal server error") })
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        scripts::scripts_handler,
        scripts::script_create_handler,
        scripts::script_info_handler,
        scripts::script_update_handler,
        scripts::script_remove_handler,
        scripts::script_run_handler,
        scripts::script_stop_handler,
        scripts::script_status_handler,
        scripts::script_log_handler,
        scripts::script_log_flush_handler,
        scripts::script_content_handler,
        scripts::script_save_handler,
        projects::projects_handler,
        projects::project_create_handler,
        projects::project_info_handler,
        projects::project_update_handler,
        projects::project_remove_handler,
        projects::project_start_handler,
        projects::project_stop_handler,
        projects::project_build_handler,
        projects::project_status_handler,
        projects::project_probe_handler,
        cron::tasks_handler,
        cron::task_create_handler,
        cron::task_info_handler,
        cron::task_update_handler,
        cron::task_remove_handler,
        cron::task_enable_handler,
        cron::task_disable_handler,
        cron::task_run_handler,
        services::services_handler,
        services::service_info_handler,
        services::service_action_handler,
        services::service_logs_handler,
        services::service_unit_handler,
        services::service_unit_save_handler,
        services::service_create_handler,
        services::service_remove_handler,
        services::service_from_script_handler,
        services::service_from_project_handler,
        services::service_hide_handler,
        services::service_unhide_handler,
        system::system_info_handler,
        system::system_disks_handler,
        system::system_memory_handler,
        system::system_cpu_handler,
        system::system_processes_handler,
        system::system_tree_handler,
        system::file_read_handler,
        system::file_save_handler,
        system::executables_handler,
        system::execute_handler,
        auth::login_handler,
        auth::verify_handler,
        auth::logout_handler,
        auth::change_password_handler,
        auth::users_handler,
        auth::user_add_handler,
        auth::user_remove_handler,
        live::health_handler,
        live::prometheus_handler,
        live::metrics_handler,
    ),
    components(schemas(
        structs::ErrorMessage,
        structs::ActionResponse,
        structs::LogResponse,
        structs::ContentBody,
        scripts::CreateScriptBody,
        scripts::ScriptContent,
        projects::CreateProjectBody,
        projects::ProjectState,
        cron::CreateTaskBody,
        services::ActionBody,
        services::UnitCreated,
        services::FromScriptBody,
        services::FromProjectBody,
        services::UnitContent,
        system::FileContent,
        system::WriteFileBody,
        system::ExecuteBody,
        auth::LoginBody,
        auth::LoginResponse,
        auth::PasswordBody,
        auth::CreateUserBody,
        live::HealthResponse,
        live::MetricsRoot,
        live::Raw,
        live::Version,
        live::Daemon,
        live::Stats,
        srvman::store::scripts::Script,
        srvman::store::scripts::ScriptKind,
        srvman::store::scripts::ScriptUpdate,
        srvman::store::scripts::RunStatus,
        srvman::store::projects::Project,
        srvman::store::projects::ProjectScripts,
        srvman::store::projects::ProjectStatus,
        srvman::store::projects::ProjectUpdate,
        srvman::store::tasks::Task,
        srvman::store::tasks::TaskUpdate,
        srvman::store::users::Role,
        srvman::auth::Identity,
        srvman::auth::UserView,
        srvman::process::Started,
        srvman::process::Status,
        srvman::process::CommandOutput,
        srvman::service::Unit,
        srvman::service::UnitDetail,
        srvman::service::UnitSpec,
        srvman::service::UnitStatus,
        srvman::system::SystemInfo,
        srvman::system::DiskUsage,
        srvman::system::MemoryUsage,
        srvman::system::CpuUsage,
        srvman::system::ProcessInfo,
        srvman::system::TreeNode,
        srvman::system::LeafKind,
        srvman::system::Executable,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Scripts", description = "Registered scripts and their processes"),
        (name = "Projects", description = "Multi-script projects"),
        (name = "Cron", description = "Scheduled tasks"),
        (name = "Services", description = "Systemd service units"),
        (name = "System", description = "Host inspection and files"),
        (name = "Auth", description = "Sessions and users"),
        (name = "Daemon", description = "Daemon internals")
    )
)]
struct ApiDoc;

#[get("/docs/openapi.json")]
pub fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub async fn start(ui_enabled: bool) {
    let web = config::read().daemon.web;

    let figment = rocket::Config::figment()
        .merge(("address", web.address.clone()))
        .merge(("port", web.port))
        .merge(("ident", "srvman"))
        .merge(("cli_colors", false))
        .merge(("log_level", "critical"));

    let mut server = rocket::custom(figment)
        .mount(
            "/",
            routes![
                openapi_spec,
                scripts::scripts_handler,
                scripts::script_create_handler,
                scripts::script_info_handler,
                scripts::script_update_handler,
                scripts::script_remove_handler,
                scripts::script_run_handler,
                scripts::script_stop_handler,
                scripts::script_status_handler,
                scripts::script_log_handler,
                scripts::script_log_flush_handler,
                scripts::script_content_handler,
                scripts::script_save_handler,
                projects::projects_handler,
                projects::project_create_handler,
                projects::project_info_handler,
                projects::project_update_handler,
                projects::project_remove_handler,
                projects::project_start_handler,
                projects::project_stop_handler,
                projects::project_build_handler,
                projects::project_status_handler,
                projects::project_probe_handler,
                cron::tasks_handler,
                cron::task_create_handler,
                cron::task_info_handler,
                cron::task_update_handler,
                cron::task_remove_handler,
                cron::task_enable_handler,
                cron::task_disable_handler,
                cron::task_run_handler,
                services::services_handler,
                services::service_info_handler,
                services::service_action_handler,
                services::service_logs_handler,
                services::service_unit_handler,
                services::service_unit_save_handler,
                services::service_create_handler,
                services::service_remove_handler,
                services::service_from_script_handler,
                services::service_from_project_handler,
                services::service_hide_handler,
                services::service_unhide_handler,
                system::system_info_handler,
                system::system_disks_handler,
                system::system_memory_handler,
                system::system_cpu_handler,
                system::system_processes_handler,
                system::system_tree_handler,
                system::file_read_handler,
                system::file_save_handler,
                system::executables_handler,
                system::execute_handler,
                auth::login_handler,
                auth::verify_handler,
                auth::logout_handler,
                auth::change_password_handler,
                auth::users_handler,
                auth::user_add_handler,
                auth::user_remove_handler,
                live::health_handler,
                live::prometheus_handler,
                live::metrics_handler,
                live::live_status_handler,
            ],
        )
        .register("/", catchers![unauthorized_catcher, not_found_catcher, internal_error_catcher]);

    if ui_enabled {
        match web.static_dir {
            // rank above the api routes so /scripts et al stay reachable
            Some(dir) => server = server.mount("/ui", FileServer::from(dir).rank(20)),
            None => log!("[daemon] webui enabled without static_dir", "serving" => "api only"),
        }
    }

    if let Err(err) = server.launch().await {
        log!("[daemon] api server failed to launch", "error" => err);
    }
}
