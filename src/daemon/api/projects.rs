use macros_rs::string;
use serde_json::json;
use utoipa::ToSchema;

use chrono::{DateTime, Utc};

use rocket::{
    delete, get,
    http::Status,
    post, put,
    serde::{json::Json, Deserialize, Serialize},
};

use super::{
    helpers::{generic_error, GenericError},
    structs::{ActionResponse, ErrorMessage},
    Token, HTTP_COUNTER, HTTP_REQ_HISTOGRAM,
};

use srvman::{
    helpers,
    process::{self, CommandOutput, Started, Status as ProcessStatus},
    store::projects::{self, Project, ProjectScripts, ProjectStatus, ProjectUpdate},
};

#[derive(Deserialize, ToSchema)]
pub(crate) struct CreateProjectBody {
    /// Derived from the name when omitted
    #[schema(example = "webapp")]
    id: Option<String>,
    #[schema(example = "Web App")]
    name: String,
    description: Option<String>,
    #[schema(example = "/srv/webapp")]
    path: String,
    #[serde(default)]
    autostart: bool,
    #[serde(default)]
    start_order: u32,
    scripts: ProjectScripts,
}

/// Recorded lifecycle view; the live probe lives at `/projects/<id>/info`.
#[derive(Serialize, ToSchema)]
pub(crate) struct ProjectState {
    #[schema(example = "webapp")]
    id: String,
    status: ProjectStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_stop_time: Option<DateTime<Utc>>,
}

fn missing(id: &str) -> GenericError {
    generic_error(Status::NotFound, format!("Project '{id}' was not found"))
}

#[get("/projects")]
#[utoipa::path(get, tag = "Projects", path = "/projects", security((), ("api_key" = [])),
    responses(
        (status = 200, description = "List all registered projects", body = Vec<Project>),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn projects_handler(_t: Token) -> Result<Json<Vec<Project>>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["projects"]).start_timer();
    HTTP_COUNTER.inc();

    let list = projects::list()?;

    timer.observe_duration();
    Ok(Json(list))
}

#[post("/projects", format = "json", data = "<body>")]
#[utoipa::path(post, tag = "Projects", path = "/projects", request_body = CreateProjectBody,
    security((), ("api_key" = [])),
    responses(
        (status = 200, description = "Register a new project", body = Project),
        (status = BAD_REQUEST, description = "Unusable id", body = ErrorMessage),
        (status = CONFLICT, description = "A project with this id already exists", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn project_create_handler(body: Json<CreateProjectBody>, _t: Token) -> Result<Json<Project>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["project_create"]).start_timer();
    HTTP_COUNTER.inc();
    let body = body.into_inner();

    let id = match body.id {
        Some(id) => id,
        None => super::scripts::slug(&body.name),
    };

    if !helpers::valid_id(&id) {
        return Err(generic_error(Status::BadRequest, format!("'{id}' cannot be used as an id")));
    }

    let project = Project {
        id,
        name: body.name,
        description: body.description,
        path: body.path,
        autostart: body.autostart,
        start_order: body.start_order,
        status: ProjectStatus::Unknown,
        last_start_time: None,
        last_stop_time: None,
        scripts: body.scripts,
    };

    let created = projects::create(project).map_err(|err| generic_error(Status::Conflict, err.to_string()))?;

    timer.observe_duration();
    Ok(Json(created))
}

#[get("/projects/<id>")]
#[utoipa::path(get, tag = "Projects", path = "/projects/{id}", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Project id", example = "webapp")),
    responses(
        (status = 200, description = "Get a single project", body = Project),
        (status = NOT_FOUND, description = "Project was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn project_info_handler(id: String, _t: Token) -> Result<Json<Project>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["project_info"]).start_timer();
    HTTP_COUNTER.inc();

    let project = projects::get(&id)?.ok_or_else(|| missing(&id))?;

    timer.observe_duration();
    Ok(Json(project))
}

#[put("/projects/<id>", format = "json", data = "<body>")]
#[utoipa::path(put, tag = "Projects", path = "/projects/{id}", request_body = ProjectUpdate,
    security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Project id", example = "webapp")),
    responses(
        (status = 200, description = "Update project fields, id is immutable", body = Project),
        (status = NOT_FOUND, description = "Project was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn project_update_handler(id: String, body: Json<ProjectUpdate>, _t: Token) -> Result<Json<Project>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["project_update"]).start_timer();
    HTTP_COUNTER.inc();

    if projects::get(&id)?.is_none() {
        return Err(missing(&id));
    }

    let updated = projects::update(&id, body.into_inner())?;

    timer.observe_duration();
    Ok(Json(updated))
}

#[delete("/projects/<id>")]
#[utoipa::path(delete, tag = "Projects", path = "/projects/{id}", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Project id", example = "webapp")),
    responses(
        (
            status = 200, description = "Remove a project, stopping it first if running", body = ActionResponse,
            example = json!({"action": "remove", "done": true})
        ),
        (status = NOT_FOUND, description = "Project was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn project_remove_handler(id: String, _t: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["project_remove"]).start_timer();
    HTTP_COUNTER.inc();

    if projects::get(&id)?.is_none() {
        return Err(missing(&id));
    }

    match process::stop_project(&id) {
        Ok(()) | Err(process::Error::NotRunning { .. }) => {}
        Err(err) => return Err(err.into()),
    }
    projects::delete(&id)?;

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: string!("remove") }))
}

#[post("/projects/<id>/start")]
#[utoipa::path(post, tag = "Projects", path = "/projects/{id}/start", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Project id", example = "webapp")),
    responses(
        (status = 200, description = "Run the start script detached in the project directory", body = Started),
        (status = NOT_FOUND, description = "Project was not found", body = ErrorMessage),
        (status = CONFLICT, description = "Project is already running", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn project_start_handler(id: String, _t: Token) -> Result<Json<Started>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["project_start"]).start_timer();
    HTTP_COUNTER.inc();

    let started = process::start_project(&id)?;

    timer.observe_duration();
    Ok(Json(started))
}

#[post("/projects/<id>/stop")]
#[utoipa::path(post, tag = "Projects", path = "/projects/{id}/stop", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Project id", example = "webapp")),
    responses(
        (
            status = 200, description = "Stop the project, stop script first when present", body = ActionResponse,
            example = json!({"action": "stop", "done": true})
        ),
        (status = BAD_REQUEST, description = "Project is not running", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn project_stop_handler(id: String, _t: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["project_stop"]).start_timer();
    HTTP_COUNTER.inc();

    process::stop_project(&id)?;

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: string!("stop") }))
}

#[post("/projects/<id>/build")]
#[utoipa::path(post, tag = "Projects", path = "/projects/{id}/build", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Project id", example = "webapp")),
    responses(
        (status = 200, description = "Run the build script synchronously and capture its output", body = CommandOutput),
        (status = NOT_FOUND, description = "Project or its build script was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn project_build_handler(id: String, _t: Token) -> Result<Json<CommandOutput>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["project_build"]).start_timer();
    HTTP_COUNTER.inc();

    let output = process::build_project(&id)?;

    timer.observe_duration();
    Ok(Json(output))
}

#[get("/projects/<id>/status")]
#[utoipa::path(get, tag = "Projects", path = "/projects/{id}/status", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Project id", example = "webapp")),
    responses(
        (
            status = 200, description = "Recorded lifecycle state of the project", body = ProjectState,
            example = json!({"id": "webapp", "status": "running", "last_start_time": "2024-05-01T10:00:00Z"})
        ),
        (status = NOT_FOUND, description = "Project was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn project_status_handler(id: String, _t: Token) -> Result<Json<ProjectState>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["project_status"]).start_timer();
    HTTP_COUNTER.inc();

    let project = projects::get(&id)?.ok_or_else(|| missing(&id))?;
    let state = ProjectState {
        id: project.id,
        status: project.status,
        last_start_time: project.last_start_time,
        last_stop_time: project.last_stop_time,
    };

    timer.observe_duration();
    Ok(Json(state))
}

#[get("/projects/<id>/info")]
#[utoipa::path(get, tag = "Projects", path = "/projects/{id}/info", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Project id", example = "webapp")),
    responses(
        (
            status = 200, description = "Live probe of the project's start script, metric fields absent when stopped",
            body = ProcessStatus
        ),
        (status = NOT_FOUND, description = "Project was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn project_probe_handler(id: String, _t: Token) -> Result<Json<ProcessStatus>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["project_probe"]).start_timer();
    HTTP_COUNTER.inc();

    if projects::get(&id)?.is_none() {
        return Err(missing(&id));
    }

    let status = process::project_probe(&id);

    timer.observe_duration();
    Ok(Json(status))
}
