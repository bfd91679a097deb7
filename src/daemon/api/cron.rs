use macros_rs::string;
use serde_json::json;
use utoipa::ToSchema;

use rocket::{
    delete, get,
    http::Status,
    post, put,
    serde::{json::Json, Deserialize},
};

use super::{
    helpers::{generic_error, GenericError},
    structs::{ActionResponse, ErrorMessage},
    Token, HTTP_COUNTER, HTTP_REQ_HISTOGRAM,
};

use srvman::{
    helpers,
    process::CommandOutput,
    scheduler,
    store::tasks::{self, Task, TaskUpdate},
};

#[derive(Deserialize, ToSchema)]
pub(crate) struct CreateTaskBody {
    /// Derived from the name when omitted
    #[schema(example = "nightly-backup")]
    id: Option<String>,
    #[schema(example = "Nightly backup")]
    name: String,
    /// 5-field cron (minute first) or 6 fields with seconds
    #[schema(example = "0 3 * * *")]
    schedule: String,
    #[schema(example = "tar czf /backups/home.tgz /home")]
    command: String,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn default_active() -> bool {
    true
}

fn missing(id: &str) -> GenericError {
    generic_error(Status::NotFound, format!("Task '{id}' was not found"))
}

#[get("/cron")]
#[utoipa::path(get, tag = "Cron", path = "/cron", security((), ("api_key" = [])),
    responses(
        (status = 200, description = "List all cron tasks", body = Vec<Task>),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn tasks_handler(_t: Token) -> Result<Json<Vec<Task>>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["tasks"]).start_timer();
    HTTP_COUNTER.inc();

    let list = tasks::list()?;

    timer.observe_duration();
    Ok(Json(list))
}

#[post("/cron", format = "json", data = "<body>")]
#[utoipa::path(post, tag = "Cron", path = "/cron", request_body = CreateTaskBody,
    security((), ("api_key" = [])),
    responses(
        (status = 200, description = "Create a cron task, scheduling it when active", body = Task),
        (status = BAD_REQUEST, description = "Unusable id or invalid cron expression", body = ErrorMessage),
        (status = CONFLICT, description = "A task with this id already exists", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn task_create_handler(body: Json<CreateTaskBody>, _t: Token) -> Result<Json<Task>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["task_create"]).start_timer();
    HTTP_COUNTER.inc();
    let body = body.into_inner();

    let id = match body.id {
        Some(id) => id,
        None => super::scripts::slug(&body.name),
    };

    if !helpers::valid_id(&id) {
        return Err(generic_error(Status::BadRequest, format!("'{id}' cannot be used as an id")));
    }

    let task = Task {
        id,
        name: body.name,
        schedule: body.schedule,
        command: body.command,
        active: body.active,
        kind: body.kind,
        last_run: None,
        next_run: None,
        last_run_output: None,
    };

    let created = scheduler::create(task).map_err(|err| match err {
        scheduler::Error::BadSchedule { .. } => generic_error(Status::BadRequest, err.to_string()),
        other => generic_error(Status::Conflict, other.to_string()),
    })?;

    timer.observe_duration();
    Ok(Json(created))
}

#[get("/cron/<id>")]
#[utoipa::path(get, tag = "Cron", path = "/cron/{id}", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Task id", example = "nightly-backup")),
    responses(
        (status = 200, description = "Get a single cron task", body = Task),
        (status = NOT_FOUND, description = "Task was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn task_info_handler(id: String, _t: Token) -> Result<Json<Task>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["task_info"]).start_timer();
    HTTP_COUNTER.inc();

    let task = tasks::get(&id)?.ok_or_else(|| missing(&id))?;

    timer.observe_duration();
    Ok(Json(task))
}

#[put("/cron/<id>", format = "json", data = "<body>")]
#[utoipa::path(put, tag = "Cron", path = "/cron/{id}", request_body = TaskUpdate,
    security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Task id", example = "nightly-backup")),
    responses(
        (status = 200, description = "Update a task, rescheduling to match", body = Task),
        (status = BAD_REQUEST, description = "Invalid cron expression", body = ErrorMessage),
        (status = NOT_FOUND, description = "Task was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn task_update_handler(id: String, body: Json<TaskUpdate>, _t: Token) -> Result<Json<Task>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["task_update"]).start_timer();
    HTTP_COUNTER.inc();

    let updated = scheduler::apply_update(&id, body.into_inner())?;

    timer.observe_duration();
    Ok(Json(updated))
}

#[delete("/cron/<id>")]
#[utoipa::path(delete, tag = "Cron", path = "/cron/{id}", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Task id", example = "nightly-backup")),
    responses(
        (
            status = 200, description = "Remove a task and cancel its schedule", body = ActionResponse,
            example = json!({"action": "remove", "done": true})
        ),
        (status = NOT_FOUND, description = "Task was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn task_remove_handler(id: String, _t: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["task_remove"]).start_timer();
    HTTP_COUNTER.inc();

    if tasks::get(&id)?.is_none() {
        return Err(missing(&id));
    }
    scheduler::remove(&id)?;

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: string!("remove") }))
}

#[post("/cron/<id>/enable")]
#[utoipa::path(post, tag = "Cron", path = "/cron/{id}/enable", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Task id", example = "nightly-backup")),
    responses(
        (status = 200, description = "Activate the task and schedule its next firing", body = Task),
        (status = NOT_FOUND, description = "Task was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn task_enable_handler(id: String, _t: Token) -> Result<Json<Task>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["task_enable"]).start_timer();
    HTTP_COUNTER.inc();

    let task = scheduler::enable(&id)?;

    timer.observe_duration();
    Ok(Json(task))
}

#[post("/cron/<id>/disable")]
#[utoipa::path(post, tag = "Cron", path = "/cron/{id}/disable", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Task id", example = "nightly-backup")),
    responses(
        (status = 200, description = "Deactivate the task and cancel its schedule", body = Task),
        (status = NOT_FOUND, description = "Task was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn task_disable_handler(id: String, _t: Token) -> Result<Json<Task>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["task_disable"]).start_timer();
    HTTP_COUNTER.inc();

    let task = scheduler::disable(&id)?;

    timer.observe_duration();
    Ok(Json(task))
}

#[post("/cron/<id>/run")]
#[utoipa::path(post, tag = "Cron", path = "/cron/{id}/run", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Task id", example = "nightly-backup")),
    responses(
        (status = 200, description = "Fire the task immediately and capture its output", body = CommandOutput),
        (status = NOT_FOUND, description = "Task was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn task_run_handler(id: String, _t: Token) -> Result<Json<CommandOutput>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["task_run"]).start_timer();
    HTTP_COUNTER.inc();

    let output = scheduler::run_now(&id)?;

    timer.observe_duration();
    Ok(Json(output))
}
