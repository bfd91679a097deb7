use macros_rs::string;
use serde_json::json;
use utoipa::ToSchema;

use rocket::{
    delete, get,
    http::Status,
    post, put,
    serde::{json::Json, Deserialize, Serialize},
};

use super::{
    helpers::{generic_error, GenericError},
    structs::{ActionResponse, ContentBody, ErrorMessage, LogResponse},
    Token, HTTP_COUNTER, HTTP_REQ_HISTOGRAM,
};

use srvman::service::{self, Unit, UnitDetail, UnitSpec};

#[derive(Serialize, Deserialize, ToSchema)]
pub(crate) struct ActionBody {
    #[schema(example = "restart")]
    method: String,
}

#[derive(Serialize, ToSchema)]
pub(crate) struct UnitCreated {
    #[schema(example = "backup-daily")]
    id: String,
}

#[derive(Deserialize, ToSchema)]
pub(crate) struct FromScriptBody {
    #[schema(example = "backup-daily")]
    script_id: String,
}

#[derive(Deserialize, ToSchema)]
pub(crate) struct FromProjectBody {
    #[schema(example = "webapp")]
    project_id: String,
}

#[derive(Serialize, ToSchema)]
pub(crate) struct UnitContent {
    #[schema(example = "nginx")]
    id: String,
    content: String,
}

#[get("/services?<hidden>&<sort>&<order>")]
#[utoipa::path(get, tag = "Services", path = "/services", security((), ("api_key" = [])),
    params(
        ("hidden" = Option<bool>, Query, description = "Include units hidden from the dashboard"),
        ("sort" = Option<String>, Query, description = "Sort key: name, status or enabled"),
        ("order" = Option<String>, Query, description = "asc or desc")
    ),
    responses(
        (status = 200, description = "List systemd service units", body = Vec<Unit>),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn services_handler(hidden: Option<bool>, sort: Option<String>, order: Option<String>, _t: Token) -> Result<Json<Vec<Unit>>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["services"]).start_timer();
    HTTP_COUNTER.inc();

    let units = service::list(hidden.unwrap_or(false), sort.as_deref().unwrap_or("name"), order.as_deref().unwrap_or("asc"))?;

    timer.observe_duration();
    Ok(Json(units))
}

#[get("/services/<id>")]
#[utoipa::path(get, tag = "Services", path = "/services/{id}", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Unit name, .service suffix optional", example = "nginx")),
    responses(
        (status = 200, description = "Parsed status of a single unit", body = UnitDetail),
        (status = NOT_FOUND, description = "Unit was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn service_info_handler(id: String, _t: Token) -> Result<Json<UnitDetail>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["service_info"]).start_timer();
    HTTP_COUNTER.inc();

    let detail = service::detail(&id)?;

    timer.observe_duration();
    Ok(Json(detail))
}

#[post("/services/<id>/action", format = "json", data = "<body>")]
#[utoipa::path(post, tag = "Services", path = "/services/{id}/action", request_body = ActionBody,
    security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Unit name", example = "nginx")),
    responses(
        (
            status = 200, description = "Run a systemctl verb against the unit", body = ActionResponse,
            example = json!({"action": "restart", "done": true})
        ),
        (status = BAD_REQUEST, description = "Unknown action", body = ErrorMessage),
        (status = NOT_FOUND, description = "Unit was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn service_action_handler(id: String, body: Json<ActionBody>, _t: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["service_action"]).start_timer();
    HTTP_COUNTER.inc();

    match body.method.as_str() {
        "start" => service::start(&id)?,
        "stop" => service::stop(&id)?,
        "restart" => service::restart(&id)?,
        "reload" => service::reload(&id)?,
        "enable" => service::enable(&id)?,
        "disable" => service::disable(&id)?,
        other => return Err(generic_error(Status::BadRequest, format!("'{other}' is not a valid action"))),
    }

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: body.method.clone() }))
}

#[get("/services/<id>/logs?<lines>")]
#[utoipa::path(get, tag = "Services", path = "/services/{id}/logs", security((), ("api_key" = [])),
    params(
        ("id" = String, Path, description = "Unit name", example = "nginx"),
        ("lines" = Option<usize>, Query, description = "Journal tail length, defaults to 50")
    ),
    responses(
        (status = 200, description = "Tail of the unit journal", body = LogResponse),
        (status = NOT_FOUND, description = "Unit was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn service_logs_handler(id: String, lines: Option<usize>, _t: Token) -> Result<Json<LogResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["service_logs"]).start_timer();
    HTTP_COUNTER.inc();

    let raw = service::logs(&id, lines.unwrap_or(50))?;
    let logs = raw.lines().map(String::from).collect();

    timer.observe_duration();
    Ok(Json(LogResponse { logs }))
}

#[get("/services/<id>/unit")]
#[utoipa::path(get, tag = "Services", path = "/services/{id}/unit", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Unit name", example = "nginx")),
    responses(
        (status = 200, description = "Read the unit file", body = UnitContent),
        (status = NOT_FOUND, description = "Unit was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn service_unit_handler(id: String, _t: Token) -> Result<Json<UnitContent>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["service_unit"]).start_timer();
    HTTP_COUNTER.inc();

    let content = service::unit_content(&id)?;

    timer.observe_duration();
    Ok(Json(UnitContent { id, content }))
}

#[put("/services/<id>/unit", format = "json", data = "<body>")]
#[utoipa::path(put, tag = "Services", path = "/services/{id}/unit", request_body = ContentBody,
    security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Unit name", example = "nginx")),
    responses(
        (
            status = 200, description = "Overwrite the unit file and reload the systemd daemon", body = ActionResponse,
            example = json!({"action": "save", "done": true})
        ),
        (status = NOT_FOUND, description = "Unit was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn service_unit_save_handler(id: String, body: Json<ContentBody>, _t: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["service_unit_save"]).start_timer();
    HTTP_COUNTER.inc();

    service::write_unit_content(&id, &body.content)?;

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: string!("save") }))
}

#[post("/services", format = "json", data = "<body>")]
#[utoipa::path(post, tag = "Services", path = "/services", request_body = UnitSpec,
    security((), ("api_key" = [])),
    responses(
        (status = 200, description = "Generate a unit file and enable it", body = UnitCreated),
        (status = BAD_REQUEST, description = "Spec is missing required fields", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn service_create_handler(body: Json<UnitSpec>, _t: Token) -> Result<Json<UnitCreated>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["service_create"]).start_timer();
    HTTP_COUNTER.inc();

    let id = service::create(body.into_inner())?;

    timer.observe_duration();
    Ok(Json(UnitCreated { id }))
}

#[delete("/services/<id>")]
#[utoipa::path(delete, tag = "Services", path = "/services/{id}", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Unit name", example = "backup-daily")),
    responses(
        (
            status = 200, description = "Stop, disable and delete a generated unit", body = ActionResponse,
            example = json!({"action": "remove", "done": true})
        ),
        (status = NOT_FOUND, description = "Unit was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn service_remove_handler(id: String, _t: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["service_remove"]).start_timer();
    HTTP_COUNTER.inc();

    service::remove(&id)?;

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: string!("remove") }))
}

#[post("/services/from-script", format = "json", data = "<body>")]
#[utoipa::path(post, tag = "Services", path = "/services/from-script", request_body = FromScriptBody,
    security((), ("api_key" = [])),
    responses(
        (status = 200, description = "Generate a unit wrapping a registered script", body = UnitCreated),
        (status = NOT_FOUND, description = "Script was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn service_from_script_handler(body: Json<FromScriptBody>, _t: Token) -> Result<Json<UnitCreated>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["service_from_script"]).start_timer();
    HTTP_COUNTER.inc();

    let id = service::from_script(&body.script_id)?;

    timer.observe_duration();
    Ok(Json(UnitCreated { id }))
}

#[post("/services/from-project", format = "json", data = "<body>")]
#[utoipa::path(post, tag = "Services", path = "/services/from-project", request_body = FromProjectBody,
    security((), ("api_key" = [])),
    responses(
        (status = 200, description = "Generate a unit wrapping a registered project", body = UnitCreated),
        (status = NOT_FOUND, description = "Project was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn service_from_project_handler(body: Json<FromProjectBody>, _t: Token) -> Result<Json<UnitCreated>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["service_from_project"]).start_timer();
    HTTP_COUNTER.inc();

    let id = service::from_project(&body.project_id)?;

    timer.observe_duration();
    Ok(Json(UnitCreated { id }))
}

#[post("/services/<id>/hide")]
#[utoipa::path(post, tag = "Services", path = "/services/{id}/hide", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Unit name", example = "systemd-journald")),
    responses(
        (
            status = 200, description = "Hide the unit from default listings", body = ActionResponse,
            example = json!({"action": "hide", "done": true})
        ),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn service_hide_handler(id: String, _t: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["service_hide"]).start_timer();
    HTTP_COUNTER.inc();

    service::set_hidden(&id, true)?;

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: string!("hide") }))
}

#[post("/services/<id>/unhide")]
#[utoipa::path(post, tag = "Services", path = "/services/{id}/unhide", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Unit name", example = "systemd-journald")),
    responses(
        (
            status = 200, description = "Restore the unit to default listings", body = ActionResponse,
            example = json!({"action": "unhide", "done": true})
        ),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn service_unhide_handler(id: String, _t: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["service_unhide"]).start_timer();
    HTTP_COUNTER.inc();

    service::set_hidden(&id, false)?;

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: string!("unhide") }))
}
