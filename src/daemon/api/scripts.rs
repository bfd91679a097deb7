use macros_rs::string;
use serde_json::json;
use std::fs;
use std::os::unix::fs::PermissionsExt;
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

use srvman::{
    config, helpers,
    process::{self, paths, Started, Status as ProcessStatus},
    store::scripts::{self, Script, ScriptKind, ScriptUpdate},
};

#[derive(Deserialize, ToSchema)]
pub(crate) struct CreateScriptBody {
    /// Derived from the name when omitted
    #[schema(example = "backup-daily")]
    id: Option<String>,
    #[schema(example = "Daily backup")]
    name: String,
    #[schema(example = "Nightly tarball of /home")]
    description: Option<String>,
    #[serde(rename = "type")]
    kind: ScriptKind,
    /// Relative paths are resolved against the configured search roots
    #[schema(example = "scripts/backup.sh")]
    path: String,
    #[serde(default)]
    autostart: bool,
}

#[derive(Serialize, ToSchema)]
pub(crate) struct ScriptContent {
    #[schema(example = "/home/user/scripts/backup.sh")]
    path: String,
    content: String,
}

// "Deploy Website!" becomes "deploy-website"
pub(crate) fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

fn missing(id: &str) -> GenericError {
    generic_error(Status::NotFound, format!("Script '{id}' was not found"))
}

#[get("/scripts")]
#[utoipa::path(get, tag = "Scripts", path = "/scripts", security((), ("api_key" = [])),
    responses(
        (status = 200, description = "List all registered scripts", body = Vec<Script>),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn scripts_handler(_t: Token) -> Result<Json<Vec<Script>>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["scripts"]).start_timer();
    HTTP_COUNTER.inc();

    let list = scripts::list()?;

    timer.observe_duration();
    Ok(Json(list))
}

#[post("/scripts", format = "json", data = "<body>")]
#[utoipa::path(post, tag = "Scripts", path = "/scripts", request_body = CreateScriptBody,
    security((), ("api_key" = [])),
    responses(
        (status = 200, description = "Register a new script", body = Script),
        (status = BAD_REQUEST, description = "Unusable id", body = ErrorMessage),
        (status = CONFLICT, description = "A script with this id already exists", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn script_create_handler(body: Json<CreateScriptBody>, _t: Token) -> Result<Json<Script>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["script_create"]).start_timer();
    HTTP_COUNTER.inc();
    let body = body.into_inner();

    let id = match body.id {
        Some(id) => id,
        None => slug(&body.name),
    };

    if !helpers::valid_id(&id) {
        return Err(generic_error(Status::BadRequest, format!("'{id}' cannot be used as an id")));
    }

    let resolved = paths::resolve(&body.path);
    let script = Script {
        id,
        name: body.name,
        description: body.description,
        kind: body.kind,
        path: resolved.display().to_string(),
        original_path: Some(body.path),
        autostart: body.autostart,
        last_run_time: None,
        last_run_status: None,
    };

    let created = scripts::create(script).map_err(|err| generic_error(Status::Conflict, err.to_string()))?;

    timer.observe_duration();
    Ok(Json(created))
}

#[get("/scripts/<id>")]
#[utoipa::path(get, tag = "Scripts", path = "/scripts/{id}", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Script id", example = "backup-daily")),
    responses(
        (status = 200, description = "Get a single script", body = Script),
        (status = NOT_FOUND, description = "Script was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn script_info_handler(id: String, _t: Token) -> Result<Json<Script>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["script_info"]).start_timer();
    HTTP_COUNTER.inc();

    let script = scripts::get(&id)?.ok_or_else(|| missing(&id))?;

    timer.observe_duration();
    Ok(Json(script))
}

#[put("/scripts/<id>", format = "json", data = "<body>")]
#[utoipa::path(put, tag = "Scripts", path = "/scripts/{id}", request_body = ScriptUpdate,
    security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Script id", example = "backup-daily")),
    responses(
        (status = 200, description = "Update script fields, id is immutable", body = Script),
        (status = NOT_FOUND, description = "Script was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn script_update_handler(id: String, body: Json<ScriptUpdate>, _t: Token) -> Result<Json<Script>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["script_update"]).start_timer();
    HTTP_COUNTER.inc();
    let changes = body.into_inner();

    if scripts::get(&id)?.is_none() {
        return Err(missing(&id));
    }

    let resolved = changes.path.as_ref().map(|raw| paths::resolve(raw).display().to_string());
    let updated = scripts::update(&id, changes, resolved)?;

    timer.observe_duration();
    Ok(Json(updated))
}

#[delete("/scripts/<id>")]
#[utoipa::path(delete, tag = "Scripts", path = "/scripts/{id}", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Script id", example = "backup-daily")),
    responses(
        (
            status = 200, description = "Remove a script, stopping it first if running", body = ActionResponse,
            example = json!({"action": "remove", "done": true})
        ),
        (status = NOT_FOUND, description = "Script was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn script_remove_handler(id: String, _t: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["script_remove"]).start_timer();
    HTTP_COUNTER.inc();

    if scripts::get(&id)?.is_none() {
        return Err(missing(&id));
    }

    // A live process must not outlive its record
    match process::stop(&id) {
        Ok(()) | Err(process::Error::NotRunning { .. }) => {}
        Err(err) => return Err(err.into()),
    }
    scripts::delete(&id)?;

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: string!("remove") }))
}

#[post("/scripts/<id>/run")]
#[utoipa::path(post, tag = "Scripts", path = "/scripts/{id}/run", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Script id", example = "backup-daily")),
    responses(
        (status = 200, description = "Spawn the script detached from the daemon", body = Started),
        (status = NOT_FOUND, description = "Script was not found", body = ErrorMessage),
        (status = CONFLICT, description = "Script is already running", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn script_run_handler(id: String, _t: Token) -> Result<Json<Started>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["script_run"]).start_timer();
    HTTP_COUNTER.inc();

    let started = process::start(&id)?;

    timer.observe_duration();
    Ok(Json(started))
}

#[post("/scripts/<id>/stop")]
#[utoipa::path(post, tag = "Scripts", path = "/scripts/{id}/stop", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Script id", example = "backup-daily")),
    responses(
        (
            status = 200, description = "Stop the script, SIGTERM then SIGKILL", body = ActionResponse,
            example = json!({"action": "stop", "done": true})
        ),
        (status = BAD_REQUEST, description = "Script is not running", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn script_stop_handler(id: String, _t: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["script_stop"]).start_timer();
    HTTP_COUNTER.inc();

    process::stop(&id)?;

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: string!("stop") }))
}

#[get("/scripts/<id>/status")]
#[utoipa::path(get, tag = "Scripts", path = "/scripts/{id}/status", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Script id", example = "backup-daily")),
    responses(
        (status = 200, description = "Live status from the pid file and OS probes", body = ProcessStatus),
        (status = NOT_FOUND, description = "Script was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn script_status_handler(id: String, _t: Token) -> Result<Json<ProcessStatus>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["script_status"]).start_timer();
    HTTP_COUNTER.inc();

    let status = process::status(&id)?;

    timer.observe_duration();
    Ok(Json(status))
}

#[get("/scripts/<id>/log?<lines>")]
#[utoipa::path(get, tag = "Scripts", path = "/scripts/{id}/log", security((), ("api_key" = [])),
    params(
        ("id" = String, Path, description = "Script id", example = "backup-daily"),
        ("lines" = Option<usize>, Query, description = "Tail length, defaults to runner.log_lines")
    ),
    responses(
        (status = 200, description = "Tail of the script log", body = LogResponse),
        (status = NOT_FOUND, description = "Script was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn script_log_handler(id: String, lines: Option<usize>, _t: Token) -> Result<Json<LogResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["script_log"]).start_timer();
    HTTP_COUNTER.inc();

    if scripts::get(&id)?.is_none() {
        return Err(missing(&id));
    }

    let lines = lines.unwrap_or(config::read().runner.log_lines);
    let logs = process::read_log(&id, lines);

    timer.observe_duration();
    Ok(Json(LogResponse { logs }))
}

#[delete("/scripts/<id>/log")]
#[utoipa::path(delete, tag = "Scripts", path = "/scripts/{id}/log", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Script id", example = "backup-daily")),
    responses(
        (
            status = 200, description = "Truncate the script log", body = ActionResponse,
            example = json!({"action": "flush", "done": true})
        ),
        (status = NOT_FOUND, description = "Script was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn script_log_flush_handler(id: String, _t: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["script_log_flush"]).start_timer();
    HTTP_COUNTER.inc();

    if scripts::get(&id)?.is_none() {
        return Err(missing(&id));
    }

    process::flush_log(&id).map_err(|err| generic_error(Status::InternalServerError, err.to_string()))?;

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: string!("flush") }))
}

#[get("/scripts/<id>/content")]
#[utoipa::path(get, tag = "Scripts", path = "/scripts/{id}/content", security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Script id", example = "backup-daily")),
    responses(
        (status = 200, description = "Read the script file", body = ScriptContent),
        (status = NOT_FOUND, description = "Script was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn script_content_handler(id: String, _t: Token) -> Result<Json<ScriptContent>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["script_content"]).start_timer();
    HTTP_COUNTER.inc();

    let script = scripts::get(&id)?.ok_or_else(|| missing(&id))?;
    let content = fs::read_to_string(&script.path).map_err(|err| generic_error(Status::InternalServerError, err.to_string()))?;

    timer.observe_duration();
    Ok(Json(ScriptContent { path: script.path, content }))
}

#[put("/scripts/<id>/content", format = "json", data = "<body>")]
#[utoipa::path(put, tag = "Scripts", path = "/scripts/{id}/content", request_body = ContentBody,
    security((), ("api_key" = [])),
    params(("id" = String, Path, description = "Script id", example = "backup-daily")),
    responses(
        (
            status = 200, description = "Overwrite the script file", body = ActionResponse,
            example = json!({"action": "save", "done": true})
        ),
        (status = NOT_FOUND, description = "Script was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn script_save_handler(id: String, body: Json<ContentBody>, _t: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["script_save"]).start_timer();
    HTTP_COUNTER.inc();

    let script = scripts::get(&id)?.ok_or_else(|| missing(&id))?;

    fs::write(&script.path, &body.content).map_err(|err| generic_error(Status::InternalServerError, err.to_string()))?;

    // Interpreted kinds stay executable after edits
    if matches!(script.kind, ScriptKind::Shell | ScriptKind::Python) {
        if let Ok(metadata) = fs::metadata(&script.path) {
            let mut permissions = metadata.permissions();
            permissions.set_mode(permissions.mode() | 0o755);
            fs::set_permissions(&script.path, permissions).ok();
        }
    }

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: string!("save") }))
}

#[cfg(test)]
mod tests {
    use super::slug;

    #[test]
    fn test_slug_from_display_names() {
        assert_eq!(slug("Deploy Website!"), "deploy-website");
        assert_eq!(slug("  nightly_backup  "), "nightly_backup");
        assert_eq!(slug("a//b"), "a-b");
        assert_eq!(slug("???"), "");
    }
}
