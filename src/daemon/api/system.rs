use serde_json::json;
use utoipa::ToSchema;

use rocket::{
    get, post,
    serde::{json::Json, Deserialize, Serialize},
};

use macros_rs::string;

use super::{
    helpers::GenericError,
    structs::{ActionResponse, ErrorMessage},
    Token, HTTP_COUNTER, HTTP_REQ_HISTOGRAM,
};

use srvman::{
    process::CommandOutput,
    system::{self, CpuUsage, DiskUsage, Executable, MemoryUsage, ProcessInfo, SystemInfo, TreeNode},
};

#[derive(Serialize, ToSchema)]
pub(crate) struct FileContent {
    #[schema(example = "/home/user/scripts/backup.sh")]
    path: String,
    content: String,
}

#[derive(Deserialize, ToSchema)]
pub(crate) struct WriteFileBody {
    #[schema(example = "/home/user/scripts/backup.sh")]
    path: String,
    content: String,
}

#[derive(Deserialize, ToSchema)]
pub(crate) struct ExecuteBody {
    #[schema(example = "df -h")]
    command: String,
}

#[get("/system/info")]
#[utoipa::path(get, tag = "System", path = "/system/info", security((), ("api_key" = [])),
    responses(
        (status = 200, description = "Host overview: os, memory, load, uptime", body = SystemInfo),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn system_info_handler(_t: Token) -> Result<Json<SystemInfo>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["system_info"]).start_timer();
    HTTP_COUNTER.inc();

    let info = system::info()?;

    timer.observe_duration();
    Ok(Json(info))
}

#[get("/system/disks")]
#[utoipa::path(get, tag = "System", path = "/system/disks", security((), ("api_key" = [])),
    responses(
        (status = 200, description = "Mounted filesystems with usage", body = Vec<DiskUsage>),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn system_disks_handler(_t: Token) -> Json<Vec<DiskUsage>> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["system_disks"]).start_timer();
    HTTP_COUNTER.inc();

    let disks = system::disks();

    timer.observe_duration();
    Json(disks)
}

#[get("/system/memory")]
#[utoipa::path(get, tag = "System", path = "/system/memory", security((), ("api_key" = [])),
    responses(
        (status = 200, description = "Memory and swap usage", body = MemoryUsage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn system_memory_handler(_t: Token) -> Result<Json<MemoryUsage>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["system_memory"]).start_timer();
    HTTP_COUNTER.inc();

    let memory = system::memory()?;

    timer.observe_duration();
    Ok(Json(memory))
}

#[get("/system/cpu")]
#[utoipa::path(get, tag = "System", path = "/system/cpu", security((), ("api_key" = [])),
    responses(
        (status = 200, description = "Global and per-core cpu usage", body = CpuUsage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn system_cpu_handler(_t: Token) -> Json<CpuUsage> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["system_cpu"]).start_timer();
    HTTP_COUNTER.inc();

    let cpu = system::cpu();

    timer.observe_duration();
    Json(cpu)
}

#[get("/system/processes?<limit>")]
#[utoipa::path(get, tag = "System", path = "/system/processes", security((), ("api_key" = [])),
    params(("limit" = Option<usize>, Query, description = "Row count, defaults to 15")),
    responses(
        (status = 200, description = "Top processes by cpu usage", body = Vec<ProcessInfo>),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn system_processes_handler(limit: Option<usize>, _t: Token) -> Json<Vec<ProcessInfo>> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["system_processes"]).start_timer();
    HTTP_COUNTER.inc();

    let processes = system::processes(limit);

    timer.observe_duration();
    Json(processes)
}

#[get("/system/tree?<depth>")]
#[utoipa::path(get, tag = "System", path = "/system/tree", security((), ("api_key" = [])),
    params(("depth" = Option<usize>, Query, description = "Recursion depth, 1 to 5, defaults to 3")),
    responses(
        (status = 200, description = "Script and config files under the search roots", body = Vec<TreeNode>),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn system_tree_handler(depth: Option<usize>, _t: Token) -> Json<Vec<TreeNode>> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["system_tree"]).start_timer();
    HTTP_COUNTER.inc();

    let tree = system::tree(depth);

    timer.observe_duration();
    Json(tree)
}

#[get("/system/file?<path>")]
#[utoipa::path(get, tag = "System", path = "/system/file", security((), ("api_key" = [])),
    params(("path" = String, Query, description = "Absolute file path", example = "/home/user/scripts/backup.sh")),
    responses(
        (status = 200, description = "Read a file from disk", body = FileContent),
        (status = NOT_FOUND, description = "Path does not exist", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn file_read_handler(path: String, _t: Token) -> Result<Json<FileContent>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["file_read"]).start_timer();
    HTTP_COUNTER.inc();

    let content = system::read_file(&path)?;

    timer.observe_duration();
    Ok(Json(FileContent { path, content }))
}

#[post("/system/file", format = "json", data = "<body>")]
#[utoipa::path(post, tag = "System", path = "/system/file", request_body = WriteFileBody,
    security((), ("api_key" = [])),
    responses(
        (
            status = 200, description = "Write a file, scripts come out executable", body = ActionResponse,
            example = json!({"action": "save", "done": true})
        ),
        (status = BAD_REQUEST, description = "Empty path", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn file_save_handler(body: Json<WriteFileBody>, _t: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["file_save"]).start_timer();
    HTTP_COUNTER.inc();

    system::write_file(&body.path, &body.content)?;

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: string!("save") }))
}

#[get("/system/executables?<directory>")]
#[utoipa::path(get, tag = "System", path = "/system/executables", security((), ("api_key" = [])),
    params(("directory" = String, Query, description = "Directory to scan", example = "/home/user/scripts")),
    responses(
        (status = 200, description = "Runnable files in a directory", body = Vec<Executable>),
        (status = NOT_FOUND, description = "Directory does not exist", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn executables_handler(directory: String, _t: Token) -> Result<Json<Vec<Executable>>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["executables"]).start_timer();
    HTTP_COUNTER.inc();

    let found = system::executables(&directory)?;

    timer.observe_duration();
    Ok(Json(found))
}

#[post("/system/execute", format = "json", data = "<body>")]
#[utoipa::path(post, tag = "System", path = "/system/execute", request_body = ExecuteBody,
    security((), ("api_key" = [])),
    responses(
        (status = 200, description = "Run an allowlisted diagnostic command", body = CommandOutput),
        (status = FORBIDDEN, description = "Command is not in the allowlist", body = ErrorMessage),
        (status = BAD_REQUEST, description = "Empty command", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn execute_handler(body: Json<ExecuteBody>, _t: Token) -> Result<Json<CommandOutput>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["execute"]).start_timer();
    HTTP_COUNTER.inc();

    let output = system::execute(&body.command)?;

    timer.observe_duration();
    Ok(Json(output))
}
