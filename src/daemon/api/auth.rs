use macros_rs::string;
use serde_json::json;
use utoipa::ToSchema;

use rocket::{
    delete, get,
    http::Status,
    post,
    serde::{json::Json, Deserialize, Serialize},
};

use super::{
    helpers::{generic_error, GenericError},
    structs::{ActionResponse, ErrorMessage},
    Token, HTTP_COUNTER, HTTP_REQ_HISTOGRAM,
};

use srvman::{
    auth::{self, Identity, UserView},
    store::users::Role,
};

#[derive(Deserialize, ToSchema)]
pub(crate) struct LoginBody {
    #[schema(example = "admin")]
    username: String,
    #[schema(example = "hunter2")]
    password: String,
}

#[derive(Serialize, ToSchema)]
pub(crate) struct LoginResponse {
    user: UserView,
    /// Bearer token for subsequent requests, expires after an hour idle
    token: String,
}

#[derive(Deserialize, ToSchema)]
pub(crate) struct PasswordBody {
    current_password: String,
    new_password: String,
}

#[derive(Deserialize, ToSchema)]
pub(crate) struct CreateUserBody {
    #[schema(example = "operator")]
    username: String,
    password: String,
    role: Role,
}

fn admin_only(token: &Token) -> Result<(), GenericError> {
    if token.identity.role != Role::Admin {
        return Err(generic_error(Status::Forbidden, string!("Admin role required")));
    }
    Ok(())
}

#[post("/auth/login", format = "json", data = "<body>")]
#[utoipa::path(post, tag = "Auth", path = "/auth/login", request_body = LoginBody,
    responses(
        (status = 200, description = "Exchange credentials for a session token", body = LoginResponse),
        (status = UNAUTHORIZED, description = "Invalid username or password", body = ErrorMessage),
    )
)]
pub async fn login_handler(body: Json<LoginBody>) -> Result<Json<LoginResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["login"]).start_timer();
    HTTP_COUNTER.inc();

    let (user, token) = auth::login(&body.username, &body.password)?;

    timer.observe_duration();
    Ok(Json(LoginResponse { user, token }))
}

#[get("/auth/verify")]
#[utoipa::path(get, tag = "Auth", path = "/auth/verify", security((), ("api_key" = [])),
    responses(
        (status = 200, description = "Identity behind the presented token", body = Identity),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn verify_handler(token: Token) -> Json<Identity> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["verify"]).start_timer();
    HTTP_COUNTER.inc();

    timer.observe_duration();
    Json(token.identity)
}

#[post("/auth/logout")]
#[utoipa::path(post, tag = "Auth", path = "/auth/logout", security((), ("api_key" = [])),
    responses(
        (
            status = 200, description = "Revoke the presented token", body = ActionResponse,
            example = json!({"action": "logout", "done": true})
        ),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn logout_handler(token: Token) -> Json<ActionResponse> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["logout"]).start_timer();
    HTTP_COUNTER.inc();

    auth::logout(&token.raw);

    timer.observe_duration();
    Json(ActionResponse { done: true, action: string!("logout") })
}

#[post("/auth/change-password", format = "json", data = "<body>")]
#[utoipa::path(post, tag = "Auth", path = "/auth/change-password", request_body = PasswordBody,
    security((), ("api_key" = [])),
    responses(
        (
            status = 200, description = "Change the caller's password", body = ActionResponse,
            example = json!({"action": "change-password", "done": true})
        ),
        (status = UNAUTHORIZED, description = "Current password does not match", body = ErrorMessage),
    )
)]
pub async fn change_password_handler(body: Json<PasswordBody>, token: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["change_password"]).start_timer();
    HTTP_COUNTER.inc();

    auth::change_password(&token.identity.username, &body.current_password, &body.new_password)?;

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: string!("change-password") }))
}

#[get("/auth/users")]
#[utoipa::path(get, tag = "Auth", path = "/auth/users", security((), ("api_key" = [])),
    responses(
        (status = 200, description = "List users, admin only", body = Vec<UserView>),
        (status = FORBIDDEN, description = "Caller is not an admin", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn users_handler(token: Token) -> Result<Json<Vec<UserView>>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["users"]).start_timer();
    HTTP_COUNTER.inc();
    admin_only(&token)?;

    let users = auth::list_users()?;

    timer.observe_duration();
    Ok(Json(users))
}

#[post("/auth/users", format = "json", data = "<body>")]
#[utoipa::path(post, tag = "Auth", path = "/auth/users", request_body = CreateUserBody,
    security((), ("api_key" = [])),
    responses(
        (status = 200, description = "Create a user, admin only", body = UserView),
        (status = FORBIDDEN, description = "Caller is not an admin", body = ErrorMessage),
        (status = CONFLICT, description = "Username is taken", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn user_add_handler(body: Json<CreateUserBody>, token: Token) -> Result<Json<UserView>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["user_add"]).start_timer();
    HTTP_COUNTER.inc();
    admin_only(&token)?;

    let user = auth::create_user(&body.username, &body.password, body.role).map_err(|err| generic_error(Status::Conflict, err.to_string()))?;

    timer.observe_duration();
    Ok(Json(user))
}

#[delete("/auth/users/<username>")]
#[utoipa::path(delete, tag = "Auth", path = "/auth/users/{username}", security((), ("api_key" = [])),
    params(("username" = String, Path, description = "User to remove", example = "operator")),
    responses(
        (
            status = 200, description = "Remove a user and revoke their sessions, admin only", body = ActionResponse,
            example = json!({"action": "remove", "done": true})
        ),
        (status = FORBIDDEN, description = "Caller is not an admin", body = ErrorMessage),
        (status = NOT_FOUND, description = "User was not found", body = ErrorMessage),
        (
            status = UNAUTHORIZED, description = "Authentication failed or not provided", body = ErrorMessage,
            example = json!({"code": 401, "message": "Unauthorized"})
        )
    )
)]
pub async fn user_remove_handler(username: String, token: Token) -> Result<Json<ActionResponse>, GenericError> {
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["user_remove"]).start_timer();
    HTTP_COUNTER.inc();
    admin_only(&token)?;

    if token.identity.username == username {
        return Err(generic_error(Status::BadRequest, string!("Cannot remove the current user")));
    }

    auth::remove_user(&username).map_err(|err| generic_error(Status::NotFound, err.to_string()))?;

    timer.observe_duration();
    Ok(Json(ActionResponse { done: true, action: string!("remove") }))
}
