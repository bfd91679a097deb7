use rocket::serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body shared by every endpoint and catcher.
#[derive(Serialize, Deserialize, ToSchema)]
pub(crate) struct ErrorMessage {
    #[schema(example = 401)]
    pub(crate) code: u16,
    #[schema(example = "Unauthorized")]
    pub(crate) message: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub(crate) struct ActionResponse {
    #[schema(example = true)]
    pub(crate) done: bool,
    #[schema(example = "stop")]
    pub(crate) action: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub(crate) struct LogResponse {
    pub(crate) logs: Vec<String>,
}

#[derive(Deserialize, ToSchema)]
pub(crate) struct ContentBody {
    #[schema(example = "#!/usr/bin/env bash\necho hello")]
    pub(crate) content: String,
}
