use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use serde_json::json;
use std::io::Cursor;

use srvman::{auth, process, scheduler, service, system};

/// Error body in the `{code, message}` shape every endpoint shares.
pub struct GenericError {
    pub status: Status,
    pub message: String,
}

pub fn generic_error(status: Status, message: String) -> GenericError {
    GenericError { status, message }
}

impl<'r> Responder<'r, 'static> for GenericError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let body = json!({ "code": self.status.code, "message": self.message }).to_string();

        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

impl From<process::Error> for GenericError {
    fn from(err: process::Error) -> Self {
        let status = match &err {
            process::Error::NotFound { .. } => Status::NotFound,
            process::Error::NotRunning { .. } => Status::BadRequest,
            process::Error::AlreadyRunning { .. } => Status::Conflict,
            process::Error::UnsupportedType { .. } => Status::BadRequest,
            process::Error::PermissionDenied { .. } => Status::InternalServerError,
            process::Error::IOFailure { .. } => Status::InternalServerError,
        };
        generic_error(status, err.to_string())
    }
}

impl From<scheduler::Error> for GenericError {
    fn from(err: scheduler::Error) -> Self {
        let status = match &err {
            scheduler::Error::NotFound { .. } => Status::NotFound,
            scheduler::Error::BadSchedule { .. } => Status::BadRequest,
            scheduler::Error::Store(_) | scheduler::Error::Exec(_) => Status::InternalServerError,
        };
        generic_error(status, err.to_string())
    }
}

impl From<service::Error> for GenericError {
    fn from(err: service::Error) -> Self {
        let status = match &err {
            service::Error::NotFound { .. } => Status::NotFound,
            service::Error::Invalid(_) => Status::BadRequest,
            service::Error::Command { .. } | service::Error::Io(_) | service::Error::Store(_) => {
                Status::InternalServerError
            }
        };
        generic_error(status, err.to_string())
    }
}

impl From<system::Error> for GenericError {
    fn from(err: system::Error) -> Self {
        let status = match &err {
            system::Error::NotFound(_) => Status::NotFound,
            system::Error::NotAllowed(_) => Status::Forbidden,
            system::Error::Invalid(_) => Status::BadRequest,
            system::Error::Probe(_) | system::Error::Io(_) => Status::InternalServerError,
        };
        generic_error(status, err.to_string())
    }
}

impl From<auth::Error> for GenericError {
    fn from(err: auth::Error) -> Self {
        let status = match &err {
            auth::Error::BadCredentials => Status::Unauthorized,
            auth::Error::Store(_) => Status::InternalServerError,
        };
        generic_error(status, err.to_string())
    }
}

/// Store-layer failures carry no HTTP semantics of their own.
impl From<anyhow::Error> for GenericError {
    fn from(err: anyhow::Error) -> Self {
        generic_error(Status::InternalServerError, err.to_string())
    }
}
