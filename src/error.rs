/*
 * Copyright (C) 2020 Oakes, Gregory <gregoryoakes@fastmail.com>
 * Author: Oakes, Gregory <gregory.oakes@fastmail.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

use std::convert::Infallible;

use jsonwebtoken::errors::ErrorKind as JWTErrorKind;
use serde::{Deserialize, Serialize};
use tokio_postgres::error::SqlState;
use warp::{
    filters::body::BodyDeserializeError,
    http::StatusCode,
    reject::{self, LengthRequired, MethodNotAllowed, PayloadTooLarge, UnsupportedMediaType},
    Rejection, Reply,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    DBPoolError(#[from] mobc::Error<tokio_postgres::Error>),
    #[error(transparent)]
    DBError(#[from] tokio_postgres::Error),
    #[error("unauthorized request")]
    Unauthorized,
    #[error("no signing key with id {0:?}")]
    UnknownKey(String),
    #[error(transparent)]
    JWTError(#[from] jsonwebtoken::errors::Error),
    #[error("unable to fetch signing keys: {0}")]
    KeyFetchError(#[from] reqwest::Error),
    #[error("malformed signing key set: {0}")]
    KeySetError(String),
    #[error("signing keys unavailable after a failed refresh")]
    KeysUnavailable,
    #[error("resource not found")]
    NotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

impl reject::Reject for Error {}

/// The body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResp {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl Error {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            Error::Unauthorized | Error::UnknownKey(_) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED")
            }
            Error::JWTError(e) => match e.kind() {
                JWTErrorKind::InvalidToken
                | JWTErrorKind::InvalidSignature
                | JWTErrorKind::ExpiredSignature
                | JWTErrorKind::ImmatureSignature
                | JWTErrorKind::InvalidIssuer
                | JWTErrorKind::InvalidAudience
                | JWTErrorKind::InvalidSubject
                | JWTErrorKind::InvalidAlgorithm
                | JWTErrorKind::MissingAlgorithm
                | JWTErrorKind::MissingRequiredClaim(_)
                | JWTErrorKind::Base64(_)
                | JWTErrorKind::Json(_)
                | JWTErrorKind::Utf8(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            Error::KeyFetchError(_) | Error::KeySetError(_) | Error::KeysUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "KEYS_UNAVAILABLE")
            }
            Error::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Error::DBError(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                (StatusCode::CONFLICT, "CONFLICT")
            }
            // The owning user row was deleted by a concurrent request.
            Error::DBError(e) if e.code() == Some(&SqlState::FOREIGN_KEY_VIOLATION) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

fn reply(code: StatusCode, name: &str, message: String) -> warp::reply::WithStatus<warp::reply::Json> {
    let body = ErrorResp {
        error: ErrorBody {
            code: name.to_string(),
            message,
        },
    };
    warp::reply::with_status(warp::reply::json(&body), code)
}

pub async fn handle_rejects(err: Rejection) -> Result<impl Reply, Infallible> {
    if err.is_not_found() {
        return Ok(reply(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "no such resource".to_string(),
        ));
    }

    if let Some(e) = err.find::<Error>() {
        let (code, name) = e.status();
        let message = if code == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %e, "request failed");
            "an internal server error occurred".to_string()
        } else {
            tracing::debug!(error = %e, status = code.as_u16(), "request rejected");
            match e {
                Error::JWTError(_) | Error::UnknownKey(_) => "invalid credentials".to_string(),
                Error::KeyFetchError(_) | Error::KeySetError(_) | Error::KeysUnavailable => {
                    "unable to verify credentials right now".to_string()
                }
                Error::DBError(_) if code == StatusCode::NOT_FOUND => {
                    Error::NotFound.to_string()
                }
                Error::DBError(_) => "resource already exists".to_string(),
                _ => e.to_string(),
            }
        };
        return Ok(reply(code, name, message));
    }

    let (code, name, message) = if let Some(e) = err.find::<BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "BAD_REQUEST", e.to_string())
    } else if let Some(e) = err.find::<PayloadTooLarge>() {
        (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", e.to_string())
    } else if let Some(e) = err.find::<UnsupportedMediaType>() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "UNSUPPORTED_MEDIA_TYPE",
            e.to_string(),
        )
    } else if let Some(e) = err.find::<LengthRequired>() {
        (StatusCode::LENGTH_REQUIRED, "LENGTH_REQUIRED", e.to_string())
    } else if let Some(e) = err.find::<reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, "BAD_REQUEST", e.to_string())
    } else if let Some(e) = err.find::<MethodNotAllowed>() {
        (StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED", e.to_string())
    } else {
        tracing::error!(rejection = ?err, "unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "an internal server error occurred".to_string(),
        )
    };

    Ok(reply(code, name, message))
}
