//! Plain-text responses for process output and logs.
//!
//! The body is streamed without a length, so hyper sends it with
//! `Transfer-Encoding: chunked` and each line reaches the browser as soon as
//! the runner produces it.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;

use super::api::ApiError;
use crate::errors::PployError;
use crate::runner::OutputStream;

const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

pub fn text_response(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, TEXT_PLAIN_UTF8),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        body,
    )
        .into_response()
}

/// Stream a running process's output as the response body.
pub fn process_output(output: OutputStream) -> Response {
    text_response(Body::from_stream(output.map(Ok::<_, Infallible>)))
}

/// Failure before streaming started, reported as text for the output pane.
pub struct PlainTextError(pub ApiError);

impl From<PployError> for PlainTextError {
    fn from(err: PployError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for PlainTextError {
    fn into_response(self) -> Response {
        let status = self.0.status();
        let mut message = self.0.message();
        message.push('\n');
        let mut response = text_response(Body::from(message));
        *response.status_mut() = status;
        response
    }
}
