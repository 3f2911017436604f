use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, StatusCode, request::Parts};
use axum::response::{IntoResponse, Response};

use crate::error::{ApiErrorBody, ApiErrorResponse};
use crate::router::RasidState;
use crate::types::Editor;

pub const EDITOR_EMAIL_HEADER: &str = "x-editor-email";
pub const EDITOR_NAME_HEADER: &str = "x-editor-name";

/// Identify the human behind a write. This is attribution only, not authentication.
/// The name falls back to the email when omitted; the system actor's email is refused.
pub fn editor_from_headers(headers: &HeaderMap, system_email: &str) -> Result<Editor, Response> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let Some(email) = header(EDITOR_EMAIL_HEADER) else {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "MISSING_EDITOR",
            format!("header `{EDITOR_EMAIL_HEADER}` is required for writes"),
        ));
    };
    if email.eq_ignore_ascii_case(system_email) {
        return Err(reject(
            StatusCode::FORBIDDEN,
            "RESERVED_EDITOR",
            format!("`{email}` is reserved for automatic sync"),
        ));
    }
    let name = header(EDITOR_NAME_HEADER).unwrap_or(email);
    Ok(Editor {
        email: email.to_string(),
        name: name.to_string(),
    })
}

fn reject(status: StatusCode, code: &str, message: String) -> Response {
    let body = ApiErrorBody {
        code: code.to_string(),
        message,
    };
    (status, Json(ApiErrorResponse { error: body })).into_response()
}

/// Extractor wrapping the [`Editor`] of a manual write.
#[derive(Debug, Clone)]
pub struct HumanEditor(pub Editor);

impl FromRequestParts<RasidState> for HumanEditor {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &RasidState,
    ) -> Result<Self, Self::Rejection> {
        editor_from_headers(&parts.headers, &state.system_email).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SYSTEM: &str = "auto-sync@system";

    #[test]
    fn name_defaults_to_email() {
        let mut headers = HeaderMap::new();
        headers.insert(EDITOR_EMAIL_HEADER, HeaderValue::from_static("desk@agency.example"));
        let editor = editor_from_headers(&headers, SYSTEM).unwrap();
        assert_eq!(editor.name, "desk@agency.example");

        headers.insert(EDITOR_NAME_HEADER, HeaderValue::from_static("Front Desk"));
        let editor = editor_from_headers(&headers, SYSTEM).unwrap();
        assert_eq!(editor.name, "Front Desk");
    }

    #[test]
    fn missing_or_reserved_identity_is_rejected() {
        let headers = HeaderMap::new();
        let resp = editor_from_headers(&headers, SYSTEM).unwrap_err();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let mut headers = HeaderMap::new();
        headers.insert(EDITOR_EMAIL_HEADER, HeaderValue::from_static("Auto-Sync@System"));
        let resp = editor_from_headers(&headers, SYSTEM).unwrap_err();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
