use std::collections::HashMap;
use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use review_engagement_api_types::ResponseEnvelope;
use serde_json::{Map, Value};
use tracing::warn;

use crate::application::error::{ServiceError, ServiceErrorKind};
use crate::application::manager::{CookieDirective, RestRequest, TransportRequest};
use crate::application::routes::RouteSpec;
use crate::infra::http::middleware::RequestContext;

use super::error::{ApiError, codes};
use super::state::ApiState;

pub const SHARE_TOKEN_HEADER: &str = "x-share-token";
/// Ask for a login redirect instead of a 401.
pub const REDIRECT_PARAM: &str = "_redirect";
/// Ask for the payload as a JSON attachment.
pub const DOWNLOAD_PARAM: &str = "_download";
const PARKED_PARAMS_TTL: Duration = Duration::from_secs(15 * 60);

/// Every route of the table lands here; the route itself arrives as an
/// extension set when the router was built.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch(
    State(state): State<ApiState>,
    Extension(route): Extension<&'static RouteSpec>,
    Extension(ctx): Extension<RequestContext>,
    Path(path): Path<HashMap<String, String>>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
    jar: CookieJar,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = ctx.request_id;
    let Query(query) = match query {
        Ok(query) => query,
        Err(err) => {
            return ApiError::new(
                ServiceError::bad_request_with(codes::INVALID_QUERY, err.body_text()),
                Some(request_id),
            )
            .into_response();
        }
    };
    let body = match parse_body(&body) {
        Ok(body) => body,
        Err(err) => return ApiError::new(err, Some(request_id)).into_response(),
    };

    let redirect = query.contains_key(REDIRECT_PARAM);
    let download = query.contains_key(DOWNLOAD_PARAM);
    let request = RestRequest {
        request_id: Some(request_id.clone()),
        path: strings(path),
        query: strings(query),
        body,
        bearer: bearer_token(&headers),
        cookie: jar
            .get(state.session_cookie())
            .map(|cookie| cookie.value().to_string()),
        share_header: headers
            .get(SHARE_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    };
    let parked = redirect.then(|| TransportRequest::Rest(request.clone()).into_params());

    let response = state
        .service
        .dispatch(route.name, TransportRequest::Rest(request))
        .await;
    let jar = apply_cookie(&state, jar, &response.cookie);

    match response.result {
        Ok(envelope) if download => (jar, attachment(&envelope)).into_response(),
        Ok(envelope) => {
            let status = axum::http::StatusCode::from_u16(envelope.status_code)
                .unwrap_or(axum::http::StatusCode::OK);
            (jar, (status, Json(envelope))).into_response()
        }
        Err(err) if err.kind() == ServiceErrorKind::NotAuthenticated => {
            match (parked, state.service.options.login_url.as_deref()) {
                (Some(params), Some(login_url)) => {
                    (jar, login_redirect(&state, login_url, &params, &response.request_id).await)
                        .into_response()
                }
                _ => (jar, ApiError::new(err, Some(response.request_id))).into_response(),
            }
        }
        Err(err) => (jar, ApiError::new(err, Some(response.request_id))).into_response(),
    }
}

fn parse_body(raw: &Bytes) -> Result<Value, ServiceError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(raw)
        .map_err(|err| ServiceError::bad_request_with(codes::INVALID_JSON_BODY, err.to_string()))
}

fn strings(values: HashMap<String, String>) -> Map<String, Value> {
    values
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn apply_cookie(state: &ApiState, jar: CookieJar, directive: &CookieDirective) -> CookieJar {
    let name = state.session_cookie().to_string();
    match directive {
        CookieDirective::Keep => jar,
        CookieDirective::Set(token) => jar.add(
            Cookie::build((name, token.clone()))
                .path("/")
                .http_only(true),
        ),
        CookieDirective::Clear => jar.remove(Cookie::build(name).path("/")),
    }
}

/// Park the request's parameters and send the caller to the login page with
/// the key to resume them.
async fn login_redirect(
    state: &ApiState,
    login_url: &str,
    params: &Map<String, Value>,
    request_id: &str,
) -> Response {
    let mut params = params.clone();
    params.remove(REDIRECT_PARAM);
    match state
        .service
        .stash_parameters(&params, PARKED_PARAMS_TTL)
        .await
    {
        Ok(key) => {
            let separator = if login_url.contains('?') { '&' } else { '?' };
            Redirect::to(&format!("{login_url}{separator}paramsKey={key}")).into_response()
        }
        Err(err) => {
            warn!(
                target = "review_engagement::http",
                request_id,
                error = %err,
                "Could not park parameters for login redirect"
            );
            Redirect::to(login_url).into_response()
        }
    }
}

fn attachment(envelope: &ResponseEnvelope) -> Response {
    let payload = envelope.data().cloned().unwrap_or(Value::Null);
    let mut response = Json(payload).into_response();
    let disposition = format!("attachment; filename=\"{}.json\"", envelope.data_name);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    response
}
