use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Extension, Path, RawQuery, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;

use fleetgate_core::count_tokens;
use fleetgate_core::{AuthedUser, GatewayEngine, GatewayError, InboundRequest, authenticate};
use fleetgate_protocol::claude::count_tokens::CountTokensRequest;
use fleetgate_protocol::claude::request::CreateMessageRequest;
use fleetgate_protocol::gemini::request::{GenerateContentBody, GenerateContentRequest};
use fleetgate_protocol::openai::request::ChatCompletionRequest;
use fleetgate_provider_core::{HandlerBody, HandlerResponse, RequestCtx};

#[derive(Clone)]
pub struct ProxyState {
    pub engine: Arc<GatewayEngine>,
}

pub fn proxy_router(engine: Arc<GatewayEngine>) -> Router {
    let state = ProxyState { engine };
    Router::new()
        .route("/v1/chat/completions", post(openai_chat_completions))
        .route("/v1/messages", post(claude_messages))
        .route("/v1/messages/count_tokens", post(claude_count_tokens))
        .route("/v1beta/models/{*spec}", post(gemini_generate))
        .layer(middleware::from_fn_with_state(state.clone(), gateway_auth))
        .with_state(state)
}

async fn gateway_auth(
    State(state): State<ProxyState>,
    mut request: axum::http::Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let trace_id = uuid::Uuid::now_v7().to_string();
    let query = request.uri().query().map(str::to_string);

    let authed = authenticate(state.engine.store().as_ref(), request.headers(), query.as_deref())
        .await
        .map_err(error_response)?;

    request.extensions_mut().insert(Arc::new(authed));
    request
        .extensions_mut()
        .insert(RequestCtx { trace_id });
    Ok(next.run(request).await)
}

async fn openai_chat_completions(
    State(state): State<ProxyState>,
    Extension(authed): Extension<Arc<AuthedUser>>,
    Extension(ctx): Extension<RequestCtx>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    dispatch(&state, &ctx, &authed, InboundRequest::OpenAI(request)).await
}

async fn claude_messages(
    State(state): State<ProxyState>,
    Extension(authed): Extension<Arc<AuthedUser>>,
    Extension(ctx): Extension<RequestCtx>,
    Json(request): Json<CreateMessageRequest>,
) -> Response {
    dispatch(&state, &ctx, &authed, InboundRequest::Claude(request)).await
}

async fn claude_count_tokens(Json(request): Json<CountTokensRequest>) -> Response {
    Json(count_tokens::estimate(&request)).into_response()
}

/// `{spec}:{method}` from the Gemini path, split at the last colon so model
/// ids containing colons keep working.
fn split_spec_method(path: &str) -> Option<(&str, &str)> {
    let (spec, method) = path.rsplit_once(':')?;
    if spec.is_empty() {
        return None;
    }
    Some((spec, method))
}

async fn gemini_generate(
    State(state): State<ProxyState>,
    Path(spec): Path<String>,
    RawQuery(query): RawQuery,
    Extension(authed): Extension<Arc<AuthedUser>>,
    Extension(ctx): Extension<RequestCtx>,
    Json(body): Json<GenerateContentBody>,
) -> Response {
    let Some((model, method)) = split_spec_method(&spec) else {
        return error_response(GatewayError::BadRequest(format!(
            "missing :method suffix on {spec:?}"
        )));
    };
    let stream = match method {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return error_response(GatewayError::BadRequest(format!(
                "unsupported method {other:?}"
            )));
        }
    };
    // alt=sse is how Gemini clients ask for event-stream framing; fleetgate
    // only produces SSE, so the parameter is accepted and implied.
    let _ = query;

    let request = GenerateContentRequest {
        model: model.to_string(),
        stream,
        body,
    };
    dispatch(&state, &ctx, &authed, InboundRequest::Gemini(request)).await
}

async fn dispatch(
    state: &ProxyState,
    ctx: &RequestCtx,
    authed: &AuthedUser,
    inbound: InboundRequest,
) -> Response {
    match state.engine.dispatch(ctx, &authed.user, inbound).await {
        Ok(response) => handler_response(response),
        Err(error) => error_response(error),
    }
}

fn handler_response(response: HandlerResponse) -> Response {
    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        builder = builder.header(name, value);
    }
    let result = match response.body {
        HandlerBody::Bytes(bytes) => builder.body(Body::from(bytes)),
        HandlerBody::Stream(stream) => builder.body(Body::from_stream(stream)),
    };
    result.unwrap_or_else(|err| {
        error_response(GatewayError::Store(format!("response build failed: {err}")))
    })
}

fn error_response(error: GatewayError) -> Response {
    let status =
        StatusCode::from_u16(error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error.envelope())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_method_splits_at_last_colon() {
        assert_eq!(
            split_spec_method("gemini-2.5-pro:generateContent"),
            Some(("gemini-2.5-pro", "generateContent"))
        );
        assert_eq!(
            split_spec_method("GEMINI_CODE_ASSIST/fast:streamGenerateContent"),
            Some(("GEMINI_CODE_ASSIST/fast", "streamGenerateContent"))
        );
        assert_eq!(split_spec_method("no-method"), None);
    }
}
