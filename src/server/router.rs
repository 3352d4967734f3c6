//! Method table: maps method names to handlers.
use crate::lsp::types::{RequestId, ResponseError};
use async_trait::async_trait;
use lsp_types::notification::{Cancel, Exit, Initialized, Notification as LspNotification};
use lsp_types::request::{Initialize, Request as LspRequest, Shutdown};
use lsp_types::{
    CompletionOptions, HoverProviderCapability, ImplementationProviderCapability, OneOf,
    ServerCapabilities, SignatureHelpOptions, TextDocumentSyncCapability, TextDocumentSyncKind,
    TypeDefinitionProviderCapability,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type HandlerResult = Result<Value, ResponseError>;

/// Methods handled by the dispatcher itself.
pub const INTRINSIC_METHODS: [&str; 5] = [
    Initialize::METHOD,
    Initialized::METHOD,
    Shutdown::METHOD,
    Exit::METHOD,
    Cancel::METHOD,
];

/// What a handler gets besides its params: who is calling and the
/// cancellation scope it should observe.
#[derive(Debug, Clone)]
pub struct RequestContext {
    id: Option<RequestId>,
    method: Arc<str>,
    token: CancellationToken,
}

impl RequestContext {
    pub fn new(id: Option<RequestId>, method: &str, token: CancellationToken) -> Self {
        RequestContext {
            id,
            method: Arc::from(method),
            token,
        }
    }

    /// `None` for notifications.
    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn check_cancelled(&self) -> Result<(), ResponseError> {
        if self.is_cancelled() {
            return Err(ResponseError::request_cancelled());
        }
        Ok(())
    }
}

#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, cx: RequestContext, params: Option<Value>) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> MethodHandler for F
where
    F: Fn(RequestContext, Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, cx: RequestContext, params: Option<Value>) -> HandlerResult {
        (self)(cx, params).await
    }
}

/// Decode raw params into `P`; missing params decode from `null`.
pub fn decode_params<P: DeserializeOwned>(params: Option<Value>) -> Result<P, ResponseError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| ResponseError::invalid_params(format!("invalid params: {}", e)))
}

/// Wrap a typed handler so params are decoded and the result encoded here,
/// giving every handler the same invalid-params error shape.
pub fn typed<P, R, F, Fut>(handler: F) -> impl MethodHandler
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(RequestContext, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ResponseError>> + Send + 'static,
{
    let handler = Arc::new(handler);
    move |cx: RequestContext, params: Option<Value>| {
        let handler = Arc::clone(&handler);
        async move {
            let params = decode_params::<P>(params)?;
            let result = (*handler)(cx, params).await?;
            serde_json::to_value(result)
                .map_err(|e| ResponseError::internal(format!("failed to encode result: {}", e)))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Runs concurrently with everything else on the connection.
    ReadOnly,
    /// Mutates shared state; runs serially in arrival order.
    Mutating,
}

#[derive(Clone)]
pub struct Route {
    pub kind: MethodKind,
    pub handler: Arc<dyn MethodHandler>,
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("method {0} is handled by the dispatcher and cannot be registered")]
    Intrinsic(String),
    #[error("method {0} is already registered")]
    Duplicate(String),
}

#[derive(Default)]
pub struct RouterBuilder {
    routes: HashMap<String, Route>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        RouterBuilder::default()
    }

    pub fn register(
        &mut self,
        method: &str,
        kind: MethodKind,
        handler: impl MethodHandler + 'static,
    ) -> Result<&mut Self, RouterError> {
        if INTRINSIC_METHODS.contains(&method) {
            return Err(RouterError::Intrinsic(method.to_string()));
        }
        if self.routes.contains_key(method) {
            return Err(RouterError::Duplicate(method.to_string()));
        }
        self.routes.insert(
            method.to_string(),
            Route {
                kind,
                handler: Arc::new(handler),
            },
        );
        Ok(self)
    }

    /// Register a read-only LSP request.
    pub fn request<R, F, Fut>(&mut self, handler: F) -> Result<&mut Self, RouterError>
    where
        R: LspRequest + 'static,
        R::Params: Send + 'static,
        R::Result: Send + 'static,
        F: Fn(RequestContext, R::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Result, ResponseError>> + Send + 'static,
    {
        self.register(
            R::METHOD,
            MethodKind::ReadOnly,
            typed::<R::Params, R::Result, F, Fut>(handler),
        )
    }

    /// Register a state-mutating LSP notification.
    pub fn notification<N, F, Fut>(&mut self, handler: F) -> Result<&mut Self, RouterError>
    where
        N: LspNotification + 'static,
        N::Params: Send + 'static,
        F: Fn(RequestContext, N::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ResponseError>> + Send + 'static,
    {
        self.register(
            N::METHOD,
            MethodKind::Mutating,
            typed::<N::Params, (), F, Fut>(handler),
        )
    }

    pub fn build(&mut self) -> Router {
        Router {
            routes: std::mem::take(&mut self.routes),
        }
    }
}

/// Immutable after construction; shared by every connection.
pub struct Router {
    routes: HashMap<String, Route>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    pub fn route(&self, method: &str) -> Result<&Route, ResponseError> {
        self.routes
            .get(method)
            .ok_or_else(|| ResponseError::method_not_found(method))
    }

    pub fn contains(&self, method: &str) -> bool {
        self.routes.contains_key(method)
    }

    /// Capability descriptor returned from `initialize`.
    pub fn capabilities(&self) -> ServerCapabilities {
        fn flag<T>(enabled: bool) -> Option<OneOf<bool, T>> {
            enabled.then_some(OneOf::Left(true))
        }
        let has = |method: &str| self.contains(method);

        ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::FULL)),
            hover_provider: has("textDocument/hover").then_some(HoverProviderCapability::Simple(true)),
            completion_provider: has("textDocument/completion")
                .then(CompletionOptions::default),
            signature_help_provider: has("textDocument/signatureHelp")
                .then(SignatureHelpOptions::default),
            definition_provider: flag(has("textDocument/definition")),
            type_definition_provider: has("textDocument/typeDefinition")
                .then_some(TypeDefinitionProviderCapability::Simple(true)),
            implementation_provider: has("textDocument/implementation")
                .then_some(ImplementationProviderCapability::Simple(true)),
            references_provider: flag(has("textDocument/references")),
            document_symbol_provider: flag(has("textDocument/documentSymbol")),
            workspace_symbol_provider: flag(has("workspace/symbol")),
            document_formatting_provider: flag(has("textDocument/formatting")),
            rename_provider: flag(has("textDocument/rename")),
            ..ServerCapabilities::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::types::{INVALID_PARAMS, METHOD_NOT_FOUND};
    use lsp_types::request::HoverRequest;
    use lsp_types::{Hover, HoverContents, MarkedString};
    use serde_json::json;

    fn context(method: &str) -> RequestContext {
        RequestContext::new(Some(RequestId::Num(1)), method, CancellationToken::new())
    }

    fn hover_router() -> Router {
        let mut builder = Router::builder();
        builder
            .request::<HoverRequest, _, _>(|_cx, params| async move {
                Ok(Some(Hover {
                    contents: HoverContents::Scalar(MarkedString::String(
                        params.text_document_position_params.position.line.to_string(),
                    )),
                    range: None,
                }))
            })
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_unknown_method_is_not_found() {
        let router = hover_router();
        let err = router.route("textDocument/unknown").err().unwrap();
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert!(err.message.contains("textDocument/unknown"));
    }

    #[test]
    fn test_intrinsic_and_duplicate_registration_rejected() {
        let mut builder = Router::builder();
        let noop = |_cx: RequestContext, _params: Option<Value>| async { Ok::<_, ResponseError>(Value::Null) };

        let err = builder.register("initialize", MethodKind::ReadOnly, noop).err().unwrap();
        assert!(matches!(err, RouterError::Intrinsic(_)));

        builder.register("custom/ping", MethodKind::ReadOnly, noop).unwrap();
        let err = builder.register("custom/ping", MethodKind::Mutating, noop).err().unwrap();
        assert!(matches!(err, RouterError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_typed_handler_decodes_params() {
        let router = hover_router();
        let route = router.route("textDocument/hover").unwrap();
        assert_eq!(route.kind, MethodKind::ReadOnly);

        let params = json!({
            "textDocument": {"uri": "file:///tmp/main.rs"},
            "position": {"line": 12, "character": 3}
        });
        let result = route
            .handler
            .handle(context("textDocument/hover"), Some(params))
            .await
            .unwrap();
        assert_eq!(result["contents"], json!("12"));
    }

    #[tokio::test]
    async fn test_typed_handler_rejects_bad_params() {
        let router = hover_router();
        let route = router.route("textDocument/hover").unwrap();

        let err = route
            .handler
            .handle(context("textDocument/hover"), Some(json!({"position": "nowhere"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);

        let err = route
            .handler
            .handle(context("textDocument/hover"), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[test]
    fn test_capabilities_follow_registered_methods() {
        let router = hover_router();
        let capabilities = router.capabilities();
        assert!(capabilities.hover_provider.is_some());
        assert!(capabilities.definition_provider.is_none());
        assert!(capabilities.rename_provider.is_none());
        assert_eq!(
            capabilities.text_document_sync,
            Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::FULL))
        );
    }

    #[test]
    fn test_check_cancelled() {
        let cx = context("textDocument/hover");
        assert!(cx.check_cancelled().is_ok());
        cx.token().cancel();
        assert_eq!(
            cx.check_cancelled().unwrap_err(),
            ResponseError::request_cancelled()
        );
    }
}
