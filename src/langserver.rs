//! Default method table the binary serves: document sync kept in memory and
//! query methods that answer with empty results until a backend plugs in.
use crate::lsp::types::ResponseError;
use crate::server::router::{RequestContext, Router, RouterError};
use lsp_types::notification::{
    DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument, DidSaveTextDocument,
};
use lsp_types::request::{
    Completion, DocumentSymbolRequest, Formatting, GotoDefinition, GotoImplementation,
    GotoTypeDefinition, HoverRequest, References, Rename, Request as LspRequest,
    SignatureHelpRequest, WorkspaceSymbolRequest,
};
use lsp_types::{
    CompletionParams, CompletionResponse, DidChangeTextDocumentParams,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DidSaveTextDocumentParams,
    DocumentFormattingParams, DocumentSymbolParams, DocumentSymbolResponse,
    GotoDefinitionParams, GotoDefinitionResponse, Hover, HoverParams, Location, ReferenceParams,
    RenameParams, SignatureHelp, SignatureHelpParams, TextEdit, Url, WorkspaceEdit,
    WorkspaceSymbolParams, WorkspaceSymbolResponse,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

/// Open documents by URI, as last synchronized by the client.
#[derive(Debug, Default)]
pub struct Documents {
    open: RwLock<HashMap<Url, Document>>,
}

impl Documents {
    pub fn new() -> Self {
        Documents::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Url, Document>> {
        self.open.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Url, Document>> {
        self.open.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, uri: &Url) -> Option<Document> {
        self.read().get(uri).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn open(&self, params: DidOpenTextDocumentParams) -> Result<(), ResponseError> {
        let item = params.text_document;
        debug!(uri = %item.uri, version = item.version, "document opened");
        self.write().insert(
            item.uri,
            Document {
                language_id: item.language_id,
                version: item.version,
                text: item.text,
            },
        );
        Ok(())
    }

    /// Apply full-content changes; ranged edits are refused since only full
    /// sync is advertised.
    pub fn change(&self, params: DidChangeTextDocumentParams) -> Result<(), ResponseError> {
        let uri = params.text_document.uri;
        if params.content_changes.iter().any(|change| change.range.is_some()) {
            return Err(ResponseError::invalid_params(format!(
                "incremental change for {} but only full sync is supported",
                uri
            )));
        }

        let mut open = self.write();
        let document = open
            .get_mut(&uri)
            .ok_or_else(|| ResponseError::invalid_params(format!("{} is not open", uri)))?;
        if let Some(change) = params.content_changes.into_iter().last() {
            document.text = change.text;
        }
        document.version = params.text_document.version;
        debug!(%uri, version = document.version, "document changed");
        Ok(())
    }

    pub fn save(&self, params: DidSaveTextDocumentParams) -> Result<(), ResponseError> {
        let uri = params.text_document.uri;
        if let Some(text) = params.text {
            if let Some(document) = self.write().get_mut(&uri) {
                document.text = text;
            }
        }
        debug!(%uri, "document saved");
        Ok(())
    }

    pub fn close(&self, params: DidCloseTextDocumentParams) -> Result<(), ResponseError> {
        let uri = params.text_document.uri;
        if self.write().remove(&uri).is_none() {
            debug!(%uri, "close for a document that was not open");
        }
        Ok(())
    }
}

pub fn router(documents: Arc<Documents>) -> Result<Router, RouterError> {
    let mut builder = Router::builder();

    let docs = Arc::clone(&documents);
    builder.notification::<DidOpenTextDocument, _, _>(move |_cx, params| {
        let docs = Arc::clone(&docs);
        async move { docs.open(params) }
    })?;
    let docs = Arc::clone(&documents);
    builder.notification::<DidChangeTextDocument, _, _>(move |_cx, params| {
        let docs = Arc::clone(&docs);
        async move { docs.change(params) }
    })?;
    let docs = Arc::clone(&documents);
    builder.notification::<DidSaveTextDocument, _, _>(move |_cx, params| {
        let docs = Arc::clone(&docs);
        async move { docs.save(params) }
    })?;
    let docs = Arc::clone(&documents);
    builder.notification::<DidCloseTextDocument, _, _>(move |_cx, params| {
        let docs = Arc::clone(&docs);
        async move { docs.close(params) }
    })?;

    builder
        .request::<HoverRequest, _, _>(hover)?
        .request::<GotoDefinition, _, _>(definition)?
        .request::<GotoTypeDefinition, _, _>(type_definition)?
        .request::<GotoImplementation, _, _>(implementation)?
        .request::<Completion, _, _>(completion)?
        .request::<References, _, _>(references)?
        .request::<DocumentSymbolRequest, _, _>(document_symbol)?
        .request::<SignatureHelpRequest, _, _>(signature_help)?
        .request::<Formatting, _, _>(formatting)?
        .request::<Rename, _, _>(rename)?
        .request::<WorkspaceSymbolRequest, _, _>(workspace_symbol)?;

    Ok(builder.build())
}

async fn hover(cx: RequestContext, params: HoverParams) -> Result<Option<Hover>, ResponseError> {
    cx.check_cancelled()?;
    let position = params.text_document_position_params;
    debug!(uri = %position.text_document.uri, line = position.position.line, "hover");
    Ok(None)
}

async fn definition(
    cx: RequestContext,
    params: GotoDefinitionParams,
) -> Result<Option<GotoDefinitionResponse>, ResponseError> {
    cx.check_cancelled()?;
    let position = params.text_document_position_params;
    debug!(uri = %position.text_document.uri, line = position.position.line, "definition");
    Ok(None)
}

async fn type_definition(
    cx: RequestContext,
    _params: <GotoTypeDefinition as LspRequest>::Params,
) -> Result<<GotoTypeDefinition as LspRequest>::Result, ResponseError> {
    cx.check_cancelled()?;
    Ok(None)
}

async fn implementation(
    cx: RequestContext,
    _params: <GotoImplementation as LspRequest>::Params,
) -> Result<<GotoImplementation as LspRequest>::Result, ResponseError> {
    cx.check_cancelled()?;
    Ok(None)
}

async fn completion(
    cx: RequestContext,
    _params: CompletionParams,
) -> Result<Option<CompletionResponse>, ResponseError> {
    cx.check_cancelled()?;
    Ok(Some(CompletionResponse::Array(Vec::new())))
}

async fn references(
    cx: RequestContext,
    _params: ReferenceParams,
) -> Result<Option<Vec<Location>>, ResponseError> {
    cx.check_cancelled()?;
    Ok(Some(Vec::new()))
}

async fn document_symbol(
    cx: RequestContext,
    _params: DocumentSymbolParams,
) -> Result<Option<DocumentSymbolResponse>, ResponseError> {
    cx.check_cancelled()?;
    Ok(Some(DocumentSymbolResponse::Nested(Vec::new())))
}

async fn signature_help(
    cx: RequestContext,
    _params: SignatureHelpParams,
) -> Result<Option<SignatureHelp>, ResponseError> {
    cx.check_cancelled()?;
    Ok(None)
}

async fn formatting(
    cx: RequestContext,
    _params: DocumentFormattingParams,
) -> Result<Option<Vec<TextEdit>>, ResponseError> {
    cx.check_cancelled()?;
    Ok(None)
}

async fn rename(
    cx: RequestContext,
    _params: RenameParams,
) -> Result<Option<WorkspaceEdit>, ResponseError> {
    cx.check_cancelled()?;
    Ok(None)
}

async fn workspace_symbol(
    cx: RequestContext,
    params: WorkspaceSymbolParams,
) -> Result<Option<WorkspaceSymbolResponse>, ResponseError> {
    cx.check_cancelled()?;
    debug!(query = %params.query, "workspace symbol");
    Ok(Some(WorkspaceSymbolResponse::Flat(Vec::new())))
}
