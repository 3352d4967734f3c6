//! Per-connection dispatch loop.
//!
//! The read loop runs lifecycle checks and the intrinsic methods inline, in
//! arrival order. Routed methods become units of work: read-only ones are
//! spawned and may answer out of order, mutating ones go through a single
//! serial worker so their effects land in the order they were received.
//! A dedicated writer task owns the write half of the connection.
use crate::lsp::protocol::{parse_message, ProtocolError};
use crate::lsp::transport::{Connection, MessageWriter};
use crate::lsp::types::{Message, Notification, Request, RequestId, Response, ResponseError};
use crate::lsp::WIRE_TARGET;
use crate::server::lifecycle::State;
use crate::server::router::{HandlerResult, MethodKind, RequestContext, Route, Router};
use crate::server::session::ConnectionSession;
use anyhow::anyhow;
use futures::FutureExt;
use lsp_types::notification::{Cancel, Exit, Initialized, Notification as _};
use lsp_types::request::{Initialize, Request as _, Shutdown};
use lsp_types::{CancelParams, InitializeParams};
use serde_json::{json, Value};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Responses queued for the writer before senders are made to wait.
const OUTGOING_CHANNEL_BOUNDS: usize = 64;

/// How long cancelled handlers may take to answer once the peer hung up.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

type Unit = Pin<Box<dyn Future<Output = ()> + Send>>;

enum Flow {
    Continue,
    Exit,
}

enum Close {
    Exit,
    EndOfStream,
}

/// Channels and task sets a connection's units are scheduled on.
struct Units {
    outgoing: mpsc::Sender<Response>,
    serial: mpsc::UnboundedSender<Unit>,
    in_flight: JoinSet<()>,
}

impl Units {
    async fn reply(&self, response: Response) -> anyhow::Result<()> {
        self.outgoing
            .send(response)
            .await
            .map_err(|_| anyhow!("connection writer closed"))
    }

    fn run(&mut self, kind: MethodKind, unit: impl Future<Output = ()> + Send + 'static) {
        match kind {
            MethodKind::ReadOnly => {
                self.in_flight.spawn(unit);
            }
            MethodKind::Mutating => {
                if self.serial.send(Box::pin(unit)).is_err() {
                    warn!("serial worker is gone; dropping mutating call");
                }
            }
        }
    }
}

pub struct Dispatcher {
    router: Arc<Router>,
    session: Arc<ConnectionSession>,
}

impl Dispatcher {
    pub fn new(router: Arc<Router>, connection_id: u64) -> Self {
        Dispatcher {
            router,
            session: Arc::new(ConnectionSession::new(connection_id)),
        }
    }

    pub fn session(&self) -> &Arc<ConnectionSession> {
        &self.session
    }

    /// Serve `connection` until the peer hangs up or `exit` is processed.
    pub async fn serve(self, connection: Connection) -> anyhow::Result<()> {
        let Connection {
            mut reader,
            writer,
            peer,
        } = connection;
        let connection_id = self.session.id();
        debug!(connection = connection_id, %peer, "serving connection");

        let (outgoing, outgoing_rx) = mpsc::channel(OUTGOING_CHANNEL_BOUNDS);
        let writer_task = tokio::spawn(write_loop(writer, outgoing_rx, connection_id));

        let (serial, serial_rx) = mpsc::unbounded_channel();
        let mut units = Units {
            outgoing,
            serial,
            in_flight: JoinSet::new(),
        };
        units.in_flight.spawn(serial_loop(serial_rx));

        let outcome = loop {
            while let Some(joined) = units.in_flight.try_join_next() {
                log_join(joined);
            }

            let body = match reader.read().await {
                Ok(Some(body)) => body,
                Ok(None) => {
                    debug!(connection = connection_id, "peer closed the stream");
                    break Ok(Close::EndOfStream);
                }
                Err(e) => break Err(e),
            };
            trace!(
                target: WIRE_TARGET,
                connection = connection_id,
                "<- {}",
                String::from_utf8_lossy(&body)
            );

            match self.dispatch(&body, &mut units).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break Ok(Close::Exit),
                Err(e) => break Err(e),
            }
        };

        self.session.close();
        let Units {
            outgoing,
            serial,
            mut in_flight,
        } = units;
        drop(serial);

        if matches!(outcome, Ok(Close::Exit)) {
            in_flight.abort_all();
        } else {
            let drain = async {
                while let Some(joined) = in_flight.join_next().await {
                    log_join(joined);
                }
            };
            if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
                warn!(
                    connection = connection_id,
                    "handlers ignored cancellation; aborting them"
                );
                in_flight.abort_all();
            }
        }
        while in_flight.join_next().await.is_some() {}

        drop(outgoing);
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(connection = connection_id, error = %e, "writer stopped"),
            Err(e) => warn!(connection = connection_id, error = %e, "writer task failed"),
        }

        outcome.map(|_| ())
    }

    async fn dispatch(&self, body: &[u8], units: &mut Units) -> anyhow::Result<Flow> {
        let message = match parse_message(body) {
            Ok(message) => message,
            Err(ProtocolError::Parse(e)) => {
                warn!(connection = self.session.id(), error = %e, "unparsable message");
                units
                    .reply(Response::err(None, ResponseError::parse_error(e.to_string())))
                    .await?;
                return Ok(Flow::Continue);
            }
            Err(ProtocolError::InvalidRequest { id, reason }) => {
                warn!(connection = self.session.id(), %reason, "invalid message");
                units
                    .reply(Response::err(id, ResponseError::invalid_request(reason)))
                    .await?;
                return Ok(Flow::Continue);
            }
        };

        match message {
            Message::Request(request) => self.on_request(request, units).await,
            Message::Notification(notification) => Ok(self.on_notification(notification, units)),
            Message::Response(response) => {
                debug!(id = ?response.id, "ignoring response from client");
                Ok(Flow::Continue)
            }
        }
    }

    async fn on_request(&self, request: Request, units: &mut Units) -> anyhow::Result<Flow> {
        let Request {
            id, method, params, ..
        } = request;

        if let Err(e) = self.session.lifecycle().check(&method) {
            debug!(%id, %method, error = %e, "request rejected");
            units.reply(Response::err(Some(id), e.into())).await?;
            return Ok(Flow::Continue);
        }

        let mut flow = Flow::Continue;
        let response = match method.as_str() {
            Initialize::METHOD => self.initialize(id, params),
            Initialized::METHOD => Response::ok(id, Value::Null),
            Shutdown::METHOD => {
                self.session.lifecycle().shutdown();
                Response::ok(id, Value::Null)
            }
            Exit::METHOD => {
                self.exit();
                flow = Flow::Exit;
                Response::ok(id, Value::Null)
            }
            Cancel::METHOD => {
                self.cancel(params);
                Response::ok(id, Value::Null)
            }
            _ => {
                self.spawn_request(id, method, params, units).await?;
                return Ok(Flow::Continue);
            }
        };
        units.reply(response).await?;
        Ok(flow)
    }

    async fn spawn_request(
        &self,
        id: RequestId,
        method: String,
        params: Option<Value>,
        units: &mut Units,
    ) -> anyhow::Result<()> {
        let route = match self.router.route(&method) {
            Ok(route) => route.clone(),
            Err(e) => {
                debug!(%id, %method, "no handler for request");
                return units.reply(Response::err(Some(id), e)).await;
            }
        };
        let kind = route.kind;

        let registration = self.session.registry().register(id.clone());
        let cx = RequestContext::new(Some(id.clone()), &method, registration.token().clone());
        let outgoing = units.outgoing.clone();

        units.run(kind, async move {
            // a mutating call may have been cancelled while it sat in the queue
            let result = if cx.is_cancelled() {
                debug!(id = %registration.id(), "cancelled before it started");
                Err(ResponseError::request_cancelled())
            } else {
                match invoke(&route, cx.clone(), params).await {
                    Ok(_) if cx.is_cancelled() => Err(ResponseError::request_cancelled()),
                    other => other,
                }
            };
            registration.release();

            if let Err(e) = &result {
                debug!(id = ?cx.id(), method = cx.method(), error = %e, "request failed");
            }
            if outgoing.send(Response::from_result(id, result)).await.is_err() {
                debug!("connection closed before the response was sent");
            }
        });
        Ok(())
    }

    fn on_notification(&self, notification: Notification, units: &mut Units) -> Flow {
        let Notification { method, params, .. } = notification;

        // notifications never get an answer, not even an error
        if let Err(e) = self.session.lifecycle().check(&method) {
            debug!(%method, error = %e, "notification dropped");
            return Flow::Continue;
        }

        match method.as_str() {
            Initialized::METHOD => debug!("client finished initialization"),
            Shutdown::METHOD => self.session.lifecycle().shutdown(),
            Exit::METHOD => {
                self.exit();
                return Flow::Exit;
            }
            Cancel::METHOD => self.cancel(params),
            Initialize::METHOD => warn!("initialize sent as a notification; ignored"),
            _ => match self.router.route(&method) {
                Ok(route) => {
                    let route = route.clone();
                    let kind = route.kind;
                    let cx = RequestContext::new(None, &method, self.session.token().child_token());
                    units.run(kind, async move {
                        if let Err(e) = invoke(&route, cx.clone(), params).await {
                            warn!(method = cx.method(), error = %e, "notification handler failed");
                        }
                    });
                }
                Err(_) => debug!(%method, "no handler for notification"),
            },
        }
        Flow::Continue
    }

    fn initialize(&self, id: RequestId, params: Option<Value>) -> Response {
        if let Err(e) = self.session.lifecycle().initialize() {
            return Response::err(Some(id), e.into());
        }

        let client = params
            .and_then(|params| serde_json::from_value::<InitializeParams>(params).ok())
            .and_then(|params| params.client_info);
        match client {
            Some(client) => info!(
                connection = self.session.id(),
                client = %client.name,
                version = client.version.as_deref().unwrap_or("unknown"),
                "session initialized"
            ),
            None => info!(connection = self.session.id(), "session initialized"),
        }

        let capabilities = match serde_json::to_value(self.router.capabilities()) {
            Ok(capabilities) => capabilities,
            Err(e) => return Response::err(Some(id), ResponseError::internal(e.to_string())),
        };
        Response::ok(
            id,
            json!({
                "capabilities": capabilities,
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )
    }

    fn exit(&self) {
        match self.session.lifecycle().exit() {
            State::ShuttingDown => info!(connection = self.session.id(), "exit after shutdown"),
            state => warn!(
                connection = self.session.id(),
                ?state,
                "exit without shutdown; terminating"
            ),
        }
    }

    fn cancel(&self, params: Option<Value>) {
        let Some(params) = params else {
            debug!("cancel without params ignored");
            return;
        };
        match serde_json::from_value::<CancelParams>(params) {
            Ok(params) => {
                self.session.registry().cancel(&params.id.into());
            }
            Err(e) => debug!(error = %e, "malformed cancel params ignored"),
        }
    }
}

/// Run a handler, turning a panic into an internal error so it never leaves
/// the unit.
async fn invoke(route: &Route, cx: RequestContext, params: Option<Value>) -> HandlerResult {
    let method = cx.method().to_owned();
    match AssertUnwindSafe(route.handler.handle(cx, params))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(%method, panic = message, "handler panicked");
            Err(ResponseError::internal(format!("handler panicked: {}", message)))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if !e.is_cancelled() {
            error!(error = %e, "dispatch unit failed");
        }
    }
}

async fn serial_loop(mut units: mpsc::UnboundedReceiver<Unit>) {
    while let Some(unit) = units.recv().await {
        unit.await;
    }
}

async fn write_loop(
    mut writer: Box<dyn MessageWriter>,
    mut outgoing: mpsc::Receiver<Response>,
    connection: u64,
) -> anyhow::Result<()> {
    while let Some(response) = outgoing.recv().await {
        let body = serde_json::to_string(&response)?;
        trace!(target: WIRE_TARGET, connection, "-> {}", body);
        writer.write(&body).await?;
    }
    writer.close().await
}
