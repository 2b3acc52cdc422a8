// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! WebSocket server
//!
//! One task per connection. A connection owns its session state; while a
//! turn or agent task runs, that state moves into a worker task and comes
//! back when it finishes, so a session never has two turns in flight.
//! Disconnecting aborts the worker.

pub mod protocol;
pub mod session;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::agent::runner::AgentRunner;
use crate::agent::AgentEvent;
use crate::chat::{TurnEngine, TurnEvent, TurnOutcome, TurnStatus};
use crate::config::Settings;
use crate::error::Result;
use crate::llm::message::{Conversation, Message};
use crate::llm::provider::LlmProvider;
use crate::llm::ProviderFactory;
use crate::retrieval::{QueryCache, RetrievalClient};
use crate::server::protocol::{
    AgentStepInfo, AgentStepOutcome, ChatResult, ChatStartedData, ClientCommand, EvaluationInfo,
    ParsedCommand, ServerEvent, ToolCallInfo, ToolCallOutcome,
};
use crate::server::session::{Session, SessionRegistry};

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

/// The WebSocket front end
pub struct Server {
    settings: Arc<Settings>,
    retrieval: Arc<RetrievalClient>,
    registry: Arc<SessionRegistry>,
    provider_override: Option<Arc<dyn LlmProvider>>,
}

impl Server {
    pub fn new(settings: Settings) -> Self {
        let retrieval = Arc::new(RetrievalClient::new(&settings.retrieval));
        Self {
            settings: Arc::new(settings),
            retrieval,
            registry: Arc::new(SessionRegistry::new()),
            provider_override: None,
        }
    }

    /// Serve every model through one fixed provider, bypassing the factory
    pub fn with_provider(settings: Settings, provider: Arc<dyn LlmProvider>) -> Self {
        let mut server = Self::new(settings);
        server.provider_override = Some(provider);
        server
    }

    /// Bind and serve until ctrl-c
    pub async fn run(self) -> Result<()> {
        let address = format!(
            "{}:{}",
            self.settings.server.host, self.settings.server.port
        );
        let listener = TcpListener::bind(&address).await?;
        info!(%address, "listening");

        if !self.retrieval.is_healthy().await {
            warn!("retrieval service is not reachable, searches will degrade");
        }

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let settings = Arc::clone(&self.settings);
                            let retrieval = Arc::clone(&self.retrieval);
                            let registry = Arc::clone(&self.registry);
                            let provider = self.provider_override.clone();
                            tokio::spawn(async move {
                                handle_connection(
                                    stream, peer, settings, retrieval, registry, provider,
                                )
                                .await;
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }
        Ok(())
    }
}

/// What a finished worker hands back to the connection loop
enum TaskDone {
    Chat {
        outcome: Result<TurnOutcome>,
        conversation: Conversation,
        cache: QueryCache,
    },
    /// The report itself arrives through the agent event channel
    Agent { cache: QueryCache },
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    settings: Arc<Settings>,
    retrieval: Arc<RetrievalClient>,
    registry: Arc<SessionRegistry>,
    provider_override: Option<Arc<dyn LlmProvider>>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };
    let (mut sink, mut ws_rx) = ws.split();

    let mut session = Session::new(settings.providers.anthropic.default_model.clone());
    let active_sessions = registry.register(session.id, peer.to_string());
    info!(%peer, session_id = %session.id, active_sessions, "client connected");

    if !send(
        &mut sink,
        ServerEvent::ConnectionEstablished {
            session_id: session.id.to_string(),
        },
    )
    .await
    {
        return;
    }

    let (turn_tx, mut turn_rx) = mpsc::unbounded_channel::<TurnEvent>();
    let (agent_tx, mut agent_rx) = mpsc::unbounded_channel::<AgentEvent>();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<TaskDone>();
    let mut active: Option<JoinHandle<()>> = None;

    let mut ping = tokio::time::interval(Duration::from_secs(
        settings.server.ping_interval_secs.max(1),
    ));
    ping.tick().await;
    let ping_timeout = Duration::from_secs(settings.server.ping_timeout_secs.max(1));
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let Some(Ok(frame)) = frame else {
                    debug!(%peer, "client disconnected");
                    break;
                };
                match frame {
                    WsMessage::Text(text) => {
                        if !handle_frame(
                            &text,
                            &mut sink,
                            &mut session,
                            &mut active,
                            &settings,
                            &retrieval,
                            &provider_override,
                            &turn_tx,
                            &agent_tx,
                            &done_tx,
                        )
                        .await
                        {
                            break;
                        }
                    }
                    WsMessage::Ping(payload) => {
                        if sink.send(WsMessage::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    WsMessage::Pong(_) => {
                        pong_deadline = None;
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = turn_rx.recv() => {
                if !send(&mut sink, map_turn_event(event)).await {
                    break;
                }
            }
            Some(event) = agent_rx.recv() => {
                if !send(&mut sink, map_agent_event(event)).await {
                    break;
                }
            }
            Some(done) = done_rx.recv() => {
                // The worker queues its final progress events before the
                // completion, on separate channels. Flush those first so
                // the terminal event is always the last one sent.
                let mut flushed = true;
                while let Ok(event) = turn_rx.try_recv() {
                    if !send(&mut sink, map_turn_event(event)).await {
                        flushed = false;
                        break;
                    }
                }
                while let Ok(event) = agent_rx.try_recv() {
                    if !send(&mut sink, map_agent_event(event)).await {
                        flushed = false;
                        break;
                    }
                }
                if !flushed {
                    break;
                }

                active = None;
                match done {
                    TaskDone::Chat { outcome, conversation, cache } => {
                        session.conversation = conversation;
                        session.cache = cache;
                        let event = match outcome {
                            Ok(outcome) => {
                                let (status, reason) = match outcome.status {
                                    TurnStatus::Complete => ("complete".to_string(), None),
                                    TurnStatus::Aborted(reason) => {
                                        ("aborted".to_string(), Some(reason))
                                    }
                                };
                                ServerEvent::ChatComplete {
                                    result: ChatResult {
                                        content: outcome.content,
                                        status,
                                        reason,
                                    },
                                }
                            }
                            Err(e) => {
                                error!(error = %e, "chat turn failed");
                                ServerEvent::Error {
                                    error: e.to_string(),
                                }
                            }
                        };
                        if !send(&mut sink, event).await {
                            break;
                        }
                    }
                    TaskDone::Agent { cache } => {
                        session.cache = cache;
                    }
                }
            }
            _ = ping.tick() => {
                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
                if pong_deadline.is_none() {
                    pong_deadline = Some(tokio::time::Instant::now() + ping_timeout);
                }
            }
            () = wait_deadline(pong_deadline), if pong_deadline.is_some() => {
                warn!(%peer, session_id = %session.id, "client stopped answering pings");
                break;
            }
        }
    }

    if let Some(handle) = active {
        handle.abort();
        debug!(session_id = %session.id, "aborted in-flight turn on disconnect");
    }
    let active_sessions = registry.unregister(&session.id);
    info!(%peer, session_id = %session.id, active_sessions, "connection closed");
}

async fn wait_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Handle one inbound text frame. Returns false when the sink is gone.
#[allow(clippy::too_many_arguments)]
async fn handle_frame(
    text: &str,
    sink: &mut WsSink,
    session: &mut Session,
    active: &mut Option<JoinHandle<()>>,
    settings: &Arc<Settings>,
    retrieval: &Arc<RetrievalClient>,
    provider_override: &Option<Arc<dyn LlmProvider>>,
    turn_tx: &mpsc::UnboundedSender<TurnEvent>,
    agent_tx: &mpsc::UnboundedSender<AgentEvent>,
    done_tx: &mpsc::UnboundedSender<TaskDone>,
) -> bool {
    let command = match protocol::parse_command(text) {
        ParsedCommand::Command(command) => command,
        ParsedCommand::InvalidJson => {
            return send(
                sink,
                ServerEvent::Error {
                    error: "Invalid JSON format".to_string(),
                },
            )
            .await;
        }
        ParsedCommand::Unknown(message_type) => {
            return send(
                sink,
                ServerEvent::Error {
                    error: format!("Unknown message type: {}", message_type),
                },
            )
            .await;
        }
    };

    match command {
        ClientCommand::Ping => send(sink, ServerEvent::Pong).await,

        ClientCommand::ChatStart { data } => {
            if active.is_some() {
                return send(
                    sink,
                    ServerEvent::Error {
                        error: "A turn is already in progress".to_string(),
                    },
                )
                .await;
            }

            let model = session.resolve_model(data.model);
            let engine = match build_engine(&model, settings, retrieval, provider_override) {
                Ok(engine) => engine,
                Err(e) => {
                    return send(sink, ServerEvent::Error { error: e.to_string() }).await;
                }
            };

            if let Some(history) = data.conversation {
                session.replace_history(&history);
            }
            session.conversation.push(Message::user(data.message));

            if !send(
                sink,
                ServerEvent::ChatStarted {
                    data: ChatStartedData {
                        model: model.clone(),
                    },
                },
            )
            .await
            {
                return false;
            }

            let mut conversation = std::mem::replace(&mut session.conversation, Conversation::new());
            let mut cache = std::mem::take(&mut session.cache);
            let turn_tx = turn_tx.clone();
            let done_tx = done_tx.clone();
            *active = Some(tokio::spawn(async move {
                let outcome = engine
                    .run_turn(&model, &mut conversation, &mut cache, Some(&turn_tx))
                    .await;
                let _ = done_tx.send(TaskDone::Chat {
                    outcome,
                    conversation,
                    cache,
                });
            }));
            true
        }

        ClientCommand::AgentAutonomousTask { data } => {
            if active.is_some() {
                return send(
                    sink,
                    ServerEvent::Error {
                        error: "A turn is already in progress".to_string(),
                    },
                )
                .await;
            }

            let model = session.resolve_model(data.model);
            let engine = match build_engine(&model, settings, retrieval, provider_override) {
                Ok(engine) => engine,
                Err(e) => {
                    return send(sink, ServerEvent::Error { error: e.to_string() }).await;
                }
            };

            let runner = AgentRunner::new(engine, settings);
            let task = data.task;
            let max_iterations = data.max_iterations;
            let mut cache = std::mem::take(&mut session.cache);
            let turn_tx = turn_tx.clone();
            let agent_tx = agent_tx.clone();
            let done_tx = done_tx.clone();
            *active = Some(tokio::spawn(async move {
                let result = runner
                    .run(
                        &task,
                        &model,
                        max_iterations,
                        &mut cache,
                        Some(&agent_tx),
                        Some(&turn_tx),
                    )
                    .await;
                if let Err(e) = result {
                    error!(error = %e, "agent task failed unexpectedly");
                }
                let _ = done_tx.send(TaskDone::Agent { cache });
            }));
            true
        }
    }
}

fn build_engine(
    model: &str,
    settings: &Arc<Settings>,
    retrieval: &Arc<RetrievalClient>,
    provider_override: &Option<Arc<dyn LlmProvider>>,
) -> Result<Arc<TurnEngine>> {
    let provider = match provider_override {
        Some(provider) => Arc::clone(provider),
        None => ProviderFactory::create(model, settings)?,
    };
    Ok(Arc::new(TurnEngine::new(
        provider,
        Arc::clone(retrieval),
        settings,
    )))
}

fn map_turn_event(event: TurnEvent) -> ServerEvent {
    match event {
        TurnEvent::ContentDelta { delta, content } => ServerEvent::ContentDelta { delta, content },
        TurnEvent::ToolCallStart { calls } => ServerEvent::ToolCallStart {
            tool_calls: calls
                .into_iter()
                .map(|call| ToolCallInfo {
                    id: call.id,
                    name: call.name,
                    input: Some(call.input),
                })
                .collect(),
        },
        TurnEvent::ToolCallComplete {
            id,
            name,
            content,
            success,
            from_cache,
        } => ServerEvent::ToolCallComplete {
            tool_call: ToolCallInfo {
                id,
                name,
                input: None,
            },
            result: ToolCallOutcome {
                success,
                content,
                from_cache,
            },
        },
    }
}

fn map_agent_event(event: AgentEvent) -> ServerEvent {
    match event {
        AgentEvent::PlanCreated { plan } => ServerEvent::AgentPlanCreated { plan },
        AgentEvent::StepStarted { index, description } => ServerEvent::AgentStepStarted {
            step: AgentStepInfo { index, description },
        },
        AgentEvent::StepCompleted {
            index,
            description,
            success,
            summary,
        } => ServerEvent::AgentStepCompleted {
            step: AgentStepInfo { index, description },
            result: AgentStepOutcome { success, summary },
        },
        AgentEvent::EvaluationComplete {
            decision,
            reasoning,
        } => ServerEvent::AgentEvaluationComplete {
            evaluation: EvaluationInfo {
                decision: decision_name(decision).to_string(),
                reasoning,
            },
        },
        AgentEvent::TaskComplete { report } => ServerEvent::AgentTaskComplete { result: report },
    }
}

fn decision_name(decision: crate::agent::EvaluationDecision) -> &'static str {
    match decision {
        crate::agent::EvaluationDecision::Continue => "continue",
        crate::agent::EvaluationDecision::Replan => "replan",
        crate::agent::EvaluationDecision::Stop => "stop",
    }
}

/// Send one event; false means the connection is gone
async fn send(sink: &mut WsSink, event: ServerEvent) -> bool {
    let message = match event.to_message() {
        Ok(message) => message,
        Err(e) => {
            error!(error = %e, "failed to serialize server event");
            return true;
        }
    };
    sink.send(WsMessage::Text(message)).await.is_ok()
}
