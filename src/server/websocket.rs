use crate::agent::CookingAssistant;
use crate::models::websocket::{ ClientMessage, ServerMessage };

use std::collections::HashMap;
use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use tokio_tungstenite::{ accept_hdr_async, WebSocketStream };
use tokio_tungstenite::tungstenite::handshake::server::{ ErrorResponse, Request, Response };
use tokio_tungstenite::tungstenite::protocol::Message;

use lazy_static::lazy_static;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };

use chrono::Utc;
use hmac::{ Hmac, Mac };
use sha2::Sha256;
use url::form_urlencoded;

use futures::{ Sink, SinkExt, StreamExt };
use log::{ debug, error, info, warn };
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const MAX_MESSAGE_SIZE: usize = 1 * 1024 * 1024;
const MAX_CLOCK_SKEW_SECS: i64 = 300;
const MAX_CONVERSATION_ID_LEN: usize = 64;

lazy_static! {
    static ref CONNECTION_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> =
        RateLimiter::direct(Quota::per_second(NonZeroU32::new(10).unwrap()));
}

/// Hex HMAC-SHA256 of the timestamp, keyed with the server API key.
pub fn sign_timestamp(secret: &str, ts: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e|
        format!("Invalid HMAC key: {}", e)
    )?;
    mac.update(ts.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks the `ts`/`sig` query parameters against `secret`.
pub fn verify_request(
    secret: &str,
    params: &HashMap<String, String>,
    now: i64
) -> Result<(), &'static str> {
    let ts = params.get("ts").or_else(|| params.get("X-Api-Ts"));
    let sig = params.get("sig").or_else(|| params.get("X-Api-Sign"));
    let (Some(ts), Some(sig)) = (ts, sig) else {
        return Err("missing ts/sig");
    };

    let ts_i: i64 = ts.parse().map_err(|_| "bad timestamp")?;
    if (now - ts_i).abs() > MAX_CLOCK_SKEW_SECS {
        return Err("timestamp out of range");
    }
    match sign_timestamp(secret, ts) {
        Ok(expected) if expected.eq_ignore_ascii_case(sig) => Ok(()),
        _ => Err("bad signature"),
    }
}

// A resumed conversation id must look like one we would have issued.
fn requested_conversation_id(params: &HashMap<String, String>) -> Option<String> {
    let id = params.get("conversation_id")?.trim();
    let valid =
        !id.is_empty() &&
        id.len() <= MAX_CONVERSATION_ID_LEN &&
        id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid { Some(id.to_string()) } else { None }
}

fn query_params(req: &Request) -> HashMap<String, String> {
    let qs = req.uri().query().unwrap_or("");
    form_urlencoded::parse(qs.as_bytes()).into_owned().collect()
}

pub async fn start_ws_server(
    addr: &str,
    assistant: Arc<CookingAssistant>,
    api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("WS server listening on: {}", addr);
    serve_ws(listener, assistant, api_key).await
}

/// Accepts WebSocket clients on an already bound listener.
pub async fn serve_ws(
    listener: TcpListener,
    assistant: Arc<CookingAssistant>,
    api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    if api_key.as_deref().map_or(true, str::is_empty) {
        warn!("SERVER_API_KEY not set, WebSocket clients are not authenticated.");
    }

    loop {
        let (stream, peer) = listener.accept().await?;

        if CONNECTION_LIMITER.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let assistant_clone = Arc::clone(&assistant);
        let required_api_key = api_key.clone();

        tokio::spawn(async move {
            if let Err(e) = process_connection(peer, stream, assistant_clone, required_api_key).await {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

fn reject(reason: &str) -> ErrorResponse {
    let mut res = ErrorResponse::new(Some(reason.to_string()));
    *res.status_mut() = tokio_tungstenite::tungstenite::http::StatusCode::UNAUTHORIZED;
    res
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    assistant: Arc<CookingAssistant>,
    required_api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let mut resumed_id: Option<String> = None;

    let auth_callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let params = query_params(req);
        resumed_id = requested_conversation_id(&params);

        let secret = match &required_api_key {
            Some(k) if !k.is_empty() => k,
            _ => {
                return Ok(response);
            }
        };
        match verify_request(secret, &params, Utc::now().timestamp()) {
            Ok(()) => Ok(response),
            Err(reason) => {
                warn!("Rejected WebSocket handshake from {}: {}", peer, reason);
                Err(reject(reason))
            }
        }
    };

    match accept_hdr_async(stream, auth_callback).await {
        Ok(ws) => {
            let conversation_id = resumed_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            handle_connection(peer, ws, assistant, conversation_id).await;
            Ok(())
        }
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            Err(Box::new(e) as _)
        }
    }
}

async fn send_json<T>(tx: &mut T, msg: &ServerMessage) -> Result<(), Box<dyn Error + Send + Sync>>
    where T: Sink<Message> + Unpin, T::Error: Error + Send + Sync + 'static
{
    let json = serde_json::to_string(msg)?;
    tx.send(Message::Text(json)).await?;
    Ok(())
}

pub async fn handle_connection<S>(
    peer: SocketAddr,
    websocket: WebSocketStream<S>,
    assistant: Arc<CookingAssistant>,
    conversation_id: String
)
    where S: AsyncRead + AsyncWrite + Unpin
{
    info!("Assigned conversation ID {} to {}", conversation_id, peer);
    let (mut tx, mut rx) = websocket.split();

    let welcome = ServerMessage::Welcome { conversation_id: conversation_id.clone() };
    if let Err(e) = send_json(&mut tx, &welcome).await {
        error!("Error sending welcome to {}: {}", peer, e);
        return;
    }

    while let Some(msg) = rx.next().await {
        let message = match msg {
            Ok(message) => message,
            Err(e) => {
                error!("Error receiving message from {}: {}", peer, e);
                break;
            }
        };

        if message.len() > MAX_MESSAGE_SIZE {
            warn!("Message from {} exceeds size limit ({} > {})", peer, message.len(), MAX_MESSAGE_SIZE);
            let error_msg = ServerMessage::Error { message: "Message too large".to_string() };
            if send_json(&mut tx, &error_msg).await.is_err() {
                error!("Failed to send size limit error to {}", peer);
            }
            break;
        }

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                info!("Client {} closed the connection", peer);
                break;
            }
            Message::Ping(data) => {
                if tx.send(Message::Pong(data)).await.is_err() {
                    break;
                }
                continue;
            }
            _ => {
                continue;
            }
        };

        let reply = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Chat { content }) if content.trim().is_empty() => {
                send_json(&mut tx, &(ServerMessage::Error { message: "Empty message".to_string() })).await
            }
            Ok(ClientMessage::Chat { content }) => {
                handle_chat(&mut tx, &assistant, &conversation_id, &content).await
            }
            Ok(ClientMessage::History) => {
                match assistant.history(&conversation_id).await {
                    Ok(conversation) => {
                        send_json(&mut tx, &(ServerMessage::History { messages: conversation.messages })).await
                    }
                    Err(e) => {
                        error!("History lookup failed for {}: {}", conversation_id, e);
                        send_json(
                            &mut tx,
                            &(ServerMessage::Error { message: "Could not load history".to_string() })
                        ).await
                    }
                }
            }
            Err(e) => {
                debug!("Unparseable message from {}: {}", peer, e);
                send_json(&mut tx, &(ServerMessage::Error { message: format!("Invalid message: {}", e) })).await
            }
        };

        if let Err(e) = reply {
            error!("Error sending to {}: {}", peer, e);
            break;
        }
    }

    info!("WebSocket connection closed: {}", peer);
}

async fn handle_chat<T>(
    tx: &mut T,
    assistant: &CookingAssistant,
    conversation_id: &str,
    content: &str
) -> Result<(), Box<dyn Error + Send + Sync>>
    where T: Sink<Message> + Unpin, T::Error: Error + Send + Sync + 'static
{
    send_json(tx, &ServerMessage::Processing).await?;

    let (frag_tx, mut frag_rx) = mpsc::channel::<String>(32);
    let turn_fut = assistant.respond_streaming(conversation_id, content, frag_tx);
    let forward_fut = async {
        let mut result = Ok(());
        while let Some(fragment) = frag_rx.recv().await {
            if result.is_ok() {
                result = send_json(&mut *tx, &(ServerMessage::Partial { content: fragment })).await;
            }
        }
        result
    };
    let (turn, forwarded) = tokio::join!(turn_fut, forward_fut);
    forwarded?;

    if let Some(err) = turn.error {
        send_json(tx, &(ServerMessage::Error { message: err })).await?;
    }
    let response = ServerMessage::Response {
        content: turn.response,
        timestamp: Utc::now().timestamp(),
    };
    send_json(tx, &response).await
}
