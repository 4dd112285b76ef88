/// WebSocket 客户端
///
/// Agent 连接到编排端，注册后并发处理卷发布请求；连接断开后定时重连

use common::models::constants;
use common::ws_rpc::{methods, RegisterRequest, RpcMessage};
use common::MessageType;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::handler::RpcHandlerRegistry;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// WebSocket 客户端
#[derive(Clone)]
pub struct WsClient {
    /// 编排端地址
    server_url: String,

    node_id: String,
    hostname: String,

    /// RPC 处理器注册表
    handler_registry: Arc<RpcHandlerRegistry>,

    /// 重连间隔（秒）
    reconnect_interval: u64,
}

impl WsClient {
    pub fn new(
        server_url: impl Into<String>,
        node_id: impl Into<String>,
        hostname: impl Into<String>,
        handler_registry: Arc<RpcHandlerRegistry>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            node_id: node_id.into(),
            hostname: hostname.into(),
            handler_registry,
            reconnect_interval: constants::DEFAULT_RECONNECT_INTERVAL,
        }
    }

    /// 启动客户端（连接并保持）
    pub async fn run(&self) -> Result<(), BoxError> {
        loop {
            info!("Connecting to {}", self.server_url);

            match self.connect_and_run().await {
                Ok(_) => info!("Connection closed"),
                Err(e) => error!("Connection error: {}", e),
            }

            warn!("Reconnecting in {}s", self.reconnect_interval);
            tokio::time::sleep(Duration::from_secs(self.reconnect_interval)).await;
        }
    }

    /// 连接并运行
    async fn connect_and_run(&self) -> Result<(), BoxError> {
        let (ws_stream, _) = connect_async(&self.server_url).await?;
        info!("WebSocket connected");

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let register_req = RegisterRequest {
            node_id: self.node_id.clone(),
            hostname: self.hostname.clone(),
            driver_name: constants::DRIVER_NAME.to_string(),
        };
        let register_msg = RpcMessage::request(methods::REGISTER, serde_json::to_value(&register_req)?);
        ws_sender.send(Message::Text(register_msg.to_json()?)).await?;
        debug!("Sent register request");

        match ws_receiver.next().await {
            Some(msg) => {
                let rpc_msg = Self::parse_message(msg?)?;
                if !rpc_msg.is_success() {
                    let reason = rpc_msg
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "unexpected reply".to_string());
                    return Err(format!("registration rejected: {}", reason).into());
                }
                info!("Registered as {}", self.node_id);
            }
            None => return Err("connection closed before registration".into()),
        }

        // 所有响应经由同一个发送任务写回
        let (tx, mut rx) = mpsc::unbounded_channel::<RpcMessage>();

        let send_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let json = match msg.to_json() {
                    Ok(j) => j,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };

                if let Err(e) = ws_sender.send(Message::Text(json)).await {
                    error!("Failed to send message: {}", e);
                    break;
                }
            }
            debug!("Send task finished");
        });

        let handler_registry = self.handler_registry.clone();
        let recv_task = tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                match result {
                    Ok(msg) => {
                        // 每个请求独立处理，长时间的备份不阻塞其他卷
                        let handler_registry = handler_registry.clone();
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            Self::handle_message(msg, &handler_registry, &tx).await;
                        });
                    }
                    Err(e) => {
                        error!("Failed to receive message: {}", e);
                        break;
                    }
                }
            }
            debug!("Receive task finished");
        });

        tokio::select! {
            _ = send_task => debug!("Send task ended"),
            _ = recv_task => debug!("Receive task ended"),
        }

        Ok(())
    }

    fn parse_message(msg: Message) -> Result<RpcMessage, BoxError> {
        match msg {
            Message::Text(text) => Ok(RpcMessage::from_json(&text)?),
            Message::Binary(data) => {
                let text = String::from_utf8(data)?;
                Ok(RpcMessage::from_json(&text)?)
            }
            _ => Err("unsupported message type".into()),
        }
    }

    async fn handle_message(
        msg: Message,
        handler_registry: &RpcHandlerRegistry,
        tx: &mpsc::UnboundedSender<RpcMessage>,
    ) {
        let rpc_msg = match msg {
            Message::Close(_) => {
                warn!("Server closed the connection");
                return;
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return,
            other => match Self::parse_message(other) {
                Ok(msg) => msg,
                Err(e) => {
                    error!("Failed to parse message: {}", e);
                    return;
                }
            },
        };

        debug!(
            "Received message: type={:?}, method={:?}",
            rpc_msg.message_type, rpc_msg.method
        );

        match rpc_msg.message_type {
            MessageType::Request => {
                let response = handler_registry.handle_request(rpc_msg).await;
                if let Err(e) = tx.send(response) {
                    error!("Failed to queue response: {}", e);
                }
            }
            MessageType::Response | MessageType::Notification => {
                debug!("Ignoring {:?} {}", rpc_msg.message_type, rpc_msg.id);
            }
        }
    }
}
