use std::{net::SocketAddr, sync::Arc, time::Duration};

use mxbus_error::{context, BrokerError, MxResult};
use tokio::{
    net::TcpListener,
    select,
    sync::Semaphore,
    task::JoinSet,
    time::sleep,
};
use tracing::{debug, error, info, warn};

use super::{connection::ConnectionHandler, wire::DEFAULT_MAX_FRAME_LEN};
use crate::pubsub::{BroadcastEcho, Router, RouterStatsSnapshot};
use crate::network::connection_state::ComponentSnapshot;

/// Конфигурация брокера.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Имя шины (для баннера и логов)
    pub name: String,
    pub host: String,
    /// `0` - выбрать свободный порт
    pub port: u16,
    /// Максимальное кол-во одновременных соединений
    pub max_connections: usize,
    /// Сколько ждать `Hello` после подключения
    pub handshake_timeout: Duration,
    /// Ёмкость очереди исходящих кадров каждого соединения
    pub outbound_queue_frames: usize,
    pub max_frame_len: usize,
    /// Таймаут записи одного кадра в сокет
    pub write_timeout: Duration,
    pub broadcast_echo: BroadcastEcho,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            name: "mxbus".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            max_connections: 1024,
            handshake_timeout: Duration::from_secs(5),
            outbound_queue_frames: 1024,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            write_timeout: Duration::from_secs(10),
            broadcast_echo: BroadcastEcho::default(),
        }
    }
}

/// Брокер: слушающий сокет и маршрутизатор.
#[derive(Debug)]
pub struct Broker {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Arc<Router>,
    config: Arc<BrokerConfig>,
}

/// Дешёвый клонируемый доступ к работающему брокеру.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    router: Arc<Router>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Broker {
    /// Занимает адрес `host:port` из конфигурации.
    pub async fn bind(config: BrokerConfig) -> MxResult<Self> {
        let address = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| BrokerError::Bind {
                address: address.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = context!(listener.local_addr(), "reading local address of {}", address)?;

        info!(bus = %config.name, %local_addr, echo = %config.broadcast_echo, "Broker listening");

        Ok(Self {
            listener,
            local_addr,
            router: Arc::new(Router::new(config.broadcast_echo)),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn handle(&self) -> BrokerHandle {
        BrokerHandle {
            router: self.router.clone(),
        }
    }

    /// Цикл приёма соединений.
    ///
    /// Возвращается после сигнала остановки (`BrokerHandle::shutdown` или
    /// кадр `Quit`), дождавшись завершения задач соединений.
    pub async fn run(self) -> MxResult<()> {
        let limiter = Arc::new(Semaphore::new(self.config.max_connections));
        let mut tasks = JoinSet::new();
        let mut shutdown = self.router.shutdown_signal();

        loop {
            if *shutdown.borrow() {
                break;
            }

            select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            sleep(Duration::from_millis(50)).await;
                            continue;
                        }
                    };

                    let Ok(permit) = limiter.clone().try_acquire_owned() else {
                        warn!(%peer, max = self.config.max_connections, "Too many connections, dropping");
                        drop(socket);
                        continue;
                    };
                    if let Err(e) = socket.set_nodelay(true) {
                        debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
                    }

                    let router = self.router.clone();
                    let config = self.config.clone();
                    tasks.spawn(async move {
                        ConnectionHandler::serve(socket, peer, router, config).await;
                        drop(permit);
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Connection task panicked");
                        }
                    }
                }
            }
        }

        info!(connections = tasks.len(), "Broker shutting down");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!(error = %e, "Connection task panicked");
                }
            }
        }
        info!("Broker stopped");
        Ok(())
    }
}

impl BrokerHandle {
    /// Просит брокер остановиться.
    pub fn shutdown(&self) {
        self.router.request_shutdown();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.router.is_shutting_down()
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.router.stats()
    }

    pub fn components(&self) -> Vec<ComponentSnapshot> {
        self.router.components()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
