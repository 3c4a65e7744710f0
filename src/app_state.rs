use std::sync::Arc;

use crate::{
    api::payments::PaymentGateway,
    config::{FeeConfig, PollingConfig},
    push::{AlertBoard, MultiPublisher, Publisher, WsHub},
    store::Store,
};

/// Shared handles passed to every route, consumer and background task.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub hub: WsHub,
    pub alerts: AlertBoard,
    /// The hub, plus any extra transports registered with [`AppState::with_publisher`].
    pub publisher: Arc<dyn Publisher>,
    pub fees: FeeConfig,
    pub polling: PollingConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>) -> Self {
        let hub = WsHub::new();
        Self {
            store,
            gateway,
            publisher: Arc::new(hub.clone()),
            hub,
            alerts: AlertBoard::new(),
            fees: FeeConfig::default(),
            polling: PollingConfig::default(),
        }
    }

    /// Fans pushes out to `extra` as well as to connected WebSocket sessions.
    pub fn with_publisher(mut self, extra: Arc<dyn Publisher>) -> Self {
        self.publisher = Arc::new(MultiPublisher::new(vec![
            Arc::new(self.hub.clone()),
            extra,
        ]));
        self
    }

    pub fn with_fees(mut self, fees: FeeConfig) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }
}
