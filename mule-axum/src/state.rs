use std::sync::Arc;

use mule_broker::Broker;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
}

impl AppState {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}
