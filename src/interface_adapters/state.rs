use crate::use_cases::Broker;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    // Registry and router for browser clients.
    pub web_broker: Arc<Broker>,
}
