use std::sync::Arc;

use crate::application::service::ServiceContext;

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<ServiceContext>,
}

impl ApiState {
    pub fn new(service: Arc<ServiceContext>) -> Self {
        Self { service }
    }

    pub fn session_cookie(&self) -> &str {
        &self.service.options.session_cookie
    }
}
