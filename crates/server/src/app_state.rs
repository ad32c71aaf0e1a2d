use std::{sync::Arc, time::Duration};

use server_api::{ApiContext, TokenExchanger};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) exchanger: Arc<dyn TokenExchanger>,
    pub(crate) credential_write_delay: Duration,
}
