use std::sync::Arc;

use vyn_db::Database;
use vyn_gateway::delivery::DeliveryRouter;
use vyn_gateway::registry::ConnectionRegistry;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub router: DeliveryRouter,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, registry: ConnectionRegistry, jwt_secret: String) -> AppState {
        Arc::new(Self {
            router: DeliveryRouter::new(db.clone(), registry),
            db,
            jwt_secret,
        })
    }
}
