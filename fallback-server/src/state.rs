use crate::collaborators::InMemoryMountConfigProvider;
use crate::config::Config;
use crate::registry::Registry;
use fallback_core::{FhCache, GlobalMeter, MimeRegistry};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use fallback_core::{AuthCollaborator, MoveCollaborator};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Arc<FhCache>,
    pub registry: Arc<Registry>,
    pub mount_config: Arc<InMemoryMountConfigProvider>,
    pub mime: Arc<MimeRegistry>,
    pub global_meter: Arc<GlobalMeter>,
    pub global_slowdown: Arc<AtomicBool>,
    pub mover: Arc<dyn MoveCollaborator>,
    pub auth: Arc<dyn AuthCollaborator>,
}
