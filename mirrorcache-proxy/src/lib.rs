pub mod background;
pub mod cache_engine;
pub mod connect_tunnel;
pub mod entry;
pub mod router;
pub mod state;

pub use cache_engine::ResponseBody;
pub use state::AppState;
