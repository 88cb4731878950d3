mod handlers;
mod routes;
mod static_files;
mod ws;

pub use routes::create_router;
pub use static_files::StaticAssets;
pub use ws::ws_handler;
