mod chat;
mod clock;
mod config;
mod dispatch;
mod game;
mod messages;
mod notify;
mod presence;
mod server;
mod snl;
mod store;
mod ttt;

use std::sync::Arc;

use log::info;
use serde::Deserialize;
use warp::Filter;

use config::Config;
use notify::LogNotifier;
use server::Server;
use store::InMemoryMessageStore;

#[derive(Deserialize)]
struct WsQuery {
    username: String,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::from_env();
    let store = Arc::new(InMemoryMessageStore::new());
    let notifier = Arc::new(LogNotifier);
    let server = Arc::new(Server::new(store, notifier, config.notify_even_if_online));

    let ws_route = warp::path("ws")
        .and(warp::query::<WsQuery>())
        .and(warp::ws())
        .map(move |query: WsQuery, ws: warp::ws::Ws| {
            let server = server.clone();
            ws.on_upgrade(move |socket| {
                let server = server.clone();
                async move {
                    server.handle_connection(socket, &query.username).await;
                }
            })
        });

    let routes = ws_route.with(warp::cors().allow_any_origin());

    match config.tls_pair() {
        Some((cert, key)) => {
            info!("listening on wss://{}/ws", config.bind_addr);
            warp::serve(routes)
                .tls()
                .cert_path(cert)
                .key_path(key)
                .run(config.bind_addr)
                .await;
        }
        None => {
            info!("listening on ws://{}/ws", config.bind_addr);
            warp::serve(routes).run(config.bind_addr).await;
        }
    }
}
