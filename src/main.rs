use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "ssr")] {
        use dotenv::dotenv;
        use env_logger::Env;
        use queens_speech::app::router;
        use queens_speech::config::AppConfig;
        use queens_speech::middleware::tracing::init_tracing;
        use queens_speech::state::AppState;
        use std::net::SocketAddr;

        #[tokio::main]
        async fn main() -> anyhow::Result<()> {
            dotenv().ok();
            env_logger::init_from_env(Env::default().default_filter_or("info"));
            init_tracing();

            let config = AppConfig::from_env()?;
            let addr = config.site_addr.clone();

            let app_state = AppState::from_config(config).await;
            let app = router(app_state);

            log::info!("Starting server at {addr}");

            let listener = tokio::net::TcpListener::bind(&addr).await?;
            log::info!("listening on http://{}", &addr);
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
            Ok(())
        }
    } else {
        pub fn main() {
            // the server binary needs the `ssr` feature
        }
    }
}
