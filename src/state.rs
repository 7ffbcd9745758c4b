use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "ssr")] {
        use axum::extract::FromRef;
        use log::{info, warn};
        use std::sync::Arc;

        use crate::cancellable_sse::SseState;
        use crate::config::AppConfig;
        use crate::services::anthropic::{AnthropicService, TextGenerator};
        use crate::services::references::ReferenceStore;

        #[derive(FromRef, Clone)]
        pub struct AppState {
            pub config: Arc<AppConfig>,
            pub references: ReferenceStore,
            /// `None` when no API key is configured.
            pub generator: Option<Arc<dyn TextGenerator>>,
            pub sse_state: SseState,
        }

        impl AppState {
            pub fn new(
                config: AppConfig,
                references: ReferenceStore,
                generator: Option<Arc<dyn TextGenerator>>,
            ) -> Self {
                Self {
                    config: Arc::new(config),
                    references,
                    generator,
                    sse_state: SseState::new(),
                }
            }

            pub async fn from_config(config: AppConfig) -> Self {
                let references = ReferenceStore::load_or_empty(&config.references_dir).await;
                info!("Loaded {} reference articles", references.len());

                let generator = match &config.api_key {
                    Some(key) => {
                        let service = AnthropicService::new(key.clone(), &config);
                        Some(Arc::new(service) as Arc<dyn TextGenerator>)
                    }
                    None => {
                        warn!("ANTHROPIC_API_KEY is not set; generation requests will fail");
                        None
                    }
                };

                Self::new(config, references, generator)
            }
        }
    }
}
