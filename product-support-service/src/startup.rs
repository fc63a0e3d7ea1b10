//! Application startup and lifecycle management.

use crate::config::ProductSupportConfig;
use crate::handlers;
use crate::services::providers::gemini::GeminiModelFactory;
use crate::services::providers::{GenerationParams, ModelClientFactory};
use crate::services::ContentGenerator;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Room for the text fields and multipart framing on top of the image limit.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ProductSupportConfig,
    pub model_factory: Arc<dyn ModelClientFactory>,
    pub generator: ContentGenerator,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application backed by Gemini.
    pub async fn build(config: ProductSupportConfig) -> Result<Self, AppError> {
        let factory = GeminiModelFactory::new(config.google.clone(), &config.models)
            .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;

        tracing::info!(
            model = %config.models.text_model,
            project = ?config.google.project_id,
            location = %config.google.location,
            developer_api = config.google.api_key.is_some(),
            "Configured Gemini model factory"
        );

        Self::build_with_factory(config, Arc::new(factory)).await
    }

    /// Build the application with an explicit model factory.
    pub async fn build_with_factory(
        config: ProductSupportConfig,
        model_factory: Arc<dyn ModelClientFactory>,
    ) -> Result<Self, AppError> {
        let generator = ContentGenerator::new(GenerationParams {
            temperature: config.models.temperature,
            max_tokens: config.models.max_output_tokens,
        });

        let body_limit = config.uploads.max_image_bytes + FORM_OVERHEAD_BYTES;

        let state = AppState {
            config: config.clone(),
            model_factory,
            generator,
        };

        let router = Router::new()
            .route("/", get(handlers::root))
            .route("/health", get(handlers::health_check))
            .route(
                "/gemini/product_support",
                post(handlers::generate_product_support),
            )
            .route(
                "/gemini/product_support_with_image",
                post(handlers::generate_product_support_with_image),
            )
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(state);

        // Port 0 = random port for testing
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Product support service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router).await
    }

    /// Run the application until `shutdown` resolves, then drain in-flight requests.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
