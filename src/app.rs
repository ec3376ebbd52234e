use crate::{
    config::Config,
    error::Result,
    features::FeatureSchema,
    routes::api_routes,
    services::{InMemoryProfileStore, RecommendationService},
};
use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use log::info;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;

pub struct Application {
    port: u16,
    host: String,
    config: Config,
}

impl Application {
    /// Create a new application instance
    pub fn new(config: &Config) -> Self {
        Self {
            port: config.port,
            host: config.host.clone(),
            config: config.clone(),
        }
    }

    /// Build and run the server
    pub async fn run(&self) -> Result<()> {
        // Always bind to 0.0.0.0 for Docker/Render compatibility
        let bind_address = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&bind_address)?;
        info!("Starting server at http://{}:{}", self.host, self.port);

        self.run_with_listener(listener).await
    }

    /// Run the server with a specific TCP listener
    /// This is useful for testing where we want to use a random port
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<()> {
        let store: Arc<InMemoryProfileStore> = match &self.config.profiles_path {
            Some(path) => Arc::new(
                InMemoryProfileStore::from_json_file(Path::new(path))
                    .map_err(anyhow::Error::from)
                    .context("Failed to seed profile store")?,
            ),
            None => Arc::new(InMemoryProfileStore::new()),
        };

        let recommendation_service = web::Data::new(RecommendationService::new(
            store,
            FeatureSchema::default(),
            self.config.trainer.clone(),
            &self.config.checkpoint_dir,
        ));
        let config = web::Data::new(self.config.clone());

        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header();

            App::new()
                .wrap(cors)
                .wrap(Logger::default())
                .app_data(recommendation_service.clone())
                .app_data(config.clone())
                .configure(api_routes)
        })
        .listen(listener)?
        .run()
        .await?;

        Ok(())
    }
}
