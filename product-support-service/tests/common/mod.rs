#![allow(dead_code)]

use product_support_service::config::ProductSupportConfig;
use product_support_service::services::providers::mock::MockModelFactory;
use product_support_service::startup::Application;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct TestApp {
    pub address: String,
    pub factory: Arc<MockModelFactory>,
    pub client: reqwest::Client,
}

impl TestApp {
    /// Spawn the application on a random port backed by `factory`.
    pub async fn spawn(factory: MockModelFactory) -> Self {
        Self::spawn_with_config(ProductSupportConfig::for_tests(), factory).await
    }

    pub async fn spawn_with_config(
        config: ProductSupportConfig,
        factory: MockModelFactory,
    ) -> Self {
        let factory = Arc::new(factory);

        let app = Application::build_with_factory(config, factory.clone())
            .await
            .expect("Failed to build application");
        let address = format!("http://127.0.0.1:{}", app.port());

        tokio::spawn(async move {
            let _ = app.run_until_stopped().await;
        });

        let client = reqwest::Client::new();

        // Wait for the server by polling the health endpoint
        for _ in 0..50 {
            if client.get(format!("{}/health", address)).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            factory,
            client,
        }
    }

    pub async fn post_json(&self, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}/gemini/product_support", self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post_form(&self, form: reqwest::multipart::Form) -> reqwest::Response {
        self.client
            .post(format!("{}/gemini/product_support_with_image", self.address))
            .multipart(form)
            .send()
            .await
            .expect("Failed to execute request")
    }
}

pub fn widget_json() -> Value {
    json!({
        "product_name": "Widget",
        "model_number": "X1",
        "jan_code": "012345",
        "brand": "Acme",
        "price": 1000
    })
}

pub fn widget_form() -> reqwest::multipart::Form {
    reqwest::multipart::Form::new()
        .text("product_name", "Widget")
        .text("model_number", "X1")
        .text("jan_code", "012345")
        .text("brand", "Acme")
        .text("price", "1000")
}

pub const FALLBACK_DESCRIPTION: &str =
    "Acme Widget is a high-quality product. Model number X1, JAN code 012345, priced at 1000 yen.";
