//! Echoes the request body back, together with the parsed parameters.
//!
//! ```text
//! curl -d 'name=micro' 'http://127.0.0.1:8080/echo?lang=rust'
//! ```

use micro_connector::adapter::Adapter;
use micro_connector::config::ConnectorConfig;
use micro_connector::connection::Exchange;
use micro_connector::protocol::BoxError;
use micro_connector::server::Connector;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

struct Echo;

impl Adapter for Echo {
    async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), BoxError> {
        let params = exchange
            .parameters()
            .await?
            .iter()
            .map(|(name, value)| format!("{name}={value}\n"))
            .collect::<String>();
        let body = exchange.read_to_end().await?;
        info!(
            method = %exchange.request().method(),
            uri = %exchange.request().decoded_uri(),
            body_len = body.len(),
            "receiving request"
        );

        exchange.write(params).await?;
        exchange.write(body).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = ConnectorConfig::default().with_compression(true).with_server_header("micro-connector");
    let connector = match Connector::bind_port(config, Echo).await {
        Ok(connector) => connector,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };
    if let Err(e) = connector.serve().await {
        error!(cause = %e, "server stopped");
    }
}
