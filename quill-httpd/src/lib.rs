use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::extract::Request;
use axum::middleware;
use axum::response::Response;
use tower_http::trace::TraceLayer;
use tracing::Span;

use quill::config::Strategy;
use quill::storage::memory::MemoryStore;
use quill::storage::{ContentStore, NoopMediaStore};
use quill::{Config, GitStore};

use tracing_extra::{tracing_middleware, RequestId, TracingInfo};

mod api;
mod tracing_extra;

#[derive(Debug, Clone)]
pub struct Options {
    /// Path of the configuration file.
    pub config: PathBuf,
    /// Listen address, overriding the configured one.
    pub listen: Option<SocketAddr>,
}

/// Run the daemon.
pub async fn run(options: Options) -> anyhow::Result<()> {
    let mut config = Config::load(&options.config).with_context(|| {
        format!(
            "failed to load configuration from {}",
            options.config.display()
        )
    })?;
    if let Some(listen) = options.listen {
        config.server.listen = listen;
    }
    config.validate().context("invalid configuration")?;

    let config = Arc::new(config);
    let store = content_store(&config).await?;
    let verifier = Arc::new(api::auth::TokenEndpoint::new(
        config.micropub.token_endpoint.clone(),
        config.micropub.me_url.clone(),
    ));
    let ctx = api::Context::new(config.clone(), store, Arc::new(NoopMediaStore), verifier);

    let listen = config.server.listen;
    let request_id = RequestId::new();

    tracing::info!("listening on http://{}", listen);

    let app = api::router(ctx)
        .layer(middleware::from_fn(tracing_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |_request: &Request| {
                    tracing::info_span!("request", id = %request_id.clone().next())
                })
                .on_response(|response: &Response, latency: Duration, _span: &Span| {
                    if let Some(info) = response.extensions().get::<TracingInfo>() {
                        tracing::info!(
                            "{} \"{} {} {:?}\" {} {:?}",
                            info.connect_info.0,
                            info.method,
                            info.uri,
                            info.version,
                            response.status().as_u16(),
                            latency,
                        );
                    } else {
                        tracing::info!("Processed");
                    }
                }),
        )
        .into_make_service_with_connect_info::<SocketAddr>();

    axum_server::bind(listen)
        .serve(app)
        .await
        .map_err(anyhow::Error::from)
}

/// Open the configured content store. Working copy repair failures are
/// fatal: the daemon must not start serving requests over a store it could
/// not bring into a known-good state.
async fn content_store(config: &Arc<Config>) -> anyhow::Result<Arc<dyn ContentStore>> {
    tracing::info!("using {} content storage", config.content.strategy);

    match config.content.strategy {
        Strategy::Git => {
            let git = config
                .content
                .git
                .clone()
                .context("the git content strategy requires a content.git section")?;
            tracing::info!("opening working copy at {}", git.local_path.display());
            let store = tokio::task::spawn_blocking(move || GitStore::open(git))
                .await?
                .context("failed to open the git content store")?;
            Ok(Arc::new(store))
        }
        Strategy::Memory => {
            let memory = config
                .content
                .memory
                .clone()
                .context("the memory content strategy requires a content.memory section")?;
            tracing::warn!("content is stored in memory and will not survive a restart");
            Ok(Arc::new(MemoryStore::new(memory.public_url)))
        }
    }
}

pub mod logger {
    use tracing::dispatcher::Dispatch;

    pub fn init() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
        tracing::dispatcher::set_global_default(Dispatch::new(subscriber()))
    }

    #[cfg(feature = "logfmt")]
    pub fn subscriber() -> impl tracing::Subscriber {
        use tracing_subscriber::layer::SubscriberExt as _;
        use tracing_subscriber::EnvFilter;

        tracing_subscriber::Registry::default()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(tracing_logfmt::layer())
    }

    #[cfg(not(feature = "logfmt"))]
    pub fn subscriber() -> impl tracing::Subscriber {
        tracing_subscriber::FmtSubscriber::builder()
            .with_target(false)
            .finish()
    }
}
