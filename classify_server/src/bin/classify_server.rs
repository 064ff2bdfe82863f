//! Classify server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use classify_server::{
    data_socket::spawn_data_socket,
    endpoints::router,
    gallery::Gallery,
    inferer::LiveClassifier,
    meter::spawn_meter_logger,
    model::{spawn_model_loader, ModelHandle},
    nn::{ModelConfig, DEFAULT_CACHE_DIR, DEFAULT_TOP_K},
    pubsub::NamedPubSub,
};
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the HTTP endpoints on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Address to receive camera streams on
    #[clap(long, default_value = "127.0.0.1:3001")]
    socket_address: String,

    /// Directory with images to classify on click
    #[clap(long, default_value = "gallery")]
    gallery_dir: PathBuf,

    /// ONNX model file, downloaded to the cache directory if not given
    #[clap(long)]
    model_path: Option<PathBuf>,

    /// Labels file with one class per line, downloaded if not given
    #[clap(long)]
    labels_path: Option<PathBuf>,

    /// Directory for downloaded model files
    #[clap(long)]
    cache_dir: Option<PathBuf>,

    /// Number of predictions reported per image
    #[clap(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Seconds without viewers after which live classification stops
    #[clap(long, default_value_t = 10)]
    idle_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    // Load the model in the background, endpoints refuse to classify until it is ready
    let model = Arc::new(ModelHandle::new());
    let config = ModelConfig {
        model_path: args.model_path,
        labels_path: args.labels_path,
        cache_dir: args.cache_dir.unwrap_or_else(|| DEFAULT_CACHE_DIR.clone()),
        top_k: args.top_k,
    };
    spawn_model_loader(Arc::clone(&model), config);

    // Build Pub/Sub-Engine to communicate between data input, classification and serving
    let pubsub = Arc::new(NamedPubSub::new());
    let live = Arc::new(LiveClassifier::new(
        Arc::clone(&pubsub),
        Arc::clone(&model),
        Duration::from_secs(args.idle_timeout),
    ));

    let gallery = Arc::new(Gallery::new(args.gallery_dir));
    log::info!(
        "Serving {} gallery images from {}",
        gallery.list()?.len(),
        gallery.dir().display()
    );

    // Create socket to receive image streams via network
    spawn_data_socket(Arc::clone(&pubsub), &args.socket_address).await?;

    spawn_meter_logger();

    // Serve HTTP server
    let app = router(pubsub, model, live, gallery);
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
