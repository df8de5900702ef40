use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use cropcare::{
    config::Settings,
    disease::DiseaseTable,
    model::TensorflowModel,
    router,
    upload::UploadStore,
    utils::ensure_model_exists,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep TensorFlow's C++ logging to warnings and above.
    if std::env::var_os("TF_CPP_MIN_LOG_LEVEL").is_none() {
        std::env::set_var("TF_CPP_MIN_LOG_LEVEL", "2");
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::from_env()?;
    let addr = settings.bind_address()?;

    ensure_model_exists(&settings.model_path, settings.model_url.as_deref()).await?;

    let uploads = UploadStore::new(&settings.upload_dir);
    uploads
        .ensure_dir()
        .await
        .with_context(|| format!("Failed to create {}", settings.upload_dir.display()))?;

    tracing::info!(path = %settings.model_path.display(), "loading model");
    let model = TensorflowModel::load(
        &settings.model_path,
        &settings.model_input_op,
        &settings.model_output_op,
    )
    .context("Failed to load model")?;
    tracing::info!(path = %model.path().display(), "model loaded");

    let diseases = DiseaseTable::load(&settings.disease_data_path);

    let state = Arc::new(AppState {
        classifier: Arc::new(model),
        diseases,
        uploads,
        public_base_url: settings.public_base_url.clone(),
    });

    let app = router(state, settings.body_limit_bytes);

    tracing::info!("Listening on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
