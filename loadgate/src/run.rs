use std::time::Duration;

use anyhow::Context as _;
use loadgate_core::runner::{Retry, RunController};
use loadgate_http::HttpClient;

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;
use crate::workload_yaml::{self, WorkloadFile};

const RETRY_BACKOFF: Duration = Duration::from_millis(50);

pub async fn run(args: Box<RunArgs>) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let file = match &args.workload {
        Some(path) => workload_yaml::load(path)
            .await
            .map_err(RunError::InvalidInput)?,
        None => WorkloadFile::default(),
    };
    let resolved = workload_yaml::resolve(&args, file).map_err(RunError::InvalidInput)?;

    let mut controller = RunController::new(resolved.definition)?;

    out.print_header(args.workload.as_deref(), controller.plan());
    if let Some(progress) = out.progress() {
        controller = controller.with_progress(progress);
    }

    let cancel = controller.cancel_token();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping run");
            cancel.cancel();
        }
    });

    let transport = Retry::new(HttpClient::default(), resolved.attempts)
        .with_backoff(RETRY_BACKOFF);
    tracing::info!(
        scenario = %controller.plan().name,
        attempts = resolved.attempts,
        "starting run"
    );
    let result = controller.run(transport).await;
    signal_task.abort();

    out.print_summary(&result)
        .context("failed to write summary")
        .map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_result(&result))
}
