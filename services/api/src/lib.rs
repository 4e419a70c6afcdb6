mod cli;
mod infra;
mod routes;
mod server;

use prospect_scoring::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
