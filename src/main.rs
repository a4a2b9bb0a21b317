use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use playlist_etl::config::{ExtractionConfig, TransformConfig};
use playlist_etl::storage::DataStage;
use playlist_etl::{ExtractionEvent, ExtractionPipeline, HandlerResponse, TransformPipeline};

#[derive(Parser, Debug)]
#[command(name = "playlist-etl")]
#[command(about = "Extract playlists into raw objects and normalize them into CSV exports")]
#[command(version)]
struct Args {
    /// Identifier copied into error records
    #[arg(long, env = "REQUEST_ID", global = true)]
    request_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pull one playlist and store the raw payload
    Extract {
        /// Trigger payload as JSON: {"playlist_link": ..., "data_stage": ...}
        #[arg(long, conflicts_with_all = ["playlist_link", "data_stage"])]
        event: Option<String>,

        #[arg(long)]
        playlist_link: Option<String>,

        #[arg(long, value_enum)]
        data_stage: Option<Stage>,
    },
    /// Normalize every pending raw object
    Transform,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Stage {
    ToProcessed,
    AlreadyProcessed,
    FailedExtraction,
}

impl From<Stage> for DataStage {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::ToProcessed => DataStage::ToProcessed,
            Stage::AlreadyProcessed => DataStage::AlreadyProcessed,
            Stage::FailedExtraction => DataStage::FailedExtraction,
        }
    }
}

async fn extract(
    event: ExtractionEvent,
    request_id: Option<String>,
) -> HandlerResponse {
    let pipeline = match ExtractionConfig::from_env()
        .and_then(|config| ExtractionPipeline::from_config(&config, request_id))
    {
        Ok(pipeline) => pipeline,
        Err(err) => return HandlerResponse::from_error(&err),
    };
    HandlerResponse::from_extraction(pipeline.run(&event).await)
}

async fn transform(request_id: Option<String>) -> HandlerResponse {
    let mut pipeline = match TransformConfig::from_env()
        .and_then(|config| TransformPipeline::from_config(&config, request_id))
    {
        Ok(pipeline) => pipeline,
        Err(err) => return HandlerResponse::from_error(&err),
    };
    HandlerResponse::from_transform(pipeline.run().await)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "playlist_etl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let response = match args.command {
        Command::Extract {
            event,
            playlist_link,
            data_stage,
        } => {
            let event = match event {
                Some(payload) => ExtractionEvent::from_json(&payload),
                None => Ok(ExtractionEvent {
                    playlist_link,
                    data_stage: data_stage.map(DataStage::from).unwrap_or_default(),
                }),
            };
            match event {
                Ok(event) => {
                    info!(event = ?event, "Extraction started");
                    extract(event, args.request_id).await
                }
                Err(err) => {
                    warn!(error = %err, "Rejected trigger payload");
                    HandlerResponse::from_error(&err)
                }
            }
        }
        Command::Transform => {
            info!("Transformation started");
            transform(args.request_id).await
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    std::process::exit(response.exit_code());
}
