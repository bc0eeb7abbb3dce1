use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rmodels_manager::{ArtifactSource, ManagerConfig, ModelManager};
use rmodels_protocol::{RSession, RserveClient};
use serde_json::json;

mod schema;

#[derive(Parser, Debug)]
#[command(name = "rmodels", version, about = "Train, score and export models on an Rserve engine")]
struct Cli {
    /// Manager settings (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Engine address as host:port, overriding the settings file.
    #[arg(long, global = true)]
    engine: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connects and reports the engine's identification.
    Ping,
    /// Trains a model and writes the serialized artifact.
    Train {
        #[arg(long)]
        schema: PathBuf,
        /// Comma-separated rows, or an ARFF dump when the extension is `.arff`.
        #[arg(long)]
        instances: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Scores one comma-separated row.
    Score {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        row: String,
    },
    /// Writes the PMML export of a model.
    Export {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        model: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        gzip: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref(), cli.engine.as_deref())?;
    let output = match cli.command {
        Commands::Ping => ping(&settings)?,
        Commands::Train {
            schema,
            instances,
            out,
        } => {
            let config = schema::load_configuration(&schema)?;
            let manager = ModelManager::connect(&settings)?;
            let bytes = if instances.extension().is_some_and(|ext| ext == "arff") {
                manager.train_file(&config, &instances)?
            } else {
                manager.train(&config, &schema::read_instances(&instances)?)?
            };
            std::fs::write(&out, &bytes)
                .with_context(|| format!("writing artifact {}", out.display()))?;
            manager.close()?;
            json!({ "artifact": out, "bytes": bytes.len() })
        }
        Commands::Score { schema, model, row } => {
            let config = schema::load_configuration(&schema)?;
            let manager = ModelManager::connect(&settings)?;
            let id = manager.add_model(config, ArtifactSource::File(model))?;
            let scores = manager.score_one(id, &schema::parse_row(&row))?;
            manager.close()?;
            json!({ "id": id, "scores": scores })
        }
        Commands::Export {
            schema,
            model,
            out,
            gzip,
        } => {
            let config = schema::load_configuration(&schema)?;
            let manager = ModelManager::connect(&settings)?;
            let id = manager.add_model(config, ArtifactSource::File(model))?;
            let written = manager.export_artifact(id, &out, gzip)?;
            manager.remove_model(id)?;
            manager.close()?;
            json!({ "id": id, "export": out, "compressed": gzip, "bytes": written })
        }
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_settings(path: Option<&Path>, engine: Option<&str>) -> Result<ManagerConfig> {
    let mut settings = match path {
        Some(path) => ManagerConfig::load(path)?,
        None => ManagerConfig::default(),
    };
    if let Some(address) = engine {
        let (host, port) = address
            .rsplit_once(':')
            .with_context(|| format!("engine address {address:?} must be host:port"))?;
        settings.engine.host = host.to_string();
        settings.engine.port = port
            .parse()
            .with_context(|| format!("invalid engine port {port:?}"))?;
    }
    Ok(settings)
}

fn ping(settings: &ManagerConfig) -> Result<serde_json::Value> {
    let address = settings.engine_address();
    let mut client = RserveClient::connect(address.as_str())
        .with_context(|| format!("connecting to engine at {address}"))?;
    let version = client.evaluate("R.version.string")?.into_text()?;
    let server = client.server().clone();
    client.close()?;
    Ok(json!({
        "engine": address,
        "protocol": server.version,
        "attributes": server.attributes,
        "r_version": version,
    }))
}
