use folio::answer::AnswerParser;
use folio::cli::{Cli, Commands, ConfigAction};
use folio::config::{expand_tilde, Config};
use folio::daemon::{Daemon, IpcClient, IpcRequest, SearchHit};
use folio::error::{FolioError, Result};
use folio::llm::Turn;
use folio::store::ChunkRecord;
use folio::stream::StreamEvent;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    let config_path = cli.config.clone();
    let profile = cli.profile.clone();

    match cli.command {
        Commands::Serve => cmd_serve(load_config(config_path, profile)?),
        Commands::Ingest { chunks } => cmd_ingest(&load_config(config_path, profile)?, &chunks),
        Commands::Ask {
            question,
            history,
            model,
            text,
        } => cmd_ask(
            &load_config(config_path, profile)?,
            question,
            history,
            model,
            text,
        ),
        Commands::Search {
            query,
            k,
            vector_weight,
            json,
        } => cmd_search(
            &load_config(config_path, profile)?,
            query,
            k,
            vector_weight,
            json,
        ),
        Commands::Info => cmd_info(&load_config(config_path, profile)?),
        Commands::Clear => cmd_simple(&load_config(config_path, profile)?, IpcRequest::Clear),
        Commands::Status => cmd_status(&load_config(config_path, profile)?),
        Commands::Config { action } => cmd_config(config_path, profile, action),
    }
}

/// Logs go to stderr; stdout carries answers and NDJSON
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "folio=debug" } else { "folio=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| FolioError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn client(config: &Config) -> IpcClient {
    IpcClient::new(expand_tilde(&config.daemon.socket_path))
}

fn cmd_serve(config: Config) -> Result<()> {
    tracing::info!("Starting folio daemon...");
    tracing::info!(
        "Chat model: {}, embeddings: {} ({})",
        config.llm.model,
        config.embedding.model,
        config.embedding.provider
    );

    let rt = runtime()?;
    rt.block_on(async {
        let daemon = Daemon::new(config)?;
        daemon.run_foreground().await
    })
}

fn read_chunks(path: &Path) -> Result<Vec<ChunkRecord>> {
    let reader: Box<dyn BufRead> = if path == Path::new("-") {
        Box::new(std::io::stdin().lock())
    } else {
        let file = std::fs::File::open(path).map_err(|e| FolioError::Io {
            source: e,
            context: format!("Failed to open chunk file: {:?}", path),
        })?;
        Box::new(std::io::BufReader::new(file))
    };

    let mut chunks = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| FolioError::Io {
            source: e,
            context: format!("Failed to read chunk file: {:?}", path),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk = serde_json::from_str(&line).map_err(|e| FolioError::Json {
            source: e,
            context: format!("Invalid chunk on line {}", number + 1),
        })?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

fn cmd_ingest(config: &Config, path: &Path) -> Result<()> {
    let chunks = read_chunks(path)?;
    tracing::debug!("Read {} chunks from {:?}", chunks.len(), path);

    let response = runtime()?.block_on(client(config).send(&IpcRequest::Ingest { chunks }))?;
    let response = response.into_result()?;
    let data = response.data.unwrap_or_default();

    if data["cached"].as_bool().unwrap_or(false) {
        println!("✓ Document already active ({} chunks)", data["chunk_count"]);
    } else {
        println!("✓ Document ingested ({} chunks)", data["chunk_count"]);
    }
    print_questions("Try asking", &data["starter_questions"]);
    Ok(())
}

fn read_history(path: &Path) -> Result<Vec<Turn>> {
    let content = std::fs::read_to_string(path).map_err(|e| FolioError::Io {
        source: e,
        context: format!("Failed to read history file: {:?}", path),
    })?;
    serde_json::from_str(&content).map_err(|e| FolioError::Json {
        source: e,
        context: format!("History file is not a list of turns: {:?}", path),
    })
}

fn cmd_ask(
    config: &Config,
    question: String,
    history: Option<PathBuf>,
    model: Option<String>,
    text: bool,
) -> Result<()> {
    let history = match history {
        Some(path) => read_history(&path)?,
        None => Vec::new(),
    };
    let request = IpcRequest::Ask {
        question,
        history,
        model,
    };

    let mut answer = String::new();
    let mut failure: Option<String> = None;
    let stdout = std::io::stdout();

    runtime()?.block_on(client(config).ask(&request, |event| {
        let mut out = stdout.lock();
        if text {
            match event {
                StreamEvent::Token(token) => {
                    answer.push_str(token);
                    let _ = write!(out, "{}", token);
                    let _ = out.flush();
                }
                StreamEvent::Status(status) => eprintln!("{}", status),
                StreamEvent::ToolLog(_) => {}
                StreamEvent::Error(message) => failure = Some(message.clone()),
            }
        } else {
            if let StreamEvent::Error(message) = event {
                failure = Some(message.clone());
            }
            if let Ok(line) = serde_json::to_string(event) {
                let _ = writeln!(out, "{}", line);
            }
        }
    }))?;

    if text && !answer.is_empty() {
        println!();
        let parser = AnswerParser::new().map_err(|e| FolioError::Other(e.into()))?;
        let parts = parser.parse(&answer);
        tracing::debug!(
            "Answer cites {} sources, suggests {} follow-ups",
            parts.sources.len(),
            parts.follow_ups.len()
        );
    }

    match failure {
        Some(message) => Err(FolioError::Daemon(message)),
        None => Ok(()),
    }
}

fn cmd_search(
    config: &Config,
    query: String,
    k: Option<usize>,
    vector_weight: Option<f32>,
    json: bool,
) -> Result<()> {
    let request = IpcRequest::Search {
        query,
        k,
        vector_weight,
    };
    let response = runtime()?.block_on(client(config).send(&request))?.into_result()?;
    let data = response.data.unwrap_or_default();

    if json {
        println!("{}", serde_json::to_string_pretty(&data).unwrap_or_default());
        return Ok(());
    }

    let hits: Vec<SearchHit> = serde_json::from_value(data).map_err(|e| FolioError::Json {
        source: e,
        context: "Unexpected search response".to_string(),
    })?;

    if hits.is_empty() {
        println!("No matching passages");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        let page = hit
            .passage
            .page
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "{}. [{}, page {}] score {:.4}",
            rank + 1,
            hit.passage.source,
            page,
            hit.fused_score
        );
        let preview: String = hit.passage.text.chars().take(200).collect();
        println!("   {}", preview.replace('\n', " "));
    }
    Ok(())
}

fn cmd_info(config: &Config) -> Result<()> {
    let response = runtime()?.block_on(client(config).send(&IpcRequest::Info))?.into_result()?;
    let data = response.data.unwrap_or_default();

    if !data["loaded"].as_bool().unwrap_or(false) {
        println!("No document loaded");
        return Ok(());
    }

    println!("Document: {}", data["filename"].as_str().unwrap_or("?"));
    println!("  Chunks:   {}", data["chunk_count"]);
    println!("  Hash:     {}", data["file_hash"].as_str().unwrap_or("?"));
    println!("  Ingested: {}", data["ingested_at"].as_str().unwrap_or("?"));
    print_questions("Starter questions", &data["starter_questions"]);
    Ok(())
}

fn cmd_simple(config: &Config, request: IpcRequest) -> Result<()> {
    let response = runtime()?.block_on(client(config).send(&request))?.into_result()?;
    if let Some(message) = response.message {
        println!("✓ {}", message);
    }
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Folio Status");
    println!("============");

    match runtime()?.block_on(client(config).send(&IpcRequest::Status)) {
        Ok(response) => {
            let data = response.data.unwrap_or_default();
            println!("\nDaemon: Running");
            println!("  Model:   {}", data["model"].as_str().unwrap_or("?"));
            println!("  Since:   {}", data["started_at"].as_str().unwrap_or("?"));
            match data["document"]["source"].as_str() {
                Some(source) => println!("  Document: {} ({} chunks)", source, data["document"]["chunk_count"]),
                None => println!("  Document: none"),
            }
        }
        Err(FolioError::DaemonNotRunning { .. }) => println!("\nDaemon: Stopped"),
        Err(e) => return Err(e),
    }
    Ok(())
}

fn print_questions(title: &str, questions: &serde_json::Value) {
    let Some(list) = questions.as_array() else {
        return;
    };
    if list.is_empty() {
        return;
    }
    println!("\n{}:", title);
    for question in list.iter().filter_map(|q| q.as_str()) {
        println!("  - {}", question);
    }
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!("Config file not found, using defaults. Run 'folio config init' to create one.");
    }

    let mut config = Config::load_or_default(&path)?;
    if let Some(profile) = profile {
        config.apply_profile(&profile)?;
    }
    Ok(config)
}
