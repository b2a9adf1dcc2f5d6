use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use clap::{Args, Parser, Subcommand};
use sheetbatch::auth::{self, Mode};
use sheetbatch::{ComputeHandler, job, logging};
use sheetbatch_eval::{CpuBackend, Engine, EngineConfig};
use sheetbatch_ipc::{Client, Envelope, Server, TransportConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sheetbatch", version, about = "Batched spreadsheet formula evaluation")]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Worker threads for parsing, scheduling and evaluation.
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Evaluate on the calling thread only.
    #[arg(long, global = true)]
    sequential: bool,

    /// Seed for random and Monte-Carlo operations.
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Paths per Monte-Carlo price.
    #[arg(long, global = true)]
    mc_paths: Option<usize>,
}

#[derive(Args, Debug)]
struct TransportArgs {
    /// Directory holding the shared segment.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Segment name.
    #[arg(long)]
    name: Option<String>,

    /// Round-trip timeout for requests, in milliseconds.
    #[arg(long)]
    call_timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute a workbook file and save the results.
    File {
        src: String,
        dst: String,
        token: String,
    },
    /// Serve compute requests over shared memory until killed.
    Server {
        token: String,
        #[command(flatten)]
        transport: TransportArgs,
    },
    /// Ask a running server to compute a workbook file.
    Submit {
        src: String,
        dst: String,
        #[command(flatten)]
        transport: TransportArgs,
    },
    /// Print the token expected for a launch mode.
    Token {
        #[command(subcommand)]
        mode: TokenMode,
    },
}

#[derive(Subcommand, Debug)]
enum TokenMode {
    File { src: String, dst: String },
    Server,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            enable_parallel: !self.sequential,
            max_threads: self.threads,
            rng_seed: self.seed,
            ..EngineConfig::default()
        };
        if let Some(paths) = self.mc_paths {
            config.mc_paths = paths;
        }
        config
    }

    fn engine(&self) -> Result<Engine<CpuBackend>> {
        let config = self.config();
        let backend = CpuBackend::from_config(&config);
        Engine::try_new(backend, config).context("starting the evaluation engine")
    }
}

impl TransportArgs {
    fn config(&self) -> TransportConfig {
        let mut config = TransportConfig::default();
        if let Some(dir) = &self.dir {
            config.dir = dir.clone();
        }
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(ms) = self.call_timeout_ms {
            config.call_timeout = Duration::from_millis(ms);
        }
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init();

    match cli.command {
        Command::File { src, dst, token } => {
            let mode = Mode::File {
                src: &src,
                dst: &dst,
            };
            ensure!(auth::verify(mode, &token), "invalid token for {mode} mode");
            let mut engine = cli.engine.engine()?;
            job::run_file(&mut engine, &src, &dst)?;
            Ok(())
        }
        Command::Server { token, transport } => {
            ensure!(auth::verify(Mode::Server, &token), "invalid token for server mode");
            let engine = cli.engine.engine()?;
            let mut server = Server::bind(transport.config()).context("binding the shared segment")?;
            let mut handler = ComputeHandler::new(engine);
            let shutdown = AtomicBool::new(false);
            server.serve(&mut handler, &shutdown)?;
            Ok(())
        }
        Command::Submit {
            src,
            dst,
            transport,
        } => {
            let client = Client::connect(transport.config()).context("connecting to the server")?;
            let response = client
                .call(&Envelope::compute_file(&src, &dst))
                .context("submitting the file job")?;
            match response.value() {
                "ok" => {
                    info!(%src, %dst, "file computed by server");
                    Ok(())
                }
                reason => bail!("server could not compute {src}: {reason}"),
            }
        }
        Command::Token { mode } => {
            let token = match &mode {
                TokenMode::File { src, dst } => auth::token_for(Mode::File { src, dst }),
                TokenMode::Server => auth::token_for(Mode::Server),
            };
            println!("{token}");
            Ok(())
        }
    }
}
