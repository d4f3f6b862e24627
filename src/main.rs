// src/main.rs - recoveryctl command-line entrypoint

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;

use recoveryctl::boards::BoardDatabase;
use recoveryctl::chunklist::{self, ChunkObserver, EFI_ROM_KEY};
use recoveryctl::config::Config;
use recoveryctl::convert::{self, FormatChoice, QemuImg, RELEASES};
use recoveryctl::download::{self, DownloadRequest};
use recoveryctl::logging;
use recoveryctl::mlb::{self, MLB_ZERO, RECENT_MAC};
use recoveryctl::probe::{Outcome, ProbeVerdict, Prober};
use recoveryctl::progress::{Silent, TerminalProgress};
use recoveryctl::session::{Channel, ImageQuery, Payload, RecoveryClient, SessionLookup};
use recoveryctl::transport::HttpTransport;
use recoveryctl::Result;

#[derive(Parser)]
#[command(
    name = "recoveryctl",
    version,
    about = "recoveryctl - recovery image downloader, verifier and MLB prober",
    long_about = "recoveryctl talks to the recovery image service: it downloads recovery images with their chunklists, verifies them against the EFI ROM signing key, and probes which boards accept a logic-board serial."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable JSON output
    #[arg(long, global = true)]
    json: bool,

    /// Print debug information
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "RECOVERYCTL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct SerialArgs {
    /// Logic board serial
    #[arg(short, long, default_value = MLB_ZERO)]
    mlb: String,

    /// Product EEEE code, expanded to an anonymous serial
    #[arg(short = 'e', long)]
    code: Option<String>,
}

impl SerialArgs {
    fn resolve(&self) -> Result<String> {
        mlb::resolve(&self.mlb, self.code.as_deref())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Download a recovery image and verify it
    Download {
        #[arg(short, long = "board-id", default_value = RECENT_MAC)]
        board_id: String,
        #[command(flatten)]
        serial: SerialArgs,
        #[arg(long = "os-type", value_enum, default_value_t = Channel::Default)]
        os_type: Channel,
        /// Download the diagnostics image instead
        #[arg(long)]
        diagnostics: bool,
        #[arg(short, long)]
        outdir: Option<PathBuf>,
        #[arg(long)]
        basename: Option<String>,
        /// Refuse chunklists without an RSA signature
        #[arg(long)]
        require_signature: bool,
    },
    /// Check that the MLB probing rules still hold
    Selfcheck,
    /// Check whether a board-id/MLB pair is accepted
    Verify {
        #[arg(short, long = "board-id", default_value = RECENT_MAC)]
        board_id: String,
        #[command(flatten)]
        serial: SerialArgs,
    },
    /// Find the boards from a database that accept an MLB
    Guess {
        #[command(flatten)]
        serial: SerialArgs,
        #[arg(long = "board-db")]
        board_db: Option<PathBuf>,
    },
    /// Verify a local image against a local chunklist
    Check {
        image: PathBuf,
        chunklist: PathBuf,
        #[arg(long)]
        require_signature: bool,
    },
    /// Download a recoveryOS release and convert it to a virtual disk
    Make {
        /// Release name or catalog number (see `releases`)
        release: String,
        #[arg(short, long, value_enum, default_value_t = FormatChoice::All)]
        format: FormatChoice,
        #[arg(short, long, default_value = ".")]
        outdir: PathBuf,
    },
    /// Convert a downloaded .dmg to virtual disk formats
    Convert {
        image: PathBuf,
        #[arg(short, long, value_enum, default_value_t = FormatChoice::All)]
        format: FormatChoice,
    },
    /// List the recoveryOS release catalog
    Releases,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e}", "ERROR:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let cfg = Config::load_or_default(cli.config.as_deref())?;
    let json = cli.json;

    match cli.command {
        Commands::Download {
            board_id,
            serial,
            os_type,
            diagnostics,
            outdir,
            basename,
            require_signature,
        } => {
            let request = DownloadRequest {
                query: ImageQuery {
                    board_id,
                    mlb: serial.resolve()?,
                    payload: if diagnostics { Payload::Diagnostics } else { Payload::Recovery },
                    channel: os_type,
                    cid: None,
                },
                basename,
                outdir: outdir.unwrap_or_else(|| cfg.download.outdir.clone()),
                require_signature: require_signature || cfg.download.require_signature,
            };
            let client = client(&cfg)?;
            let report =
                download::download_and_verify(&client, &request, &EFI_ROM_KEY, &mut TerminalProgress::new())
                    .await?;
            if json {
                print_json(&report)?;
            } else {
                success(&format!(
                    "{} saved to {} ({} chunks, {})",
                    report.info.product,
                    report.image.display(),
                    report.verified.chunks,
                    report.verified.authentication
                ));
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Selfcheck => {
            let prober = prober(&cfg).await?;
            report_verdict(&prober.self_check().await?, json)
        }

        Commands::Verify { board_id, serial } => {
            let mlb = serial.resolve()?;
            let prober = prober(&cfg).await?;
            report_verdict(&prober.verify(&board_id, &mlb).await?, json)
        }

        Commands::Guess { serial, board_db } => {
            let mlb = serial.resolve()?;
            let path = board_db.unwrap_or_else(|| cfg.probe.board_db.clone());
            let boards = BoardDatabase::load(&path)?;
            let prober = prober(&cfg).await?;
            report_verdict(&prober.guess(&mlb, &boards).await?, json)
        }

        Commands::Check {
            image,
            chunklist,
            require_signature,
        } => {
            let require = require_signature || cfg.download.require_signature;
            let verified = if json {
                check(&image, &chunklist, require, &mut Silent)?
            } else {
                check(&image, &chunklist, require, &mut TerminalProgress::new())?
            };
            if json {
                print_json(&verified)?;
            } else {
                success(&format!(
                    "{} verified: {} chunks, {} bytes ({})",
                    image.display(),
                    verified.chunks,
                    verified.bytes,
                    verified.authentication
                ));
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Make {
            release,
            format,
            outdir,
        } => {
            let release = convert::find_release(&release)?;
            println!("[make] {} via {}", release.name, release.board_id);
            let request = DownloadRequest {
                query: ImageQuery::recovery(release.board_id, MLB_ZERO, Channel::Latest),
                basename: Some(release.basename()),
                outdir,
                require_signature: cfg.download.require_signature,
            };
            let client = client(&cfg)?;
            let report =
                download::download_and_verify(&client, &request, &EFI_ROM_KEY, &mut TerminalProgress::new())
                    .await?;
            let created = convert::convert_all(
                &QemuImg::new(&cfg.download.qemu_img),
                &report.image,
                &format.formats(),
            )?;
            if json {
                print_json(&created)?;
            } else {
                for path in &created {
                    println!("[make] created {}", path.display());
                }
                success("Your recoveryOS image is ready.");
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Convert { image, format } => {
            let created =
                convert::convert_all(&QemuImg::new(&cfg.download.qemu_img), &image, &format.formats())?;
            if json {
                print_json(&created)?;
            } else {
                for path in &created {
                    println!("[convert] created {}", path.display());
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Releases => {
            if json {
                print_json(&RELEASES)?;
            } else {
                for (i, release) in RELEASES.iter().enumerate() {
                    println!(
                        "{}. {:<10} {} ({})",
                        i + 1,
                        release.name,
                        release.board_id,
                        release.basename()
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn client(cfg: &Config) -> Result<RecoveryClient<HttpTransport>> {
    let transport = HttpTransport::new(&cfg.endpoint)?;
    RecoveryClient::new(transport, cfg.endpoint.clone())
}

async fn prober(cfg: &Config) -> Result<Prober<SessionLookup<HttpTransport>>> {
    let lookup = client(cfg)?.into_lookup().await?;
    Ok(Prober::new(lookup, cfg.probe.reference_board.as_str()))
}

fn check<O: ChunkObserver>(
    image: &Path,
    chunklist: &Path,
    require_signature: bool,
    observer: &mut O,
) -> Result<chunklist::VerifiedImage> {
    chunklist::verify_files(image, chunklist, &EFI_ROM_KEY, require_signature, observer)
}

fn report_verdict(verdict: &ProbeVerdict, json: bool) -> Result<ExitCode> {
    if json {
        print_json(verdict)?;
    } else {
        match verdict.outcome() {
            Outcome::Success => success(&verdict.to_string()),
            Outcome::Unknown => println!("{} {verdict}", "UNKNOWN:".yellow().bold()),
            Outcome::Failure => eprintln!("{} {verdict}", "ERROR:".red().bold()),
        }
    }
    Ok(match verdict.outcome() {
        Outcome::Failure => ExitCode::FAILURE,
        Outcome::Success | Outcome::Unknown => ExitCode::SUCCESS,
    })
}

fn success(message: &str) {
    println!("{} {message}", "SUCCESS:".green().bold());
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(io::Error::from)?;
    println!("{text}");
    Ok(())
}
