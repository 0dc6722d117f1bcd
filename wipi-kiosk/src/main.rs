use std::path::Path;

use tokio::io::AsyncBufReadExt;
use wipi_kiosk::config::{CONFIG_FILE, KioskConfig, Transport};
use wipi_kiosk::{
    Coordinator, CredentialStore, QrCodeRenderer, QrFormat, Submission, WriteStateMachine,
};
use wipi_proto::Credentials;
use wipi_tag::SimulatedField;

#[derive(clap::Parser)]
#[command(name = "wipi")]
#[command(about = "Wi-Fi hand-off kiosk: QR code plus NFC tag")]
struct Cli {
    /// Reader transport, overrides config.json
    #[arg(long, global = true)]
    transport: Option<Transport>,
    /// Serial device of the reader, overrides config.json
    #[arg(long, global = true)]
    device: Option<String>,
    #[arg(long, global = true)]
    qr_format: Option<QrFormat>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// List nearby Wi-Fi networks
    Scan,
    /// Print the join payload for a network
    Encode {
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Show the QR code and write NFC tags until Ctrl-C
    Provision {
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Resume with the last provisioned network
    Show,
}

#[derive(clap::Args)]
struct NetworkArgs {
    /// Network name (SSID)
    #[arg(long)]
    ssid: String,
    #[arg(long, default_value = "")]
    password: String,
    /// The network has no password
    #[arg(long)]
    open: bool,
}

impl NetworkArgs {
    fn credentials(&self) -> Credentials {
        Credentials::new(&self.ssid, &self.password, !self.open)
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli: Cli = clap::Parser::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    // a pending console read would otherwise keep the runtime alive
    std::process::exit(0);
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let home = wipi_kiosk::wipi_home()?;
    std::fs::create_dir_all(&home)?;
    let mut config = KioskConfig::load_or_create(&home.join(CONFIG_FILE))?;
    if let Some(transport) = cli.transport {
        config.reader.transport = transport;
    }
    if let Some(device) = cli.device {
        config.reader.device = device;
    }
    if let Some(format) = cli.qr_format {
        config.qr.format = format;
    }

    match cli.command {
        Commands::Scan => {
            let networks = wipi_kiosk::scanner::scan().await?;
            if networks.is_empty() {
                println!("No networks found");
            }
            for network in networks {
                let lock = if network.secured { "secured" } else { "open" };
                println!("{:<32} {lock}", network.name);
            }
        }
        Commands::Encode { network } => {
            println!("{}", wipi_proto::encode(&network.credentials())?);
        }
        Commands::Provision { network } => {
            let (coordinator, field) = kiosk(&home, &config);
            let submission = coordinator.submit(network.credentials())?;
            hand_off(&coordinator, &submission, &home, &config, field).await?;
        }
        Commands::Show => {
            let (coordinator, field) = kiosk(&home, &config);
            let Some(submission) = coordinator.restore()? else {
                return Err("no network has been provisioned yet, run `wipi provision`".into());
            };
            hand_off(&coordinator, &submission, &home, &config, field).await?;
        }
    }
    Ok(())
}

fn kiosk(home: &Path, config: &KioskConfig) -> (Coordinator, Option<SimulatedField>) {
    let reader = config.reader.build();
    let writer = reader
        .channel
        .map(|channel| WriteStateMachine::new(channel, config.writer.options()));
    let coordinator = Coordinator::new(
        Box::new(CredentialStore::in_home(home)),
        Box::new(QrCodeRenderer::new(config.qr.format)),
        writer,
    );
    (coordinator, reader.field)
}

/// Present the submission, then write tags until Ctrl-C
async fn hand_off(
    coordinator: &Coordinator,
    submission: &Submission,
    home: &Path,
    config: &KioskConfig,
    field: Option<SimulatedField>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = show(submission, home, config) {
        // the writer is already running, release the reader before bailing out
        coordinator.shutdown().await;
        return Err(e.into());
    }
    serve(coordinator, field).await
}

fn show(submission: &Submission, home: &Path, config: &KioskConfig) -> std::io::Result<()> {
    println!("Scan or Tap to Join Wi-Fi: {}", submission.network_name);
    match &submission.qr {
        Some(image) if image.format == QrFormat::Svg => {
            let path = config.svg_path(home);
            std::fs::write(&path, &image.data)?;
            println!("QR code written to {}", path.display());
        }
        Some(image) => println!("{}", image.data),
        None => println!("QR code unavailable, tap a tag instead"),
    }
    if !submission.persisted {
        println!("Warning: network was not saved and will not survive a restart");
    }
    Ok(())
}

async fn serve(
    coordinator: &Coordinator,
    field: Option<SimulatedField>,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(mut updates) = coordinator.subscribe() else {
        println!("No NFC reader configured, QR code only. Ctrl-C to quit.");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    };

    if let Some(field) = field {
        println!("Simulated reader: press Enter to tap a tag");
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                let id = field.tap();
                println!("Tapped tag {id}");
            }
        });
    }

    let mut last = {
        let report = updates.borrow_and_update();
        println!("NFC: {}", report.status);
        Some(report.status.clone())
    };
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let report = updates.borrow_and_update().clone();
                if last.as_ref() != Some(&report.status) {
                    println!("NFC: {} (written {}, failed {})", report.status, report.successes, report.failures);
                    last = Some(report.status);
                }
            }
        }
    }

    println!("Shutting down");
    coordinator.shutdown().await;
    Ok(())
}
