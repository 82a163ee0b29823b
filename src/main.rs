use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use paypal_gateway::config::{config_path, load_settings, load_settings_from, save_settings_to, GatewaySettings};
use paypal_gateway::ipn::IpnVerifier;
use paypal_gateway::psp::mock::MockTransport;
use paypal_gateway::psp::paypal::PayPalProvider;
use paypal_gateway::psp::transport::{HttpTransport, Transport};
use paypal_gateway::psp::{
    CancelRecurringRequest, CaptureRequest, PaymentProvider, RefundRequest, TransactionRequest, VoidRequest,
};
use rust_decimal::Decimal;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file. Defaults to the user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log the requests instead of sending them; the gateway is assumed to accept.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture an authorized payment
    Capture {
        authorization_id: String,
        amount: Decimal,
        /// Currency code. Defaults to the store currency in the settings.
        #[arg(long)]
        currency: Option<String>,
    },
    /// Refund a captured payment in full
    Refund {
        capture_transaction_id: String,
        /// Accepted for compatibility; refunds are always full.
        #[arg(long)]
        amount: Option<Decimal>,
    },
    /// Void an authorization, or a capture when no authorization id is given
    Void {
        #[arg(long)]
        authorization_id: Option<String>,
        #[arg(long)]
        capture_id: Option<String>,
    },
    /// Cancel a recurring payments profile
    CancelRecurring { subscription_id: String },
    /// Verify a raw IPN body read from a file, or stdin when the path is `-`
    VerifyIpn {
        body: PathBuf,
        #[arg(long)]
        user_agent: Option<String>,
    },
    /// Write a settings file with default values
    InitConfig,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

type Transports = (Arc<dyn Transport>, Option<Arc<MockTransport>>);

fn build_transport(settings: &GatewaySettings, dry_run: bool, reply: &str) -> Result<Transports> {
    if dry_run {
        let mock = Arc::new(MockTransport::always(reply));
        let transport: Arc<dyn Transport> = mock.clone();
        return Ok((transport, Some(mock)));
    }
    let transport = HttpTransport::new(settings.request_timeout()).context("building HTTP client")?;
    Ok((Arc::new(transport), None))
}

fn read_body(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut body = String::new();
        std::io::stdin().read_to_string(&mut body)?;
        return Ok(body);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn to_request(command: Command, settings: &GatewaySettings) -> Option<TransactionRequest> {
    let request = match command {
        Command::Capture {
            authorization_id,
            amount,
            currency,
        } => TransactionRequest::Capture(CaptureRequest {
            authorization_id,
            order_total: amount,
            currency_code: currency.unwrap_or_else(|| settings.currency_code.clone()),
        }),
        Command::Refund {
            capture_transaction_id,
            amount,
        } => TransactionRequest::Refund(RefundRequest {
            capture_transaction_id,
            amount_to_refund: amount,
        }),
        Command::Void {
            authorization_id,
            capture_id,
        } => TransactionRequest::Void(VoidRequest {
            authorization_transaction_id: authorization_id,
            capture_transaction_id: capture_id,
        }),
        Command::CancelRecurring { subscription_id } => TransactionRequest::CancelRecurring(CancelRecurringRequest {
            subscription_transaction_id: subscription_id,
        }),
        Command::VerifyIpn { .. } | Command::InitConfig => return None,
    };
    Some(request)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Command::InitConfig = cli.command {
        let path = cli.config.unwrap_or_else(config_path);
        save_settings_to(&path, &GatewaySettings::default())
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "settings written");
        return Ok(());
    }

    let settings = match &cli.config {
        Some(path) => load_settings_from(path).with_context(|| format!("loading {}", path.display()))?,
        None => load_settings()
            .with_context(|| format!("loading {}", config_path().display()))?
            .unwrap_or_default(),
    };

    let output = match cli.command {
        Command::VerifyIpn { body, user_agent } => {
            let form = read_body(&body)?;
            let (transport, mock) = build_transport(&settings, cli.dry_run, "VERIFIED")?;
            let verifier = IpnVerifier::with_transport(&settings, transport);
            let notification = verifier.verify(form.trim_end(), user_agent.as_deref()).await?;
            log_dry_run(mock.as_deref());
            serde_json::to_string_pretty(&notification)?
        }
        command => {
            let request = to_request(command, &settings).context("not a gateway operation")?;
            let (transport, mock) = build_transport(&settings, cli.dry_run, "ACK=Success")?;
            let provider = PayPalProvider::with_transport(&settings, transport);
            let outcome = provider.process(&request).await?;
            log_dry_run(mock.as_deref());
            serde_json::to_string_pretty(&outcome)?
        }
    };

    println!("{output}");
    Ok(())
}

fn log_dry_run(mock: Option<&MockTransport>) {
    let Some(mock) = mock else {
        return;
    };
    for request in mock.requests() {
        let method = request.field("METHOD").unwrap_or_else(|| "notify-validate".to_string());
        info!(url = %request.url, method = %method, "dry run, request not sent");
    }
}
