use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use gitwispr_auth::{
    AuthConfig, AuthError, AuthorizationCoordinator, FlowOutcome, LocalServer, LocalServerConfig,
    PendingFlowRegistry, RedirectIngress, RoutingMode, SystemBrowser, TokenRequestFormat,
    UserAgent,
};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Debug, Parser)]
#[command(
    name = "gitwispr-auth",
    about = "Sign in to GitHub through the browser and print the access token as JSON."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full authorization flow through a loopback redirect.
    Login(LoginArgs),
    /// Print the authorization URL without starting a flow.
    AuthorizeUrl(ClientArgs),
}

#[derive(Debug, Args)]
struct ClientArgs {
    #[arg(long, env = "GITWISPR_CLIENT_ID")]
    client_id: String,

    #[arg(long, env = "GITWISPR_CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,

    #[arg(long, default_value = gitwispr_auth::DEFAULT_SCOPE)]
    scope: String,

    /// Loopback port registered as the OAuth app's callback.
    #[arg(long, default_value_t = 8765)]
    port: u16,
}

#[derive(Debug, Args)]
struct LoginArgs {
    #[command(flatten)]
    client: ClientArgs,

    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Send a PKCE challenge with the authorization request.
    #[arg(long)]
    pkce: bool,

    /// Require the redirect to echo the flow's `state`.
    #[arg(long)]
    correlate_state: bool,

    /// Only print the URL; do not try to open a browser.
    #[arg(long)]
    no_browser: bool,

    /// HTML file shown in the browser after a successful sign-in.
    #[arg(long)]
    success_page: Option<PathBuf>,

    /// HTML file shown in the browser when the redirect fails.
    #[arg(long)]
    error_page: Option<PathBuf>,
}

impl ClientArgs {
    fn config(&self) -> AuthConfig {
        let redirect_uri = LocalServerConfig::loopback(self.port).redirect_uri();
        AuthConfig::github(&self.client_id, &self.client_secret)
            .with_redirect_uri(redirect_uri)
            .with_scope(&self.scope)
            .with_token_format(TokenRequestFormat::Form)
    }
}

impl LoginArgs {
    /// Receiver listening on exactly the redirect URI sent to GitHub.
    fn receiver_config(
        &self,
        redirect_uri: &str,
        timeout: Duration,
    ) -> Result<LocalServerConfig, AuthError> {
        let mut receiver =
            LocalServerConfig::from_redirect_uri(redirect_uri)?.with_timeout(timeout);
        if let Some(path) = &self.success_page {
            receiver = receiver.with_success_html(std::fs::read_to_string(path)?);
        }
        if let Some(path) = &self.error_page {
            receiver = receiver.with_error_html(std::fs::read_to_string(path)?);
        }
        Ok(receiver)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, AuthError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Login(args) => run_login(args).await,
        Command::AuthorizeUrl(args) => {
            let coordinator = AuthorizationCoordinator::new(args.config(), SystemBrowser)?;
            println!("{}", coordinator.authorization_url(None, None)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_login(args: LoginArgs) -> Result<ExitCode, AuthError> {
    let timeout = Duration::from_secs(args.timeout_secs);
    let config = args
        .client
        .config()
        .with_pkce(args.pkce)
        .with_timeout(Duration::from_secs(30));
    let server = LocalServer::from_config(args.receiver_config(&config.redirect_uri, timeout)?)?;

    let mode = if args.correlate_state {
        RoutingMode::Correlated
    } else {
        RoutingMode::Exclusive
    };
    let no_browser = args.no_browser;
    let user_agent = move |url: &Url| -> Result<(), AuthError> {
        eprintln!("Authorization URL:\n{url}");
        if no_browser {
            return Ok(());
        }
        if let Err(err) = SystemBrowser.present(url) {
            eprintln!("Failed to open browser automatically: {err}");
        }
        Ok(())
    };

    let coordinator = AuthorizationCoordinator::new(config, user_agent)?
        .with_registry(Arc::new(PendingFlowRegistry::new(mode)))
        .with_flow_timeout(timeout);

    let listener = server.bind()?;
    let ingress = RedirectIngress::new(coordinator.clone());
    let serving = tokio::spawn(async move { server.serve(listener, ingress).await });

    let (_handle, outcome) = coordinator.start_flow_awaitable()?;
    let outcome = outcome.await.map_err(|_| AuthError::Launch {
        message: "authorization flow was dropped before completing".to_string(),
    });

    match serving.await {
        Ok(Err(err)) => tracing::debug!(error = %err, "redirect receiver stopped"),
        Err(err) => tracing::debug!(error = %err, "redirect receiver task failed"),
        Ok(Ok(_)) => {}
    }

    match outcome? {
        FlowOutcome::Success(token) => {
            let output = serde_json::json!({ "access_token": token.as_str() });
            println!("{output}");
            Ok(ExitCode::SUCCESS)
        }
        FlowOutcome::Failure(failure) => {
            eprintln!("Authorization failed: {failure}");
            Ok(ExitCode::FAILURE)
        }
    }
}
