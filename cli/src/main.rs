#[cfg(test)]
#[path = "main_test.rs"]
mod main_test;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use medmail::config::ConfigError;
use medmail::net::api::{DEFAULT_CATEGORY_DAYS, DEFAULT_HISTORY_LIMIT, DEFAULT_SYNC_DAYS, DEFAULT_TOP_SENDERS, DEFAULT_TREND_DAYS};
use medmail::net::types::{Email, EmailFilters, EmailStatus, LoginCredentials, Priority, RegisterData};
use medmail::poll::spawn_poller;
use medmail::state::analytics::{attachment_shares, category_rows, department_rows, overview_summary, trend_rows};
use medmail::state::assistant::{AssistantState, SUGGESTED_QUERIES};
use medmail::state::dashboard::{DashboardState, EMAILS_POLL_INTERVAL, InboxTab, OVERVIEW_POLL_INTERVAL, entity_rows, gmail_connected};
use medmail::state::format::{format_count, format_date};
use medmail::state::gmail::{self, GmailError};
use medmail::{ApiClient, ApiError, ClientConfig, FileSessionStorage, SessionError, SessionStore};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;


#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("not logged in; run `medmail login` first")]
    NotLoggedIn,
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{}", .0.detail())]
    Api(#[from] ApiError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Gmail(#[from] GmailError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("signal handling failed: {0}")]
    Signal(std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "medmail", about = "MedMail Intelligence command-line client")]
struct Cli {
    #[arg(long, env = "MEDMAIL_API_URL")]
    api_url: Option<String>,

    #[arg(long, env = "MEDMAIL_SESSION_FILE")]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "MEDMAIL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account, then sign in.
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "MEDMAIL_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        full_name: Option<String>,
    },
    /// Forget the stored session.
    Logout,
    /// Revalidate the stored session and print the current user.
    Whoami,
    Gmail(GmailCommand),
    Emails(EmailsCommand),
    Analytics(AnalyticsCommand),
    Query(QueryCommand),
}

#[derive(Args, Debug)]
struct GmailCommand {
    #[command(subcommand)]
    command: GmailSubcommand,
}

#[derive(Subcommand, Debug)]
enum GmailSubcommand {
    /// Print the consent URL to open in a browser.
    Connect,
    /// Finish linking with the redirect URL (or bare code).
    Callback { url_or_code: String },
}

#[derive(Args, Debug)]
struct EmailsCommand {
    #[command(subcommand)]
    command: EmailsSubcommand,
}

#[derive(Subcommand, Debug)]
enum EmailsSubcommand {
    /// Ask the backend to ingest recent Gmail messages.
    Sync {
        #[arg(long, default_value_t = DEFAULT_SYNC_DAYS)]
        days: u32,
    },
    List(ListArgs),
    Show {
        email_id: String,
    },
    Status {
        email_id: String,
        status: EmailStatus,
    },
    Delete {
        email_id: String,
    },
    /// Refresh the inbox and overview until interrupted.
    Watch {
        #[arg(long, default_value = "all")]
        tab: InboxTab,
        #[arg(long)]
        search: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ListArgs {
    #[arg(long, default_value = "all")]
    tab: InboxTab,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    priority: Option<Priority>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    date_from: Option<String>,
    #[arg(long)]
    date_to: Option<String>,
    #[arg(long)]
    skip: Option<u32>,
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct AnalyticsCommand {
    #[command(subcommand)]
    command: AnalyticsSubcommand,
}

#[derive(Subcommand, Debug)]
enum AnalyticsSubcommand {
    Overview,
    Categories {
        #[arg(long, default_value_t = DEFAULT_CATEGORY_DAYS)]
        days: u32,
    },
    Trends {
        #[arg(long, default_value_t = DEFAULT_TREND_DAYS)]
        days: u32,
    },
    Senders {
        #[arg(long, default_value_t = DEFAULT_TOP_SENDERS)]
        limit: u32,
    },
    Attachments,
    Departments,
}

#[derive(Args, Debug)]
struct QueryCommand {
    #[command(subcommand)]
    command: QuerySubcommand,
}

#[derive(Subcommand, Debug)]
enum QuerySubcommand {
    /// Ask a natural-language question about the inbox.
    Ask {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// List example questions.
    Suggestions,
    RebuildIndex,
    History {
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: u32,
    },
}

struct CliContext {
    api: ApiClient,
    session: SessionStore,
}

impl CliContext {
    fn new(cli: &Cli) -> Result<Self, CliError> {
        let mut config = ClientConfig::from_env()?;
        if let Some(api_url) = cli.api_url.as_deref() {
            config.api_url = api_url.trim().trim_end_matches('/').to_owned();
        }
        if let Some(path) = cli.session_file.clone() {
            config.session_file = path;
        }

        debug!(api_url = %config.api_url, session_file = %config.session_file.display(), "cli configured");
        let api = ApiClient::from_config(&config)?;
        let storage = Arc::new(FileSessionStorage::new(config.session_file));
        let session = SessionStore::restore(Arc::new(api.clone()), storage);
        Ok(Self { api, session })
    }

    /// API client carrying the stored bearer token.
    fn authed(&self) -> Result<ApiClient, CliError> {
        let token = self.session.token().ok_or(CliError::NotLoggedIn)?;
        Ok(self.api.with_token(token))
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let ctx = CliContext::new(&cli)?;

    match cli.command {
        Command::Login { email, password } => {
            ctx.session.login(LoginCredentials { username: email, password }).await?;
            print_signed_in(&ctx);
            Ok(())
        }
        Command::Register { email, password, full_name } => {
            ctx.session.register(RegisterData { email, password, full_name }).await?;
            print_signed_in(&ctx);
            Ok(())
        }
        Command::Logout => {
            ctx.session.logout()?;
            println!("signed out");
            Ok(())
        }
        Command::Whoami => {
            ctx.session.check_auth().await?;
            let user = ctx.session.user().ok_or(CliError::NotLoggedIn)?;
            print_json(&user)
        }
        Command::Gmail(gmail) => run_gmail(&ctx, gmail).await,
        Command::Emails(emails) => run_emails(&ctx, emails).await,
        Command::Analytics(analytics) => run_analytics(&ctx, analytics).await,
        Command::Query(query) => run_query(&ctx, query).await,
    }
}

fn print_signed_in(ctx: &CliContext) {
    if let Some(user) = ctx.session.user() {
        println!("signed in as {} <{}>", user.display_name(), user.email);
    }
}

async fn run_gmail(ctx: &CliContext, command: GmailCommand) -> Result<(), CliError> {
    let api = ctx.authed()?;
    match command.command {
        GmailSubcommand::Connect => {
            let url = gmail::authorization_url(&api).await?;
            println!("Open this URL to connect Gmail:\n{url}");
        }
        GmailSubcommand::Callback { url_or_code } => {
            let response = gmail::complete_callback(&api, &url_or_code).await?;
            println!("{}", response.message);
        }
    }
    Ok(())
}

async fn run_emails(ctx: &CliContext, emails: EmailsCommand) -> Result<(), CliError> {
    let api = ctx.authed()?;
    match emails.command {
        EmailsSubcommand::Sync { days } => {
            let response = api.sync_emails(days).await?;
            println!("{}", response.message);
        }
        EmailsSubcommand::List(args) => {
            let json = args.json;
            let filters = list_filters(args);
            let emails = api.list_emails(&filters).await?;
            if json {
                print_json(&emails)?;
            } else {
                print_inbox(&emails, None);
            }
        }
        EmailsSubcommand::Show { email_id } => {
            let email = api.get_email(&email_id).await?;
            print_email(&email);
        }
        EmailsSubcommand::Status { email_id, status } => {
            let response = api.update_email_status(&email_id, status).await?;
            println!("{}", response.message);
        }
        EmailsSubcommand::Delete { email_id } => {
            let response = api.delete_email(&email_id).await?;
            println!("{}", response.message);
        }
        EmailsSubcommand::Watch { tab, search } => watch_inbox(api, tab, search.unwrap_or_default()).await?,
    }
    Ok(())
}

fn list_filters(args: ListArgs) -> EmailFilters {
    let mut dashboard = DashboardState { search: args.search.unwrap_or_default(), ..DashboardState::default() };
    dashboard.set_tab(args.tab);
    let mut filters = dashboard.filters();
    filters.category = args.category;
    filters.priority = args.priority;
    filters.date_from = args.date_from;
    filters.date_to = args.date_to;
    filters.skip = args.skip;
    if args.limit.is_some() {
        filters.limit = args.limit;
    }
    filters
}

async fn watch_inbox(api: ApiClient, tab: InboxTab, search: String) -> Result<(), CliError> {
    let mut dashboard = DashboardState { search, ..DashboardState::default() };
    dashboard.set_tab(tab);
    dashboard.gmail_connected = gmail_connected(&api.current_user().await);
    if !dashboard.gmail_connected {
        println!("Gmail is not connected; run `medmail gmail connect`.");
    }

    let filters = dashboard.filters();
    let emails_api = api.clone();
    let (mut emails_rx, emails_task) = spawn_poller("emails", EMAILS_POLL_INTERVAL, move || {
        let api = emails_api.clone();
        let filters = filters.clone();
        async move { api.list_emails(&filters).await }
    });
    let overview_api = api.clone();
    let (mut overview_rx, overview_task) = spawn_poller("overview", OVERVIEW_POLL_INTERVAL, move || {
        let api = overview_api.clone();
        async move { api.overview().await }
    });

    let result = loop {
        tokio::select! {
            changed = emails_rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let latest = emails_rx.borrow_and_update().clone();
                if let Some(emails) = latest {
                    dashboard.apply_emails(emails);
                    print_inbox(&dashboard.emails, dashboard.selected.as_deref());
                }
            }
            changed = overview_rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                dashboard.overview = overview_rx.borrow_and_update().clone();
                for card in dashboard.stat_cards() {
                    println!("{:>16}: {}", card.label, card.value);
                }
            }
            signal = tokio::signal::ctrl_c() => break signal.map_err(CliError::Signal),
        }
    };

    emails_task.abort();
    overview_task.abort();
    result
}

async fn run_analytics(ctx: &CliContext, analytics: AnalyticsCommand) -> Result<(), CliError> {
    let api = ctx.authed()?;
    match analytics.command {
        AnalyticsSubcommand::Overview => {
            let overview = api.overview().await?;
            let summary = overview_summary(&overview);
            println!("Total emails:      {}", summary.total_emails);
            println!("Avg response time: {}", summary.avg_response);
            println!("High priority:     {}", summary.high_priority);
            for row in category_rows(&overview) {
                println!("  {:<24} {:>8} {:>6.2}%", row.category, format_count(row.count), row.percentage);
            }
        }
        AnalyticsSubcommand::Categories { days } => print_json(&api.category_distribution(days).await?)?,
        AnalyticsSubcommand::Trends { days } => {
            for row in trend_rows(&api.trends(days).await?) {
                println!("{} {}  {:>6}  {:.0}%", row.day, row.date, format_count(row.emails), row.width);
            }
        }
        AnalyticsSubcommand::Senders { limit } => {
            for sender in api.top_senders(limit).await? {
                println!("{:>6}  {}", format_count(sender.count), sender.sender);
            }
        }
        AnalyticsSubcommand::Attachments => {
            let stats = api.attachment_stats().await?;
            println!("{} attachments, {:.2} MB", format_count(stats.total_attachments), stats.total_size_mb);
            for share in attachment_shares(&stats) {
                println!("  {:<40} {:>6} {:>6.2}%", share.mime_type, format_count(share.count), share.percentage);
            }
        }
        AnalyticsSubcommand::Departments => {
            for row in department_rows(&api.department_stats().await?) {
                println!("{:<24} {:>6}  {}", row.name, format_count(row.emails), row.avg_response);
            }
        }
    }
    Ok(())
}

async fn run_query(ctx: &CliContext, query: QueryCommand) -> Result<(), CliError> {
    match query.command {
        QuerySubcommand::Suggestions => {
            for suggestion in SUGGESTED_QUERIES {
                println!("{suggestion}");
            }
        }
        QuerySubcommand::Ask { text } => {
            let api = ctx.authed()?;
            let mut assistant = AssistantState::default();
            assistant.ask(&api, &text.join(" ")).await;
            if let Some(reply) = assistant.last_reply() {
                println!("{}", reply.content);
            }
        }
        QuerySubcommand::RebuildIndex => {
            let response = ctx.authed()?.rebuild_index().await?;
            println!("{}", response.message);
        }
        QuerySubcommand::History { limit } => print_json(&ctx.authed()?.query_history(limit).await?)?,
    }
    Ok(())
}

fn print_inbox(emails: &[Email], selected: Option<&str>) {
    if emails.is_empty() {
        println!("No emails found.");
        return;
    }
    for email in emails {
        let marker = if selected == Some(email.id.as_str()) { '>' } else { ' ' };
        let priority = email.priority.map_or("-", |p| p.as_str());
        println!(
            "{marker} {:<10} {:<9} {:<6} {:<32} {}",
            email.id,
            email.status.as_str(),
            priority,
            email.sender,
            email.subject
        );
    }
}

fn print_email(email: &Email) {
    println!("Subject:  {}", email.subject);
    println!("From:     {}", email.sender);
    println!("Date:     {}", format_date(&email.timestamp));
    println!("Status:   {}", email.status.as_str());
    if let Some(category) = email.category.as_deref() {
        println!("Category: {category}");
    }
    if let Some(priority) = email.priority {
        println!("Priority: {priority}");
    }
    if let Some(summary) = email.summary.as_deref() {
        println!("\n{summary}");
    }
    let entities = entity_rows(email);
    if !entities.is_empty() {
        println!();
        for (label, value) in entities {
            println!("{label}: {value}");
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
