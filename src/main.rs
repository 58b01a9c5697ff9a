mod api;
mod app;
mod auth;
mod cache;
mod config;
mod events;
mod prefetch;
mod session;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::cache::{AccountScope, Period};

#[derive(Parser, Debug)]
#[command(name = "quo")]
#[command(about = "Command-line client for the Quo personal-finance backend")]
#[command(version)]
struct Cli {
  /// Path to config file (default: $XDG_CONFIG_HOME/quo/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Sign in and store the session
  Login {
    email: String,
    #[arg(long)]
    password: String,
  },
  /// Create an account and sign in
  Signup {
    email: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
  },
  /// Show the signed-in user, verifying the stored token
  Whoami,
  /// Sign out and drop cached data
  Logout,
  /// List linked bank accounts
  Accounts,
  /// Set the active account ("all" for the aggregate view)
  Select { account: String },
  /// Spending analysis for a period
  Spending {
    /// month, year, or all
    #[arg(long, default_value = "month")]
    period: String,
    /// Account id (defaults to the selected account)
    #[arg(long)]
    account: Option<String>,
    /// Bypass the cache
    #[arg(long)]
    refresh: bool,
  },
  /// Spending trends and forecast
  Trends {
    #[arg(long, default_value_t = 6)]
    months: u32,
    #[arg(long)]
    account: Option<String>,
  },
  /// Savings opportunities and detected subscriptions
  Savings {
    #[arg(long)]
    account: Option<String>,
  },
  /// Bank-link status and persistence
  Link {
    #[command(subcommand)]
    command: LinkCommand,
  },
  /// Interactive dashboard (resident mode; the cache stays warm)
  Dashboard,
}

#[derive(Subcommand, Debug)]
enum LinkCommand {
  /// Check whether a bank connection exists
  Status,
  /// Persist a completed bank-link consent
  Save {
    #[arg(long)]
    basiq_user_id: String,
    #[arg(long)]
    institution: String,
    /// Linked account ids
    account_ids: Vec<String>,
  },
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::data_dir()?.join("quo").join("logs");
  std::fs::create_dir_all(&log_dir).ok()?;

  let appender = tracing_appender::rolling::daily(log_dir, "quo.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quo=info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Some(guard)
}

fn parse_period(s: &str) -> Result<Period> {
  Period::parse(s).ok_or_else(|| eyre!("Unknown period '{}'; expected month, year, or all", s))
}

fn scope_override(account: Option<String>) -> Option<AccountScope> {
  account.map(|id| {
    if id.eq_ignore_ascii_case("all") {
      AccountScope::All
    } else {
      AccountScope::Account(id)
    }
  })
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _log_guard = init_tracing();

  let cli = Cli::parse();
  let config = config::Config::load(cli.config.as_deref())?;
  let app = app::App::new(config)?;

  match cli.command {
    Command::Login { email, password } => {
      let user = app.login(&email, &password).await?;
      println!("Signed in as {} {} ({})", user.first_name, user.last_name, user.email);
    }
    Command::Signup {
      email,
      password,
      first_name,
      last_name,
    } => {
      let user = app.signup(&email, &password, &first_name, &last_name).await?;
      println!("Welcome, {} - account created and signed in", user.first_name);
    }
    Command::Whoami => match app.whoami().await? {
      Some(user) => println!("{} {} ({})", user.first_name, user.last_name, user.email),
      None => println!("Not signed in"),
    },
    Command::Logout => {
      app.logout()?;
      println!("Signed out");
    }
    Command::Accounts => {
      let accounts = app.accounts().await?;
      if accounts.is_empty() {
        println!("No linked accounts. Run `quo link status` to check your bank connection.");
      }
      let selected = app.selected_account();
      for account in accounts {
        let marker = if selected.as_deref() == Some(account.id.as_str()) {
          "*"
        } else {
          " "
        };
        println!("{} {}  {}", marker, account.id, account.name);
      }
    }
    Command::Select { account } => {
      let target = if account.eq_ignore_ascii_case("all") {
        None
      } else {
        Some(account)
      };
      if app.select_account(target.clone())? {
        println!(
          "Active account: {}",
          target.as_deref().unwrap_or("all accounts")
        );
      } else {
        println!("Selection unchanged");
      }
    }
    Command::Spending {
      period,
      account,
      refresh,
    } => {
      let period = parse_period(&period)?;
      let analysis = app
        .spending(period, scope_override(account), refresh)
        .await?;

      let label = analysis
        .period_label
        .as_deref()
        .or(analysis.period.as_deref())
        .unwrap_or(period.as_str());
      println!(
        "Spending for {} ({}): total {:.2}",
        label,
        analysis.account_name.as_deref().unwrap_or("all accounts"),
        analysis.total
      );
      if let Some(count) = analysis.num_transactions {
        println!("transactions: {}", count);
      }
      if let Some(avg) = analysis.average_monthly {
        println!("average monthly: {:.2}", avg);
      }
      for category in &analysis.categories {
        println!("  {:<24} {:>12.2}", category.name, category.amount);
      }
      for group in &analysis.grouped_categories {
        println!(
          "  [{}] {:.2} ({:.1}%)",
          group.name, group.total, group.percentage
        );
        for category in &group.categories {
          println!("    {:<22} {:>12.2}", category.name, category.amount);
        }
      }
      for (month, total) in &analysis.monthly_breakdown {
        println!("  {}  {:>12.2}", month, total);
      }
      if let Some(insights) = &analysis.insights {
        println!("insights: {}", insights);
      }
      if let Some(message) = &analysis.message {
        println!("note: {}", message);
      }
    }
    Command::Trends { months, account } => {
      let trends = app.trends(months, scope_override(account)).await?;
      for month in &trends.trends {
        println!("{}  {:>12.2}", month.month, month.total);
      }
      if let Some(insights) = &trends.insights {
        if let Some(avg) = insights.average_monthly {
          let span = insights.months_analyzed.unwrap_or(months);
          println!("average monthly: {:.2} over {} months", avg, span);
        }
        if let Some(prediction) = insights.next_month_prediction {
          println!("next month (predicted): {:.2}", prediction);
        }
        if let (Some(trend), Some(rate)) = (&insights.trend, insights.change_rate) {
          println!("trend: {} ({:+.1}%)", trend, rate);
        }
        if let (Some(rating), Some(volatility)) =
          (&insights.volatility_rating, insights.volatility)
        {
          println!("volatility: {} ({:.2})", rating, volatility);
        }
      }
      for (name, total) in &trends.top_categories {
        println!("top category: {} ({:.2})", name, total);
      }
      for pattern in &trends.patterns {
        println!("pattern ({}): {}", pattern.kind, pattern.description);
      }
    }
    Command::Savings { account } => {
      let savings = app.savings(scope_override(account)).await?;
      for opportunity in &savings.opportunities {
        println!(
          "[{}/{}] {} - potential {:.2} ({})",
          opportunity.kind,
          opportunity.category,
          opportunity.description,
          opportunity.savings_potential,
          opportunity.difficulty
        );
        if !opportunity.suggestion.is_empty() {
          println!("  suggestion: {}", opportunity.suggestion);
        }
      }
      if let Some(total) = savings.total_potential_savings {
        println!("total potential savings: {:.2}", total);
      }
    }
    Command::Link { command } => match command {
      LinkCommand::Status => {
        let status = app.link_status().await?;
        if status.has_connections {
          println!("Bank connected ({} connection(s))", status.connection_count);
        } else {
          println!("No bank connection");
        }
      }
      LinkCommand::Save {
        basiq_user_id,
        institution,
        account_ids,
      } => {
        app
          .save_link(&basiq_user_id, &institution, &account_ids)
          .await?;
        println!("Connection saved for {}", institution);
      }
    },
    Command::Dashboard => app.dashboard().await?,
  }

  Ok(())
}
