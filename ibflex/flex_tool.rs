// flex_tool.rs
// Use it like this:
// flex_tool --config flex.toml positions
// flex_tool --record exchanges.db --session daily returns
// flex_tool --replay exchanges.db --session daily returns

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ibflex::{
  conn::{HttpSettings, HttpTransport, Transport},
  conn_log::{ExchangeLogger, LoggingTransport},
  conn_mock::ReplayTransport,
  flex_data::FlexQueryResponse,
  parse_statement, printer, stock,
  CancelToken, FlexClient, FlexConfig, PortalClient, TransactionStore,
};

// --- CLI Argument Parsing ---

#[derive(Parser, Debug)]
#[command(author, version, about = "Interactive Brokers Flex statements, positions and ledger", long_about = None)]
struct Args {
  /// Configuration file.
  #[arg(long, default_value = "flex.toml")]
  config: PathBuf,

  /// Flex query id, overrides `ib.query_id`.
  #[arg(long)]
  query: Option<String>,

  /// Give up on the whole run after this many seconds.
  #[arg(long)]
  timeout: Option<u64>,

  /// Record every HTTP exchange into this SQLite database.
  #[arg(long, conflicts_with = "replay")]
  record: Option<PathBuf>,

  /// Serve HTTP exchanges from this SQLite database instead of the network.
  #[arg(long)]
  replay: Option<PathBuf>,

  /// Session name used with --record / --replay.
  #[arg(long, default_value = "default")]
  session: String,

  /// Read the statement from a saved XML file instead of the Flex Web Service.
  #[arg(long)]
  statement: Option<PathBuf>,

  #[clap(subcommand)]
  command: Command,
}

#[derive(Parser, Debug)]
enum Command {
  /// Retrieve the Flex report and print (or save) the raw XML.
  Report {
    #[arg(long)]
    output: Option<PathBuf>,
  },
  /// List the trades of the statement.
  Trades,
  /// Open positions ranked by return.
  Positions,
  /// Annualized return of every open lot.
  Returns,
  /// Unrealized P&L of every stored symbol at the current gateway price.
  Pnl,
  /// Store the statement's trades and cash transactions.
  Import,
  /// Ledger summary of one stored symbol, or of all of them.
  Summary {
    symbol: Option<String>,
    /// Fetch the last price from the gateway.
    #[arg(long)]
    with_price: bool,
  },
  /// Positions reported by the Client Portal Gateway.
  PortalPositions {
    /// Account id, overrides `portal.account_id`.
    #[arg(long)]
    account: Option<String>,
  },
  /// Resolve a stock symbol to its contract id.
  Conid { symbol: String },
  /// Last traded price of a stock symbol.
  Price { symbol: String },
}

/// Builds the transport stack for one run: live, live + recording, or replay.
fn create_transport(args: &Args, settings: &HttpSettings) -> Result<Box<dyn Transport>> {
  if let Some(db_path) = &args.replay {
    info!("Replaying session '{}' from {:?}", args.session, db_path);
    if !db_path.exists() {
      return Err(anyhow!("Database path does not exist: {:?}", db_path));
    }
    let replay = ReplayTransport::new(db_path, &args.session).context("Failed to open replay session")?;
    return Ok(Box::new(replay));
  }
  let http = HttpTransport::new(settings).context("Failed to create HTTP transport")?;
  match &args.record {
    Some(db_path) => {
      if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create directory for DB: {:?}", parent))?;
      }
      let logger = ExchangeLogger::new(db_path, &args.session).context("Failed to start exchange logger")?;
      Ok(Box::new(LoggingTransport::new(http, logger)))
    }
    None => Ok(Box::new(http)),
  }
}

fn load_statement_xml(args: &Args, config: &FlexConfig, cancel: &CancelToken) -> Result<Vec<u8>> {
  if let Some(path) = &args.statement {
    info!("Reading statement from {:?}", path);
    return std::fs::read(path).with_context(|| format!("Failed to read statement file {:?}", path));
  }
  let request = config.report_request(args.query.as_deref()).context("Pass --query or set ib.query_id")?;
  let transport = create_transport(args, &config.flex_http_settings())?;
  let client = FlexClient::new(transport, config.flex_settings(), config.retry_policy());
  let retrieval = client
    .retrieve(&request, cancel)
    .with_context(|| format!("Failed to retrieve Flex query {}", request.query_id))?;
  info!(
    "Statement {} ready after {} attempt(s), {} bytes",
    retrieval.reference_code,
    retrieval.attempts,
    retrieval.payload.as_bytes().len()
  );
  Ok(retrieval.payload.0)
}

fn load_statement(args: &Args, config: &FlexConfig, cancel: &CancelToken) -> Result<FlexQueryResponse> {
  let xml = load_statement_xml(args, config, cancel)?;
  parse_statement(&xml).context("Failed to decode statement")
}

fn portal_client(args: &Args, config: &FlexConfig) -> Result<PortalClient<Box<dyn Transport>>> {
  let transport = create_transport(args, &config.portal_http_settings())?;
  Ok(PortalClient::new(transport, &config.portal.base_url, config.portal_retry_policy()))
}

fn open_store(config: &FlexConfig) -> Result<TransactionStore> {
  TransactionStore::open(&config.store.path)
    .with_context(|| format!("Failed to open transaction store {:?}", config.store.path))
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
  match path {
    Some(path) => std::fs::write(path, bytes).with_context(|| format!("Failed to write {:?}", path)),
    None => {
      println!("{}", String::from_utf8_lossy(bytes));
      Ok(())
    }
  }
}

fn run(args: &Args, config: &FlexConfig, cancel: &CancelToken) -> Result<()> {
  let today = Local::now().date_naive();
  match &args.command {
    Command::Report { output } => {
      let xml = load_statement_xml(args, config, cancel)?;
      write_output(output.as_deref(), &xml)?;
    }
    Command::Trades => {
      let statement = load_statement(args, config, cancel)?;
      let trades: Vec<_> = statement.trades().cloned().collect();
      print!("{}", printer::format_trades(&trades));
    }
    Command::Positions => {
      let statement = load_statement(args, config, cancel)?;
      let (longs, shorts) = stock::rank_positions(statement.open_positions());
      print!("{}", printer::format_position_returns(&longs));
      print!("{}", printer::format_short_positions(&shorts));
    }
    Command::Returns => {
      let statement = load_statement(args, config, cancel)?;
      print!("{}", printer::format_lot_returns(&stock::lot_returns(statement.open_positions(), today)));
    }
    Command::Import => {
      let statement = load_statement(args, config, cancel)?;
      let mut store = open_store(config)?;
      let summary = store.import_statement(&statement).context("Failed to store transactions")?;
      println!(
        "Imported {} transactions into {:?} ({} already stored, {} skipped)",
        summary.inserted, config.store.path, summary.duplicates, summary.skipped
      );
    }
    Command::Pnl => {
      let store = open_store(config)?;
      let portal = portal_client(args, config)?;
      let mut rows = Vec::new();
      for symbol in store.symbols()? {
        let ledger = store.ledger(&symbol)?;
        if ledger.shares() <= 0.0 {
          continue;
        }
        match portal.price(&symbol, cancel) {
          Ok(price) => rows.push((symbol, price, ledger.unrealized_pnl(price))),
          Err(e) => error!("No price for {}: {}", symbol, e),
        }
      }
      print!("{}", printer::format_unrealized(&rows));
    }
    Command::Summary { symbol, with_price } => {
      let store = open_store(config)?;
      let portal = if *with_price { Some(portal_client(args, config)?) } else { None };
      let symbols = match symbol {
        Some(s) => vec![s.trim().to_uppercase()],
        None => store.symbols()?,
      };
      for symbol in symbols {
        let ledger = store.ledger(&symbol)?;
        let price = match &portal {
          Some(p) => match p.price(&symbol, cancel) {
            Ok(price) => Some(price),
            Err(e) => {
              warn!("No price for {}: {}", symbol, e);
              None
            }
          },
          None => None,
        };
        println!("{}", printer::format_ledger_summary(&ledger, price, today));
      }
    }
    Command::PortalPositions { account } => {
      let account = account
        .clone()
        .or_else(|| config.portal.account_id.clone())
        .ok_or_else(|| anyhow!("No account id: pass --account or set portal.account_id"))?;
      let positions = portal_client(args, config)?.positions(&account)?;
      print!("{}", printer::format_portal_positions(&positions));
    }
    Command::Conid { symbol } => {
      let conid = portal_client(args, config)?.conid(symbol)?;
      println!("{} {}", symbol.to_uppercase(), conid);
    }
    Command::Price { symbol } => {
      let price = portal_client(args, config)?.price(symbol, cancel)?;
      println!("{} {:.2}", symbol.to_uppercase(), price);
    }
  }
  Ok(())
}

// --- Main Execution Logic ---
fn main() -> Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let args = Args::parse();

  let config = FlexConfig::load(&args.config).context("Configuration error")?;
  let cancel = CancelToken::new();
  if let Some(secs) = args.timeout {
    // The deadline thread is detached; it exits with the process.
    let _ = cancel.cancel_after(Duration::from_secs(secs));
  }

  if let Err(e) = run(&args, &config, &cancel) {
    error!("{:#}", e);
    return Err(e);
  }
  Ok(())
}
