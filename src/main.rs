use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use env_logger::Target;
use log::{error, info, LevelFilter};
use ratatui::prelude::*;

use leadpass::app::{App, AppError, AppResult};
use leadpass::config::{log_dir, open_log_file, Config, SECRET_KEYS};
use leadpass::credentials::SecretStore;
use leadpass::crm::{ActivitySearch, CrmClient, LeadSearch};
use leadpass::fields::{definitions_table, format_activity, format_activity_brief, format_record, mapping_code};
use leadpass::mailer::Mailer;
use leadpass::records::ParentRef;
use leadpass::templates::TemplateSet;
use leadpass::ui::ui;

/// Lead dashboard for CRM form submissions and rejection emails
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the email templates file
    #[clap(short, long)]
    templates: Option<String>,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,

    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the most recently created leads with all fields
    RecentLeads {
        /// Number of leads
        #[clap(short, long, default_value = "3")]
        count: u32,
    },

    /// List recent activities
    Activities {
        /// Number of activities
        #[clap(long, default_value = "25")]
        page_size: u32,
    },

    /// Show an opportunity and its latest activities
    Opportunity {
        /// Opportunity ID
        id: i64,

        /// Number of activities
        #[clap(long, default_value = "10")]
        activities: u32,
    },

    /// List custom field definitions and generate the field mapping table
    FieldDefinitions {
        /// Write the generated mapping to this file
        #[clap(long)]
        save: Option<String>,
    },

    /// Check CRM credentials with a one-record search
    VerifyCrm,

    /// Check the SMTP connection and login
    TestEmail,

    /// Store a secret in the system keyring (read from stdin if no value is given)
    SetSecret {
        /// COPPER_API_TOKEN or EMAIL_PASSWORD
        key: String,
        value: Option<String>,
    },

    /// Remove a secret from the system keyring
    DeleteSecret {
        /// COPPER_API_TOKEN or EMAIL_PASSWORD
        key: String,
    },
}

fn check_secret_key(key: &str) -> Result<()> {
    if !SECRET_KEYS.contains(&key) {
        bail!("Unknown secret '{}'. Expected one of: {}", key, SECRET_KEYS.join(", "));
    }
    Ok(())
}

fn crm_client(config: &Config) -> Result<CrmClient> {
    CrmClient::new(&config.crm).context("Failed to create CRM client")
}

fn run_command(command: Commands, config: &Config, secrets: &SecretStore) -> Result<()> {
    match command {
        Commands::RecentLeads { count } => {
            let leads = crm_client(config)?.search_leads_raw(&LeadSearch::recent(count))?;
            if leads.is_empty() {
                println!("No leads found.");
            }
            for (i, lead) in leads.iter().enumerate() {
                println!("=== Lead {} ===", i + 1);
                println!("{}", format_record(lead));
            }
        }
        Commands::Activities { page_size } => {
            let activities = crm_client(config)?.search_activities(&ActivitySearch::recent(page_size))?;
            println!("Found {} activities", activities.len());
            for activity in &activities {
                println!("{}", format_activity(activity));
            }
        }
        Commands::Opportunity { id, activities } => {
            let client = crm_client(config)?;
            let record = client.get_opportunity_raw(id)?;
            println!("=== Opportunity {} ===", id);
            println!("{}", format_record(&record));

            let search = ActivitySearch::for_parent(ParentRef::opportunity(id), activities);
            let found = client.search_activities(&search)?;
            println!("=== Latest {} activities ===", found.len());
            for activity in &found {
                println!("{}", format_activity_brief(activity));
            }
        }
        Commands::FieldDefinitions { save } => {
            let definitions = crm_client(config)?.custom_field_definitions()?;
            println!("Found {} custom field definitions\n", definitions.len());
            println!("{}", definitions_table(&definitions));

            let code = mapping_code(&definitions);
            println!("{}", code);
            if let Some(path) = save {
                let path = shellexpand::tilde(&path).into_owned();
                fs::write(&path, code).with_context(|| format!("Failed to write {}", path))?;
                println!("Saved mapping to {}", path);
            }
        }
        Commands::VerifyCrm => {
            println!("{}", crm_client(config)?.verify()?);
        }
        Commands::TestEmail => {
            println!("{}", Mailer::new(config.mail.clone()).test_connection()?);
        }
        Commands::SetSecret { key, value } => {
            check_secret_key(&key)?;
            let value = match value {
                Some(value) => value,
                None => {
                    println!("Enter value for {}:", key);
                    let mut line = String::new();
                    io::stdin().lock().read_line(&mut line).context("Failed to read value")?;
                    line.trim().to_string()
                }
            };
            if value.is_empty() {
                bail!("Refusing to store an empty value for {}", key);
            }
            secrets.store(&key, &value)?;
            println!("Stored {} in the system keyring", key);
        }
        Commands::DeleteSecret { key } => {
            check_secret_key(&key)?;
            secrets.delete(&key)?;
            println!("Removed {} from the system keyring", key);
        }
    }
    Ok(())
}

/// Subcommands log to stderr. The dashboard owns the terminal, so its log
/// goes to a file, or nowhere when no cache directory is available.
fn init_logging(debug: bool, dashboard: bool) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if debug { LevelFilter::Debug } else { LevelFilter::Info });

    if dashboard {
        match log_dir().map(|dir| open_log_file(&dir)) {
            Some(Ok((path, file))) => {
                println!("Logging to {}", path.display());
                builder.target(Target::Pipe(Box::new(file)));
            }
            _ => {
                builder.filter_level(LevelFilter::Off);
            }
        }
    }

    builder.init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.debug, args.command.is_none());

    // A missing .env file is fine
    if let Ok(path) = dotenvy::dotenv() {
        info!("Loaded environment from {}", path.display());
    }

    let secrets = SecretStore::new();
    let mut config = Config::from_env(&secrets).context("Invalid configuration")?;
    if let Some(path) = &args.templates {
        config.templates_path = Some(PathBuf::from(shellexpand::tilde(path).into_owned()));
    }
    config.log_summary();

    if let Some(cmd) = args.command {
        return run_command(cmd, &config, &secrets);
    }

    if !config.crm_configured() {
        println!("CRM credentials not configured. Set COPPER_EMAIL and COPPER_API_TOKEN, or store the token with:");
        println!("  leadpass set-secret COPPER_API_TOKEN");
        return Ok(());
    }

    let templates = TemplateSet::load(config.templates_path.as_deref());
    let mut app = App::new(config, templates).context("Failed to create dashboard")?;

    // Setup terminal
    enable_raw_mode().context("Failed to enable raw mode")?;
    io::stdout()
        .execute(EnterAlternateScreen)
        .context("Failed to enter alternate screen")?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))
        .context("Failed to create terminal")?;

    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode().context("Failed to disable raw mode")?;
    io::stdout()
        .execute(LeaveAlternateScreen)
        .context("Failed to leave alternate screen")?;

    if let Err(err) = result {
        error!("Error: {:?}", err);
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> AppResult<()> {
    // Draw once so the operator sees something while leads load
    terminal.draw(|frame| ui(frame, app))?;
    app.init();

    let mut consecutive_errors = 0;
    const MAX_CONSECUTIVE_ERRORS: u32 = 10;

    loop {
        if let Err(e) = terminal.draw(|frame| ui(frame, app)) {
            consecutive_errors += 1;
            if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                return Err(AppError::IoError(e));
            }
            continue;
        }

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Err(e) = app.handle_key_event(key) {
                        app.show_error(&format!("Error: {}", e));
                        consecutive_errors += 1;

                        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                            return Err(e);
                        }
                    } else {
                        consecutive_errors = 0;
                    }

                    if app.should_quit {
                        return Ok(());
                    }
                }
            }
        }

        app.tick();
    }
}
