use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use aidgov::{initialize, parse_value, AppState, RootConfig, RootError};
use aidgov_core::{ActorType, ChangeId, EntityId, IdentityId};
use aidgov_policy::{display_value, EditDecision, SessionContext};
use aidgov_review::{EditOutcome, EditRequest};

/// aidgov: field-level data governance for aid distribution records
///
/// Decides per field and per actor whether an edit applies directly, waits
/// for admin review, or needs a one-time passcode, and runs the review queue.
#[derive(Parser, Debug)]
#[command(name = "aidgov", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Session attributes of the acting user.
#[derive(Args, Debug, Clone)]
struct SessionArgs {
    /// Authenticated identity id
    #[arg(long)]
    identity: Option<String>,

    /// Role identifier attached to the session
    #[arg(long)]
    role: Option<String>,

    /// Type of the record the identity is linked to (organization, family)
    #[arg(long, requires = "linked_id")]
    linked_type: Option<String>,

    /// Id of the record the identity is linked to
    #[arg(long, requires = "linked_type")]
    linked_id: Option<String>,

    /// Display name recorded on proposals
    #[arg(long)]
    name: Option<String>,
}

impl SessionArgs {
    fn context(&self) -> Option<SessionContext> {
        let identity = self.identity.as_ref()?;
        let mut session = SessionContext::new(identity.as_str());
        if let Some(role) = &self.role {
            session = session.role(role.as_str());
        }
        if let (Some(kind), Some(id)) = (&self.linked_type, &self.linked_id) {
            session = session.associated_with(kind.as_str(), EntityId::new(id.as_str()));
        }
        if let Some(name) = &self.name {
            session = session.named(name.as_str());
        }
        Some(session)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and write the configuration file
    Init {
        /// SQLite database path
        #[arg(long)]
        database: Option<PathBuf>,

        /// TOML field policy file replacing the built-in table
        #[arg(long)]
        policy_file: Option<PathBuf>,
    },

    /// Print the field policy table
    Policy {
        /// Print the table as a TOML policy file
        #[arg(long)]
        toml: bool,
    },

    /// Show what happens when an actor type edits a field
    Check {
        field: String,

        /// admin, organization, family or beneficiary
        #[arg(long)]
        actor: ActorType,
    },

    /// Classify a session into an actor type
    Classify {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Load a field value without governance checks
    Set {
        entity: String,
        field: String,
        /// JSON value, or plain text
        value: String,
    },

    /// Submit an edit as the given session
    Edit {
        entity: String,
        field: String,
        /// JSON value, or plain text
        value: String,

        #[command(flatten)]
        session: SessionArgs,

        /// The editor completed one-time passcode verification
        #[arg(long)]
        otp_verified: bool,
    },

    /// List pending changes, newest first
    Pending {
        /// Only changes for this entity
        #[arg(long)]
        entity: Option<String>,
    },

    /// Show an entity's fields and change history
    Show {
        entity: String,
    },

    /// Approve a pending change and apply it
    Approve {
        change_id: String,

        #[arg(long)]
        reviewer: String,
    },

    /// Reject a pending change
    Reject {
        change_id: String,

        #[arg(long)]
        reviewer: String,

        #[arg(long)]
        reason: String,
    },

    /// Close pending changes whose proposed value is already live
    Reconcile,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("aidgov=debug,aidgov_policy=debug,aidgov_review=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("aidgov=info,aidgov_review=warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<RootConfig, RootError> {
    match path {
        Some(p) => RootConfig::load(p),
        None => {
            let default_path = RootConfig::default_config_path();
            RootConfig::load(&default_path)
        }
    }
}

fn open_state(config_path: Option<&PathBuf>) -> Result<AppState, RootError> {
    initialize(load_config(config_path)?)
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), RootError> {
    let config = cli.config.as_ref();
    match cli.command {
        Commands::Init {
            database,
            policy_file,
        } => cmd_init(config, database, policy_file),
        Commands::Policy { toml } => cmd_policy(config, toml),
        Commands::Check { field, actor } => cmd_check(config, &field, actor),
        Commands::Classify { session } => cmd_classify(config, &session),
        Commands::Set {
            entity,
            field,
            value,
        } => cmd_set(config, &entity, &field, &value),
        Commands::Edit {
            entity,
            field,
            value,
            session,
            otp_verified,
        } => cmd_edit(config, &entity, &field, &value, &session, otp_verified),
        Commands::Pending { entity } => cmd_pending(config, entity.as_deref()),
        Commands::Show { entity } => cmd_show(config, &entity),
        Commands::Approve {
            change_id,
            reviewer,
        } => cmd_approve(config, &change_id, &reviewer),
        Commands::Reject {
            change_id,
            reviewer,
            reason,
        } => cmd_reject(config, &change_id, &reviewer, &reason),
        Commands::Reconcile => cmd_reconcile(config),
    }
}

fn cmd_init(
    config_path: Option<&PathBuf>,
    database: Option<PathBuf>,
    policy_file: Option<PathBuf>,
) -> Result<(), RootError> {
    let mut config = load_config(config_path)?;

    if let Some(db) = database {
        config.database_path = db;
    }
    if policy_file.is_some() {
        config.policy.policy_file = policy_file;
    }

    info!("initializing aidgov");

    let state = initialize(config.clone())?;

    let save_path = config_path
        .cloned()
        .unwrap_or_else(RootConfig::default_config_path);
    config.save(&save_path)?;

    println!("aidgov initialized.");
    println!("  Database: {}", state.config.database_path.display());
    println!("  Fields:   {} governed", state.registry.len());
    println!("  Config:   {}", save_path.display());

    Ok(())
}

fn cmd_policy(config_path: Option<&PathBuf>, as_toml: bool) -> Result<(), RootError> {
    let config = load_config(config_path)?;
    let registry = aidgov::load_registry(&config.policy)?;

    if as_toml {
        print!("{}", registry.to_toml_string()?);
        return Ok(());
    }

    println!(
        "{:<20} {:>5}  {:<8} {:<4}  {}",
        "FIELD", "LEVEL", "APPROVAL", "OTP", "ALLOWED"
    );
    for policy in registry.iter() {
        let allowed: Vec<&str> = policy
            .allowed_actor_types
            .iter()
            .map(|a| a.as_str())
            .collect();
        println!(
            "{:<20} {:>5}  {:<8} {:<4}  {}",
            policy.field_name,
            policy.level,
            yes_no(policy.requires_approval),
            yes_no(policy.requires_otp),
            allowed.join(", ")
        );
    }
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn cmd_check(config_path: Option<&PathBuf>, field: &str, actor: ActorType) -> Result<(), RootError> {
    let state = open_state(config_path)?;
    let engine = state.engine();

    let outcome = match engine.decide(field, actor) {
        EditDecision::Forbidden => "forbidden",
        EditDecision::ApplyDirectly { .. } => "applies directly",
        EditDecision::RequiresApproval { .. } => "queued for admin approval",
    };
    println!(
        "{} ({}) edited by {}: {}",
        state.formatter.display_name(field),
        field,
        actor,
        outcome
    );
    println!("  level:       {}", engine.level(field));
    println!("  description: {}", engine.description(field));
    println!("  otp:         {}", yes_no(engine.requires_otp(field)));
    Ok(())
}

fn cmd_classify(config_path: Option<&PathBuf>, session: &SessionArgs) -> Result<(), RootError> {
    let state = open_state(config_path)?;
    let context = session.context();
    println!("{}", state.classifier.classify(context.as_ref()));
    Ok(())
}

fn cmd_set(
    config_path: Option<&PathBuf>,
    entity: &str,
    field: &str,
    value: &str,
) -> Result<(), RootError> {
    let state = open_state(config_path)?;
    state.import_field(&EntityId::new(entity), field, &parse_value(value))?;
    println!("{} {} set.", entity, field);
    Ok(())
}

fn cmd_edit(
    config_path: Option<&PathBuf>,
    entity: &str,
    field: &str,
    value: &str,
    session: &SessionArgs,
    otp_verified: bool,
) -> Result<(), RootError> {
    let state = open_state(config_path)?;
    let context = session.context().ok_or_else(|| {
        RootError::InvalidArgument("edits require an authenticated --identity".into())
    })?;
    let proposer = state.classifier.proposer(&context);

    let request = EditRequest::new(EntityId::new(entity), field, parse_value(value), proposer)
        .otp_verified(otp_verified);

    match state.manager.submit_edit(request)? {
        EditOutcome::Applied => println!("Applied directly."),
        EditOutcome::Queued(change) => {
            println!("Queued for admin approval.");
            println!("{}", state.render_change(&change));
        }
    }
    Ok(())
}

fn cmd_pending(config_path: Option<&PathBuf>, entity: Option<&str>) -> Result<(), RootError> {
    let state = open_state(config_path)?;
    let entity = entity.map(EntityId::new);
    let changes = state.manager.list_pending(entity.as_ref())?;

    println!("Pending changes ({}):", changes.len());
    if changes.is_empty() {
        println!("  (none)");
    }
    for change in &changes {
        println!("{}", state.render_change(change));
    }
    Ok(())
}

fn cmd_show(config_path: Option<&PathBuf>, entity: &str) -> Result<(), RootError> {
    let state = open_state(config_path)?;
    let entity_id = EntityId::new(entity);

    println!("{}:", entity_id);
    for (field, value) in state.entity_fields(&entity_id)? {
        println!(
            "  {} ({}): {}",
            state.formatter.display_name(&field),
            field,
            display_value(&field, Some(&value))
        );
    }

    let history = state.manager.history(&entity_id, None)?;
    if !history.is_empty() {
        println!("History:");
        for change in &history {
            println!("{}", state.render_change(change));
        }
    }
    Ok(())
}

fn cmd_approve(
    config_path: Option<&PathBuf>,
    change_id: &str,
    reviewer: &str,
) -> Result<(), RootError> {
    let state = open_state(config_path)?;
    let change = state
        .manager
        .approve(&ChangeId::new(change_id), &IdentityId::new(reviewer))?;
    println!("Approved.");
    println!("{}", state.render_change(&change));
    Ok(())
}

fn cmd_reject(
    config_path: Option<&PathBuf>,
    change_id: &str,
    reviewer: &str,
    reason: &str,
) -> Result<(), RootError> {
    let state = open_state(config_path)?;
    let change = state
        .manager
        .reject(&ChangeId::new(change_id), &IdentityId::new(reviewer), reason)?;
    println!("Rejected.");
    println!("{}", state.render_change(&change));
    Ok(())
}

fn cmd_reconcile(config_path: Option<&PathBuf>) -> Result<(), RootError> {
    let state = open_state(config_path)?;
    let closed = state.manager.reconcile()?;
    println!("Reconciled {} change(s).", closed.len());
    for change in &closed {
        println!("{}", state.render_change(change));
    }
    Ok(())
}
