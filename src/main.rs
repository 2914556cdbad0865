use std::fs;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use forgeward::access::{AccessResolver, Actor, Grants};
use forgeward::config::ForgeConfig;
use forgeward::identity::{Identity, USER_GROUP_TYPE};
use forgeward::lifecycle::{Git2Backend, NewProjectRequest, RepoKind, RepoSetLifecycle, repo_relpath};
use forgeward::notify::{LogNotifier, ProjectRef};
use forgeward::projects::Projects;
use forgeward::search::{PrivateFilter, ProjectSearch, SearchCriteria, SearchOutput};
use forgeward::store::{SqliteStore, Store};
use forgeward::types::{AccessLevel, Project, SortOrder};

#[derive(Parser)]
#[command(name = "forgeward")]
#[command(about = "Project access and repository lifecycle for a git forge", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overriding the config file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and repository folders
    Init,

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage groups
    Group {
        #[command(subcommand)]
        command: GroupCommands,
    },

    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user
    Add {
        username: String,
        #[arg(long)]
        fullname: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
}

#[derive(Subcommand)]
enum GroupCommands {
    /// Create a group, with the acting user as its first admin member
    Add {
        name: String,
        #[arg(long)]
        display_name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "type", default_value = USER_GROUP_TYPE)]
        group_type: String,
        /// Acting user
        #[arg(long = "as")]
        actor: String,
    },

    /// Add a user to a group
    Join {
        group: String,
        username: String,
        #[arg(long)]
        admin: bool,
        /// Acting user
        #[arg(long = "as")]
        actor: String,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a project and its repositories
    Create {
        name: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        private: bool,
    },

    /// Fork a project into the user's forks
    Fork {
        /// `[forks/<user>/][namespace/]name`
        project: String,
        #[arg(long)]
        user: String,
    },

    /// Delete a project and its repositories
    Delete {
        project: String,
        /// Acting user
        #[arg(long = "as")]
        actor: String,
    },

    /// Grant a user, or a group with --group, access to a project
    Grant {
        project: String,
        grantee: String,
        level: String,
        #[arg(long)]
        group: bool,
        /// Acting user
        #[arg(long = "as")]
        actor: String,
    },

    /// Show the access a user has on a project
    Access { project: String, username: String },

    /// List projects
    Search(SearchArgs),
}

#[derive(Args)]
struct SearchArgs {
    /// Projects this user owns or has access to
    #[arg(long)]
    username: Option<String>,
    /// Owner name, or `!name` to exclude an owner
    #[arg(long, allow_hyphen_values = true)]
    owner: Option<String>,
    #[arg(long)]
    namespace: Option<String>,
    /// Project name, `*` matches anything
    #[arg(long)]
    pattern: Option<String>,
    /// Only forks
    #[arg(long, conflicts_with = "no_forks")]
    forks: bool,
    /// Only projects that are not forks
    #[arg(long)]
    no_forks: bool,
    /// Include the private projects this user can see
    #[arg(long, conflicts_with = "all")]
    viewer: Option<String>,
    /// Include every private project
    #[arg(long)]
    all: bool,
    /// Minimum access for --username
    #[arg(long)]
    min_access: Option<String>,
    #[arg(long, value_enum, default_value_t = SortArg::Name)]
    sort: SortArg,
    #[arg(long, allow_hyphen_values = true)]
    start: Option<i64>,
    #[arg(long, allow_hyphen_values = true)]
    limit: Option<i64>,
    /// Print the number of matches only
    #[arg(long)]
    count: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Name,
    Latest,
    Oldest,
}

impl From<SortArg> for SortOrder {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Name => SortOrder::Name,
            SortArg::Latest => SortOrder::Latest,
            SortArg::Oldest => SortOrder::Oldest,
        }
    }
}

/// Splits `[forks/<user>/][namespace/]name`.
fn parse_project_ref(raw: &str) -> anyhow::Result<(Option<&str>, Option<&str>, &str)> {
    let raw = raw.trim_matches('/');
    let (fork_owner, rest) = match raw.strip_prefix("forks/") {
        Some(rest) => match rest.split_once('/') {
            Some((user, rest)) => (Some(user), rest),
            None => bail!("invalid fork reference: {raw}"),
        },
        None => (None, raw),
    };
    let (namespace, name) = match rest.split_once('/') {
        Some((ns, name)) => (Some(ns), name),
        None => (None, rest),
    };
    if name.is_empty() || name.contains('/') {
        bail!("invalid project reference: {raw}");
    }
    Ok((fork_owner, namespace, name))
}

struct Forge {
    config: ForgeConfig,
    store: SqliteStore,
}

impl Forge {
    fn open(config: ForgeConfig) -> anyhow::Result<Self> {
        let db_path = config.db_path();
        if !db_path.exists() {
            bail!(
                "No database at {}. Run 'forgeward init' first.",
                db_path.display()
            );
        }
        let store =
            SqliteStore::new(&db_path)?.with_busy_timeout(config.database.busy_timeout())?;
        Ok(Self { config, store })
    }

    fn actor(&self, username: &str) -> anyhow::Result<Actor> {
        AccessResolver::new(&self.store, &self.config.access)
            .actor(username)?
            .with_context(|| format!("unknown user {username}"))
    }

    fn project(&self, raw: &str, viewer: Option<&Actor>) -> anyhow::Result<Project> {
        let (fork_owner, namespace, name) = parse_project_ref(raw)?;
        Projects::new(&self.store, &self.config.access, &LogNotifier)
            .get_authorized_project(name, namespace, fork_owner, viewer)?
            .with_context(|| format!("project {raw} not found"))
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ForgeConfig> {
    let mut config = match &cli.config {
        Some(path) => ForgeConfig::load(path)?,
        None => ForgeConfig::default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    Ok(config)
}

fn run_init(config: &ForgeConfig) -> anyhow::Result<()> {
    fs::create_dir_all(&config.data_dir)?;
    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;

    let folders = config.repo_folders();
    for kind in RepoKind::ALL {
        if let Some(root) = folders.root(kind) {
            fs::create_dir_all(root)?;
        }
    }

    info!("Initialized {}", config.data_dir.display());
    println!("Initialized forge data in {}", config.data_dir.display());
    Ok(())
}

fn print_project(project: &Project) {
    let path = ProjectRef::from(project).path;
    if project.private {
        println!("{path} (private)");
    } else {
        println!("{path}");
    }
}

fn run_user(ctx: &Forge, command: UserCommands) -> anyhow::Result<()> {
    let identity = Identity::new(&ctx.store, &ctx.config, &LogNotifier);
    match command {
        UserCommands::Add {
            username,
            fullname,
            email,
        } => {
            let user = identity.create_user(&username, fullname.as_deref(), email.as_deref())?;
            println!("Created user {} (id {})", user.username, user.id);
        }
    }
    Ok(())
}

fn run_group(ctx: &Forge, command: GroupCommands) -> anyhow::Result<()> {
    let identity = Identity::new(&ctx.store, &ctx.config, &LogNotifier);
    match command {
        GroupCommands::Add {
            name,
            display_name,
            description,
            group_type,
            actor,
        } => {
            let actor = ctx.actor(&actor)?;
            let group = identity.create_group(
                &name,
                &display_name,
                description.as_deref(),
                &group_type,
                &actor,
            )?;
            println!("Created group {}", group.group_name);
        }
        GroupCommands::Join {
            group,
            username,
            admin,
            actor,
        } => {
            let actor = ctx.actor(&actor)?;
            if identity.add_user_to_group(&group, &username, admin, &actor)? {
                println!("Added {username} to {group}");
            } else {
                println!("{username} is already a member of {group}");
            }
        }
    }
    Ok(())
}

fn run_project(ctx: &Forge, command: ProjectCommands) -> anyhow::Result<()> {
    let folders = ctx.config.repo_folders();
    let lifecycle = RepoSetLifecycle::new(
        &ctx.store,
        &Git2Backend,
        &LogNotifier,
        &ctx.config.naming,
        &folders,
    );

    match command {
        ProjectCommands::Create {
            name,
            owner,
            namespace,
            description,
            private,
        } => {
            let mut request = NewProjectRequest::new(owner, name).private(private);
            request.namespace = namespace;
            request.description = description;
            let project = lifecycle.create_project(&request)?;
            println!("Created project {}", ProjectRef::from(&project).path);
        }
        ProjectCommands::Fork { project, user } => {
            let actor = ctx.actor(&user)?;
            let source = ctx.project(&project, Some(&actor))?;
            let fork = lifecycle.fork_project(&source, &user)?;
            println!("Forked {project} to {}", ProjectRef::from(&fork).path);
        }
        ProjectCommands::Delete { project, actor } => {
            let actor = ctx.actor(&actor)?;
            let target = ctx.project(&project, Some(&actor))?;
            AccessResolver::new(&ctx.store, &ctx.config.access).require(
                &actor,
                &target,
                AccessLevel::Admin,
            )?;
            lifecycle.delete_project(&target, actor.username())?;
            println!("Deleted project {project}");
        }
        ProjectCommands::Grant {
            project,
            grantee,
            level,
            group,
            actor,
        } => {
            let actor = ctx.actor(&actor)?;
            let target = ctx.project(&project, Some(&actor))?;
            let level = AccessLevel::parse_grant(&level)?;
            let grants = Grants::new(&ctx.store, &ctx.config.access, &LogNotifier);
            let outcome = if group {
                grants.add_group_to_project(&target, &grantee, level, &actor)?
            } else {
                grants.add_user_to_project(&target, &grantee, level, &actor)?
            };
            println!("{outcome:?} {level} access for {grantee} on {project}");
        }
        ProjectCommands::Access { project, username } => {
            let (fork_owner, namespace, name) = parse_project_ref(&project)?;
            let relpath = repo_relpath(fork_owner, namespace, name);
            let target = ctx
                .store
                .get_project_by_path(&relpath)?
                .with_context(|| format!("project {project} not found"))?;
            let resolver = AccessResolver::new(&ctx.store, &ctx.config.access);
            let actor = resolver.actor(&username)?;
            let access = resolver.resolve_access(actor.as_ref(), &target)?;
            println!("{access}");
        }
        ProjectCommands::Search(args) => run_search(ctx, args)?,
    }
    Ok(())
}

fn run_search(ctx: &Forge, args: SearchArgs) -> anyhow::Result<()> {
    let private = match (args.viewer, args.all) {
        (_, true) => PrivateFilter::IncludeAll,
        (Some(viewer), false) => PrivateFilter::VisibleTo(viewer),
        (None, false) => PrivateFilter::ExcludeAll,
    };
    let fork = match (args.forks, args.no_forks) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    let criteria = SearchCriteria {
        username: args.username,
        owner: args.owner,
        fork,
        namespace: args.namespace,
        pattern: args.pattern,
        private,
        min_access: args
            .min_access
            .as_deref()
            .map(AccessLevel::parse_grant)
            .transpose()?,
        sort: args.sort.into(),
        start: args.start,
        limit: args.limit,
        count: args.count,
        ..Default::default()
    };

    match ProjectSearch::new(&ctx.store, &ctx.config.access).search_projects(&criteria)? {
        SearchOutput::Count(count) => println!("{count}"),
        SearchOutput::Rows(rows) => rows.iter().for_each(print_project),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("forgeward=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Init => run_init(&config),
        Commands::User { command } => run_user(&Forge::open(config)?, command),
        Commands::Group { command } => run_group(&Forge::open(config)?, command),
        Commands::Project { command } => run_project(&Forge::open(config)?, command),
    }
}
