//! Clap argument types and their conversion into library options.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use secretsweep::client::ScanOptions;
use secretsweep::models::{DiscoveryQuery, DiscoveryState, OrderBy, SortDirection};
use secretsweep::output::{DiscoveryReport, JsonRenderer, OutputRenderer, TerminalRenderer};

/// Hard-coded secret scanner for git history, snapshots, pull requests and local trees.
#[derive(Parser, Debug)]
#[command(name = "secretsweep", version = secretsweep::constants::VERSION)]
pub struct Cli {
    /// Load KEY=VALUE lines from this file before reading configuration.
    #[arg(long, global = true)]
    pub dotenv: Option<PathBuf>,

    /// Use the embedded database at this path instead of the networked one.
    #[arg(long, global = true)]
    pub sqlite: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(clap::Subcommand, Debug)]
#[command(rename_all = "snake_case")]
pub enum Command {
    /// Load rules from a YAML rules file.
    AddRules(AddRulesArgs),

    /// Scan the history of every branch of a repository.
    Scan(ScanArgs),

    /// Scan a local directory tree without git.
    ScanPath(ScanPathArgs),

    /// Scan the tree of a branch or commit.
    ScanSnapshot(ScanSnapshotArgs),

    /// Scan the commits of a pull request.
    ScanPr(ScanPrArgs),

    /// Scan the history of a repository's wiki.
    ScanWiki(ScanArgs),

    /// Scan every public repository of a user.
    ScanUser(ScanUserArgs),

    /// List stored discoveries of a repository.
    GetDiscoveries(GetDiscoveriesArgs),

    /// Move discoveries to a new state.
    UpdateDiscoveries(UpdateDiscoveriesArgs),

    /// Pre-commit hook: scan staged changes.
    Hook(HookArgs),

    /// Download a classifier model.
    Download(DownloadArgs),
}

#[derive(Parser, Debug)]
pub struct AddRulesArgs {
    /// YAML file with a top-level `rules:` list.
    pub file: PathBuf,

    /// Write the stored rules to this file after loading.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

/// Rule selection shared by scans and the hook.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RuleArgs {
    /// Only use rules of this category.
    #[arg(long)]
    pub category: Option<String>,

    /// Rule ids to leave out.
    #[arg(long, num_args = 1.., value_name = "ID")]
    pub exclude: Vec<i64>,
}

/// Flags shared by every `scan*` verb.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ScanFlags {
    #[command(flatten)]
    pub rules: RuleArgs,

    /// Classifiers to run over new discoveries, in order.
    #[arg(long, num_args = 1.., value_name = "MODEL")]
    pub models: Vec<String>,

    /// Ignore the stored scan marker and rescan everything.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Store embeddings of surviving discoveries for similarity propagation.
    #[arg(long, default_value_t = false)]
    pub similarity: bool,

    #[arg(long = "git_token")]
    pub git_token: Option<String>,

    #[arg(long = "git_username")]
    pub git_username: Option<String>,

    /// Hosting API base URL.
    #[arg(long = "api_endpoint")]
    pub api_endpoint: Option<String>,

    /// Treat the repository argument as a local clone.
    #[arg(long, default_value_t = false)]
    pub local: bool,
}

impl ScanFlags {
    pub fn options(&self) -> ScanOptions {
        ScanOptions {
            category: self.rules.category.clone(),
            exclude: self.rules.exclude.clone(),
            models: self.models.clone(),
            force: self.force,
            similarity: self.similarity,
            local: self.local,
            ..ScanOptions::default()
        }
    }
}

/// Tree walk limits for snapshot and path scans.
#[derive(clap::Args, Debug, Clone)]
pub struct TreeArgs {
    /// Maximum directory depth, -1 for unlimited.
    #[arg(long = "max_depth", default_value_t = -1, allow_negative_numbers = true)]
    pub max_depth: i64,

    /// Glob patterns of paths to skip.
    #[arg(long, num_args = 1.., value_name = "GLOB")]
    pub ignore: Vec<String>,
}

impl TreeArgs {
    fn apply(&self, options: &mut ScanOptions) {
        options.max_depth = self.max_depth;
        options.ignore = self.ignore.clone();
    }
}

#[derive(Parser, Debug)]
pub struct ScanArgs {
    /// Repository URL (or path with --local).
    pub repo_url: String,

    /// Walk at most this many commits per branch.
    #[arg(long = "max_commits")]
    pub max_commits: Option<usize>,

    #[command(flatten)]
    pub flags: ScanFlags,
}

impl ScanArgs {
    pub fn options(&self) -> ScanOptions {
        ScanOptions {
            max_commits: self.max_commits,
            ..self.flags.options()
        }
    }
}

#[derive(Parser, Debug)]
pub struct ScanPathArgs {
    pub path: PathBuf,

    #[command(flatten)]
    pub tree: TreeArgs,

    #[command(flatten)]
    pub flags: ScanFlags,
}

impl ScanPathArgs {
    pub fn options(&self) -> ScanOptions {
        let mut options = self.flags.options();
        self.tree.apply(&mut options);
        options
    }
}

#[derive(Parser, Debug)]
pub struct ScanSnapshotArgs {
    pub repo_url: String,

    /// Branch name or commit id.
    #[arg(long, default_value = "HEAD")]
    pub branch: String,

    #[command(flatten)]
    pub tree: TreeArgs,

    #[command(flatten)]
    pub flags: ScanFlags,
}

impl ScanSnapshotArgs {
    pub fn options(&self) -> ScanOptions {
        let mut options = self.flags.options();
        self.tree.apply(&mut options);
        options
    }
}

#[derive(Parser, Debug)]
pub struct ScanPrArgs {
    pub repo_url: String,

    /// Pull request number.
    pub pr: u64,

    #[command(flatten)]
    pub flags: ScanFlags,
}

#[derive(Parser, Debug)]
pub struct ScanUserArgs {
    pub user: String,

    #[command(flatten)]
    pub flags: ScanFlags,
}

#[derive(Parser, Debug)]
pub struct GetDiscoveriesArgs {
    pub repo_url: String,

    /// Only discoveries in this file.
    #[arg(long = "file_name")]
    pub file_name: Option<String>,

    /// Only discoveries in this state.
    #[arg(long, value_parser = parse_state)]
    pub state: Option<DiscoveryState>,

    /// Substring of the snippet or file name.
    #[arg(long = "where")]
    pub search: Option<String>,

    /// Distinct snippets per page.
    #[arg(long)]
    pub limit: Option<i64>,

    #[arg(long)]
    pub offset: Option<i64>,

    #[arg(long = "order_by")]
    pub order_by: Option<OrderBy>,

    #[arg(long)]
    pub direction: Option<SortDirection>,

    /// Print JSON instead of a table.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl GetDiscoveriesArgs {
    pub fn query(&self) -> DiscoveryQuery {
        DiscoveryQuery {
            file_name: self.file_name.clone(),
            state: self.state,
            search: self.search.clone(),
            limit: self.limit,
            offset: self.offset,
            order_by: self.order_by,
            direction: self.direction,
        }
    }

    pub fn format(&self) -> OutputFormat {
        if self.json { OutputFormat::Json } else { OutputFormat::Terminal }
    }
}

#[derive(Parser, Debug)]
pub struct UpdateDiscoveriesArgs {
    /// Discovery ids.
    #[arg(required = true, num_args = 1..)]
    pub ids: Vec<i64>,

    #[arg(long, value_parser = parse_state)]
    pub state: DiscoveryState,

    /// Also move `new` discoveries with similar snippets.
    #[arg(long, default_value_t = false)]
    pub similarity: bool,

    /// Similarity threshold (default from `[similarity] threshold`).
    #[arg(long)]
    pub threshold: Option<f32>,
}

#[derive(Parser, Debug)]
pub struct HookArgs {
    /// Directory inside the repository (default: current directory).
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Block immediately on findings instead of asking.
    #[arg(long = "no_interaction", default_value_t = false)]
    pub no_interaction: bool,

    #[command(flatten)]
    pub rules: RuleArgs,
}

impl HookArgs {
    pub fn options(&self) -> ScanOptions {
        ScanOptions {
            category: self.rules.category.clone(),
            exclude: self.rules.exclude.clone(),
            ..ScanOptions::default()
        }
    }
}

#[derive(Parser, Debug)]
pub struct DownloadArgs {
    /// Model name; its archive URL is read from the environment variable of the same name.
    pub model: String,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    Terminal,
    Json,
}

impl OutputFormat {
    pub fn render(&self, report: &DiscoveryReport) -> String {
        match self {
            OutputFormat::Terminal => TerminalRenderer.render(report),
            OutputFormat::Json => JsonRenderer.render(report),
        }
    }
}

fn parse_state(raw: &str) -> Result<DiscoveryState, String> {
    raw.parse().map_err(|e: secretsweep::models::ModelError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn verbs_use_snake_case() {
        for verb in ["scan_path", "scan_snapshot", "scan_wiki"] {
            let cli = Cli::try_parse_from(["secretsweep", verb, "x"]);
            assert!(cli.is_ok(), "{verb} should parse");
        }
        assert!(Cli::try_parse_from(["secretsweep", "scan-path", "x"]).is_err());
    }

    #[test]
    fn scan_flags_map_to_options() {
        let cli = parse(&[
            "secretsweep",
            "--sqlite",
            "db.sqlite",
            "scan",
            "https://example.test/acme/app",
            "--category",
            "aws",
            "--models",
            "path_model",
            "entropy_model",
            "--exclude",
            "3",
            "4",
            "--force",
            "--git_token",
            "t0k",
        ]);
        assert_eq!(cli.sqlite, Some(PathBuf::from("db.sqlite")));
        let Command::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        let options = args.options();
        assert_eq!(options.category.as_deref(), Some("aws"));
        assert_eq!(options.models, vec!["path_model", "entropy_model"]);
        assert_eq!(options.exclude, vec![3, 4]);
        assert!(options.force);
        assert!(!options.local);
        assert_eq!(args.flags.git_token.as_deref(), Some("t0k"));
    }

    #[test]
    fn tree_limits_apply_to_path_scans() {
        let cli = parse(&["secretsweep", "scan_path", "/src", "--max_depth", "0", "--ignore", "vendor/**"]);
        let Command::ScanPath(args) = cli.command else {
            panic!("expected scan_path");
        };
        let options = args.options();
        assert_eq!(options.max_depth, 0);
        assert_eq!(options.ignore, vec!["vendor/**"]);

        let cli = parse(&["secretsweep", "scan_snapshot", "u"]);
        let Command::ScanSnapshot(args) = cli.command else {
            panic!("expected scan_snapshot");
        };
        assert_eq!(args.branch, "HEAD");
        assert_eq!(args.options().max_depth, -1);
    }

    #[test]
    fn pr_number_is_positional() {
        let cli = parse(&["secretsweep", "scan_pr", "https://example.test/acme/app", "42", "--local"]);
        let Command::ScanPr(args) = cli.command else {
            panic!("expected scan_pr");
        };
        assert_eq!(args.pr, 42);
        assert!(args.flags.options().local);
    }

    #[test]
    fn discovery_query_flags() {
        let cli = parse(&[
            "secretsweep",
            "get_discoveries",
            "u",
            "--state",
            "false_positive",
            "--where",
            "password",
            "--limit",
            "10",
            "--order_by",
            "category",
            "--direction",
            "desc",
            "--json",
        ]);
        let Command::GetDiscoveries(args) = cli.command else {
            panic!("expected get_discoveries");
        };
        let query = args.query();
        assert_eq!(query.state, Some(DiscoveryState::FalsePositive));
        assert_eq!(query.search.as_deref(), Some("password"));
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.order_by, Some(OrderBy::Category));
        assert_eq!(query.direction, Some(SortDirection::Desc));
        assert_eq!(args.format(), OutputFormat::Json);
    }

    #[test]
    fn invalid_state_is_rejected_at_parse_time() {
        assert!(Cli::try_parse_from(["secretsweep", "get_discoveries", "u", "--state", "closed"]).is_err());
    }

    #[test]
    fn update_discoveries_flags() {
        let cli = parse(&[
            "secretsweep",
            "update_discoveries",
            "4",
            "7",
            "--state",
            "not_relevant",
            "--similarity",
            "--threshold",
            "0.97",
        ]);
        let Command::UpdateDiscoveries(args) = cli.command else {
            panic!("expected update_discoveries");
        };
        assert_eq!(args.ids, vec![4, 7]);
        assert_eq!(args.state, DiscoveryState::NotRelevant);
        assert!(args.similarity);
        assert_eq!(args.threshold, Some(0.97));

        assert!(Cli::try_parse_from(["secretsweep", "update_discoveries", "--state", "fixed"]).is_err());
    }

    #[test]
    fn hook_defaults() {
        let cli = parse(&["secretsweep", "hook", "--no_interaction"]);
        let Command::Hook(args) = cli.command else {
            panic!("expected hook");
        };
        assert!(args.no_interaction);
        assert_eq!(args.path, PathBuf::from("."));
        assert!(args.options().models.is_empty());
    }

    #[test]
    fn output_format_render_empty() {
        let empty = DiscoveryReport::default();
        assert!(OutputFormat::Terminal.render(&empty).contains("No discoveries"));
        assert!(OutputFormat::Json.render(&empty).contains("\"discoveries\""));
    }
}
