use std::path::PathBuf;

use anyhow::{Context, Result};
use asc_cli::envelope::{Document, ListResponse};
use asc_cli::query::{Granularity, ListOptions, MetricsOptions, QueryBag};
use asc_cli::resources::apps::Apps;
use asc_cli::resources::game_center::{
    GameCenterAchievements, GameCenterDetails, ImageTarget, Metric,
};
use asc_cli::resources::pass_type_ids::PassTypeIds;
use asc_cli::resources::webhooks::{WebhookDeliveries, Webhooks};
use asc_cli::resources::{ResourceFamily, required_id};
use asc_cli::util::{parse_limit, resource_rows, split_csv};
use asc_cli::{AppStoreConnectClient, CallContext, Config, UploadOutcome};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Parser, Debug)]
#[command(name = "asc", version, about = "App Store Connect CLI in Rust", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print lists as `id<TAB>name` rows instead of JSON
    #[arg(long, global = true)]
    pub table: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a freshly minted bearer token
    Token,
    /// Apps
    #[command(subcommand)]
    Apps(AppsCmd),
    /// Webhooks and their deliveries
    #[command(subcommand)]
    Webhooks(WebhooksCmd),
    /// Pass Type IDs
    #[command(name = "pass-type-ids", subcommand)]
    PassTypeIds(PassTypeIdsCmd),
    /// Game Center achievements, metrics and images
    #[command(name = "game-center", subcommand)]
    GameCenter(GameCenterCmd),
    /// GET an arbitrary API path (e.g. `v1/apps?limit=5`) or a `links.next` URL
    Get {
        path: String,
        /// Follow `links.next` until exhausted
        #[arg(long)]
        paginate: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Page size (1-200)
    #[arg(long, value_parser = parse_limit)]
    limit: Option<u32>,
    /// Continue from a `links.next` URL; other query flags are ignored
    #[arg(long)]
    next: Option<String>,
    /// Fetch every page
    #[arg(long)]
    paginate: bool,
}

impl ListArgs {
    fn options<F: ResourceFamily>(&self) -> ListOptions<F> {
        let mut options = ListOptions::new();
        if let Some(limit) = self.limit {
            options = options.limit(limit);
        }
        if let Some(next) = &self.next {
            options = options.next_url(next.clone());
        }
        options
    }
}

#[derive(Subcommand, Debug)]
pub enum AppsCmd {
    /// List apps
    List {
        #[command(flatten)]
        list: ListArgs,
        /// Comma-separated bundle identifiers
        #[arg(long)]
        bundle_id: Option<String>,
        /// Comma-separated app names
        #[arg(long)]
        name: Option<String>,
        /// Sort field, `-` prefix for descending
        #[arg(long)]
        sort: Option<String>,
    },
    /// Show one app
    Get { id: String },
}

#[derive(Subcommand, Debug)]
pub enum WebhooksCmd {
    /// List webhooks of an app
    List {
        #[arg(long)]
        app: String,
        #[command(flatten)]
        list: ListArgs,
    },
    /// Show one webhook
    Get { id: String },
    /// Delete a webhook
    Delete { id: String },
    /// Send a test event
    Ping { id: String },
    /// List deliveries of a webhook
    Deliveries {
        id: String,
        /// Comma-separated delivery states (e.g. FAILED,SUCCEEDED)
        #[arg(long)]
        state: Option<String>,
        #[command(flatten)]
        list: ListArgs,
    },
    /// Re-send a past delivery
    Redeliver { delivery: String },
}

#[derive(Subcommand, Debug)]
pub enum PassTypeIdsCmd {
    /// List Pass Type IDs
    List {
        #[command(flatten)]
        list: ListArgs,
    },
    /// List linked certificate ids
    Certificates {
        id: String,
        #[command(flatten)]
        list: ListArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum GameCenterCmd {
    /// Achievements of a Game Center detail
    #[command(subcommand)]
    Achievements(AchievementsCmd),
    /// Matchmaking metrics
    Metrics {
        #[arg(value_enum)]
        metric: MetricArg,
        /// Queue, rule or Game Center detail id, depending on the metric
        id: String,
        /// P1D, PT1H or PT15M
        #[arg(long)]
        granularity: Option<String>,
        /// Comma-separated dimensions
        #[arg(long)]
        group_by: Option<String>,
        #[arg(long, value_parser = parse_limit)]
        limit: Option<u32>,
        #[arg(long)]
        next: Option<String>,
    },
    /// Localization images
    #[command(subcommand)]
    Images(ImagesCmd),
}

#[derive(Subcommand, Debug)]
pub enum AchievementsCmd {
    List {
        /// Game Center detail id
        #[arg(long)]
        detail: String,
        #[command(flatten)]
        list: ListArgs,
    },
}

#[derive(Subcommand, Debug)]
pub enum ImagesCmd {
    /// Reserve, upload and commit an image file
    Upload {
        /// achievement, leaderboard, leaderboard-set, activity or challenge
        #[arg(long)]
        kind: String,
        /// Localization the image belongs to
        #[arg(long)]
        localization: String,
        file: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum MetricArg {
    QueueSizes,
    QueueRequests,
    QueueSessions,
    BooleanRuleResults,
    NumberRuleResults,
    RuleErrors,
    ClassicRequests,
    RuleBasedRequests,
}

impl From<MetricArg> for Metric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::QueueSizes => Metric::QueueSizes,
            MetricArg::QueueRequests => Metric::QueueRequests,
            MetricArg::QueueSessions => Metric::QueueSessions,
            MetricArg::BooleanRuleResults => Metric::BooleanRuleResults,
            MetricArg::NumberRuleResults => Metric::NumberRuleResults,
            MetricArg::RuleErrors => Metric::RuleErrors,
            MetricArg::ClassicRequests => Metric::ClassicMatchmakingRequests,
            MetricArg::RuleBasedRequests => Metric::RuleBasedMatchmakingRequests,
        }
    }
}

pub async fn run_cli(cli: Cli, ctx: &CallContext) -> Result<()> {
    let client = AppStoreConnectClient::new(Config::from_env()?)?;
    let table = cli.table;
    match cli.command {
        Commands::Token => print_token_cmd(&client).await,
        Commands::Apps(cmd) => run_apps_cmd(&client, ctx, cmd, table).await,
        Commands::Webhooks(cmd) => run_webhooks_cmd(&client, ctx, cmd, table).await,
        Commands::PassTypeIds(cmd) => run_pass_type_ids_cmd(&client, ctx, cmd, table).await,
        Commands::GameCenter(cmd) => run_game_center_cmd(&client, ctx, cmd, table).await,
        Commands::Get { path, paginate } => run_get_cmd(&client, ctx, &path, paginate).await,
    }
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("encoding output")?
    );
    Ok(())
}

fn print_list<A: Serialize>(doc: &ListResponse<A>, table: bool) -> Result<()> {
    if !table {
        return print_json(doc);
    }
    if doc.data.is_empty() {
        println!("(none)");
    }
    for row in resource_rows(&doc.data) {
        println!("{row}");
    }
    if let Some(next) = doc.links.next_url() {
        eprintln!("next: {next}");
    }
    Ok(())
}

async fn fetch_list<F: ResourceFamily>(
    client: &AppStoreConnectClient,
    ctx: &CallContext,
    path: &str,
    options: &ListOptions<F>,
    paginate: bool,
) -> asc_cli::Result<ListResponse<F::Attributes>> {
    let pb = spinner(&format!("Loading {}...", F::TYPE));
    let resources = client.resources::<F>();
    let result = if paginate {
        resources.list_all_at(ctx, path, options).await
    } else {
        resources.list_at(ctx, path, options).await
    };
    pb.finish_and_clear();
    result
}

async fn print_token_cmd(client: &AppStoreConnectClient) -> Result<()> {
    let token = client.bearer().await?;
    println!("{}", token);
    Ok(())
}

async fn run_apps_cmd(
    client: &AppStoreConnectClient,
    ctx: &CallContext,
    cmd: AppsCmd,
    table: bool,
) -> Result<()> {
    match cmd {
        AppsCmd::List {
            list,
            bundle_id,
            name,
            sort,
        } => {
            let mut options = list.options::<Apps>();
            if let Some(raw) = bundle_id {
                options = options.filter("bundleId", split_csv(&raw));
            }
            if let Some(raw) = name {
                options = options.filter("name", split_csv(&raw));
            }
            if let Some(sort) = sort {
                options = options.sort(&sort);
            }
            let apps = fetch_list(client, ctx, Apps::COLLECTION, &options, list.paginate).await?;
            print_list(&apps, table)
        }
        AppsCmd::Get { id } => {
            let app = client
                .resources::<Apps>()
                .get(ctx, &id, &ListOptions::new())
                .await?;
            print_json(&app)
        }
    }
}

async fn run_webhooks_cmd(
    client: &AppStoreConnectClient,
    ctx: &CallContext,
    cmd: WebhooksCmd,
    table: bool,
) -> Result<()> {
    let webhooks = client.resources::<Webhooks>();
    match cmd {
        WebhooksCmd::List { app, list } => {
            let path = format!("{}/{}/webhooks", Apps::COLLECTION, required_id("app", &app)?);
            let found = fetch_list(client, ctx, &path, &list.options::<Webhooks>(), list.paginate)
                .await?;
            print_list(&found, table)
        }
        WebhooksCmd::Get { id } => print_json(&webhooks.get(ctx, &id, &ListOptions::new()).await?),
        WebhooksCmd::Delete { id } => {
            webhooks.delete(ctx, &id).await?;
            println!("Deleted webhook {}", id.trim());
            Ok(())
        }
        WebhooksCmd::Ping { id } => print_json(&webhooks.ping(ctx, &id).await?),
        WebhooksCmd::Deliveries { id, state, list } => {
            let path = format!(
                "{}/{}/deliveries",
                Webhooks::COLLECTION,
                required_id("webhook", &id)?
            );
            let mut options = list.options::<WebhookDeliveries>();
            if let Some(raw) = state {
                options = options.filter("deliveryState", split_csv(&raw));
            }
            let deliveries = fetch_list(client, ctx, &path, &options, list.paginate).await?;
            print_list(&deliveries, table)
        }
        WebhooksCmd::Redeliver { delivery } => print_json(
            &client
                .resources::<WebhookDeliveries>()
                .redeliver(ctx, &delivery)
                .await?,
        ),
    }
}

async fn run_pass_type_ids_cmd(
    client: &AppStoreConnectClient,
    ctx: &CallContext,
    cmd: PassTypeIdsCmd,
    table: bool,
) -> Result<()> {
    match cmd {
        PassTypeIdsCmd::List { list } => {
            let found = fetch_list(
                client,
                ctx,
                PassTypeIds::COLLECTION,
                &list.options::<PassTypeIds>(),
                list.paginate,
            )
            .await?;
            print_list(&found, table)
        }
        PassTypeIdsCmd::Certificates { id, list } => {
            let resources = client.resources::<PassTypeIds>();
            let options = list.options::<PassTypeIds>();
            let linkages = if list.paginate {
                resources.linkages_all(ctx, &id, "certificates", &options).await?
            } else {
                resources.certificate_linkages(ctx, &id, &options).await?
            };
            if table {
                for linkage in &linkages.data {
                    println!("{}\t{}", linkage.id, linkage.type_tag);
                }
                Ok(())
            } else {
                print_json(&linkages)
            }
        }
    }
}

async fn run_game_center_cmd(
    client: &AppStoreConnectClient,
    ctx: &CallContext,
    cmd: GameCenterCmd,
    table: bool,
) -> Result<()> {
    match cmd {
        GameCenterCmd::Achievements(AchievementsCmd::List { detail, list }) => {
            let path = format!(
                "{}/{}/gameCenterAchievements",
                GameCenterDetails::COLLECTION,
                required_id("game center detail", &detail)?
            );
            let options = list.options::<GameCenterAchievements>();
            let found = fetch_list(client, ctx, &path, &options, list.paginate).await?;
            print_list(&found, table)
        }
        GameCenterCmd::Metrics {
            metric,
            id,
            granularity,
            group_by,
            limit,
            next,
        } => {
            let mut options = MetricsOptions::new();
            if let Some(raw) = granularity {
                options = options.granularity(raw.parse::<Granularity>()?);
            }
            if let Some(raw) = group_by {
                options = options.group_by(split_csv(&raw));
            }
            if let Some(limit) = limit {
                options = options.limit(limit);
            }
            if let Some(next) = next {
                options = options.next_url(next);
            }
            let pb = spinner("Loading metrics...");
            let metrics = client
                .game_center_metrics(ctx, metric.into(), &id, &options)
                .await;
            pb.finish_and_clear();
            print_json(&metrics?)
        }
        GameCenterCmd::Images(ImagesCmd::Upload {
            kind,
            localization,
            file,
        }) => {
            let target = kind.parse::<ImageTarget>()?;
            let pb = spinner(&format!("Uploading {}...", file.display()));
            let outcome = client
                .upload_game_center_image(ctx, target, &localization, &file)
                .await;
            pb.finish_and_clear();
            print_json(&upload_summary(&outcome?))
        }
    }
}

fn upload_summary(outcome: &UploadOutcome) -> Value {
    json!({
        "reservationId": outcome.reservation_id,
        "state": outcome.state.to_string(),
        "fileName": outcome.file_name,
        "fileSize": outcome.file_size,
        "sourceFileChecksum": outcome.checksum,
        "chunks": outcome.chunks,
        "assetDeliveryState": outcome.delivery_state(),
    })
}

async fn run_get_cmd(
    client: &AppStoreConnectClient,
    ctx: &CallContext,
    path: &str,
    paginate: bool,
) -> Result<()> {
    let path = path.trim();
    let absolute = path.starts_with("https://") || path.starts_with("http://");
    let relative = path.trim_start_matches('/');
    if paginate {
        let first: Document<Vec<Value>> = if absolute {
            client.do_next(ctx, path).await?
        } else {
            client.do_read(ctx, relative, &QueryBag::new()).await?
        };
        print_json(&client.paginate(ctx, first).await?)
    } else {
        let doc: Value = if absolute {
            client.do_next(ctx, path).await?
        } else {
            client.do_read(ctx, relative, &QueryBag::new()).await?
        };
        print_json(&doc)
    }
}
