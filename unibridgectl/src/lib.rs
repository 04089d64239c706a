use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use unibridge_core::{
    load_bridge_config, load_platform_catalog, BridgeConfig, ChromiumSession, DmRequest, DmSender,
    LimiterState, OutreachTelemetry, Pacer, Permission, PlatformCatalog, RateLimiter, SendOutcome,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] unibridge_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("rate limiter error: {0}")]
    Limit(#[from] unibridge_core::LimitError),
    #[error("browser session error: {0}")]
    Session(#[from] unibridge_core::SessionError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] unibridge_core::TelemetryError),
    #[error("authentication failed")]
    Authentication,
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("send did not complete: {0}")]
    SendNotDelivered(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Unibridge command-line control interface", long_about = None)]
pub struct Cli {
    /// Caminho do bridge.toml principal
    #[arg(long, default_value = "configs/bridge.toml")]
    pub config: PathBuf,
    /// Caminho alternativo para platforms.toml
    #[arg(long)]
    pub platforms_config: Option<PathBuf>,
    /// Caminho alternativo para o arquivo de estado do limitador
    #[arg(long)]
    pub state_file: Option<PathBuf>,
    /// Caminho alternativo para o banco de telemetria
    #[arg(long)]
    pub telemetry_db: Option<PathBuf>,
    /// Diretório alternativo de cookies de sessão
    #[arg(long)]
    pub cookies_dir: Option<PathBuf>,
    /// Token para autenticação local (se UNIBRIDGECTL_TOKEN estiver definido)
    #[arg(long)]
    pub token: Option<String>,
    /// Formato de saída
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Exibe status operacional resumido
    Status,
    /// Operações sobre o catálogo de plataformas
    #[command(subcommand)]
    Platforms(PlatformCommands),
    /// Lista tentativas de envio recentes
    Log(LogArgs),
    /// Envia uma mensagem direta via navegador
    Send(SendArgs),
    /// Executa verificações de integridade
    #[command(name = "health")]
    #[command(subcommand)]
    Health(HealthCommands),
    /// Gera script de autocompletar para o shell
    Completions(CompletionsArgs),
}

#[derive(Subcommand, Debug)]
pub enum PlatformCommands {
    /// Lista plataformas configuradas
    List,
    /// Mostra seletores e detalhes de uma plataforma
    Show(PlatformShowArgs),
}

#[derive(Args, Debug)]
pub struct PlatformShowArgs {
    /// Identificador da plataforma (ex.: tiktok)
    pub name: String,
}

#[derive(Args, Debug)]
pub struct LogArgs {
    /// Filtrar por plataforma
    #[arg(long)]
    pub platform: Option<String>,
    /// Filtrar por resultado (delivered, failed, ...)
    #[arg(long)]
    pub outcome: Option<String>,
    /// Limite de registros retornados
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Identificador da plataforma alvo
    #[arg(long)]
    pub platform: String,
    /// Usuário de destino (com ou sem @)
    #[arg(long)]
    pub username: String,
    /// Mensagem; {{name}} é substituído pelo usuário
    #[arg(long)]
    pub message: String,
    /// Seguir o perfil antes de enviar
    #[arg(long, default_value_t = false)]
    pub follow: bool,
    /// Apenas consulta o limitador, sem abrir o navegador
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Executa checagens básicas
    Check,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell de destino
    #[arg(value_enum)]
    pub shell: Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(args.shell, &mut command, "unibridgectl", &mut io::stdout());
        return Ok(());
    }

    enforce_token(&cli)?;
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Status => {
            let status = context.gather_status()?;
            render(&status, cli.format)?;
        }
        Commands::Platforms(PlatformCommands::List) => {
            let list = context.platforms_list();
            render(&list, cli.format)?;
        }
        Commands::Platforms(PlatformCommands::Show(args)) => {
            let detail = context.platform_show(args)?;
            render(&detail, cli.format)?;
        }
        Commands::Log(args) => {
            let log = context.log_tail(args)?;
            render(&log, cli.format)?;
        }
        Commands::Send(args) => {
            let report = context.send(args)?;
            render(&report, cli.format)?;
            if !report.succeeded {
                return Err(AppError::SendNotDelivered(report.outcome));
            }
        }
        Commands::Health(HealthCommands::Check) => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "Uma ou mais verificações falharam".to_string(),
                ));
            }
        }
        Commands::Completions(_) => unreachable!("handled before authentication"),
    }

    Ok(())
}

fn enforce_token(cli: &Cli) -> Result<()> {
    if let Ok(expected) = std::env::var("UNIBRIDGECTL_TOKEN") {
        match &cli.token {
            Some(provided) if provided == &expected => Ok(()),
            _ => Err(AppError::Authentication),
        }
    } else {
        Ok(())
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    bridge: BridgeConfig,
    platforms: PlatformCatalog,
    config_path: PathBuf,
    platforms_path: PathBuf,
    state_file: PathBuf,
    telemetry_db: PathBuf,
    send_log: PathBuf,
    cookies_dir: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let bridge = load_bridge_config(&config_path)?;

        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let platforms_path = cli
            .platforms_config
            .clone()
            .unwrap_or_else(|| config_dir.join("platforms.toml"));
        let platforms = load_platform_catalog(&platforms_path)?;

        let state_file = cli.state_file.clone().unwrap_or_else(|| bridge.state_file());
        let telemetry_db = cli
            .telemetry_db
            .clone()
            .unwrap_or_else(|| bridge.telemetry_db());
        let send_log = bridge.send_log();
        let cookies_dir = cli
            .cookies_dir
            .clone()
            .unwrap_or_else(|| bridge.cookies_dir());

        Ok(Self {
            bridge,
            platforms,
            config_path,
            platforms_path,
            state_file,
            telemetry_db,
            send_log,
            cookies_dir,
        })
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let node = NodeStatus {
            instance_name: self.bridge.runtime.instance_name.clone(),
            environment: self.bridge.runtime.environment.clone(),
        };

        let limiter = self.limiter_status();
        let attempt_counts = self.attempt_counts().unwrap_or_default();
        let last_attempt = self.last_attempt().unwrap_or_default();

        Ok(StatusReport {
            node,
            limiter,
            attempt_counts,
            last_attempt,
        })
    }

    /// Reads the limiter state file directly instead of opening a
    /// `RateLimiter`, which would steal the lease from a running bridge.
    fn limiter_status(&self) -> Option<LimiterSummary> {
        if !self.state_file.exists() {
            return None;
        }
        let state = LimiterState::load(&self.state_file);
        let limits = &self.bridge.limits;
        let now = Utc::now();
        let hour_ago = now - ChronoDuration::hours(1);
        let day_ago = now - ChronoDuration::hours(24);

        let cooldown_until = state
            .cooldown_started_at
            .map(|started| started + ChronoDuration::hours(limits.cooldown_hours as i64))
            .filter(|until| *until > now);

        Some(LimiterSummary {
            sent_last_hour: state.hourly.iter().filter(|ts| **ts > hour_ago).count(),
            sent_last_day: state.daily.iter().filter(|ts| **ts > day_ago).count(),
            max_per_hour: limits.max_per_hour,
            max_per_day: limits.max_per_day,
            total_sent: state.total_sent,
            cooldown_until: cooldown_until.map(|until| until.to_rfc3339()),
            lease_held: lease_path(&self.state_file).exists(),
        })
    }

    fn attempt_counts(&self) -> Option<HashMap<String, i64>> {
        let conn = self.open_database(&self.telemetry_db).ok()?;
        let mut stmt = conn
            .prepare("SELECT outcome, COUNT(*) FROM send_attempts GROUP BY outcome")
            .ok()?;
        let mut map = HashMap::new();
        for row in stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .ok()?
        {
            if let Ok((outcome, count)) = row {
                map.insert(outcome, count);
            }
        }
        Some(map)
    }

    fn last_attempt(&self) -> Result<Option<AttemptEntry>> {
        if !self.telemetry_db.exists() {
            return Ok(None);
        }
        let conn = self.open_database(&self.telemetry_db)?;
        let mut stmt = conn.prepare(
            "SELECT ts, platform, username, outcome, stage, error, verification, duration_ms \
             FROM send_attempts ORDER BY ts DESC LIMIT 1",
        )?;
        let entry = stmt
            .query_row([], |row| {
                Ok(AttemptEntry {
                    ts: row.get::<_, Option<String>>(0)?,
                    platform: row.get(1)?,
                    username: row.get(2)?,
                    outcome: row.get(3)?,
                    stage: row.get::<_, Option<String>>(4)?,
                    error: row.get::<_, Option<String>>(5)?,
                    verification: row.get::<_, Option<String>>(6)?,
                    duration_ms: row.get::<_, Option<i64>>(7)?,
                })
            })
            .optional()?;
        Ok(entry)
    }

    fn platforms_list(&self) -> PlatformList {
        let rows = self
            .platforms
            .iter()
            .map(|(id, profile)| PlatformListEntry {
                id: id.to_string(),
                display_name: profile.display_name.clone(),
                base_url: profile.base_url.clone(),
                has_follow: profile.actions.follow.is_some(),
                has_send_button: profile.actions.send_button.is_some(),
                composer_selectors: profile.actions.open_composer.selectors.len(),
                input_selectors: profile.actions.message_input.selectors.len(),
            })
            .collect();
        PlatformList { rows }
    }

    fn platform_show(&self, args: &PlatformShowArgs) -> Result<PlatformDetail> {
        let profile = self
            .platforms
            .get(&args.name)
            .ok_or_else(|| AppError::UnknownPlatform(args.name.clone()))?;

        let mut chains = Vec::new();
        if let Some(dismiss) = &profile.actions.dismiss_overlays {
            chains.push(SelectorChain::new("dismiss_overlays", dismiss.timeout_ms, &dismiss.selectors));
        }
        if let Some(follow) = &profile.actions.follow {
            chains.push(SelectorChain::new("follow", follow.timeout_ms, &follow.selectors));
        }
        chains.push(SelectorChain::new(
            "open_composer",
            profile.actions.open_composer.timeout_ms,
            &profile.actions.open_composer.selectors,
        ));
        chains.push(SelectorChain::new(
            "message_input",
            profile.actions.message_input.timeout_ms,
            &profile.actions.message_input.selectors,
        ));
        if let Some(send) = &profile.actions.send_button {
            chains.push(SelectorChain::new("send_button", send.timeout_ms, &send.selectors));
        }

        Ok(PlatformDetail {
            id: args.name.clone(),
            display_name: profile.display_name.clone(),
            base_url: profile.base_url.clone(),
            profile_url: profile.profile_url.clone(),
            login_wall_markers: profile.login_wall_markers.clone(),
            restriction_phrases: profile.restriction_phrases.clone(),
            chains,
        })
    }

    fn log_tail(&self, args: &LogArgs) -> Result<AttemptLog> {
        if !self.telemetry_db.exists() {
            return Ok(AttemptLog { rows: Vec::new() });
        }
        let conn = self.open_database(&self.telemetry_db)?;
        let mut stmt = conn.prepare(
            "SELECT ts, platform, username, outcome, stage, error, verification, duration_ms \
             FROM send_attempts \
             WHERE (?1 IS NULL OR platform = ?1) AND (?2 IS NULL OR outcome = ?2) \
             ORDER BY ts DESC \
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                (args.platform.as_ref(), args.outcome.as_ref(), args.limit as i64),
                |row| {
                    Ok(AttemptEntry {
                        ts: row.get::<_, Option<String>>(0)?,
                        platform: row.get(1)?,
                        username: row.get(2)?,
                        outcome: row.get(3)?,
                        stage: row.get::<_, Option<String>>(4)?,
                        error: row.get::<_, Option<String>>(5)?,
                        verification: row.get::<_, Option<String>>(6)?,
                        duration_ms: row.get::<_, Option<i64>>(7)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(AttemptLog { rows })
    }

    fn send(&self, args: &SendArgs) -> Result<SendReport> {
        let profile = self
            .platforms
            .get(&args.platform)
            .ok_or_else(|| AppError::UnknownPlatform(args.platform.clone()))?;

        let mut limiter = RateLimiter::open(self.bridge.limits.clone(), &self.state_file)?;

        if args.dry_run {
            return Ok(match limiter.check_permission() {
                Permission::Granted => SendReport::dry_run("granted", None),
                Permission::Denied(reason) => {
                    SendReport::dry_run("denied", Some(reason.to_string()))
                }
            });
        }

        let telemetry = OutreachTelemetry::new(&self.send_log, &self.telemetry_db)?;
        let nav_timeout = Duration::from_secs(self.bridge.browser.nav_timeout_seconds);
        let cookie_file = self.cookies_dir.join(format!("{}.json", args.platform));
        let request = DmRequest {
            username: args.username.clone(),
            message: args.message.clone(),
            follow_first: args.follow,
        };

        // The session future is not Send, so everything browser-side runs
        // on a current-thread runtime.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let outcome = runtime.block_on(async {
            let session = ChromiumSession::launch(&self.bridge.browser).await?;
            if cookie_file.exists() {
                session.inject_cookies(&cookie_file).await?;
            }
            let mut sender = DmSender::new(
                &args.platform,
                profile,
                Pacer::new(self.bridge.pacing.clone()),
                nav_timeout,
            )
            .with_telemetry(&telemetry);

            let outcome = sender.send(&session, &mut limiter, &request).await;
            let shutdown = session.shutdown().await;
            let outcome = outcome?;
            shutdown?;
            Ok::<SendOutcome, AppError>(outcome)
        })?;

        Ok(SendReport::from_outcome(&outcome))
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = Vec::new();
        results.push(check_path("bridge.toml", &self.config_path));
        results.push(check_path("platforms.toml", &self.platforms_path));
        results.push(check_directory(
            "data_dir",
            Path::new(&self.bridge.storage.data_dir),
        ));
        results.push(self.check_state_file());
        results.push(self.check_lease());
        results.push(self.check_database("telemetry", &self.telemetry_db));
        results.push(check_directory("cookies", &self.cookies_dir));
        for id in self.platforms.ids() {
            let cookie_file = self.cookies_dir.join(format!("{id}.json"));
            let name = format!("cookies/{id}");
            if cookie_file.exists() {
                results.push(HealthEntry::ok(name, format!("{}", cookie_file.display())));
            } else {
                results.push(HealthEntry::warn(
                    name,
                    format!("{} ausente; envio exigirá login", cookie_file.display()),
                ));
            }
        }
        results
    }

    fn check_state_file(&self) -> HealthEntry {
        if !self.state_file.exists() {
            return HealthEntry::warn(
                "limiter state",
                format!("{} não encontrado (primeira execução?)", self.state_file.display()),
            );
        }
        match fs::read_to_string(&self.state_file) {
            Ok(raw) => match serde_json::from_str::<LimiterState>(&raw) {
                Ok(state) => HealthEntry::ok(
                    "limiter state",
                    format!("{} envios registrados", state.total_sent),
                ),
                Err(err) => HealthEntry::warn(
                    "limiter state",
                    format!("estado corrompido, será reiniciado: {err}"),
                ),
            },
            Err(err) => HealthEntry::error("limiter state", format!("falha ao ler: {err}")),
        }
    }

    fn check_lease(&self) -> HealthEntry {
        let lease = lease_path(&self.state_file);
        if lease.exists() {
            HealthEntry::warn(
                "limiter lease",
                format!("{} presente; outro processo está enviando?", lease.display()),
            )
        } else {
            HealthEntry::ok("limiter lease", "livre".to_string())
        }
    }

    fn check_database(&self, name: &str, path: &Path) -> HealthEntry {
        if !path.exists() {
            return HealthEntry::warn(name, format!("{} não encontrado", path.display()));
        }
        match self.open_database(path) {
            Ok(conn) => {
                let pragma: rusqlite::Result<String> =
                    conn.query_row("PRAGMA integrity_check;", [], |row| row.get(0));
                match pragma {
                    Ok(result) if result.to_lowercase() == "ok" => {
                        HealthEntry::ok(name, "integridade ok".to_string())
                    }
                    Ok(result) => HealthEntry::warn(name, format!("integrity_check: {result}")),
                    Err(err) => HealthEntry::warn(name, format!("erro: {err}")),
                }
            }
            Err(err) => HealthEntry::error(name, format!("falha ao abrir: {err}")),
        }
    }

    fn open_database(&self, path: &Path) -> Result<Connection> {
        if !path.exists() {
            return Err(AppError::MissingResource(format!(
                "Banco de dados ausente: {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(conn)
    }
}

fn lease_path(state_file: &Path) -> PathBuf {
    let mut raw = state_file.as_os_str().to_os_string();
    raw.push(".lock");
    PathBuf::from(raw)
}

fn check_path(name: &str, path: &Path) -> HealthEntry {
    if path.exists() {
        HealthEntry::ok(name, format!("{}", path.display()))
    } else {
        HealthEntry::error(name, format!("{path} ausente", path = path.display()))
    }
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
        Ok(_) => HealthEntry::warn(name, format!("{path} não é diretório", path = path.display())),
        Err(_) => HealthEntry::warn(name, format!("{path} não encontrado", path = path.display())),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub node: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limiter: Option<LimiterSummary>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub attempt_counts: HashMap<String, i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<AttemptEntry>,
}

#[derive(Debug, Serialize)]
pub struct NodeStatus {
    pub instance_name: String,
    pub environment: String,
}

#[derive(Debug, Serialize)]
pub struct LimiterSummary {
    pub sent_last_hour: usize,
    pub sent_last_day: usize,
    pub max_per_hour: u32,
    pub max_per_day: u32,
    pub total_sent: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<String>,
    pub lease_held: bool,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "Instância: {} (env: {})",
            self.node.instance_name, self.node.environment
        )];
        match &self.limiter {
            Some(limiter) => {
                lines.push("Limitador:".to_string());
                lines.push(format!(
                    "  - última hora: {}/{}",
                    limiter.sent_last_hour, limiter.max_per_hour
                ));
                lines.push(format!(
                    "  - últimas 24h: {}/{}",
                    limiter.sent_last_day, limiter.max_per_day
                ));
                lines.push(format!("  - total: {}", limiter.total_sent));
                if let Some(until) = &limiter.cooldown_until {
                    lines.push(format!("  - cooldown até {until}"));
                }
                if limiter.lease_held {
                    lines.push("  - lease ativo (outro processo enviando)".to_string());
                }
            }
            None => lines.push("Limitador: sem estado registrado".to_string()),
        }
        if !self.attempt_counts.is_empty() {
            lines.push("Tentativas:".to_string());
            for (outcome, count) in self.attempt_counts.iter() {
                lines.push(format!("  - {outcome}: {count}"));
            }
        }
        if let Some(last) = &self.last_attempt {
            lines.push(format!(
                "Última tentativa: {} @{} -> {}",
                last.platform, last.username, last.outcome
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct PlatformList {
    pub rows: Vec<PlatformListEntry>,
}

#[derive(Debug, Serialize)]
pub struct PlatformListEntry {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub has_follow: bool,
    pub has_send_button: bool,
    pub composer_selectors: usize,
    pub input_selectors: usize,
}

impl DisplayFallback for PlatformList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "Nenhuma plataforma configurada".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            let follow = if entry.has_follow { "sim" } else { "não" };
            lines.push(format!(
                "{} | {} | {} | follow={} | composer={} seletores | input={} seletores",
                entry.id,
                entry.display_name,
                entry.base_url,
                follow,
                entry.composer_selectors,
                entry.input_selectors
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct PlatformDetail {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub profile_url: String,
    pub login_wall_markers: Vec<String>,
    pub restriction_phrases: Vec<String>,
    pub chains: Vec<SelectorChain>,
}

#[derive(Debug, Serialize)]
pub struct SelectorChain {
    pub action: String,
    pub timeout_ms: u64,
    pub selectors: Vec<String>,
}

impl SelectorChain {
    fn new(action: &str, timeout_ms: u64, selectors: &[String]) -> Self {
        Self {
            action: action.to_string(),
            timeout_ms,
            selectors: selectors.to_vec(),
        }
    }
}

impl DisplayFallback for PlatformDetail {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("{} ({})", self.display_name, self.id),
            format!("Perfil: {}", self.profile_url),
        ];
        for chain in &self.chains {
            lines.push(format!("{} (timeout {}ms):", chain.action, chain.timeout_ms));
            for selector in &chain.selectors {
                lines.push(format!("  - {selector}"));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct AttemptLog {
    pub rows: Vec<AttemptEntry>,
}

#[derive(Debug, Serialize)]
pub struct AttemptEntry {
    pub ts: Option<String>,
    pub platform: String,
    pub username: String,
    pub outcome: String,
    pub stage: Option<String>,
    pub error: Option<String>,
    pub verification: Option<String>,
    pub duration_ms: Option<i64>,
}

impl DisplayFallback for AttemptLog {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "Nenhuma tentativa registrada".to_string();
        }
        let mut lines = Vec::new();
        for entry in &self.rows {
            let ts = entry.ts.as_deref().unwrap_or("-");
            let mut line = format!(
                "{ts} | {} @{} | {}",
                entry.platform, entry.username, entry.outcome
            );
            if let Some(stage) = entry.stage.as_deref().filter(|s| !s.is_empty()) {
                line.push_str(&format!(" | stage={stage}"));
            }
            if let Some(error) = entry.error.as_deref().filter(|s| !s.is_empty()) {
                line.push_str(&format!(" | {error}"));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct SendReport {
    pub mode: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub succeeded: bool,
}

impl SendReport {
    fn dry_run(outcome: &str, detail: Option<String>) -> Self {
        Self {
            mode: "dry_run".to_string(),
            outcome: outcome.to_string(),
            detail,
            succeeded: outcome == "granted",
        }
    }

    fn from_outcome(outcome: &SendOutcome) -> Self {
        let (detail, succeeded) = match outcome {
            SendOutcome::Delivered { verification } | SendOutcome::Unconfirmed { verification } => {
                let observed: Vec<String> = verification
                    .signals
                    .iter()
                    .map(|signal| format!("{}={}", signal.kind, signal.observed))
                    .collect();
                (Some(observed.join(", ")), true)
            }
            SendOutcome::Skipped(reason) => (Some(reason.to_string()), false),
            SendOutcome::LoginRequired { url } => (Some(url.clone()), false),
            SendOutcome::Blocked { phrase } => (Some(phrase.clone()), false),
            SendOutcome::Failed { stage, error } => {
                (Some(format!("{stage}: {error}")), false)
            }
        };
        Self {
            mode: "live".to_string(),
            outcome: outcome.label().to_string(),
            detail,
            succeeded,
        }
    }
}

impl DisplayFallback for SendReport {
    fn display(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{} ({}): {detail}", self.outcome, self.mode),
            None => format!("{} ({})", self.outcome, self.mode),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for entry in self {
            lines.push(format!(
                "[{status}] {name}: {detail}",
                status = entry.status,
                name = entry.name,
                detail = entry.detail
            ));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unibridge_core::AttemptRecord;

    fn prepare_test_context() -> (tempfile::TempDir, AppContext) {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path();
        let configs_dir = root.join("configs");
        fs::create_dir_all(&configs_dir).unwrap();
        fs::copy("../configs/bridge.toml", configs_dir.join("bridge.toml")).unwrap();
        fs::copy("../configs/platforms.toml", configs_dir.join("platforms.toml")).unwrap();

        let data_dir = root.join("data");
        fs::create_dir_all(&data_dir).unwrap();
        let state_file = data_dir.join("limiter.json");
        let telemetry_db = data_dir.join("telemetry.sqlite");
        let cookies_dir = data_dir.join("cookies");
        fs::create_dir_all(&cookies_dir).unwrap();

        {
            let mut limiter = RateLimiter::open(
                unibridge_core::LimitsSection::default(),
                &state_file,
            )
            .unwrap();
            limiter.record_send().unwrap();
        }

        let telemetry =
            OutreachTelemetry::new(data_dir.join("sends.jsonl"), &telemetry_db).unwrap();
        let mut record = AttemptRecord::new("tiktok", "@creator", "delivered", 4200);
        record.verification = Some("verified".to_string());
        telemetry.record_attempt(&record).unwrap();

        let cli = Cli {
            config: configs_dir.join("bridge.toml"),
            platforms_config: None,
            state_file: Some(state_file),
            telemetry_db: Some(telemetry_db),
            cookies_dir: Some(cookies_dir),
            token: None,
            format: OutputFormat::Json,
            command: Commands::Status,
        };

        let context = AppContext::new(&cli).unwrap();
        (temp, context)
    }

    #[test]
    fn status_report_reads_state_and_telemetry() {
        let (_temp, context) = prepare_test_context();
        let status = context.gather_status().unwrap();
        assert_eq!(status.node.instance_name, "unibridge-primary");

        let limiter = status.limiter.expect("state file was written");
        assert_eq!(limiter.total_sent, 1);
        assert_eq!(limiter.sent_last_hour, 1);
        assert!(!limiter.lease_held);

        assert_eq!(status.attempt_counts.get("delivered"), Some(&1));
        let last = status.last_attempt.expect("one attempt recorded");
        assert_eq!(last.username, "@creator");
    }

    #[test]
    fn log_filters_by_platform_and_outcome() {
        let (_temp, context) = prepare_test_context();

        let all = context
            .log_tail(&LogArgs {
                platform: None,
                outcome: None,
                limit: 10,
            })
            .unwrap();
        assert_eq!(all.rows.len(), 1);
        assert_eq!(all.rows[0].outcome, "delivered");

        let none = context
            .log_tail(&LogArgs {
                platform: None,
                outcome: Some("failed".to_string()),
                limit: 10,
            })
            .unwrap();
        assert!(none.rows.is_empty());
    }

    #[test]
    fn platform_show_exposes_selector_chains() {
        let (_temp, context) = prepare_test_context();
        let detail = context
            .platform_show(&PlatformShowArgs {
                name: "tiktok".to_string(),
            })
            .unwrap();

        let composer = detail
            .chains
            .iter()
            .find(|chain| chain.action == "open_composer")
            .expect("composer chain");
        assert_eq!(composer.selectors[0], "button[data-e2e=\"message-button\"]");

        let missing = context.platform_show(&PlatformShowArgs {
            name: "myspace".to_string(),
        });
        assert!(matches!(missing, Err(AppError::UnknownPlatform(_))));
    }

    #[test]
    fn dry_run_reports_a_cooldown_without_a_browser() {
        let (_temp, context) = prepare_test_context();
        {
            let mut limiter = RateLimiter::open(
                context.bridge.limits.clone(),
                &context.state_file,
            )
            .unwrap();
            limiter.enter_cooldown("teste manual").unwrap();
        }

        let report = context
            .send(&SendArgs {
                platform: "tiktok".to_string(),
                username: "@creator".to_string(),
                message: "oi".to_string(),
                follow: false,
                dry_run: true,
            })
            .unwrap();

        assert_eq!(report.mode, "dry_run");
        assert_eq!(report.outcome, "denied");
        assert!(report.detail.unwrap().contains("cooldown"));
        assert!(!report.succeeded);
    }

    #[test]
    fn health_check_warns_about_missing_cookies() {
        let (_temp, context) = prepare_test_context();
        let report = context.health_check();

        let tiktok_cookies = report
            .iter()
            .find(|entry| entry.name == "cookies/tiktok")
            .expect("per-platform cookie check");
        assert!(matches!(tiktok_cookies.status, CheckStatus::Warn));

        assert!(report
            .iter()
            .all(|entry| !matches!(entry.status, CheckStatus::Error)));
    }
}
