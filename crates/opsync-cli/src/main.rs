// crates/opsync-cli/src/main.rs
//! `opsync` — synchroniseur de tables d'opcodes
//!
//! Ici on fait uniquement : parsing d'arguments, initialisation (traces,
//! couleurs), résolution du dialecte, et délégation à `opsync_cli` (lib).
//!
//! Usage basique :
//!   opsync defs/opcodes.h
//!   opsync defs/opcodes.h --print > regen.h
//!   opsync defs/opcodes.h --check --diff
//! Flags utiles :
//!   --dialect       : préréglage `define-table` (base 1) ou `enum-table` (base 0)
//!   --prefix        : préfixe réservé des noms d'opcodes
//!   --config        : opsync.toml explicite (sinon découverte ascendante)
//!   --exe-relative  : résout l'entrée depuis le dossier de l'exécutable
//!   --check         : n'écrit rien, exit 2 si le fichier changerait

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{ArgAction, Parser, ValueEnum};

use opsync_cli as cli;
use opsync_core::Dialect;

// ──────────────────────────── CLI (clap) ────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "opsync",
    version,
    about = "Synchronise une table d'opcodes : renumérotation séquentielle + régénération des déclarations miroir",
    long_about = None
)]
struct Cli {
    /// Fichier de définitions à synchroniser
    input: PathBuf,

    /// Émet le texte régénéré sur stdout au lieu de réécrire le fichier
    #[arg(long, action = ArgAction::SetTrue)]
    print: bool,

    /// Vérifie si le fichier est déjà synchronisé (exit 2 sinon), n'écrit rien
    #[arg(long, action = ArgAction::SetTrue)]
    check: bool,

    /// Affiche un diff minimal (stderr) en mode --check
    #[arg(long, action = ArgAction::SetTrue, requires = "check")]
    diff: bool,

    /// Réduit la verbosité
    #[arg(short, long, action = ArgAction::SetTrue)]
    quiet: bool,

    /// Augmente la verbosité des traces (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Fichier de config opsync.toml (sinon découverte ascendante)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Préréglage de dialecte quand aucune config n'est trouvée
    #[arg(long, value_enum, default_value = "define-table")]
    dialect: DialectPreset,

    /// Préfixe réservé des noms d'opcodes (défaut : OPC_)
    #[arg(long)]
    prefix: Option<String>,

    /// Mot-clé de directive macro (remplace celui du préréglage/config)
    #[arg(long)]
    marker: Option<String>,

    /// Base de numérotation (remplace celle du préréglage/config)
    #[arg(long)]
    base: Option<u32>,

    /// Résout un chemin d'entrée relatif depuis le dossier de l'exécutable
    #[arg(long, action = ArgAction::SetTrue)]
    exe_relative: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DialectPreset {
    /// Table de `#define NAME n`, numérotée depuis 1
    DefineTable,
    /// Table d'entrées d'enum `NAME = n,`, numérotée depuis 0
    EnumTable,
}

// ──────────────────────────── Entrée ────────────────────────────

fn main() {
    if let Err(e) = real_main() {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    color_eyre::install().ok();

    let t0 = Instant::now();
    let opts = Cli::parse();

    #[cfg(feature = "trace")]
    init_tracing(opts.verbose);

    let input = cli::to_utf8(opts.input.clone())?;
    let input = cli::resolve_input(&input, opts.exe_relative)?;

    let dialect = resolve_dialect(&opts)?;
    #[cfg(feature = "trace")]
    tracing::debug!(?dialect, input = %input, "dialecte résolu");

    let task = cli::SyncTask {
        input,
        output: if opts.print { cli::SyncOutput::Stdout } else { cli::SyncOutput::InPlace },
        check: opts.check,
        diff: opts.diff,
    };
    let outcome = cli::sync_entry(&task, &dialect)?;

    if opts.check {
        if outcome.changed {
            eprintln!("✗ {} n'est pas synchronisé", task.input);
            std::process::exit(2);
        }
        if !opts.quiet {
            eprintln!("✓ {} déjà synchronisé ({} directive(s))", task.input, outcome.directives);
        }
        return Ok(());
    }

    if !opts.quiet {
        eprintln!(
            "✓ {} directive(s) renumérotée(s) — {}",
            outcome.directives,
            cli::human_millis(t0.elapsed())
        );
    }
    Ok(())
}

/// Dialecte : config explicite ou découverte > préréglage CLI ; les flags
/// `--prefix`, `--marker`, `--base` priment dans tous les cas.
fn resolve_dialect(opts: &Cli) -> Result<Dialect> {
    let explicit = opts.config.clone().map(cli::to_utf8).transpose()?;
    let mut dialect = match cli::load_config(explicit.as_deref())? {
        Some(cfg) => cfg.to_dialect()?,
        None => {
            let prefix = opts.prefix.clone().unwrap_or_else(|| "OPC_".into());
            match opts.dialect {
                DialectPreset::DefineTable => Dialect::define_table(prefix),
                DialectPreset::EnumTable => Dialect::enum_table(prefix),
            }
        }
    };
    if let Some(prefix) = &opts.prefix {
        dialect.name_prefix = prefix.clone();
    }
    if let Some(marker) = &opts.marker {
        dialect.macro_marker = Some(marker.clone());
    }
    if let Some(base) = opts.base {
        dialect.base = base;
    }
    Ok(dialect)
}

#[cfg(feature = "trace")]
fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
