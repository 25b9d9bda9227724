//! opsync-cli — bibliothèque interne du binaire `opsync`
//!
//! But : fournir une API **propre, testable et réutilisable** pour le CLI
//! sans mélanger la logique d'E/S et le parsing d'arguments (laisse ça à `main.rs`).
//!
//! Points clés :
//! - Tâche `SyncTask` : lecture → passe `opsync_core::synchronize` → réécriture
//!   en place (atomique) ou stdout
//! - Sémantique tout-ou-rien : la moindre erreur laisse le fichier intact
//! - Config TOML (`opsync.toml`, découverte ascendante) + conversion en `Dialect`
//! - Utilitaires d'E/S (écriture atomique, chrono, bannière de version)
//! - Mode `--check` avec diff minimal (couleurs via la feature `color`)

#![forbid(unsafe_code)]
#![deny(unused_must_use)]

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

#[cfg(feature = "color")]
use yansi::{Color, Paint};

use opsync_core::{synchronize_with_table, Dialect, MirrorSpec, MirrorStyle};

/// Version lisible du crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Petite bannière de version utile pour logs/outils.
pub fn version_banner(tool: &str) -> String {
    format!("{tool} — opsync {VERSION}")
}

// ───────────────────────────── Tâche de synchronisation ─────────────────────────────

/// Destination de la sortie régénérée.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SyncOutput {
    /// Réécrit le fichier d'entrée en place (écriture atomique).
    #[default]
    InPlace,
    /// Émet le texte régénéré sur stdout (la variante « print »).
    Stdout,
}

/// Une invocation du synchroniseur (sans parsing CLI — réservé à `main.rs`).
#[derive(Clone, Debug)]
pub struct SyncTask {
    /// Fichier de définitions à synchroniser.
    pub input: Utf8PathBuf,
    /// Où écrire le résultat.
    pub output: SyncOutput,
    /// Mode vérification : n'écrit rien, signale seulement si ça changerait.
    pub check: bool,
    /// Avec `check` : affiche un diff minimal sur stderr.
    pub diff: bool,
}

/// Bilan d'une invocation réussie.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Le texte régénéré diffère-t-il de l'entrée ?
    pub changed: bool,
    /// Nombre de directives primaires renumérotées.
    pub directives: usize,
}

/// Point d'entrée : lit, synchronise, écrit (ou pas, en `--check`).
///
/// Tout-ou-rien : la lecture, l'analyse et la régénération précèdent toute
/// écriture ; en cas d'erreur le fichier d'origine n'est jamais touché.
pub fn sync_entry(task: &SyncTask, dialect: &Dialect) -> Result<SyncOutcome> {
    let src = read_text(&task.input)?;

    let (out, entries) = synchronize_with_table(&src, dialect)
        .with_context(|| format!("synchronisation {}", task.input))?;
    let directives = entries.len();
    let changed = out != src;

    if task.check {
        if changed && task.diff {
            print_diff(task.input.as_str(), &src, &out);
        }
        return Ok(SyncOutcome { changed, directives });
    }

    match task.output {
        SyncOutput::InPlace => write_text_atomic(&task.input, &out)?,
        SyncOutput::Stdout => print!("{out}"),
    }
    Ok(SyncOutcome { changed, directives })
}

// ───────────────────────────── Config (opsync.toml) ─────────────────────────────

/// Config TOML du dialecte. Tous les champs ont un défaut raisonnable :
/// une config vide décrit la table de `#define` préfixée `OPC_`.
#[derive(Debug, Deserialize)]
pub struct FileConfig {
    /// `define-table` ou `enum-table`.
    #[serde(default = "d_dialect")]
    pub dialect: String,
    /// Préfixe réservé des noms d'opcodes.
    #[serde(default = "d_prefix")]
    pub prefix: String,
    /// Mot-clé de directive, si différent du préréglage.
    #[serde(default)]
    pub marker: Option<String>,
    /// Indentation des entrées d'enum, si différente du préréglage.
    #[serde(default)]
    pub indent: Option<String>,
    /// Base de numérotation, si différente du préréglage.
    #[serde(default)]
    pub base: Option<u32>,
    /// Bloc miroir (absent = pas de déclarations dépendantes).
    #[serde(default)]
    pub mirror: Option<MirrorConfig>,
}

/// Section `[mirror]` de la config.
#[derive(Debug, Deserialize)]
pub struct MirrorConfig {
    /// Sous-chaîne identifiant la région dépendante.
    pub region_marker: String,
    /// Préfixe des symboles miroir émis.
    pub name_prefix: String,
    /// Longueur du préfixe primaire retiré (défaut : longueur de `prefix`).
    #[serde(default)]
    pub strip_len: Option<usize>,
    /// Reste du nom en minuscules.
    #[serde(default = "d_true")]
    pub lowercase: bool,
    /// `enum-value` ou `alias-const`.
    #[serde(default = "d_style")]
    pub style: String,
    /// Type C des constantes alias (style `alias-const`).
    #[serde(default = "d_alias_type")]
    pub alias_type: String,
    /// Indentation des lignes émises.
    #[serde(default = "d_mirror_indent")]
    pub indent: String,
}

fn d_dialect() -> String { "define-table".into() }
fn d_prefix() -> String { "OPC_".into() }
fn d_true() -> bool { true }
fn d_style() -> String { "enum-value".into() }
fn d_alias_type() -> String { "uint8_t".into() }
fn d_mirror_indent() -> String { "    ".into() }

impl FileConfig {
    /// Convertit la config en [`Dialect`] prêt pour la passe.
    pub fn to_dialect(&self) -> Result<Dialect> {
        let mut dialect = match self.dialect.as_str() {
            "define-table" => Dialect::define_table(&self.prefix),
            "enum-table" => Dialect::enum_table(&self.prefix),
            other => {
                return Err(anyhow!(
                    "dialecte inconnu: `{other}` (attendu `define-table` ou `enum-table`)"
                ))
            }
        };
        if let Some(marker) = &self.marker {
            dialect.macro_marker = Some(marker.clone());
        }
        if let Some(indent) = &self.indent {
            dialect.indent = indent.clone();
        }
        if let Some(base) = self.base {
            dialect.base = base;
        }
        if dialect.name_prefix.is_empty() {
            return Err(anyhow!("préfixe d'opcodes vide"));
        }
        if let Some(mirror) = &self.mirror {
            let style = match mirror.style.as_str() {
                "enum-value" => MirrorStyle::EnumValue,
                "alias-const" => MirrorStyle::AliasConst { type_name: mirror.alias_type.clone() },
                other => {
                    return Err(anyhow!(
                        "style miroir inconnu: `{other}` (attendu `enum-value` ou `alias-const`)"
                    ))
                }
            };
            dialect = dialect.with_mirror(MirrorSpec {
                region_marker: mirror.region_marker.clone(),
                name_prefix: mirror.name_prefix.clone(),
                strip_len: mirror.strip_len.unwrap_or(self.prefix.len()),
                lowercase: mirror.lowercase,
                style,
                indent: mirror.indent.clone(),
            });
        }
        Ok(dialect)
    }
}

/// Charge la config : chemin explicite, sinon recherche ascendante `opsync.toml`.
pub fn load_config(explicit: Option<&Utf8Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = explicit {
        let s = read_text(path)?;
        let cfg = toml::from_str(&s).with_context(|| format!("TOML invalide: {path}"))?;
        return Ok(Some(cfg));
    }
    let mut cur = std::env::current_dir()?;
    loop {
        let cand = cur.join("opsync.toml");
        if cand.exists() {
            let s = fs::read_to_string(&cand)
                .with_context(|| format!("lecture {}", cand.display()))?;
            let cfg = toml::from_str(&s)
                .with_context(|| format!("TOML invalide: {}", cand.display()))?;
            return Ok(Some(cfg));
        }
        if !cur.pop() {
            break;
        }
    }
    Ok(None)
}

// ───────────────────────────── Utilitaires E/S ─────────────────────────────

/// Lit un fichier texte en UTF-8.
pub fn read_text(path: &Utf8Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("lecture {path}"))
}

/// Écrit le texte via un fichier temporaire puis renommage : jamais de
/// fichier cible à moitié écrit.
pub fn write_text_atomic(path: &Utf8Path, text: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_str().is_empty() => p,
        _ => Utf8Path::new("."),
    };
    let tmp = unique_tmp_path(parent, path.file_name().unwrap_or("out"));
    {
        let mut w = BufWriter::new(
            File::create(&tmp).with_context(|| format!("création {tmp}"))?,
        );
        w.write_all(text.as_bytes())?;
        w.flush()?;
    }
    if path.as_std_path().exists() {
        // Windows : rename sur cible existante peut échouer
        let _ = fs::remove_file(path);
    }
    fs::rename(&tmp, path).or_else(|_| {
        // fallback : copie puis suppr tmp
        fs::copy(&tmp, path).map(|_| ()).and_then(|()| fs::remove_file(&tmp))
    })?;
    Ok(())
}

fn unique_tmp_path(dir: &Utf8Path, base: &str) -> Utf8PathBuf {
    let mut i = 0u32;
    loop {
        let candidate = dir.join(format!("{base}.tmp{i}"));
        if !candidate.as_std_path().exists() {
            return candidate;
        }
        i = i.wrapping_add(1);
    }
}

/// Convertit un `PathBuf` en `Utf8PathBuf` (erreur si non UTF-8).
pub fn to_utf8(p: std::path::PathBuf) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(p).map_err(|_| anyhow!("chemin non UTF-8"))
}

/// Résout l'entrée relativement au dossier de l'exécutable, pour lancer le
/// synchroniseur depuis n'importe quel dossier de build.
pub fn resolve_input(path: &Utf8Path, exe_relative: bool) -> Result<Utf8PathBuf> {
    if !exe_relative || path.is_absolute() {
        return Ok(path.to_owned());
    }
    let exe = std::env::current_exe().context("chemin de l'exécutable introuvable")?;
    let dir = exe.parent().ok_or_else(|| anyhow!("exécutable sans dossier parent"))?;
    to_utf8(dir.join(path.as_std_path()))
}

/// Durée lisible (ms / s / min).
pub fn human_millis(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1_000 {
        return format!("{ms} ms");
    }
    let s = ms as f64 / 1000.0;
    if s < 60.0 {
        return format!("{s:.3} s");
    }
    let m = (s / 60.0).floor();
    let rest = s - m * 60.0;
    format!("{m:.0} min {rest:.1} s")
}

// ───────────────────────────── Diff (simple) ─────────────────────────────

/// Diff ligne à ligne minimal sur stderr, pour `--check --diff`.
pub fn print_diff(name: &str, old: &str, new: &str) {
    let oldl: Vec<&str> = old.split('\n').collect();
    let newl: Vec<&str> = new.split('\n').collect();

    eprintln!("{}", painted(&format!("--- {name}"), DiffSide::Old));
    eprintln!("{}", painted(&format!("+++ {name} (synchronized)"), DiffSide::New));

    let mut i = 0usize;
    let mut j = 0usize;
    while i < oldl.len() || j < newl.len() {
        if i < oldl.len() && j < newl.len() && oldl[i] == newl[j] {
            i += 1;
            j += 1;
            continue;
        }
        if i < oldl.len() && (j >= newl.len() || !newl[j..].contains(&oldl[i])) {
            eprintln!("{}", painted(&format!("-{}", oldl[i]), DiffSide::Old));
            i += 1;
            continue;
        }
        if j < newl.len() && (i >= oldl.len() || !oldl[i..].contains(&newl[j])) {
            eprintln!("{}", painted(&format!("+{}", newl[j]), DiffSide::New));
            j += 1;
            continue;
        }
        if i < oldl.len() {
            eprintln!("{}", painted(&format!("-{}", oldl[i]), DiffSide::Old));
            i += 1;
        }
        if j < newl.len() {
            eprintln!("{}", painted(&format!("+{}", newl[j]), DiffSide::New));
            j += 1;
        }
    }
}

#[derive(Clone, Copy)]
enum DiffSide {
    Old,
    New,
}

#[cfg(feature = "color")]
fn painted(s: &str, side: DiffSide) -> String {
    let color = match side {
        DiffSide::Old => Color::Red,
        DiffSide::New => Color::Green,
    };
    format!("{}", s.paint(color))
}

#[cfg(not(feature = "color"))]
fn painted(s: &str, _side: DiffSide) -> String {
    s.to_string()
}

// ───────────────────────────── Tests ─────────────────────────────
