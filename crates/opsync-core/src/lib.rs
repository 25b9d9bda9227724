//! opsync-core — la passe de synchronisation des tables d'opcodes
//!
//! Fournit :
//! - `Dialect` + `MirrorSpec` : configuration unifiée des variantes (marqueurs,
//!   préfixe réservé, base de numérotation, gabarit miroir)
//! - `scan` : classification ligne à ligne (`Primary` / `MirrorRegion` / `Passthrough`)
//! - `renumber` : attribution séquentielle des codes, purement positionnelle
//! - `emit_mirror` : régénération complète du bloc de déclarations dépendantes
//! - `synchronize` : la passe entière, texte → texte, idempotente
//! - Erreurs `SyncError` + alias `SyncResult<T>`
//!
//! La passe est une fonction pure du texte d'entrée : aucun code numérique déjà
//! présent dans le fichier n'est relu, seule la position des directives compte.
//! Réordonner, insérer ou supprimer une directive suffit — tout le reste se
//! renumérote sans trou au prochain passage.
//!
//! Exemple éclair :
//! ```
//! use opsync_core::{synchronize, Dialect};
//!
//! let src = "// table\n#define OPC_ADD 9\n#define OPC_SUB 4\n";
//! let out = synchronize(src, &Dialect::define_table("OPC_")).unwrap();
//! assert_eq!(out, "// table\n#define OPC_ADD 1\n#define OPC_SUB 2\n");
//! ```
//!
//! Features :
//! - `serde` (par défaut) : derive (dé)sérialisation sur `Dialect` & co.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]
#![cfg_attr(not(debug_assertions), warn(missing_docs))]

use std::collections::HashSet;

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/* ─────────────────────────── Résultat commun ─────────────────────────── */

/// Alias résultat commun à la passe.
pub type SyncResult<T> = Result<T, SyncError>;

/* ─────────────────────────── Dialecte ─────────────────────────── */

/// Configuration d'une variante du fichier de définitions.
///
/// Les deux variantes historiques (table d'enum renumérotée seule, table de
/// `#define` renumérotée) sont des préréglages ; la génération miroir s'ajoute
/// par [`Dialect::with_mirror`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dialect {
    /// Mot-clé de directive macro (ex: `#define`). `None` = entrées d'enum.
    pub macro_marker: Option<String>,
    /// Préfixe réservé des noms d'opcodes (ex: `OPC_`). Une ligne n'est une
    /// directive primaire que si elle contient la signature contiguë
    /// `marqueur préfixe` (ou le préfixe seul en style enum).
    pub name_prefix: String,
    /// Indentation des entrées d'enum. Sa largeur fixe l'index du token-nom
    /// lors du découpage sur espaces simples (convention positionnelle rendue
    /// explicite, cf. `name_token_index`).
    pub indent: String,
    /// Premier code attribué (0 ou 1 selon la variante).
    pub base: u32,
    /// Génération des déclarations dépendantes, si la variante en maintient.
    pub mirror: Option<MirrorSpec>,
}

/// Gabarit d'émission d'une déclaration miroir.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MirrorStyle {
    /// Entrée d'enum reflétant la valeur numérique : `name = code,`
    EnumValue,
    /// Constante typée aliasant le symbole primaire : `const T name = PRIMARY;`
    /// Reste cohérente par référence symbolique même si la numérotation bouge.
    AliasConst {
        /// Type C de la constante émise (ex: `uint8_t`).
        type_name: String,
    },
}

/// Spécification du bloc miroir (déclarations dépendantes régénérées en bloc).
///
/// Invariant : les lignes émises doivent contenir `region_marker`, sans quoi un
/// second passage ne reconnaîtrait plus le bloc (l'idempotence repose dessus).
/// Le préréglage naturel est `name_prefix == region_marker`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MirrorSpec {
    /// Sous-chaîne identifiant les lignes de la région dépendante à remplacer.
    pub region_marker: String,
    /// Préfixe du symbole miroir (accolé au reste transformé du nom primaire).
    pub name_prefix: String,
    /// Longueur du préfixe réservé retiré du nom primaire.
    pub strip_len: usize,
    /// Passer le reste du nom en minuscules.
    pub lowercase: bool,
    /// Gabarit d'émission.
    pub style: MirrorStyle,
    /// Indentation des lignes émises.
    pub indent: String,
}

impl Dialect {
    /// Préréglage « table d'enum » : entrées indentées `NAME = n,`, base 0.
    pub fn enum_table(prefix: impl Into<String>) -> Self {
        Self {
            macro_marker: None,
            name_prefix: prefix.into(),
            indent: "    ".into(),
            base: 0,
            mirror: None,
        }
    }

    /// Préréglage « table de #define » : `#define NAME n`, base 1.
    pub fn define_table(prefix: impl Into<String>) -> Self {
        Self {
            macro_marker: Some("#define".into()),
            name_prefix: prefix.into(),
            indent: String::new(),
            base: 1,
            mirror: None,
        }
    }

    /// Ajoute la génération miroir au dialecte.
    #[must_use]
    pub fn with_mirror(mut self, mirror: MirrorSpec) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Index du token-nom après découpage de la ligne sur `' '`.
    ///
    /// Macro : position 1 (juste après le mot-clé). Enum : l'indentation
    /// produit un token vide par espace de tête, le nom suit immédiatement.
    pub fn name_token_index(&self) -> usize {
        if self.macro_marker.is_some() { 1 } else { self.indent.len() }
    }

    /// Signature contiguë d'une directive primaire : `marqueur préfixe`
    /// (ou le préfixe seul en style enum). Une mention des deux jetons
    /// éparpillée dans un commentaire ne suffit pas.
    fn primary_needle(&self) -> String {
        match &self.macro_marker {
            Some(marker) => format!("{marker} {}", self.name_prefix),
            None => self.name_prefix.clone(),
        }
    }
}

/* ─────────────────────────── Scan ─────────────────────────── */

/// Directive primaire extraite d'une ligne.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Identifiant symbolique stable (préfixe réservé compris).
    pub name: String,
}

/// Classe d'une ligne du fichier de définitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// Directive d'opcode primaire, à renuméroter.
    Primary(Directive),
    /// Ligne de la région dépendante, remplacée en bloc par le miroir régénéré.
    MirrorRegion,
    /// Ligne recopiée telle quelle.
    Passthrough,
}

/// Une ligne physique scannée, avec son index d'origine (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedLine {
    /// Texte brut de la ligne (sans `\n`).
    pub raw: String,
    /// Numéro de ligne dans le fichier d'entrée.
    pub index: usize,
    /// Classe de la ligne.
    pub kind: LineKind,
}

/// Scanne le texte complet et classe chaque ligne.
///
/// La reconnaissance de la région miroir précède celle des primaires : une
/// ligne miroir peut référencer le symbole primaire (style alias) sans être
/// prise pour une directive.
pub fn scan(src: &str, dialect: &Dialect) -> SyncResult<Vec<ScannedLine>> {
    let needle = dialect.primary_needle();
    let mut out = Vec::new();
    for (i, raw) in src.split('\n').enumerate() {
        let index = i + 1;
        let kind = classify(raw, dialect, &needle, index)?;
        out.push(ScannedLine { raw: raw.to_string(), index, kind });
    }
    Ok(out)
}

fn classify(raw: &str, dialect: &Dialect, needle: &str, index: usize) -> SyncResult<LineKind> {
    if let Some(mirror) = &dialect.mirror {
        if raw.contains(&mirror.region_marker) {
            return Ok(LineKind::MirrorRegion);
        }
    }
    if raw.contains(needle) {
        return Ok(LineKind::Primary(parse_primary(raw, dialect, index)?));
    }
    Ok(LineKind::Passthrough)
}

/// Extraction du nom par position de token, découpage sur espaces simples.
fn parse_primary(raw: &str, dialect: &Dialect, index: usize) -> SyncResult<Directive> {
    let tokens: Vec<&str> = raw.split(' ').collect();
    let at = dialect.name_token_index();
    let Some(&name) = tokens.get(at) else {
        return Err(SyncError::MalformedDirective {
            line: index,
            reason: format!("expected a name at token {at}, got {} token(s)", tokens.len()),
        });
    };
    if !name.starts_with(&dialect.name_prefix) {
        return Err(SyncError::MalformedDirective {
            line: index,
            reason: format!("token {at} is `{name}`, expected prefix `{}`", dialect.name_prefix),
        });
    }
    Ok(Directive { name: name.to_string() })
}

/* ─────────────────────────── Renumérotation ─────────────────────────── */

/// Une entrée de la table renumérotée : `(name, code)` en ordre d'apparition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeEntry {
    /// Nom primaire complet.
    pub name: String,
    /// Code attribué (séquentiel depuis la base, sans trou).
    pub code: u32,
}

/// Attribue les codes séquentiels aux primaires, dans l'ordre du fichier.
///
/// Toute valeur présente dans l'entrée est ignorée : la numérotation est
/// purement positionnelle. Un nom vu deux fois est fatal.
pub fn renumber(lines: &[ScannedLine], base: u32) -> SyncResult<Vec<OpcodeEntry>> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for line in lines {
        if let LineKind::Primary(d) = &line.kind {
            if !seen.insert(d.name.clone()) {
                return Err(SyncError::DuplicateDirective {
                    line: line.index,
                    name: d.name.clone(),
                });
            }
            let code = base + u32::try_from(entries.len()).unwrap_or(u32::MAX);
            entries.push(OpcodeEntry { name: d.name.clone(), code });
        }
    }
    Ok(entries)
}

/* ─────────────────────────── Miroir ─────────────────────────── */

/// Nom du symbole miroir dérivé d'un nom primaire (transform fixe).
pub fn mirror_name(spec: &MirrorSpec, primary: &str) -> String {
    let rest = primary.get(spec.strip_len..).unwrap_or("");
    let rest = if spec.lowercase { rest.to_ascii_lowercase() } else { rest.to_string() };
    format!("{}{rest}", spec.name_prefix)
}

/// Régénère le bloc miroir complet, une ligne par entrée, même ordre.
pub fn emit_mirror(spec: &MirrorSpec, entries: &[OpcodeEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| {
            let name = mirror_name(spec, &e.name);
            match &spec.style {
                MirrorStyle::EnumValue => {
                    format!("{}{name} = {},", spec.indent, e.code)
                }
                MirrorStyle::AliasConst { type_name } => {
                    format!("{}const {type_name} {name} = {};", spec.indent, e.name)
                }
            }
        })
        .collect()
}

/* ─────────────────────────── Réassemblage ─────────────────────────── */

/// La passe entière : scan → renumérotation → miroir → réassemblage.
///
/// Les lignes passantes sont recopiées verbatim, les primaires réémises avec
/// leur nouveau code, le bloc miroir inséré au premier marqueur de région
/// rencontré (les autres occurrences sont jetées). La sortie est débarrassée
/// des blancs d'extrémité et se termine par exactement un `\n`.
pub fn synchronize(src: &str, dialect: &Dialect) -> SyncResult<String> {
    Ok(synchronize_with_table(src, dialect)?.0)
}

/// Comme [`synchronize`], mais rend aussi la table `(name, code)` renumérotée,
/// pour les appelants qui veulent un bilan sans re-scanner l'entrée.
pub fn synchronize_with_table(
    src: &str,
    dialect: &Dialect,
) -> SyncResult<(String, Vec<OpcodeEntry>)> {
    let lines = scan(src, dialect)?;
    let entries = renumber(&lines, dialect.base)?;
    let block = dialect.mirror.as_ref().map(|m| emit_mirror(m, &entries));

    let mut out = String::with_capacity(src.len() + 64);
    let mut assigned = 0u32;
    let mut region_seen = false;
    let mut block_emitted = false;

    for line in &lines {
        match &line.kind {
            LineKind::Passthrough => {
                out.push_str(&line.raw);
                out.push('\n');
            }
            LineKind::Primary(d) => {
                let code = dialect.base + assigned;
                assigned += 1;
                rewrite_primary(&mut out, dialect, &d.name, code);
            }
            LineKind::MirrorRegion => {
                region_seen = true;
                if !block_emitted {
                    block_emitted = true;
                    if let Some(block) = &block {
                        for emitted in block {
                            out.push_str(emitted);
                            out.push('\n');
                        }
                    }
                }
                // occurrences suivantes : jetées (insertion au-plus-une-fois)
            }
        }
    }

    if let Some(mirror) = &dialect.mirror {
        if !region_seen {
            return Err(SyncError::MissingMirrorRegion { marker: mirror.region_marker.clone() });
        }
    }

    Ok((format!("{}\n", out.trim()), entries))
}

/// Réémet une directive primaire depuis le gabarit du dialecte.
fn rewrite_primary(out: &mut String, dialect: &Dialect, name: &str, code: u32) {
    match &dialect.macro_marker {
        Some(marker) => out.push_str(&format!("{marker} {name} {code}\n")),
        None => out.push_str(&format!("{}{name} = {code},\n", dialect.indent)),
    }
}

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreurs fatales de la passe. Aucune n'est rattrapable : la sortie n'est
/// jamais produite partiellement (tout ou rien sur le fichier entier).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Une ligne accroche les marqueurs mais pas la structure attendue.
    #[error("line {line}: malformed directive: {reason}")]
    MalformedDirective {
        /// Numéro de ligne fautif (1-based).
        line: usize,
        /// Ce qui manque ou dépasse.
        reason: String,
    },
    /// Deux directives primaires portent le même nom.
    #[error("line {line}: duplicate directive `{name}`")]
    DuplicateDirective {
        /// Ligne de la seconde occurrence.
        line: usize,
        /// Nom dupliqué.
        name: String,
    },
    /// Miroir configuré mais aucun marqueur de région dans le fichier.
    #[error("mirror region marker `{marker}` not found in input")]
    MissingMirrorRegion {
        /// Marqueur attendu.
        marker: String,
    },
}

/* ─────────────────────────── Prélude ─────────────────────────── */

/// Prélude pratique pour importer les types/funcs clés du crate.
pub mod prelude {
    pub use super::{
        emit_mirror, mirror_name, renumber, scan, synchronize, synchronize_with_table, Dialect,
        Directive, LineKind, MirrorSpec, MirrorStyle, OpcodeEntry, ScannedLine, SyncError,
        SyncResult,
    };
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mirror_enum() -> MirrorSpec {
        MirrorSpec {
            region_marker: "opc_".into(),
            name_prefix: "opc_".into(),
            strip_len: 4, // "OPC_"
            lowercase: true,
            style: MirrorStyle::EnumValue,
            indent: "    ".into(),
        }
    }

    #[test]
    fn define_table_renumbers_from_one_ignoring_values() {
        // trois macros A=5, B=2, C=9 : seules les positions comptent
        let src = "#define OPC_A 5\n#define OPC_B 2\n#define OPC_C 9\n";
        let out = synchronize(src, &Dialect::define_table("OPC_")).unwrap();
        assert_eq!(out, "#define OPC_A 1\n#define OPC_B 2\n#define OPC_C 3\n");
    }

    #[test]
    fn enum_table_renumbers_from_zero() {
        let src = "enum Instr : u8 {\n    Instr_halt = 9,\n    Instr_push = 0,\n};\n";
        let out = synchronize(src, &Dialect::enum_table("Instr_")).unwrap();
        assert_eq!(out, "enum Instr : u8 {\n    Instr_halt = 0,\n    Instr_push = 1,\n};\n");
    }

    #[test]
    fn order_is_preserved_and_numbering_gapless() {
        let names = ["OPC_Z", "OPC_A", "OPC_M", "OPC_Q"];
        let src: String =
            names.iter().map(|n| format!("#define {n} 42\n")).collect();
        let lines = scan(&src, &Dialect::define_table("OPC_")).unwrap();
        let entries = renumber(&lines, 1).unwrap();
        let got: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(got, names);
        let codes: Vec<u32> = entries.iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn passthrough_lines_survive_verbatim() {
        let src = "// header\n\n#define OPC_A 1\n/* tail */\n";
        let out = synchronize(src, &Dialect::define_table("OPC_")).unwrap();
        assert_eq!(out, "// header\n\n#define OPC_A 1\n/* tail */\n");
    }

    #[test]
    fn idempotent_on_own_output() {
        let dialect = Dialect::define_table("OPC_").with_mirror(mirror_enum());
        let src = "#define OPC_ADD 7\n#define OPC_SUB 7\nenum opc {\n    opc_stale = 9,\n};\n";
        let once = synchronize(src, &dialect).unwrap();
        let twice = synchronize(&once, &dialect).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn stale_mirror_entries_are_replaced_wholesale() {
        let dialect = Dialect::define_table("OPC_").with_mirror(mirror_enum());
        let src = "#define OPC_ADD 1\n#define OPC_SUB 2\n#define OPC_MUL 3\n\
                   enum opc {\n    opc_old_a = 7,\n    opc_old_b = 8,\n};\n";
        let out = synchronize(src, &dialect).unwrap();
        assert_eq!(
            out,
            "#define OPC_ADD 1\n#define OPC_SUB 2\n#define OPC_MUL 3\n\
             enum opc {\n    opc_add = 1,\n    opc_sub = 2,\n    opc_mul = 3,\n};\n"
        );
    }

    #[test]
    fn mirror_block_is_inserted_at_most_once() {
        let dialect = Dialect::define_table("OPC_").with_mirror(mirror_enum());
        let src = "#define OPC_A 0\nenum opc {\n    opc_stale = 0,\n};\n// lone opc_ mention\n";
        let out = synchronize(src, &dialect).unwrap();
        assert_eq!(out, "#define OPC_A 1\nenum opc {\n    opc_a = 1,\n};\n");
        // la seconde occurrence du marqueur est jetée, pas dupliquée
    }

    #[test]
    fn alias_mirror_references_primary_symbol() {
        let spec = MirrorSpec {
            style: MirrorStyle::AliasConst { type_name: "uint8_t".into() },
            ..mirror_enum()
        };
        let entries = vec![
            OpcodeEntry { name: "OPC_ADD".into(), code: 1 },
            OpcodeEntry { name: "OPC_SUB".into(), code: 2 },
        ];
        assert_eq!(
            emit_mirror(&spec, &entries),
            vec![
                "    const uint8_t opc_add = OPC_ADD;".to_string(),
                "    const uint8_t opc_sub = OPC_SUB;".to_string(),
            ]
        );
    }

    #[test]
    fn alias_mirror_lines_are_not_reparsed_as_primaries() {
        let spec = MirrorSpec {
            style: MirrorStyle::AliasConst { type_name: "uint8_t".into() },
            ..mirror_enum()
        };
        let dialect = Dialect::define_table("OPC_").with_mirror(spec);
        let src = "#define OPC_ADD 3\n    const uint8_t opc_add = OPC_ADD;\n";
        let once = synchronize(src, &dialect).unwrap();
        assert_eq!(once, "#define OPC_ADD 1\n    const uint8_t opc_add = OPC_ADD;\n");
        assert_eq!(synchronize(&once, &dialect).unwrap(), once);
    }

    #[test]
    fn malformed_directive_is_fatal() {
        // la signature est là, mais du texte de tête décale le token-nom
        let src = "// #define OPC_A is reserved\n";
        let err = synchronize(src, &Dialect::define_table("OPC_")).unwrap_err();
        assert!(matches!(err, SyncError::MalformedDirective { line: 1, .. }));
    }

    #[test]
    fn single_token_primary_candidate_is_fatal() {
        // style enum : le préfixe accroche mais la ligne tient en un token
        let src = "Instr_foo\n";
        let err = synchronize(src, &Dialect::enum_table("Instr_")).unwrap_err();
        assert!(matches!(err, SyncError::MalformedDirective { line: 1, .. }));
    }

    #[test]
    fn noncontiguous_marker_mention_is_passthrough() {
        // commentaire citant marqueur et préfixe séparément : ligne passante
        let src = "// The #define lines below all use the OPC_ naming scheme\n#define OPC_A 7\n";
        let out = synchronize(src, &Dialect::define_table("OPC_")).unwrap();
        assert_eq!(
            out,
            "// The #define lines below all use the OPC_ naming scheme\n#define OPC_A 1\n"
        );
    }

    #[test]
    fn wrong_token_at_name_position_is_fatal() {
        let src = "enum Instr : u8 {\n    x Instr_foo = 0,\n};\n";
        let err = synchronize(src, &Dialect::enum_table("Instr_")).unwrap_err();
        assert!(matches!(err, SyncError::MalformedDirective { line: 2, .. }));
    }

    #[test]
    fn duplicate_directive_is_fatal() {
        let src = "#define OPC_A 1\n#define OPC_A 2\n";
        let err = synchronize(src, &Dialect::define_table("OPC_")).unwrap_err();
        assert_eq!(err, SyncError::DuplicateDirective { line: 2, name: "OPC_A".into() });
    }

    #[test]
    fn missing_mirror_region_is_fatal() {
        let dialect = Dialect::define_table("OPC_").with_mirror(mirror_enum());
        let src = "#define OPC_A 1\n";
        let err = synchronize(src, &dialect).unwrap_err();
        assert_eq!(err, SyncError::MissingMirrorRegion { marker: "opc_".into() });
    }

    #[test]
    fn synchronize_also_reports_the_renumbered_table() {
        let src = "#define OPC_A 5\n#define OPC_B 2\n";
        let (out, entries) =
            synchronize_with_table(src, &Dialect::define_table("OPC_")).unwrap();
        assert_eq!(out, "#define OPC_A 1\n#define OPC_B 2\n");
        assert_eq!(
            entries,
            vec![
                OpcodeEntry { name: "OPC_A".into(), code: 1 },
                OpcodeEntry { name: "OPC_B".into(), code: 2 },
            ]
        );
    }

    #[test]
    fn output_is_trimmed_with_single_trailing_newline() {
        let src = "\n\n#define OPC_A 4\n\n\n";
        let out = synchronize(src, &Dialect::define_table("OPC_")).unwrap();
        assert_eq!(out, "#define OPC_A 1\n");
    }

    #[test]
    fn full_document_regeneration() {
        let dialect = Dialect::define_table("OPC_").with_mirror(mirror_enum());
        let src = "\
// opcode table — sorted by return type
#define OPC_I32_LITERAL 12
#define OPC_I32_ADD 3
#define OPC_STR_CONCAT 90

enum opc : uint8_t {
    opc_stale_one = 0,
    opc_stale_two = 1,
};
";
        let out = synchronize(src, &dialect).unwrap();
        insta::assert_snapshot!(out, @r###"
        // opcode table — sorted by return type
        #define OPC_I32_LITERAL 1
        #define OPC_I32_ADD 2
        #define OPC_STR_CONCAT 3

        enum opc : uint8_t {
            opc_i32_literal = 1,
            opc_i32_add = 2,
            opc_str_concat = 3,
        };
        "###);
    }
}
