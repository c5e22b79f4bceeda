//! Call-target classification.
//!
//! Maps a callee's demangled identifier to a [`FunctionInfo`]: the operation
//! token plus the argument positions that are consumed or produced. Resolution
//! order, first match wins:
//!
//! 1. exact match in the curated [`KnownFunctions`] table,
//! 2. substring markers on the normalized identifier,
//! 3. identifiers the program never declares become `Star`,
//! 4. anything else is a `Use` of every argument.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::delta::ConstructMode;
use crate::program::{Declaration, DeclarationIndex};

/// Factory output position denoting the call's return value.
pub const RETURN_POSITION: i32 = -1;

/// Largest argument index a curated entry may name.
pub const MAX_ARG_POSITION: i32 = 255;

// ============================================================================
// Tokens
// ============================================================================

/// Operational role of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Token {
    /// Uninteresting call; no transition.
    Star,
    /// Extracts a raw pointer without destroying the source.
    GetPtr,
    /// Builds an owner from raw parts.
    UnsafeConstruct,
    Drop,
    Use,
}

impl Token {
    pub const ALL: [Token; 5] = [
        Token::Star,
        Token::GetPtr,
        Token::UnsafeConstruct,
        Token::Drop,
        Token::Use,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Token::Star => "STAR",
            Token::GetPtr => "GET_PTR",
            Token::UnsafeConstruct => "UNSAFE_CONSTRUCT",
            Token::Drop => "DROP",
            Token::Use => "USE",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which resolution step produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Curated,
    Heuristic,
    /// The program does not declare the identifier at all.
    Unresolved,
    /// Declared but not recognised; modelled as a use of every argument.
    Fallback,
}

impl Provenance {
    /// True when the call was positively recognised rather than defaulted.
    pub fn is_recognised(self) -> bool {
        matches!(self, Provenance::Curated | Provenance::Heuristic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Curated => "curated",
            Provenance::Heuristic => "heuristic",
            Provenance::Unresolved => "unresolved",
            Provenance::Fallback => "fallback",
        }
    }
}

/// Classification of one call target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionInfo {
    pub token: Token,
    pub is_factory: bool,
    /// Positions holding the produced value; [`RETURN_POSITION`] is the return value.
    pub factory_output_positions: BTreeSet<i32>,
    /// Argument positions whose incoming value transitions at this call.
    pub consumer_input_positions: BTreeSet<i32>,
    pub provenance: Provenance,
}

impl FunctionInfo {
    fn star(provenance: Provenance) -> Self {
        Self {
            token: Token::Star,
            is_factory: false,
            factory_output_positions: BTreeSet::new(),
            consumer_input_positions: BTreeSet::new(),
            provenance,
        }
    }

    pub fn is_consuming(&self) -> bool {
        !self.consumer_input_positions.is_empty()
    }
}

// ============================================================================
// Curated table
// ============================================================================

/// One hand-authored entry of the curated table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownFunction {
    /// Normalized identifier (no generic arguments, no hash suffix).
    pub name: String,
    pub token: Token,
    /// Source-level argument indices.
    #[serde(default)]
    pub consumers: Vec<i32>,
    /// For `unsafe-construct` entries these apply only in factory mode.
    #[serde(default)]
    pub factory_outputs: Vec<i32>,
}

impl KnownFunction {
    /// Check argument positions: consumers in `0..=MAX_ARG_POSITION`, factory
    /// outputs additionally allow [`RETURN_POSITION`].
    pub fn validate(&self) -> Result<(), String> {
        let in_range = |pos: i32, min: i32| (min..=MAX_ARG_POSITION).contains(&pos);
        if let Some(pos) = self.consumers.iter().find(|p| !in_range(**p, 0)) {
            return Err(format!(
                "`{}`: consumer position {pos} is outside 0..={MAX_ARG_POSITION}",
                self.name
            ));
        }
        if let Some(pos) = self
            .factory_outputs
            .iter()
            .find(|p| !in_range(**p, RETURN_POSITION))
        {
            return Err(format!(
                "`{}`: factory output position {pos} is outside -1..={MAX_ARG_POSITION}",
                self.name
            ));
        }
        Ok(())
    }
}

const R: &[i32] = &[RETURN_POSITION];
const A0: &[i32] = &[0];
const A01: &[i32] = &[0, 1];
const NONE: &[i32] = &[];

/// (name, token, consumers, factory outputs)
const BUILTIN_KNOWN: &[(&str, Token, &[i32], &[i32])] = &[
    ("alloc::vec::Vec::as_ptr", Token::GetPtr, A0, R),
    ("alloc::vec::Vec::as_mut_ptr", Token::GetPtr, A0, R),
    ("alloc::vec::Vec::into_raw_parts", Token::GetPtr, A0, R),
    ("alloc::vec::Vec::from_raw_parts", Token::UnsafeConstruct, A0, R),
    ("alloc::string::String::as_ptr", Token::GetPtr, A0, R),
    ("alloc::string::String::as_mut_ptr", Token::GetPtr, A0, R),
    ("alloc::string::String::into_raw_parts", Token::GetPtr, A0, R),
    ("alloc::string::String::from_raw_parts", Token::UnsafeConstruct, A0, R),
    ("alloc::boxed::Box::into_raw", Token::GetPtr, A0, R),
    ("alloc::boxed::Box::from_raw", Token::UnsafeConstruct, A0, R),
    ("alloc::rc::Rc::into_raw", Token::GetPtr, A0, R),
    ("alloc::rc::Rc::from_raw", Token::UnsafeConstruct, A0, R),
    ("alloc::sync::Arc::into_raw", Token::GetPtr, A0, R),
    ("alloc::sync::Arc::from_raw", Token::UnsafeConstruct, A0, R),
    ("alloc::ffi::c_str::CString::into_raw", Token::GetPtr, A0, R),
    ("alloc::ffi::c_str::CString::from_raw", Token::UnsafeConstruct, A0, R),
    ("core::slice::raw::from_raw_parts", Token::UnsafeConstruct, A0, R),
    ("core::slice::raw::from_raw_parts_mut", Token::UnsafeConstruct, A0, R),
    ("core::ptr::drop_in_place", Token::Drop, A0, NONE),
    ("core::mem::drop", Token::Drop, A0, NONE),
    ("__rust_dealloc", Token::Drop, A0, NONE),
    ("alloc::alloc::dealloc", Token::Drop, A0, NONE),
    ("core::ptr::read", Token::Use, A0, NONE),
    ("core::ptr::write", Token::Use, A0, NONE),
    ("core::ptr::copy", Token::Use, A01, NONE),
    ("core::ptr::copy_nonoverlapping", Token::Use, A01, NONE),
    ("core::mem::forget", Token::Star, NONE, NONE),
    ("core::mem::manually_drop::ManuallyDrop::new", Token::Star, NONE, NONE),
];

/// Immutable curated lookup table, shared by every classifier instance.
#[derive(Debug, Clone, Default)]
pub struct KnownFunctions {
    entries: HashMap<String, KnownFunction>,
}

impl KnownFunctions {
    pub fn builtin() -> Self {
        let entries = BUILTIN_KNOWN
            .iter()
            .map(|(name, token, consumers, outputs)| {
                (
                    name.to_string(),
                    KnownFunction {
                        name: name.to_string(),
                        token: *token,
                        consumers: consumers.to_vec(),
                        factory_outputs: outputs.to_vec(),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Add or replace entries; names are normalized before insertion.
    pub fn with_entries(mut self, extra: impl IntoIterator<Item = KnownFunction>) -> Self {
        for mut entry in extra {
            entry.name = normalize_identifier(&entry.name);
            self.entries.insert(entry.name.clone(), entry);
        }
        self
    }

    pub fn get(&self, normalized: &str) -> Option<&KnownFunction> {
        self.entries.get(normalized)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Heuristics
// ============================================================================

const GET_PTR_MARKERS: &[&str] = &["into_raw_parts", "into_raw", "as_mut_ptr", "as_ptr"];
const UNSAFE_CONSTRUCT_MARKERS: &[&str] = &["from_raw_parts", "from_raw"];
const DROP_MARKERS: &[&str] = &["drop_in_place", "::drop", "dealloc"];

fn heuristic_token(normalized: &str) -> Option<Token> {
    let has = |markers: &[&str]| markers.iter().any(|m| normalized.contains(m));
    if has(GET_PTR_MARKERS) {
        Some(Token::GetPtr)
    } else if has(UNSAFE_CONSTRUCT_MARKERS) {
        Some(Token::UnsafeConstruct)
    } else if has(DROP_MARKERS) {
        Some(Token::Drop)
    } else {
        None
    }
}

static HASH_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"::h[0-9a-f]{16}$").expect("hash suffix pattern is valid"));

/// Strip the legacy mangling hash and generic argument lists from a demangled path.
///
/// `alloc::vec::Vec<T,A>::as_mut_ptr::h0123456789abcdef` becomes
/// `alloc::vec::Vec::as_mut_ptr`. A bracket group that opens a path segment
/// (`<X as Trait>::f`, `<impl [T]>::f`) is kept, with its inner generics stripped.
pub fn normalize_identifier(identifier: &str) -> String {
    let trimmed = HASH_SUFFIX.replace(identifier.trim(), "");
    let mut out = String::with_capacity(trimmed.len());
    let mut skip_depth = 0usize;
    let mut prev: Option<char> = None;

    for c in trimmed.chars() {
        if skip_depth > 0 {
            match c {
                '<' => skip_depth += 1,
                '>' if prev != Some('-') => skip_depth -= 1,
                _ => {}
            }
        } else if c == '<' && prev.is_some_and(|p| p.is_alphanumeric() || p == '_') {
            skip_depth = 1;
        } else {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}

// ============================================================================
// Classifier
// ============================================================================

/// Pure classification of call targets, parameterised by the construct mode.
#[derive(Debug, Clone)]
pub struct Classifier {
    known: Arc<KnownFunctions>,
    declarations: Arc<DeclarationIndex>,
}

impl Classifier {
    pub fn new(known: Arc<KnownFunctions>, declarations: Arc<DeclarationIndex>) -> Self {
        Self {
            known,
            declarations,
        }
    }

    pub fn classify(&self, identifier: &str, mode: ConstructMode) -> FunctionInfo {
        let declaration = self.declarations.resolve(identifier);
        let normalized = normalize_identifier(identifier);

        if let Some(entry) = self.known.get(&normalized) {
            return shape(
                entry.token,
                entry.consumers.iter().copied().collect(),
                entry.factory_outputs.iter().copied().collect(),
                Provenance::Curated,
                declaration,
                mode,
            );
        }

        if let Some(token) = heuristic_token(&normalized) {
            let outputs = match token {
                Token::GetPtr | Token::UnsafeConstruct => BTreeSet::from([RETURN_POSITION]),
                _ => BTreeSet::new(),
            };
            return shape(
                token,
                BTreeSet::from([0]),
                outputs,
                Provenance::Heuristic,
                declaration,
                mode,
            );
        }

        let Some(declaration) = declaration else {
            crate::trace_event!(identifier, "unresolved callee treated as no-op");
            return FunctionInfo::star(Provenance::Unresolved);
        };

        crate::debug_event!(
            identifier,
            arity = declaration.arity,
            "unclassified callee falls back to USE of every argument"
        );
        FunctionInfo {
            token: Token::Use,
            is_factory: false,
            factory_output_positions: BTreeSet::new(),
            consumer_input_positions: (0..declaration.arity as i32).collect(),
            provenance: Provenance::Fallback,
        }
    }

    /// Mode-independent token of a call target.
    pub fn token_of(&self, identifier: &str) -> Token {
        self.classify(identifier, ConstructMode::Consuming).token
    }
}

/// Apply mode and output-slot adjustments to a recognised classification.
fn shape(
    token: Token,
    consumers: BTreeSet<i32>,
    outputs: BTreeSet<i32>,
    provenance: Provenance,
    declaration: Option<&Declaration>,
    mode: ConstructMode,
) -> FunctionInfo {
    let (is_factory, mut outputs) = match token {
        Token::UnsafeConstruct if mode.unsafe_construct_as_factory() => {
            let outputs = if outputs.is_empty() {
                BTreeSet::from([RETURN_POSITION])
            } else {
                outputs
            };
            (true, outputs)
        }
        Token::UnsafeConstruct => (false, BTreeSet::new()),
        _ => (!outputs.is_empty(), outputs),
    };

    let consumers = match declaration.and_then(|d| d.output_arg) {
        Some(slot) => {
            let slot = slot as i32;
            if is_factory {
                outputs.insert(slot);
            }
            consumers
                .into_iter()
                .map(|pos| if pos >= slot { pos.saturating_add(1) } else { pos })
                .collect()
        }
        None => consumers,
    };

    FunctionInfo {
        token,
        is_factory,
        factory_output_positions: outputs,
        consumer_input_positions: consumers,
        provenance,
    }
}
