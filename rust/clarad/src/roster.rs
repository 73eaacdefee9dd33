use crate::normalize::{is_truthy, truthy_text};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("{source_name} modules unavailable: {message}")]
    PartialSourceFailure {
        source_name: String,
        message: String,
    },
}

/// Module identifiers arrive as integers from one endpoint and as strings from
/// another; identity compares the canonical text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModuleId {
    Number(i64),
    Text(String),
}

impl ModuleId {
    pub fn from_value(v: &Value) -> Option<Self> {
        if !is_truthy(v) {
            return None;
        }
        match v {
            Value::Number(n) => Some(
                n.as_i64()
                    .map(ModuleId::Number)
                    .unwrap_or_else(|| ModuleId::Text(n.to_string())),
            ),
            Value::String(s) => Some(ModuleId::Text(s.clone())),
            _ => None,
        }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }

    fn is_valid(&self) -> bool {
        match self {
            ModuleId::Number(n) => *n != 0,
            ModuleId::Text(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleId::Number(n) => write!(f, "{n}"),
            ModuleId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    pub module_id: ModuleId,
    pub name: String,
    pub is_imported: bool,
}

impl ModuleRecord {
    fn is_displayable(&self) -> bool {
        self.module_id.is_valid() && !self.name.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Owned,
    Imported,
}

impl Origin {
    fn label(self) -> &'static str {
        match self {
            Origin::Owned => "owned",
            Origin::Imported => "imported",
        }
    }
}

/// Key used by the first reconciliation pass. The visible roster is always
/// unique by module id regardless of this choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupKey {
    #[default]
    ModuleId,
    Name,
}

impl DedupKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "moduleId" => Some(DedupKey::ModuleId),
            "name" => Some(DedupKey::Name),
            _ => None,
        }
    }

    fn of(self, record: &ModuleRecord) -> String {
        match self {
            DedupKey::ModuleId => record.module_id.key(),
            DedupKey::Name => record.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSource {
    pub records: Vec<ModuleRecord>,
    /// Malformed records skipped while parsing.
    pub dropped: usize,
    pub api_error: Option<String>,
}

/// Read module records out of a fetch envelope (`{ success, modules, error }`)
/// or a bare array of module objects. Anything unexpected contributes nothing.
pub fn parse_source(raw: &Value, origin: Origin) -> ParsedSource {
    let mut parsed = ParsedSource::default();
    let items = match raw {
        Value::Array(items) => items.as_slice(),
        Value::Object(_) => {
            parsed.api_error = truthy_text(raw.get("error"));
            let success = raw.get("success").is_some_and(is_truthy);
            match raw.get("modules") {
                Some(Value::Array(items)) if success => items.as_slice(),
                _ => return parsed,
            }
        }
        _ => return parsed,
    };

    for item in items {
        match record_from_value(item, origin) {
            Some(record) => parsed.records.push(record),
            None => parsed.dropped += 1,
        }
    }
    parsed
}

fn record_from_value(item: &Value, origin: Origin) -> Option<ModuleRecord> {
    let module_id = item
        .get("ModuleID")
        .and_then(ModuleId::from_value)
        .or_else(|| item.get("moduleId").and_then(ModuleId::from_value))?;
    let name = truthy_text(item.get("ModuleName")).or_else(|| truthy_text(item.get("name")))?;
    Some(ModuleRecord {
        module_id,
        name,
        is_imported: origin == Origin::Imported,
    })
}

/// Merge owned and imported modules, owned first. Later records whose key was
/// already seen are skipped, as are records without an id or a name.
pub fn reconcile(
    owned: &[ModuleRecord],
    imported: &[ModuleRecord],
    key: DedupKey,
) -> Vec<ModuleRecord> {
    let mut seen = HashSet::new();
    owned
        .iter()
        .chain(imported)
        .filter(|r| r.is_displayable())
        .filter(|r| seen.insert(key.of(r)))
        .cloned()
        .collect()
}

/// Final pass before display: no two entries may share a module id.
pub fn materialize(records: Vec<ModuleRecord>) -> Vec<ModuleRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.module_id.key()))
        .collect()
}

/// A backend that lists modules, answering with the raw fetch envelope.
pub trait ModuleSource: Send + Sync {
    fn name(&self) -> &str;
    fn fetch(&self) -> anyhow::Result<Value>;
}

/// Stand-in used when a source cannot be addressed at all (no workspace, no
/// user id).
pub struct EmptySource;

impl ModuleSource for EmptySource {
    fn name(&self) -> &str {
        "empty"
    }

    fn fetch(&self) -> anyhow::Result<Value> {
        Ok(serde_json::json!({ "success": true, "modules": [] }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RosterPhase {
    Idle,
    Fetching,
    Displayed,
    EmptyDisplayed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterSnapshot {
    pub phase: RosterPhase,
    pub modules: Vec<ModuleRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterUpdate {
    pub phase: RosterPhase,
    pub modules: Vec<ModuleRecord>,
    /// False when the visible roster is identical to the previous one.
    pub changed: bool,
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Another refresh was already running; nothing happened.
    Skipped,
    Completed(RosterUpdate),
}

/// Fetch-and-display cycle for the module sidebar.
pub struct RosterService {
    in_progress: AtomicBool,
    snapshot: Mutex<RosterSnapshot>,
}

impl Default for RosterService {
    fn default() -> Self {
        RosterService {
            in_progress: AtomicBool::new(false),
            snapshot: Mutex::new(RosterSnapshot {
                phase: RosterPhase::Idle,
                modules: Vec::new(),
            }),
        }
    }
}

struct FetchGuard<'a>(&'a AtomicBool);

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RosterService {
    pub fn snapshot(&self) -> RosterSnapshot {
        self.lock().clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Fetch both sources, reconcile and record the displayed roster. A call
    /// made while another is outstanding returns `Skipped` immediately.
    pub fn refresh(
        &self,
        owned: &dyn ModuleSource,
        imported: &dyn ModuleSource,
        key: DedupKey,
    ) -> RefreshOutcome {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("roster refresh already in progress; ignoring");
            return RefreshOutcome::Skipped;
        }
        let _guard = FetchGuard(&self.in_progress);
        self.lock().phase = RosterPhase::Fetching;

        let (owned, imported) = std::thread::scope(|s| {
            let owned_task = s.spawn(|| fetch_source(owned, Origin::Owned));
            let imported = fetch_source(imported, Origin::Imported);
            let owned = owned_task.join().unwrap_or_else(|_| {
                warn!("owned module fetch panicked; treating as empty");
                ParsedSource::default()
            });
            (owned, imported)
        });

        let modules = materialize(reconcile(&owned.records, &imported.records, key));
        let phase = if modules.is_empty() {
            RosterPhase::EmptyDisplayed
        } else {
            RosterPhase::Displayed
        };

        let mut snapshot = self.lock();
        let changed = snapshot.modules != modules;
        snapshot.phase = phase;
        snapshot.modules = modules.clone();
        drop(snapshot);

        info!(
            count = modules.len(),
            owned = owned.records.len(),
            imported = imported.records.len(),
            changed,
            "roster refreshed"
        );
        RefreshOutcome::Completed(RosterUpdate {
            phase,
            modules,
            changed,
            dropped: owned.dropped + imported.dropped,
        })
    }

    fn lock(&self) -> MutexGuard<'_, RosterSnapshot> {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn fetch_source(source: &dyn ModuleSource, origin: Origin) -> ParsedSource {
    let parsed = match source.fetch() {
        Ok(raw) => parse_source(&raw, origin),
        Err(e) => {
            let failure = RosterError::PartialSourceFailure {
                source_name: source.name().to_string(),
                message: format!("{e:#}"),
            };
            warn!(origin = origin.label(), "{failure}");
            return ParsedSource::default();
        }
    };
    if let Some(message) = &parsed.api_error {
        let failure = RosterError::PartialSourceFailure {
            source_name: source.name().to_string(),
            message: message.clone(),
        };
        warn!(origin = origin.label(), "{failure}");
    }
    if parsed.dropped > 0 {
        debug!(
            origin = origin.label(),
            dropped = parsed.dropped,
            "skipped malformed module records"
        );
    }
    parsed
}
