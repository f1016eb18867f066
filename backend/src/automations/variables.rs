// Variable resolution - {{category.field}} substitution against a run context

use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

/// Snapshot of entity data one run's variable tokens resolve against.
///
/// Built once at trigger time and passed unchanged through every step of an
/// execution; nothing in the engine mutates it mid-run.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    categories: serde_json::Map<String, serde_json::Value>,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self {
            categories: serde_json::Map::new(),
        }
    }

    /// Build from a payload object, one JSON object per category. Scalar
    /// payload entries (e.g. `status_from`) are grouped under `event`.
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        let object = payload.as_object()?;
        let mut ctx = Self::new();
        let mut event_fields = serde_json::Map::new();

        for (key, value) in object {
            if value.is_object() {
                ctx.categories.insert(key.clone(), value.clone());
            } else {
                event_fields.insert(key.clone(), value.clone());
            }
        }
        if !event_fields.is_empty() {
            ctx.categories
                .insert("event".to_string(), serde_json::Value::Object(event_fields));
        }

        Some(ctx)
    }

    /// Attach the club and date utility categories every run gets.
    pub fn with_builtins(mut self, club_id: Uuid) -> Self {
        let now = Utc::now();
        self.categories.entry("club".to_string()).or_insert_with(|| {
            serde_json::json!({ "id": club_id.to_string() })
        });
        self.categories.insert(
            "date".to_string(),
            serde_json::json!({
                "oggi": now.format("%d/%m/%Y").to_string(),
                "adesso": now.to_rfc3339(),
                "anno": now.year(),
            }),
        );
        self
    }

    pub fn insert_category(&mut self, name: &str, value: serde_json::Value) {
        self.categories.insert(name.to_string(), value);
    }

    pub fn has_category(&self, name: &str) -> bool {
        self.categories.contains_key(name)
    }

    pub fn get(&self, category: &str, field: &str) -> Option<&serde_json::Value> {
        self.categories.get(category)?.get(field)
    }

    /// Look up a `category.field` path, as used by condition steps.
    pub fn lookup(&self, path: &str) -> Option<&serde_json::Value> {
        let (category, field) = path.split_once('.')?;
        self.get(category.trim(), field.trim())
    }

    pub fn as_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.categories.clone())
    }

    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(categories) => Some(Self { categories }),
            _ => None,
        }
    }

    /// Representative sample context used for manual tests when no recent
    /// club data is available.
    pub fn sample(club_id: Uuid) -> Self {
        let mut ctx = Self::new();
        ctx.insert_category(
            "lead",
            serde_json::json!({
                "id": Uuid::new_v4().to_string(),
                "nome": "Mario Rossi",
                "azienda": "Esempio SRL",
                "email": "mario.rossi@esempio.it",
                "telefono": "+39 333 0000000",
                "status": "new",
            }),
        );
        ctx.insert_category(
            "sponsor",
            serde_json::json!({
                "id": Uuid::new_v4().to_string(),
                "nome": "Sponsor Demo",
                "azienda": "Demo SpA",
                "email": "info@demo.it",
                "tier": "gold",
                "status": "active",
            }),
        );
        ctx.insert_category(
            "contract",
            serde_json::json!({
                "id": Uuid::new_v4().to_string(),
                "titolo": "Contratto demo",
                "valore": "10000",
                "valuta": "EUR",
                "status": "active",
            }),
        );
        ctx.with_builtins(club_id)
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Substitute `{{category.field}}` tokens in `template` from `context`.
///
/// Unknown categories or fields leave the token verbatim, so configuration
/// mistakes stay visible in the delivered text. Single pass: substituted
/// values are never re-scanned, so nested tokens in user data cannot expand.
pub fn resolve(template: &str, context: &RuntimeContext) -> String {
    TOKEN_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match context.get(&caps[1], &caps[2]) {
                Some(value) => value_to_string(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Resolve every string field of a step config, recursing into nested
/// objects and arrays. Non-string values pass through untouched.
pub fn resolve_config(config: &serde_json::Value, context: &RuntimeContext) -> serde_json::Value {
    match config {
        serde_json::Value::String(s) => serde_json::Value::String(resolve(s, context)),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_config(v, context)))
                .collect(),
        ),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.iter().map(|v| resolve_config(v, context)).collect(),
        ),
        other => other.clone(),
    }
}

/// One documented variable, served to the builder UI.
#[derive(Debug, Clone, Serialize)]
pub struct VariableSpec {
    pub key: &'static str,
    pub label: &'static str,
    pub example: &'static str,
}

/// Variables grouped by category for the builder's insert menu.
#[derive(Debug, Clone, Serialize)]
pub struct VariableGroup {
    pub category: &'static str,
    pub label: &'static str,
    pub variables: Vec<VariableSpec>,
}

pub fn list_variables() -> Vec<VariableGroup> {
    fn var(key: &'static str, label: &'static str, example: &'static str) -> VariableSpec {
        VariableSpec { key, label, example }
    }

    vec![
        VariableGroup {
            category: "lead",
            label: "Lead",
            variables: vec![
                var("{{lead.nome}}", "Nome", "Mario Rossi"),
                var("{{lead.azienda}}", "Azienda", "Esempio SRL"),
                var("{{lead.email}}", "Email", "mario@esempio.it"),
                var("{{lead.telefono}}", "Telefono", "+39 333 0000000"),
                var("{{lead.status}}", "Stato", "qualified"),
            ],
        },
        VariableGroup {
            category: "sponsor",
            label: "Sponsor",
            variables: vec![
                var("{{sponsor.nome}}", "Nome", "Sponsor Demo"),
                var("{{sponsor.azienda}}", "Azienda", "Demo SpA"),
                var("{{sponsor.email}}", "Email", "info@demo.it"),
                var("{{sponsor.tier}}", "Livello", "gold"),
                var("{{sponsor.status}}", "Stato", "active"),
            ],
        },
        VariableGroup {
            category: "contract",
            label: "Contratto",
            variables: vec![
                var("{{contract.titolo}}", "Titolo", "Main sponsor 2026"),
                var("{{contract.valore}}", "Valore", "10000"),
                var("{{contract.valuta}}", "Valuta", "EUR"),
                var("{{contract.status}}", "Stato", "active"),
            ],
        },
        VariableGroup {
            category: "club",
            label: "Club",
            variables: vec![var("{{club.id}}", "ID club", "a1b2…")],
        },
        VariableGroup {
            category: "date",
            label: "Data",
            variables: vec![
                var("{{date.oggi}}", "Oggi", "29/08/2026"),
                var("{{date.adesso}}", "Adesso", "2026-08-29T10:00:00Z"),
                var("{{date.anno}}", "Anno", "2026"),
            ],
        },
    ]
}
